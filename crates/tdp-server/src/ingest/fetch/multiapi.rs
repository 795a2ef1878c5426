//! Paginated REST fetch strategy
//!
//! Fetches pages until a short or empty page signals the end. Templates
//! with a `{page}` placeholder control their own pagination parameter;
//! otherwise `page` and `limit` query parameters are appended.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use tdp_common::fingerprint::payload_fingerprint;

use super::api::http_get;
use super::{
    extract_records, render_placeholders, FetchError, FetchWindow, FetchedPayload, VendorFetcher,
};
use crate::ingest::config::VendorConfiguration;

pub struct MultiApiFetcher {
    http: reqwest::Client,
    max_pages: u32,
}

impl MultiApiFetcher {
    pub fn new(http: reqwest::Client, max_pages: u32) -> Self {
        Self { http, max_pages }
    }

    fn page_url(
        &self,
        template: &str,
        config: &VendorConfiguration,
        window: FetchWindow,
        page: u32,
        page_size: i32,
    ) -> String {
        if template.contains("{page}") {
            render_placeholders(template, config, window, Some(page))
        } else {
            let base = render_placeholders(template, config, window, None);
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{}{}page={}&limit={}", base, separator, page, page_size)
        }
    }
}

#[async_trait]
impl VendorFetcher for MultiApiFetcher {
    async fn fetch(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
    ) -> Result<FetchedPayload, FetchError> {
        let template = config
            .endpoint_url
            .as_deref()
            .ok_or_else(|| FetchError::Config("endpoint_url is not set".to_string()))?;
        let page_size = config.page_size();

        let mut records = Vec::new();
        let mut raw_payloads: Vec<u8> = Vec::new();

        for page in 1..=self.max_pages {
            let url = self.page_url(template, config, window, page, page_size);
            let body = http_get(&self.http, &url, config).await?;
            let tree: Value = serde_json::from_slice(&body).map_err(|e| {
                FetchError::Malformed(format!("invalid JSON response on page {}: {}", page, e))
            })?;

            let batch = extract_records(tree, config.records_path.as_deref())?;
            let batch_len = batch.len();
            raw_payloads.extend_from_slice(&body);
            records.extend(batch);

            debug!(
                vendor = %config.label(),
                page,
                records = batch_len,
                "Fetched page"
            );

            if batch_len < page_size as usize {
                break;
            }
            if page == self.max_pages {
                warn!(
                    vendor = %config.label(),
                    max_pages = self.max_pages,
                    "Stopping pagination at the page cap"
                );
            }
        }

        Ok(FetchedPayload {
            fingerprint: Some(payload_fingerprint(&raw_payloads)),
            records,
        })
    }
}
