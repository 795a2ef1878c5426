//! REST/JSON fetch strategy

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use tdp_common::fingerprint::payload_fingerprint;

use super::{
    extract_records, render_placeholders, status_error, FetchError, FetchWindow, FetchedPayload,
    VendorFetcher,
};
use crate::ingest::config::VendorConfiguration;

pub struct ApiFetcher {
    http: reqwest::Client,
}

impl ApiFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl VendorFetcher for ApiFetcher {
    async fn fetch(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
    ) -> Result<FetchedPayload, FetchError> {
        let template = config
            .endpoint_url
            .as_deref()
            .ok_or_else(|| FetchError::Config("endpoint_url is not set".to_string()))?;
        let url = render_placeholders(template, config, window, None);

        let body = http_get(&self.http, &url, config).await?;
        let tree: Value = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Malformed(format!("invalid JSON response: {}", e)))?;

        let records = extract_records(tree, config.records_path.as_deref())?;
        debug!(vendor = %config.label(), records = records.len(), "Fetched JSON payload");

        Ok(FetchedPayload {
            fingerprint: Some(payload_fingerprint(&body)),
            records,
        })
    }
}

/// GET with the configured authentication. Bearer tokens win over basic
/// credentials when both are present.
pub(crate) async fn http_get(
    http: &reqwest::Client,
    url: &str,
    config: &VendorConfiguration,
) -> Result<Vec<u8>, FetchError> {
    let mut request = http.get(url);

    if let Some(token) = &config.auth_token {
        request = request.bearer_auth(token);
    } else if let Some(username) = &config.username {
        request = request.basic_auth(username, config.password.as_deref());
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status));
    }

    Ok(response.bytes().await?.to_vec())
}
