//! SOAP fetch strategy
//!
//! Posts the configured request template with window placeholders filled
//! in and walks the response envelope as a JSON tree. A typical
//! `records_path` looks like `Envelope.Body.GetSalesResponse.Sales.Sale`.

use async_trait::async_trait;
use tracing::debug;

use tdp_common::fingerprint::payload_fingerprint;

use super::xml::xml_to_json;
use super::{
    extract_records, render_placeholders, status_error, FetchError, FetchWindow, FetchedPayload,
    VendorFetcher,
};
use crate::ingest::config::VendorConfiguration;

pub struct SoapFetcher {
    http: reqwest::Client,
}

impl SoapFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl VendorFetcher for SoapFetcher {
    async fn fetch(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
    ) -> Result<FetchedPayload, FetchError> {
        let url = config
            .endpoint_url
            .as_deref()
            .ok_or_else(|| FetchError::Config("endpoint_url is not set".to_string()))?;
        let template = config
            .request_template
            .as_deref()
            .ok_or_else(|| FetchError::Config("request_template is not set".to_string()))?;

        let body = render_placeholders(template, config, window, None);

        let mut request = self
            .http
            .post(render_placeholders(url, config, window, None))
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(body);

        if let Some(action) = &config.soap_action {
            request = request.header("SOAPAction", format!("\"{}\"", action));
        }
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

        let payload = response.bytes().await?.to_vec();
        let tree = xml_to_json(&String::from_utf8_lossy(&payload))?;

        let records = extract_records(tree, config.records_path.as_deref())?;
        debug!(vendor = %config.label(), records = records.len(), "Fetched SOAP payload");

        Ok(FetchedPayload {
            fingerprint: Some(payload_fingerprint(&payload)),
            records,
        })
    }
}
