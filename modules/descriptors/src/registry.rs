//! HTTP registry client.
//!
//! `GET {base}/orgs/{org}/services[?network=..]` answers with
//! `[{"service_id": "...", "metadata": {...}}, ...]`.

use crate::{DescriptorSource, SourceError};
use async_trait::async_trait;
use certwatch_core::RawDescriptor;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    service_id: String,
    metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: Client,
    base_url: String,
    network: Option<String>,
}

impl HttpRegistry {
    /// `network` is opaque; it is forwarded as a query parameter when set.
    pub fn new(base_url: impl Into<String>, network: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("certwatch/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;
        Ok(HttpRegistry { client, base_url: base_url.into(), network })
    }
}

#[async_trait]
impl DescriptorSource for HttpRegistry {
    async fn fetch(&self, org_id: &str) -> Result<Vec<RawDescriptor>, SourceError> {
        let url = format!("{}/orgs/{}/services", self.base_url.trim_end_matches('/'), org_id);
        let mut req = self.client.get(&url);
        if let Some(network) = &self.network {
            req = req.query(&[("network", network)]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let entries: Vec<ServiceEntry> = resp.json().await?;
        Ok(entries
            .into_iter()
            .map(|e| RawDescriptor { name: e.service_id, body: e.metadata.to_string() })
            .collect())
    }
}
