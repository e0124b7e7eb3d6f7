//! Public IP lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::ProbeError;

/// Reports the address the outside world currently sees.
#[async_trait]
pub trait PublicIpProbe: Send + Sync {
    /// The current public IP, or `None` when it cannot be determined.
    async fn current_ip(&self) -> Option<String>;
}

const IPIFY_ENDPOINT: &str = "https://api.ipify.org/?format=json";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct IpifyResponse {
    ip: String,
}

/// Probe backed by the ipify JSON API.
pub struct IpifyProbe {
    client: Client,
    endpoint: String,
}

impl IpifyProbe {
    pub fn new() -> Self {
        Self::with_endpoint(IPIFY_ENDPOINT)
    }

    /// Uses a compatible endpoint returning `{"ip": "..."}`.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Looks up the public IP, keeping the failure reason.
    pub async fn lookup(&self) -> Result<String, ProbeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| ProbeError::RequestFailed(e.to_string()))?;

        let body: IpifyResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::ParseError(e.to_string()))?;

        Ok(body.ip)
    }
}

impl Default for IpifyProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublicIpProbe for IpifyProbe {
    async fn current_ip(&self) -> Option<String> {
        match self.lookup().await {
            Ok(ip) => Some(ip),
            Err(e) => {
                debug!(error = %e, "Public IP probe failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipify_response_parse() {
        let body: IpifyResponse =
            serde_json::from_str(r#"{"ip":"203.0.113.7"}"#).expect("valid body");
        assert_eq!(body.ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_none() {
        let probe = IpifyProbe::with_endpoint("http://127.0.0.1:1/");
        assert!(probe.current_ip().await.is_none());
    }
}
