//! Page-visit capability.
//!
//! The scheduler never touches pages itself; it hands a target and an
//! [`Identity`] to a [`PageVisitDriver`] and gets a [`VisitResult`] back.
//! Drivers must not fail: every problem is reported inside the result so the
//! scheduler can classify it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::Identity;

/// Outcome of one visit as reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisitResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Performs visits on behalf of the scheduler.
#[async_trait]
pub trait PageVisitDriver: Send + Sync {
    /// Visits `url` through `identity`. Never panics, never returns `Err`.
    async fn visit(&self, url: &str, identity: &Identity) -> VisitResult;

    /// Releases any sessions the driver holds. Must be idempotent.
    async fn shutdown(&self) {}
}

/// Default per-visit timeout for [`HttpVisitDriver`].
const DEFAULT_VISIT_TIMEOUT: Duration = Duration::from_secs(45);

/// A driver that issues one HTTP GET per visit, routed through the identity.
///
/// Proxies and tunnel endpoints with a local proxy URL go through
/// `reqwest::Proxy`; relay slots rewrite the target through the relay's URL
/// template; devices and direct identities use the host's connection.
pub struct HttpVisitDriver {
    direct: Client,
    timeout: Duration,
}

impl HttpVisitDriver {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_VISIT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let direct = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { direct, timeout }
    }

    fn proxied_client(&self, proxy_url: &str, credentials: Option<(&str, &str)>) -> Result<Client, String> {
        let mut proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| format!("Proxy configuration invalid ({}): {}", proxy_url, e))?;
        if let Some((user, pass)) = credentials {
            proxy = proxy.basic_auth(user, pass);
        }

        Client::builder()
            .timeout(self.timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| format!("Proxy client build failed ({}): {}", proxy_url, e))
    }

    fn route(&self, url: &str, identity: &Identity) -> Result<(Client, String, Option<String>), String> {
        match identity {
            Identity::Proxy(p) => {
                let credentials = match (&p.username, &p.password) {
                    (Some(u), Some(pw)) => Some((u.as_str(), pw.as_str())),
                    _ => None,
                };
                let client = self.proxied_client(&p.url(), credentials)?;
                Ok((client, url.to_string(), Some(p.url())))
            }
            Identity::Tunnel(t) => match &t.proxy_url {
                Some(proxy_url) => {
                    let client = self.proxied_client(proxy_url, None)?;
                    Ok((client, url.to_string(), Some(proxy_url.clone())))
                }
                None => Ok((self.direct.clone(), url.to_string(), None)),
            },
            Identity::Relay(slot) => Ok((self.direct.clone(), slot.relay.wrap(url), None)),
            Identity::Device(_) | Identity::Direct => {
                Ok((self.direct.clone(), url.to_string(), None))
            }
        }
    }
}

impl Default for HttpVisitDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageVisitDriver for HttpVisitDriver {
    async fn visit(&self, url: &str, identity: &Identity) -> VisitResult {
        let (client, request_url, via_proxy) = match self.route(url, identity) {
            Ok(route) => route,
            Err(e) => return VisitResult::failed(e),
        };

        debug!(url = %request_url, identity = %identity.key(), "Issuing visit request");

        match client.get(&request_url).send().await {
            Ok(response) if response.status().is_success() => VisitResult::ok(),
            Ok(response) => VisitResult::failed(format!("HTTP {}", response.status())),
            Err(e) => VisitResult::failed(describe_transport_error(&e, via_proxy.as_deref())),
        }
    }
}

/// Maps a transport error to a message carrying the markers the scheduler
/// classifies on.
fn describe_transport_error(err: &reqwest::Error, via_proxy: Option<&str>) -> String {
    if err.is_timeout() {
        format!("Page load timeout: {}", err)
    } else if err.is_connect() {
        match via_proxy {
            Some(proxy) => format!("Proxy connection failed ({}): {}", proxy, err),
            None => format!("Connection refused: {}", err),
        }
    } else {
        format!("Request failed: {}", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ProxyEndpoint, RelayService, RelaySlot, TunnelEndpoint};

    #[test]
    fn test_visit_result_constructors() {
        assert!(VisitResult::ok().success);
        let failed = VisitResult::failed("timeout");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_route_relay_rewrites_target() {
        let driver = HttpVisitDriver::new();
        let identity = Identity::Relay(RelaySlot {
            relay: RelayService::new("gate", "https://gate.example/?u={url}"),
            browser: 0,
            tab: 0,
        });
        let (_, url, proxy) = driver
            .route("https://a.example/", &identity)
            .expect("relay route");
        assert_eq!(url, "https://gate.example/?u=https%3A%2F%2Fa.example%2F");
        assert!(proxy.is_none());
    }

    #[test]
    fn test_route_proxy_keeps_target() {
        let driver = HttpVisitDriver::new();
        let identity = Identity::Proxy(ProxyEndpoint::new("127.0.0.1", 3128));
        let (_, url, proxy) = driver
            .route("https://a.example/", &identity)
            .expect("proxy route");
        assert_eq!(url, "https://a.example/");
        assert_eq!(proxy.as_deref(), Some("http://127.0.0.1:3128"));
    }

    #[test]
    fn test_route_tunnel_without_proxy_is_direct() {
        let driver = HttpVisitDriver::new();
        let identity = Identity::Tunnel(TunnelEndpoint::named("Germany"));
        let (_, _, proxy) = driver
            .route("https://a.example/", &identity)
            .expect("tunnel route");
        assert!(proxy.is_none());
    }
}
