//! HTTP proxy for mesh-originated requests to the internet (spec §4.M).
//!
//! The bridge node receives GATEWAY_DATA envelopes from anywhere in the
//! mesh, relays them out over its WiFi station link as HTTP requests, and
//! replies with GATEWAY_ACK. This module holds the decision logic —
//! reachability preflight, status classification, retry backoff — and is
//! parameterized over [`crate::iface`] traits so it is testable without a
//! real radio or resolver.

use painless_mesh_proto::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::iface::{DnsResolver, HttpClient, HttpMethod, HttpRequest, HttpResponse, WifiDriver};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub request_id: u32,
    pub origin: NodeId,
    pub url: String,
    #[serde(default)]
    pub method: GatewayMethod,
    #[serde(default)]
    pub body: String,
}

impl GatewayRequest {
    /// Builds a request with a randomly chosen `request_id`, so the
    /// originating node can match a later GATEWAY_ACK without keeping a
    /// monotonic counter (painlessMesh nodes have no persistent storage
    /// for one across reboots).
    pub fn new(origin: NodeId, url: impl Into<String>, method: GatewayMethod, body: impl Into<String>) -> Self {
        GatewayRequest { request_id: rand::random(), origin, url: url.into(), method, body: body.into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayMethod {
    #[default]
    Get,
    Post,
}

impl From<GatewayMethod> for HttpMethod {
    fn from(m: GatewayMethod) -> Self {
        match m {
            GatewayMethod::Get => HttpMethod::Get,
            GatewayMethod::Post => HttpMethod::Post,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayAck {
    pub request_id: u32,
    pub status: u16,
    pub body: String,
    pub success: bool,
    pub retryable: bool,
}

/// HTTP statuses the gateway treats as outright success (spec §4.M).
fn is_success(status: u16) -> bool {
    matches!(status, 200 | 201 | 202 | 204)
}

/// Whether a failed attempt at `status` (or the absence of one, on a
/// transport-level failure) should be retried.
fn is_retryable_status(status: u16) -> bool {
    // 203 is explicitly "non-authoritative" in painlessMesh's gateway and
    // treated as a failure worth retrying, alongside the usual 5xx/429.
    status == 203 || status == 429 || (500..600).contains(&status)
}

pub struct Gateway<W, D, H> {
    wifi: W,
    dns: D,
    http: H,
}

impl<W, D, H> Gateway<W, D, H>
where
    W: WifiDriver,
    D: DnsResolver,
    H: HttpClient,
{
    pub fn new(wifi: W, dns: D, http: H) -> Self {
        Gateway { wifi, dns, http }
    }

    /// Verifies the station link is actually usable before attempting the
    /// request (spec §4.M: "WiFi and DNS reachability are verified before
    /// each HTTP attempt"). Returns the host extracted from `request.url`.
    async fn preflight(&self, request: &GatewayRequest) -> Result<String, MeshError> {
        if self.wifi.local_ip().await.is_none() {
            return Err(MeshError::Infrastructure(MeshError::GATEWAY_WIFI_DOWN.to_string()));
        }

        let host = extract_host(&request.url)
            .ok_or_else(|| MeshError::Protocol(format!("unparseable gateway URL: {}", request.url)))?;

        match self.dns.resolve(&host).await {
            Ok(addrs) if !addrs.is_empty() => Ok(host),
            Ok(_) | Err(_) => {
                Err(MeshError::Infrastructure(MeshError::GATEWAY_NO_INTERNET.to_string()))
            }
        }
    }

    /// Performs a single HTTP attempt for `request` and returns the
    /// resulting [`GatewayAck`]. Retrying a failed attempt is the
    /// requester's job, not the bridge's: the bridge reports
    /// `success`/`retryable` and the originating node decides whether and
    /// when to resend the GATEWAY_DATA envelope (spec §4.M).
    pub async fn handle_request(&self, request: GatewayRequest) -> GatewayAck {
        let host = match self.preflight(&request).await {
            Ok(host) => host,
            Err(e) => {
                return GatewayAck {
                    request_id: request.request_id,
                    status: 0,
                    body: e.to_string(),
                    success: false,
                    retryable: e.is_retryable(),
                };
            }
        };
        let _ = host; // resolved only to confirm reachability; URL carries the path

        let http_request = HttpRequest {
            method: request.method.into(),
            url: request.url.clone(),
            body: request.body.clone().into_bytes(),
            content_type: Some("application/json".to_string()),
        };

        match self.http.send(http_request).await {
            Ok(HttpResponse { status, body }) => GatewayAck {
                request_id: request.request_id,
                status,
                body: String::from_utf8_lossy(&body).to_string(),
                success: is_success(status),
                retryable: is_retryable_status(status),
            },
            Err(e) => GatewayAck {
                request_id: request.request_id,
                status: 0,
                body: e.to_string(),
                success: false,
                retryable: true,
            },
        }
    }
}

impl std::fmt::Display for GatewayMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayMethod::Get => write!(f, "GET"),
            GatewayMethod::Post => write!(f, "POST"),
        }
    }
}

/// Minimal `scheme://host[:port][/path]` host extraction — no dependency
/// on a URL-parsing crate the teacher does not already carry.
fn extract_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host_port = rest.split('/').next()?;
    let host = host_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::sim::{SimDns, SimHttp, SimWifi};
    use std::net::Ipv4Addr;

    #[test]
    fn extract_host_handles_scheme_port_and_path() {
        assert_eq!(extract_host("http://example.com/ingest"), Some("example.com".to_string()));
        assert_eq!(extract_host("https://example.com:8443/a/b"), Some("example.com".to_string()));
    }

    fn connected_wifi() -> SimWifi {
        let wifi = SimWifi::new();
        wifi.set_local_ip(Some(Ipv4Addr::new(192, 168, 4, 2)));
        wifi
    }

    fn req(id: u32, url: &str, method: GatewayMethod) -> GatewayRequest {
        GatewayRequest { request_id: id, origin: NodeId(9), url: url.to_string(), method, body: String::new() }
    }

    #[tokio::test]
    async fn fails_infrastructure_when_wifi_is_down() {
        let wifi = SimWifi::new(); // local_ip stays None
        let dns = SimDns::new();
        dns.insert("example.com", vec![Ipv4Addr::new(93, 184, 216, 34)]);
        let http = SimHttp::new();
        http.push_response(HttpResponse { status: 200, body: b"ok".to_vec() });

        let gw = Gateway::new(wifi, dns, http);
        let ack = gw.handle_request(req(1, "http://example.com/ingest", GatewayMethod::Get)).await;
        assert_eq!(ack.status, 0);
        assert!(!ack.success);
        assert!(ack.body.contains("Gateway WiFi not connected"));
        assert_eq!(gw.http.requests_sent(), 0);
    }

    #[tokio::test]
    async fn fails_infrastructure_when_dns_has_no_records() {
        let wifi = connected_wifi();
        let dns = SimDns::new(); // no record inserted
        let http = SimHttp::new();

        let gw = Gateway::new(wifi, dns, http);
        let ack = gw.handle_request(req(2, "http://unreachable.example/ingest", GatewayMethod::Get)).await;
        assert_eq!(ack.status, 0);
        assert!(!ack.success);
        assert!(ack.body.contains("Router has no internet access"));
    }

    #[tokio::test]
    async fn a_successful_response_is_reported_as_success() {
        let wifi = connected_wifi();
        let dns = SimDns::new();
        dns.insert("example.com", vec![Ipv4Addr::new(93, 184, 216, 34)]);
        let http = SimHttp::new();
        http.push_response(HttpResponse { status: 200, body: b"ok".to_vec() });

        let gw = Gateway::new(wifi, dns, http);
        let ack = gw.handle_request(req(3, "http://example.com/ingest", GatewayMethod::Post)).await;
        assert_eq!(ack.status, 200);
        assert_eq!(ack.body, "ok");
        assert!(ack.success);
        assert!(!ack.retryable);
        assert_eq!(gw.http.requests_sent(), 1);
    }

    #[tokio::test]
    async fn a_503_is_reported_as_failed_but_retryable_for_the_requester_to_resend() {
        let wifi = connected_wifi();
        let dns = SimDns::new();
        dns.insert("example.com", vec![Ipv4Addr::new(93, 184, 216, 34)]);
        let http = SimHttp::new();
        http.push_response(HttpResponse { status: 503, body: vec![] });

        let gw = Gateway::new(wifi, dns, http);
        let ack = gw.handle_request(req(4, "http://example.com/ingest", GatewayMethod::Get)).await;
        assert_eq!(ack.status, 503);
        assert!(!ack.success);
        assert!(ack.retryable);
        assert_eq!(gw.http.requests_sent(), 1); // one attempt; retrying is the requester's call
    }

    #[test]
    fn retry_and_success_classification_match_the_gateway_table() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(203));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(is_success(204));
        assert!(!is_success(203));
    }
}
