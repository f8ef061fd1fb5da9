//! DNS resolution and HTTP client boundary used by the gateway proxy
//! (spec §4.M). Neither a DNS stub resolver nor an HTTP client ships with
//! `tokio` itself, so — same as the WiFi driver — these stay behind traits
//! the embedder supplies; [`crate::iface::sim`] provides deterministic
//! doubles for the retry-classification tests.

use std::net::Ipv4Addr;

use async_trait::async_trait;

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolves `host`. An `Err` here is an infrastructure failure (no
    /// route to any resolver), distinct from the resolver returning
    /// NXDOMAIN, which is represented as `Ok(vec![])`.
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<Ipv4Addr>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::io::Result<HttpResponse>;
}
