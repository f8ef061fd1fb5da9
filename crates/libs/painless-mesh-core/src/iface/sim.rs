//! In-memory doubles for [`super::wifi`], [`super::net_ext`], and
//! [`super::fs`], used by integration tests that exercise the bridge
//! election, gateway retry, and offline-queue persistence scenarios
//! without a real radio, resolver, or disk.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;

use super::fs::FileStore;
use super::net_ext::{DnsResolver, HttpClient, HttpRequest, HttpResponse};
use super::wifi::{AccessPoint, StationStatus, WifiDriver, WifiMode};

#[derive(Debug, Default)]
struct SimWifiState {
    mode: Option<WifiMode>,
    status: StationStatus,
    rssi: i8,
    channel: u8,
    local_ip: Option<Ipv4Addr>,
    networks: Vec<AccessPoint>,
}

impl Default for StationStatus {
    fn default() -> Self {
        StationStatus::Idle
    }
}

/// A scriptable [`WifiDriver`]: tests seed `networks`/`rssi`/`status` up
/// front and assert on the calls the code under test made.
#[derive(Default)]
pub struct SimWifi {
    state: Mutex<SimWifiState>,
}

impl SimWifi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_networks(&self, networks: Vec<AccessPoint>) {
        self.state.lock().expect("sim wifi lock poisoned").networks = networks;
    }

    pub fn set_status(&self, status: StationStatus) {
        self.state.lock().expect("sim wifi lock poisoned").status = status;
    }

    pub fn set_rssi(&self, rssi: i8) {
        self.state.lock().expect("sim wifi lock poisoned").rssi = rssi;
    }

    pub fn set_local_ip(&self, ip: Option<Ipv4Addr>) {
        self.state.lock().expect("sim wifi lock poisoned").local_ip = ip;
    }
}

#[async_trait]
impl WifiDriver for SimWifi {
    async fn set_mode(&self, mode: WifiMode) {
        self.state.lock().expect("sim wifi lock poisoned").mode = Some(mode);
    }

    async fn soft_ap_start(
        &self,
        _ssid: &str,
        _password: &str,
        channel: u8,
        _hidden: bool,
        _max_conn: u8,
    ) -> std::io::Result<()> {
        self.state.lock().expect("sim wifi lock poisoned").channel = channel;
        Ok(())
    }

    async fn soft_ap_stop(&self) {}

    async fn station_begin(&self, _ssid: &str, _password: &str, channel: u8) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("sim wifi lock poisoned");
        state.channel = channel;
        state.status = StationStatus::Connecting;
        Ok(())
    }

    async fn station_status(&self) -> StationStatus {
        self.state.lock().expect("sim wifi lock poisoned").status
    }

    async fn scan_networks(&self, _passive: bool, _hidden: bool, _channel: u8) -> Vec<AccessPoint> {
        self.state.lock().expect("sim wifi lock poisoned").networks.clone()
    }

    async fn local_ip(&self) -> Option<Ipv4Addr> {
        self.state.lock().expect("sim wifi lock poisoned").local_ip
    }

    async fn rssi(&self) -> i8 {
        self.state.lock().expect("sim wifi lock poisoned").rssi
    }

    async fn channel(&self) -> u8 {
        self.state.lock().expect("sim wifi lock poisoned").channel
    }

    async fn disconnect(&self, _persist: bool) {
        self.state.lock().expect("sim wifi lock poisoned").status = StationStatus::Disconnected;
    }
}

/// [`DnsResolver`] backed by a fixed host->address map. A host absent from
/// the map resolves to an empty vec (NXDOMAIN), not an error.
#[derive(Default)]
pub struct SimDns {
    records: Mutex<HashMap<String, Vec<Ipv4Addr>>>,
    /// When set, `resolve` fails with this error regardless of `records`
    /// — used to simulate "no route to any resolver".
    pub force_error: Mutex<Option<std::io::ErrorKind>>,
}

impl SimDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: &str, addrs: Vec<Ipv4Addr>) {
        self.records.lock().expect("sim dns lock poisoned").insert(host.to_string(), addrs);
    }
}

#[async_trait]
impl DnsResolver for SimDns {
    async fn resolve(&self, host: &str) -> std::io::Result<Vec<Ipv4Addr>> {
        if let Some(kind) = *self.force_error.lock().expect("sim dns lock poisoned") {
            return Err(std::io::Error::from(kind));
        }
        Ok(self.records.lock().expect("sim dns lock poisoned").get(host).cloned().unwrap_or_default())
    }
}

/// [`HttpClient`] double driven by a queue of canned responses, consumed
/// in order, one per `send` call. Exhausting the queue panics — tests
/// should script exactly as many responses as requests they expect.
#[derive(Default)]
pub struct SimHttp {
    responses: Mutex<std::collections::VecDeque<std::io::Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl SimHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.responses.lock().expect("sim http lock poisoned").push_back(Ok(response));
    }

    pub fn push_error(&self, kind: std::io::ErrorKind) {
        self.responses
            .lock()
            .expect("sim http lock poisoned")
            .push_back(Err(std::io::Error::from(kind)));
    }

    pub fn requests_sent(&self) -> usize {
        self.requests.lock().expect("sim http lock poisoned").len()
    }
}

#[async_trait]
impl HttpClient for SimHttp {
    async fn send(&self, request: HttpRequest) -> std::io::Result<HttpResponse> {
        self.requests.lock().expect("sim http lock poisoned").push(request);
        self.responses
            .lock()
            .expect("sim http lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse { status: 200, body: Vec::new() }))
    }
}

/// In-memory [`FileStore`] double for offline-queue persistence tests.
#[derive(Default)]
pub struct SimFileStore {
    contents: Mutex<Option<Vec<u8>>>,
}

impl SimFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for SimFileStore {
    async fn write_all(&self, contents: &[u8]) -> std::io::Result<()> {
        *self.contents.lock().expect("sim file store lock poisoned") = Some(contents.to_vec());
        Ok(())
    }

    async fn read_all(&self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.contents.lock().expect("sim file store lock poisoned").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_dns_returns_empty_for_unknown_host() {
        let dns = SimDns::new();
        assert_eq!(dns.resolve("unknown.example").await.unwrap(), Vec::<Ipv4Addr>::new());
    }

    #[tokio::test]
    async fn sim_http_serves_queued_responses_in_order() {
        let http = SimHttp::new();
        http.push_response(HttpResponse { status: 503, body: vec![] });
        http.push_response(HttpResponse { status: 200, body: b"ok".to_vec() });

        let req = HttpRequest {
            method: super::super::net_ext::HttpMethod::Post,
            url: "http://gateway.example/ingest".into(),
            body: vec![],
            content_type: None,
        };
        let first = http.send(req.clone()).await.unwrap();
        let second = http.send(req).await.unwrap();
        assert_eq!(first.status, 503);
        assert_eq!(second.status, 200);
        assert_eq!(http.requests_sent(), 2);
    }
}
