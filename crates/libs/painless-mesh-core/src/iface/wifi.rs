//! WiFi interface boundary (spec §6, "out of scope" per spec §1 — the
//! underlying driver is an external collaborator). Mirrors the
//! `InterfaceDriver`/`InterfaceDriverFactory` split this teacher crate uses
//! for out-of-tree hardware adapters (`iface::driver`), adapted to the
//! async-trait style `styrene-ipc` uses for its daemon traits.

use std::net::Ipv4Addr;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    AccessPoint,
    Station,
    ApAndStation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub rssi: i8,
    pub channel: u8,
    pub hidden: bool,
}

/// The subset of an ESP-style WiFi stack the mesh core needs: mode
/// switching, AP start/stop, station association, scanning, and basic
/// link introspection. A real implementation wraps vendor SDK calls; tests
/// use [`crate::iface::sim::SimWifi`].
#[async_trait]
pub trait WifiDriver: Send + Sync {
    async fn set_mode(&self, mode: WifiMode);

    async fn soft_ap_start(
        &self,
        ssid: &str,
        password: &str,
        channel: u8,
        hidden: bool,
        max_conn: u8,
    ) -> std::io::Result<()>;

    async fn soft_ap_stop(&self);

    async fn station_begin(&self, ssid: &str, password: &str, channel: u8) -> std::io::Result<()>;

    async fn station_status(&self) -> StationStatus;

    async fn scan_networks(&self, passive: bool, hidden: bool, channel: u8) -> Vec<AccessPoint>;

    async fn local_ip(&self) -> Option<Ipv4Addr>;

    async fn rssi(&self) -> i8;

    async fn channel(&self) -> u8;

    async fn disconnect(&self, persist: bool);
}
