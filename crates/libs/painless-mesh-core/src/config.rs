//! Every tunable named across spec §4-§5, collected in one place so none
//! of it is a magic number scattered through the modules that use it.
//! Mirrors the builder style of the teacher crate's `TransportConfig`:
//! a `Default` plus `set_*` methods for incremental construction.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Default TCP port for the mesh listener (spec §6).
    pub port: u16,

    /// No data from a peer for this long closes the connection (spec §4.F).
    pub node_timeout: Duration,
    /// Node-sync broadcast period, absent topology changes (spec §4.H).
    pub node_sync_interval: Duration,
    /// Time-sync exchange period with each direct neighbor (spec §4.I).
    pub time_sync_interval: Duration,

    /// Deferred-deletion spacing (spec §4.F / §5).
    pub base_cleanup_delay: Duration,
    pub deletion_spacing: Duration,

    /// Station/scan state machine (spec §4.J).
    pub scan_interval: Duration,
    pub empty_scan_threshold: u32,
    pub channel_resync_settle_delay: Duration,
    pub channel_resync_stabilize_delay: Duration,
    pub reconnect_backoff_base: Duration,
    pub reconnect_backoff_cap: Duration,
    pub reconnect_attempt_cap: u32,

    /// Bridge manager (spec §4.L).
    pub bridge_status_interval: Duration,
    pub bridge_timeout: Duration,
    pub election_startup_delay: Duration,
    pub election_timeout: Duration,
    pub min_bridge_rssi: i8,
    pub min_role_change_interval: Duration,
    pub election_defer_empty_scan_threshold: u32,

    /// Gateway (spec §4.M).
    pub gateway_http_timeout: Duration,
    pub gateway_max_retries: u8,
    pub gateway_retry_base_delay: Duration,

    /// Offline queue (spec §4.N).
    pub offline_queue_max_size: usize,
    pub offline_queue_normal_max_age: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            port: 5555,

            node_timeout: Duration::from_secs(10),
            node_sync_interval: Duration::from_secs(60),
            time_sync_interval: Duration::from_secs(60),

            base_cleanup_delay: Duration::from_millis(1000),
            deletion_spacing: Duration::from_millis(1000),

            scan_interval: Duration::from_secs(30),
            empty_scan_threshold: 6,
            channel_resync_settle_delay: Duration::from_millis(200),
            channel_resync_stabilize_delay: Duration::from_millis(100),
            reconnect_backoff_base: Duration::from_secs(1),
            reconnect_backoff_cap: Duration::from_secs(16),
            reconnect_attempt_cap: 6,

            bridge_status_interval: Duration::from_secs(30),
            bridge_timeout: Duration::from_secs(60),
            election_startup_delay: Duration::from_secs(60),
            election_timeout: Duration::from_secs(5),
            min_bridge_rssi: -80,
            min_role_change_interval: Duration::from_secs(60),
            election_defer_empty_scan_threshold: 3,

            gateway_http_timeout: Duration::from_secs(30),
            gateway_max_retries: 3,
            gateway_retry_base_delay: Duration::from_secs(2),

            offline_queue_max_size: 256,
            offline_queue_normal_max_age: Duration::from_secs(3600),
        }
    }
}

impl MeshConfig {
    pub fn new(port: u16) -> Self {
        MeshConfig { port, ..Default::default() }
    }

    pub fn set_node_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.node_timeout = timeout;
        self
    }

    pub fn set_scan_interval(&mut self, interval: Duration) -> &mut Self {
        self.scan_interval = interval;
        self
    }

    pub fn set_bridge_status_interval(&mut self, interval: Duration) -> &mut Self {
        self.bridge_status_interval = interval;
        self
    }

    pub fn set_gateway_max_retries(&mut self, retries: u8) -> &mut Self {
        self.gateway_max_retries = retries;
        self
    }

    pub fn set_offline_queue_max_size(&mut self, size: usize) -> &mut Self {
        self.offline_queue_max_size = size;
        self
    }

    /// Halved scan interval used while the node has no Established peers
    /// (spec §4.J).
    pub fn scan_interval_no_peers(&self) -> Duration {
        self.scan_interval / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.node_timeout, Duration::from_secs(10));
        assert_eq!(cfg.bridge_timeout, Duration::from_secs(60));
        assert_eq!(cfg.election_timeout, Duration::from_secs(5));
        assert_eq!(cfg.gateway_http_timeout, Duration::from_secs(30));
        assert_eq!(cfg.base_cleanup_delay, Duration::from_millis(1000));
        assert_eq!(cfg.deletion_spacing, Duration::from_millis(1000));
    }

    #[test]
    fn scan_interval_no_peers_is_halved() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.scan_interval_no_peers(), Duration::from_secs(15));
    }
}
