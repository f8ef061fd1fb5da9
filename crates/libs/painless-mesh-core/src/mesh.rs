//! The mesh core orchestrator (spec §4.K): owns the connection arena and
//! ties together routing, time-sync, station scanning, bridging, the
//! offline queue, and the plugin registry behind one public API.
//!
//! Connections are stored in an arena keyed by [`ConnectionId`] and handed
//! to callbacks as a [`ConnectionHandle`], never as an owned
//! [`Connection`] — this avoids the cyclic-ownership trap a callback
//! holding a strong reference back to its own connection would create
//! (spec §9).

use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::Level;
use painless_mesh_proto::{
    CallbackList, LogCategory, MessageType, NodeId, NodeTree, Priority, Routing, SendStats, Variant,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::{BridgeManager, BridgeRole, BridgeStatus};
use crate::clock::MeshClock;
use crate::config::MeshConfig;
use crate::connection::{Connection, ConnectionHandle, ConnectionId, ConnectionState, InboundFrame};
use crate::deletion::DeletionScheduler;
use crate::error::MeshError;
use crate::gateway::{GatewayAck, GatewayRequest};
use crate::offline_queue::OfflineQueue;
use crate::plugin::PluginRegistry;
use crate::router::{ForwardDecision, Router};
use crate::station::{StationScan, StationState};
use crate::time_sync::TimeSyncExchange;
use painless_mesh_proto::mesh_log;

type ConnectionHook = Box<dyn Fn(&ConnectionHandle) + Send + Sync>;
type TimeAdjustedHook = Box<dyn Fn(i64) + Send + Sync>;

/// A registered handler for bridge-side GATEWAY_DATA dispatch: performs the
/// actual HTTP round trip (outside this crate's scope, spec §6) and
/// resolves to the [`GatewayAck`] to send back to the requester.
type GatewayHandler = dyn Fn(GatewayRequest) -> Pin<Box<dyn Future<Output = GatewayAck> + Send>> + Send + Sync;

/// A GATEWAY_DATA envelope this node originated and is waiting on an ack
/// for, kept so a retryable failure can be resent (spec §4.M — retrying is
/// the requester's job, not the bridge's).
struct PendingGatewayRequest {
    request: GatewayRequest,
    bridge: NodeId,
    attempts: u8,
}

/// The root orchestrator. Construct with [`Mesh::new`], feed it sockets
/// via [`Mesh::accept_stream`]/[`Mesh::connect_stream`] or the
/// `tcp`-suffixed convenience wrappers, and drive its background work with
/// [`Mesh::run`].
pub struct Mesh {
    node_id: NodeId,
    is_root: bool,
    config: MeshConfig,
    clock: Arc<MeshClock>,

    connections: Mutex<HashMap<ConnectionId, Connection>>,
    next_connection_id: AtomicU64,

    router: Mutex<Router>,
    bridge: Mutex<BridgeManager>,
    station: Mutex<StationScan>,
    offline_queue: Mutex<OfflineQueue>,
    plugins: Mutex<PluginRegistry>,
    deletion: DeletionScheduler,
    time_sync: Mutex<HashMap<NodeId, TimeSyncExchange>>,
    last_time_sync_millis: AtomicU64,
    send_stats: Mutex<SendStats>,
    last_known_rssi: AtomicI8,

    router_channel: AtomicU8,
    internet_connected: AtomicBool,
    gateway_ip: Mutex<Option<Ipv4Addr>>,
    gateway_handler: Mutex<Option<Arc<GatewayHandler>>>,
    gateway_pending: Mutex<HashMap<u32, PendingGatewayRequest>>,

    callbacks: Mutex<CallbackList<ConnectionHandle>>,
    on_new_connection: Mutex<Vec<ConnectionHook>>,
    on_dropped_connection: Mutex<Vec<ConnectionHook>>,
    on_node_time_adjusted: Mutex<Vec<TimeAdjustedHook>>,
    loopback_handle: ConnectionHandle,

    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
    close_tx: mpsc::UnboundedSender<ConnectionId>,
    close_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionId>>>,
    cancel: CancellationToken,
}

impl Mesh {
    pub fn new(node_id: NodeId, config: MeshConfig) -> Arc<Mesh> {
        Self::init(node_id, config, false)
    }

    pub fn new_as_bridge(node_id: NodeId, config: MeshConfig) -> Arc<Mesh> {
        Self::init(node_id, config, true)
    }

    fn init(node_id: NodeId, config: MeshConfig, is_root: bool) -> Arc<Mesh> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let mut bridge = BridgeManager::new();
        if is_root {
            bridge.set_role(BridgeRole::Bridge, 0);
        }
        mesh_log!(LogCategory::Startup, Level::Info, "mesh node {node_id} starting (root={is_root})");

        Arc::new(Mesh {
            node_id,
            is_root,
            config,
            clock: Arc::new(MeshClock::new()),
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            router: Mutex::new(Router::new()),
            bridge: Mutex::new(bridge),
            station: Mutex::new(StationScan::new()),
            offline_queue: Mutex::new(OfflineQueue::new(
                config.offline_queue_max_size,
                config.offline_queue_normal_max_age,
            )),
            plugins: Mutex::new(PluginRegistry::new()),
            deletion: DeletionScheduler::new(),
            time_sync: Mutex::new(HashMap::new()),
            last_time_sync_millis: AtomicU64::new(0),
            send_stats: Mutex::new(SendStats::default()),
            last_known_rssi: AtomicI8::new(0),
            router_channel: AtomicU8::new(0),
            internet_connected: AtomicBool::new(false),
            gateway_ip: Mutex::new(None),
            gateway_handler: Mutex::new(None),
            gateway_pending: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(CallbackList::new()),
            on_new_connection: Mutex::new(Vec::new()),
            on_dropped_connection: Mutex::new(Vec::new()),
            on_node_time_adjusted: Mutex::new(Vec::new()),
            loopback_handle: ConnectionHandle::loopback(ConnectionId(0)),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            close_tx,
            close_rx: Mutex::new(Some(close_rx)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn get_node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn is_bridge(&self) -> bool {
        self.bridge.lock().expect("bridge lock poisoned").role() == BridgeRole::Bridge
    }

    pub fn get_node_time(&self) -> u64 {
        self.clock.now_mesh_millis()
    }

    /// This node's view of the whole mesh, rooted at itself.
    pub fn as_node_tree(&self) -> NodeTree {
        self.router.lock().expect("router lock poisoned").local_tree(self.node_id, self.is_root)
    }

    /// Every node id reachable from this one, including itself.
    pub fn get_node_list(&self) -> Vec<NodeId> {
        let tree = self.as_node_tree();
        let mut out = Vec::with_capacity(tree.size());
        fn collect(tree: &NodeTree, out: &mut Vec<NodeId>) {
            out.push(tree.node_id);
            for child in &tree.subs {
                collect(child, out);
            }
        }
        collect(&tree, &mut out);
        out
    }

    pub fn get_hop_count(&self, dest: NodeId) -> u8 {
        self.router.lock().expect("router lock poisoned").hop_count_to(self.node_id, dest)
    }

    pub fn get_path_to_node(&self, dest: NodeId) -> Vec<NodeId> {
        self.router.lock().expect("router lock poisoned").path_to(self.node_id, dest)
    }

    pub fn get_routing_table(&self) -> HashMap<NodeId, ConnectionId> {
        self.router.lock().expect("router lock poisoned").routing_table()
    }

    pub fn send_stats(&self) -> SendStats {
        *self.send_stats.lock().expect("send stats lock poisoned")
    }

    /// Updates the station RSSI this node reports in its own
    /// [`BridgeStatus`] broadcasts; fed by whatever owns the
    /// [`crate::iface::WifiDriver`] (outside this crate's scope, spec §6).
    pub fn set_station_rssi(&self, rssi: i8) {
        self.last_known_rssi.store(rssi, Ordering::Relaxed);
    }

    pub fn set_router_channel(&self, channel: u8) {
        self.router_channel.store(channel, Ordering::Relaxed);
    }

    pub fn set_internet_connected(&self, connected: bool) {
        self.internet_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_gateway_ip(&self, ip: Option<Ipv4Addr>) {
        *self.gateway_ip.lock().expect("gateway ip lock poisoned") = ip;
    }

    /// This node's own current [`BridgeStatus`], as broadcast in
    /// BRIDGE_STATUS/BRIDGE_ELECTION/BRIDGE_TAKEOVER envelopes.
    fn bridge_self_status(&self, now_millis: u64) -> BridgeStatus {
        BridgeStatus {
            node_id: self.node_id,
            rssi: self.last_known_rssi.load(Ordering::Relaxed),
            uptime_millis: now_millis,
            free_memory_bytes: 0,
            internet_connected: self.internet_connected.load(Ordering::Relaxed),
            router_channel: self.router_channel.load(Ordering::Relaxed),
            gateway_ip: *self.gateway_ip.lock().expect("gateway ip lock poisoned"),
        }
    }

    /// Every bridge candidate this node currently knows about (spec
    /// §4.L's `getBridges`).
    pub fn get_bridges(&self) -> Vec<crate::bridge::BridgeInfo> {
        self.bridge.lock().expect("bridge lock poisoned").get_bridges().to_vec()
    }

    /// The node that would currently win a bridge election, if one ran
    /// right now (spec §4.L's `getPrimaryBridge`).
    pub fn get_primary_bridge(&self) -> Option<BridgeStatus> {
        let now = self.clock.now_mesh_millis();
        let self_status = self.bridge_self_status(now);
        self.bridge.lock().expect("bridge lock poisoned").get_primary_bridge(&self_status, self.config.min_bridge_rssi)
    }

    /// Registers a peer's time-sync exchange in progress, for the
    /// component driving the TIME_SYNC request/reply handshake to update
    /// as replies arrive.
    pub fn begin_time_sync(&self, peer: NodeId, t0_millis: u64) {
        let mut exchange = TimeSyncExchange::new(peer);
        exchange.request_sent(t0_millis);
        self.time_sync.lock().expect("time sync lock poisoned").insert(peer, exchange);
    }

    /// Completes a time-sync exchange with `peer` using the responder's
    /// round-trip timestamps, applying the resulting offset to this
    /// node's [`MeshClock`] and notifying `on_node_time_adjusted` hooks.
    pub fn complete_time_sync(&self, peer: NodeId, t1: u64, t2: u64, t3: u64) {
        let result = {
            let mut table = self.time_sync.lock().expect("time sync lock poisoned");
            table.get_mut(&peer).and_then(|ex| ex.reply_received(t1, t2, t3))
        };
        if let Some(result) = result {
            self.clock.apply_offset(result.offset_millis);
            for hook in self.on_node_time_adjusted.lock().expect("hooks lock poisoned").iter() {
                hook(result.offset_millis);
            }
        }
    }

    /// Sends a TIME_SYNC request to every directly-connected neighbor
    /// (spec §4.I — time sync is single-hop, same as node-sync).
    fn begin_time_sync_with_all_neighbors(self: &Arc<Self>, now: u64) {
        let neighbor_ids: Vec<NodeId> = self.router.lock().expect("router lock poisoned").neighbor_ids().collect();
        for neighbor in neighbor_ids {
            self.begin_time_sync(neighbor, now);
            self.send(MessageType::TIME_SYNC, neighbor, Routing::Neighbor, serde_json::json!({}), Priority::High);
        }
    }

    /// Direct access to the station scan state machine, for the component
    /// driving actual WiFi scans (outside this crate's scope, spec §6) to
    /// feed results into and read decisions back from.
    pub fn station(&self) -> &Mutex<StationScan> {
        &self.station
    }

    pub fn plugins(&self) -> &Mutex<PluginRegistry> {
        &self.plugins
    }

    pub fn offline_queue(&self) -> &Mutex<OfflineQueue> {
        &self.offline_queue
    }

    pub fn bridge_manager(&self) -> &Mutex<BridgeManager> {
        &self.bridge
    }

    // --- callback registration -------------------------------------------------

    pub fn on_receive<F>(&self, msg_type: MessageType, handler: F)
    where
        F: Fn(&Variant, &ConnectionHandle, u64) -> bool + Send + Sync + 'static,
    {
        self.callbacks.lock().expect("callbacks lock poisoned").on_package(msg_type, handler);
    }

    pub fn on_new_connection<F>(&self, hook: F)
    where
        F: Fn(&ConnectionHandle) + Send + Sync + 'static,
    {
        self.on_new_connection.lock().expect("hooks lock poisoned").push(Box::new(hook));
    }

    pub fn on_dropped_connection<F>(&self, hook: F)
    where
        F: Fn(&ConnectionHandle) + Send + Sync + 'static,
    {
        self.on_dropped_connection.lock().expect("hooks lock poisoned").push(Box::new(hook));
    }

    pub fn on_node_time_adjusted<F>(&self, hook: F)
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.on_node_time_adjusted.lock().expect("hooks lock poisoned").push(Box::new(hook));
    }

    /// Registers the handler that performs the actual HTTP round trip for
    /// GATEWAY_DATA envelopes addressed to this node (spec §4.M). Without
    /// one registered, this node silently can't act as a bridge even if
    /// elected — the embedding application owns the real WiFi/HTTP stack.
    pub fn on_gateway_request<F, Fut>(&self, handler: F)
    where
        F: Fn(GatewayRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayAck> + Send + 'static,
    {
        let boxed = move |request: GatewayRequest| -> Pin<Box<dyn Future<Output = GatewayAck> + Send>> {
            Box::pin(handler(request))
        };
        *self.gateway_handler.lock().expect("gateway handler lock poisoned") = Some(Arc::new(boxed));
    }

    // --- connection lifecycle ---------------------------------------------------

    /// Accepts an already-connected generic stream as a new peer link.
    pub fn accept_stream<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let clock = self.clock.clone();
        let conn = Connection::spawn(
            id,
            stream,
            move || clock.now_mesh_millis(),
            self.config.node_timeout,
            16 * 1024,
            self.inbound_tx.clone(),
            self.close_tx.clone(),
            &self.cancel,
        );
        let handle = conn.handle.clone();
        self.connections.lock().expect("connections lock poisoned").insert(id, conn);

        // NEIGHBOR routing can only reach a peer whose subtree the router
        // already knows, which node-sync traffic itself is what provides —
        // push the handshake directly onto this one connection rather than
        // through the router, which doesn't know this peer yet (spec §4.H).
        let tree = self.as_node_tree().serialize();
        let initial = Variant::new(MessageType::NODE_SYNC_REQUEST, self.node_id, NodeId::NONE, Routing::Neighbor, tree);
        handle.add_message(initial.to_json_string().into_bytes(), Priority::High);

        for hook in self.on_new_connection.lock().expect("hooks lock poisoned").iter() {
            hook(&handle);
        }
    }

    /// Binds `addr` and accepts incoming TCP connections until `stop()` is
    /// called. Intended to run as its own background task alongside
    /// [`Mesh::run`].
    pub async fn listen_tcp(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        mesh_log!(LogCategory::Startup, Level::Info, "listening on {addr}");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    mesh_log!(LogCategory::Connection, Level::Info, "accepted connection from {peer}");
                    self.accept_stream(stream);
                }
            }
        }
    }

    pub async fn connect_tcp(self: &Arc<Self>, addr: SocketAddr) -> Result<(), MeshError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MeshError::Transport { peer: None, message: e.to_string() })?;
        self.accept_stream(stream);
        Ok(())
    }

    fn drop_connection(self: &Arc<Self>, id: ConnectionId) {
        let removed = self.connections.lock().expect("connections lock poisoned").remove(&id);
        if let Some(conn) = removed {
            self.router.lock().expect("router lock poisoned").remove_subtree(id);
            for hook in self.on_dropped_connection.lock().expect("hooks lock poisoned").iter() {
                hook(&conn.handle);
            }
        }
    }

    /// Requests that `id` close, but not immediately: the actual close is
    /// staggered by [`DeletionScheduler`] so several connections dropping
    /// at once don't fire every `on_dropped_connection` hook in the same
    /// tick (spec §4.F/§5). Driven either by a connection's own I/O task
    /// reporting a self-detected failure on `close_tx`, or by
    /// [`Mesh::run`]'s periodic tick.
    pub fn request_deferred_close(self: &Arc<Self>, id: ConnectionId) {
        let now = self.clock.now_mesh_millis();
        let delay = self.deletion.schedule(now, self.config.base_cleanup_delay, self.config.deletion_spacing);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.deletion.record_executed(this.clock.now_mesh_millis());
            if let Some(conn) = this.connections.lock().expect("connections lock poisoned").get(&id) {
                conn.handle.mark_closed();
            }
        });
    }

    /// Sweeps the connection arena for sockets whose I/O task has already
    /// exited, removing them and firing `on_dropped_connection`.
    fn reap_closed_connections(self: &Arc<Self>) {
        let closed: Vec<ConnectionId> = self
            .connections
            .lock()
            .expect("connections lock poisoned")
            .iter()
            .filter(|(_, conn)| conn.handle.state() == ConnectionState::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            self.drop_connection(id);
        }
    }

    fn has_active_mesh_connections(&self) -> bool {
        self.connections
            .lock()
            .expect("connections lock poisoned")
            .values()
            .any(|c| !matches!(c.handle.state(), ConnectionState::Closed | ConnectionState::Closing))
    }

    // --- sending ------------------------------------------------------------

    /// Broadcasts `payload`. If `include_self` is set, this node's own
    /// `on_receive` handlers for `msg_type` also fire, as if the broadcast
    /// had arrived over the wire (spec §4.K) — painlessMesh's
    /// `sendBroadcast(msg, includeThis)`.
    pub fn send_broadcast(
        self: &Arc<Self>,
        msg_type: MessageType,
        payload: serde_json::Value,
        priority: Priority,
        include_self: bool,
    ) {
        let variant = Variant::new(msg_type, self.node_id, NodeId::NONE, Routing::Broadcast, payload);
        if include_self {
            let now = self.clock.now_mesh_millis();
            self.dispatch_locally(&variant, now);
        }
        let decision = self.router.lock().expect("router lock poisoned").decide(NodeId::NONE, Routing::Broadcast);
        self.dispatch_forward(decision, &variant, priority);
    }

    fn dispatch_locally(self: &Arc<Self>, variant: &Variant, received_at_millis: u64) {
        self.callbacks.lock().expect("callbacks lock poisoned").dispatch(variant, &self.loopback_handle, received_at_millis);
    }

    pub fn send_single(
        self: &Arc<Self>,
        dest: NodeId,
        msg_type: MessageType,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<(), MeshError> {
        let variant = Variant::new(msg_type, self.node_id, dest, Routing::Single, payload);
        let decision = self.router.lock().expect("router lock poisoned").decide(dest, Routing::Single);
        match decision {
            ForwardDecision::Unreachable => Err(MeshError::Routing(dest)),
            other => {
                self.dispatch_forward(other, &variant, priority);
                Ok(())
            }
        }
    }

    /// Sends a user/plugin message using whatever routing the plugin
    /// registry resolves for `msg_type` — an explicitly registered
    /// default, the message type's own built-in default, or
    /// `Routing::Single` (spec §4.O). Use [`Mesh::send_single`]/
    /// [`Mesh::send_broadcast`] instead when the caller wants to pick the
    /// routing mode itself rather than defer to a registered plugin.
    pub fn send_plugin_message(
        self: &Arc<Self>,
        msg_type: MessageType,
        dest: NodeId,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<(), MeshError> {
        let routing = self.plugins.lock().expect("plugins lock poisoned").resolve_routing(msg_type);
        let variant = Variant::new(msg_type, self.node_id, dest, routing, payload);
        let decision = self.router.lock().expect("router lock poisoned").decide(dest, routing);
        match decision {
            ForwardDecision::Unreachable => Err(MeshError::Routing(dest)),
            other => {
                self.dispatch_forward(other, &variant, priority);
                Ok(())
            }
        }
    }

    fn send(self: &Arc<Self>, msg_type: MessageType, dest: NodeId, routing: Routing, payload: serde_json::Value, priority: Priority) {
        let variant = Variant::new(msg_type, self.node_id, dest, routing, payload);
        let decision = self.router.lock().expect("router lock poisoned").decide(dest, routing);
        self.dispatch_forward(decision, &variant, priority);
    }

    fn dispatch_forward(self: &Arc<Self>, decision: ForwardDecision, variant: &Variant, priority: Priority) {
        let bytes = variant.to_json_string().into_bytes();
        let connections = self.connections.lock().expect("connections lock poisoned");
        match decision {
            ForwardDecision::One(id) => {
                if let Some(conn) = connections.get(&id) {
                    conn.handle.add_message(bytes, priority);
                    self.send_stats.lock().expect("send stats lock poisoned").record_queued(priority);
                }
            }
            ForwardDecision::All => {
                for conn in connections.values() {
                    conn.handle.add_message(bytes.clone(), priority);
                }
                self.send_stats.lock().expect("send stats lock poisoned").record_queued(priority);
            }
            ForwardDecision::Unreachable => {
                mesh_log!(LogCategory::Error, Level::Warn, "dropped undeliverable {}", variant.msg_type());
            }
        }
    }

    /// Forwards an already-received envelope that wasn't addressed to this
    /// node, re-running routing from the current position (spec §4.H).
    fn forward_received(self: &Arc<Self>, variant: &Variant, from: ConnectionId) {
        let decision = self.router.lock().expect("router lock poisoned").decide(variant.dest, variant.routing);
        let bytes = variant.to_json_string().into_bytes();
        let connections = self.connections.lock().expect("connections lock poisoned");
        match decision {
            ForwardDecision::One(id) if id != from => {
                if let Some(conn) = connections.get(&id) {
                    conn.handle.add_message(bytes, Priority::Normal);
                }
            }
            ForwardDecision::All => {
                for (id, conn) in connections.iter() {
                    if *id != from {
                        conn.handle.add_message(bytes.clone(), Priority::Normal);
                    }
                }
            }
            _ => {}
        }
    }

    // --- bridge election (spec §4.L) -------------------------------------------

    fn start_bridge_election(self: &Arc<Self>, now: u64) {
        let self_status = self.bridge_self_status(now);
        self.bridge.lock().expect("bridge lock poisoned").start_election(now, self_status);
        self.send(
            MessageType::BRIDGE_ELECTION,
            NodeId::NONE,
            Routing::Broadcast,
            serde_json::to_value(self_status).expect("BridgeStatus always serializes"),
            Priority::High,
        );
    }

    fn init_as_bridge(self: &Arc<Self>, now: u64) {
        self.bridge.lock().expect("bridge lock poisoned").set_role(BridgeRole::Bridge, now);
        mesh_log!(LogCategory::General, Level::Info, "node {} took over as bridge", self.node_id);
        self.announce_bridge_takeover(now);
    }

    fn announce_bridge_takeover(self: &Arc<Self>, now: u64) {
        let status = self.bridge_self_status(now);
        self.bridge.lock().expect("bridge lock poisoned").mark_status_broadcast(now);
        self.send(
            MessageType::BRIDGE_TAKEOVER,
            NodeId::NONE,
            Routing::Broadcast,
            serde_json::to_value(status).expect("BridgeStatus always serializes"),
            Priority::High,
        );
    }

    /// Runs one tick of the election state machine for a non-bridge node:
    /// starts an election once `election_startup_delay` has passed with no
    /// known bridge, or resolves one that is already collecting replies
    /// once `election_timeout` elapses (spec §4.L).
    fn run_bridge_election_tick(self: &Arc<Self>, now: u64) {
        let should_start = {
            let bridge = self.bridge.lock().expect("bridge lock poisoned");
            !bridge.election_in_progress()
                && now >= self.config.election_startup_delay.as_millis() as u64
                && bridge.known_bridge_count() == 0
                && bridge.can_change_role(now, self.config.min_role_change_interval)
        };
        if should_start {
            self.start_bridge_election(now);
            return;
        }

        let due = self.bridge.lock().expect("bridge lock poisoned").election_due(now, self.config.election_timeout);
        if due {
            let winner = self.bridge.lock().expect("bridge lock poisoned").finish_election(self.config.min_bridge_rssi);
            if let Some(winner) = winner {
                if winner.node_id == self.node_id {
                    self.init_as_bridge(now);
                }
            }
        }
    }

    /// Reacts to a just-observed topology change (spec §4.L: bridge status
    /// should announce on topology change once routing is stable; a
    /// non-bridge node reconsiders whether an election is due).
    fn notify_topology_changed(self: &Arc<Self>, now: u64) {
        if self.is_bridge() {
            let empty_scans = self.station.lock().expect("station lock poisoned").consecutive_empty_scans();
            let should_announce = self
                .bridge
                .lock()
                .expect("bridge lock poisoned")
                .should_announce_on_topology_change(empty_scans, self.config.election_defer_empty_scan_threshold);
            if should_announce {
                self.announce_bridge_takeover_as_status(now);
            }
        } else {
            self.run_bridge_election_tick(now);
        }
    }

    fn announce_bridge_takeover_as_status(self: &Arc<Self>, now: u64) {
        let status = self.bridge_self_status(now);
        self.bridge.lock().expect("bridge lock poisoned").mark_status_broadcast(now);
        self.send(
            MessageType::BRIDGE_STATUS,
            NodeId::NONE,
            Routing::Broadcast,
            serde_json::to_value(status).expect("BridgeStatus always serializes"),
            Priority::Normal,
        );
    }

    // --- gateway (spec §4.M) ----------------------------------------------------

    /// Sends `request` to `bridge` as a GATEWAY_DATA envelope, tracking it
    /// so a retryable failure ack can be resent.
    pub fn send_gateway_request(self: &Arc<Self>, bridge: NodeId, request: GatewayRequest) -> Result<(), MeshError> {
        let payload = serde_json::to_value(&request).expect("GatewayRequest always serializes");
        self.gateway_pending
            .lock()
            .expect("gateway pending lock poisoned")
            .insert(request.request_id, PendingGatewayRequest { request, bridge, attempts: 0 });
        self.send_single(bridge, MessageType::GATEWAY_DATA, payload, Priority::Normal)
    }

    /// Runs the registered gateway handler for an inbound GATEWAY_DATA
    /// request addressed to this node, suspending NODE_TIMEOUT on the
    /// connection it arrived on for the duration of the HTTP round trip
    /// (spec §4.M) so a slow upstream response doesn't look like a dead
    /// peer and evict the requester mid-flight.
    fn spawn_gateway_request(self: &Arc<Self>, request: GatewayRequest, connection: ConnectionId) {
        let handler = self.gateway_handler.lock().expect("gateway handler lock poisoned").clone();
        let Some(handler) = handler else {
            mesh_log!(LogCategory::General, Level::Warn, "no gateway handler registered, dropping GATEWAY_DATA");
            return;
        };
        if let Some(handle) = self.connections.lock().expect("connections lock poisoned").get(&connection).map(|c| c.handle.clone()) {
            handle.suspend_timeout();
        }

        let this = self.clone();
        tokio::spawn(async move {
            let origin = request.origin;
            let ack = handler(request).await;
            if let Some(handle) = this.connections.lock().expect("connections lock poisoned").get(&connection).map(|c| c.handle.clone()) {
                handle.resume_timeout();
            }
            this.send(
                MessageType::GATEWAY_ACK,
                origin,
                Routing::Single,
                serde_json::to_value(&ack).expect("GatewayAck always serializes"),
                Priority::High,
            );
        });
    }

    /// Handles a GATEWAY_ACK for a request this node originated: on
    /// success, or a failure the bridge marked non-retryable, the pending
    /// entry is simply dropped; on a retryable failure, resends
    /// GATEWAY_DATA after `gateway_retry_base_delay` backoff, up to
    /// `gateway_max_retries` (spec §4.M).
    fn handle_gateway_ack(self: &Arc<Self>, ack: GatewayAck) {
        let pending = self.gateway_pending.lock().expect("gateway pending lock poisoned").remove(&ack.request_id);
        let Some(mut pending) = pending else {
            return;
        };
        if ack.success || !ack.retryable {
            return;
        }
        if pending.attempts >= self.config.gateway_max_retries {
            mesh_log!(LogCategory::General, Level::Warn, "gateway request {} exhausted retries", ack.request_id);
            return;
        }
        if !self.has_active_mesh_connections() {
            mesh_log!(LogCategory::General, Level::Warn, "gateway request {} dropped, no mesh connections", ack.request_id);
            return;
        }

        pending.attempts += 1;
        let delay = self.config.gateway_retry_base_delay * 2u32.pow((pending.attempts - 1) as u32);
        let request_id = ack.request_id;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let bridge = pending.bridge;
            let payload = serde_json::to_value(&pending.request).expect("GatewayRequest always serializes");
            this.gateway_pending.lock().expect("gateway pending lock poisoned").insert(request_id, pending);
            let _ = this.send_single(bridge, MessageType::GATEWAY_DATA, payload, Priority::Normal);
        });
    }

    // --- periodic tick --------------------------------------------------------

    /// One pass of periodic housekeeping: node-sync resync, time-sync,
    /// bridge status/election, station channel-resync, offline-queue
    /// pruning. Call on an interval, or use [`Mesh::run`] to do this
    /// automatically.
    pub fn update(self: &Arc<Self>) {
        let now = self.clock.now_mesh_millis();

        let resync_due = {
            let router = self.router.lock().expect("router lock poisoned");
            router.resync_due(now, self.config.node_sync_interval)
        };
        if resync_due {
            self.broadcast_node_sync_to_neighbors();
            self.router.lock().expect("router lock poisoned").mark_resynced(now);
        }

        let time_sync_due =
            now.saturating_sub(self.last_time_sync_millis.load(Ordering::Relaxed)) >= self.config.time_sync_interval.as_millis() as u64;
        if time_sync_due {
            self.begin_time_sync_with_all_neighbors(now);
            self.last_time_sync_millis.store(now, Ordering::Relaxed);
        }

        if self.is_bridge() {
            let due = self
                .bridge
                .lock()
                .expect("bridge lock poisoned")
                .status_broadcast_due(now, self.config.bridge_status_interval);
            if due {
                self.announce_bridge_takeover_as_status(now);
            }
        } else {
            self.run_bridge_election_tick(now);
        }

        let evicted = self.bridge.lock().expect("bridge lock poisoned").evict_stale(now, self.config.bridge_timeout);
        for node in evicted {
            mesh_log!(LogCategory::General, Level::Debug, "bridge {:?} timed out", node);
        }

        let empty_scan_resync_due =
            self.station.lock().expect("station lock poisoned").empty_scan_resync_due(self.config.empty_scan_threshold);
        if empty_scan_resync_due {
            let mut station = self.station.lock().expect("station lock poisoned");
            station.set_state(StationState::ChannelResyncing);
            station.reset_empty_scans();
        }

        self.offline_queue.lock().expect("offline queue lock poisoned").prune_stale(now);
        self.reap_closed_connections();
    }

    /// Pushes this node's current subtree to every direct neighbor as a
    /// NODE_SYNC_REQUEST (NEIGHBOR routing is per-connection, spec §4.H —
    /// unlike the old broadcast resync, this never reaches non-adjacent
    /// nodes, each of which resyncs the same way with its own neighbors).
    fn broadcast_node_sync_to_neighbors(self: &Arc<Self>) {
        let tree = self.as_node_tree();
        let payload = tree.serialize();
        let neighbor_ids: Vec<NodeId> = self.router.lock().expect("router lock poisoned").neighbor_ids().collect();
        for neighbor in neighbor_ids {
            self.send(MessageType::NODE_SYNC_REQUEST, neighbor, Routing::Neighbor, payload.clone(), Priority::High);
        }
    }

    /// Drains inbound frames from every connection, dispatching each to
    /// registered `on_receive` handlers and forwarding it onward if it
    /// wasn't addressed to this node. Runs until [`Mesh::stop`] is called.
    pub async fn run(self: &Arc<Self>) {
        let mut rx = self
            .inbound_rx
            .lock()
            .expect("inbound rx lock poisoned")
            .take()
            .expect("Mesh::run called more than once");
        let mut close_rx = self
            .close_rx
            .lock()
            .expect("close rx lock poisoned")
            .take()
            .expect("Mesh::run called more than once");

        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.update(),
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => self.handle_inbound(frame),
                        None => break,
                    }
                }
                closed = close_rx.recv() => {
                    match closed {
                        Some(id) => self.request_deferred_close(id),
                        None => break,
                    }
                }
            }
        }
    }

    fn handle_inbound(self: &Arc<Self>, frame: InboundFrame) {
        let InboundFrame { connection, variant, received_at_millis } = frame;

        if variant.msg_type == MessageType::NODE_SYNC_REQUEST || variant.msg_type == MessageType::NODE_SYNC_REPLY {
            if let Ok(tree) = variant.to::<NodeTree>() {
                let changed = self.router.lock().expect("router lock poisoned").update_subtree(connection, tree.clone());
                if changed {
                    mesh_log!(LogCategory::Sync, Level::Debug, "topology changed via {:?}", connection);
                    self.notify_topology_changed(received_at_millis);
                }
                if variant.msg_type == MessageType::NODE_SYNC_REQUEST {
                    let reply = self.as_node_tree().serialize();
                    self.send(MessageType::NODE_SYNC_REPLY, tree.node_id, Routing::Neighbor, reply, Priority::High);
                }
            }
        }

        if variant.msg_type == MessageType::TIME_SYNC {
            let t1 = received_at_millis;
            let t2 = self.clock.now_mesh_millis();
            self.send(MessageType::TIME_DELAY, variant.from, Routing::Neighbor, serde_json::json!({"t1": t1, "t2": t2}), Priority::High);
        }

        if variant.msg_type == MessageType::TIME_DELAY {
            let t1 = variant.raw().get("t1").and_then(|v| v.as_u64());
            let t2 = variant.raw().get("t2").and_then(|v| v.as_u64());
            if let (Some(t1), Some(t2)) = (t1, t2) {
                self.complete_time_sync(variant.from, t1, t2, received_at_millis);
            }
        }

        if variant.msg_type == MessageType::BRIDGE_STATUS {
            if let Ok(status) = variant.to::<BridgeStatus>() {
                self.bridge.lock().expect("bridge lock poisoned").observe_status(status, received_at_millis);
            }
        }

        if variant.msg_type == MessageType::BRIDGE_ELECTION {
            let status = self.bridge_self_status(received_at_millis);
            self.send(MessageType::BRIDGE_STATUS, NodeId::NONE, Routing::Broadcast, serde_json::to_value(status).expect("BridgeStatus always serializes"), Priority::High);
        }

        if variant.msg_type == MessageType::BRIDGE_TAKEOVER {
            if let Ok(status) = variant.to::<BridgeStatus>() {
                self.bridge.lock().expect("bridge lock poisoned").observe_status(status, received_at_millis);
                if self.is_bridge() && status.node_id != self.node_id {
                    let self_status = self.bridge_self_status(received_at_millis);
                    let should_demote = {
                        let bridge = self.bridge.lock().expect("bridge lock poisoned");
                        bridge.can_change_role(received_at_millis, self.config.min_role_change_interval)
                            && bridge.get_primary_bridge(&self_status, self.config.min_bridge_rssi).map(|p| p.node_id) != Some(self.node_id)
                    };
                    if should_demote {
                        self.bridge.lock().expect("bridge lock poisoned").set_role(BridgeRole::Regular, received_at_millis);
                        mesh_log!(LogCategory::General, Level::Info, "demoted to regular, {:?} took over as bridge", status.node_id);
                    }
                }
            }
        }

        if variant.msg_type == MessageType::GATEWAY_DATA && variant.dest == self.node_id {
            if let Ok(request) = variant.to::<GatewayRequest>() {
                self.spawn_gateway_request(request, connection);
            }
        }

        if variant.msg_type == MessageType::GATEWAY_ACK && variant.dest == self.node_id {
            if let Ok(ack) = variant.to::<GatewayAck>() {
                self.handle_gateway_ack(ack);
            }
        }

        let handle = self.connections.lock().expect("connections lock poisoned").get(&connection).map(|c| c.handle.clone());
        let consumed = if let Some(handle) = &handle {
            self.callbacks.lock().expect("callbacks lock poisoned").dispatch(&variant, handle, received_at_millis)
        } else {
            false
        };

        let _ = consumed; // local delivery never suppresses onward forwarding
        let should_forward = match variant.routing {
            Routing::Broadcast => true,
            // NEIGHBOR traffic (node-sync, time-sync) is single-hop only
            // and must never be re-forwarded past its one intended peer.
            Routing::Neighbor => false,
            Routing::Single => variant.dest != self.node_id,
        };
        if should_forward {
            self.forward_received(&variant, connection);
        }
    }

    /// Cancels every background task (the `run()` loop, `listen_tcp`, and
    /// every connection's I/O task) and returns once requested — callers
    /// still need to await their own spawned tasks to observe completion.
    pub fn stop(self: &Arc<Self>) {
        mesh_log!(LogCategory::Startup, Level::Info, "mesh node {} stopping", self.node_id);
        let connections = self.connections.lock().expect("connections lock poisoned");
        for conn in connections.values() {
            conn.handle.close(true);
        }
        self.cancel.cancel();
    }
}
