//! A single peer-to-peer TCP link and its state machine (spec §4.F).
//!
//! Generic over `tokio::io::{AsyncRead, AsyncWrite}` rather than a concrete
//! socket type or a callback-registration API: spec §9's redesign note
//! points out the original's coroutine-free, callback-driven I/O loop is
//! exactly what native `async`/`await` replaces. `tokio::net::TcpStream`
//! is the production stream; tests drive connections over
//! `tokio::io::duplex()` pairs. The read/write halves run in one task,
//! mirroring this teacher crate's `transport::jobs::manage_transport`
//! event loop.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::Level;
use painless_mesh_proto::{mesh_log, LogCategory, NodeId, NodeTree, Priority, Variant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::{FrameBuffer, PriorityBuffer};

/// Lifecycle states a connection passes through (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP established, nothing exchanged yet.
    Connecting,
    /// SYNC/node-sync handshake in flight.
    Syncing,
    /// Handshake complete; the peer's node id and subtree are known.
    Established,
    /// A close was requested; draining outstanding writes.
    Closing,
    /// Socket shut down, task exited.
    Closed,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Syncing => 1,
            ConnectionState::Established => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Closed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Syncing,
            2 => ConnectionState::Established,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Opaque identifier for a connection slot in the mesh's connection arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// A cheap, cloneable reference to a connection, passed to
/// [`painless_mesh_proto::CallbackList`] handlers instead of the owning
/// [`Connection`] itself — the handle can outlive the reader/writer task
/// and carries no cyclic reference back to the mesh core (spec §9).
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    state: Arc<AtomicU8>,
    node_id: Arc<Mutex<Option<NodeId>>>,
    subtree: Arc<Mutex<Option<NodeTree>>>,
    last_received_millis: Arc<AtomicU64>,
    outbound: mpsc::UnboundedSender<OutboundItem>,
    cancel: CancellationToken,
    timeout_suspended: Arc<AtomicBool>,
}

enum OutboundItem {
    Payload(Vec<u8>, u8),
    Close { force: bool },
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn node_id(&self) -> Option<NodeId> {
        *self.node_id.lock().expect("connection node_id lock poisoned")
    }

    pub fn set_node_id(&self, node_id: NodeId) {
        *self.node_id.lock().expect("connection node_id lock poisoned") = Some(node_id);
    }

    pub fn subtree(&self) -> Option<NodeTree> {
        self.subtree.lock().expect("connection subtree lock poisoned").clone()
    }

    pub fn set_subtree(&self, tree: NodeTree) {
        *self.subtree.lock().expect("connection subtree lock poisoned") = Some(tree);
    }

    pub fn last_received_millis(&self) -> u64 {
        self.last_received_millis.load(Ordering::Acquire)
    }

    /// Enqueues `payload` at `priority` for this connection's writer. Fails
    /// silently (mirroring a closed socket accepting no more writes) once
    /// the connection has been closed.
    pub fn add_message(&self, payload: Vec<u8>, priority: Priority) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        let _ = self.outbound.send(OutboundItem::Payload(payload, priority.as_u8()));
    }

    /// Requests the connection close. `force` skips draining the send
    /// buffer (used when a peer is being evicted, not merely idle).
    pub fn close(&self, force: bool) {
        self.set_state(ConnectionState::Closing);
        let _ = self.outbound.send(OutboundItem::Close { force });
        self.cancel.cancel();
    }

    /// Finalizes a deferred close scheduled through
    /// [`crate::deletion::DeletionScheduler`] (spec §4.F/§5). The I/O task
    /// for a self-detected failure (EOF, read error, timeout, persistent
    /// framing failure) has typically already exited by the time this
    /// runs — this only flips the bookkeeping state so
    /// `Mesh::reap_closed_connections` picks the slot up on its next tick.
    pub(crate) fn mark_closed(&self) {
        self.set_state(ConnectionState::Closed);
    }

    /// Suspends `node_timeout` enforcement on this connection while this
    /// node is waiting on a slow out-of-band operation on the peer's
    /// behalf (the gateway HTTP round trip, spec §4.M) — silence during
    /// that wait must not look like a dead peer. Pair with
    /// [`ConnectionHandle::resume_timeout`].
    pub(crate) fn suspend_timeout(&self) {
        self.timeout_suspended.store(true, Ordering::Release);
    }

    pub(crate) fn resume_timeout(&self) {
        self.timeout_suspended.store(false, Ordering::Release);
    }

    /// A handle backed by no real socket, for delivering a
    /// locally-originated broadcast to this node's own `on_receive`
    /// handlers (spec §4.K's `include_self`) — callbacks expect a
    /// `&ConnectionHandle`, but a self-delivered message has no peer.
    pub(crate) fn loopback(id: ConnectionId) -> ConnectionHandle {
        let (outbound, _unused) = mpsc::unbounded_channel();
        ConnectionHandle {
            id,
            state: Arc::new(AtomicU8::new(ConnectionState::Established.to_u8())),
            node_id: Arc::new(Mutex::new(None)),
            subtree: Arc::new(Mutex::new(None)),
            last_received_millis: Arc::new(AtomicU64::new(0)),
            outbound,
            cancel: CancellationToken::new(),
            timeout_suspended: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Parsed frame delivered upward from a connection's reader half, along
/// with the mesh-clock timestamp it arrived at.
pub struct InboundFrame {
    pub connection: ConnectionId,
    pub variant: Variant,
    pub received_at_millis: u64,
}

/// Owns the I/O task for one peer link. Dropping this does not close the
/// connection — use [`ConnectionHandle::close`] — but the task exits once
/// its [`CancellationToken`] fires or the stream errors out.
pub struct Connection {
    pub handle: ConnectionHandle,
}

impl Connection {
    /// Spawns the reader/writer task over `stream` and returns a handle to
    /// it. Inbound frames are pushed onto `inbound_tx`; `node_timeout`
    /// closes the connection if nothing arrives for that long.
    ///
    /// Self-detected terminal conditions (EOF, read error, timeout,
    /// persistent framing failure) do not flip the handle straight to
    /// [`ConnectionState::Closed`]: they report themselves on `close_tx` so
    /// [`crate::mesh::Mesh`] can run the close through
    /// [`crate::deletion::DeletionScheduler`] instead, staggering the
    /// resulting `on_dropped_connection` hooks (spec §4.F/§5).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<S>(
        id: ConnectionId,
        stream: S,
        now_millis: impl Fn() -> u64 + Send + Sync + 'static,
        node_timeout: Duration,
        max_frame_size: usize,
        inbound_tx: mpsc::UnboundedSender<InboundFrame>,
        close_tx: mpsc::UnboundedSender<ConnectionId>,
        parent_cancel: &CancellationToken,
    ) -> Connection
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = parent_cancel.child_token();

        let handle = ConnectionHandle {
            id,
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting.to_u8())),
            node_id: Arc::new(Mutex::new(None)),
            subtree: Arc::new(Mutex::new(None)),
            last_received_millis: Arc::new(AtomicU64::new(now_millis())),
            outbound: outbound_tx,
            cancel: cancel.clone(),
            timeout_suspended: Arc::new(AtomicBool::new(false)),
        };

        let task_handle = handle.clone();
        tokio::spawn(async move {
            run_io_loop(
                id,
                stream,
                task_handle,
                now_millis,
                node_timeout,
                max_frame_size,
                outbound_rx,
                inbound_tx,
                close_tx,
                cancel,
            )
            .await;
        });

        Connection { handle }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_io_loop<S>(
    id: ConnectionId,
    stream: S,
    handle: ConnectionHandle,
    now_millis: impl Fn() -> u64,
    node_timeout: Duration,
    max_frame_size: usize,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundItem>,
    inbound_tx: mpsc::UnboundedSender<InboundFrame>,
    close_tx: mpsc::UnboundedSender<ConnectionId>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut frames = FrameBuffer::new(max_frame_size);
    let mut send_buf = PriorityBuffer::new();
    let mut read_buf = [0u8; 4096];
    let mut closing_force = false;
    let mut defer_close = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                break;
            }

            _ = tokio::time::sleep(node_timeout) => {
                if handle.timeout_suspended.load(Ordering::Acquire) {
                    continue;
                }
                mesh_log!(LogCategory::Connection, Level::Warn, "connection {:?} timed out", id);
                defer_close = true;
                break;
            }

            read = reader.read(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        defer_close = true;
                        break; // EOF
                    }
                    Ok(n) => {
                        handle.last_received_millis.store(now_millis(), Ordering::Release);
                        frames.feed(&read_buf[..n]);
                        loop {
                            match frames.try_pop_frame() {
                                Ok(Some(json)) => match Variant::parse(&json) {
                                    Ok(variant) => {
                                        let _ = inbound_tx.send(InboundFrame {
                                            connection: id,
                                            variant,
                                            received_at_millis: now_millis(),
                                        });
                                    }
                                    Err(e) => {
                                        mesh_log!(LogCategory::Error, Level::Warn, "bad envelope on {:?}: {e}", id);
                                    }
                                },
                                Ok(None) => break,
                                Err(e) => {
                                    mesh_log!(LogCategory::Error, Level::Warn, "framing error on {:?}: {e}", id);
                                    if frames.persistent_failure() {
                                        defer_close = true;
                                    }
                                    break;
                                }
                            }
                        }
                        if defer_close {
                            break;
                        }
                    }
                    Err(e) => {
                        mesh_log!(LogCategory::Error, Level::Warn, "read error on {:?}: {e}", id);
                        defer_close = true;
                        break;
                    }
                }
            }

            item = outbound_rx.recv() => {
                match item {
                    Some(OutboundItem::Payload(bytes, priority)) => {
                        send_buf.push(bytes, priority);
                    }
                    Some(OutboundItem::Close { force }) => {
                        closing_force = force;
                        if force {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        while let Some((bytes, priority)) = send_buf.read_next() {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
            if writer.write_all(&[0u8]).await.is_err() {
                break;
            }
            if priority.wants_immediate_flush() {
                let _ = writer.flush().await;
            }
        }

        if closing_force || (handle.state() == ConnectionState::Closing && send_buf.is_empty()) {
            break;
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;

    if defer_close {
        handle.set_state(ConnectionState::Closing);
        let _ = close_tx.send(id);
    } else {
        cleanup(&handle).await;
    }
}

async fn cleanup(handle: &ConnectionHandle) {
    handle.set_state(ConnectionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use painless_mesh_proto::{MessageType, Routing};
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    fn fixed_clock() -> impl Fn() -> u64 + Send + Sync + 'static {
        let counter = Arc::new(StdAtomicU64::new(0));
        move || counter.fetch_add(1, Ordering::Relaxed)
    }

    #[tokio::test]
    async fn round_trips_a_frame_over_a_duplex_pair() {
        let (client, server) = tokio::io::duplex(4096);
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (close_tx, _close_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let server_conn = Connection::spawn(
            ConnectionId(1),
            server,
            fixed_clock(),
            Duration::from_secs(10),
            4096,
            inbound_tx,
            close_tx,
            &cancel,
        );

        // Drive the client side manually: write one framed envelope.
        let mut client = client;
        let variant = Variant::new(
            MessageType::SINGLE,
            NodeId(7),
            NodeId::NONE,
            Routing::Single,
            serde_json::json!({"data": "hello"}),
        );
        client.write_all(variant.to_json_string().as_bytes()).await.unwrap();
        client.write_all(&[0u8]).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .expect("did not receive frame in time")
            .expect("channel closed");
        assert_eq!(received.variant.from, NodeId(7));
        assert_eq!(received.connection, ConnectionId(1));

        server_conn.handle.close(true);
    }

    #[tokio::test]
    async fn add_message_is_a_noop_after_close() {
        let (_, server) = tokio::io::duplex(4096);
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let (close_tx, _close_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let conn = Connection::spawn(
            ConnectionId(2),
            server,
            fixed_clock(),
            Duration::from_secs(10),
            4096,
            inbound_tx,
            close_tx,
            &cancel,
        );
        conn.handle.close(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.handle.add_message(b"late".to_vec(), Priority::Critical);
        assert_eq!(conn.handle.state(), ConnectionState::Closed);
    }

    /// A read error / EOF must not flip the handle straight to `Closed`:
    /// it should report on `close_tx` and let the scheduler finish the job,
    /// mirroring how `Mesh::request_deferred_close` completes it.
    #[tokio::test]
    async fn a_dropped_peer_reports_on_close_tx_instead_of_self_closing() {
        let (client, server) = tokio::io::duplex(4096);
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let conn = Connection::spawn(
            ConnectionId(3),
            server,
            fixed_clock(),
            Duration::from_secs(10),
            4096,
            inbound_tx,
            close_tx,
            &cancel,
        );

        drop(client); // EOF on the server side

        let reported = tokio::time::timeout(Duration::from_secs(1), close_rx.recv())
            .await
            .expect("no close request arrived")
            .expect("close_tx channel closed");
        assert_eq!(reported, ConnectionId(3));
        assert_eq!(conn.handle.state(), ConnectionState::Closing);
    }
}
