pub mod bridge;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod connection;
pub mod deletion;
pub mod error;
pub mod gateway;
pub mod iface;
pub mod mesh;
pub mod offline_queue;
pub mod plugin;
pub mod router;
pub mod station;
pub mod time_sync;

pub use bridge::{BridgeManager, BridgeRole, BridgeStatus};
pub use buffer::{FrameBuffer, PriorityBuffer};
pub use clock::MeshClock;
pub use config::MeshConfig;
pub use connection::{Connection, ConnectionHandle, ConnectionId, ConnectionState};
pub use error::MeshError;
pub use gateway::{Gateway, GatewayAck, GatewayMethod, GatewayRequest};
pub use mesh::Mesh;
pub use offline_queue::{OfflineQueue, OfflineQueueStats, QueuedMessage};
pub use plugin::PluginRegistry;
pub use router::{ForwardDecision, Router};
pub use station::{StationScan, StationState};
pub use time_sync::{TimeSyncExchange, TimeSyncResult, TimeSyncState};
