//! # painless-mesh-proto
//!
//! Wire envelope, node tree, and dispatch primitives shared by every
//! painlessMesh component: the [`NodeId`]/[`Priority`]/[`Routing`]/
//! [`MessageType`] data model, the [`Variant`] tagged-union envelope over
//! JSON, the [`NodeTree`] subtree descriptor, the filtered [`logger`], and
//! the [`CallbackList`] multi-subscriber dispatch table.
//!
//! This crate has no knowledge of sockets, schedulers, or mesh topology —
//! those live in `painless-mesh-core`, which depends on this crate.

pub mod callback;
pub mod envelope;
pub mod logger;
pub mod message_type;
pub mod node_id;
pub mod node_tree;
pub mod priority;
pub mod routing;

pub use callback::CallbackList;
pub use envelope::{Variant, VariantError};
pub use logger::LogCategory;
pub use message_type::MessageType;
pub use node_id::NodeId;
pub use node_tree::{NodeTree, NodeTreeError, UNREACHABLE_HOPS};
pub use priority::{Priority, SendStats};
pub use routing::Routing;
