//! User-defined message type registry (spec §4.O).
//!
//! Distinct from [`painless_mesh_proto::CallbackList`]: that dispatches
//! already-parsed envelopes to handlers. This registry is consulted
//! *before* dispatch, to decide how a locally-originated message of a
//! given user [`MessageType`] should be routed when the caller didn't
//! specify — painlessMesh lets a plugin register itself as inherently
//! broadcast or single-destination, e.g. an OTA announcement is always a
//! broadcast, while an OTA data chunk is always addressed to one node.

use std::collections::HashMap;

use painless_mesh_proto::{MessageType, Routing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub default_routing: Routing,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<MessageType, PluginDescriptor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `msg_type` as belonging to a plugin, with the routing
    /// mode to assume when a send call omits one explicitly. Returns the
    /// previous descriptor, if `msg_type` was already registered — spec
    /// §4.O treats re-registration as the plugin being replaced, not an
    /// error.
    pub fn register(&mut self, msg_type: MessageType, default_routing: Routing) -> Option<PluginDescriptor> {
        self.plugins.insert(msg_type, PluginDescriptor { default_routing })
    }

    pub fn unregister(&mut self, msg_type: MessageType) -> bool {
        self.plugins.remove(&msg_type).is_some()
    }

    pub fn is_registered(&self, msg_type: MessageType) -> bool {
        self.plugins.contains_key(&msg_type)
    }

    /// Resolves the routing to use for `msg_type`: an explicitly
    /// registered plugin default, falling back to the message type's own
    /// built-in default (spec §4.C), falling back to `Routing::Single` —
    /// painlessMesh's default for anything unrecognized addressed to a
    /// specific node.
    pub fn resolve_routing(&self, msg_type: MessageType) -> Routing {
        self.plugins
            .get(&msg_type)
            .map(|d| d.default_routing)
            .or_else(|| msg_type.default_routing())
            .unwrap_or(Routing::Single)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_plugin_routing_overrides_message_type_default() {
        let mut registry = PluginRegistry::new();
        let ota_chunk = MessageType(250); // user-domain, no built-in default
        registry.register(ota_chunk, Routing::Single);
        assert_eq!(registry.resolve_routing(ota_chunk), Routing::Single);

        registry.register(ota_chunk, Routing::Broadcast);
        assert_eq!(registry.resolve_routing(ota_chunk), Routing::Broadcast);
    }

    #[test]
    fn unregistered_user_type_falls_back_to_single() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.resolve_routing(MessageType(250)), Routing::Single);
    }

    #[test]
    fn unregistered_internal_type_keeps_its_builtin_default() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.resolve_routing(MessageType::BROADCAST), Routing::Broadcast);
    }

    #[test]
    fn unregister_removes_the_plugin() {
        let mut registry = PluginRegistry::new();
        registry.register(MessageType(201), Routing::Broadcast);
        assert!(registry.unregister(MessageType(201)));
        assert!(!registry.is_registered(MessageType(201)));
    }
}
