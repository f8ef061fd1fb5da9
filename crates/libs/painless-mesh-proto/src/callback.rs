//! Multi-subscriber dispatch keyed by `MessageType` (spec §4.B).
//!
//! Generic over a connection-context type `C` so this crate stays free of
//! any concrete connection/transport type — per the redesign note in
//! spec §9, mesh-core passes a small connection *handle*, not an owned
//! connection object, breaking the cyclic-ownership problem the original
//! callback design had.

use std::collections::HashMap;

use crate::envelope::Variant;
use crate::message_type::MessageType;

type Handler<C> = Box<dyn Fn(&Variant, &C, u64) -> bool + Send + Sync>;

/// Registry of per-message-type handlers. A handler returning `true` means
/// "consumed; do not forward" — the *logical OR* of every registered
/// handler's return for this type is the dispatch verdict. Handlers are
/// invoked in registration order and every one runs regardless of an
/// earlier handler's verdict, since they are independent side effects.
pub struct CallbackList<C> {
    handlers: HashMap<MessageType, Vec<Handler<C>>>,
}

impl<C> Default for CallbackList<C> {
    fn default() -> Self {
        CallbackList { handlers: HashMap::new() }
    }
}

impl<C> CallbackList<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_package<F>(&mut self, msg_type: MessageType, handler: F)
    where
        F: Fn(&Variant, &C, u64) -> bool + Send + Sync + 'static,
    {
        self.handlers.entry(msg_type).or_default().push(Box::new(handler));
    }

    /// Runs every handler registered for `variant.msg_type()` and returns
    /// whether any of them consumed the message.
    pub fn dispatch(&self, variant: &Variant, conn: &C, received_at: u64) -> bool {
        let mut consumed = false;
        if let Some(handlers) = self.handlers.get(&variant.msg_type()) {
            for handler in handlers {
                consumed |= handler(variant, conn, received_at);
            }
        }
        consumed
    }

    pub fn handler_count(&self, msg_type: MessageType) -> usize {
        self.handlers.get(&msg_type).map(Vec::len).unwrap_or(0)
    }
}
