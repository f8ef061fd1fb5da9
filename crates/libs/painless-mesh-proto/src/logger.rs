//! Filtered diagnostic emit (spec §4.A), layered on the `log` facade.
//!
//! Each category doubles as a `log` *target*, so a binary that wants finer
//! control than the bitmask can still layer `RUST_LOG=painless_mesh::sync=trace`
//! filtering on top via `env_logger`. The bitmask exists for the common case
//! of toggling whole categories on resource-constrained targets where a
//! full `env_logger` directive parser would be unwelcome weight.

use std::sync::atomic::{AtomicU32, Ordering};

/// Named diagnostic categories, each an OR-able bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogCategory {
    Error = 1 << 0,
    Startup = 1 << 1,
    Connection = 1 << 2,
    Sync = 1 << 3,
    Communication = 1 << 4,
    General = 1 << 5,
    MessageTypes = 1 << 6,
    Remote = 1 << 7,
}

impl LogCategory {
    pub fn target(self) -> &'static str {
        match self {
            LogCategory::Error => "error",
            LogCategory::Startup => "startup",
            LogCategory::Connection => "connection",
            LogCategory::Sync => "sync",
            LogCategory::Communication => "communication",
            LogCategory::General => "general",
            LogCategory::MessageTypes => "message-types",
            LogCategory::Remote => "remote",
        }
    }

    pub const ALL: u32 = (1 << 8) - 1;
}

static ACTIVE_MASK: AtomicU32 = AtomicU32::new(LogCategory::Error as u32 | LogCategory::Startup as u32);

/// Replace the set of active categories. The mask is an OR of `LogCategory`
/// bit values (or `LogCategory::ALL`).
pub fn set_level(mask: u32) {
    ACTIVE_MASK.store(mask, Ordering::Relaxed);
}

pub fn enabled(category: LogCategory) -> bool {
    ACTIVE_MASK.load(Ordering::Relaxed) & (category as u32) != 0
}

/// Emit one already-formatted line under `category` at `level`, if that
/// category is currently active. Arguments are built by `format!` at the
/// call site (via the `mesh_log!` macro below), so a placeholder/argument
/// mismatch is a compile error, not a runtime one.
pub fn emit(category: LogCategory, level: log::Level, message: &str) {
    if enabled(category) {
        log::log!(target: category.target(), level, "{message}");
    }
}

/// `mesh_log!(Category::Connection, Level::Info, "peer {} up", node_id)`.
#[macro_export]
macro_rules! mesh_log {
    ($category:expr, $level:expr, $($arg:tt)+) => {
        $crate::logger::emit($category, $level, &format!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mask_enables_error_and_startup_only() {
        set_level(LogCategory::Error as u32 | LogCategory::Startup as u32);
        assert!(enabled(LogCategory::Error));
        assert!(enabled(LogCategory::Startup));
        assert!(!enabled(LogCategory::Sync));
    }

    #[test]
    fn all_mask_enables_everything() {
        set_level(LogCategory::ALL);
        assert!(enabled(LogCategory::Remote));
        assert!(enabled(LogCategory::MessageTypes));
    }

    #[test]
    fn mesh_log_macro_compiles_with_typed_args() {
        set_level(LogCategory::ALL);
        let node = 42u32;
        mesh_log!(LogCategory::Connection, log::Level::Info, "peer {} up", node);
    }
}
