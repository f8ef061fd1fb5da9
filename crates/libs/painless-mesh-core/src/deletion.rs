//! Deferred connection deletion with globally-spaced execution (spec §4.F
//! / §5). Closing several connections back-to-back (e.g. a station losing
//! its whole subtree at once) must not fire every teardown callback in the
//! same tick — painlessMesh staggers them by `DELETION_SPACING` so
//! downstream `on_dropped_connection` subscribers see a trickle, not a
//! burst.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Tracks the next free deletion slot, expressed in mesh-clock
/// milliseconds. Shared by every connection scheduling a deferred close.
#[derive(Debug, Default)]
pub struct DeletionScheduler {
    next_slot_millis: AtomicU64,
}

impl DeletionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the delay (from `now_millis`) at which a deletion
    /// requested now should execute, and reserves that slot so the next
    /// caller is pushed at least `deletion_spacing` further out.
    ///
    /// `max(now + base_cleanup_delay, next_slot + deletion_spacing)`.
    pub fn schedule(
        &self,
        now_millis: u64,
        base_cleanup_delay: Duration,
        deletion_spacing: Duration,
    ) -> Duration {
        let earliest = now_millis + base_cleanup_delay.as_millis() as u64;
        let prev_slot = self.next_slot_millis.load(Ordering::SeqCst);
        let spaced = prev_slot + deletion_spacing.as_millis() as u64;
        let slot = earliest.max(spaced);
        self.next_slot_millis.store(slot, Ordering::SeqCst);
        Duration::from_millis(slot.saturating_sub(now_millis))
    }

    /// Called once the deferred deletion actually executes, in case real
    /// execution ran later than scheduled (a busy scheduler, a slow
    /// callback elsewhere) — the next slot must never regress behind it.
    pub fn record_executed(&self, executed_at_millis: u64) {
        self.next_slot_millis.fetch_max(executed_at_millis, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_deletion_uses_base_delay() {
        let sched = DeletionScheduler::new();
        let delay = sched.schedule(1_000, Duration::from_millis(1000), Duration::from_millis(1000));
        assert_eq!(delay, Duration::from_millis(1000));
    }

    #[test]
    fn back_to_back_deletions_are_spaced_out() {
        let sched = DeletionScheduler::new();
        let base = Duration::from_millis(1000);
        let spacing = Duration::from_millis(1000);

        let first = sched.schedule(0, base, spacing);
        let second = sched.schedule(0, base, spacing);
        let third = sched.schedule(0, base, spacing);

        assert_eq!(first, Duration::from_millis(1000));
        assert_eq!(second, Duration::from_millis(2000));
        assert_eq!(third, Duration::from_millis(3000));
    }

    #[test]
    fn a_late_request_does_not_get_pulled_earlier_than_spacing() {
        let sched = DeletionScheduler::new();
        let base = Duration::from_millis(1000);
        let spacing = Duration::from_millis(1000);

        sched.schedule(0, base, spacing); // slot at 1000
        // Next request arrives at t=5000, well past the previous slot.
        let delay = sched.schedule(5000, base, spacing);
        assert_eq!(delay, Duration::from_millis(1000)); // max(6000, 2000) - 5000
    }

    #[test]
    fn record_executed_never_moves_the_slot_backward() {
        let sched = DeletionScheduler::new();
        let base = Duration::from_millis(1000);
        let spacing = Duration::from_millis(1000);
        sched.schedule(0, base, spacing); // slot at 1000
        sched.record_executed(500); // executed earlier than slot somehow
        let delay = sched.schedule(1000, base, spacing);
        assert_eq!(delay, Duration::from_millis(1000)); // slot stayed at 1000, spaced to 2000
    }
}
