//! The shared mesh clock: `now_mesh = now_monotonic + offset` (spec §4.I).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct MeshClock {
    epoch: Instant,
    offset_millis: AtomicI64,
}

impl Default for MeshClock {
    fn default() -> Self {
        MeshClock { epoch: Instant::now(), offset_millis: AtomicI64::new(0) }
    }
}

impl MeshClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since this clock was created, ignoring time-sync offset.
    pub fn now_monotonic_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// The shared mesh clock value every node converges toward after
    /// time-sync: `now_monotonic + offset`.
    pub fn now_mesh_millis(&self) -> u64 {
        let monotonic = self.now_monotonic_millis() as i64;
        (monotonic + self.offset_millis.load(Ordering::Relaxed)).max(0) as u64
    }

    /// Applies a newly computed time-sync offset (spec §4.I step 4).
    pub fn apply_offset(&self, offset_millis: i64) {
        self.offset_millis.store(offset_millis, Ordering::Relaxed);
    }

    pub fn offset_millis(&self) -> i64 {
        self.offset_millis.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_shifts_mesh_time() {
        let clock = MeshClock::new();
        let before = clock.now_mesh_millis();
        clock.apply_offset(1000);
        let after = clock.now_mesh_millis();
        assert!(after >= before + 1000);
    }

    #[test]
    fn starts_with_zero_offset() {
        let clock = MeshClock::new();
        assert_eq!(clock.offset_millis(), 0);
    }
}
