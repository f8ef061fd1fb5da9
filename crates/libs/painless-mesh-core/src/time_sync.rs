//! SNTP-style four-message time synchronization (spec §4.I).
//!
//! `t0`: requester sends TIME_SYNC request. `t1`: responder receives it.
//! `t2`: responder sends its reply. `t3`: requester receives the reply.
//! `offset = ((t1 - t0) + (t2 - t3)) / 2`, `delay = ((t3 - t0) - (t2 - t1)) / 2`.

use painless_mesh_proto::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncState {
    Idle,
    Requested,
    Measured,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncResult {
    pub offset_millis: i64,
    pub delay_millis: i64,
}

/// One in-flight time-sync exchange with a single peer. The mesh core
/// keeps one of these per outstanding request; a new request against the
/// same peer replaces it.
#[derive(Debug, Clone, Copy)]
pub struct TimeSyncExchange {
    pub peer: NodeId,
    state: TimeSyncState,
    t0: Option<u64>,
    t1: Option<u64>,
    t2: Option<u64>,
}

impl TimeSyncExchange {
    pub fn new(peer: NodeId) -> Self {
        TimeSyncExchange { peer, state: TimeSyncState::Idle, t0: None, t1: None, t2: None }
    }

    pub fn state(&self) -> TimeSyncState {
        self.state
    }

    /// Records the outgoing request timestamp (local mesh-clock millis).
    pub fn request_sent(&mut self, t0: u64) {
        self.t0 = Some(t0);
        self.state = TimeSyncState::Requested;
    }

    /// The *responder* side: records `t1` (receipt) and `t2` (reply sent),
    /// which travel back to the requester inside the TIME_SYNC reply
    /// payload rather than being tracked locally as an exchange.
    pub fn responder_timestamps(t1: u64, t2: u64) -> (u64, u64) {
        (t1, t2)
    }

    /// The requester applies the responder's `(t1, t2)` together with its
    /// own `t3` (reply receipt) to finish the exchange.
    pub fn reply_received(&mut self, t1: u64, t2: u64, t3: u64) -> Option<TimeSyncResult> {
        let t0 = self.t0?;
        self.t1 = Some(t1);
        self.t2 = Some(t2);
        self.state = TimeSyncState::Measured;

        let offset = ((t1 as i64 - t0 as i64) + (t2 as i64 - t3 as i64)) / 2;
        let delay = ((t3 as i64 - t0 as i64) - (t2 as i64 - t1 as i64)) / 2;
        self.state = TimeSyncState::Synced;
        Some(TimeSyncResult { offset_millis: offset, delay_millis: delay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_offset_for_a_symmetric_exchange() {
        let mut ex = TimeSyncExchange::new(NodeId(2));
        ex.request_sent(1000);
        // Responder clock runs 50ms ahead; 5ms one-way delay each direction,
        // no responder processing time.
        let result = ex.reply_received(1055, 1055, 1010).unwrap();
        assert_eq!(result.offset_millis, 50);
        assert_eq!(result.delay_millis, 5);
        assert_eq!(ex.state(), TimeSyncState::Synced);
    }

    #[test]
    fn reply_without_a_prior_request_is_ignored() {
        let mut ex = TimeSyncExchange::new(NodeId(2));
        assert!(ex.reply_received(10, 20, 30).is_none());
        assert_eq!(ex.state(), TimeSyncState::Idle);
    }
}
