//! Priority-ordered send queue with a partial-read cursor (spec §4.D).

use std::collections::VecDeque;

use painless_mesh_proto::{Priority, SendStats};

struct Cursor {
    priority: Priority,
    data: Vec<u8>,
    pos: usize,
}

/// One chunk of a (possibly fragmented) outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    pub bytes: Vec<u8>,
    pub priority: Priority,
    /// `true` once this chunk completes the payload.
    pub done: bool,
}

/// Strictly priority-ordered (CRITICAL first), FIFO-within-priority queue
/// of outbound payloads. `read_chunk` exposes a cursor over the payload
/// currently being drained: once a read starts, it always runs to
/// completion before the next (possibly higher-priority) entry is picked —
/// "no preemption within a frame".
#[derive(Default)]
pub struct PriorityBuffer {
    queues: [VecDeque<Vec<u8>>; 4],
    cursor: Option<Cursor>,
    stats: SendStats,
}

impl PriorityBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `payload` at `priority` (clamped to a valid value per spec).
    pub fn push(&mut self, payload: Vec<u8>, priority: u8) {
        let priority = Priority::clamp(priority);
        self.queues[priority.as_u8() as usize].push_back(payload);
        self.stats.record_queued(priority);
    }

    fn next_priority(&self) -> Option<Priority> {
        Priority::ALL.into_iter().find(|p| !self.queues[p.as_u8() as usize].is_empty())
    }

    pub fn peek_priority_of_next(&self) -> Option<Priority> {
        if let Some(cursor) = &self.cursor {
            return Some(cursor.priority);
        }
        self.next_priority()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_none() && self.queues.iter().all(VecDeque::is_empty)
    }

    /// Reads up to `max_len` bytes of the current (or next) payload. Once a
    /// payload's read has started, subsequent calls keep draining the same
    /// payload — a newly pushed higher-priority payload will not jump ahead
    /// mid-fragment — until `done` is `true`.
    pub fn read_chunk(&mut self, max_len: usize) -> Option<ReadChunk> {
        if self.cursor.is_none() {
            let priority = self.next_priority()?;
            let payload = self.queues[priority.as_u8() as usize].pop_front()?;
            self.cursor = Some(Cursor { priority, data: payload, pos: 0 });
        }

        let max_len = max_len.max(1);
        let cursor = self.cursor.as_mut().expect("cursor set above");
        let remaining = cursor.data.len() - cursor.pos;
        let take = remaining.min(max_len);
        let bytes = cursor.data[cursor.pos..cursor.pos + take].to_vec();
        cursor.pos += take;
        let done = cursor.pos >= cursor.data.len();
        let priority = cursor.priority;

        if done {
            self.stats.record_sent(priority);
            self.cursor = None;
        }

        Some(ReadChunk { bytes, priority, done })
    }

    /// Pops and returns the next whole payload, un-fragmented. Used by
    /// connections whose writer can accept the full frame in one call.
    pub fn read_next(&mut self) -> Option<(Vec<u8>, Priority)> {
        let mut out = Vec::new();
        let mut priority = None;
        loop {
            let chunk = self.read_chunk(usize::MAX)?;
            priority = Some(chunk.priority);
            out.extend(chunk.bytes);
            if chunk.done {
                break;
            }
        }
        Some((out, priority.expect("set on first iteration")))
    }

    pub fn stats(&self) -> SendStats {
        self.stats
    }
}
