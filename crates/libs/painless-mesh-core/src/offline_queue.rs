//! Persistent outbound queue for messages that could not be delivered
//! while this node had no mesh connections (spec §4.N).
//!
//! Eviction policy on a full queue, by priority of the *incoming* message:
//! CRITICAL is never evicted to make room — if the queue is full of
//! nothing but CRITICAL, the new one is rejected instead. Otherwise
//! CRITICAL/HIGH evicts the oldest LOW entry if one exists, else the
//! oldest NORMAL entry older than `normal_max_age`. NORMAL may evict an
//! older NORMAL entry. LOW is rejected outright on a full queue.

use std::collections::VecDeque;
use std::time::Duration;

use painless_mesh_proto::{NodeId, Priority};
use serde::{Deserialize, Serialize};

use crate::iface::FileStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub dest: NodeId,
    pub priority: Priority,
    pub payload: String,
    pub queued_at_millis: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfflineQueueStats {
    pub len: usize,
    pub by_priority: [usize; 4],
}

pub struct OfflineQueue {
    entries: VecDeque<QueuedMessage>,
    max_size: usize,
    normal_max_age: Duration,
}

impl OfflineQueue {
    pub fn new(max_size: usize, normal_max_age: Duration) -> Self {
        OfflineQueue { entries: VecDeque::new(), max_size, normal_max_age }
    }

    /// Attempts to enqueue `message`, applying the eviction policy if the
    /// queue is already at capacity. Returns `false` if `message` was
    /// rejected outright (queue full and no eviction candidate, or a LOW
    /// message arriving at capacity).
    pub fn enqueue(&mut self, message: QueuedMessage, now_millis: u64) -> bool {
        if self.entries.len() < self.max_size {
            self.entries.push_back(message);
            return true;
        }

        match message.priority {
            Priority::Low => false,
            Priority::Normal => {
                if let Some(idx) = self.oldest_index_of(Priority::Normal) {
                    self.entries.remove(idx);
                    self.entries.push_back(message);
                    true
                } else {
                    false
                }
            }
            Priority::Critical | Priority::High => {
                if let Some(idx) = self.oldest_index_of(Priority::Low) {
                    self.entries.remove(idx);
                    self.entries.push_back(message);
                    return true;
                }
                if let Some(idx) = self.oldest_stale_normal(now_millis) {
                    self.entries.remove(idx);
                    self.entries.push_back(message);
                    return true;
                }
                false
            }
        }
    }

    fn oldest_index_of(&self, priority: Priority) -> Option<usize> {
        self.entries.iter().position(|m| m.priority == priority)
    }

    fn oldest_stale_normal(&self, now_millis: u64) -> Option<usize> {
        self.entries.iter().position(|m| {
            m.priority == Priority::Normal
                && now_millis.saturating_sub(m.queued_at_millis) >= self.normal_max_age.as_millis() as u64
        })
    }

    /// Drains every entry currently queued, in FIFO order, for resending
    /// now that a connection is available.
    pub fn flush(&mut self) -> Vec<QueuedMessage> {
        self.entries.drain(..).collect()
    }

    /// Removes entries that have aged out without ever being flushed
    /// (only NORMAL has an age limit; CRITICAL/HIGH/LOW are pruned only by
    /// the eviction policy above, never by age).
    pub fn prune_stale(&mut self, now_millis: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|m| {
            !(m.priority == Priority::Normal
                && now_millis.saturating_sub(m.queued_at_millis) >= self.normal_max_age.as_millis() as u64)
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> OfflineQueueStats {
        let mut by_priority = [0usize; 4];
        for m in &self.entries {
            by_priority[m.priority.as_u8() as usize] += 1;
        }
        OfflineQueueStats { len: self.entries.len(), by_priority }
    }

    pub async fn save_to_storage(&self, store: &impl FileStore) -> std::io::Result<()> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry).expect("QueuedMessage always serializes"));
            out.push('\n');
        }
        store.write_all(out.as_bytes()).await
    }

    pub async fn load_from_storage(&mut self, store: &impl FileStore) -> std::io::Result<()> {
        let Some(bytes) = store.read_all().await? else {
            return Ok(());
        };
        let text = String::from_utf8_lossy(&bytes);
        self.entries.clear();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            if let Ok(entry) = serde_json::from_str::<QueuedMessage>(line) {
                self.entries.push_back(entry);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::sim::SimFileStore;

    fn msg(dest: u32, priority: Priority, at: u64) -> QueuedMessage {
        QueuedMessage { dest: NodeId(dest), priority, payload: format!("m{dest}"), queued_at_millis: at }
    }

    #[test]
    fn low_priority_is_rejected_when_full() {
        let mut q = OfflineQueue::new(1, Duration::from_secs(3600));
        assert!(q.enqueue(msg(1, Priority::Normal, 0), 0));
        assert!(!q.enqueue(msg(2, Priority::Low, 0), 0));
        assert_eq!(q.stats().len, 1);
    }

    #[test]
    fn critical_evicts_oldest_low_first() {
        let mut q = OfflineQueue::new(2, Duration::from_secs(3600));
        assert!(q.enqueue(msg(1, Priority::Low, 0), 0));
        assert!(q.enqueue(msg(2, Priority::Normal, 0), 0));
        assert!(q.enqueue(msg(3, Priority::Critical, 0), 0));
        let flushed = q.flush();
        let dests: Vec<u32> = flushed.iter().map(|m| m.dest.0).collect();
        assert_eq!(dests, vec![2, 3]); // node 1 (LOW) evicted
    }

    #[test]
    fn critical_evicts_stale_normal_when_no_low_present() {
        let mut q = OfflineQueue::new(1, Duration::from_secs(3600));
        assert!(q.enqueue(msg(1, Priority::Normal, 0), 0));
        // Not stale yet: rejected.
        assert!(!q.enqueue(msg(2, Priority::Critical, 0), 1000));
        // Now past the 1hr staleness window.
        assert!(q.enqueue(msg(2, Priority::Critical, 0), 3_600_001));
        assert_eq!(q.stats().len, 1);
        assert_eq!(q.flush()[0].dest, NodeId(2));
    }

    #[test]
    fn critical_queue_full_of_critical_rejects_new_critical() {
        let mut q = OfflineQueue::new(1, Duration::from_secs(3600));
        assert!(q.enqueue(msg(1, Priority::Critical, 0), 0));
        assert!(!q.enqueue(msg(2, Priority::Critical, 0), 0));
    }

    #[tokio::test]
    async fn persists_and_reloads_through_a_file_store() {
        let store = SimFileStore::new();
        let mut q = OfflineQueue::new(10, Duration::from_secs(3600));
        q.enqueue(msg(1, Priority::High, 0), 0);
        q.enqueue(msg(2, Priority::Low, 0), 0);
        q.save_to_storage(&store).await.unwrap();

        let mut reloaded = OfflineQueue::new(10, Duration::from_secs(3600));
        reloaded.load_from_storage(&store).await.unwrap();
        assert_eq!(reloaded.stats().len, 2);
    }
}
