//! In-process mutation stream.
//!
//! Every committed mutation publishes one typed event onto a bounded ring.
//! Subscribers poll with a cursor (`get_mutations(since)`); events arrive in
//! commit order and a monotonically advanced cursor never sees duplicates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// One committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Commit-order sequence number, strictly increasing.
    pub seq: u64,
    /// Commit timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Entity kind: "issue", "dependency", "label", "comment".
    pub entity: String,
    /// What happened: "created", "updated", "closed", "deleted", ...
    pub kind: String,
    /// The affected entity's ID.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

/// Bounded, commit-ordered ring of mutation events.
#[derive(Debug)]
pub struct MutationBus {
    ring: Mutex<VecDeque<MutationEvent>>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl Default for MutationBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MutationBus {
    /// Creates a bus retaining at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Publishes one event, evicting the oldest when full.
    pub fn publish(
        &self,
        entity: impl Into<String>,
        kind: impl Into<String>,
        id: impl Into<String>,
        old: Option<String>,
        new: Option<String>,
    ) -> MutationEvent {
        let event = MutationEvent {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: Utc::now().timestamp_millis(),
            entity: entity.into(),
            kind: kind.into(),
            id: id.into(),
            old,
            new,
        };
        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
        event
    }

    /// Events with a commit timestamp strictly after `since_ms`, in commit
    /// order.
    pub fn get_mutations(&self, since_ms: i64) -> Vec<MutationEvent> {
        self.ring
            .lock()
            .map(|ring| {
                ring.iter()
                    .filter(|e| e.timestamp_ms > since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Events with a sequence number strictly after `since_seq`, in commit
    /// order. Sequence cursors are exact where millisecond cursors can tie.
    pub fn get_mutations_after_seq(&self, since_seq: u64) -> Vec<MutationEvent> {
        self.ring
            .lock()
            .map(|ring| {
                ring.iter()
                    .filter(|e| e.seq > since_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.ring.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns `true` when no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_poll_in_commit_order() {
        let bus = MutationBus::default();
        bus.publish("issue", "created", "t-1", None, None);
        bus.publish("issue", "closed", "t-1", Some("open".into()), Some("closed".into()));

        let events = bus.get_mutations(0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "created");
        assert_eq!(events[1].kind, "closed");
        assert!(events[0].seq < events[1].seq);
    }

    #[test]
    fn cursor_advancement_sees_no_duplicates() {
        let bus = MutationBus::default();
        bus.publish("issue", "created", "t-1", None, None);
        let first = bus.get_mutations_after_seq(0);
        assert_eq!(first.len(), 1);

        bus.publish("issue", "updated", "t-1", None, None);
        let second = bus.get_mutations_after_seq(first.last().unwrap().seq);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, "updated");
    }

    #[test]
    fn ring_is_bounded() {
        let bus = MutationBus::with_capacity(3);
        for i in 0..10 {
            bus.publish("issue", "created", format!("t-{i}"), None, None);
        }
        assert_eq!(bus.len(), 3);
        let events = bus.get_mutations_after_seq(0);
        assert_eq!(events[0].id, "t-7");
        assert_eq!(events[2].id, "t-9");
    }

    #[test]
    fn timestamp_cursor_filters() {
        let bus = MutationBus::default();
        let event = bus.publish("issue", "created", "t-1", None, None);
        assert!(bus.get_mutations(event.timestamp_ms).is_empty());
        assert_eq!(bus.get_mutations(event.timestamp_ms - 1).len(), 1);
    }
}
