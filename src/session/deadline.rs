// src/session/deadline.rs
//! Centralized max-duration deadline scheduler
//!
//! One min-heap of deadlines for all sessions, drained by a single driver
//! task in the manager, instead of one timer handle per session. Cancelling
//! a deadline on early stop is explicit; a deadline that fires after its
//! session already ended resolves against the active map as a no-op.

use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeadlineEntry {
    due: Instant,
    meeting_id: String,
    session_id: String,
}

impl Ord for DeadlineEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.session_id.cmp(&other.session_id))
    }
}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of session deadlines with lazy cancellation
pub struct DeadlineQueue {
    heap: Mutex<BinaryHeap<Reverse<DeadlineEntry>>>,
    cancelled: Mutex<HashSet<String>>,
    notify: Notify,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            cancelled: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    /// Arm a deadline `after` from now for the given session
    pub fn arm(&self, meeting_id: &str, session_id: &str, after: Duration) {
        let entry = DeadlineEntry {
            due: Instant::now() + after,
            meeting_id: meeting_id.to_string(),
            session_id: session_id.to_string(),
        };
        self.heap.lock().push(Reverse(entry));
        self.notify.notify_one();
    }

    /// Cancel a pending deadline by session id
    pub fn cancel(&self, session_id: &str) {
        self.cancelled.lock().insert(session_id.to_string());
        self.notify.notify_one();
    }

    /// Number of armed (possibly cancelled-pending) deadlines
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Wait until the next non-cancelled deadline fires and return its
    /// `(meeting_id, session_id)`. Intended for a single driver task.
    pub async fn next_expired(&self) -> (String, String) {
        loop {
            let next_due = self.heap.lock().peek().map(|Reverse(e)| e.due);

            match next_due {
                None => {
                    // Nothing armed; wait for an arm() or cancel()
                    self.notify.notified().await;
                }
                Some(due) => {
                    tokio::select! {
                        _ = self.notify.notified() => {
                            // Heap changed; recompute the nearest deadline
                        }
                        _ = tokio::time::sleep_until(due) => {
                            if let Some(entry) = self.pop_due() {
                                return (entry.meeting_id, entry.session_id);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Pop the top entry if its deadline has passed, skipping cancelled ones
    fn pop_due(&self) -> Option<DeadlineEntry> {
        let now = Instant::now();
        let mut heap = self.heap.lock();
        let mut cancelled = self.cancelled.lock();

        while let Some(Reverse(entry)) = heap.peek() {
            if entry.due > now {
                return None;
            }
            let Reverse(entry) = heap.pop().expect("peeked entry present");
            if cancelled.remove(&entry.session_id) {
                continue;
            }
            return Some(entry);
        }
        None
    }
}

impl Default for DeadlineQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deadline_fires_in_order() {
        let queue = DeadlineQueue::new();
        queue.arm("m2", "s2", Duration::from_millis(80));
        queue.arm("m1", "s1", Duration::from_millis(20));

        let (meeting, session) = queue.next_expired().await;
        assert_eq!(meeting, "m1");
        assert_eq!(session, "s1");

        let (meeting, _) = queue.next_expired().await;
        assert_eq!(meeting, "m2");
    }

    #[tokio::test]
    async fn test_cancelled_deadline_is_skipped() {
        let queue = DeadlineQueue::new();
        queue.arm("m1", "s1", Duration::from_millis(20));
        queue.arm("m2", "s2", Duration::from_millis(40));
        queue.cancel("s1");

        let (meeting, session) = queue.next_expired().await;
        assert_eq!(meeting, "m2");
        assert_eq!(session, "s2");
    }

    #[tokio::test]
    async fn test_arm_wakes_idle_driver() {
        let queue = Arc::new(DeadlineQueue::new());

        let driver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_expired().await })
        };

        // Give the driver time to park on an empty heap
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.arm("m1", "s1", Duration::from_millis(10));

        let (meeting, _) = driver.await.unwrap();
        assert_eq!(meeting, "m1");
    }
}
