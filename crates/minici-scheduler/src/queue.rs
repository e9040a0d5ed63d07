//! In-memory job queue.
//!
//! Pending runs live only in this process; a restart drops them.

use minici_core::job::{QueueItem, QueueSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// FIFO queue of pending runs.
///
/// Every operation takes the lock only long enough to touch the deque, so it
/// is safe to call from async code without ever holding it across an await.
#[derive(Debug, Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<QueueItem>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a run request to the tail of the queue. Never blocks on
    /// anything but the lock and never rejects.
    pub fn submit(&self, job_id: impl Into<String>, params: HashMap<String, String>) -> QueueItem {
        let item = QueueItem::new(job_id, params);
        let position = {
            let mut items = self.lock();
            items.push_back(item.clone());
            items.len()
        };
        debug!(job_id = %item.job_id, position, "Enqueued job");
        item
    }

    /// Remove the head of the queue.
    pub fn pop(&self) -> Option<QueueItem> {
        self.lock().pop_front()
    }

    /// Point-in-time copy of the pending items, oldest first.
    pub fn inspect(&self) -> QueueSnapshot {
        let items = self.lock();
        QueueSnapshot {
            length: items.len(),
            items: items.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        // The deque is never left half-updated, so a poisoned lock is still usable.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new();
        for id in ["a", "b", "c"] {
            queue.submit(id, HashMap::new());
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|i| i.job_id).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_inspect_reports_pending_items() {
        let queue = JobQueue::new();
        let params = HashMap::from([("BRANCH".to_string(), "main".to_string())]);
        queue.submit("first", params.clone());
        queue.submit("second", HashMap::new());

        let snapshot = queue.inspect();
        assert_eq!(snapshot.length, 2);
        assert_eq!(snapshot.items[0].job_id, "first");
        assert_eq!(snapshot.items[0].params, params);
        assert_eq!(snapshot.items[1].job_id, "second");

        // Inspecting does not consume anything.
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_concurrent_submissions_are_all_kept() {
        let queue = Arc::new(JobQueue::new());

        std::thread::scope(|scope| {
            for t in 0..8 {
                let queue = queue.clone();
                scope.spawn(move || {
                    for n in 0..50 {
                        queue.submit(format!("job-{}-{}", t, n), HashMap::new());
                    }
                });
            }
        });

        assert_eq!(queue.inspect().length, 400);
    }
}
