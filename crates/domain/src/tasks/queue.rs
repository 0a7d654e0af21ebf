//! Bounded-use priority queue with FIFO tiebreak and keyed removal.
//!
//! A max-heap ordered by `(priority desc, sequence asc)` plus a `task_id`
//! index for O(1) membership and keyed removal. Removal only touches the
//! index; stale heap keys are skipped transparently on the next peek or
//! dequeue. One mutex covers the whole structure.

use crate::shared_kernel::{GatewayError, Result, TaskId, TaskPriority};
use crate::tasks::TransportTask;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

/// One queued task together with its dispatch ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub task: TransportTask,
    pub priority: TaskPriority,
    pub sequence: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapKey {
    priority: TaskPriority,
    sequence: u64,
    task_id: TaskId,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority wins; within a priority the lower sequence wins.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<HeapKey>,
    index: HashMap<TaskId, QueueEntry>,
    next_sequence: u64,
}

impl QueueInner {
    fn is_stale(&self, key: &HeapKey) -> bool {
        match self.index.get(&key.task_id) {
            Some(entry) => entry.sequence != key.sequence,
            None => true,
        }
    }

    fn drop_stale_head(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.index.get(&top.task_id).map(|e| e.sequence) == Some(top.sequence) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Thread-safe priority queue for pending transport tasks.
pub struct PriorityTaskQueue {
    inner: Mutex<QueueInner>,
}

impl PriorityTaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Enqueue a task. Fails if the task id is already queued.
    pub fn enqueue(&self, task: TransportTask, priority: TaskPriority) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.index.contains_key(&task.task_id) {
            return Err(GatewayError::InvalidOperation {
                message: format!("task {} is already queued", task.task_id),
            });
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.heap.push(HeapKey {
            priority,
            sequence,
            task_id: task.task_id.clone(),
        });
        inner.index.insert(
            task.task_id.clone(),
            QueueEntry {
                task,
                priority,
                sequence,
            },
        );
        Ok(())
    }

    /// Highest-priority, lowest-sequence entry without removing it.
    pub fn try_peek(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.drop_stale_head();
        let task_id = inner.heap.peek().map(|k| k.task_id.clone())?;
        inner.index.get(&task_id).cloned()
    }

    /// Remove and return the head entry.
    pub fn try_dequeue(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        loop {
            let key = inner.heap.pop()?;
            if inner.is_stale(&key) {
                continue;
            }
            return inner.index.remove(&key.task_id);
        }
    }

    /// Remove a specific task wherever it sits in the queue.
    ///
    /// Used by the dispatcher to commit the peeked head; returns `None` when
    /// the task was removed or replaced since the peek.
    pub fn take(&self, task_id: &TaskId) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.index.remove(task_id)
    }

    /// Keyed removal by external command. No-op returning `false` when the
    /// id is not queued.
    pub fn try_remove(&self, task_id: &TaskId) -> bool {
        self.take(task_id).is_some()
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.index.contains_key(task_id)
    }

    pub fn count(&self) -> usize {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Snapshot copy in dispatch order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        let mut entries: Vec<QueueEntry> = inner.index.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        entries
    }
}

impl Default for PriorityTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TransportTaskBuilder;
    use shuttle_shared::states::CommandType;

    fn task(id: &str) -> TransportTask {
        TransportTaskBuilder::new(id, CommandType::Inbound)
            .build()
            .unwrap()
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("A"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("B"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("C"), TaskPriority::Normal).unwrap();

        assert_eq!(queue.try_dequeue().unwrap().task.task_id.as_str(), "A");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id.as_str(), "B");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id.as_str(), "C");
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_higher_priority_dequeues_first() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("N1"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("H1"), TaskPriority::High).unwrap();
        queue.enqueue(task("N2"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("C1"), TaskPriority::Critical).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|e| e.task.task_id.0)
            .collect();
        assert_eq!(order, vec!["C1", "H1", "N1", "N2"]);
    }

    #[test]
    fn test_duplicate_enqueue_rejected() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("A"), TaskPriority::Normal).unwrap();
        let err = queue.enqueue(task("A"), TaskPriority::High);
        assert!(err.is_err());
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn test_removed_entries_are_skipped() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("A"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("B"), TaskPriority::Normal).unwrap();

        assert!(queue.try_remove(&TaskId::from("A")));
        assert_eq!(queue.try_peek().unwrap().task.task_id.as_str(), "B");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id.as_str(), "B");
    }

    #[test]
    fn test_remove_nonexistent_is_noop() {
        let queue = PriorityTaskQueue::new();
        assert!(!queue.try_remove(&TaskId::from("missing")));
    }

    #[test]
    fn test_reenqueue_after_removal_gets_fresh_position() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("A"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("B"), TaskPriority::Normal).unwrap();
        assert!(queue.try_remove(&TaskId::from("A")));
        queue.enqueue(task("A"), TaskPriority::Normal).unwrap();

        assert_eq!(queue.try_dequeue().unwrap().task.task_id.as_str(), "B");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id.as_str(), "A");
    }

    #[test]
    fn test_take_commits_peeked_head() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("A"), TaskPriority::Normal).unwrap();

        let head = queue.try_peek().unwrap();
        let taken = queue.take(&head.task.task_id).unwrap();
        assert_eq!(taken.task.task_id.as_str(), "A");
        assert!(queue.take(&head.task.task_id).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_snapshot_is_in_dispatch_order() {
        let queue = PriorityTaskQueue::new();
        queue.enqueue(task("N1"), TaskPriority::Normal).unwrap();
        queue.enqueue(task("H1"), TaskPriority::High).unwrap();
        queue.enqueue(task("N2"), TaskPriority::Normal).unwrap();

        let snapshot = queue.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|e| e.task.task_id.as_str()).collect();
        assert_eq!(ids, vec!["H1", "N1", "N2"]);
        // Snapshot does not drain the queue.
        assert_eq!(queue.count(), 3);
    }
}
