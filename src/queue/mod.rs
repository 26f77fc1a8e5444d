use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

use crate::model::WorkItem;

/// Bounded, priority-ordered, multi-producer/multi-consumer dispatch
/// queue.
///
/// Grounded on `original_source/bot_manager.py`'s
/// `asyncio.PriorityQueue` fed by `_queue_message`, which drops the
/// oldest low-priority item when the queue is full rather than blocking
/// the event loop, and the teacher's `storage::queue::EventQueue`
/// (bounded `VecDeque`, warn-and-drop-oldest on overflow). Implemented
/// over `std::collections::BinaryHeap` behind a `tokio::sync::Mutex`
/// plus a `tokio::sync::Notify` for consumer wakeup, since the ordering
/// requirement (strict cross-priority ordering, FIFO within a priority)
/// is something a plain `mpsc` channel cannot express.
pub struct PriorityQueue {
    capacity: usize,
    heap: Mutex<BinaryHeap<WorkItem>>,
    notify: Notify,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues a work item, stamping it with the next sequence number
    /// for FIFO tie-breaking. Never blocks: when at capacity, drops the
    /// current lowest-priority/oldest item to make room, as spec.md §4.3
    /// requires, and counts the drop for `MetricsMonitor`.
    pub fn push(&self, mut item: WorkItem) {
        item.sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);

        let mut heap = self.heap.lock().unwrap();
        if heap.len() >= self.capacity {
            if let Some(evicted) = pop_lowest(&mut heap) {
                self.dropped.fetch_add(1, AtomicOrdering::Relaxed);
                warn!(
                    pair_id = evicted.pair_id,
                    source_message_id = evicted.source_message_id,
                    "priority queue full, dropping oldest/lowest-priority item"
                );
            }
        }
        heap.push(item);
        drop(heap);
        self.notify.notify_one();
    }

    /// Waits until an item is available, then pops the highest-priority,
    /// earliest-enqueued one.
    pub async fn pop(&self) -> WorkItem {
        loop {
            {
                let mut heap = self.heap.lock().unwrap();
                if let Some(item) = heap.pop() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of capacity currently in use, for the queue-watch
    /// watermark sweep in `metrics`.
    pub fn saturation(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(AtomicOrdering::Relaxed)
    }
}

/// Removes and returns the single lowest-priority, latest-enqueued item
/// in the heap (the mirror image of what `pop` returns), by scanning —
/// `BinaryHeap` has no direct "pop-min" operation.
fn pop_lowest(heap: &mut BinaryHeap<WorkItem>) -> Option<WorkItem> {
    let drained: Vec<WorkItem> = heap.drain().collect();
    let mut drained = drained;
    let min_idx = drained
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(idx, _)| idx)?;
    let evicted = drained.swap_remove(min_idx);
    heap.extend(drained);
    Some(evicted)
}
