use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::entity::{Entity, MediaType};

/// Dispatch priority. Ordered so that `Urgent` sorts greatest — the
/// `PriorityQueue`'s `BinaryHeap` is a max-heap, so greatest-first gives
/// urgent work first.
///
/// Grounded on `bot_manager.py`'s `MessagePriority`
/// (`URGENT`/`HIGH`/`NORMAL`/`LOW`) and the teacher's
/// `events::queue_manager::Priority` (`Critical`/`High`/`Normal`/`Low`),
/// renamed to match spec.md's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// What kind of source event this work item carries.
///
/// Grounded on `bot_manager.py`'s three handlers
/// (`_handle_new_message`, `_handle_message_edited`,
/// `_handle_message_deleted`), which this enum distinguishes instead of
/// three separate queue item types.
#[derive(Debug, Clone)]
pub enum WorkKind {
    NewMessage { content: MessageContent },
    Edit { content: MessageContent },
    Delete,
}

/// Transformable payload of a new-message or edit work item.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub text: String,
    pub entities: Vec<Entity>,
    pub media_type: Option<MediaType>,
}

/// One unit of dispatch work: a single source event routed to a single
/// destination pair, queued for a worker to pick up.
///
/// Grounded on `bot_manager.py`'s `QueuedMessage`
/// (`pair`, `priority`, `message_id`, `event_type`, enqueue timestamp)
/// and `_queue_message`'s sequence-number tie-break for FIFO ordering
/// within a priority level.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub pair_id: i64,
    pub source_message_id: i64,
    pub priority: Priority,
    pub kind: WorkKind,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    /// Whether the source event this item carries is a reply to another
    /// source message — consulted by `Dispatcher` for priority
    /// assignment and by `WorkerPool` to resolve and attach the
    /// reply-to destination id.
    pub is_reply: bool,
    pub reply_to_source_id: Option<i64>,
    /// Monotonic insertion order, assigned by `PriorityQueue::push`.
    /// Breaks ties within a priority level so the heap behaves FIFO,
    /// not LIFO, among equal-priority items.
    pub sequence: u64,
}

impl WorkItem {
    pub fn new(
        pair_id: i64,
        source_message_id: i64,
        priority: Priority,
        kind: WorkKind,
    ) -> Self {
        Self {
            pair_id,
            source_message_id,
            priority,
            kind,
            enqueued_at: Utc::now(),
            retry_count: 0,
            is_reply: false,
            reply_to_source_id: None,
            sequence: 0,
        }
    }

    pub fn with_reply(mut self, reply_to_source_id: Option<i64>) -> Self {
        self.is_reply = reply_to_source_id.is_some();
        self.reply_to_source_id = reply_to_source_id;
        self
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for WorkItem {}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkItem {
    /// Higher priority first; within equal priority, earlier sequence
    /// number first (so reverse the sequence comparison, since the heap
    /// pops the greatest element).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
