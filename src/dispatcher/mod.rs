use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::model::{MessageContent, Priority, WorkItem, WorkKind};
use crate::queue::PriorityQueue;
use crate::registry::PairRegistry;
use crate::store::MappingStore;
use crate::transport::{SourceEvent, SourceFeed};

/// Consumes `SourceEvent`s from a `SourceFeed`, fans each one out to
/// every active pair routed from its source chat, and enqueues one
/// `WorkItem` per pair.
///
/// Grounded on `original_source/bot_manager.py`'s `_handle_new_message`,
/// `_handle_message_edited`, `_handle_message_deleted`, and
/// `_get_message_priority`.
pub struct Dispatcher {
    registry: Arc<PairRegistry>,
    queue: Arc<PriorityQueue>,
    mappings: Arc<dyn MappingStore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<PairRegistry>, queue: Arc<PriorityQueue>, mappings: Arc<dyn MappingStore>) -> Self {
        Self {
            registry,
            queue,
            mappings,
        }
    }

    /// Drives `feed` until it errors, dispatching every event it
    /// yields. Run as its own task by `main`.
    pub async fn run(&self, mut feed: Box<dyn SourceFeed>) -> anyhow::Result<()> {
        loop {
            let event = feed.next_event().await?;
            self.dispatch(event).await;
        }
    }

    /// Routes a single event to every active pair on its source chat,
    /// applying each pair's `sync_edits`/`sync_deletes` gate. A single
    /// pair's enqueue failure is logged and does not stop the fan-out to
    /// the remaining pairs — the original never lets one bad pair crash
    /// the ingestion loop.
    pub async fn dispatch(&self, event: SourceEvent) {
        match event {
            SourceEvent::NewMessage {
                chat_id,
                message_id,
                text,
                entities,
                media_type,
                is_reply,
                reply_to_msg_id,
            } => {
                let content = MessageContent {
                    text,
                    entities,
                    media_type,
                };
                for pair in self.active_pairs_for(chat_id) {
                    let reply_to_source_id = if pair.filters.preserve_replies { reply_to_msg_id } else { None };
                    let is_reply = is_reply && pair.filters.preserve_replies;
                    let priority = priority_for_new_message(is_reply, content.media_type.is_some());
                    let item = WorkItem::new(
                        pair.id,
                        message_id,
                        priority,
                        WorkKind::NewMessage {
                            content: content.clone(),
                        },
                    )
                    .with_reply(reply_to_source_id);
                    self.enqueue(item, pair.id);
                }
            }
            SourceEvent::MessageEdited {
                chat_id,
                message_id,
                text,
                entities,
                media_type,
            } => {
                let content = MessageContent {
                    text,
                    entities,
                    media_type,
                };
                for pair in self.active_pairs_for(chat_id) {
                    if !pair.filters.sync_edits {
                        continue;
                    }
                    let item = WorkItem::new(
                        pair.id,
                        message_id,
                        Priority::High,
                        WorkKind::Edit {
                            content: content.clone(),
                        },
                    );
                    self.enqueue(item, pair.id);
                }
            }
            SourceEvent::MessagesDeleted { chat_id, message_ids } => {
                for pair in self.active_pairs_for(chat_id) {
                    if !pair.filters.sync_deletes {
                        continue;
                    }
                    for message_id in &message_ids {
                        let item = WorkItem::new(pair.id, *message_id, Priority::Normal, WorkKind::Delete);
                        self.enqueue(item, pair.id);
                    }
                }
            }
        }
    }

    fn active_pairs_for(&self, source_chat_id: i64) -> Vec<crate::model::Pair> {
        self.registry
            .pairs_for_source(source_chat_id)
            .into_iter()
            .filter(|p| p.is_active())
            .collect()
    }

    fn enqueue(&self, item: WorkItem, pair_id: i64) {
        debug!(pair_id, "enqueuing work item");
        self.queue.push(item);
    }

    /// Looks up the destination message for a source message on a given
    /// pair — used by `WorkerPool` before issuing an edit/delete.
    pub async fn resolve_mapping(&self, pair_id: i64, source_message_id: i64) -> Option<i64> {
        match self.mappings.get(pair_id, source_message_id).await {
            Ok(Some(mapping)) => Some(mapping.dest_message_id),
            Ok(None) => {
                warn!(pair_id, source_message_id, "no mapping found for edit/delete");
                None
            }
            Err(e) => {
                error!(pair_id, source_message_id, error = %e, "mapping lookup failed");
                None
            }
        }
    }
}

/// Priority assignment for a new message, per spec.md §4.1: `High` if
/// the message is a reply (and the pair preserves replies) or carries
/// media; `Normal` otherwise. Edits default to `High`; deletes to
/// `Normal` — see `dispatch`'s `Edit`/`Delete` arms.
fn priority_for_new_message(is_reply_and_preserved: bool, has_media: bool) -> Priority {
    if is_reply_and_preserved || has_media {
        Priority::High
    } else {
        Priority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterConfig, Pair, PairCounters, PairStatus};
    use crate::store::MemoryStore;

    fn pair(id: i64, source: i64) -> Pair {
        Pair {
            id,
            source_chat_id: source,
            dest_chat_id: 100 + id,
            bot_index: 0,
            status: PairStatus::Active,
            filters: FilterConfig::default(),
            counters: PairCounters::default(),
        }
    }

    fn new_message(chat_id: i64, message_id: i64, text: &str) -> SourceEvent {
        SourceEvent::NewMessage {
            chat_id,
            message_id,
            text: text.to_string(),
            entities: Vec::new(),
            media_type: None,
            is_reply: false,
            reply_to_msg_id: None,
        }
    }

    #[tokio::test]
    async fn fans_out_a_new_message_to_every_active_pair_on_the_source() {
        let registry = Arc::new(PairRegistry::new(vec![pair(1, 10), pair(2, 10)]));
        let queue = Arc::new(PriorityQueue::new(10));
        let mappings = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(registry, queue.clone(), mappings);

        dispatcher.dispatch(new_message(10, 1, "hello")).await;

        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn skips_paused_pairs() {
        let mut p = pair(1, 10);
        p.status = PairStatus::Paused;
        let registry = Arc::new(PairRegistry::new(vec![p]));
        let queue = Arc::new(PriorityQueue::new(10));
        let mappings = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(registry, queue.clone(), mappings);

        dispatcher.dispatch(new_message(10, 1, "hello")).await;

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn deletes_enqueue_one_item_per_message_id_at_normal_priority_when_sync_deletes_is_on() {
        let mut p = pair(1, 10);
        p.filters.sync_deletes = true;
        let registry = Arc::new(PairRegistry::new(vec![p]));
        let queue = Arc::new(PriorityQueue::new(10));
        let mappings = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(registry, queue.clone(), mappings);

        dispatcher
            .dispatch(SourceEvent::MessagesDeleted {
                chat_id: 10,
                message_ids: vec![1, 2, 3],
            })
            .await;

        assert_eq!(queue.len(), 3);
        let item = queue.pop().await;
        assert_eq!(item.priority, Priority::Normal);
    }

    #[tokio::test]
    async fn deletes_are_skipped_when_sync_deletes_is_off_by_default() {
        let registry = Arc::new(PairRegistry::new(vec![pair(1, 10)]));
        let queue = Arc::new(PriorityQueue::new(10));
        let mappings = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(registry, queue.clone(), mappings);

        dispatcher
            .dispatch(SourceEvent::MessagesDeleted {
                chat_id: 10,
                message_ids: vec![1],
            })
            .await;

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn edits_are_skipped_when_sync_edits_is_disabled() {
        let mut p = pair(1, 10);
        p.filters.sync_edits = false;
        let registry = Arc::new(PairRegistry::new(vec![p]));
        let queue = Arc::new(PriorityQueue::new(10));
        let mappings = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(registry, queue.clone(), mappings);

        dispatcher
            .dispatch(SourceEvent::MessageEdited {
                chat_id: 10,
                message_id: 1,
                text: "edited".to_string(),
                entities: Vec::new(),
                media_type: None,
            })
            .await;

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn replies_are_prioritized_high_when_preserve_replies_is_on() {
        let registry = Arc::new(PairRegistry::new(vec![pair(1, 10)]));
        let queue = Arc::new(PriorityQueue::new(10));
        let mappings = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(registry, queue.clone(), mappings);

        dispatcher
            .dispatch(SourceEvent::NewMessage {
                chat_id: 10,
                message_id: 1,
                text: "a reply".to_string(),
                entities: Vec::new(),
                media_type: None,
                is_reply: true,
                reply_to_msg_id: Some(99),
            })
            .await;

        let item = queue.pop().await;
        assert_eq!(item.priority, Priority::High);
        assert_eq!(item.reply_to_source_id, Some(99));
    }
}
