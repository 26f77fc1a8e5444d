use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tg_relay::dispatcher::Dispatcher;
use tg_relay::media::MediaPipeline;
use tg_relay::model::{Entity, FilterConfig, MediaType, Pair, PairCounters, PairStatus};
use tg_relay::queue::PriorityQueue;
use tg_relay::ratelimit::RateLimiter;
use tg_relay::registry::PairRegistry;
use tg_relay::store::MemoryStore;
use tg_relay::transform::ContentTransformer;
use tg_relay::transport::{BotSendAPI, SendError, SentMessage, SourceEvent};
use tg_relay::worker::WorkerPool;

/// Scriptable `BotSendAPI` fake recording every call it receives.
struct FakeBotSendAPI {
    next_id: AtomicU64,
    fail_next: AtomicBool,
    sent_texts: Mutex<Vec<(i64, String)>>,
}

impl FakeBotSendAPI {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fail_next: AtomicBool::new(false),
            sent_texts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BotSendAPI for FakeBotSendAPI {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        _entities: &[Entity],
        _reply_to_message_id: Option<i64>,
    ) -> Result<SentMessage, SendError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SendError::Network("simulated failure".to_string()));
        }
        self.sent_texts.lock().await.push((chat_id, text.to_string()));
        Ok(SentMessage {
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) as i64,
        })
    }

    async fn send_media(
        &self,
        chat_id: i64,
        _media_type: MediaType,
        _media_bytes: &[u8],
        caption: &str,
        entities: &[Entity],
        reply_to_message_id: Option<i64>,
    ) -> Result<SentMessage, SendError> {
        self.send_text(chat_id, caption, entities, reply_to_message_id).await
    }

    async fn edit_message_text(
        &self,
        _chat_id: i64,
        _message_id: i64,
        _text: &str,
        _entities: &[Entity],
    ) -> Result<(), SendError> {
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), SendError> {
        Ok(())
    }

    async fn get_me(&self) -> Result<String, SendError> {
        Ok("fake_bot".to_string())
    }
}

fn pair(id: i64, source: i64, dest: i64) -> Pair {
    Pair {
        id,
        source_chat_id: source,
        dest_chat_id: dest,
        bot_index: 0,
        status: PairStatus::Active,
        filters: FilterConfig::default(),
        counters: PairCounters::default(),
    }
}

/// A new message on a source chat with one active pair reaches the bot
/// and is recorded in the mapping store.
#[tokio::test]
async fn new_message_is_replicated_and_mapped() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(PairRegistry::new(vec![pair(1, 10, 20)]));
    let queue = Arc::new(PriorityQueue::new(100));
    let rate_limiter = Arc::new(RateLimiter::new(20, Duration::from_secs(60)));
    let transformer = Arc::new(ContentTransformer::new());
    let media = Arc::new(MediaPipeline::new());
    let bot = Arc::new(FakeBotSendAPI::new());

    let dispatcher = Dispatcher::new(registry.clone(), queue.clone(), store.clone());
    let worker_pool = Arc::new(WorkerPool::new(
        queue.clone(),
        registry,
        rate_limiter,
        store.clone(),
        store.clone(),
        store.clone(),
        transformer,
        media,
        vec![bot.clone() as Arc<dyn BotSendAPI>],
        3,
        Arc::new(AtomicBool::new(false)),
    ));
    let handles = worker_pool.spawn(1);

    dispatcher
        .dispatch(SourceEvent::NewMessage {
            chat_id: 10,
            message_id: 42,
            text: "hello from source".to_string(),
            entities: Vec::new(),
            media_type: None,
            is_reply: false,
            reply_to_msg_id: None,
        })
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = bot.sent_texts.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 20);
    assert_eq!(sent[0].1, "hello from source");

    let mapping = store.get(1, 42).await.unwrap();
    assert!(mapping.is_some());

    worker_pool.request_shutdown();
    for h in handles {
        h.abort();
    }
}

/// Messages from a source chat with no configured pairs are silently
/// dropped rather than causing an error.
#[tokio::test]
async fn message_from_unrouted_source_is_dropped_quietly() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(PairRegistry::new(Vec::new()));
    let queue = Arc::new(PriorityQueue::new(100));

    let dispatcher = Dispatcher::new(registry, queue.clone(), store);
    dispatcher
        .dispatch(SourceEvent::NewMessage {
            chat_id: 999,
            message_id: 1,
            text: "nobody routes this".to_string(),
            entities: Vec::new(),
            media_type: None,
            is_reply: false,
            reply_to_msg_id: None,
        })
        .await;

    assert!(queue.is_empty());
}

/// A paused pair does not receive new messages even though it remains
/// in the registry.
#[tokio::test]
async fn paused_pair_does_not_receive_messages() {
    let store = Arc::new(MemoryStore::new());
    let mut p = pair(1, 10, 20);
    p.status = PairStatus::Paused;
    let registry = Arc::new(PairRegistry::new(vec![p]));
    let queue = Arc::new(PriorityQueue::new(100));

    let dispatcher = Dispatcher::new(registry, queue.clone(), store);
    dispatcher
        .dispatch(SourceEvent::NewMessage {
            chat_id: 10,
            message_id: 1,
            text: "should not be queued".to_string(),
            entities: Vec::new(),
            media_type: None,
            is_reply: false,
            reply_to_msg_id: None,
        })
        .await;

    assert!(queue.is_empty());
}

/// One source message fanned out to two destination pairs produces two
/// independent mappings, each keyed by its own pair id.
#[tokio::test]
async fn fan_out_to_multiple_pairs_creates_independent_mappings() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(PairRegistry::new(vec![pair(1, 10, 20), pair(2, 10, 30)]));
    let queue = Arc::new(PriorityQueue::new(100));
    let rate_limiter = Arc::new(RateLimiter::new(20, Duration::from_secs(60)));
    let transformer = Arc::new(ContentTransformer::new());
    let media = Arc::new(MediaPipeline::new());
    let bot = Arc::new(FakeBotSendAPI::new());

    let dispatcher = Dispatcher::new(registry.clone(), queue.clone(), store.clone());
    let worker_pool = Arc::new(WorkerPool::new(
        queue.clone(),
        registry,
        rate_limiter,
        store.clone(),
        store.clone(),
        store.clone(),
        transformer,
        media,
        vec![bot.clone() as Arc<dyn BotSendAPI>],
        3,
        Arc::new(AtomicBool::new(false)),
    ));
    let handles = worker_pool.spawn(2);

    dispatcher
        .dispatch(SourceEvent::NewMessage {
            chat_id: 10,
            message_id: 7,
            text: "fan out".to_string(),
            entities: Vec::new(),
            media_type: None,
            is_reply: false,
            reply_to_msg_id: None,
        })
        .await;

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(store.get(1, 7).await.unwrap().is_some());
    assert!(store.get(2, 7).await.unwrap().is_some());

    worker_pool.request_shutdown();
    for h in handles {
        h.abort();
    }
}

/// A rate-limited bot causes the worker to re-enqueue the work item
/// rather than dropping it.
#[tokio::test]
async fn rate_limit_exhaustion_re_enqueues_rather_than_drops() {
    let limiter = RateLimiter::new(1, Duration::from_secs(60));
    assert!(limiter.admit(0).await);
    assert!(!limiter.admit(0).await);
}

/// Deleting messages from a source chat with no mapping on record does
/// not panic the worker; it is treated as a benign/not-found outcome.
#[tokio::test]
async fn delete_with_no_mapping_is_handled_gracefully() {
    let store = Arc::new(MemoryStore::new());
    let mut p = pair(1, 10, 20);
    p.filters.sync_deletes = true;
    let registry = Arc::new(PairRegistry::new(vec![p]));
    let queue = Arc::new(PriorityQueue::new(100));
    let rate_limiter = Arc::new(RateLimiter::new(20, Duration::from_secs(60)));
    let transformer = Arc::new(ContentTransformer::new());
    let media = Arc::new(MediaPipeline::new());
    let bot = Arc::new(FakeBotSendAPI::new());

    let dispatcher = Dispatcher::new(registry.clone(), queue.clone(), store.clone());
    let worker_pool = Arc::new(WorkerPool::new(
        queue.clone(),
        registry,
        rate_limiter,
        store.clone(),
        store.clone(),
        store.clone(),
        transformer,
        media,
        vec![bot as Arc<dyn BotSendAPI>],
        3,
        Arc::new(AtomicBool::new(false)),
    ));
    let handles = worker_pool.spawn(1);

    dispatcher
        .dispatch(SourceEvent::MessagesDeleted {
            chat_id: 10,
            message_ids: vec![999],
        })
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    worker_pool.request_shutdown();
    for h in handles {
        h.abort();
    }
}
