use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::media::{MediaAttributes, MediaPipeline};
use crate::model::{BotMetrics, MediaType, MessageContent, WorkItem, WorkKind};
use crate::queue::PriorityQueue;
use crate::ratelimit::RateLimiter;
use crate::registry::PairRegistry;
use crate::store::{ErrorLog, MappingStore, PairStore};
use crate::transform::{ContentTransformer, TransformOutcome};
use crate::transport::{BotSendAPI, SendError};

/// Base delay before the first retry; doubled per attempt and jittered
/// ±10%, matching the teacher's `RetryConfig` defaults
/// (`initial_delay_ms = 1000`, `backoff_factor = 2.0`,
/// `jitter_range = 0.1`) — the circuit-breaker half of that file is not
/// reused, since spec.md's retry policy only needs backoff/retry-count
/// mechanics (see DESIGN.md).
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A fixed-size pool of worker tasks draining the `PriorityQueue`,
/// applying `ContentTransformer`/`MediaPipeline`, and dispatching
/// through `BotSendAPI`.
///
/// Grounded on `original_source/bot_manager.py`'s `_message_worker` /
/// `_process_queued_message` / `_check_rate_limit`, and the teacher's
/// `events::queue_manager::QueueManager::worker_loop` for the
/// drain-with-shutdown-flag shape.
pub struct WorkerPool {
    queue: Arc<PriorityQueue>,
    registry: Arc<PairRegistry>,
    rate_limiter: Arc<RateLimiter>,
    mappings: Arc<dyn MappingStore>,
    pair_store: Arc<dyn PairStore>,
    error_log: Arc<dyn ErrorLog>,
    transformer: Arc<ContentTransformer>,
    media: Arc<MediaPipeline>,
    bots: Vec<Arc<dyn BotSendAPI>>,
    metrics: Vec<tokio::sync::Mutex<BotMetrics>>,
    max_retries: u32,
    system_paused: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<PriorityQueue>,
        registry: Arc<PairRegistry>,
        rate_limiter: Arc<RateLimiter>,
        mappings: Arc<dyn MappingStore>,
        pair_store: Arc<dyn PairStore>,
        error_log: Arc<dyn ErrorLog>,
        transformer: Arc<ContentTransformer>,
        media: Arc<MediaPipeline>,
        bots: Vec<Arc<dyn BotSendAPI>>,
        max_retries: u32,
        system_paused: Arc<AtomicBool>,
    ) -> Self {
        let metrics = (0..bots.len())
            .map(|i| tokio::sync::Mutex::new(BotMetrics::new(i)))
            .collect();
        Self {
            queue,
            registry,
            rate_limiter,
            mappings,
            pair_store,
            error_log,
            transformer,
            media,
            bots,
            metrics,
            max_retries,
            system_paused,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Spawns `worker_count` tasks, each running `worker_loop`
    /// independently against the shared queue.
    pub fn spawn(self: &Arc<Self>, worker_count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        (0..worker_count)
            .map(|id| {
                let pool = self.clone();
                tokio::spawn(async move { pool.worker_loop(id).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize) {
        info!(worker_id, "worker started");
        while !self.shutdown.load(Ordering::Relaxed) {
            if self.system_paused.load(Ordering::Relaxed) {
                sleep(Duration::from_millis(250)).await;
                continue;
            }

            let item = self.queue.pop().await;
            self.process(item).await;
        }
        info!(worker_id, "worker stopped");
    }

    async fn process(&self, item: WorkItem) {
        let Some(pair) = self.registry.get(item.pair_id) else {
            warn!(pair_id = item.pair_id, "work item for unknown pair, dropping");
            return;
        };
        if !pair.is_active() {
            debug!(pair_id = item.pair_id, "pair no longer active, dropping");
            return;
        }

        if !self.rate_limiter.admit(pair.bot_index).await {
            // Re-enqueue and back off briefly rather than busy-spinning
            // the worker on a rate-limited bot; the original's
            // `_check_rate_limit` blocks the same way inline.
            self.queue.push(item);
            sleep(Duration::from_millis(200)).await;
            return;
        }

        let Some(bot) = self.bots.get(pair.bot_index) else {
            error!(bot_index = pair.bot_index, "bot index out of range");
            return;
        };

        let result = match &item.kind {
            WorkKind::NewMessage { content } => self.send_new(&pair, bot.as_ref(), &item, content.clone()).await,
            WorkKind::Edit { content } => self.send_edit(&pair, bot.as_ref(), &item, content.clone()).await,
            WorkKind::Delete => self.send_delete(&pair, bot.as_ref(), &item).await,
        };

        match result {
            Ok(()) => {
                self.record_outcome(pair.bot_index, true).await;
            }
            Err(send_error) if send_error.is_benign() => {
                debug!(pair_id = item.pair_id, error = %send_error, "benign send outcome");
            }
            Err(SendError::FloodWait(seconds)) => {
                // Not counted as a failure for the success-rate EMA at
                // all, on any attempt — spec.md §7: a flood wait is an
                // upstream signal to slow down, not a send failure.
                self.rate_limiter.record_flood_wait(pair.bot_index, seconds).await;
                self.retry_or_fail(item).await;
            }
            Err(send_error) if send_error.is_retryable() => {
                // Only the final, retries-exhausted attempt counts
                // against the success-rate EMA (spec.md §7); the retry
                // path itself records nothing.
                warn!(pair_id = item.pair_id, error = %send_error, "retryable send failure");
                if !self.retry_or_fail(item).await {
                    self.record_outcome(pair.bot_index, false).await;
                }
            }
            Err(send_error) => {
                self.record_outcome(pair.bot_index, false).await;
                error!(pair_id = item.pair_id, error = %send_error, "terminal send failure");
                self.bump_counter(item.pair_id, |c| c.errors += 1).await;
                let _ = self
                    .error_log
                    .record(item.pair_id, &send_error.to_string())
                    .await;
            }
        }
    }

    async fn send_new(
        &self,
        pair: &crate::model::Pair,
        bot: &dyn BotSendAPI,
        item: &WorkItem,
        content: MessageContent,
    ) -> Result<(), SendError> {
        let outcome = self.transformer.transform(&pair.filters, content);
        let content = match outcome {
            TransformOutcome::Pass(content) => content,
            TransformOutcome::Filtered(reason) => {
                debug!(pair_id = pair.id, reason, "message filtered, not sending");
                self.bump_counter(pair.id, |c| c.messages_filtered += 1).await;
                return Ok(());
            }
        };

        let reply_to_dest_id = match item.reply_to_source_id {
            Some(source_id) => self.resolve_dest(pair.id, source_id).await,
            None => None,
        };

        let sent = if let Some(media_type) = content.media_type {
            self.send_with_media(pair, bot, media_type, &content, reply_to_dest_id)
                .await?
        } else {
            bot.send_text(pair.dest_chat_id, &content.text, &content.entities, reply_to_dest_id)
                .await?
        };

        let mapping = crate::model::MessageMapping::with_reply(
            pair.id,
            item.source_message_id,
            sent.message_id,
            pair.source_chat_id,
            pair.dest_chat_id,
            pair.bot_index,
            content.media_type,
            item.reply_to_source_id,
            reply_to_dest_id,
        );
        if let Err(e) = self.mappings.insert(mapping).await {
            error!(pair_id = pair.id, error = %e, "failed to persist message mapping");
        }

        self.bump_counter(pair.id, |c| {
            c.messages_copied += 1;
            c.last_activity = Some(Utc::now());
            if item.reply_to_source_id.is_some() && reply_to_dest_id.is_some() {
                c.replies_preserved += 1;
            }
        })
        .await;
        Ok(())
    }

    async fn send_with_media(
        &self,
        pair: &crate::model::Pair,
        bot: &dyn BotSendAPI,
        media_type: MediaType,
        content: &MessageContent,
        reply_to_dest_id: Option<i64>,
    ) -> Result<crate::transport::SentMessage, SendError> {
        let attributes = MediaAttributes {
            media_type,
            file_name: None,
            mime_type: None,
            size_bytes: 0,
        };
        let decision = self.media.evaluate(&pair.filters, attributes, None).await;
        match decision {
            crate::media::MediaDecision::Skip(reason) => {
                debug!(pair_id = pair.id, reason, "media skipped");
                if reason.contains("duplicate") {
                    self.bump_counter(pair.id, |c| c.images_blocked += 1).await;
                } else {
                    self.bump_counter(pair.id, |c| c.messages_filtered += 1).await;
                }
                bot.send_text(pair.dest_chat_id, &content.text, &content.entities, reply_to_dest_id)
                    .await
            }
            crate::media::MediaDecision::Forward(attrs) => {
                bot.send_media(
                    pair.dest_chat_id,
                    attrs.media_type,
                    &[],
                    &content.text,
                    &content.entities,
                    reply_to_dest_id,
                )
                .await
            }
        }
    }

    async fn send_edit(
        &self,
        pair: &crate::model::Pair,
        bot: &dyn BotSendAPI,
        item: &WorkItem,
        content: MessageContent,
    ) -> Result<(), SendError> {
        let outcome = self.transformer.transform(&pair.filters, content);
        let content = match outcome {
            TransformOutcome::Pass(content) => content,
            TransformOutcome::Filtered(_) => return Ok(()),
        };

        let dest_message_id = self.resolve_dest(pair.id, item.source_message_id).await;
        let Some(dest_message_id) = dest_message_id else {
            return Err(SendError::MappingNotFound);
        };

        bot.edit_message_text(pair.dest_chat_id, dest_message_id, &content.text, &content.entities)
            .await?;
        self.bump_counter(pair.id, |c| {
            c.edits_synced += 1;
            c.last_activity = Some(Utc::now());
        })
        .await;
        Ok(())
    }

    async fn send_delete(
        &self,
        pair: &crate::model::Pair,
        bot: &dyn BotSendAPI,
        item: &WorkItem,
    ) -> Result<(), SendError> {
        let dest_message_id = self.resolve_dest(pair.id, item.source_message_id).await;
        let Some(dest_message_id) = dest_message_id else {
            return Err(SendError::MappingNotFound);
        };

        bot.delete_message(pair.dest_chat_id, dest_message_id).await?;
        let _ = self.mappings.delete(pair.id, item.source_message_id).await;
        self.bump_counter(pair.id, |c| {
            c.deletes_synced += 1;
            c.last_activity = Some(Utc::now());
        })
        .await;
        Ok(())
    }

    async fn resolve_dest(&self, pair_id: i64, source_message_id: i64) -> Option<i64> {
        match self.mappings.get(pair_id, source_message_id).await {
            Ok(Some(m)) => Some(m.dest_message_id),
            Ok(None) => None,
            Err(e) => {
                error!(pair_id, error = %e, "mapping lookup failed");
                None
            }
        }
    }

    /// Mutates a pair's in-memory counters and writes the updated pair
    /// straight back through `PairStore`, matching
    /// `original_source/message_processor.py`'s pattern of an
    /// `await self.db_manager.update_pair(pair)` immediately after every
    /// `pair.stats[...]` mutation — without this, every counter bump is
    /// lost on the next process restart or registry `reload()`, since
    /// `PairRegistry::update_counters` only swaps the in-memory snapshot.
    async fn bump_counter(&self, pair_id: i64, f: impl FnOnce(&mut crate::model::PairCounters)) {
        if !self.registry.update_counters(pair_id, f) {
            return;
        }
        if let Some(pair) = self.registry.get(pair_id) {
            if let Err(e) = self.pair_store.upsert(pair).await {
                error!(pair_id, error = %e, "failed to persist updated pair counters");
            }
        }
    }

    async fn record_outcome(&self, bot_index: usize, success: bool) {
        if let Some(metrics) = self.metrics.get(bot_index) {
            let mut metrics = metrics.lock().await;
            if success {
                metrics.record_success();
            } else {
                metrics.record_failure();
            }
        }
    }

    /// Current success-rate EMA for every configured bot, in bot-index
    /// order — `MetricsMonitor`'s success-rate gauge has nothing to
    /// read without this accessor, since `BotMetrics` otherwise lives
    /// entirely behind `WorkerPool`'s own per-bot mutexes.
    pub async fn bot_success_rates(&self) -> Vec<f64> {
        let mut rates = Vec::with_capacity(self.metrics.len());
        for metrics in &self.metrics {
            rates.push(metrics.lock().await.success_rate);
        }
        rates
    }

    /// Re-enqueues `item` with exponential backoff, or drops it once
    /// `max_retries` is exhausted. Returns `true` when the item was
    /// dropped (terminal), `false` when it was handed off for another
    /// attempt — the caller uses this to decide whether the outcome
    /// counts against the bot's success-rate EMA (spec.md §7: only the
    /// last, retries-exhausted attempt counts as a failure).
    async fn retry_or_fail(&self, mut item: WorkItem) -> bool {
        if item.retry_count >= self.max_retries {
            error!(
                pair_id = item.pair_id,
                retry_count = item.retry_count,
                "exceeded max retries, dropping work item"
            );
            self.bump_counter(item.pair_id, |c| c.errors += 1).await;
            let _ = self
                .error_log
                .record(item.pair_id, "exceeded max retries")
                .await;
            return true;
        }

        let delay = backoff_delay(item.retry_count);
        item.retry_count += 1;
        let queue = Arc::clone(&self.queue);
        let item_clone = item.clone_for_retry();
        tokio::spawn(async move {
            sleep(delay).await;
            queue.push(item_clone);
        });
        false
    }
}

/// Exponential backoff with ±10% jitter, capped at `MAX_BACKOFF`.
fn backoff_delay(retry_count: u32) -> Duration {
    let base = INITIAL_BACKOFF.as_millis() as f64 * 2f64.powi(retry_count as i32);
    let base = base.min(MAX_BACKOFF.as_millis() as f64);
    let jitter_fraction = rand::thread_rng().gen_range(-0.1..=0.1);
    let jittered = base * (1.0 + jitter_fraction);
    Duration::from_millis(jittered.max(0.0) as u64)
}

impl WorkItem {
    fn clone_for_retry(&self) -> WorkItem {
        WorkItem {
            pair_id: self.pair_id,
            source_message_id: self.source_message_id,
            priority: self.priority,
            kind: self.kind.clone(),
            enqueued_at: self.enqueued_at,
            retry_count: self.retry_count,
            is_reply: self.is_reply,
            reply_to_source_id: self.reply_to_source_id,
            sequence: 0,
        }
    }
}
