use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus::{GaugeVec, Opts, Registry};
use tokio::time::interval;
use tracing::{info, warn};

use crate::queue::PriorityQueue;
use crate::ratelimit::RateLimiter;
use crate::registry::PairRegistry;
use crate::transport::BotSendAPI;

const QUEUE_WATCH_INTERVAL: Duration = Duration::from_secs(30);
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Queue saturation fraction above which a warning is logged, matching
/// `original_source/bot_manager.py`'s `_queue_monitor` 80% watermark.
const QUEUE_WARNING_THRESHOLD: f64 = 0.8;

/// Owns the prometheus registry and the three periodic sweeps that keep
/// engine state healthy and observable: health probing, queue-depth
/// watching, and rate-limiter memory reclamation.
///
/// Grounded on `original_source/bot_manager.py`'s `_health_monitor` /
/// `_queue_monitor` / `_rate_limit_monitor` background tasks, and the
/// teacher's `utils::monitoring` for the prometheus gauge/counter idiom.
pub struct MetricsMonitor {
    registry: Registry,
    queue_depth: GaugeVec,
    queue_dropped_total: GaugeVec,
    bot_success_rate: GaugeVec,
    bot_consecutive_failures: GaugeVec,

    queue: Arc<PriorityQueue>,
    pair_registry: Arc<PairRegistry>,
    rate_limiter: Arc<RateLimiter>,
    bots: Vec<Arc<dyn BotSendAPI>>,
    health_check_interval: Duration,
    consecutive_failures: Vec<AtomicU32>,
}

impl MetricsMonitor {
    pub fn new(
        queue: Arc<PriorityQueue>,
        pair_registry: Arc<PairRegistry>,
        rate_limiter: Arc<RateLimiter>,
        bots: Vec<Arc<dyn BotSendAPI>>,
        health_check_interval: Duration,
    ) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let queue_depth = GaugeVec::new(
            Opts::new("dispatch_queue_depth", "Current number of items in the priority queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let queue_dropped_total = GaugeVec::new(
            Opts::new("dispatch_queue_dropped_total", "Cumulative items dropped due to queue overflow"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_dropped_total.clone()))?;

        let bot_success_rate = GaugeVec::new(
            Opts::new("dispatch_bot_success_rate", "Exponential moving average of per-bot send success"),
            &["bot_index"],
        )?;
        registry.register(Box::new(bot_success_rate.clone()))?;

        let bot_consecutive_failures = GaugeVec::new(
            Opts::new(
                "dispatch_bot_consecutive_health_failures",
                "Consecutive failed health-probe identity calls for a bot",
            ),
            &["bot_index"],
        )?;
        registry.register(Box::new(bot_consecutive_failures.clone()))?;

        let consecutive_failures = (0..bots.len()).map(|_| AtomicU32::new(0)).collect();

        Ok(Self {
            registry,
            queue_depth,
            queue_dropped_total,
            bot_success_rate,
            bot_consecutive_failures,
            queue,
            pair_registry,
            rate_limiter,
            bots,
            health_check_interval,
            consecutive_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Spawns the health-probe, queue-watch, and rate-limit-sweep
    /// periodic tasks. Metrics are exposed via `registry()` for an
    /// embedding HTTP endpoint to scrape — this crate does not run its
    /// own metrics server (see SPEC_FULL.md Non-goals on the
    /// admin/control surface).
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let health_probe = {
            let monitor = self.clone();
            tokio::spawn(async move { monitor.health_probe_loop().await })
        };
        let queue_watch = {
            let monitor = self.clone();
            tokio::spawn(async move { monitor.queue_watch_loop().await })
        };
        let rate_limit_sweep = {
            let monitor = self.clone();
            tokio::spawn(async move { monitor.rate_limit_sweep_loop().await })
        };
        vec![health_probe, queue_watch, rate_limit_sweep]
    }

    /// Every `health_check_interval`, issues a lightweight identity call
    /// against each bot: a success resets its `consecutive_failures`
    /// counter to zero, a failure increments it. Grounded on
    /// `original_source/bot_manager.py`'s `_health_monitor`.
    async fn health_probe_loop(&self) {
        if self.bots.is_empty() {
            return;
        }
        let mut ticker = interval(self.health_check_interval);
        loop {
            ticker.tick().await;
            for (index, bot) in self.bots.iter().enumerate() {
                let failures = match bot.get_me().await {
                    Ok(_) => {
                        self.consecutive_failures[index].store(0, Ordering::Relaxed);
                        0
                    }
                    Err(e) => {
                        let count = self.consecutive_failures[index].fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(bot_index = index, error = %e, consecutive_failures = count, "bot health probe failed");
                        count
                    }
                };
                self.bot_consecutive_failures
                    .with_label_values(&[&index.to_string()])
                    .set(failures as f64);
            }
        }
    }

    async fn queue_watch_loop(&self) {
        let mut ticker = interval(QUEUE_WATCH_INTERVAL);
        loop {
            ticker.tick().await;
            let depth = self.queue.len();
            let saturation = self.queue.saturation();
            self.queue_depth.with_label_values(&["dispatch"]).set(depth as f64);
            self.queue_dropped_total
                .with_label_values(&["dispatch"])
                .set(self.queue.dropped_count() as f64);

            if saturation >= QUEUE_WARNING_THRESHOLD {
                warn!(depth, saturation, "priority queue nearing capacity");
            }
        }
    }

    async fn rate_limit_sweep_loop(&self) {
        let mut ticker = interval(RATE_LIMIT_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.rate_limiter.sweep().await;
        }
    }

    /// Records a bot's current success-rate EMA for scraping. Called by
    /// `main`'s success-rate poll ticker, which reads
    /// `WorkerPool::bot_success_rates` on the same cadence as the
    /// queue-watch sweep and feeds each bot's value through here.
    pub fn observe_bot_success_rate(&self, bot_index: usize, success_rate: f64) {
        self.bot_success_rate
            .with_label_values(&[&bot_index.to_string()])
            .set(success_rate);
    }

    /// One-shot health snapshot: active pair count and current queue
    /// depth, matching the shape of `_health_monitor`'s log line.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            active_pairs: self.pair_registry.all().iter().filter(|p| p.is_active()).count(),
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
        }
    }

    pub async fn log_health(&self) {
        let snapshot = self.health_snapshot();
        info!(
            active_pairs = snapshot.active_pairs,
            queue_depth = snapshot.queue_depth,
            queue_capacity = snapshot.queue_capacity,
            "health check"
        );
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub active_pairs: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterConfig, Pair, PairCounters, PairStatus};

    #[test]
    fn health_snapshot_reflects_active_pair_count() {
        let queue = Arc::new(PriorityQueue::new(10));
        let registry = Arc::new(PairRegistry::new(vec![Pair {
            id: 1,
            source_chat_id: 10,
            dest_chat_id: 20,
            bot_index: 0,
            status: PairStatus::Active,
            filters: FilterConfig::default(),
            counters: PairCounters::default(),
        }]));
        let rate_limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60)));
        let monitor =
            MetricsMonitor::new(queue, registry, rate_limiter, Vec::new(), Duration::from_secs(60)).unwrap();

        let snapshot = monitor.health_snapshot();
        assert_eq!(snapshot.active_pairs, 1);
        assert_eq!(snapshot.queue_capacity, 10);
    }
}
