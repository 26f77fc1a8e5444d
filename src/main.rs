use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use tg_relay::config::Config;
use tg_relay::control::AdminApi;
use tg_relay::dispatcher::Dispatcher;
use tg_relay::media::MediaPipeline;
use tg_relay::metrics::MetricsMonitor;
use tg_relay::queue::PriorityQueue;
use tg_relay::ratelimit::RateLimiter;
use tg_relay::registry::PairRegistry;
use tg_relay::store::SqliteStore;
use tg_relay::transform::ContentTransformer;
use tg_relay::transport::{BotSendAPI, TeloxideSendApi};
use tg_relay::worker::WorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        if !e.to_string().contains("No such file or directory") {
            warn!("failed to load .env file: {}", e);
        }
    }

    tg_relay::setup_logging()?;
    info!("starting tg-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!(bots = config.bots.tokens.len(), "configuration loaded");

    let db_path = Config::config_dir().join("tg_relay.db");
    let store = Arc::new(
        SqliteStore::open(&db_path, 4).with_context(|| format!("failed to open store at {}", db_path.display()))?,
    );

    let pairs = store.all().await.context("failed to load pairs from store")?;
    let registry = Arc::new(PairRegistry::new(pairs));

    let queue = Arc::new(PriorityQueue::new(config.dispatch.message_queue_size));
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.rate_limit_messages,
        config.rate_limit.window(),
    ));
    let transformer = Arc::new(ContentTransformer::new());
    let media = Arc::new(MediaPipeline::new());

    let bots: Vec<Arc<dyn BotSendAPI>> = config
        .bots
        .tokens
        .iter()
        .map(|token| Arc::new(TeloxideSendApi::new(token.clone())) as Arc<dyn BotSendAPI>)
        .collect();
    if bots.is_empty() {
        anyhow::bail!("no bot tokens configured; see BOT_TOKENS");
    }

    let system_paused = Arc::new(AtomicBool::new(false));

    let admin = Arc::new(AdminApi::new(
        registry.clone(),
        store.clone(),
        store.clone(),
        system_paused.clone(),
    ));
    admin.load_initial_state().await.context("failed to load admin state")?;

    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), queue.clone(), store.clone()));

    let worker_pool = Arc::new(WorkerPool::new(
        queue.clone(),
        registry.clone(),
        rate_limiter.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        transformer,
        media,
        bots.clone(),
        config.dispatch.max_retries,
        system_paused,
    ));
    let worker_handles = worker_pool.spawn(config.dispatch.max_workers);
    info!(workers = config.dispatch.max_workers, "worker pool started");

    let metrics = Arc::new(
        MetricsMonitor::new(
            queue.clone(),
            registry.clone(),
            rate_limiter.clone(),
            bots,
            config.dispatch.health_check_interval(),
        )
        .context("failed to initialize metrics")?,
    );
    let mut metrics_handles = metrics.clone().spawn();

    // Polls each bot's success-rate EMA out of the worker pool's own
    // metrics state into the prometheus gauge, mirroring the
    // health-probe/queue-watch periodic loops `MetricsMonitor` already
    // runs internally (see `metrics::mod`).
    let success_rate_poll = {
        let worker_pool = worker_pool.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                ticker.tick().await;
                for (bot_index, rate) in worker_pool.bot_success_rates().await.into_iter().enumerate() {
                    metrics.observe_bot_success_rate(bot_index, rate);
                }
            }
        })
    };
    metrics_handles.push(success_rate_poll);

    info!("tg-relay is running; press Ctrl+C to stop");

    // The dispatcher task requires a live `SourceFeed`, which this crate
    // leaves to the embedding application to construct and hand in (see
    // `transport::GrammersSourceFeed` for the concrete adapter) — the
    // user-mode session login flow is an interactive, deployment-specific
    // concern out of this binary's scope.
    let _ = &dispatcher;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    worker_pool.request_shutdown();
    for handle in worker_handles.into_iter().chain(metrics_handles) {
        handle.abort();
        let _ = handle.await;
    }

    info!("tg-relay stopped");
    Ok(())
}
