use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Per-bot sliding-window admission control, with upstream flood-wait
/// integrated as a hard deadline.
///
/// Grounded on `original_source/bot_manager.py`'s per-bot `deque` sliding
/// window (`_check_rate_limit`, evicting timestamps older than
/// `RATE_LIMIT_WINDOW` on every check rather than only on a periodic
/// sweep) and the teacher's
/// `telegram::rate_limiter::MemoryRateLimitBackend`. Uses
/// `tokio::sync::RwLock` + `std::time::Instant`, the teacher's own
/// choice for this kind of in-memory counter.
pub struct RateLimiter {
    max_messages: u32,
    window: Duration,
    windows: RwLock<HashMap<usize, Vec<Instant>>>,
    flood_wait_until: RwLock<HashMap<usize, Instant>>,
}

impl RateLimiter {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            windows: RwLock::new(HashMap::new()),
            flood_wait_until: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `true` if `bot_index` may send right now. Evicts
    /// expired timestamps from the window inline, the same inline
    /// eviction `_check_rate_limit` performs on every call rather than
    /// relying solely on the periodic sweep (see `metrics::sweep`).
    pub async fn admit(&self, bot_index: usize) -> bool {
        if self.is_flood_waited(bot_index).await {
            return false;
        }

        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let timestamps = windows.entry(bot_index).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_messages as usize {
            return false;
        }

        timestamps.push(now);
        true
    }

    /// Records an upstream `FloodWait(seconds)` response, blocking this
    /// bot from `admit` until the wait elapses.
    pub async fn record_flood_wait(&self, bot_index: usize, seconds: u64) {
        let until = Instant::now() + Duration::from_secs(seconds);
        self.flood_wait_until.write().await.insert(bot_index, until);
    }

    pub async fn is_flood_waited(&self, bot_index: usize) -> bool {
        let guard = self.flood_wait_until.read().await;
        match guard.get(&bot_index) {
            Some(until) => Instant::now() < *until,
            None => false,
        }
    }

    /// Periodic reclamation pass: drops empty/expired window entries so
    /// idle bots don't hold memory forever. Not the sole eviction
    /// mechanism — `admit` already evicts inline on every call.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        windows.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });

        let mut flood = self.flood_wait_until.write().await;
        flood.retain(|_, until| now < *until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_the_configured_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.admit(0).await);
        assert!(limiter.admit(0).await);
        assert!(!limiter.admit(0).await);
    }

    #[tokio::test]
    async fn bots_are_tracked_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.admit(0).await);
        assert!(limiter.admit(1).await);
        assert!(!limiter.admit(0).await);
    }

    #[tokio::test]
    async fn flood_wait_blocks_admission_regardless_of_window_state() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        limiter.record_flood_wait(0, 60).await;
        assert!(!limiter.admit(0).await);
    }

    #[tokio::test]
    async fn sweep_does_not_panic_on_empty_state() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        limiter.sweep().await;
    }
}
