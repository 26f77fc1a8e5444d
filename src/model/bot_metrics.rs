use chrono::{DateTime, Utc};

/// Rolling health metrics for one bot identity in the pool.
///
/// Grounded on `bot_manager.py`'s `BotMetrics` dataclass
/// (`update_success_rate` exponential moving average, `rate_limit_until`
/// flood-wait deadline) and the teacher's
/// `telegram::multi_token_system::TokenMetrics`.
#[derive(Debug, Clone)]
pub struct BotMetrics {
    pub bot_index: usize,
    pub messages_sent: u64,
    pub messages_failed: u64,
    /// Exponential moving average of send success, in `[0.0, 1.0]`.
    pub success_rate: f64,
    /// Set by a `SendError::FloodWait` response; `None` once it elapses.
    pub rate_limit_until: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Smoothing factor for the success-rate EMA, matching `bot_manager.py`'s
/// `_ALPHA = 0.1`.
const SUCCESS_RATE_ALPHA: f64 = 0.1;

impl BotMetrics {
    pub fn new(bot_index: usize) -> Self {
        Self {
            bot_index,
            messages_sent: 0,
            messages_failed: 0,
            success_rate: 1.0,
            rate_limit_until: None,
            last_used: None,
        }
    }

    pub fn record_success(&mut self) {
        self.messages_sent += 1;
        self.last_used = Some(Utc::now());
        self.success_rate =
            SUCCESS_RATE_ALPHA * 1.0 + (1.0 - SUCCESS_RATE_ALPHA) * self.success_rate;
    }

    pub fn record_failure(&mut self) {
        self.messages_failed += 1;
        self.last_used = Some(Utc::now());
        self.success_rate = SUCCESS_RATE_ALPHA * 0.0 + (1.0 - SUCCESS_RATE_ALPHA) * self.success_rate;
    }

    pub fn set_rate_limited_until(&mut self, until: DateTime<Utc>) {
        self.rate_limit_until = Some(until);
    }

    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        match self.rate_limit_until {
            Some(until) => now < until,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_starts_optimistic() {
        let m = BotMetrics::new(0);
        assert_eq!(m.success_rate, 1.0);
    }

    #[test]
    fn repeated_failures_drag_success_rate_down() {
        let mut m = BotMetrics::new(0);
        for _ in 0..20 {
            m.record_failure();
        }
        assert!(m.success_rate < 0.2);
    }

    #[test]
    fn rate_limit_expires() {
        let mut m = BotMetrics::new(0);
        let now = Utc::now();
        m.set_rate_limited_until(now + chrono::Duration::seconds(30));
        assert!(m.is_rate_limited(now));
        assert!(!m.is_rate_limited(now + chrono::Duration::seconds(31)));
    }
}
