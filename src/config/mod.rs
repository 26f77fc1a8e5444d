use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// All configuration recognized by the dispatch engine (spec.md §6).
///
/// Loaded from a TOML file on disk, then overridden field-by-field from
/// environment variables — the same two-stage load the teacher's
/// `Config::load` performs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source: SourceConfig,
    pub bots: BotsConfig,
    pub dispatch: DispatchConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub api_id: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_number: String,
    pub session_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotsConfig {
    /// Ordered bot tokens; a bot's index in this list is its identity
    /// everywhere else in the engine (`BotMetrics`, `RateLimiter`, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    pub max_workers: usize,
    pub message_queue_size: usize,
    pub max_retries: u32,
    pub health_check_interval_secs: u64,
}

impl DispatchConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub rate_limit_messages: u32,
    pub rate_limit_window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub health_check_port: u16,
    pub enable_metrics_server: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Control-plane ACL. Empty means open (anyone may issue admin mutations).
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                api_id: 0,
                api_hash: String::new(),
                phone_number: String::new(),
                session_file: Self::config_dir().join("source.session"),
            },
            bots: BotsConfig { tokens: Vec::new() },
            dispatch: DispatchConfig {
                max_workers: 8,
                message_queue_size: 1000,
                max_retries: 3,
                health_check_interval_secs: 60,
            },
            rate_limit: RateLimitConfig {
                rate_limit_messages: 20,
                rate_limit_window_secs: 60,
            },
            monitoring: MonitoringConfig {
                health_check_port: 9090,
                enable_metrics_server: true,
            },
            admin: AdminConfig {
                admin_user_ids: Vec::new(),
            },
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_dir.join(".tg_relay")
    }

    pub fn load() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_file = config_dir.join("config.toml");

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed to create config directory: {}", config_dir.display()))?;

        let mut config = if config_file.exists() {
            info!("loading configuration from {}", config_file.display());
            let content = fs::read_to_string(&config_file)
                .with_context(|| format!("failed to read config file: {}", config_file.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", config_file.display()))?
        } else {
            warn!("config file not found, writing defaults to {}", config_file.display());
            let default_config = Self::default();
            default_config.save(&config_file)?;
            default_config
        };

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize configuration")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        info!("configuration saved to {}", path.display());
        Ok(())
    }

    fn load_from_env(&mut self) -> Result<()> {
        if let Ok(tokens) = std::env::var("BOT_TOKENS") {
            self.bots.tokens = tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(api_id) = std::env::var("API_ID") {
            self.source.api_id = api_id.parse().context("API_ID must be an integer")?;
        }
        if let Ok(api_hash) = std::env::var("API_HASH") {
            self.source.api_hash = api_hash;
        }
        if let Ok(phone) = std::env::var("PHONE_NUMBER") {
            self.source.phone_number = phone;
        }
        if let Ok(v) = std::env::var("MAX_WORKERS") {
            self.dispatch.max_workers = v.parse().context("MAX_WORKERS must be an integer")?;
        }
        if let Ok(v) = std::env::var("MESSAGE_QUEUE_SIZE") {
            self.dispatch.message_queue_size = v.parse().context("MESSAGE_QUEUE_SIZE must be an integer")?;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_MESSAGES") {
            self.rate_limit.rate_limit_messages = v.parse().context("RATE_LIMIT_MESSAGES must be an integer")?;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_WINDOW") {
            self.rate_limit.rate_limit_window_secs = v.parse().context("RATE_LIMIT_WINDOW must be an integer")?;
        }
        if let Ok(v) = std::env::var("HEALTH_CHECK_INTERVAL") {
            self.dispatch.health_check_interval_secs =
                v.parse().context("HEALTH_CHECK_INTERVAL must be an integer")?;
        }
        if let Ok(ids) = std::env::var("ADMIN_USER_IDS") {
            if !ids.is_empty() {
                self.admin.admin_user_ids = ids
                    .split(',')
                    .map(|s| s.trim().parse::<i64>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("ADMIN_USER_IDS must be a comma-separated list of integers")?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.bots.tokens.is_empty() {
            anyhow::bail!("at least one bot token is required; set BOT_TOKENS or [bots].tokens");
        }
        if self.dispatch.max_workers == 0 {
            anyhow::bail!("MAX_WORKERS must be at least 1");
        }
        if self.dispatch.message_queue_size == 0 {
            anyhow::bail!("MESSAGE_QUEUE_SIZE must be at least 1");
        }
        if self.rate_limit.rate_limit_messages == 0 {
            anyhow::bail!("RATE_LIMIT_MESSAGES must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(config.dispatch.max_workers > 0);
        assert!(config.dispatch.message_queue_size > 0);
        assert!(config.rate_limit.rate_limit_messages > 0);
    }

    #[test]
    fn validate_rejects_empty_bot_tokens() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_a_configured_bot() {
        let mut config = Config::default();
        config.bots.tokens.push("123:abc".to_string());
        assert!(config.validate().is_ok());
    }
}
