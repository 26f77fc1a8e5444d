use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::MediaType;

fn default_true() -> bool {
    true
}

/// Operational state of a replication pair.
///
/// Grounded on `original_source/bot_manager.py`'s pair status checks
/// (`pair.status == "active"` gating in `_handle_new_message`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Active,
    Paused,
    Deleted,
}

impl Default for PairStatus {
    fn default() -> Self {
        PairStatus::Active
    }
}

/// Content filtering rules applied by `ContentTransformer` before dispatch.
///
/// Grounded on `message_processor.py`'s `_process_message_content`
/// (header/footer/mention stripping, keyword block list) and
/// `_get_media_type` (`allowed_media_types` gating consumed by
/// `MediaPipeline`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Whether `Dispatcher` routes `MessageEdited` events for this pair.
    /// Defaults to true per spec.md §3.
    #[serde(default = "default_true")]
    pub sync_edits: bool,
    /// Whether `Dispatcher` routes `MessagesDeleted` events for this
    /// pair. Defaults to false per spec.md §3 — deletion propagation is
    /// opt-in.
    #[serde(default)]
    pub sync_deletes: bool,
    /// Whether a reply's priority is bumped to `High` and its
    /// reply-to-destination thread resolved before sending. Defaults to
    /// true.
    #[serde(default = "default_true")]
    pub preserve_replies: bool,
    /// Header lines to strip by regex pattern (multi-line mode); falls
    /// back to the built-in defaults in `transform` when empty.
    #[serde(default)]
    pub header_patterns: Vec<String>,
    /// Footer lines to strip by regex pattern (multi-line mode); falls
    /// back to the built-in defaults in `transform` when empty.
    #[serde(default)]
    pub footer_patterns: Vec<String>,
    #[serde(default)]
    pub strip_mentions: bool,
    /// Replacement text for a stripped mention; empty string removes it
    /// outright.
    #[serde(default)]
    pub mention_placeholder: String,
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub allowed_media_types: Option<Vec<MediaType>>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sync_edits: true,
            sync_deletes: false,
            preserve_replies: true,
            header_patterns: Vec::new(),
            footer_patterns: Vec::new(),
            strip_mentions: false,
            mention_placeholder: String::new(),
            blocked_keywords: Vec::new(),
            min_length: None,
            max_length: None,
            allowed_media_types: None,
        }
    }
}

/// Per-pair counters, maintained by the worker pool and surfaced through
/// `control::AdminApi`'s read-only status query.
///
/// Grounded on `bot_manager.py`'s `MessagePair.messages_forwarded` /
/// `messages_failed` bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairCounters {
    pub messages_copied: u64,
    pub messages_filtered: u64,
    pub edits_synced: u64,
    pub deletes_synced: u64,
    pub replies_preserved: u64,
    pub images_blocked: u64,
    pub errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// A single source-chat -> destination-chat replication route, bound to
/// one bot identity from the configured pool.
///
/// Grounded on `bot_manager.py`'s `MessagePair` dataclass
/// (`source_chat_id`, `dest_chat_id`, `bot_index`, `status`, `filters`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub id: i64,
    pub source_chat_id: i64,
    pub dest_chat_id: i64,
    pub bot_index: usize,
    #[serde(default)]
    pub status: PairStatus,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub counters: PairCounters,
}

impl Pair {
    pub fn is_active(&self) -> bool {
        matches!(self.status, PairStatus::Active)
    }
}
