mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::model::{MessageMapping, Pair};

/// Records destination message ids for replicated source messages, and
/// answers the lookups `Dispatcher` needs to propagate edits/deletes.
///
/// Grounded on `original_source`'s `db_manager.save_message_mapping` /
/// `get_message_mapping` (referenced from `message_processor.py`,
/// backing store not retrieved — its shape is inferred from its
/// callers).
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Enforces the `(source_message_id, pair_id)` uniqueness invariant;
    /// an insert for an already-mapped pair replaces the prior mapping.
    async fn insert(&self, mapping: MessageMapping) -> DispatchResult<()>;

    async fn get(&self, pair_id: i64, source_message_id: i64) -> DispatchResult<Option<MessageMapping>>;

    async fn delete(&self, pair_id: i64, source_message_id: i64) -> DispatchResult<()>;

    /// Purges every mapping for a pair — the explicit opt-in cascade
    /// spec.md's pair-deletion Open Question resolves in favor of
    /// (retain by default; purge only on request).
    async fn delete_by_pair(&self, pair_id: i64) -> DispatchResult<()>;
}

/// Persists the configured replication pairs `PairRegistry` loads at
/// startup and reloads from after a control-plane mutation.
///
/// Grounded on `bot_manager.py`'s `get_pairs` / `update_pair` /
/// `add_pair` / `delete_pair` calls against its database layer.
#[async_trait]
pub trait PairStore: Send + Sync {
    async fn all(&self) -> DispatchResult<Vec<Pair>>;

    async fn upsert(&self, pair: Pair) -> DispatchResult<()>;

    /// Does not cascade into `MappingStore` — see the pair-deletion
    /// retention note in `MappingStore::delete_by_pair`.
    async fn delete(&self, pair_id: i64) -> DispatchResult<()>;
}

/// Small persisted key-value surface for engine-wide settings the
/// control plane toggles (system pause, bot rebalance intent).
///
/// Grounded on `bot_manager.py`'s `_cmd_pause` / `_cmd_resume`, which
/// persist a system-paused flag the worker loop checks on every
/// iteration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> DispatchResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> DispatchResult<()>;
}

/// Append-only log of terminal send failures, surfaced read-only
/// through `control::AdminApi` for operator visibility.
///
/// Grounded on `bot_manager.py`'s failure logging in
/// `_process_queued_message`'s terminal-error branch.
#[async_trait]
pub trait ErrorLog: Send + Sync {
    async fn record(&self, pair_id: i64, message: &str) -> DispatchResult<()>;

    async fn recent(&self, limit: usize) -> DispatchResult<Vec<(i64, String)>>;
}
