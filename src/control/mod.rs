use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::errors::{DispatchError, DispatchResult};
use crate::model::Pair;
use crate::registry::PairRegistry;
use crate::store::{PairStore, SettingsStore};

/// The mutation surface an (out-of-core) admin/control plane drives.
///
/// Grounded on `original_source/bot_manager.py`'s command handlers
/// (`_cmd_add_pair`, `_cmd_delete_pair`, `_cmd_pause`, `_cmd_resume`,
/// `_cmd_rebalance`), reduced to the plain methods those handlers call —
/// this crate does not parse or dispatch Telegram commands itself (see
/// SPEC_FULL.md Non-goals).
pub struct AdminApi {
    registry: Arc<PairRegistry>,
    pair_store: Arc<dyn PairStore>,
    settings: Arc<dyn SettingsStore>,
    system_paused: Arc<AtomicBool>,
}

const SYSTEM_PAUSED_KEY: &str = "system_paused";

impl AdminApi {
    pub fn new(
        registry: Arc<PairRegistry>,
        pair_store: Arc<dyn PairStore>,
        settings: Arc<dyn SettingsStore>,
        system_paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            pair_store,
            settings,
            system_paused,
        }
    }

    /// Loads the persisted pause flag at startup, so a restart preserves
    /// operator intent.
    pub async fn load_initial_state(&self) -> DispatchResult<()> {
        let paused = self.settings.get(SYSTEM_PAUSED_KEY).await?;
        self.system_paused
            .store(paused.as_deref() == Some("true"), Ordering::SeqCst);
        Ok(())
    }

    pub async fn add_pair(&self, pair: Pair) -> DispatchResult<()> {
        self.pair_store.upsert(pair).await?;
        self.reload().await
    }

    pub async fn update_pair(&self, pair: Pair) -> DispatchResult<()> {
        self.pair_store.upsert(pair).await?;
        self.reload().await
    }

    /// Per spec.md's pair-deletion Open Question: removes the pair from
    /// the active set but does not purge its historical mappings —
    /// callers wanting that must invoke `MappingStore::delete_by_pair`
    /// separately.
    pub async fn delete_pair(&self, pair_id: i64) -> DispatchResult<()> {
        self.pair_store.delete(pair_id).await?;
        self.reload().await
    }

    pub async fn set_paused(&self, paused: bool) -> DispatchResult<()> {
        self.settings
            .set(SYSTEM_PAUSED_KEY, if paused { "true" } else { "false" })
            .await?;
        self.system_paused.store(paused, Ordering::SeqCst);
        info!(paused, "system pause state changed");
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.system_paused.load(Ordering::Relaxed)
    }

    /// In-memory-only bot reassignment. Per spec.md §9 this is flagged
    /// as likely a bug in the original and deliberately not fixed here:
    /// the reassignment does not persist, and a later `reload()` reverts
    /// it (see `DESIGN.md`).
    pub fn rebalance(&self, pair_id: i64, new_bot_index: usize) -> DispatchResult<()> {
        if self.registry.reassign_bot(pair_id, new_bot_index) {
            Ok(())
        } else {
            Err(DispatchError::PairNotFound(pair_id))
        }
    }

    /// Reloads the registry's snapshot from the persisted pair set.
    pub async fn reload(&self) -> DispatchResult<()> {
        let pairs = self.pair_store.all().await?;
        self.registry.reload(pairs);
        Ok(())
    }

    pub fn pair_status(&self, pair_id: i64) -> Option<Pair> {
        self.registry.get(pair_id)
    }

    pub fn all_pairs(&self) -> Vec<Pair> {
        self.registry.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterConfig, PairCounters, PairStatus};
    use crate::store::MemoryStore;

    fn pair(id: i64) -> Pair {
        Pair {
            id,
            source_chat_id: 10,
            dest_chat_id: 20,
            bot_index: 0,
            status: PairStatus::Active,
            filters: FilterConfig::default(),
            counters: PairCounters::default(),
        }
    }

    #[tokio::test]
    async fn add_pair_is_visible_through_the_registry_after_reload() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PairRegistry::new(Vec::new()));
        let admin = AdminApi::new(registry.clone(), store.clone(), store.clone(), Arc::new(AtomicBool::new(false)));

        admin.add_pair(pair(1)).await.unwrap();
        assert!(admin.pair_status(1).is_some());
    }

    #[tokio::test]
    async fn set_paused_persists_and_flips_the_flag() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PairRegistry::new(Vec::new()));
        let flag = Arc::new(AtomicBool::new(false));
        let admin = AdminApi::new(registry, store.clone(), store.clone(), flag.clone());

        admin.set_paused(true).await.unwrap();
        assert!(admin.is_paused());
        assert_eq!(store.get(SYSTEM_PAUSED_KEY).await.unwrap(), Some("true".to_string()));
    }

    #[tokio::test]
    async fn delete_pair_does_not_purge_mappings_on_its_own() {
        // AdminApi only touches PairStore/registry; MappingStore purging
        // is a separate, explicit call by design (see module docs).
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PairRegistry::new(vec![pair(1)]));
        let admin = AdminApi::new(registry, store.clone(), store.clone(), Arc::new(AtomicBool::new(false)));
        store.upsert(pair(1)).await.unwrap();

        admin.delete_pair(1).await.unwrap();
        assert!(admin.pair_status(1).is_none());
    }
}
