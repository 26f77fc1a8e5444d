use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::DispatchResult;
use crate::model::{MessageMapping, Pair};

use super::{ErrorLog, MappingStore, PairStore, SettingsStore};

/// `HashMap`-backed implementation of all four persistence traits, used
/// by the engine's own unit tests so dispatch logic doesn't depend on
/// sqlite file I/O.
///
/// Grounded on the shape of the trait interfaces themselves — no
/// external precedent needed, same role the teacher's in-memory test
/// fixtures play around its `ConnectionPool`-backed tests.
#[derive(Default)]
pub struct MemoryStore {
    pairs: Mutex<HashMap<i64, Pair>>,
    mappings: Mutex<HashMap<(i64, i64), MessageMapping>>,
    settings: Mutex<HashMap<String, String>>,
    errors: Mutex<Vec<(i64, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PairStore for MemoryStore {
    async fn all(&self) -> DispatchResult<Vec<Pair>> {
        Ok(self.pairs.lock().await.values().cloned().collect())
    }

    async fn upsert(&self, pair: Pair) -> DispatchResult<()> {
        self.pairs.lock().await.insert(pair.id, pair);
        Ok(())
    }

    async fn delete(&self, pair_id: i64) -> DispatchResult<()> {
        self.pairs.lock().await.remove(&pair_id);
        Ok(())
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn insert(&self, mapping: MessageMapping) -> DispatchResult<()> {
        self.mappings
            .lock()
            .await
            .insert((mapping.pair_id, mapping.source_message_id), mapping);
        Ok(())
    }

    async fn get(&self, pair_id: i64, source_message_id: i64) -> DispatchResult<Option<MessageMapping>> {
        Ok(self.mappings.lock().await.get(&(pair_id, source_message_id)).cloned())
    }

    async fn delete(&self, pair_id: i64, source_message_id: i64) -> DispatchResult<()> {
        self.mappings.lock().await.remove(&(pair_id, source_message_id));
        Ok(())
    }

    async fn delete_by_pair(&self, pair_id: i64) -> DispatchResult<()> {
        self.mappings.lock().await.retain(|(p, _), _| *p != pair_id);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str) -> DispatchResult<Option<String>> {
        Ok(self.settings.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> DispatchResult<()> {
        self.settings.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl ErrorLog for MemoryStore {
    async fn record(&self, pair_id: i64, message: &str) -> DispatchResult<()> {
        self.errors.lock().await.push((pair_id, message.to_string()));
        Ok(())
    }

    async fn recent(&self, limit: usize) -> DispatchResult<Vec<(i64, String)>> {
        let errors = self.errors.lock().await;
        Ok(errors.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterConfig, PairCounters, PairStatus};

    #[tokio::test]
    async fn mapping_delete_by_pair_purges_only_that_pair() {
        let store = MemoryStore::new();
        store.insert(MessageMapping::new(1, 100, 200)).await.unwrap();
        store.insert(MessageMapping::new(2, 100, 300)).await.unwrap();

        store.delete_by_pair(1).await.unwrap();

        assert!(store.get(1, 100).await.unwrap().is_none());
        assert!(store.get(2, 100).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pair_delete_does_not_cascade_into_mappings() {
        let store = MemoryStore::new();
        let pair = Pair {
            id: 1,
            source_chat_id: 10,
            dest_chat_id: 20,
            bot_index: 0,
            status: PairStatus::Active,
            filters: FilterConfig::default(),
            counters: PairCounters::default(),
        };
        store.upsert(pair).await.unwrap();
        store.insert(MessageMapping::new(1, 100, 200)).await.unwrap();

        PairStore::delete(&store, 1).await.unwrap();

        assert!(store.get(1, 100).await.unwrap().is_some());
    }
}
