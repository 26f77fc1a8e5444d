use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use tokio::sync::Semaphore;
use tracing::info;

use crate::errors::{DispatchError, DispatchResult};
use crate::model::{FilterConfig, Pair, PairCounters, PairStatus, MessageMapping};

use super::{ErrorLog, MappingStore, PairStore, SettingsStore};

/// A bounded pool of WAL-mode SQLite connections backing all four
/// persistence traits.
///
/// Grounded on the teacher's
/// `storage::message_persistence::ConnectionPool`: WAL journal mode, a
/// `tokio::sync::Semaphore`-bounded set of connections handed out and
/// returned on drop. This crate needs far less throughput than the
/// teacher's message-persistence layer, so the pool is simplified to a
/// fixed vector of connections guarded by individual mutexes rather than
/// the teacher's dynamic grow-up-to-max pool.
pub struct SqliteStore {
    connections: Vec<Arc<Mutex<Connection>>>,
    semaphore: Arc<Semaphore>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, pool_size: usize) -> DispatchResult<Self> {
        let path = path.as_ref();
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size.max(1) {
            connections.push(Arc::new(Mutex::new(Self::open_connection(path)?)));
        }
        let store = Self {
            connections,
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
        };
        store.migrate()?;
        info!(path = %path.display(), pool_size, "opened sqlite store");
        Ok(store)
    }

    fn open_connection(path: &Path) -> DispatchResult<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn migrate(&self) -> DispatchResult<()> {
        let conn = self.connections[0].lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pairs (
                id INTEGER PRIMARY KEY,
                source_chat_id INTEGER NOT NULL,
                dest_chat_id INTEGER NOT NULL,
                bot_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                filters TEXT NOT NULL,
                counters TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pairs_source ON pairs(source_chat_id);

            CREATE TABLE IF NOT EXISTS mappings (
                pair_id INTEGER NOT NULL,
                source_message_id INTEGER NOT NULL,
                dest_message_id INTEGER NOT NULL,
                source_chat_id INTEGER NOT NULL DEFAULT 0,
                dest_chat_id INTEGER NOT NULL DEFAULT 0,
                bot_index INTEGER NOT NULL DEFAULT 0,
                media_type TEXT,
                is_reply INTEGER NOT NULL DEFAULT 0,
                reply_to_source_id INTEGER,
                reply_to_dest_id INTEGER,
                created_at TEXT NOT NULL,
                PRIMARY KEY (pair_id, source_message_id)
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS error_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                occurred_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(())
    }

    async fn conn(&self) -> (tokio::sync::SemaphorePermit<'_>, Arc<Mutex<Connection>>) {
        let permit = self.semaphore.acquire().await.expect("semaphore not closed");
        let idx = (rand::random::<usize>()) % self.connections.len();
        (permit, self.connections[idx].clone())
    }
}

#[async_trait]
impl PairStore for SqliteStore {
    async fn all(&self) -> DispatchResult<Vec<Pair>> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, source_chat_id, dest_chat_id, bot_index, status, filters, counters FROM pairs")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(4)?;
            let filters_json: String = row.get(5)?;
            let counters_json: String = row.get(6)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                status,
                filters_json,
                counters_json,
            ))
        })?;

        let mut pairs = Vec::new();
        for row in rows {
            let (id, source_chat_id, dest_chat_id, bot_index, status, filters_json, counters_json) = row?;
            let status = match status.as_str() {
                "active" => PairStatus::Active,
                "paused" => PairStatus::Paused,
                _ => PairStatus::Deleted,
            };
            let filters: FilterConfig = serde_json::from_str(&filters_json)?;
            let counters: PairCounters = serde_json::from_str(&counters_json)?;
            pairs.push(Pair {
                id,
                source_chat_id,
                dest_chat_id,
                bot_index: bot_index as usize,
                status,
                filters,
                counters,
            });
        }
        Ok(pairs)
    }

    async fn upsert(&self, pair: Pair) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        let status = match pair.status {
            PairStatus::Active => "active",
            PairStatus::Paused => "paused",
            PairStatus::Deleted => "deleted",
        };
        conn.execute(
            "INSERT INTO pairs (id, source_chat_id, dest_chat_id, bot_index, status, filters, counters)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                source_chat_id = excluded.source_chat_id,
                dest_chat_id = excluded.dest_chat_id,
                bot_index = excluded.bot_index,
                status = excluded.status,
                filters = excluded.filters,
                counters = excluded.counters",
            params![
                pair.id,
                pair.source_chat_id,
                pair.dest_chat_id,
                pair.bot_index as i64,
                status,
                serde_json::to_string(&pair.filters)?,
                serde_json::to_string(&pair.counters)?,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, pair_id: i64) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        conn.execute("DELETE FROM pairs WHERE id = ?1", params![pair_id])?;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for SqliteStore {
    async fn insert(&self, mapping: MessageMapping) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        let media_type_json = mapping
            .media_type
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO mappings (
                pair_id, source_message_id, dest_message_id,
                source_chat_id, dest_chat_id, bot_index, media_type,
                is_reply, reply_to_source_id, reply_to_dest_id, created_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(pair_id, source_message_id) DO UPDATE SET
                dest_message_id = excluded.dest_message_id,
                source_chat_id = excluded.source_chat_id,
                dest_chat_id = excluded.dest_chat_id,
                bot_index = excluded.bot_index,
                media_type = excluded.media_type,
                is_reply = excluded.is_reply,
                reply_to_source_id = excluded.reply_to_source_id,
                reply_to_dest_id = excluded.reply_to_dest_id,
                created_at = excluded.created_at",
            params![
                mapping.pair_id,
                mapping.source_message_id,
                mapping.dest_message_id,
                mapping.source_chat_id,
                mapping.dest_chat_id,
                mapping.bot_index as i64,
                media_type_json,
                mapping.is_reply,
                mapping.reply_to_source_id,
                mapping.reply_to_dest_id,
                mapping.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, pair_id: i64, source_message_id: i64) -> DispatchResult<Option<MessageMapping>> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT pair_id, source_message_id, dest_message_id,
                    source_chat_id, dest_chat_id, bot_index, media_type,
                    is_reply, reply_to_source_id, reply_to_dest_id, created_at
             FROM mappings
             WHERE pair_id = ?1 AND source_message_id = ?2",
            params![pair_id, source_message_id],
            |row| {
                let bot_index: i64 = row.get(5)?;
                let media_type_json: Option<String> = row.get(6)?;
                let created_at: String = row.get(10)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    bot_index,
                    media_type_json,
                    row.get::<_, bool>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                    row.get::<_, Option<i64>>(9)?,
                    created_at,
                ))
            },
        );
        match result {
            Ok((
                pair_id,
                source_message_id,
                dest_message_id,
                source_chat_id,
                dest_chat_id,
                bot_index,
                media_type_json,
                is_reply,
                reply_to_source_id,
                reply_to_dest_id,
                created_at,
            )) => {
                let media_type = media_type_json
                    .map(|j| serde_json::from_str(&j))
                    .transpose()?;
                Ok(Some(MessageMapping {
                    pair_id,
                    source_message_id,
                    dest_message_id,
                    source_chat_id,
                    dest_chat_id,
                    bot_index: bot_index as usize,
                    media_type,
                    is_reply,
                    reply_to_source_id,
                    reply_to_dest_id,
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DispatchError::from(e)),
        }
    }

    async fn delete(&self, pair_id: i64, source_message_id: i64) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        conn.execute(
            "DELETE FROM mappings WHERE pair_id = ?1 AND source_message_id = ?2",
            params![pair_id, source_message_id],
        )?;
        Ok(())
    }

    async fn delete_by_pair(&self, pair_id: i64) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        conn.execute("DELETE FROM mappings WHERE pair_id = ?1", params![pair_id])?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get(&self, key: &str) -> DispatchResult<Option<String>> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        let result = conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
            row.get::<_, String>(0)
        });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DispatchError::from(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ErrorLog for SqliteStore {
    async fn record(&self, pair_id: i64, message: &str) -> DispatchResult<()> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO error_log (pair_id, message) VALUES (?1, ?2)",
            params![pair_id, message],
        )?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> DispatchResult<Vec<(i64, String)>> {
        let (_permit, conn) = self.conn().await;
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pair_id, message FROM error_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PairCounters;

    #[tokio::test]
    async fn round_trips_a_pair_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db"), 2).unwrap();

        let pair = Pair {
            id: 1,
            source_chat_id: 10,
            dest_chat_id: 20,
            bot_index: 0,
            status: PairStatus::Active,
            filters: FilterConfig::default(),
            counters: PairCounters::default(),
        };
        store.upsert(pair.clone()).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].source_chat_id, 10);
    }

    #[tokio::test]
    async fn mapping_insert_enforces_pair_and_source_message_uniqueness() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db"), 2).unwrap();

        store.insert(MessageMapping::new(1, 100, 200)).await.unwrap();
        store.insert(MessageMapping::new(1, 100, 999)).await.unwrap();

        let mapping = store.get(1, 100).await.unwrap().unwrap();
        assert_eq!(mapping.dest_message_id, 999);
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("test.db"), 2).unwrap();

        assert_eq!(store.get("system_paused").await.unwrap(), None);
        store.set("system_paused", "true").await.unwrap();
        assert_eq!(store.get("system_paused").await.unwrap(), Some("true".to_string()));
    }
}
