//! Durable persistence of a topic's source text and file names.
//!
//! Each topic is stored as two string entries in a key/value space:
//!
//! | Key | Value |
//! |-----|-------|
//! | `source_text:<topic>` | concatenated document text |
//! | `file_names:<topic>` | original file names joined with `", "` |
//!
//! A topic missing either entry is treated as empty. Writes are
//! last-write-wins with no versioning. The store holds text only, never
//! document bytes, so a rehydrated topic cannot produce highlightable views.
//!
//! Persistence is best-effort: callers log a [`PersistenceError`] and carry
//! on with their in-memory state.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::PersistenceError;

const FILE_NAME_SEPARATOR: &str = ", ";

/// What the store remembers about a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTopic {
    pub source_text: String,
    pub file_names: Vec<String>,
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn save(
        &self,
        topic_id: &str,
        source_text: &str,
        file_names: &[String],
    ) -> Result<(), PersistenceError>;

    async fn load(&self, topic_id: &str) -> Result<Option<StoredTopic>, PersistenceError>;

    async fn clear(&self, topic_id: &str) -> Result<(), PersistenceError>;
}

fn source_key(topic_id: &str) -> String {
    format!("source_text:{topic_id}")
}

fn names_key(topic_id: &str) -> String {
    format!("file_names:{topic_id}")
}

fn join_file_names(file_names: &[String]) -> String {
    file_names.join(FILE_NAME_SEPARATOR)
}

fn split_file_names(joined: &str) -> Vec<String> {
    joined
        .split(FILE_NAME_SEPARATOR)
        .map(str::to_string)
        .collect()
}

fn check_quota(key: &str, value: &str, limit: usize) -> Result<(), PersistenceError> {
    if value.len() > limit {
        return Err(PersistenceError::QuotaExceeded {
            key: key.to_string(),
            bytes: value.len(),
            limit,
        });
    }
    Ok(())
}

fn assemble(source_text: Option<String>, joined_names: Option<String>) -> Option<StoredTopic> {
    match (source_text, joined_names) {
        (Some(source_text), Some(joined)) if !source_text.is_empty() && !joined.is_empty() => {
            Some(StoredTopic {
                source_text,
                file_names: split_file_names(&joined),
            })
        }
        _ => None,
    }
}

// ============ SQLite ============

/// [`TopicStore`] backed by the `kv_entries` table.
pub struct SqliteTopicStore {
    pool: SqlitePool,
    max_entry_bytes: usize,
}

impl SqliteTopicStore {
    /// Expects [`run_migrations`](crate::migrate::run_migrations) to have run on `pool`.
    pub fn new(pool: SqlitePool, max_entry_bytes: usize) -> Self {
        Self {
            pool,
            max_entry_bytes,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}

#[async_trait]
impl TopicStore for SqliteTopicStore {
    async fn save(
        &self,
        topic_id: &str,
        source_text: &str,
        file_names: &[String],
    ) -> Result<(), PersistenceError> {
        let source_key = source_key(topic_id);
        let names_key = names_key(topic_id);
        let joined = join_file_names(file_names);
        check_quota(&source_key, source_text, self.max_entry_bytes)?;
        check_quota(&names_key, &joined, self.max_entry_bytes)?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(&source_key, source_text), (&names_key, joined.as_str())] {
            sqlx::query(
                r#"
                INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, topic_id: &str) -> Result<Option<StoredTopic>, PersistenceError> {
        let source_text = self.get(&source_key(topic_id)).await?;
        let joined = self.get(&names_key(topic_id)).await?;
        Ok(assemble(source_text, joined))
    }

    async fn clear(&self, topic_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM kv_entries WHERE key IN (?, ?)")
            .bind(source_key(topic_id))
            .bind(names_key(topic_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============ In-memory ============

/// [`TopicStore`] kept in process memory, for tests and throwaway sessions.
pub struct MemoryTopicStore {
    entries: RwLock<HashMap<String, String>>,
    max_entry_bytes: usize,
}

impl MemoryTopicStore {
    pub fn new(max_entry_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entry_bytes,
        }
    }
}

impl Default for MemoryTopicStore {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[async_trait]
impl TopicStore for MemoryTopicStore {
    async fn save(
        &self,
        topic_id: &str,
        source_text: &str,
        file_names: &[String],
    ) -> Result<(), PersistenceError> {
        let source_key = source_key(topic_id);
        let names_key = names_key(topic_id);
        let joined = join_file_names(file_names);
        check_quota(&source_key, source_text, self.max_entry_bytes)?;
        check_quota(&names_key, &joined, self.max_entry_bytes)?;

        let mut entries = self.entries.write().unwrap();
        entries.insert(source_key, source_text.to_string());
        entries.insert(names_key, joined);
        Ok(())
    }

    async fn load(&self, topic_id: &str) -> Result<Option<StoredTopic>, PersistenceError> {
        let entries = self.entries.read().unwrap();
        Ok(assemble(
            entries.get(&source_key(topic_id)).cloned(),
            entries.get(&names_key(topic_id)).cloned(),
        ))
    }

    async fn clear(&self, topic_id: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(&source_key(topic_id));
        entries.remove(&names_key(topic_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn sqlite_store(dir: &tempfile::TempDir, max_entry_bytes: usize) -> SqliteTopicStore {
        let pool = db::connect_path(&dir.path().join("store.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteTopicStore::new(pool, max_entry_bytes)
    }

    async fn exercise_round_trip(store: &dyn TopicStore) {
        assert_eq!(store.load("glazing").await.unwrap(), None);

        store
            .save("glazing", "Page 1:\nHello", &names(&["a.pdf", "b.pdf"]))
            .await
            .unwrap();
        let loaded = store.load("glazing").await.unwrap().unwrap();
        assert_eq!(loaded.source_text, "Page 1:\nHello");
        assert_eq!(loaded.file_names, names(&["a.pdf", "b.pdf"]));
        assert_eq!(store.load("cnc").await.unwrap(), None);

        store
            .save("glazing", "replaced", &names(&["c.pdf"]))
            .await
            .unwrap();
        let loaded = store.load("glazing").await.unwrap().unwrap();
        assert_eq!(loaded.source_text, "replaced");
        assert_eq!(loaded.file_names, names(&["c.pdf"]));

        store.clear("glazing").await.unwrap();
        assert_eq!(store.load("glazing").await.unwrap(), None);
        store.clear("glazing").await.unwrap();
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        exercise_round_trip(&MemoryTopicStore::default()).await;
    }

    #[tokio::test]
    async fn sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir, 1024).await;
        exercise_round_trip(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = sqlite_store(&dir, 1024).await;
            store
                .save("cnc", "persisted", &names(&["m.pdf"]))
                .await
                .unwrap();
            store.pool.close().await;
        }
        let store = sqlite_store(&dir, 1024).await;
        let loaded = store.load("cnc").await.unwrap().unwrap();
        assert_eq!(loaded.source_text, "persisted");
    }

    #[tokio::test]
    async fn quota_is_enforced_without_partial_write() {
        let store = MemoryTopicStore::new(8);
        let err = store
            .save("glazing", "far too long for the quota", &names(&["a.pdf"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::QuotaExceeded { limit: 8, .. }));
        assert_eq!(store.load("glazing").await.unwrap(), None);

        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir, 8).await;
        let err = store
            .save("glazing", "far too long for the quota", &names(&["a.pdf"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::QuotaExceeded { .. }));
        assert_eq!(store.load("glazing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_either_entry_means_empty() {
        let store = MemoryTopicStore::default();
        store
            .entries
            .write()
            .unwrap()
            .insert(source_key("glazing"), "orphan text".to_string());
        assert_eq!(store.load("glazing").await.unwrap(), None);
    }
}
