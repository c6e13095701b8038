//! Key-value persistence capability used for small desk settings.

use std::future::Future;
use std::pin::Pin;

use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::backend::error::BackendResult;
use crate::config::StorageConfig;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, key: &str) -> StoreFuture<'_, BackendResult<Option<String>>>;
    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set(&self, key: &str, value: &str) -> StoreFuture<'_, BackendResult<()>>;
    /// Remove a value if present.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn remove(&self, key: &str) -> StoreFuture<'_, BackendResult<()>>;
}

/// In-process store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StoreFuture<'_, BackendResult<Option<String>>> {
        let value = self.values.get(key).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: &str) -> StoreFuture<'_, BackendResult<()>> {
        self.values.insert(key.to_string(), value.to_string());
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, key: &str) -> StoreFuture<'_, BackendResult<()>> {
        self.values.remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// `SQLite` implementation of the key-value store.
pub struct SqliteKeyValueStore {
    conn: Connection,
    table: String,
}

impl SqliteKeyValueStore {
    /// Open the database and create the table if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> BackendResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        let table = config.kv_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> StoreFuture<'_, BackendResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let value = self
                .conn
                .call(move |conn| {
                    let value = conn
                        .query_row(
                            &format!("SELECT value FROM {table} WHERE key = ?1"),
                            rusqlite::params![key],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(value)
                })
                .await?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> StoreFuture<'_, BackendResult<()>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let now_ms = chrono::Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (key, value, updated_at) VALUES (?1, ?2, ?3)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                 updated_at = excluded.updated_at"
                        ),
                        rusqlite::params![key, value, now_ms],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StoreFuture<'_, BackendResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE key = ?1"),
                        rusqlite::params![key],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}
