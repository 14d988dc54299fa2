//! Tier A: durable structured storage backed by SQLite
//!
//! The most durable and highest-capacity tier. It must be explicitly opened
//! before use, and opening can fail (read-only media, locked database); an
//! unopened tier stays in the coordinator's list but answers `false`/`None`
//! for every operation, so the rest of the stack degrades instead of
//! erroring.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::tier::{open_envelope, seal_envelope, StorageTier};
use super::{ConfigError, ConfigResult};

pub const SQLITE_TIER_NAME: &str = "sqlite";

/// SQLite-backed storage tier
pub struct SqliteTier {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteTier {
    /// Open (or create) the backing database
    pub async fn open<P: AsRef<Path>>(database_path: P) -> ConfigResult<Self> {
        let database_path = database_path.as_ref().to_path_buf();

        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Storage {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let conn = tokio::task::spawn_blocking(move || -> ConfigResult<Connection> {
            let conn = Connection::open(&database_path).map_err(|e| ConfigError::Storage {
                message: format!("Failed to open database: {}", e),
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| ConfigError::Storage {
                    message: format!("Failed to set WAL mode: {}", e),
                })?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(|e| ConfigError::Storage {
                    message: format!("Failed to set synchronous mode: {}", e),
                })?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS config_entries (
                    key TEXT PRIMARY KEY,
                    envelope TEXT NOT NULL
                )",
                [],
            )
            .map_err(|e| ConfigError::Storage {
                message: format!("Failed to initialize schema: {}", e),
            })?;

            Ok(conn)
        })
        .await
        .map_err(|e| ConfigError::Storage {
            message: format!("Database open task failed: {}", e),
        })??;

        log::info!("Opened sqlite storage tier");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// A tier whose open failed; every operation degrades softly
    pub fn unavailable() -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Close the database connection; subsequent operations degrade softly
    pub async fn close(&self) {
        let conn = Arc::clone(&self.conn);
        let _ = tokio::task::spawn_blocking(move || {
            conn.lock().take();
        })
        .await;
        log::info!("Closed sqlite storage tier");
    }

    /// Run one blocking database operation on the shared connection
    async fn with_conn<T, F>(&self, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            guard.as_ref().map(op)
        })
        .await;

        match result {
            Ok(Some(Ok(value))) => Some(value),
            Ok(Some(Err(e))) => {
                log::warn!("sqlite tier operation failed: {}", e);
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("sqlite tier task failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl StorageTier for SqliteTier {
    fn name(&self) -> &'static str {
        SQLITE_TIER_NAME
    }

    async fn store(&self, key: &str, value: &serde_json::Value) -> bool {
        let Some(envelope) = seal_envelope(value) else {
            return false;
        };
        let key = key.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO config_entries (key, envelope) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET envelope = excluded.envelope",
                params![key, envelope],
            )
        })
        .await
        .is_some()
    }

    async fn retrieve(&self, key: &str) -> Option<serde_json::Value> {
        let owned_key = key.to_string();
        let raw = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT envelope FROM config_entries WHERE key = ?1",
                    params![owned_key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await??;

        open_envelope(SQLITE_TIER_NAME, key, &raw)
    }

    async fn remove(&self, key: &str) -> bool {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM config_entries WHERE key = ?1", params![key])
        })
        .await
        .is_some()
    }

    async fn clear(&self) {
        self.with_conn(|conn| conn.execute("DELETE FROM config_entries", []))
            .await;
    }
}
