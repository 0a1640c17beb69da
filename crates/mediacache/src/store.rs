use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{CacheStore, HistoryStore, Result};

/// Owner of the SQLite pool backing the cache and history tables.
#[derive(Clone)]
pub struct MediaStore {
    pool: SqlitePool,
}

impl MediaStore {
    /// Open (or create) a file-backed database, creating parent directories.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}", path.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// In-memory database for tests. One connection that never expires,
    /// since the data lives and dies with it.
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    pub fn cache(&self, retention: chrono::Duration) -> CacheStore {
        CacheStore::new(self.pool.clone(), retention)
    }

    pub fn history(&self, limit: usize) -> HistoryStore {
        HistoryStore::new(self.pool.clone(), limit)
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn bootstrap(&self) -> Result<()> {
        // Memory databases answer "memory"; the result is irrelevant there.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS media_cache (
              fingerprint TEXT PRIMARY KEY,
              source_url TEXT NOT NULL,
              archive_reference TEXT NOT NULL,
              media_kind TEXT NOT NULL,
              filename TEXT NOT NULL,
              size_bytes INTEGER NOT NULL,
              cached_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS media_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              requester_id INTEGER NOT NULL,
              source_url TEXT NOT NULL,
              filename TEXT NOT NULL,
              size_bytes INTEGER NOT NULL,
              recorded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_media_history_requester ON media_history(requester_id, id DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
