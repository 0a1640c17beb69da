use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{CacheError, HistoryRecord, NewHistoryRecord, Result};

#[derive(sqlx::FromRow)]
struct HistoryRow {
    requester_id: i64,
    source_url: String,
    filename: String,
    size_bytes: i64,
    recorded_at: i64,
}

/// Per-requester delivery log, bounded to the newest `limit` rows.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    limit: usize,
}

impl HistoryStore {
    pub(crate) fn new(pool: SqlitePool, limit: usize) -> Self {
        Self { pool, limit: limit.max(1) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append and drop whatever falls beyond the newest `limit` rows for the
    /// requester, in one transaction.
    pub async fn append(&self, rec: &NewHistoryRecord) -> Result<()> {
        let size = i64::try_from(rec.size_bytes)
            .map_err(|_| CacheError::Corrupt(format!("size too large {}", rec.size_bytes)))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO media_history (requester_id, source_url, filename, size_bytes, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(rec.requester_id)
        .bind(&rec.source_url)
        .bind(&rec.filename)
        .bind(size)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM media_history
            WHERE requester_id = ?1
              AND id NOT IN (
                SELECT id FROM media_history
                WHERE requester_id = ?1
                ORDER BY id DESC
                LIMIT ?2
              )
            "#,
        )
        .bind(rec.requester_id)
        .bind(self.limit as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent(&self, requester_id: i64, limit: usize) -> Result<Vec<HistoryRecord>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT requester_id, source_url, filename, size_bytes, recorded_at
            FROM media_history
            WHERE requester_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )
        .bind(requester_id)
        .bind(limit.min(self.limit) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(HistoryRecord {
                    recorded_at: DateTime::<Utc>::from_timestamp(r.recorded_at, 0).ok_or_else(
                        || CacheError::Corrupt(format!("bad timestamp {}", r.recorded_at)),
                    )?,
                    size_bytes: r.size_bytes.max(0) as u64,
                    requester_id: r.requester_id,
                    source_url: r.source_url,
                    filename: r.filename,
                })
            })
            .collect()
    }

    pub async fn distinct_requesters(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT requester_id) FROM media_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}
