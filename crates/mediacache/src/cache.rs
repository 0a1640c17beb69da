use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::{fingerprint, CacheEntry, CacheError, CacheStats, MediaKind, Result};

#[derive(sqlx::FromRow)]
struct CacheRow {
    fingerprint: String,
    source_url: String,
    archive_reference: String,
    media_kind: String,
    filename: String,
    size_bytes: i64,
    cached_at: i64,
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = CacheError;

    fn try_from(r: CacheRow) -> Result<Self> {
        Ok(CacheEntry {
            media_kind: r.media_kind.parse::<MediaKind>().map_err(CacheError::Corrupt)?,
            cached_at: DateTime::<Utc>::from_timestamp(r.cached_at, 0)
                .ok_or_else(|| CacheError::Corrupt(format!("bad timestamp {}", r.cached_at)))?,
            size_bytes: u64::try_from(r.size_bytes)
                .map_err(|_| CacheError::Corrupt(format!("negative size {}", r.size_bytes)))?,
            fingerprint: r.fingerprint,
            source_url: r.source_url,
            archive_reference: r.archive_reference,
            filename: r.filename,
        })
    }
}

/// Fingerprint-keyed archive references with lazy expiry.
///
/// Expired rows are only ever removed by the lookup that finds them; there is
/// no background sweep.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
    retention: Duration,
}

impl CacheStore {
    pub(crate) fn new(pool: SqlitePool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    pub async fn lookup(&self, normalized_url: &str) -> Result<Option<CacheEntry>> {
        self.lookup_at(normalized_url, Utc::now()).await
    }

    /// Lookup as of `now`. Eviction and re-read share one transaction, and the
    /// delete is conditioned on the stale timestamp, so a concurrent fresh
    /// write for the same fingerprint is never evicted.
    pub async fn lookup_at(
        &self,
        normalized_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let fp = fingerprint(normalized_url);
        let cutoff = (now - self.retention).timestamp();

        let mut tx = self.pool.begin().await?;
        let evicted = sqlx::query("DELETE FROM media_cache WHERE fingerprint = ?1 AND cached_at < ?2")
            .bind(&fp)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let row: Option<CacheRow> = sqlx::query_as(
            r#"
            SELECT fingerprint, source_url, archive_reference, media_kind, filename, size_bytes, cached_at
            FROM media_cache
            WHERE fingerprint = ?1
            "#,
        )
        .bind(&fp)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        if evicted > 0 {
            debug!(url = %normalized_url, "cache: expired entry evicted");
        }
        row.map(CacheEntry::try_from).transpose()
    }

    pub async fn insert_or_replace(
        &self,
        normalized_url: &str,
        archive_reference: &str,
        media_kind: MediaKind,
        filename: &str,
        size_bytes: u64,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry {
            fingerprint: fingerprint(normalized_url),
            source_url: normalized_url.to_string(),
            archive_reference: archive_reference.to_string(),
            media_kind,
            filename: filename.to_string(),
            size_bytes,
            cached_at: Utc::now(),
        };
        self.put(&entry).await?;
        Ok(entry)
    }

    /// Upsert a fully formed entry, last write wins.
    pub async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let size = i64::try_from(entry.size_bytes)
            .map_err(|_| CacheError::Corrupt(format!("size too large {}", entry.size_bytes)))?;
        sqlx::query(
            r#"
            INSERT INTO media_cache (fingerprint, source_url, archive_reference, media_kind, filename, size_bytes, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(fingerprint) DO UPDATE SET
              source_url = excluded.source_url,
              archive_reference = excluded.archive_reference,
              media_kind = excluded.media_kind,
              filename = excluded.filename,
              size_bytes = excluded.size_bytes,
              cached_at = excluded.cached_at
            "#,
        )
        .bind(&entry.fingerprint)
        .bind(&entry.source_url)
        .bind(&entry.archive_reference)
        .bind(entry.media_kind.as_str())
        .bind(&entry.filename)
        .bind(size)
        .bind(entry.cached_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, normalized_url: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM media_cache WHERE fingerprint = ?1")
            .bind(fingerprint(normalized_url))
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let (count, total): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), CAST(COALESCE(SUM(size_bytes), 0) AS INTEGER) FROM media_cache",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CacheStats {
            count: count.max(0) as u64,
            total_size_bytes: total.max(0) as u64,
        })
    }
}
