//! Durable cache and delivery history for fetched media.
//!
//! Both stores share one SQLite database opened through [`MediaStore`].

mod cache;
mod fingerprint;
mod history;
mod schema;
mod store;

pub use cache::CacheStore;
pub use fingerprint::fingerprint;
pub use history::HistoryStore;
pub use schema::{CacheEntry, CacheStats, HistoryRecord, MediaKind, NewHistoryRecord};
pub use store::MediaStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
