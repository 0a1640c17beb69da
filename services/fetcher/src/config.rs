use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use links::{parse_rules, LinkPolicy};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const MB: u64 = 1024 * 1024;
/// Upper bound for cache retention, well inside what `chrono::Duration` holds.
const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bot_token: String,
    pub telegram_api_url: String,
    pub api_secret: String,
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub cache_retention_days: i64,
    pub history_limit: usize,
    pub queue_capacity: usize,
    pub release_webhook_url: Option<String>,
    pub pipeline: PipelineConfig,
}

/// Knobs the job pipeline reads. Constructible without touching the
/// environment.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub download_dir: PathBuf,
    pub chunk_size: usize,
    pub max_file_size: u64,
    pub extractor_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub cookies_path: PathBuf,
    pub user_agent: String,
    pub progress_interval: Duration,
    pub backup_channel: Option<i64>,
    pub links: LinkPolicy,
    pub skip_cache_with_custom_filename: bool,
}

impl PipelineConfig {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            chunk_size: (5 * MB) as usize,
            max_file_size: 2048 * MB,
            extractor_bin: PathBuf::from("yt-dlp"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            cookies_path: PathBuf::from("cookies.txt"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            progress_interval: Duration::from_secs(4),
            backup_channel: None,
            links: LinkPolicy::default(),
            skip_cache_with_custom_filename: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bot_token = get("BOT_TOKEN")?;
        let api_secret = get("API_SECRET")?;
        let telegram_api_url =
            std::env::var("TELEGRAM_API_URL").unwrap_or_else(|_| "https://api.telegram.org".to_string());
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let database_path = PathBuf::from(
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "/data/cache.db".to_string()),
        );

        let mut pipeline = PipelineConfig::new(
            std::env::var("DOWNLOAD_PATH").unwrap_or_else(|_| "/tmp/downloads".to_string()),
        );
        let chunk_size = megabytes("CHUNK_SIZE_MB", parse_or("CHUNK_SIZE_MB", 5u64)?.max(1))?;
        pipeline.chunk_size = usize::try_from(chunk_size).context("CHUNK_SIZE_MB does not fit in memory")?;
        pipeline.max_file_size = megabytes("MAX_FILE_SIZE_MB", parse_or("MAX_FILE_SIZE_MB", 2048u64)?)?;
        if let Ok(v) = std::env::var("EXTRACTOR_BIN") {
            pipeline.extractor_bin = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FFPROBE_BIN") {
            pipeline.ffprobe_bin = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("COOKIES_PATH") {
            pipeline.cookies_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("USER_AGENT") {
            pipeline.user_agent = v;
        }
        pipeline.progress_interval = Duration::from_secs(parse_or("PROGRESS_INTERVAL_SECS", 4u64)?);
        pipeline.backup_channel = parse_opt::<i64>("BACKUP_CHANNEL_ID")?.filter(|id| *id != 0);
        if let Ok(v) = std::env::var("QUERY_PRESERVING_HOSTS") {
            pipeline.links = LinkPolicy::default().with_query_preserving(parse_rules(&v));
        }
        pipeline.skip_cache_with_custom_filename = std::env::var("SKIP_CACHE_WITH_CUSTOM_FILENAME")
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(true);

        let history_limit = parse_or("HISTORY_LIMIT", 50usize)?;
        let cache_retention_days = parse_or("CACHE_RETENTION_DAYS", 30i64)?;
        let queue_capacity = parse_or("QUEUE_CAPACITY", 1024usize)?;
        let release_webhook_url = std::env::var("RELEASE_WEBHOOK_URL").ok().filter(|v| !v.is_empty());

        let cfg = Self {
            bot_token,
            telegram_api_url,
            api_secret,
            bind_addr,
            database_path,
            cache_retention_days,
            history_limit,
            queue_capacity,
            release_webhook_url,
            pipeline,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail fast, fail loud.
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            bail!("BOT_TOKEN must not be empty");
        }
        if self.api_secret.trim().is_empty() {
            bail!("API_SECRET must not be empty");
        }
        if !self.telegram_api_url.starts_with("http://") && !self.telegram_api_url.starts_with("https://") {
            bail!("TELEGRAM_API_URL must start with http:// or https://");
        }
        if self.cache_retention_days <= 0 || self.cache_retention_days > MAX_RETENTION_DAYS {
            bail!("CACHE_RETENTION_DAYS must be between 1 and {MAX_RETENTION_DAYS}");
        }
        if self.history_limit == 0 {
            bail!("HISTORY_LIMIT must be positive");
        }
        if self.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be positive");
        }
        Ok(())
    }
}

fn megabytes(key: &str, value: u64) -> Result<u64> {
    value
        .checked_mul(MB)
        .with_context(|| format!("{key} is too large: {value}"))
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_opt<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key} is not valid: {e}")),
        _ => Ok(None),
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(key)?.unwrap_or(default))
}
