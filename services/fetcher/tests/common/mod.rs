#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use mediacache::{MediaKind, MediaStore};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fetcher::config::PipelineConfig;
use fetcher::delivery::{ChatClient, OutgoingFile};
use fetcher::error::DeliveryError;
use fetcher::notify::ReleaseNotifier;
use fetcher::orchestrator::Orchestrator;
use fetcher::types_jobs::{JobEvent, JobState};
use fetcher::worker_loop::run_worker_loop;

pub const BACKUP_CHANNEL: i64 = -100_500;
pub const VIDEO_SIZE: usize = 3 * 1024 * 1024 + 17;

// ---------- chat fake ----------

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    Message { chat_id: i64, text: String },
    Edit { chat_id: i64, message_id: i64, text: String },
    File { chat_id: i64, filename: String, kind: MediaKind, size_bytes: u64 },
    Copy { chat_id: i64, from_chat_id: i64, message_id: i64 },
}

#[derive(Default)]
pub struct FakeChat {
    calls: Mutex<Vec<ChatCall>>,
    next_id: AtomicI64,
    broken: Mutex<HashSet<i64>>,
    refuse_uploads: Mutex<HashSet<i64>>,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_id: AtomicI64::new(1000), ..Default::default() })
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn files_to(&self, chat_id: i64) -> Vec<ChatCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, ChatCall::File { chat_id: id, .. } if *id == chat_id))
            .collect()
    }

    pub fn copies_to(&self, chat_id: i64) -> Vec<ChatCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, ChatCall::Copy { chat_id: id, .. } if *id == chat_id))
            .collect()
    }

    /// Last text shown to `chat_id`, whether posted or edited in.
    pub fn last_text(&self, chat_id: i64) -> Option<String> {
        self.calls().into_iter().rev().find_map(|c| match c {
            ChatCall::Message { chat_id: id, text } | ChatCall::Edit { chat_id: id, text, .. } if id == chat_id => {
                Some(text)
            }
            _ => None,
        })
    }

    /// Make copies of archived message `message_id` fail from now on.
    pub fn break_message(&self, message_id: i64) {
        self.broken.lock().unwrap().insert(message_id);
    }

    /// Make every file upload to `chat_id` fail from now on.
    pub fn refuse_uploads_to(&self, chat_id: i64) {
        self.refuse_uploads.lock().unwrap().insert(chat_id);
    }

    fn record(&self, call: ChatCall) -> i64 {
        self.calls.lock().unwrap().push(call);
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn send_message(&self, chat_id: i64, text: &str, _reply_to: Option<i64>) -> Result<i64, DeliveryError> {
        Ok(self.record(ChatCall::Message { chat_id, text: text.to_string() }))
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.record(ChatCall::Edit { chat_id, message_id, text: text.to_string() });
        Ok(())
    }

    async fn send_file(&self, chat_id: i64, file: &OutgoingFile, _reply_to: Option<i64>) -> Result<i64, DeliveryError> {
        if self.refuse_uploads.lock().unwrap().contains(&chat_id) {
            return Err(DeliveryError::Api("Request Entity Too Large".into()));
        }
        // Read it like an upload would.
        let on_disk = tokio::fs::metadata(&file.path).await?.len();
        assert_eq!(on_disk, file.size_bytes);
        Ok(self.record(ChatCall::File {
            chat_id,
            filename: file.filename.clone(),
            kind: file.kind,
            size_bytes: file.size_bytes,
        }))
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        _reply_to: Option<i64>,
    ) -> Result<i64, DeliveryError> {
        if self.broken.lock().unwrap().contains(&message_id) {
            return Err(DeliveryError::Api("Bad Request: message to copy not found".into()));
        }
        Ok(self.record(ChatCall::Copy { chat_id, from_chat_id, message_id }))
    }
}

// ---------- origin server ----------

#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Origin {
    pub addr: SocketAddr,
    pub hits: Hits,
}

impl Origin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn video(State(hits): State<Hits>) -> impl IntoResponse {
    hits.0.fetch_add(1, Ordering::SeqCst);
    let body: Vec<u8> = (0..VIDEO_SIZE).map(|i| (i % 251) as u8).collect();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, VIDEO_SIZE.to_string()),
        ],
        body,
    )
}

/// Never-ending body, one small chunk every 50 ms.
async fn slow(State(hits): State<Hits>) -> impl IntoResponse {
    hits.0.fetch_add(1, Ordering::SeqCst);
    let stream = futures_util::stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![1u8; 16 * 1024])), ()))
    });
    (StatusCode::OK, Body::from_stream(stream))
}

async fn forbidden(State(hits): State<Hits>) -> impl IntoResponse {
    hits.0.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FORBIDDEN, "no")
}

pub async fn spawn_origin() -> Origin {
    let hits = Hits::default();
    let app = Router::new()
        .route("/video.mp4", get(video))
        .route("/slow.mp4", get(slow))
        .route("/forbidden.mp4", get(forbidden))
        .with_state(hits.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Origin { addr, hits }
}

// ---------- orchestrator harness ----------

pub struct Harness {
    pub orch: Arc<Orchestrator>,
    pub chat: Arc<FakeChat>,
    pub store: MediaStore,
    pub dir: TempDir,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn start_worker(&self) {
        tokio::spawn(run_worker_loop(self.orch.clone(), self.shutdown.clone()));
    }

    pub fn download_dir(&self) -> std::path::PathBuf {
        self.orch.config().download_dir.clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn harness(tweak: impl FnOnce(&mut PipelineConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = PipelineConfig::new(dir.path().join("downloads"));
    cfg.backup_channel = Some(BACKUP_CHANNEL);
    cfg.chunk_size = 64 * 1024;
    cfg.progress_interval = Duration::ZERO;
    cfg.ffprobe_bin = dir.path().join("no-ffprobe");
    cfg.cookies_path = dir.path().join("cookies.txt");
    tweak(&mut cfg);

    let store = MediaStore::open_memory().await.unwrap();
    let chat = FakeChat::new();
    let orch = Orchestrator::new(
        cfg,
        store.cache(chrono::Duration::days(30)),
        store.history(50),
        chat.clone(),
        ReleaseNotifier::disabled(),
        16,
    )
    .unwrap();

    Harness { orch, chat, store, dir, shutdown: CancellationToken::new() }
}

/// Wait until `job_id` emits `state`, or any terminal state.
pub async fn wait_for(rx: &mut broadcast::Receiver<JobEvent>, job_id: Uuid, state: JobState) -> JobState {
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.job_id == job_id && (ev.state == state || ev.state.is_terminal()) => {
                    return ev.state;
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("job did not reach the expected state in time")
}

pub async fn wait_terminal(rx: &mut broadcast::Receiver<JobEvent>, job_id: Uuid) -> JobState {
    wait_for(rx, job_id, JobState::Completed).await
}
