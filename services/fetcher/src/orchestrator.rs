use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use mediacache::{CacheEntry, CacheStore, HistoryStore, NewHistoryRecord};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::active::ActiveJobs;
use crate::cancel::{CancelHandle, CancellationRegistry};
use crate::config::PipelineConfig;
use crate::delivery::{Archive, ChatClient};
use crate::download::{self, direct::CONNECT_TIMEOUT, DownloadRequest, ProgressSink, Strategy};
use crate::error::{IntakeError, JobError};
use crate::notify::ReleaseNotifier;
use crate::text;
use crate::types_jobs::{now_ts, Job, JobEvent, JobState, JobStatus};

const EVENT_BUFFER: usize = 256;

/// A job admitted to the queue together with its cancellation handle.
pub struct QueuedJob {
    pub job: Job,
    pub cancel: CancelHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub job_id: Uuid,
    pub queue_position: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub job_id: Uuid,
    pub cancelled: bool,
}

/// Queue, single-flight index, per-job state machine and the pipeline that
/// drives a job from intake to delivery.
pub struct Orchestrator {
    cfg: Arc<PipelineConfig>,
    cache: CacheStore,
    history: HistoryStore,
    archive: Archive,
    http: reqwest::Client,
    registry: CancellationRegistry,
    active: ActiveJobs,
    jobs: RwLock<HashMap<Uuid, JobStatus>>,
    queue_tx: mpsc::Sender<QueuedJob>,
    queue_rx: Mutex<Option<mpsc::Receiver<QueuedJob>>>,
    queued: AtomicUsize,
    events: broadcast::Sender<JobEvent>,
    notifier: ReleaseNotifier,
}

impl Orchestrator {
    pub fn new(
        cfg: PipelineConfig,
        cache: CacheStore,
        history: HistoryStore,
        chat: Arc<dyn ChatClient>,
        notifier: ReleaseNotifier,
        queue_capacity: usize,
    ) -> anyhow::Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build download client")?;
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let archive = Archive::new(chat, cfg.backup_channel, cfg.ffprobe_bin.clone());

        Ok(Arc::new(Self {
            cfg: Arc::new(cfg),
            cache,
            history,
            archive,
            http,
            registry: CancellationRegistry::new(),
            active: ActiveJobs::new(),
            jobs: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            queued: AtomicUsize::new(0),
            events,
            notifier,
        }))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn queue_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub async fn active_count(&self) -> usize {
        self.active.len().await
    }

    pub async fn active_job(&self, requester_id: i64) -> Option<Uuid> {
        self.active.get(requester_id).await
    }

    pub async fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn status_for(&self, requester_id: i64) -> Option<JobStatus> {
        let job_id = self.active.get(requester_id).await?;
        self.status(job_id).await
    }

    /// The worker side of the queue. Handed out once.
    pub async fn take_queue(&self) -> Option<mpsc::Receiver<QueuedJob>> {
        self.queue_rx.lock().await.take()
    }

    /// Admit a job: claim the requester's slot, register its cancel handle,
    /// enqueue. Rejects instead of queueing behind an active job.
    pub async fn submit(&self, job: Job) -> Result<Admission, IntakeError> {
        let job_id = job.job_id;
        let requester_id = job.requester_id;

        self.active
            .try_claim(requester_id, job_id)
            .await
            .map_err(|active_job_id| IntakeError::AlreadyActive { active_job_id })?;

        let cancel = match self.registry.register(job_id).await {
            Ok(h) => h,
            Err(e) => {
                self.active.release(requester_id, job_id).await;
                return Err(e);
            }
        };

        self.jobs.write().await.insert(job_id, JobStatus::queued(&job, now_ts()));
        let queue_position = self.queued.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(e) = self.queue_tx.try_send(QueuedJob { job, cancel }) {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.jobs.write().await.remove(&job_id);
            self.registry.release(job_id).await;
            self.active.release(requester_id, job_id).await;
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => IntakeError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IntakeError::QueueClosed,
            });
        }

        info!(job_id=%job_id, requester_id, queue_position, "intake: job queued");
        let _ = self.events.send(JobEvent { job_id, requester_id, state: JobState::Queued });
        Ok(Admission { job_id, queue_position })
    }

    /// Cancel whatever the requester has in flight.
    pub async fn cancel_requester(&self, requester_id: i64) -> Option<CancelOutcome> {
        let job_id = self.active.get(requester_id).await?;
        let cancelled = self.registry.request_cancel(job_id).await;
        info!(job_id=%job_id, requester_id, cancelled, "intake: cancel requested");
        Some(CancelOutcome { job_id, cancelled })
    }

    fn workdir(&self, job_id: Uuid) -> PathBuf {
        self.cfg.download_dir.join(job_id.to_string())
    }

    /// Run one dequeued job to a terminal state. Releases every per-job
    /// resource whatever the outcome.
    pub async fn process(&self, queued: QueuedJob) -> JobState {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        let QueuedJob { job, cancel } = queued;
        let workdir = self.workdir(job.job_id);
        info!(job_id=%job.job_id, requester_id=job.requester_id, "worker: starting job");

        let status_msg = if cancel.is_cancelled() {
            None
        } else {
            self.post_status(&job).await
        };

        let result = if cancel.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            self.pipeline(&job, &cancel, &workdir, status_msg).await
        };

        let state = match &result {
            Ok(()) => JobState::Completed,
            Err(e) => {
                match e {
                    JobError::Cancelled => info!(job_id=%job.job_id, "worker: job cancelled"),
                    other => warn!(job_id=%job.job_id, "worker: job failed: {other}"),
                }
                self.report(&job, status_msg, &text::failure(e)).await;
                e.terminal_state()
            }
        };

        self.finish(&job, state, &workdir).await;
        state
    }

    /// Terminal bookkeeping. Safe to call for a job whose task panicked.
    pub async fn finish(&self, job: &Job, state: JobState, workdir: &Path) {
        self.registry.release(job.job_id).await;
        self.active.release(job.requester_id, job.job_id).await;

        match tokio::fs::remove_dir_all(workdir).await {
            Ok(()) => debug!(job_id=%job.job_id, "worker: workdir removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id=%job.job_id, "worker: workdir cleanup failed: {e}"),
        }

        // Observers of the terminal event see the slot already free.
        self.transition(job, state).await;
        self.jobs.write().await.remove(&job.job_id);

        self.notifier.notify(&JobEvent { job_id: job.job_id, requester_id: job.requester_id, state });
        info!(job_id=%job.job_id, state=state.as_str(), "worker: job finished");
    }

    pub async fn finish_panicked(&self, job: &Job) {
        self.finish(job, JobState::Failed, &self.workdir(job.job_id)).await;
    }

    async fn pipeline(
        &self,
        job: &Job,
        cancel: &CancelHandle,
        workdir: &Path,
        status_msg: Option<i64>,
    ) -> Result<(), JobError> {
        let resolved = links::resolve(&job.raw_source, &self.cfg.links);
        let url = resolved.url.clone();
        let custom_filename = job.custom_filename.clone();
        let skip_cache = custom_filename.is_some() && self.cfg.skip_cache_with_custom_filename;
        debug!(job_id=%job.job_id, url=%url, kind=resolved.kind.as_str(), skip_cache, "worker: resolved");

        if !skip_cache {
            if let Some(entry) = self.lookup(&url).await {
                if self.deliver_cached(job, &entry, status_msg).await {
                    return Ok(());
                }
                // Stale reference: forget it and fetch fresh.
                if let Err(e) = self.cache.delete(&url).await {
                    warn!(job_id=%job.job_id, "cache: delete failed: {e}");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.transition(job, JobState::Downloading).await;
        self.say(job, status_msg, &text::downloading(None)).await;
        tokio::fs::create_dir_all(workdir).await.map_err(JobError::Workspace)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let progress = ProgressSink::new(tx, self.cfg.progress_interval);
        let req = DownloadRequest {
            url: url.clone(),
            kind: resolved.kind,
            host: resolved.host.clone(),
            workdir: workdir.to_path_buf(),
            custom_filename: custom_filename.clone(),
            declared: job.declared.clone(),
        };

        let fetch = download::run(
            Strategy::for_kind(resolved.kind),
            req,
            self.cfg.clone(),
            self.http.clone(),
            progress,
            cancel,
        );
        let (artifact, ()) = tokio::join!(fetch, self.forward_progress(job, status_msg, rx));
        let artifact = artifact?;

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.transition(job, JobState::Uploading).await;
        self.say(job, status_msg, &text::uploading(&artifact.filename, artifact.size_bytes)).await;

        let reference = self.archive.archive(&artifact.path, artifact.media_kind).await;
        if let (Some(reference), false) = (&reference, skip_cache) {
            if let Err(e) = self
                .cache
                .insert_or_replace(&url, reference, artifact.media_kind, &artifact.filename, artifact.size_bytes)
                .await
            {
                warn!(job_id=%job.job_id, "cache: insert failed: {e}");
            }
        }

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.transition(job, JobState::Delivering).await;

        let via_archive = match &reference {
            Some(r) => {
                self.archive
                    .deliver_from_archive(job.destination_id, r, job.reply_target)
                    .await
            }
            None => false,
        };
        if !via_archive {
            self.archive
                .deliver_fresh(job.destination_id, &artifact.path, job.reply_target, artifact.media_kind)
                .await?;
        }

        self.record_history(job, &url, &artifact.filename, artifact.size_bytes).await;
        self.say(job, status_msg, &text::delivered(&artifact.filename, artifact.size_bytes)).await;
        Ok(())
    }

    async fn lookup(&self, url: &str) -> Option<CacheEntry> {
        match self.cache.lookup(url).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url=%url, "cache: lookup failed: {e}");
                None
            }
        }
    }

    async fn deliver_cached(&self, job: &Job, entry: &CacheEntry, status_msg: Option<i64>) -> bool {
        info!(job_id=%job.job_id, reference=%entry.archive_reference, "worker: cache hit");
        self.transition(job, JobState::Delivering).await;
        self.jobs.write().await.entry(job.job_id).and_modify(|s| s.from_cache = true);
        self.say(job, status_msg, &text::from_cache(&entry.filename, entry.size_bytes)).await;

        if !self
            .archive
            .deliver_from_archive(job.destination_id, &entry.archive_reference, job.reply_target)
            .await
        {
            warn!(job_id=%job.job_id, "worker: cached copy unusable, fetching fresh");
            return false;
        }

        self.record_history(job, &entry.source_url, &entry.filename, entry.size_bytes).await;
        self.say(job, status_msg, &text::delivered(&entry.filename, entry.size_bytes)).await;
        true
    }

    async fn forward_progress(&self, job: &Job, status_msg: Option<i64>, mut rx: mpsc::UnboundedReceiver<f32>) {
        while let Some(pct) = rx.recv().await {
            if let Some(s) = self.jobs.write().await.get_mut(&job.job_id) {
                s.progress = Some(pct);
                s.updated_at = now_ts();
            }
            self.say(job, status_msg, &text::downloading(Some(pct))).await;
        }
    }

    async fn record_history(&self, job: &Job, url: &str, filename: &str, size_bytes: u64) {
        let rec = NewHistoryRecord {
            requester_id: job.requester_id,
            source_url: url.to_string(),
            filename: filename.to_string(),
            size_bytes,
        };
        if let Err(e) = self.history.append(&rec).await {
            warn!(job_id=%job.job_id, "history: append failed: {e}");
        }
    }

    async fn transition(&self, job: &Job, to: JobState) {
        {
            let mut jobs = self.jobs.write().await;
            if let Some(s) = jobs.get_mut(&job.job_id) {
                if s.state == to {
                    return;
                }
                if !s.state.can_transition(to) {
                    error!(job_id=%job.job_id, from=s.state.as_str(), to=to.as_str(), "worker: illegal transition");
                }
                s.state = to;
                s.updated_at = now_ts();
            }
        }
        debug!(job_id=%job.job_id, state=to.as_str(), "worker: transition");
        let _ = self.events.send(JobEvent { job_id: job.job_id, requester_id: job.requester_id, state: to });
    }

    async fn post_status(&self, job: &Job) -> Option<i64> {
        match self
            .archive
            .chat()
            .send_message(job.destination_id, &text::processing(), job.reply_target)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(job_id=%job.job_id, "status: send failed: {e}");
                None
            }
        }
    }

    /// Edit the status message. Failures are logged only.
    async fn say(&self, job: &Job, status_msg: Option<i64>, text: &str) {
        let Some(message_id) = status_msg else { return };
        if let Err(e) = self.archive.chat().edit_message(job.destination_id, message_id, text).await {
            debug!(job_id=%job.job_id, "status: edit failed: {e}");
        }
    }

    /// Final error text: edit the status message, or post one if there is none.
    async fn report(&self, job: &Job, status_msg: Option<i64>, text: &str) {
        match status_msg {
            Some(_) => self.say(job, status_msg, text).await,
            None => {
                if let Err(e) = self
                    .archive
                    .chat()
                    .send_message(job.destination_id, text, job.reply_target)
                    .await
                {
                    warn!(job_id=%job.job_id, "status: send failed: {e}");
                }
            }
        }
    }
}
