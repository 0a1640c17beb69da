use std::{collections::HashMap, sync::Arc};

use tokio::{sync::Mutex, task::AbortHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::IntakeError;

/// Whatever a job is blocked on right now.
#[derive(Debug)]
pub enum ActiveResource {
    Subprocess(AbortHandle),
    Stream(AbortHandle),
}

impl ActiveResource {
    fn interrupt(&self) {
        match self {
            // The child is spawned with kill_on_drop, aborting the task reaps it.
            ActiveResource::Subprocess(h) | ActiveResource::Stream(h) => h.abort(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ActiveResource::Subprocess(_) => "subprocess",
            ActiveResource::Stream(_) => "stream",
        }
    }
}

struct Entry {
    token: CancellationToken,
    resource: Option<ActiveResource>,
}

/// Job id -> cancellation handle. One lock serializes every mutation; the
/// flag itself is a `CancellationToken` readable without it.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job_id: Uuid) -> Result<CancelHandle, IntakeError> {
        let mut map = self.inner.lock().await;
        if map.contains_key(&job_id) {
            return Err(IntakeError::DuplicateJob(job_id));
        }
        let token = CancellationToken::new();
        map.insert(job_id, Entry { token: token.clone(), resource: None });
        Ok(CancelHandle { job_id, token, registry: self.clone() })
    }

    /// Bind the running resource. Interrupts it at once when the job was
    /// cancelled before the resource existed.
    pub async fn attach(&self, job_id: Uuid, resource: ActiveResource) -> bool {
        let mut map = self.inner.lock().await;
        let Some(entry) = map.get_mut(&job_id) else {
            resource.interrupt();
            return false;
        };
        if entry.token.is_cancelled() {
            resource.interrupt();
        }
        debug!(job_id=%job_id, resource=resource.label(), "cancel: resource attached");
        entry.resource = Some(resource);
        true
    }

    pub async fn detach(&self, job_id: Uuid) {
        if let Some(entry) = self.inner.lock().await.get_mut(&job_id) {
            entry.resource = None;
        }
    }

    /// Flag the job and interrupt its resource. False for unknown ids.
    pub async fn request_cancel(&self, job_id: Uuid) -> bool {
        let map = self.inner.lock().await;
        let Some(entry) = map.get(&job_id) else {
            return false;
        };
        entry.token.cancel();
        if let Some(r) = &entry.resource {
            r.interrupt();
        }
        true
    }

    pub async fn release(&self, job_id: Uuid) {
        self.inner.lock().await.remove(&job_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Per-job view handed to the pipeline and strategies.
#[derive(Clone)]
pub struct CancelHandle {
    job_id: Uuid,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl CancelHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub async fn attach(&self, resource: ActiveResource) -> bool {
        self.registry.attach(self.job_id, resource).await
    }

    pub async fn detach(&self) {
        self.registry.detach(self.job_id).await
    }
}
