use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use uuid::Uuid;

/// requester id -> job id; at most one live job per requester.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashMap<i64, Uuid>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the requester's slot. On conflict returns the job holding it.
    pub async fn try_claim(&self, requester_id: i64, job_id: Uuid) -> Result<(), Uuid> {
        let mut map = self.inner.lock().await;
        if let Some(existing) = map.get(&requester_id) {
            return Err(*existing);
        }
        map.insert(requester_id, job_id);
        Ok(())
    }

    /// Free the slot only if `job_id` still holds it.
    pub async fn release(&self, requester_id: i64, job_id: Uuid) -> bool {
        let mut map = self.inner.lock().await;
        if map.get(&requester_id) == Some(&job_id) {
            map.remove(&requester_id);
            return true;
        }
        false
    }

    pub async fn get(&self, requester_id: i64) -> Option<Uuid> {
        self.inner.lock().await.get(&requester_id).copied()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
