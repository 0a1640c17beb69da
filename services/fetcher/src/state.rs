use std::sync::Arc;

use mediacache::{CacheStore, HistoryStore, MediaStore};

use crate::orchestrator::Orchestrator;

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: MediaStore,
    pub cache: CacheStore,
    pub history: HistoryStore,
    pub api_secret: String,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: MediaStore,
        history: HistoryStore,
        api_secret: String,
    ) -> Self {
        let cache = orchestrator.cache().clone();
        Self { orchestrator, store, cache, history, api_secret }
    }
}
