use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::orchestrator::Orchestrator;

/// Single worker: pull one job, run it to a terminal state, pull the next.
///
/// Each job runs on its own task so a panic still reaches the terminal
/// bookkeeping instead of leaking the requester's slot.
pub async fn run_worker_loop(orch: Arc<Orchestrator>, shutdown: CancellationToken) {
    let Some(mut queue) = orch.take_queue().await else {
        warn!("worker_loop: queue already taken, not starting");
        return;
    };
    info!("worker_loop: started");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => next,
        };
        let Some(queued) = next else { break };

        let job = queued.job.clone();
        let worker = orch.clone();
        let task = tokio::spawn(async move { worker.process(queued).await });

        if let Err(e) = task.await {
            error!(job_id=%job.job_id, "worker_loop: job task died: {e}");
            orch.finish_panicked(&job).await;
        }
    }

    info!("worker_loop: stopped");
}
