use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::{CancelReason, Job, JobQueue, StatusRegistry};
use crate::worker::executor::{ExecutionOutcome, ExecutionResult, JobExecutor};

/// How the workers ended when the pool was joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolJoin {
    /// Workers that exited on their own.
    pub stopped: usize,
    /// Workers still busy after the timeout and aborted.
    pub aborted: usize,
}

/// Fixed-size set of workers draining a shared [`JobQueue`].
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Each one loops until `shutdown` is cancelled.
    pub fn spawn(
        size: usize,
        queue: Arc<JobQueue>,
        registry: Arc<StatusRegistry>,
        executor: JobExecutor,
        shutdown: CancellationToken,
    ) -> Self {
        let handles = (0..size)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let executor = executor.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, registry, executor, shutdown).await;
                })
            })
            .collect();

        tracing::info!(workers = size, "Worker pool started");
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait up to `timeout` for every worker to exit, aborting the rest.
    pub async fn join(self, timeout: Duration) -> PoolJoin {
        // No deadline when the timeout does not fit in an Instant
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        let mut join = PoolJoin::default();

        for (worker_id, mut handle) in self.handles.into_iter().enumerate() {
            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await,
                None => Ok((&mut handle).await),
            };
            match joined {
                Ok(Ok(())) => join.stopped += 1,
                Ok(Err(e)) => {
                    tracing::error!(worker_id, error = %e, "Worker task failed");
                    join.stopped += 1;
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(worker_id, "Worker did not stop in time, aborted");
                    join.aborted += 1;
                }
            }
        }

        join
    }
}

/// Worker loop: take the next job, run it, record the terminal status.
///
/// The queue is the only place an idle worker waits. Once `shutdown` fires
/// the worker stops taking new jobs; jobs left in the queue are cancelled by
/// the engine.
async fn worker_loop(
    worker_id: usize,
    queue: Arc<JobQueue>,
    registry: Arc<StatusRegistry>,
    executor: JobExecutor,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = queue.dequeue() => job,
        };
        let Some(job) = job else {
            break;
        };

        run_job(worker_id, job, &registry, &executor, &shutdown).await;
    }

    tracing::debug!(worker_id, "Worker stopped");
}

async fn run_job(
    worker_id: usize,
    job: Job,
    registry: &StatusRegistry,
    executor: &JobExecutor,
    shutdown: &CancellationToken,
) {
    let job_id = job.id;
    let Some(cancel) = registry.cancel_token(&job_id).await else {
        tracing::warn!(job_id = %job_id, worker_id, "Dequeued job has no status entry, dropping it");
        return;
    };

    // Cancelled while it was waiting in the queue
    if cancel.is_cancelled() {
        let reason = if shutdown.is_cancelled() {
            CancelReason::Shutdown
        } else {
            CancelReason::Requested
        };
        if let Err(e) = registry.cancel(&job_id, reason).await {
            tracing::debug!(job_id = %job_id, error = %e, "Job already settled before start");
        }
        return;
    }

    if let Err(e) = registry.mark_running(&job_id, worker_id).await {
        tracing::debug!(job_id = %job_id, worker_id, error = %e, "Skipping job");
        return;
    }
    tracing::debug!(job_id = %job_id, worker_id, "Job started");

    let result = executor.execute(job, worker_id, cancel, shutdown).await;
    record_result(registry, result).await;
}

async fn record_result(registry: &StatusRegistry, result: ExecutionResult) {
    let ExecutionResult {
        job_id,
        worker_id,
        outcome,
        elapsed,
    } = result;

    let recorded = match outcome {
        ExecutionOutcome::Completed(value) => registry.complete(&job_id, value).await,
        ExecutionOutcome::Failed(error) => registry.fail(&job_id, error).await,
        ExecutionOutcome::Cancelled(reason) => registry.cancel(&job_id, reason).await,
    };

    match recorded {
        Ok(status) => tracing::info!(
            job_id = %job_id,
            worker_id,
            state = %status.state,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job finished"
        ),
        // Forced to Cancelled by the engine while we were still running
        Err(e) => tracing::warn!(job_id = %job_id, worker_id, error = %e, "Job result discarded"),
    }
}
