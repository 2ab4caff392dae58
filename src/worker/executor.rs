use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scheduler::{CancelReason, Job, JobError};

/// Everything a handler gets to see about the job it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub worker_id: usize,
    pub payload: Value,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: Uuid, worker_id: usize, payload: Value, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            worker_id,
            payload,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job's deadline passes, the job is cancelled, or the
    /// engine starts shutting down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// User code executed for each job.
///
/// Cancellation is cooperative. Handlers should watch
/// [`JobContext::cancelled`] at safe points and return
/// [`JobError::cancelled`] when they stop early. A handler that keeps running
/// past the grace period is abandoned: its job is recorded as `Cancelled` and
/// its task is aborted at its next `.await`. Blocking or CPU-bound code
/// between awaits cannot be preempted and keeps running detached until it
/// returns, holding whatever resources it owns.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, ctx: JobContext) -> Result<Value, JobError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> Result<Value, JobError> {
        (self.f)(ctx).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(JobError),
    Cancelled(CancelReason),
}

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub worker_id: usize,
    pub outcome: ExecutionOutcome,
    pub elapsed: Duration,
}

/// Aborts the wrapped task when dropped, so an aborted worker does not leave
/// its job task behind.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs a single job on behalf of a worker.
///
/// The handler runs in its own task so a panic is contained at the job
/// boundary and reported as a failure instead of unwinding the worker.
#[derive(Clone)]
pub struct JobExecutor {
    handler: Arc<dyn JobHandler>,
    grace_period: Duration,
}

impl JobExecutor {
    pub fn new(handler: Arc<dyn JobHandler>, grace_period: Duration) -> Self {
        Self {
            handler,
            grace_period,
        }
    }

    /// Execute a job under `cancel`, which is tripped by the job's deadline,
    /// an explicit cancel request, or `shutdown` (its parent).
    pub async fn execute(
        &self,
        job: Job,
        worker_id: usize,
        cancel: CancellationToken,
        shutdown: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let job_id = job.id;
        let job_deadline = job.deadline;
        tracing::debug!(job_id = %job_id, worker_id, deadline = ?job_deadline, "Executing job");

        let ctx = JobContext::new(job_id, worker_id, job.payload, cancel.clone());
        let handler = Arc::clone(&self.handler);
        let mut task = AbortOnDrop(tokio::spawn(async move { handler.run(ctx).await }));

        let deadline = async {
            match job_deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        // Reason is fixed when the token first fires
        let mut cancelled_by = None;
        let finished = tokio::select! {
            joined = &mut task.0 => Some(joined),
            _ = cancel.cancelled() => {
                cancelled_by = Some(external_reason(shutdown));
                None
            }
            _ = &mut deadline => {
                cancelled_by = Some(CancelReason::Deadline);
                cancel.cancel();
                None
            }
        };

        let joined = match finished {
            Some(joined) => Some(joined),
            None => match tokio::time::timeout(self.grace_period, &mut task.0).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    tracing::warn!(
                        job_id = %job_id,
                        worker_id,
                        grace_ms = self.grace_period.as_millis() as u64,
                        "Job ignored cancellation, abandoning it"
                    );
                    None
                }
            },
        };
        drop(task);

        let interrupted = cancelled_by.or_else(|| {
            cancel
                .is_cancelled()
                .then(|| external_reason(shutdown))
        });

        ExecutionResult {
            job_id,
            worker_id,
            outcome: Self::process_output(job_id, joined, interrupted),
            elapsed: started.elapsed(),
        }
    }

    fn process_output(
        job_id: Uuid,
        joined: Option<Result<Result<Value, JobError>, JoinError>>,
        interrupted: Option<CancelReason>,
    ) -> ExecutionOutcome {
        match joined {
            // Finished work is kept even if cancellation raced with it
            Some(Ok(Ok(value))) => ExecutionOutcome::Completed(value),
            Some(Ok(Err(error))) => match interrupted {
                Some(reason) => ExecutionOutcome::Cancelled(reason),
                None if error.is_cancellation() => {
                    ExecutionOutcome::Cancelled(CancelReason::Requested)
                }
                None => ExecutionOutcome::Failed(error),
            },
            Some(Err(join_error)) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                tracing::error!(job_id = %job_id, panic = %message, "Job panicked");
                ExecutionOutcome::Failed(JobError::panic(message))
            }
            Some(Err(_)) | None => {
                ExecutionOutcome::Cancelled(interrupted.unwrap_or(CancelReason::Shutdown))
            }
        }
    }
}

/// Why a job token fired when the deadline did not trip it.
fn external_reason(shutdown: &CancellationToken) -> CancelReason {
    if shutdown.is_cancelled() {
        CancelReason::Shutdown
    } else {
        CancelReason::Requested
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
