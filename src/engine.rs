use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::scheduler::{
    CancelReason, Job, JobHandle, JobOutcome, JobQueue, JobStatus, StateCounts, StatusRegistry,
};
use crate::worker::{JobExecutor, JobHandler, PoolJoin, WorkerPool};

/// One-shot lifecycle of an engine: `Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Draining => write!(f, "draining"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Summary handed back once shutdown has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Final per-state counts of every job still in the registry.
    pub jobs: StateCounts,
    /// Jobs the engine forced to `Cancelled` after the grace period,
    /// including ones that never left the queue.
    pub forced_cancelled: usize,
    /// Jobs still waiting in the queue when the workers stopped.
    pub discarded_queued: usize,
    /// Workers that had to be aborted because they were still busy.
    pub aborted_workers: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub state: LifecycleState,
    pub workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub jobs: StateCounts,
}

/// The job engine: owns the queue, the status registry and the worker pool,
/// and coordinates startup and graceful shutdown.
///
/// Share it behind an `Arc`; every operation takes `&self`.
pub struct Engine {
    config: EngineConfig,
    queue: Arc<JobQueue>,
    registry: Arc<StatusRegistry>,
    shutdown: CancellationToken,
    // Submissions hold the read side for the whole check-register-enqueue
    // sequence; shutdown takes the write side to flip the state.
    lifecycle: RwLock<LifecycleState>,
    pool: Mutex<Option<WorkerPool>>,
    stopped: watch::Sender<Option<ShutdownReport>>,
}

impl Engine {
    /// Validate `config`, spawn every worker, and return an engine that is
    /// ready to accept submissions.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: EngineConfig, handler: Arc<dyn JobHandler>) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(JobQueue::with_capacity(config.queue_capacity));
        let registry = Arc::new(StatusRegistry::new());
        let shutdown = CancellationToken::new();
        let executor = JobExecutor::new(handler, config.grace_period);

        let pool = WorkerPool::spawn(
            config.workers,
            Arc::clone(&queue),
            Arc::clone(&registry),
            executor,
            shutdown.clone(),
        );

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            grace_ms = config.grace_period.as_millis() as u64,
            "Engine started"
        );

        let (stopped, _) = watch::channel(None);
        Ok(Self {
            config,
            queue,
            registry,
            shutdown,
            lifecycle: RwLock::new(LifecycleState::Running),
            pool: Mutex::new(Some(pool)),
            stopped,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle to the status registry, e.g. for a retention reaper.
    pub fn registry(&self) -> Arc<StatusRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn state(&self) -> LifecycleState {
        *self.lifecycle.read().await
    }

    /// Accept a job for asynchronous execution.
    ///
    /// Never waits for queue space: a full queue fails with
    /// [`EngineError::QueueFull`], a draining or stopped engine with
    /// [`EngineError::ShuttingDown`]. `deadline` falls back to the configured
    /// default and starts counting when a worker picks the job up.
    pub async fn submit(&self, payload: Value, deadline: Option<Duration>) -> Result<JobHandle> {
        let lifecycle = self.lifecycle.read().await;
        if *lifecycle != LifecycleState::Running {
            return Err(EngineError::ShuttingDown);
        }

        let slot = self.queue.try_reserve().inspect_err(|e| {
            tracing::debug!(error = %e, "Job rejected");
        })?;

        let job = Job::new(payload, deadline.or(self.config.default_deadline));
        let handle = JobHandle::from(&job);
        self.registry
            .register(&job, self.shutdown.child_token())
            .await;
        slot.send(job);
        drop(lifecycle);

        tracing::debug!(job_id = %handle.id, deadline = ?handle.deadline, "Job submitted");
        Ok(handle)
    }

    pub async fn status(&self, id: &Uuid) -> Result<JobStatus> {
        self.registry
            .get(id)
            .await
            .ok_or(EngineError::NotFound(*id))
    }

    pub async fn result(&self, id: &Uuid) -> Result<JobOutcome> {
        let status = self.status(id).await?;
        Ok(JobOutcome::from(&status))
    }

    /// Request cancellation of a job.
    ///
    /// A pending job is cancelled on the spot. A running job has its token
    /// tripped and settles once its handler reacts. Returns `false` if the
    /// job had already reached a terminal state.
    pub async fn cancel(&self, id: &Uuid) -> Result<bool> {
        let token = self
            .registry
            .cancel_token(id)
            .await
            .ok_or(EngineError::NotFound(*id))?;

        if self
            .registry
            .cancel_if_pending(id, CancelReason::Requested)
            .await?
        {
            token.cancel();
            tracing::info!(job_id = %id, "Pending job cancelled");
            return Ok(true);
        }

        let status = self.status(id).await?;
        if status.is_terminal() {
            return Ok(false);
        }

        token.cancel();
        tracing::info!(job_id = %id, "Cancellation requested for running job");
        Ok(true)
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            state: self.state().await,
            workers: self.config.workers,
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            jobs: self.registry.counts().await,
        }
    }

    /// Gracefully stop the engine.
    ///
    /// 1. Stop accepting submissions
    /// 2. Signal cancellation to every in-flight job
    /// 3. Wait up to the grace period for workers to finish
    /// 4. Force anything still non-terminal to `Cancelled`
    /// 5. Release the workers and report
    ///
    /// Calling this again, concurrently or later, waits for the first call
    /// and returns the same report.
    pub async fn shutdown(&self) -> ShutdownReport {
        {
            let mut lifecycle = self.lifecycle.write().await;
            if *lifecycle != LifecycleState::Running {
                drop(lifecycle);
                return self.wait_stopped().await;
            }
            *lifecycle = LifecycleState::Draining;
        }

        let started = Instant::now();
        tracing::info!(
            grace_ms = self.config.grace_period.as_millis() as u64,
            "Engine draining, no longer accepting jobs"
        );
        self.shutdown.cancel();

        let pool = self.pool.lock().await.take();
        let joined = match pool {
            Some(pool) => pool.join(self.config.grace_period).await,
            None => PoolJoin::default(),
        };

        let discarded_queued = self.queue.drain().await.len();

        let mut forced_cancelled = 0;
        for id in self.registry.non_terminal().await {
            if self
                .registry
                .cancel(&id, CancelReason::Shutdown)
                .await
                .is_ok()
            {
                tracing::debug!(job_id = %id, "Job forced to cancelled");
                forced_cancelled += 1;
            }
        }

        let report = ShutdownReport {
            jobs: self.registry.counts().await,
            forced_cancelled,
            discarded_queued,
            aborted_workers: joined.aborted,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        *self.lifecycle.write().await = LifecycleState::Stopped;
        self.stopped.send_replace(Some(report.clone()));

        tracing::info!(
            completed = report.jobs.completed,
            failed = report.jobs.failed,
            cancelled = report.jobs.cancelled,
            forced_cancelled,
            aborted_workers = joined.aborted,
            elapsed_ms = report.elapsed_ms,
            "Engine stopped"
        );
        report
    }

    async fn wait_stopped(&self) -> ShutdownReport {
        let mut rx = self.stopped.subscribe();
        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => report.clone().unwrap_or_default(),
            Err(_) => ShutdownReport::default(),
        };
        report
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Let workers exit if the engine is dropped without a shutdown
        self.shutdown.cancel();
    }
}
