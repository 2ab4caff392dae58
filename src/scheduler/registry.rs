use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::scheduler::job::{CancelReason, Job, JobError, JobState, JobStatus};

struct Entry {
    status: RwLock<JobStatus>,
    cancel: CancellationToken,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    fn record(&mut self, state: JobState) {
        match state {
            JobState::Pending => self.pending += 1,
            JobState::Running => self.running += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
            JobState::Cancelled => self.cancelled += 1,
        }
    }
}

/// Concurrent store of job status keyed by job ID.
///
/// The map lock is held only long enough to look up or insert an entry; each
/// entry carries its own lock, so updating one job never blocks a read of
/// another. Every update goes through [`JobState::can_transition_to`], which
/// keeps each job's history monotonic.
#[derive(Default)]
pub struct StatusRegistry {
    entries: RwLock<HashMap<Uuid, Arc<Entry>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly submitted job as `Pending`.
    pub async fn register(&self, job: &Job, cancel: CancellationToken) {
        let entry = Arc::new(Entry {
            status: RwLock::new(JobStatus::pending(job)),
            cancel,
        });
        self.entries.write().await.insert(job.id, entry);
    }

    async fn entry(&self, id: &Uuid) -> Option<Arc<Entry>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn get(&self, id: &Uuid) -> Option<JobStatus> {
        let entry = self.entry(id).await?;
        let status = entry.status.read().await.clone();
        Some(status)
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Replace the status of a job, enforcing the state machine.
    pub async fn set(&self, id: &Uuid, status: JobStatus) -> Result<()> {
        self.update(id, |_| status).await.map(|_| ())
    }

    /// Apply `f` to the current status under the entry lock and store the
    /// result if the transition is legal.
    async fn update<F>(&self, id: &Uuid, f: F) -> Result<JobStatus>
    where
        F: FnOnce(&JobStatus) -> JobStatus,
    {
        let entry = self.entry(id).await.ok_or(EngineError::NotFound(*id))?;
        let mut current = entry.status.write().await;
        let next = f(&current);
        if !current.state.can_transition_to(next.state) {
            return Err(EngineError::InvalidTransition {
                id: *id,
                from: current.state,
                to: next.state,
            });
        }
        *current = next;
        Ok(current.clone())
    }

    pub async fn mark_running(&self, id: &Uuid, worker_id: usize) -> Result<JobStatus> {
        self.update(id, |s| s.running(worker_id)).await
    }

    pub async fn complete(&self, id: &Uuid, result: Value) -> Result<JobStatus> {
        self.update(id, |s| s.completed(result)).await
    }

    pub async fn fail(&self, id: &Uuid, error: JobError) -> Result<JobStatus> {
        self.update(id, |s| s.failed(error)).await
    }

    pub async fn cancel(&self, id: &Uuid, reason: CancelReason) -> Result<JobStatus> {
        self.update(id, |s| s.cancelled(reason)).await
    }

    /// Cancel a job only if no worker has picked it up yet. Returns whether
    /// the job was cancelled.
    pub async fn cancel_if_pending(&self, id: &Uuid, reason: CancelReason) -> Result<bool> {
        let entry = self.entry(id).await.ok_or(EngineError::NotFound(*id))?;
        let mut current = entry.status.write().await;
        if current.state != JobState::Pending {
            return Ok(false);
        }
        *current = current.cancelled(reason);
        Ok(true)
    }

    /// Cancellation token scoped to a single job.
    pub async fn cancel_token(&self, id: &Uuid) -> Option<CancellationToken> {
        self.entry(id).await.map(|e| e.cancel.clone())
    }

    /// Clone out every entry so callers can await entry locks without
    /// holding the map lock.
    async fn snapshot(&self) -> Vec<(Uuid, Arc<Entry>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, e)| (*id, Arc::clone(e)))
            .collect()
    }

    /// IDs of jobs that have not reached a terminal state.
    pub async fn non_terminal(&self) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for (id, entry) in self.snapshot().await {
            if !entry.status.read().await.is_terminal() {
                ids.push(id);
            }
        }
        ids
    }

    pub async fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for (_, entry) in self.snapshot().await {
            counts.record(entry.status.read().await.state);
        }
        counts
    }

    /// Drop a terminal entry. Non-terminal jobs cannot be removed.
    pub async fn remove(&self, id: &Uuid) -> Result<JobStatus> {
        let entry = self.entry(id).await.ok_or(EngineError::NotFound(*id))?;
        let status = entry.status.read().await.clone();
        if !status.is_terminal() {
            return Err(EngineError::NotTerminal(*id));
        }

        // Terminal states are final, so the check above still holds here
        let mut entries = self.entries.write().await;
        if entries.get(id).is_some_and(|e| Arc::ptr_eq(e, &entry)) {
            entries.remove(id);
        }
        Ok(status)
    }

    /// Remove terminal entries whose last update is older than `older_than`.
    /// Returns the number of entries removed.
    ///
    /// Entry locks are only awaited outside the map lock; the map is write
    /// locked just long enough to drop the expired ids.
    pub async fn evict_terminal(&self, older_than: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(age) => Utc::now() - age,
            Err(_) => return 0,
        };

        let mut expired = Vec::new();
        for (id, entry) in self.snapshot().await {
            let (state, updated_at) = {
                let status = entry.status.read().await;
                (status.state, status.updated_at)
            };
            if state.is_terminal() && updated_at <= cutoff {
                expired.push((id, entry));
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().await;
        let mut evicted = 0;
        for (id, entry) in expired {
            if entries.get(&id).is_some_and(|e| Arc::ptr_eq(e, &entry)) {
                entries.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
