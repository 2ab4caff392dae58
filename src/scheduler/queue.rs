use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::error::{EngineError, Result};
use crate::scheduler::job::Job;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded FIFO hand-off between submitters and workers.
///
/// Enqueueing never waits: a full queue is reported as
/// [`EngineError::QueueFull`]. Workers share the receiving half behind an
/// async mutex, so only the worker holding the lock is parked in `recv` and
/// each job wakes exactly one of them.
#[derive(Debug)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    rx: Mutex<mpsc::Receiver<Job>>,
    capacity: usize,
}

/// A reserved queue slot. Sending through it cannot fail for lack of space.
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, Job>,
}

impl QueueSlot<'_> {
    pub fn send(self, job: Job) {
        self.permit.send(job);
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is zero. Engine configuration is validated before
    /// a queue is built.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Reserve space for one job without enqueueing anything yet.
    pub fn try_reserve(&self) -> Result<QueueSlot<'_>> {
        match self.tx.try_reserve() {
            Ok(permit) => Ok(QueueSlot { permit }),
            Err(TrySendError::Full(())) => Err(EngineError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(())) => Err(EngineError::ShuttingDown),
        }
    }

    /// Enqueue a job, failing immediately when the queue is full.
    pub fn try_enqueue(&self, job: Job) -> Result<()> {
        self.try_reserve()?.send(job);
        Ok(())
    }

    /// Wait for the next job in submission order.
    ///
    /// Cancel safe: dropping the future never loses a job.
    pub async fn dequeue(&self) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Remove every job still waiting. Used once workers have stopped.
    pub async fn drain(&self) -> Vec<Job> {
        let mut rx = self.rx.lock().await;
        let mut jobs = Vec::with_capacity(self.len());
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    /// Number of jobs waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
