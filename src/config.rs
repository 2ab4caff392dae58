use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::scheduler::queue::DEFAULT_QUEUE_CAPACITY;

/// Settings for a job engine.
///
/// The engine does not read files or environment variables itself; callers
/// (the CLI, an HTTP front end, tests) build this struct and hand it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of workers. Fixed for the lifetime of the engine.
    pub workers: usize,
    /// Maximum number of jobs waiting in the queue.
    pub queue_capacity: usize,
    /// Deadline applied to jobs submitted without one.
    pub default_deadline: Option<Duration>,
    /// How long shutdown waits for in-flight jobs before forcing them to
    /// `Cancelled`. Also bounds how long a worker waits for a job to react to
    /// its deadline.
    pub grace_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_deadline: None,
            grace_period: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Default::default()
        }
    }

    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(EngineError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if self.grace_period.is_zero() {
            return Err(EngineError::InvalidConfig(
                "grace period must be non-zero".to_string(),
            ));
        }
        if self.default_deadline.is_some_and(|d| d.is_zero()) {
            return Err(EngineError::InvalidConfig(
                "default deadline must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
