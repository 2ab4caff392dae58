use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Job queue is at capacity ({capacity})")]
    QueueFull { capacity: usize },

    #[error("Engine is shutting down, not accepting new jobs")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("Job {0} has not reached a terminal state")]
    NotTerminal(Uuid),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Whether the caller may retry the same request against this engine.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::QueueFull { .. })
    }

    /// HTTP-equivalent status code for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::QueueFull { .. } => 429,
            EngineError::ShuttingDown => 503,
            EngineError::NotFound(_) => 404,
            EngineError::NotTerminal(_) => 409,
            EngineError::InvalidConfig(_) => 400,
            EngineError::InvalidTransition { .. } => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
