use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Legal moves of the per-job state machine.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Running)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a job ended up `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelReason {
    Deadline,
    Shutdown,
    Requested,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Deadline => write!(f, "deadline exceeded"),
            CancelReason::Shutdown => write!(f, "engine shutdown"),
            CancelReason::Requested => write!(f, "cancellation requested"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The handler returned an error.
    Handler,
    /// The handler panicked.
    Panic,
    /// The handler stopped because it observed cancellation.
    Cancelled,
}

/// Structured failure description returned by handlers and stored on failed jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Handler,
            message: message.into(),
        }
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Panic,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "job observed cancellation".to_string(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Handler => write!(f, "{}", self.message),
            FailureKind::Panic => write!(f, "job panicked: {}", self.message),
            FailureKind::Cancelled => write!(f, "cancelled: {}", self.message),
        }
    }
}

impl std::error::Error for JobError {}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        JobError::handler(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        JobError::handler(message)
    }
}

/// An immutable unit of work. Owned by the queue until a worker takes it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub payload: Value,
    pub submitted_at: DateTime<Utc>,
    /// Execution budget, measured from the moment a worker starts the job.
    /// Time spent waiting in the queue does not count against it.
    pub deadline: Option<Duration>,
}

impl Job {
    pub fn new(payload: Value, deadline: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            submitted_at: Utc::now(),
            deadline,
        }
    }
}

/// Returned to the submitter once a job is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    /// Effective deadline, relative to the start of execution rather than
    /// to `submitted_at`.
    pub deadline: Option<Duration>,
}

impl From<&Job> for JobHandle {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            submitted_at: job.submitted_at,
            deadline: job.deadline,
        }
    }
}

/// Mutable status record for a job, owned by the status registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    pub result: Option<Value>,
    pub error: Option<JobError>,
    pub cancel_reason: Option<CancelReason>,
    pub worker_id: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn pending(job: &Job) -> Self {
        Self {
            id: job.id,
            state: JobState::Pending,
            result: None,
            error: None,
            cancel_reason: None,
            worker_id: None,
            created_at: job.submitted_at,
            updated_at: job.submitted_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn running(&self, worker_id: usize) -> Self {
        Self {
            state: JobState::Running,
            worker_id: Some(worker_id),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn completed(&self, result: Value) -> Self {
        Self {
            state: JobState::Completed,
            result: Some(result),
            error: None,
            cancel_reason: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn failed(&self, error: JobError) -> Self {
        Self {
            state: JobState::Failed,
            result: None,
            error: Some(error),
            cancel_reason: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn cancelled(&self, reason: CancelReason) -> Self {
        Self {
            state: JobState::Cancelled,
            result: None,
            error: None,
            cancel_reason: Some(reason),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Answer to a result query.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    Failed(JobError),
    Cancelled(Option<CancelReason>),
    NotReady(JobState),
}

impl From<&JobStatus> for JobOutcome {
    fn from(status: &JobStatus) -> Self {
        match status.state {
            JobState::Completed => {
                JobOutcome::Completed(status.result.clone().unwrap_or(Value::Null))
            }
            JobState::Failed => JobOutcome::Failed(
                status
                    .error
                    .clone()
                    .unwrap_or_else(|| JobError::handler("unknown failure")),
            ),
            JobState::Cancelled => JobOutcome::Cancelled(status.cancel_reason),
            state => JobOutcome::NotReady(state),
        }
    }
}
