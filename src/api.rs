//! Response shapes for a request layer sitting in front of the engine.
//!
//! The engine exposes three operations to the outside world (submit, status,
//! result). These types are what an HTTP front end would serialize for each of
//! them; routing and transport are left to that front end.

use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::scheduler::{CancelReason, JobError, JobHandle, JobOutcome, JobState, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub submitted_at_ms: i64,
    pub deadline_ms: Option<u64>,
}

impl From<&JobHandle> for SubmitResponse {
    fn from(handle: &JobHandle) -> Self {
        Self {
            job_id: handle.id.to_string(),
            submitted_at_ms: handle.submitted_at.timestamp_millis(),
            deadline_ms: handle.deadline.map(|d| d.as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub state: JobState,
    pub worker_id: Option<usize>,
    pub cancel_reason: Option<CancelReason>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl From<&JobStatus> for StatusResponse {
    fn from(status: &JobStatus) -> Self {
        Self {
            job_id: status.id.to_string(),
            state: status.state,
            worker_id: status.worker_id,
            cancel_reason: status.cancel_reason,
            created_at_ms: status.created_at.timestamp_millis(),
            updated_at_ms: status.updated_at.timestamp_millis(),
        }
    }
}

/// Body of a result query. `ready` is false while the job is pending or
/// running, in which case only `state` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultResponse {
    pub job_id: String,
    pub state: JobState,
    pub ready: bool,
    pub result: Option<Value>,
    pub error: Option<JobError>,
    pub cancel_reason: Option<CancelReason>,
}

impl ResultResponse {
    pub fn new(job_id: impl ToString, outcome: JobOutcome) -> Self {
        let job_id = job_id.to_string();
        match outcome {
            JobOutcome::Completed(value) => Self {
                job_id,
                state: JobState::Completed,
                ready: true,
                result: Some(value),
                error: None,
                cancel_reason: None,
            },
            JobOutcome::Failed(error) => Self {
                job_id,
                state: JobState::Failed,
                ready: true,
                result: None,
                error: Some(error),
                cancel_reason: None,
            },
            JobOutcome::Cancelled(reason) => Self {
                job_id,
                state: JobState::Cancelled,
                ready: true,
                result: None,
                error: None,
                cancel_reason: reason,
            },
            JobOutcome::NotReady(state) => Self {
                job_id,
                state,
                ready: false,
                result: None,
                error: None,
                cancel_reason: None,
            },
        }
    }

    /// HTTP-equivalent status code: 200 once settled, 202 while not ready.
    pub fn status_code(&self) -> u16 {
        if self.ready {
            200
        } else {
            202
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: String,
    pub retryable: bool,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.status_code(),
            error: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn not_ready_result_is_accepted() {
        let id = Uuid::new_v4();
        let resp = ResultResponse::new(id, JobOutcome::NotReady(JobState::Running));
        assert!(!resp.ready);
        assert_eq!(resp.status_code(), 202);
        assert_eq!(resp.job_id, id.to_string());
    }

    #[test]
    fn completed_result_serializes() {
        let resp = ResultResponse::new(Uuid::nil(), JobOutcome::Completed(json!({"n": 1})));
        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["state"], json!("completed"));
        assert_eq!(body["ready"], json!(true));
        assert_eq!(body["result"], json!({"n": 1}));
        assert_eq!(body["error"], Value::Null);
    }

    #[test]
    fn failed_result_carries_error() {
        let resp = ResultResponse::new(Uuid::nil(), JobOutcome::Failed(JobError::panic("x")));
        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["error"]["kind"], json!("panic"));
        assert_eq!(resp.status_code(), 200);
    }

    #[test]
    fn error_response_mapping() {
        let resp = ErrorResponse::from(&EngineError::QueueFull { capacity: 4 });
        assert_eq!(resp.code, 429);
        assert!(resp.retryable);

        let resp = ErrorResponse::from(&EngineError::ShuttingDown);
        assert_eq!(resp.code, 503);
        assert!(!resp.retryable);
    }
}
