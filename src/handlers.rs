//! Built-in job handlers used by the CLI and in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::scheduler::JobError;
use crate::worker::{JobContext, JobHandler};

/// Payload understood by [`SleepHandler`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SleepTask {
    /// How long to "work".
    pub sleep_ms: u64,
    /// Ignore cancellation and sleep the full duration when false.
    #[serde(default = "default_cooperative")]
    pub cooperative: bool,
    /// Fail with this message after sleeping.
    pub fail: Option<String>,
    /// Panic after sleeping.
    pub panic: bool,
    /// Opaque tag echoed back in the result.
    pub tag: Option<Value>,
}

impl Default for SleepTask {
    fn default() -> Self {
        Self {
            sleep_ms: 0,
            cooperative: default_cooperative(),
            fail: None,
            panic: false,
            tag: None,
        }
    }
}

fn default_cooperative() -> bool {
    true
}

/// Sleeps for the requested time, then succeeds, fails or panics as the
/// payload asks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value, JobError> {
        let task: SleepTask = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobError::handler(format!("invalid payload: {}", e)))?;

        let duration = Duration::from_millis(task.sleep_ms);
        if task.cooperative {
            tokio::select! {
                _ = ctx.cancelled() => return Err(JobError::cancelled()),
                _ = tokio::time::sleep(duration) => {}
            }
        } else {
            tokio::time::sleep(duration).await;
        }

        if task.panic {
            panic!("job {} asked to panic", ctx.job_id);
        }
        if let Some(message) = task.fail {
            return Err(JobError::handler(message));
        }

        Ok(json!({
            "slept_ms": task.sleep_ms,
            "worker_id": ctx.worker_id,
            "tag": task.tag,
        }))
    }
}
