pub mod job;
pub mod queue;
pub mod registry;
pub mod retention;

pub use job::{CancelReason, FailureKind, Job, JobError, JobHandle, JobOutcome, JobState, JobStatus};
pub use queue::JobQueue;
pub use registry::{StateCounts, StatusRegistry};
