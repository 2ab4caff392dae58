//! Worker pool and per-job execution.
//!
//! - **Execution**: [`JobExecutor`] runs one job through a [`JobHandler`] in
//!   its own task, enforcing the job's deadline and containing panics
//! - **Pool**: [`WorkerPool`] owns the fixed set of workers pulling from the
//!   shared queue
//!
//! # Execution Flow
//!
//! 1. An idle worker waits on [`JobQueue::dequeue`](crate::scheduler::JobQueue::dequeue)
//! 2. The job is marked `Running` in the status registry
//! 3. [`JobExecutor::execute`] runs the handler under the job's cancellation token
//! 4. The worker records `Completed`, `Failed` or `Cancelled`
//!
//! # Cancellation
//!
//! Cancellation is cooperative; see [`JobHandler`] for what happens to
//! handlers that do not react to it.

pub mod executor;
pub mod pool;

pub use executor::{
    handler_fn, ExecutionOutcome, ExecutionResult, FnHandler, JobContext, JobExecutor, JobHandler,
};
pub use pool::{PoolJoin, WorkerPool};
