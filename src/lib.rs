pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStats, LifecycleState, ShutdownReport};
pub use error::{EngineError, Result};
