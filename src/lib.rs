//! Task Supervisor: in-process task scheduling over a capability-ranked
//! worker pool.

pub mod config;
pub mod decompose;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod results;
pub mod store;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use config::SupervisorConfig;
pub use decompose::{DecompositionStrategy, KeywordStrategy, TemplateStep, TemplateStrategy};
pub use error::{Error, HandlerError, Result};
pub use handlers::{HandlerContext, TaskHandler};
pub use results::ResultStats;
pub use supervisor::{Supervisor, SystemStatus, WorkerStatusReport};
pub use task::{Payload, Task, TaskResult, TaskSpec, TaskStatus};
pub use worker::{Worker, WorkerSpec, WorkerStatus};
