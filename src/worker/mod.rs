//! Workers: state, pool, dispatch and per-worker execution.
//!
//! The dispatcher pulls task ids off the queue, picks the best idle worker
//! for each, claims it through the store and hands the task to that
//! worker's executor loop.

pub mod dispatcher;
pub mod executor;
pub mod pool;
pub mod state;

pub use dispatcher::Dispatcher;
pub use executor::{Executor, ExecutorDeps};
pub use pool::{WorkerPool, find_best_worker};
pub use state::{GENERAL_CAPABILITY, Worker, WorkerSpec, WorkerStats, WorkerStatus};
