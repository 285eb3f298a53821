//! Task model: submission specs, tracked tasks, terminal results.

pub mod model;
pub mod state;

pub use model::{Payload, Task, TaskResult, TaskSpec};
pub use state::{Disposition, TaskStatus};
