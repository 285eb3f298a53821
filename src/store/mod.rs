//! State layer: task and worker maps behind a swappable store.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{Settlement, TaskCounts, TaskStore, WorkerCounts};
