//! Handler abstraction and registry.

pub mod builtin;
pub mod handler;
pub mod registry;

pub use builtin::GeneralHandler;
pub use handler::{FnHandler, HandlerContext, TaskHandler};
pub use registry::HandlerRegistry;
