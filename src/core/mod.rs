//! Core replication module
//!
//! Provides the replication driver, the tree walker that fans entries out
//! to destinations, the task model, and the bounded worker pool.

mod engine;
mod pool;
mod task;
mod walker;

pub use engine::*;
pub use pool::*;
pub use task::*;
pub use walker::*;
