//! Task executor for docstash
//!
//! Every public datastore operation runs as one task on a single FIFO
//! queue, which serializes all access to datastore state.
//!
//! # Invariants
//!
//! - Tasks run in admission order, one at a time
//! - Before the first successful load, only forced tasks run
//! - A failing task never stalls the tasks behind it

mod errors;
mod queue;

pub use errors::{ExecutorError, ExecutorErrorCode, ExecutorResult};
pub use queue::{Executor, ExecutorPhase};
