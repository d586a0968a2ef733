//! Datastore subsystem for docstash
//!
//! One `Datastore` per collection. It owns the documents and indexes,
//! persists every change through `Persistence`, and runs every operation
//! on its own task queue.
//!
//! # Guarantees
//!
//! - Operations take effect in call order, one at a time
//! - A failed operation leaves no partial change behind, in memory or
//!   on disk
//! - Results are copies; mutating them never changes stored documents

mod datastore;
mod errors;
mod options;
mod state;

pub use datastore::{Datastore, RemoveOptions, UpdateOptions, UpdateResult};
pub use errors::{DatastoreError, DatastoreResult, ErrorKind};
pub use options::{DatastoreOptions, MIN_AUTOCOMPACTION_INTERVAL};
pub use crate::index::IndexOptions;
