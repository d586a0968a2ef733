//! docstash - an embeddable, crash-safe document datastore
//!
//! Documents are JSON objects with a string `_id`. Each collection is a
//! `Datastore` that keeps its documents and indexes in memory, appends
//! every change to a log file, and runs every operation on its own FIFO
//! task queue.
//!
//! ```ignore
//! use docstash::{Datastore, DatastoreOptions};
//! use serde_json::json;
//!
//! let db = Datastore::new(DatastoreOptions::with_filename("people.db"))?;
//! db.load_database().await?;
//! db.insert(json!({"name": "ann", "age": 31})).await?;
//! let adults = db.find(json!({"age": {"$gte": 18}})).limit(10).exec().await?;
//! ```

pub mod cli;
pub mod crash_point;
pub mod cursor;
pub mod datastore;
pub mod document;
pub mod executor;
pub mod index;
pub mod observability;
pub mod persistence;
pub mod query;

pub use cursor::{Cursor, SortDirection, SortSpec};
pub use datastore::{
    Datastore, DatastoreError, DatastoreOptions, DatastoreResult, ErrorKind, IndexOptions,
    RemoveOptions, UpdateOptions, UpdateResult,
};
