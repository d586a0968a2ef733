//! Index subsystem for docstash
//!
//! Indexes are derived, in-memory state rebuilt from the documents on every
//! load. Only their definitions are persisted.
//!
//! # Invariants
//!
//! - Every document appears in every applicable index exactly once per
//!   distinct key
//! - A failed mutation leaves every index as it was before the call
//! - The `_id` index always exists and is unique

mod avl;
mod errors;
mod index;

pub use avl::{AvlTree, DefaultKeyOrder, KeyComparator, ValueEquality};
pub use errors::{IndexError, IndexErrorCode, IndexResult};
pub use index::{FieldKey, Index, IndexOptions};
