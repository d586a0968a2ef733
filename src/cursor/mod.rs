//! Cursor subsystem for docstash
//!
//! Composes filtering, sorting, skip/limit and projection into one read.
//! Candidates may come from an index, but every candidate is re-checked
//! against the full query.

mod cursor;
mod projection;
mod sorter;

pub use cursor::{execute, Cursor, CursorOptions};
pub use projection::Projection;
pub use sorter::{parse_sort, ResultSorter, SortDirection, SortSpec};
