//! Query engine: ordering, matching and update application
//!
//! Stateless functions over `serde_json::Value` documents. The datastore
//! calls into this module from inside its queued tasks; nothing here
//! touches storage or indexes.

mod compare;
mod errors;
mod matcher;
mod modifiers;
mod path;

pub use compare::{are_comparable, are_things_equal, compare_numbers, compare_things, compare_values};
pub use errors::{QueryError, QueryErrorCode, QueryResult};
pub use matcher::{is_logical_operator, matches, Matcher, WhereFn, WherePredicates};
pub use modifiers::{modify, validate_update, Modifier};
pub use path::{get_dot_value, lookup_path};

pub(crate) use modifiers::{set_path, unset_path};
