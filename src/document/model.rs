//! Document model
//!
//! Documents are JSON objects. Dates are encoded as `{"$$date": <epoch ms>}`
//! so that they survive a round trip through the line format and compare
//! as their own type.

use chrono::{DateTime, TimeZone, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

use crate::query::{QueryError, QueryResult};

/// Primary key field
pub const ID_FIELD: &str = "_id";
/// Date wrapper key
pub const DATE_KEY: &str = "$$date";
/// Tombstone marker key
pub const DELETED_KEY: &str = "$$deleted";
/// Index definition record key
pub const INDEX_CREATED_KEY: &str = "$$indexCreated";
/// Index removal record key
pub const INDEX_REMOVED_KEY: &str = "$$indexRemoved";
/// Creation timestamp field, set when `timestamp_data` is on
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Update timestamp field, set when `timestamp_data` is on
pub const UPDATED_AT_FIELD: &str = "updatedAt";

const ID_LENGTH: usize = 16;

/// Generate a random 16-character alphanumeric id
pub fn create_new_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Encode a timestamp as a date value
pub fn date_value(at: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(DATE_KEY.to_string(), Value::from(at.timestamp_millis()));
    Value::Object(map)
}

/// The current time as a date value
pub fn now_value() -> Value {
    date_value(Utc::now())
}

/// Epoch milliseconds if `value` is a date
pub fn as_date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(DATE_KEY).and_then(Value::as_i64),
        _ => None,
    }
}

/// Decode a date value into a timestamp
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    as_date_millis(value).and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Returns true if `value` is a date
pub fn is_date(value: &Value) -> bool {
    as_date_millis(value).is_some()
}

/// Null, boolean, number, string or date
pub fn is_primitive(value: &Value) -> bool {
    match value {
        Value::Array(_) => false,
        Value::Object(_) => is_date(value),
        _ => true,
    }
}

/// The document's `_id` if it is a string
pub fn document_id(doc: &Value) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Validate one field name
pub fn check_key(key: &str, value: &Value) -> QueryResult<()> {
    // Log record markers ($$deleted, $$indexCreated, $$indexRemoved) are
    // never valid in a document
    let is_date_marker = key == DATE_KEY && value.is_number();
    if key.starts_with('$') && !is_date_marker {
        return Err(QueryError::invalid_document(format!(
            "Field names cannot begin with the $ character: {}",
            key
        )));
    }
    if key.contains('.') {
        return Err(QueryError::invalid_document(format!(
            "Field names cannot contain a .: {}",
            key
        )));
    }
    Ok(())
}

/// Validate every field name in a document, recursively
pub fn check_object(value: &Value) -> QueryResult<()> {
    match value {
        Value::Array(items) => items.iter().try_for_each(check_object),
        Value::Object(map) => {
            for (key, child) in map {
                check_key(key, child)?;
                check_object(child)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Independent structural copy of a value
pub fn deep_copy(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(deep_copy).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), deep_copy(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Copy that drops `$`-prefixed and dotted keys
///
/// Used to derive an upsert's base document from its query.
pub fn deep_copy_strict(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(deep_copy_strict).collect()),
        Value::Object(_) if is_date(value) => value.clone(),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with('$') && !k.contains('.'))
                .map(|(k, v)| (k.clone(), deep_copy_strict(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
