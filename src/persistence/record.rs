//! Log line format
//!
//! One JSON object per line:
//!
//! - document: the document itself, carrying `_id`
//! - tombstone: exactly `{"$$deleted":true,"_id":"<id>"}`
//! - index created: `{"$$indexCreated":{"fieldName":..,"unique":..,"sparse":..}}`
//! - index removed: `{"$$indexRemoved":"<fieldName>"}`

use serde_json::{Map, Value};

use crate::document::{DELETED_KEY, ID_FIELD, INDEX_CREATED_KEY, INDEX_REMOVED_KEY};
use crate::index::IndexOptions;

/// One decoded log line
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Latest state of a document
    Document(Value),
    /// Document removal
    Tombstone(String),
    /// Index definition
    IndexCreated(IndexOptions),
    /// Index removal
    IndexRemoved(String),
}

/// Why a line could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Not valid JSON, or a malformed record
    Corrupt,
    /// Valid JSON that is not a record; ignored without counting
    Ignored,
}

impl LogRecord {
    /// Tombstone for a document id
    pub fn tombstone(id: impl Into<String>) -> Self {
        LogRecord::Tombstone(id.into())
    }

    /// Decode one line
    pub fn decode(line: &str) -> Result<Self, DecodeOutcome> {
        let value: Value = serde_json::from_str(line).map_err(|_| DecodeOutcome::Corrupt)?;
        let Value::Object(map) = value else {
            return Err(DecodeOutcome::Corrupt);
        };

        if let Some(id) = map.get(ID_FIELD) {
            let id = id.as_str().ok_or(DecodeOutcome::Corrupt)?.to_string();
            if map.len() == 2 && map.get(DELETED_KEY) == Some(&Value::Bool(true)) {
                return Ok(LogRecord::Tombstone(id));
            }
            return Ok(LogRecord::Document(Value::Object(map)));
        }
        if let Some(definition) = map.get(INDEX_CREATED_KEY) {
            let options: IndexOptions = serde_json::from_value(definition.clone())
                .map_err(|_| DecodeOutcome::Corrupt)?;
            return Ok(LogRecord::IndexCreated(options));
        }
        if let Some(field) = map.get(INDEX_REMOVED_KEY) {
            let field = field.as_str().ok_or(DecodeOutcome::Corrupt)?;
            return Ok(LogRecord::IndexRemoved(field.to_string()));
        }
        Err(DecodeOutcome::Ignored)
    }

    /// Encode as one line, without the trailing newline
    pub fn encode(&self) -> String {
        let value = match self {
            LogRecord::Document(doc) => return doc.to_string(),
            LogRecord::Tombstone(id) => {
                let mut map = Map::new();
                map.insert(DELETED_KEY.to_string(), Value::Bool(true));
                map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                Value::Object(map)
            }
            LogRecord::IndexCreated(options) => {
                let mut map = Map::new();
                map.insert(
                    INDEX_CREATED_KEY.to_string(),
                    serde_json::to_value(options).unwrap_or(Value::Null),
                );
                Value::Object(map)
            }
            LogRecord::IndexRemoved(field) => {
                let mut map = Map::new();
                map.insert(INDEX_REMOVED_KEY.to_string(), Value::String(field.clone()));
                Value::Object(map)
            }
        };
        value.to_string()
    }
}
