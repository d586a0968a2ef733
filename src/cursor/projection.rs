//! Field projection
//!
//! A projection is either all inclusions (`1`/`true`) or all exclusions
//! (`0`/`false`). `_id` may be toggled independently in both modes and is
//! kept by default.

use serde_json::{Map, Value};

use crate::document::ID_FIELD;
use crate::query::{get_dot_value, set_path, unset_path, QueryError, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Include,
    Exclude,
}

/// Parsed projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    mode: Mode,
    fields: Vec<String>,
    keep_id: bool,
}

fn flag(field: &str, value: &Value) -> QueryResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_f64() == Some(1.0) => Ok(true),
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(false),
        _ => Err(QueryError::invalid_projection(format!(
            "Projection value for {} must be 0 or 1",
            field
        ))),
    }
}

impl Projection {
    /// Parse a projection object
    ///
    /// `None` means the projection selects every field.
    pub fn parse(spec: &Value) -> QueryResult<Option<Self>> {
        let Value::Object(map) = spec else {
            return Err(QueryError::invalid_projection("Projection must be an object"));
        };
        if map.is_empty() {
            return Ok(None);
        }

        let mut keep_id = true;
        let mut mode = None;
        let mut fields = Vec::new();
        for (field, value) in map {
            let include = flag(field, value)?;
            if field == ID_FIELD {
                keep_id = include;
                continue;
            }
            let field_mode = if include { Mode::Include } else { Mode::Exclude };
            match mode {
                Some(m) if m != field_mode => {
                    return Err(QueryError::invalid_projection(
                        "Can't both keep and omit fields except for _id",
                    ))
                }
                _ => mode = Some(field_mode),
            }
            fields.push(field.clone());
        }

        let mode = match mode {
            Some(mode) => mode,
            // Only _id was named
            None if keep_id => Mode::Include,
            None => Mode::Exclude,
        };
        Ok(Some(Self {
            mode,
            fields,
            keep_id,
        }))
    }

    /// Project one document
    pub fn apply(&self, doc: &Value) -> QueryResult<Value> {
        let id = doc.get(ID_FIELD).cloned();
        let mut projected = match self.mode {
            Mode::Include => {
                let mut out = Value::Object(Map::new());
                for field in &self.fields {
                    if let Some(value) = get_dot_value(doc, field) {
                        set_path(&mut out, field, &value)?;
                    }
                }
                out
            }
            Mode::Exclude => {
                let mut out = doc.clone();
                for field in &self.fields {
                    unset_path(&mut out, field);
                }
                out
            }
        };

        if let Value::Object(map) = &mut projected {
            match (self.keep_id, id) {
                (true, Some(id)) => {
                    map.insert(ID_FIELD.to_string(), id);
                }
                (false, _) => {
                    map.remove(ID_FIELD);
                }
                (true, None) => {}
            }
        }
        Ok(projected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(doc: Value, spec: Value) -> Value {
        match Projection::parse(&spec).unwrap() {
            Some(projection) => projection.apply(&doc).unwrap(),
            None => doc,
        }
    }

    #[test]
    fn test_inclusion_keeps_id() {
        let doc = json!({"_id": "x", "a": 1, "b": 2});
        assert_eq!(project(doc, json!({"a": 1})), json!({"_id": "x", "a": 1}));
    }

    #[test]
    fn test_exclusion() {
        let doc = json!({"_id": "x", "a": 1, "b": 2});
        assert_eq!(project(doc, json!({"a": 0})), json!({"_id": "x", "b": 2}));
    }

    #[test]
    fn test_id_toggled_independently() {
        let doc = json!({"_id": "x", "a": 1, "b": 2});
        assert_eq!(project(doc.clone(), json!({"a": 1, "_id": 0})), json!({"a": 1}));
        assert_eq!(project(doc.clone(), json!({"a": 0, "_id": 0})), json!({"b": 2}));
        assert_eq!(project(doc, json!({"_id": 0})), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_mixed_modes_rejected() {
        let err = Projection::parse(&json!({"a": 1, "b": 0})).unwrap_err();
        assert_eq!(err.code(), crate::query::QueryErrorCode::InvalidProjection);
        assert!(Projection::parse(&json!({"a": "yes"})).is_err());
    }

    #[test]
    fn test_nested_paths() {
        let doc = json!({"_id": "x", "p": {"name": "n", "age": 3}, "q": 1});
        assert_eq!(
            project(doc.clone(), json!({"p.name": 1})),
            json!({"_id": "x", "p": {"name": "n"}})
        );
        assert_eq!(
            project(doc, json!({"p.age": 0, "q": false})),
            json!({"_id": "x", "p": {"name": "n"}})
        );
    }

    #[test]
    fn test_missing_included_field_is_omitted() {
        let doc = json!({"_id": "x", "a": 1});
        assert_eq!(project(doc, json!({"zzz": 1})), json!({"_id": "x"}));
    }

    #[test]
    fn test_empty_projection_selects_everything() {
        assert_eq!(Projection::parse(&json!({})).unwrap(), None);
    }
}
