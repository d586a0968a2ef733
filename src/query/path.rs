//! Dotted field paths
//!
//! `a.b.c` walks nested objects. A numeric segment indexes into an array;
//! any other segment applied to an array maps over its elements and yields
//! the flattened sequence of what it finds.

use serde_json::Value;

enum Resolved {
    Missing,
    One(Value),
    Many(Vec<Value>),
}

/// Resolve a dotted path against a value
///
/// Returns `None` when nothing is found along the path.
pub fn get_dot_value(value: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    match resolve(value, &parts) {
        Resolved::Missing => None,
        Resolved::One(found) => Some(found),
        Resolved::Many(found) => Some(Value::Array(found)),
    }
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn resolve(value: &Value, parts: &[&str]) -> Resolved {
    let Some((head, rest)) = parts.split_first() else {
        return Resolved::One(value.clone());
    };
    let Some(found) = child(value, head) else {
        return Resolved::Missing;
    };
    if rest.is_empty() {
        return Resolved::One(found.clone());
    }

    match found {
        Value::Array(items) if rest[0].parse::<usize>().is_err() => {
            let mut out = Vec::new();
            for item in items {
                match resolve(item, rest) {
                    Resolved::Missing => {}
                    Resolved::One(v) => out.push(v),
                    Resolved::Many(vs) => out.extend(vs),
                }
            }
            if out.is_empty() {
                Resolved::Missing
            } else {
                Resolved::Many(out)
            }
        }
        other => resolve(other, rest),
    }
}

/// Walk a dotted path without mapping over arrays
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| child(current, segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_objects() {
        let doc = json!({"a": {"b": {"c": 4}}});
        assert_eq!(get_dot_value(&doc, "a.b.c"), Some(json!(4)));
        assert_eq!(get_dot_value(&doc, "a.b"), Some(json!({"c": 4})));
        assert_eq!(get_dot_value(&doc, "a.x.c"), None);
    }

    #[test]
    fn test_array_index_segment() {
        let doc = json!({"planets": [{"name": "Earth"}, {"name": "Mars"}]});
        assert_eq!(get_dot_value(&doc, "planets.1.name"), Some(json!("Mars")));
        assert_eq!(get_dot_value(&doc, "planets.5.name"), None);
        let nested = json!({"m": [[1, 2], [3]]});
        assert_eq!(get_dot_value(&nested, "m.0.1"), Some(json!(2)));
    }

    #[test]
    fn test_mapping_over_arrays_flattens() {
        let doc = json!({"a": [{"b": [{"c": 1}, {"c": 2}]}, {"b": {"c": 3}}, {"x": 0}]});
        assert_eq!(get_dot_value(&doc, "a.b.c"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_mapping_keeps_leaf_arrays() {
        let doc = json!({"a": [{"tags": ["x", "y"]}, {"tags": ["z"]}]});
        assert_eq!(get_dot_value(&doc, "a.tags"), Some(json!([["x", "y"], ["z"]])));
    }

    #[test]
    fn test_mapping_with_nothing_found_is_missing() {
        let doc = json!({"a": [{"x": 1}]});
        assert_eq!(get_dot_value(&doc, "a.b"), None);
    }

    #[test]
    fn test_lookup_path_does_not_map() {
        let doc = json!({"a": [{"b": 1}], "c": {"d": 2}});
        assert_eq!(lookup_path(&doc, "c.d"), Some(&json!(2)));
        assert_eq!(lookup_path(&doc, "a.0.b"), Some(&json!(1)));
        assert_eq!(lookup_path(&doc, "a.b"), None);
    }
}
