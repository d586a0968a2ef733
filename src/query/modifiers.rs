//! Update application
//!
//! An update is either a replacement document (no `$` keys) or an object of
//! modifiers, each mapping dotted field paths to arguments. Mixing the two
//! forms, unknown modifiers and changing `_id` are rejected.

use std::cmp::Ordering;

use chrono::Utc;
use serde_json::{Map, Value};

use super::compare::{are_things_equal, compare_values};
use super::errors::{QueryError, QueryResult};
use super::matcher::{is_logical_operator, Matcher, WherePredicates};
use super::path::lookup_path;
use crate::document::{check_object, deep_copy, is_date, now_value, ID_FIELD};

/// Supported update modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Set,
    Unset,
    Inc,
    Min,
    Max,
    Push,
    AddToSet,
    Pop,
    Pull,
    Rename,
    CurrentDate,
}

impl Modifier {
    /// Parse a `$`-prefixed modifier name
    pub fn parse(name: &str) -> QueryResult<Self> {
        match name {
            "$set" => Ok(Modifier::Set),
            "$unset" => Ok(Modifier::Unset),
            "$inc" => Ok(Modifier::Inc),
            "$min" => Ok(Modifier::Min),
            "$max" => Ok(Modifier::Max),
            "$push" => Ok(Modifier::Push),
            "$addToSet" => Ok(Modifier::AddToSet),
            "$pop" => Ok(Modifier::Pop),
            "$pull" => Ok(Modifier::Pull),
            "$rename" => Ok(Modifier::Rename),
            "$currentDate" => Ok(Modifier::CurrentDate),
            other => Err(QueryError::invalid_update(format!("Unknown modifier {}", other))),
        }
    }
}

/// Check the shape of `update` without a document
///
/// Rejects non-object updates, mixed modifiers and fields, unknown
/// modifiers, non-object modifier arguments and replacements with
/// forbidden field names. Everything that depends on
/// the target document is checked by `modify`.
pub fn validate_update(update: &Value) -> QueryResult<()> {
    let spec = update
        .as_object()
        .ok_or_else(|| QueryError::invalid_update("Update must be an object"))?;

    let dollar = spec.keys().filter(|k| k.starts_with('$')).count();
    if dollar == 0 {
        return check_object(update);
    }
    if dollar != spec.len() {
        return Err(QueryError::invalid_update("You cannot mix modifiers and normal fields"));
    }
    for (name, fields) in spec {
        Modifier::parse(name)?;
        if !fields.is_object() {
            return Err(QueryError::invalid_update(format!(
                "Modifier {}'s argument must be an object",
                name
            )));
        }
    }
    Ok(())
}

/// Apply `update` to `doc`, returning the new document
///
/// The input is never modified. The result passes `check_object`.
pub fn modify(doc: &Value, update: &Value) -> QueryResult<Value> {
    let spec = update
        .as_object()
        .ok_or_else(|| QueryError::invalid_update("Update must be an object"))?;

    let dollar = spec.keys().filter(|k| k.starts_with('$')).count();
    if dollar != 0 && dollar != spec.len() {
        return Err(QueryError::invalid_update("You cannot mix modifiers and normal fields"));
    }

    let old_id = doc.get(ID_FIELD);
    let new_doc = if dollar == 0 {
        if let (Some(wanted), Some(current)) = (spec.get(ID_FIELD), old_id) {
            if !are_things_equal(Some(wanted), Some(current)) {
                return Err(QueryError::invalid_update("You cannot change a document's _id"));
            }
        }
        let mut replacement = deep_copy(update);
        if let (Value::Object(map), Some(id)) = (&mut replacement, old_id) {
            map.insert(ID_FIELD.to_string(), id.clone());
        }
        replacement
    } else {
        let mut copy = deep_copy(doc);
        for (name, fields) in spec {
            let modifier = Modifier::parse(name)?;
            let fields = fields.as_object().ok_or_else(|| {
                QueryError::invalid_update(format!("Modifier {}'s argument must be an object", name))
            })?;
            for (path, argument) in fields {
                apply_modifier(&mut copy, modifier, path, argument)?;
            }
        }
        copy
    };

    check_object(&new_doc)?;
    if let Some(id) = old_id {
        if !are_things_equal(new_doc.get(ID_FIELD), Some(id)) {
            return Err(QueryError::invalid_update("You cannot change a document's _id"));
        }
    }
    Ok(new_doc)
}

fn apply_modifier(doc: &mut Value, modifier: Modifier, path: &str, argument: &Value) -> QueryResult<()> {
    if modifier == Modifier::Rename {
        return rename(doc, path, argument);
    }
    let parts: Vec<&str> = path.split('.').collect();
    apply_at_path(doc, &parts, modifier, argument)
}

fn apply_at_path(target: &mut Value, parts: &[&str], modifier: Modifier, argument: &Value) -> QueryResult<()> {
    let (head, rest) = match parts.split_first() {
        Some((head, rest)) if !rest.is_empty() => (*head, rest),
        Some((head, _)) => return apply_last_step(target, head, modifier, argument),
        None => return Ok(()),
    };
    let lenient = matches!(modifier, Modifier::Unset | Modifier::Pull | Modifier::Pop);

    let next = match target {
        Value::Object(map) => {
            if !map.contains_key(head) {
                if lenient {
                    return Ok(());
                }
                map.insert(head.to_string(), Value::Object(Map::new()));
            }
            map.get_mut(head)
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(i) if i < items.len() => items.get_mut(i),
            _ if lenient => return Ok(()),
            _ => {
                return Err(QueryError::invalid_update(format!(
                    "Cannot traverse array with non-index field {}",
                    head
                )))
            }
        },
        _ if lenient => return Ok(()),
        _ => {
            return Err(QueryError::invalid_update(format!(
                "Cannot create field {} inside a non-object value",
                head
            )))
        }
    };

    match next {
        Some(child) => apply_at_path(child, rest, modifier, argument),
        None => Ok(()),
    }
}

fn get_field<'a>(target: &'a Value, field: &str) -> Option<&'a Value> {
    match target {
        Value::Object(map) => map.get(field),
        Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn set_field(target: &mut Value, field: &str, value: Value) -> QueryResult<()> {
    match target {
        Value::Object(map) => {
            map.insert(field.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = field.parse::<usize>().map_err(|_| {
                QueryError::invalid_update(format!("Cannot set non-index field {} on an array", field))
            })?;
            match index.cmp(&items.len()) {
                Ordering::Less => items[index] = value,
                Ordering::Equal => items.push(value),
                Ordering::Greater => {
                    return Err(QueryError::invalid_update(format!(
                        "Cannot set index {} on an array of length {}",
                        index,
                        items.len()
                    )))
                }
            }
            Ok(())
        }
        _ => Err(QueryError::invalid_update(format!(
            "Cannot set field {} on a non-object value",
            field
        ))),
    }
}

fn remove_field(target: &mut Value, field: &str) -> Option<Value> {
    match target {
        Value::Object(map) => map.remove(field),
        Value::Array(items) => {
            let index = field.parse::<usize>().ok().filter(|i| *i < items.len())?;
            Some(std::mem::replace(&mut items[index], Value::Null))
        }
        _ => None,
    }
}

fn apply_last_step(target: &mut Value, field: &str, modifier: Modifier, argument: &Value) -> QueryResult<()> {
    match modifier {
        Modifier::Set => set_field(target, field, argument.clone()),
        Modifier::Unset => {
            remove_field(target, field);
            Ok(())
        }
        Modifier::Inc => {
            let step = match argument {
                Value::Number(n) => n,
                _ => {
                    return Err(QueryError::invalid_update(format!("{} must be a number", argument)))
                }
            };
            let next = match get_field(target, field) {
                None => argument.clone(),
                Some(Value::Number(current)) => add_numbers(current, step),
                Some(_) => {
                    return Err(QueryError::invalid_update(
                        "Don't use the $inc modifier on non-number fields",
                    ))
                }
            };
            set_field(target, field, next)
        }
        Modifier::Min | Modifier::Max => {
            let wanted = if modifier == Modifier::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let replace = match get_field(target, field) {
                None => true,
                Some(current) => compare_values(argument, current) == wanted,
            };
            if replace {
                set_field(target, field, argument.clone())?;
            }
            Ok(())
        }
        Modifier::Push => {
            let mut items = take_array(target, field, "$push", true)?;
            push_items(&mut items, argument)?;
            set_field(target, field, Value::Array(items))
        }
        Modifier::AddToSet => {
            let mut items = take_array(target, field, "$addToSet", true)?;
            add_to_set(&mut items, argument)?;
            set_field(target, field, Value::Array(items))
        }
        Modifier::Pop => {
            if get_field(target, field).is_none() {
                return Ok(());
            }
            let mut items = take_array(target, field, "$pop", false)?;
            let direction = argument
                .as_i64()
                .ok_or_else(|| QueryError::invalid_update(format!("{} isn't an integer, can't use it with $pop", argument)))?;
            if direction > 0 {
                items.pop();
            } else if direction < 0 && !items.is_empty() {
                items.remove(0);
            }
            set_field(target, field, Value::Array(items))
        }
        Modifier::Pull => {
            if get_field(target, field).is_none() {
                return Ok(());
            }
            let items = take_array(target, field, "$pull", false)?;
            let wheres = WherePredicates::new();
            let matcher = Matcher::new(&wheres);
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                if !pull_matches(&matcher, &item, argument)? {
                    kept.push(item);
                }
            }
            set_field(target, field, Value::Array(kept))
        }
        Modifier::CurrentDate => {
            let stamp = match argument {
                Value::Bool(true) => now_value(),
                Value::Object(spec) => match spec.get("$type").and_then(Value::as_str) {
                    Some("date") => now_value(),
                    Some("timestamp") => Value::from(Utc::now().timestamp_millis()),
                    _ => {
                        return Err(QueryError::invalid_update(
                            "$currentDate $type must be \"date\" or \"timestamp\"",
                        ))
                    }
                },
                _ => {
                    return Err(QueryError::invalid_update(
                        "$currentDate expects true or a {$type} object",
                    ))
                }
            };
            set_field(target, field, stamp)
        }
        Modifier::Rename => Ok(()),
    }
}

fn take_array(target: &Value, field: &str, name: &str, create: bool) -> QueryResult<Vec<Value>> {
    match get_field(target, field) {
        None if create => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(QueryError::invalid_update(format!(
            "Can't {} an element on non-array values",
            name
        ))),
    }
}

fn add_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Value::from(sum);
        }
    }
    Value::from(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
}

fn push_items(items: &mut Vec<Value>, argument: &Value) -> QueryResult<()> {
    let spec = match argument {
        Value::Object(spec) if spec.contains_key("$each") || spec.contains_key("$slice") => spec,
        _ => {
            items.push(argument.clone());
            return Ok(());
        }
    };
    if spec.keys().any(|k| k != "$each" && k != "$slice") {
        return Err(QueryError::invalid_update(
            "Can only use $slice in conjunction with $each when $push to array",
        ));
    }
    if let Some(each) = spec.get("$each") {
        let each = each
            .as_array()
            .ok_or_else(|| QueryError::invalid_update("$each requires an array value"))?;
        items.extend(each.iter().cloned());
    }
    if let Some(slice) = spec.get("$slice") {
        let slice = slice
            .as_i64()
            .ok_or_else(|| QueryError::invalid_update("$slice requires an integer value"))?;
        let keep = slice.unsigned_abs() as usize;
        if slice >= 0 {
            items.truncate(keep);
        } else if keep < items.len() {
            items.drain(..items.len() - keep);
        }
    }
    Ok(())
}

fn add_to_set(items: &mut Vec<Value>, argument: &Value) -> QueryResult<()> {
    let candidates = match argument {
        Value::Object(spec) if spec.contains_key("$each") => {
            if spec.len() > 1 {
                return Err(QueryError::invalid_update("Can't use another field in conjunction with $each"));
            }
            spec["$each"]
                .as_array()
                .ok_or_else(|| QueryError::invalid_update("$each requires an array value"))?
                .clone()
        }
        other => vec![other.clone()],
    };
    for candidate in candidates {
        if !items.iter().any(|existing| compare_values(existing, &candidate) == Ordering::Equal) {
            items.push(candidate);
        }
    }
    Ok(())
}

/// An operator-only condition matches the element as a value; anything
/// else is matched as a query against the element
fn pull_matches(matcher: &Matcher<'_>, item: &Value, condition: &Value) -> QueryResult<bool> {
    if let Value::Object(ops) = condition {
        let operator_only = !ops.is_empty()
            && !is_date(condition)
            && ops.keys().all(|k| k.starts_with('$') && !is_logical_operator(k));
        if operator_only {
            return matcher.match_value(Some(item), condition, false);
        }
    }
    matcher.matches(item, condition)
}

fn rename(doc: &mut Value, from: &str, argument: &Value) -> QueryResult<()> {
    let to = argument
        .as_str()
        .ok_or_else(|| QueryError::invalid_update("$rename target must be a string"))?;
    if to == from {
        return Err(QueryError::invalid_update("$rename source and target must differ"));
    }
    let Some(moved) = lookup_path(doc, from).cloned() else {
        return Ok(());
    };
    let from_parts: Vec<&str> = from.split('.').collect();
    apply_at_path(doc, &from_parts, Modifier::Unset, &Value::Null)?;
    let to_parts: Vec<&str> = to.split('.').collect();
    apply_at_path(doc, &to_parts, Modifier::Set, &moved)
}

/// Set a value at a dotted path, creating intermediate objects
pub(crate) fn set_path(doc: &mut Value, path: &str, value: &Value) -> QueryResult<()> {
    let parts: Vec<&str> = path.split('.').collect();
    apply_at_path(doc, &parts, Modifier::Set, value)
}

/// Remove the value at a dotted path if present
pub(crate) fn unset_path(doc: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    let _ = apply_at_path(doc, &parts, Modifier::Unset, &Value::Null);
}
