//! Total ordering and equality over document values
//!
//! `None` stands for a missing field. Type order:
//! missing < null < number < string < boolean < date < array < object

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::document::as_date_millis;

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Bool(_)) => 4,
        Some(v) if as_date_millis(v).is_some() => 5,
        Some(Value::Array(_)) => 6,
        Some(Value::Object(_)) => 7,
    }
}

/// Numeric comparison that keeps integers exact
pub fn compare_numbers(a: &Number, b: &Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Total order across all value types, used for sorting and index keys
pub fn compare_things(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) if rank_a == 5 => {
            as_date_millis(x).cmp(&as_date_millis(y))
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            // Keys iterate sorted, so values line up by key name
            for (left, right) in x.values().zip(y.values()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// `compare_things` over two present values
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    compare_things(Some(a), Some(b))
}

/// Ordering for `$lt`/`$lte`/`$gt`/`$gte`
///
/// Only two numbers, two strings or two dates are comparable.
pub fn are_comparable(a: Option<&Value>, b: &Value) -> Option<Ordering> {
    match (a?, b) {
        (Value::Number(x), Value::Number(y)) => Some(compare_numbers(x, y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (x, y) => match (as_date_millis(x), as_date_millis(y)) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => None,
        },
    }
}

/// Deep equality used by the matcher
///
/// A missing value equals nothing, and an array never equals a non-array.
pub fn are_things_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };

    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Ordering::Equal,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y.iter())
                    .all(|(l, r)| are_things_equal(Some(l), Some(r)))
        }
        (Value::Object(x), Value::Object(y)) => {
            match (as_date_millis(a), as_date_millis(b)) {
                (Some(l), Some(r)) => return l == r,
                (None, None) => {}
                _ => return false,
            }
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, l)| are_things_equal(Some(l), y.get(key)))
        }
        _ => false,
    }
}
