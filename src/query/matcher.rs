//! Query matching
//!
//! A query is an object of field paths to conditions plus the logical
//! operators `$and`, `$or`, `$not` and `$where`. A condition is either a
//! plain value (deep equality) or an object of comparison operators.
//! When a field resolves to an array, a condition matches if it holds for
//! at least one element, except `$size` and `$elemMatch` and plain-array
//! equality, which look at the whole array.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use super::compare::{are_comparable, are_things_equal};
use super::errors::{QueryError, QueryResult};
use super::path::get_dot_value;
use crate::document::{is_date, is_primitive};

/// Predicate callable from a `$where` clause
pub type WhereFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Named predicates a `$where` clause can refer to
#[derive(Clone, Default)]
pub struct WherePredicates {
    predicates: HashMap<String, WhereFn>,
}

impl WherePredicates {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a predicate
    pub fn register(&mut self, name: impl Into<String>, predicate: WhereFn) {
        self.predicates.insert(name.into(), predicate);
    }

    /// Look up a predicate by name
    pub fn get(&self, name: &str) -> Option<&WhereFn> {
        self.predicates.get(name)
    }

    /// Number of registered predicates
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Returns true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl fmt::Debug for WherePredicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.predicates.keys().collect();
        names.sort();
        f.debug_struct("WherePredicates").field("names", &names).finish()
    }
}

const LOGICAL_OPERATORS: [&str; 4] = ["$and", "$or", "$not", "$where"];

/// Returns true if `key` is a logical operator
pub fn is_logical_operator(key: &str) -> bool {
    LOGICAL_OPERATORS.contains(&key)
}

/// Evaluates queries against documents
#[derive(Debug, Clone, Copy)]
pub struct Matcher<'a> {
    wheres: &'a WherePredicates,
}

impl<'a> Matcher<'a> {
    /// Create a matcher resolving `$where` names in `wheres`
    pub fn new(wheres: &'a WherePredicates) -> Self {
        Self { wheres }
    }

    /// Does `doc` satisfy `query`
    pub fn matches(&self, doc: &Value, query: &Value) -> QueryResult<bool> {
        // Primitive on either side: compare the whole value
        let query_map = match query {
            Value::Object(map) if !is_date(query) => map,
            _ => return self.match_value(Some(doc), query, false),
        };
        if is_primitive(doc) {
            return self.match_value(Some(doc), query, false);
        }

        for (key, condition) in query_map {
            let matched = if key.starts_with('$') {
                self.match_logical(doc, key, condition)?
            } else {
                let found = get_dot_value(doc, key);
                self.match_value(found.as_ref(), condition, false)?
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Check the shape of `query` without a document
    ///
    /// Catches every error `matches` could raise against an object
    /// document, so a malformed query fails even when nothing is tested.
    pub fn validate(&self, query: &Value) -> QueryResult<()> {
        let query_map = match query {
            Value::Object(map) if !is_date(query) => map,
            _ => return Ok(()),
        };
        for (key, condition) in query_map {
            if key.starts_with('$') {
                self.validate_logical(key, condition)?;
            } else {
                self.validate_condition(condition)?;
            }
        }
        Ok(())
    }

    fn validate_logical(&self, operator: &str, operand: &Value) -> QueryResult<()> {
        match operator {
            "$or" | "$and" => Self::clauses(operator, operand)?
                .iter()
                .try_for_each(|sub| self.validate(sub)),
            "$not" => self.validate(operand),
            "$where" => {
                let name = operand.as_str().ok_or_else(|| {
                    QueryError::invalid_query("$where operator expects a predicate name")
                })?;
                match self.wheres.get(name) {
                    Some(_) => Ok(()),
                    None => Err(QueryError::invalid_query(format!(
                        "No $where predicate named {}",
                        name
                    ))),
                }
            }
            other => Err(QueryError::invalid_query(format!(
                "Unknown logical operator {}",
                other
            ))),
        }
    }

    /// A sub-query, or a bare operator set for primitive elements
    fn validate_elem_match(&self, operand: &Value) -> QueryResult<()> {
        let operators_only = operand.as_object().is_some_and(|ops| {
            !ops.is_empty() && ops.keys().all(|k| k.starts_with('$') && !is_logical_operator(k))
        });
        if operators_only {
            self.validate_condition(operand)
        } else {
            self.validate(operand)
        }
    }

    fn validate_condition(&self, condition: &Value) -> QueryResult<()> {
        let Value::Object(ops) = condition else {
            return Ok(());
        };
        if is_date(condition) {
            return Ok(());
        }
        let dollar = ops.keys().filter(|k| k.starts_with('$')).count();
        if dollar == 0 {
            return Ok(());
        }
        if dollar != ops.len() {
            return Err(QueryError::invalid_query(
                "You cannot mix operators and normal fields",
            ));
        }

        for (operator, operand) in ops {
            match operator.as_str() {
                "$eq" | "$ne" | "$lt" | "$lte" | "$gt" | "$gte" | "$exists" => {}
                "$in" | "$nin" => {
                    if !operand.is_array() {
                        return Err(QueryError::invalid_query(format!(
                            "{} operator called with a non-array",
                            operator
                        )));
                    }
                }
                "$regex" => {
                    compile_regex(operand)?;
                }
                "$size" => {
                    integer_operand(operand).ok_or_else(|| {
                        QueryError::invalid_query("$size operator called without an integer")
                    })?;
                }
                "$elemMatch" => self.validate_elem_match(operand)?,
                other => {
                    return Err(QueryError::invalid_query(format!(
                        "Unknown comparison function {}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    fn match_logical(&self, doc: &Value, operator: &str, operand: &Value) -> QueryResult<bool> {
        match operator {
            "$or" => {
                for sub in Self::clauses(operator, operand)? {
                    if self.matches(doc, sub)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            "$and" => {
                for sub in Self::clauses(operator, operand)? {
                    if !self.matches(doc, sub)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            "$not" => Ok(!self.matches(doc, operand)?),
            "$where" => {
                let name = operand.as_str().ok_or_else(|| {
                    QueryError::invalid_query("$where operator expects a predicate name")
                })?;
                let predicate = self.wheres.get(name).ok_or_else(|| {
                    QueryError::invalid_query(format!("No $where predicate named {}", name))
                })?;
                Ok(predicate(doc))
            }
            other => Err(QueryError::invalid_query(format!(
                "Unknown logical operator {}",
                other
            ))),
        }
    }

    fn clauses<'q>(operator: &str, operand: &'q Value) -> QueryResult<&'q Vec<Value>> {
        operand.as_array().ok_or_else(|| {
            QueryError::invalid_query(format!("{} operator used without an array", operator))
        })
    }

    /// Match a resolved field value against one condition
    pub(crate) fn match_value(
        &self,
        found: Option<&Value>,
        condition: &Value,
        whole_array: bool,
    ) -> QueryResult<bool> {
        if let (Some(Value::Array(items)), false) = (found, whole_array) {
            if condition.is_array() {
                return self.match_value(found, condition, true);
            }
            if let Value::Object(ops) = condition {
                if ops.contains_key("$size") || ops.contains_key("$elemMatch") {
                    return self.match_value(found, condition, true);
                }
            }
            for item in items {
                if self.match_value(Some(item), condition, false)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if let Value::Object(ops) = condition {
            if !is_date(condition) {
                let dollar = ops.keys().filter(|k| k.starts_with('$')).count();
                if dollar != 0 && dollar != ops.len() {
                    return Err(QueryError::invalid_query(
                        "You cannot mix operators and normal fields",
                    ));
                }
                if dollar > 0 {
                    return self.match_operators(found, ops);
                }
            }
        }

        Ok(are_things_equal(found, Some(condition)))
    }

    fn match_operators(&self, found: Option<&Value>, ops: &Map<String, Value>) -> QueryResult<bool> {
        for (operator, operand) in ops {
            if !self.compare_with(operator, found, operand)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare_with(&self, operator: &str, found: Option<&Value>, operand: &Value) -> QueryResult<bool> {
        let ordered = |wanted: &[Ordering]| {
            are_comparable(found, operand).map_or(false, |o| wanted.contains(&o))
        };

        match operator {
            "$eq" => Ok(are_things_equal(found, Some(operand))),
            "$ne" => Ok(found.is_none() || !are_things_equal(found, Some(operand))),
            "$lt" => Ok(ordered(&[Ordering::Less])),
            "$lte" => Ok(ordered(&[Ordering::Less, Ordering::Equal])),
            "$gt" => Ok(ordered(&[Ordering::Greater])),
            "$gte" => Ok(ordered(&[Ordering::Greater, Ordering::Equal])),
            "$in" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| QueryError::invalid_query("$in operator called with a non-array"))?;
                Ok(candidates.iter().any(|c| are_things_equal(found, Some(c))))
            }
            "$nin" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| QueryError::invalid_query("$nin operator called with a non-array"))?;
                Ok(!candidates.iter().any(|c| are_things_equal(found, Some(c))))
            }
            "$regex" => {
                let regex = compile_regex(operand)?;
                Ok(matches!(found, Some(Value::String(s)) if regex.is_match(s)))
            }
            "$exists" => Ok(truthy(operand) == found.is_some()),
            "$size" => {
                let size = integer_operand(operand)
                    .ok_or_else(|| QueryError::invalid_query("$size operator called without an integer"))?;
                Ok(matches!(found, Some(Value::Array(items)) if items.len() as i64 == size))
            }
            "$elemMatch" => match found {
                Some(Value::Array(items)) => {
                    for item in items {
                        if self.matches(item, operand)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                _ => Ok(false),
            },
            other => Err(QueryError::invalid_query(format!(
                "Unknown comparison function {}",
                other
            ))),
        }
    }
}

/// Match without any `$where` predicates registered
pub fn matches(doc: &Value, query: &Value) -> QueryResult<bool> {
    let wheres = WherePredicates::new();
    Matcher::new(&wheres).matches(doc, query)
}

fn compile_regex(operand: &Value) -> QueryResult<Regex> {
    let pattern = operand
        .as_str()
        .ok_or_else(|| QueryError::invalid_query("$regex operator called with non regular expression"))?;
    Regex::new(pattern)
        .map_err(|e| QueryError::invalid_query(format!("Invalid $regex pattern {}: {}", pattern, e)))
}

/// Truthiness of an `$exists` operand; the empty string counts as true
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => true,
    }
}

fn integer_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}
