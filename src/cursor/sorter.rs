//! Result sorting for cursor execution
//!
//! Sorts by one or more field paths with `compare_things`; the first key
//! that differs decides. The sort is stable.

use std::cmp::Ordering;

use serde_json::Value;

use crate::query::{compare_things, get_dot_value, QueryError, QueryResult};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl SortDirection {
    /// Parse a `1` / `-1` direction
    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign {
            1 => Some(SortDirection::Asc),
            -1 => Some(SortDirection::Desc),
            _ => None,
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Dotted field path
    pub field: String,
    /// Direction
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort on `field`
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on `field`
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Parse a comma-separated sort list such as `city,-age`
///
/// A leading `-` sorts that field descending.
pub fn parse_sort(list: &str) -> QueryResult<Vec<SortSpec>> {
    list.split(',')
        .map(str::trim)
        .map(|item| {
            let spec = match item.strip_prefix('-') {
                Some(field) => SortSpec::desc(field),
                None => SortSpec::asc(item.strip_prefix('+').unwrap_or(item)),
            };
            if spec.field.is_empty() {
                return Err(QueryError::invalid_query(format!("Invalid sort list: {}", list)));
            }
            Ok(spec)
        })
        .collect()
}

/// Sorts result documents
pub struct ResultSorter;

impl ResultSorter {
    /// Sort `documents` in place by `specs`, stably
    pub fn sort(documents: &mut [Value], specs: &[SortSpec]) {
        if specs.is_empty() {
            return;
        }
        // Resolve every key once instead of once per comparison
        let mut keyed: Vec<(Vec<Option<Value>>, Value)> = documents
            .iter_mut()
            .map(|doc| {
                let keys = specs.iter().map(|s| get_dot_value(doc, &s.field)).collect();
                (keys, std::mem::take(doc))
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| Self::compare_keys(a, b, specs));

        for (slot, (_, doc)) in documents.iter_mut().zip(keyed) {
            *slot = doc;
        }
    }

    fn compare_keys(a: &[Option<Value>], b: &[Option<Value>], specs: &[SortSpec]) -> Ordering {
        for ((a, b), spec) in a.iter().zip(b).zip(specs) {
            let ordering = spec.direction.apply(compare_things(a.as_ref(), b.as_ref()));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
