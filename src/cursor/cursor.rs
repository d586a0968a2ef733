//! Cursor: one configured read
//!
//! A cursor collects filter, sort, skip, limit and projection, and runs
//! them as a single task on the owning datastore's queue.

use std::future::Future;

use serde_json::Value;

use super::projection::Projection;
use super::sorter::{ResultSorter, SortSpec};
use crate::datastore::{Datastore, DatastoreResult};
use crate::document::deep_copy;
use crate::query::{Matcher, QueryResult};

/// Read options carried by a cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    /// Maximum number of results; `None` (or 0) means no limit
    pub limit: Option<usize>,
    /// Number of results to skip
    pub skip: usize,
    /// Sort keys, first key first
    pub sort: Vec<SortSpec>,
    /// Projection object
    pub projection: Option<Value>,
}

impl CursorOptions {
    fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }
}

/// Filter, order, slice and project `candidates`
///
/// Without a sort, skip and limit apply while filtering and the scan stops
/// once the limit is reached. With a sort, every match is collected and
/// stably sorted before slicing. Each returned document is its own copy.
pub fn execute<'a, I>(
    candidates: I,
    query: &Value,
    matcher: Matcher<'_>,
    options: &CursorOptions,
) -> QueryResult<Vec<Value>>
where
    I: IntoIterator<Item = &'a Value>,
{
    // Parse first so a bad projection fails before any work
    let projection = match &options.projection {
        Some(spec) => Projection::parse(spec)?,
        None => None,
    };
    matcher.validate(query)?;
    let limit = options.effective_limit();

    let mut selected: Vec<Value> = Vec::new();
    if options.sort.is_empty() {
        let mut skipped = 0;
        for doc in candidates {
            if !matcher.matches(doc, query)? {
                continue;
            }
            if skipped < options.skip {
                skipped += 1;
                continue;
            }
            selected.push(deep_copy(doc));
            if limit.is_some_and(|n| selected.len() >= n) {
                break;
            }
        }
    } else {
        for doc in candidates {
            if matcher.matches(doc, query)? {
                selected.push(deep_copy(doc));
            }
        }
        ResultSorter::sort(&mut selected, &options.sort);
        let end = match limit {
            Some(n) => options.skip.saturating_add(n).min(selected.len()),
            None => selected.len(),
        };
        let start = options.skip.min(end);
        selected.truncate(end);
        selected.drain(..start);
    }

    match projection {
        Some(projection) => selected.iter().map(|doc| projection.apply(doc)).collect(),
        None => Ok(selected),
    }
}

/// Lazily executed query over a datastore
#[derive(Debug, Clone)]
pub struct Cursor {
    datastore: Datastore,
    query: Value,
    options: CursorOptions,
}

impl Cursor {
    pub(crate) fn new(datastore: Datastore, query: Value) -> Self {
        Self {
            datastore,
            query,
            options: CursorOptions::default(),
        }
    }

    /// Return at most `limit` documents; 0 removes the limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Skip the first `skip` matches
    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = skip;
        self
    }

    /// Replace the sort keys
    pub fn sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.options.sort = sort;
        self
    }

    /// Replace the projection
    pub fn projection(mut self, projection: Value) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Options as configured so far
    pub fn options(&self) -> &CursorOptions {
        &self.options
    }

    /// The filter
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Queue the read and return its results
    ///
    /// The read takes its place in the queue when this is called, not when
    /// the returned future is first polled.
    pub fn exec(&self) -> impl Future<Output = DatastoreResult<Vec<Value>>> + Send + 'static {
        self.datastore
            .run_cursor(self.query.clone(), self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::WherePredicates;
    use serde_json::json;

    fn docs() -> Vec<Value> {
        (0..10).map(|i| json!({"_id": format!("d{}", i), "n": i % 4, "i": i})).collect()
    }

    fn run(query: Value, options: CursorOptions) -> Vec<i64> {
        let wheres = WherePredicates::new();
        let docs = docs();
        execute(docs.iter(), &query, Matcher::new(&wheres), &options)
            .unwrap()
            .iter()
            .map(|d| d["i"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_skip_limit_without_sort() {
        let options = CursorOptions {
            skip: 1,
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(run(json!({"n": {"$gte": 2}}), options), vec![3, 6]);
    }

    #[test]
    fn test_sorted_slice() {
        let options = CursorOptions {
            skip: 2,
            limit: Some(3),
            sort: vec![SortSpec::asc("n"), SortSpec::desc("i")],
            ..Default::default()
        };
        // n=0: 8,4,0  n=1: 9,5,1
        assert_eq!(run(json!({}), options), vec![0, 9, 5]);
    }

    #[test]
    fn test_slice_past_end() {
        let options = CursorOptions {
            skip: 20,
            sort: vec![SortSpec::asc("i")],
            ..Default::default()
        };
        assert!(run(json!({}), options).is_empty());
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let options = CursorOptions {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(run(json!({}), options).len(), 10);
    }

    #[test]
    fn test_projection_applied_after_slice() {
        let wheres = WherePredicates::new();
        let docs = docs();
        let options = CursorOptions {
            limit: Some(1),
            sort: vec![SortSpec::desc("i")],
            projection: Some(json!({"i": 1, "_id": 0})),
            ..Default::default()
        };
        let out = execute(docs.iter(), &json!({}), Matcher::new(&wheres), &options).unwrap();
        assert_eq!(out, vec![json!({"i": 9})]);
    }

    #[test]
    fn test_results_are_independent_copies() {
        let wheres = WherePredicates::new();
        let docs = vec![json!({"_id": "a", "tags": ["x"]})];
        let mut out =
            execute(docs.iter(), &json!({}), Matcher::new(&wheres), &CursorOptions::default())
                .unwrap();
        out[0]["tags"][0] = json!("changed");
        assert_eq!(docs[0]["tags"][0], "x");
    }

    #[test]
    fn test_bad_projection_rejected() {
        let wheres = WherePredicates::new();
        let docs = docs();
        let options = CursorOptions {
            projection: Some(json!({"a": 1, "b": 0})),
            ..Default::default()
        };
        assert!(execute(docs.iter(), &json!({}), Matcher::new(&wheres), &options).is_err());
    }
}
