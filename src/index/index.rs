//! Field index over a collection
//!
//! Maps the value at one field path (or a tuple of paths for compound
//! indexes) to the ids of documents holding it. Array values are indexed
//! under each distinct element. Every mutation either completes or leaves
//! the index exactly as it was.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::avl::AvlTree;
use super::errors::{IndexError, IndexResult};
use crate::document::{document_id, ID_FIELD};
use crate::query::{compare_things, get_dot_value};

/// Index key; `None` stands for a missing field
pub type FieldKey = Option<Value>;

/// Definition of an index as given to `ensure_index` and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    /// Field path, or comma-separated paths for a compound index
    pub field_name: String,
    #[serde(default)]
    pub unique: bool,
    /// Documents lacking the field are left out
    #[serde(default)]
    pub sparse: bool,
    /// Documents whose date in this field is older than this are expired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<f64>,
}

impl IndexOptions {
    /// Plain index on one field
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Set uniqueness
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Set sparseness
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Expire documents this many seconds after the date in the field
    pub fn expire_after_seconds(mut self, seconds: f64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }

    /// Component paths of the field name
    pub fn fields(&self) -> Vec<String> {
        self.field_name
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect()
    }
}

fn key_tree(unique: bool) -> AvlTree<FieldKey, String> {
    AvlTree::with_comparators(
        unique,
        Arc::new(|a: &FieldKey, b: &FieldKey| Ok(compare_things(a.as_ref(), b.as_ref()))),
        Arc::new(|a: &String, b: &String| a == b),
    )
}

/// One index over the documents of a datastore
pub struct Index {
    options: IndexOptions,
    fields: Vec<String>,
    tree: AvlTree<FieldKey, String>,
}

impl Index {
    /// Create an empty index
    pub fn new(options: IndexOptions) -> IndexResult<Self> {
        let fields = options.fields();
        if fields.is_empty() {
            return Err(IndexError::invalid_index("Cannot create an index without a fieldName"));
        }
        if fields.iter().any(|f| f.starts_with('$')) {
            return Err(IndexError::invalid_index(format!(
                "Index field names cannot begin with $: {}",
                options.field_name
            )));
        }
        Ok(Self {
            tree: key_tree(options.unique),
            options,
            fields,
        })
    }

    /// The unique index on `_id` every datastore carries
    pub fn primary() -> Self {
        let options = IndexOptions::new(ID_FIELD).unique(true);
        Self {
            fields: vec![ID_FIELD.to_string()],
            tree: key_tree(true),
            options,
        }
    }

    /// The definition this index was built from
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Field name as given at creation
    pub fn field_name(&self) -> &str {
        &self.options.field_name
    }

    /// Component paths
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns true for a compound index
    pub fn is_compound(&self) -> bool {
        self.fields.len() > 1
    }

    /// TTL in seconds, if this is a TTL index
    pub fn expire_after_seconds(&self) -> Option<f64> {
        self.options.expire_after_seconds
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.tree.key_count()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Keys a document is indexed under; `None` when it is skipped
    fn keys_for(&self, doc: &Value) -> Option<Vec<FieldKey>> {
        if self.is_compound() {
            let mut key = Map::new();
            for field in &self.fields {
                if let Some(value) = get_dot_value(doc, field) {
                    key.insert(field.clone(), value);
                }
            }
            if key.is_empty() && self.options.sparse {
                return None;
            }
            return Some(vec![Some(Value::Object(key))]);
        }

        match get_dot_value(doc, &self.fields[0]) {
            None if self.options.sparse => None,
            None => Some(vec![None]),
            Some(Value::Array(items)) if !items.is_empty() => {
                let mut distinct: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !distinct
                        .iter()
                        .any(|seen| compare_things(Some(seen), Some(&item)) == Ordering::Equal)
                    {
                        distinct.push(item);
                    }
                }
                Some(distinct.into_iter().map(Some).collect())
            }
            Some(value) => Some(vec![Some(value)]),
        }
    }

    fn id_of(doc: &Value) -> IndexResult<String> {
        document_id(doc)
            .map(str::to_string)
            .ok_or_else(|| IndexError::invalid_index("Indexed documents need a string _id"))
    }

    /// Index one document
    ///
    /// If any of its keys is rejected, the keys already added are removed.
    pub fn insert(&mut self, doc: &Value) -> IndexResult<()> {
        let Some(keys) = self.keys_for(doc) else {
            return Ok(());
        };
        let id = Self::id_of(doc)?;
        for (done, key) in keys.iter().enumerate() {
            if let Err(err) = self.tree.insert(key.clone(), id.clone()) {
                for added in &keys[..done] {
                    self.tree.delete(added, Some(&id))?;
                }
                return Err(err.with_field(self.field_name()));
            }
        }
        Ok(())
    }

    /// Index several documents, all or none
    pub fn insert_many(&mut self, docs: &[&Value]) -> IndexResult<()> {
        for (done, doc) in docs.iter().enumerate() {
            if let Err(err) = self.insert(doc) {
                for added in &docs[..done] {
                    self.remove(added)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove one document; absent entries are ignored
    pub fn remove(&mut self, doc: &Value) -> IndexResult<()> {
        let Some(keys) = self.keys_for(doc) else {
            return Ok(());
        };
        let id = Self::id_of(doc)?;
        for key in &keys {
            self.tree.delete(key, Some(&id))?;
        }
        Ok(())
    }

    /// Replace `old` by `new`, restoring `old` if `new` is rejected
    pub fn update(&mut self, old: &Value, new: &Value) -> IndexResult<()> {
        self.remove(old)?;
        if let Err(err) = self.insert(new) {
            self.insert(old)?;
            return Err(err);
        }
        Ok(())
    }

    /// Apply several replacements, all or none
    pub fn update_many(&mut self, pairs: &[(Value, Value)]) -> IndexResult<()> {
        for (old, _) in pairs {
            self.remove(old)?;
        }
        for (done, (_, new)) in pairs.iter().enumerate() {
            if let Err(err) = self.insert(new) {
                for (_, added) in &pairs[..done] {
                    self.remove(added)?;
                }
                for (old, _) in pairs {
                    self.insert(old)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Undo an `update_many` that was applied
    pub fn revert_update_many(&mut self, pairs: &[(Value, Value)]) -> IndexResult<()> {
        let reversed: Vec<(Value, Value)> = pairs
            .iter()
            .map(|(old, new)| (new.clone(), old.clone()))
            .collect();
        self.update_many(&reversed)
    }

    /// Ids of documents whose key equals one of `values`
    ///
    /// Order follows `values`, each id listed once.
    pub fn get_matching(&self, values: &[Value]) -> IndexResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for value in values {
            for id in self.tree.search(&Some(value.clone()))? {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Ids of documents whose key satisfies `$lt`/`$lte`/`$gt`/`$gte`
    ///
    /// When both an inclusive and an exclusive bound are given on one side,
    /// the looser one is used; the matcher filters the rest.
    pub fn get_between_bounds(&self, query: &Map<String, Value>) -> IndexResult<Vec<String>> {
        let lower_value = query.get("$gte").or_else(|| query.get("$gt")).cloned();
        let upper_value = query.get("$lte").or_else(|| query.get("$lt")).cloned();
        let lower_key = lower_value.map(Some);
        let upper_key = upper_value.map(Some);

        let lower = match &lower_key {
            None => Bound::Unbounded,
            Some(key) if query.contains_key("$gte") => Bound::Included(key),
            Some(key) => Bound::Excluded(key),
        };
        let upper = match &upper_key {
            None => Bound::Unbounded,
            Some(key) if query.contains_key("$lte") => Bound::Included(key),
            Some(key) => Bound::Excluded(key),
        };

        let mut seen = HashSet::new();
        Ok(self
            .tree
            .between(lower, upper)?
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    /// Every indexed id in key order, each once
    pub fn get_all(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for (_, values) in self.tree.entries() {
            for id in values {
                if seen.insert(id.as_str()) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }

    /// Structural check of the underlying tree
    pub fn check_is_avl(&self) -> Result<(), String> {
        self.tree.check_is_avl()
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("options", &self.options)
            .field("tree", &self.tree)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, body: Value) -> Value {
        let mut doc = body;
        doc["_id"] = json!(id);
        doc
    }

    #[test]
    fn test_options_serde_shape() {
        let options = IndexOptions::new("email").unique(true);
        let encoded = serde_json::to_value(&options).unwrap();
        assert_eq!(encoded, json!({"fieldName": "email", "unique": true, "sparse": false}));
        let decoded: IndexOptions = serde_json::from_value(json!({"fieldName": "a"})).unwrap();
        assert_eq!(decoded, IndexOptions::new("a"));
    }

    #[test]
    fn test_insert_and_get_matching() {
        let mut index = Index::new(IndexOptions::new("age")).unwrap();
        index.insert(&doc("a", json!({"age": 30}))).unwrap();
        index.insert(&doc("b", json!({"age": 30}))).unwrap();
        index.insert(&doc("c", json!({"age": 31}))).unwrap();
        index.insert(&doc("d", json!({}))).unwrap();

        assert_eq!(index.get_matching(&[json!(30)]).unwrap(), vec!["a", "b"]);
        assert_eq!(index.get_matching(&[json!(31), json!(30), json!(31)]).unwrap(), vec!["c", "a", "b"]);
        assert_eq!(index.get_all(), vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_sparse_skips_missing() {
        let mut index = Index::new(IndexOptions::new("nick").unique(true).sparse(true)).unwrap();
        index.insert(&doc("a", json!({}))).unwrap();
        index.insert(&doc("b", json!({}))).unwrap();
        assert!(index.get_all().is_empty());
    }

    #[test]
    fn test_unique_missing_fields_collide() {
        let mut index = Index::new(IndexOptions::new("nick").unique(true)).unwrap();
        index.insert(&doc("a", json!({}))).unwrap();
        let err = index.insert(&doc("b", json!({}))).unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(err.field_name(), Some("nick"));
    }

    #[test]
    fn test_array_elements_indexed_once() {
        let mut index = Index::new(IndexOptions::new("tags")).unwrap();
        index.insert(&doc("a", json!({"tags": ["x", "y", "x"]}))).unwrap();
        assert_eq!(index.key_count(), 2);
        assert_eq!(index.get_matching(&[json!("x")]).unwrap(), vec!["a"]);
        index.remove(&doc("a", json!({"tags": ["x", "y", "x"]}))).unwrap();
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn test_array_insert_rolls_back_on_violation() {
        let mut index = Index::new(IndexOptions::new("tags").unique(true)).unwrap();
        index.insert(&doc("a", json!({"tags": "z"}))).unwrap();
        assert!(index.insert(&doc("b", json!({"tags": ["p", "q", "z"]}))).is_err());
        assert_eq!(index.get_all(), vec!["a"]);
        index.check_is_avl().unwrap();
    }

    #[test]
    fn test_insert_many_all_or_nothing() {
        let mut index = Index::new(IndexOptions::new("n").unique(true)).unwrap();
        let docs = [doc("a", json!({"n": 1})), doc("b", json!({"n": 2})), doc("c", json!({"n": 1}))];
        let refs: Vec<&Value> = docs.iter().collect();
        assert!(index.insert_many(&refs).is_err());
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn test_update_many_restores_on_failure() {
        let mut index = Index::new(IndexOptions::new("n").unique(true)).unwrap();
        let a = doc("a", json!({"n": 1}));
        let b = doc("b", json!({"n": 2}));
        index.insert(&a).unwrap();
        index.insert(&b).unwrap();

        let pairs = vec![
            (a.clone(), doc("a", json!({"n": 5}))),
            (b.clone(), doc("b", json!({"n": 5}))),
        ];
        assert!(index.update_many(&pairs).is_err());
        assert_eq!(index.get_matching(&[json!(1)]).unwrap(), vec!["a"]);
        assert_eq!(index.get_matching(&[json!(2)]).unwrap(), vec!["b"]);
        assert!(index.get_matching(&[json!(5)]).unwrap().is_empty());
    }

    #[test]
    fn test_revert_update_many() {
        let mut index = Index::new(IndexOptions::new("n")).unwrap();
        let old = doc("a", json!({"n": 1}));
        let new = doc("a", json!({"n": 9}));
        index.insert(&old).unwrap();
        let pairs = vec![(old, new)];
        index.update_many(&pairs).unwrap();
        index.revert_update_many(&pairs).unwrap();
        assert_eq!(index.get_matching(&[json!(1)]).unwrap(), vec!["a"]);
    }

    #[test]
    fn test_between_bounds_prefers_looser_bound() {
        let mut index = Index::new(IndexOptions::new("n")).unwrap();
        for n in 1..=6 {
            index.insert(&doc(&format!("d{}", n), json!({"n": n}))).unwrap();
        }
        let query = json!({"$gt": 2, "$lte": 4});
        assert_eq!(index.get_between_bounds(query.as_object().unwrap()).unwrap(), vec!["d3", "d4"]);
        let both = json!({"$gt": 2, "$gte": 2});
        assert_eq!(index.get_between_bounds(both.as_object().unwrap()).unwrap().len(), 5);
    }

    #[test]
    fn test_compound_index() {
        let mut index = Index::new(IndexOptions::new("a,b").unique(true)).unwrap();
        index.insert(&doc("x", json!({"a": 1, "b": 2}))).unwrap();
        index.insert(&doc("y", json!({"a": 1, "b": 3}))).unwrap();
        assert!(index.insert(&doc("z", json!({"a": 1, "b": 2}))).is_err());
        assert_eq!(index.get_matching(&[json!({"a": 1, "b": 3})]).unwrap(), vec!["y"]);
    }

    #[test]
    fn test_rejects_empty_field_name() {
        assert!(Index::new(IndexOptions::new(" , ")).is_err());
        assert!(Index::new(IndexOptions::new("$where")).is_err());
    }
}
