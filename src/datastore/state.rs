//! In-memory datastore state
//!
//! The live documents keyed by `_id` and every index over them. Only
//! queued tasks touch this state. Every mutation here is all-or-nothing
//! across all indexes.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::document::{
    check_object, create_new_id, deep_copy, document_id, is_primitive, now_value,
    CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::index::{Index, IndexOptions, IndexResult};
use crate::query::{QueryError, QueryResult};

/// Documents and indexes of one datastore
pub(crate) struct DatastoreState {
    documents: HashMap<String, Value>,
    indexes: BTreeMap<String, Index>,
}

impl DatastoreState {
    pub(crate) fn new() -> Self {
        let mut indexes = BTreeMap::new();
        indexes.insert(ID_FIELD.to_string(), Index::primary());
        Self {
            documents: HashMap::new(),
            indexes,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Value> {
        self.documents.get(id)
    }

    /// Every document ordered by `_id`
    pub(crate) fn all_ordered(&self) -> Vec<&Value> {
        self.indexes
            .get(ID_FIELD)
            .map(Index::get_all)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.documents.get(id))
            .collect()
    }

    pub(crate) fn index_definitions(&self) -> Vec<IndexOptions> {
        self.indexes
            .values()
            .filter(|index| index.field_name() != ID_FIELD)
            .map(|index| index.options().clone())
            .collect()
    }

    pub(crate) fn has_index(&self, field_name: &str) -> bool {
        self.indexes.contains_key(field_name)
    }

    pub(crate) fn index(&self, field_name: &str) -> Option<&Index> {
        self.indexes.get(field_name)
    }

    /// Drop every document and every index entry, keeping definitions
    pub(crate) fn clear(&mut self) {
        self.documents.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    /// Register an index definition without filling it
    pub(crate) fn define_index(&mut self, options: IndexOptions) -> IndexResult<()> {
        if !self.indexes.contains_key(&options.field_name) {
            let index = Index::new(options)?;
            self.indexes.insert(index.field_name().to_string(), index);
        }
        Ok(())
    }

    /// Create and fill an index; `false` if it already existed
    pub(crate) fn ensure_index(&mut self, options: IndexOptions) -> IndexResult<bool> {
        if self.indexes.contains_key(&options.field_name) {
            return Ok(false);
        }
        let mut index = Index::new(options)?;
        let docs: Vec<&Value> = self.documents.values().collect();
        index.insert_many(&docs)?;
        self.indexes.insert(index.field_name().to_string(), index);
        Ok(true)
    }

    pub(crate) fn remove_index(&mut self, field_name: &str) -> Option<Index> {
        self.indexes.remove(field_name)
    }

    /// Put back an index taken out by `remove_index`
    pub(crate) fn put_index(&mut self, index: Index) {
        self.indexes.insert(index.field_name().to_string(), index);
    }

    fn add_to_indexes(&mut self, doc: &Value) -> IndexResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for (done, name) in names.iter().enumerate() {
            let Some(index) = self.indexes.get_mut(name) else {
                continue;
            };
            if let Err(err) = index.insert(doc) {
                for added in &names[..done] {
                    if let Some(index) = self.indexes.get_mut(added) {
                        index.remove(doc)?;
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, doc: &Value) -> IndexResult<()> {
        for index in self.indexes.values_mut() {
            index.remove(doc)?;
        }
        Ok(())
    }

    /// Add prepared documents, all or none
    pub(crate) fn insert_documents(&mut self, docs: &[Value]) -> IndexResult<()> {
        for (done, doc) in docs.iter().enumerate() {
            if let Err(err) = self.add_to_indexes(doc) {
                for added in &docs[..done] {
                    self.remove_from_indexes(added)?;
                }
                return Err(err);
            }
        }
        for doc in docs {
            if let Some(id) = document_id(doc) {
                self.documents.insert(id.to_string(), doc.clone());
            }
        }
        Ok(())
    }

    /// Undo `insert_documents`
    pub(crate) fn remove_documents(&mut self, ids: &[String]) -> IndexResult<Vec<Value>> {
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.documents.remove(id) {
                self.remove_from_indexes(&doc)?;
                removed.push(doc);
            }
        }
        Ok(removed)
    }

    /// Swap old for new documents in every index and in the document map
    pub(crate) fn replace_documents(&mut self, pairs: &[(Value, Value)]) -> IndexResult<()> {
        let names: Vec<String> = self.indexes.keys().cloned().collect();
        for (done, name) in names.iter().enumerate() {
            let Some(index) = self.indexes.get_mut(name) else {
                continue;
            };
            if let Err(err) = index.update_many(pairs) {
                for updated in &names[..done] {
                    if let Some(index) = self.indexes.get_mut(updated) {
                        index.revert_update_many(pairs)?;
                    }
                }
                return Err(err);
            }
        }
        for (_, new) in pairs {
            if let Some(id) = document_id(new) {
                self.documents.insert(id.to_string(), new.clone());
            }
        }
        Ok(())
    }

    /// Undo `replace_documents`
    pub(crate) fn revert_documents(&mut self, pairs: &[(Value, Value)]) -> IndexResult<()> {
        let reversed: Vec<(Value, Value)> = pairs
            .iter()
            .map(|(old, new)| (new.clone(), old.clone()))
            .collect();
        self.replace_documents(&reversed)
    }

    /// Ids worth checking against `query`, narrowed by an index if possible
    ///
    /// Tried in order: an exact primitive value on an indexed field, a
    /// compound index covered by exact values, `$in` on an indexed field,
    /// range operators on an indexed field, then every document.
    pub(crate) fn candidate_ids(&self, query: &Value) -> IndexResult<Vec<String>> {
        let Some(query) = query.as_object() else {
            return Ok(self.all_ids());
        };

        for (field, condition) in query {
            if is_primitive(condition) {
                if let Some(index) = self.indexes.get(field) {
                    return index.get_matching(std::slice::from_ref(condition));
                }
            }
        }

        for index in self.indexes.values().filter(|index| index.is_compound()) {
            let covered = index
                .fields()
                .iter()
                .all(|f| query.get(f).is_some_and(is_primitive));
            if covered {
                let key: Map<String, Value> = index
                    .fields()
                    .iter()
                    .filter_map(|f| query.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                return index.get_matching(&[Value::Object(key)]);
            }
        }

        for (field, condition) in query {
            if let (Some(index), Some(Value::Array(values))) =
                (self.indexes.get(field), condition.get("$in"))
            {
                return index.get_matching(values);
            }
        }

        for (field, condition) in query {
            if let (Some(index), Value::Object(operators)) = (self.indexes.get(field), condition) {
                let ranged = ["$lt", "$lte", "$gt", "$gte"]
                    .iter()
                    .any(|op| operators.contains_key(*op));
                if ranged {
                    return index.get_between_bounds(operators);
                }
            }
        }

        Ok(self.all_ids())
    }

    fn all_ids(&self) -> Vec<String> {
        self.indexes
            .get(ID_FIELD)
            .map(Index::get_all)
            .unwrap_or_default()
    }

    /// Indexes carrying a TTL, as (field, seconds)
    pub(crate) fn ttl_indexes(&self) -> Vec<(String, f64)> {
        self.indexes
            .values()
            .filter_map(|index| {
                index
                    .expire_after_seconds()
                    .map(|ttl| (index.field_name().to_string(), ttl))
            })
            .collect()
    }

    /// Validate and complete a document before insertion
    ///
    /// Generates a missing `_id` and stamps timestamps when asked to.
    pub(crate) fn prepare_for_insertion(
        &self,
        doc: &Value,
        timestamp_data: bool,
        taken: &[Value],
    ) -> QueryResult<Value> {
        let Value::Object(_) = doc else {
            return Err(QueryError::invalid_document("Documents must be objects"));
        };
        let mut prepared = deep_copy(doc);
        let Value::Object(map) = &mut prepared else {
            return Err(QueryError::invalid_document("Documents must be objects"));
        };

        match map.get(ID_FIELD) {
            None => {
                let id = loop {
                    let candidate = create_new_id();
                    let in_batch = taken.iter().any(|d| document_id(d) == Some(candidate.as_str()));
                    if !self.documents.contains_key(&candidate) && !in_batch {
                        break candidate;
                    }
                };
                map.insert(ID_FIELD.to_string(), Value::String(id));
            }
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(QueryError::invalid_document(format!(
                    "_id must be a string, got {}",
                    other
                )))
            }
        }

        if timestamp_data {
            let now = now_value();
            map.entry(CREATED_AT_FIELD.to_string())
                .or_insert_with(|| now.clone());
            map.entry(UPDATED_AT_FIELD.to_string()).or_insert(now);
        }

        check_object(&prepared)?;
        Ok(prepared)
    }

    /// Structural check of every index, for tests
    #[cfg(test)]
    pub(crate) fn check_indexes(&self) -> Result<(), String> {
        for index in self.indexes.values() {
            index.check_is_avl()?;
        }
        Ok(())
    }
}

impl Default for DatastoreState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prepared(state: &DatastoreState, docs: Vec<Value>) -> Vec<Value> {
        let mut out: Vec<Value> = Vec::new();
        for doc in docs {
            let doc = state.prepare_for_insertion(&doc, false, &out).unwrap();
            out.push(doc);
        }
        out
    }

    #[test]
    fn test_generated_ids_are_unique_strings() {
        let state = DatastoreState::new();
        let docs = prepared(&state, vec![json!({}), json!({})]);
        let a = docs[0]["_id"].as_str().unwrap();
        let b = docs[1]["_id"].as_str().unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_prepare_rejects_bad_documents() {
        let state = DatastoreState::new();
        assert!(state.prepare_for_insertion(&json!([1]), false, &[]).is_err());
        assert!(state.prepare_for_insertion(&json!({"_id": 3}), false, &[]).is_err());
        assert!(state.prepare_for_insertion(&json!({"$bad": 1}), false, &[]).is_err());
        assert!(state.prepare_for_insertion(&json!({"a.b": 1}), false, &[]).is_err());
    }

    #[test]
    fn test_timestamps_stamped() {
        let state = DatastoreState::new();
        let doc = state.prepare_for_insertion(&json!({"a": 1}), true, &[]).unwrap();
        assert!(crate::document::is_date(&doc["createdAt"]));
        assert_eq!(doc["createdAt"], doc["updatedAt"]);
    }

    #[test]
    fn test_batch_rolls_back_every_index() {
        let mut state = DatastoreState::new();
        state.ensure_index(IndexOptions::new("email").unique(true)).unwrap();
        state.ensure_index(IndexOptions::new("age")).unwrap();
        let docs = vec![
            json!({"_id": "a", "email": "x", "age": 1}),
            json!({"_id": "b", "email": "y", "age": 2}),
            json!({"_id": "c", "email": "x", "age": 3}),
        ];
        assert!(state.insert_documents(&docs).unwrap_err().is_unique_violation());
        assert_eq!(state.len(), 0);
        for name in [ID_FIELD, "email", "age"] {
            assert_eq!(state.index(name).unwrap().key_count(), 0, "index {}", name);
        }
        state.check_indexes().unwrap();
    }

    #[test]
    fn test_replace_rolls_back_on_violation() {
        let mut state = DatastoreState::new();
        state.ensure_index(IndexOptions::new("email").unique(true)).unwrap();
        let a = json!({"_id": "a", "email": "x"});
        let b = json!({"_id": "b", "email": "y"});
        state.insert_documents(&[a.clone(), b.clone()]).unwrap();

        let clash = json!({"_id": "b", "email": "x"});
        assert!(state.replace_documents(&[(b.clone(), clash)]).is_err());
        assert_eq!(state.get("b"), Some(&b));
        assert_eq!(
            state.index("email").unwrap().get_matching(&[json!("y")]).unwrap(),
            vec!["b"]
        );
    }

    #[test]
    fn test_candidates_use_indexes() {
        let mut state = DatastoreState::new();
        state.ensure_index(IndexOptions::new("n")).unwrap();
        let docs: Vec<Value> = (0..6).map(|i| json!({"_id": format!("d{}", i), "n": i})).collect();
        state.insert_documents(&docs).unwrap();

        assert_eq!(state.candidate_ids(&json!({"n": 3})).unwrap(), vec!["d3"]);
        assert_eq!(
            state.candidate_ids(&json!({"n": {"$in": [1, 4]}})).unwrap(),
            vec!["d1", "d4"]
        );
        assert_eq!(
            state.candidate_ids(&json!({"n": {"$gte": 4}})).unwrap(),
            vec!["d4", "d5"]
        );
        assert_eq!(state.candidate_ids(&json!({"other": 1})).unwrap().len(), 6);
    }

    #[test]
    fn test_compound_candidates() {
        let mut state = DatastoreState::new();
        state.ensure_index(IndexOptions::new("a,b")).unwrap();
        state
            .insert_documents(&[
                json!({"_id": "x", "a": 1, "b": 2}),
                json!({"_id": "y", "a": 1, "b": 3}),
            ])
            .unwrap();
        assert_eq!(state.candidate_ids(&json!({"a": 1, "b": 3})).unwrap(), vec!["y"]);
    }

    #[test]
    fn test_ensure_index_fails_cleanly_on_duplicates() {
        let mut state = DatastoreState::new();
        state
            .insert_documents(&[json!({"_id": "a", "k": 1}), json!({"_id": "b", "k": 1})])
            .unwrap();
        assert!(state.ensure_index(IndexOptions::new("k").unique(true)).is_err());
        assert!(!state.has_index("k"));
        assert!(!state.ensure_index(IndexOptions::new(ID_FIELD)).unwrap());
    }
}
