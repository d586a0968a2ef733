//! Datastore orchestrator
//!
//! Owns the documents, the indexes, the persistence layer and the task
//! queue of one collection. Every public operation is admitted to the
//! queue when it is called and runs there to completion, so each operation
//! sees the full effect of every operation called before it.
//!
//! A mutation is applied to the indexes first, then appended to the log.
//! If the append fails, the index change is rolled back before the error
//! is returned.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::errors::{DatastoreError, DatastoreResult};
use super::options::{DatastoreOptions, MIN_AUTOCOMPACTION_INTERVAL};
use super::state::DatastoreState;
use crate::cursor::{execute, Cursor, CursorOptions};
use crate::document::{
    as_date_millis, check_object, deep_copy, deep_copy_strict, document_id, now_value,
    CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::executor::{Executor, ExecutorError};
use crate::index::{IndexError, IndexOptions};
use crate::observability::{log_event, log_event_with_fields, Event};
use crate::persistence::{LoadStats, LogRecord, Persistence};
use crate::query::{get_dot_value, modify, validate_update, Matcher, WhereFn, WherePredicates};

/// Options for `update`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Update every match instead of the first one
    pub multi: bool,
    /// Insert a document when nothing matches
    pub upsert: bool,
    /// Return copies of the updated documents
    pub return_updated_docs: bool,
}

impl UpdateOptions {
    /// Update every match
    pub fn multi() -> Self {
        Self {
            multi: true,
            ..Default::default()
        }
    }

    /// Insert when nothing matches
    pub fn upsert() -> Self {
        Self {
            upsert: true,
            ..Default::default()
        }
    }

    /// Also return the updated documents
    pub fn returning(mut self) -> Self {
        self.return_updated_docs = true;
        self
    }
}

/// Outcome of `update`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Documents updated or inserted
    pub num_affected: usize,
    /// Copies of those documents, when requested or upserted
    pub affected_documents: Vec<Value>,
    /// True when the document was inserted by an upsert
    pub upsert: bool,
}

/// Options for `remove`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove every match instead of the first one
    pub multi: bool,
}

impl RemoveOptions {
    /// Remove every match
    pub fn multi() -> Self {
        Self { multi: true }
    }
}

struct Shared {
    executor: Executor,
    state: AsyncMutex<DatastoreState>,
    persistence: Persistence,
    options: DatastoreOptions,
    wheres: RwLock<WherePredicates>,
    autocompaction: Mutex<Option<JoinHandle<()>>>,
    compactions: watch::Sender<u64>,
}

impl Shared {
    fn wheres(&self) -> WherePredicates {
        self.wheres
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn stop_timer(&self) -> bool {
        let mut timer = self
            .autocompaction
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match timer.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Candidate documents for `query`, with expired ones removed for good
    fn candidates(&self, state: &mut DatastoreState, query: &Value) -> DatastoreResult<Vec<String>> {
        let ids = state.candidate_ids(query)?;
        let ttl = state.ttl_indexes();
        if ttl.is_empty() {
            return Ok(ids);
        }

        let now = Utc::now().timestamp_millis();
        let (expired, live): (Vec<String>, Vec<String>) = ids.into_iter().partition(|id| {
            state.get(id).is_some_and(|doc| {
                ttl.iter().any(|(field, seconds)| {
                    get_dot_value(doc, field)
                        .as_ref()
                        .and_then(as_date_millis)
                        .is_some_and(|at| now as f64 > at as f64 + seconds * 1000.0)
                })
            })
        });

        if !expired.is_empty() {
            let removed = state.remove_documents(&expired)?;
            if let Err(err) = self.persistence.append_tombstones(&expired) {
                state.insert_documents(&removed)?;
                return Err(err.into());
            }
            log_event_with_fields(
                Event::StaleDocumentsExpired,
                &[("count", &expired.len().to_string())],
            );
        }
        Ok(live)
    }

    fn insert_all(&self, state: &mut DatastoreState, docs: &[Value]) -> DatastoreResult<Vec<Value>> {
        let mut prepared: Vec<Value> = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc = state.prepare_for_insertion(doc, self.options.timestamp_data, &prepared)?;
            prepared.push(doc);
        }

        state.insert_documents(&prepared)?;
        if let Err(err) = self.persistence.append_documents(&prepared) {
            let ids: Vec<String> = prepared
                .iter()
                .filter_map(|doc| document_id(doc).map(str::to_string))
                .collect();
            state.remove_documents(&ids)?;
            return Err(err.into());
        }
        Ok(prepared.iter().map(deep_copy).collect())
    }

    /// Replay the log into an empty state and compact it
    fn reload(&self, state: &mut DatastoreState) -> DatastoreResult<LoadStats> {
        let loaded = self.persistence.load()?;
        for options in &loaded.indexes {
            state.define_index(options.clone())?;
        }
        state.insert_documents(&loaded.documents)?;
        self.compact(state)?;
        Ok(loaded.stats)
    }

    fn compact(&self, state: &DatastoreState) -> DatastoreResult<()> {
        log_event(Event::CompactionStart);
        let docs = state.all_ordered();
        match self
            .persistence
            .compact(docs.iter().copied(), &state.index_definitions())
        {
            Ok(()) => {
                log_event_with_fields(
                    Event::CompactionComplete,
                    &[("documents", &docs.len().to_string())],
                );
                self.compactions.send_modify(|count| *count += 1);
                Ok(())
            }
            Err(err) => {
                log_event_with_fields(Event::CompactionFailed, &[("error", &err.to_string())]);
                Err(err.into())
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

/// An embedded document collection
///
/// Cloning yields another handle to the same collection.
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<Shared>,
}

impl Datastore {
    /// Create a datastore
    ///
    /// Must be called from within a Tokio runtime. A persistent datastore
    /// holds every operation until `load_database` completes, unless
    /// `autoload` is set.
    pub fn new(options: DatastoreOptions) -> DatastoreResult<Self> {
        options.validate()?;
        let persistence = options.persistence()?;
        let executor = if persistence.is_in_memory() {
            Executor::ready()
        } else {
            Executor::new()
        };
        let (compactions, _) = watch::channel(0);

        let datastore = Self {
            inner: Arc::new(Shared {
                executor,
                state: AsyncMutex::new(DatastoreState::new()),
                persistence,
                options,
                wheres: RwLock::new(WherePredicates::new()),
                autocompaction: Mutex::new(None),
                compactions,
            }),
        };

        if datastore.inner.options.autoload {
            let load = datastore.load_database();
            tokio::spawn(async move {
                // Failures are logged by the load itself
                let _ = load.await;
            });
        }
        if let Some(period) = datastore.inner.options.autocompaction_period() {
            datastore.set_autocompaction_interval(period);
        }
        Ok(datastore)
    }

    /// Memory-only datastore
    pub fn in_memory() -> DatastoreResult<Self> {
        Self::new(DatastoreOptions::in_memory())
    }

    /// Options this datastore was created with
    pub fn options(&self) -> &DatastoreOptions {
        &self.inner.options
    }

    /// Returns true once operations run without waiting for a load
    pub fn is_ready(&self) -> bool {
        self.inner.executor.is_ready()
    }

    /// Queue `task` and wait for its result
    fn schedule<T, F, Fut>(
        &self,
        force_queuing: bool,
        task: F,
    ) -> impl Future<Output = DatastoreResult<T>> + Send + 'static
    where
        F: FnOnce(Arc<Shared>) -> Fut,
        Fut: Future<Output = DatastoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let receiver = self
            .inner
            .executor
            .push(task(self.inner.clone()), force_queuing);
        async move { receiver.await.map_err(ExecutorError::from)? }
    }

    /// Register a predicate usable as `{"$where": "<name>"}`
    pub fn register_where<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let predicate: WhereFn = Arc::new(predicate);
        self.inner
            .wheres
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(name, predicate);
    }

    /// Replay the log into memory, compact it, then open the queue
    ///
    /// Runs ahead of every operation still waiting for the load. If the
    /// load fails, those operations keep waiting.
    pub fn load_database(&self) -> impl Future<Output = DatastoreResult<LoadStats>> + Send + 'static {
        self.schedule(true, move |shared| async move {
            log_event(Event::LoadStart);
            let mut state = shared.state.lock().await;
            state.clear();

            match shared.reload(&mut state) {
                Ok(stats) => {
                    drop(state);
                    shared.executor.process_buffer();
                    log_event_with_fields(
                        Event::LoadComplete,
                        &[
                            ("documents", &stats.documents.to_string()),
                            ("indexes", &stats.indexes.to_string()),
                            ("corrupt_lines", &stats.corrupt_lines.to_string()),
                        ],
                    );
                    Ok(stats)
                }
                Err(err) => {
                    state.clear();
                    log_event_with_fields(Event::LoadFailed, &[("error", &err.to_string())]);
                    Err(err)
                }
            }
        })
    }

    /// Insert one document and return a copy of it as stored
    pub fn insert(&self, doc: Value) -> impl Future<Output = DatastoreResult<Value>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let mut state = shared.state.lock().await;
            let mut inserted = shared.insert_all(&mut state, std::slice::from_ref(&doc))?;
            inserted.pop().ok_or_else(|| {
                DatastoreError::from(ExecutorError::task_aborted("insert produced no document"))
            })
        })
    }

    /// Insert several documents, all or none
    pub fn insert_many(
        &self,
        docs: Vec<Value>,
    ) -> impl Future<Output = DatastoreResult<Vec<Value>>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let mut state = shared.state.lock().await;
            shared.insert_all(&mut state, &docs)
        })
    }

    /// Count documents matching `query`
    pub fn count(&self, query: Value) -> impl Future<Output = DatastoreResult<usize>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let wheres = shared.wheres();
            let matcher = Matcher::new(&wheres);
            matcher.validate(&query)?;
            let mut state = shared.state.lock().await;
            let ids = shared.candidates(&mut state, &query)?;
            let mut count = 0;
            for id in &ids {
                if let Some(doc) = state.get(id) {
                    if matcher.matches(doc, &query)? {
                        count += 1;
                    }
                }
            }
            Ok(count)
        })
    }

    /// Start a read over documents matching `query`
    pub fn find(&self, query: Value) -> Cursor {
        Cursor::new(self.clone(), query)
    }

    /// First document matching `query`
    pub fn find_one(
        &self,
        query: Value,
    ) -> impl Future<Output = DatastoreResult<Option<Value>>> + Send + 'static {
        let options = CursorOptions {
            limit: Some(1),
            ..Default::default()
        };
        let read = self.run_cursor(query, options);
        async move { Ok(read.await?.into_iter().next()) }
    }

    /// Copies of every document, ordered by `_id`
    pub fn all_documents(&self) -> impl Future<Output = DatastoreResult<Vec<Value>>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let state = shared.state.lock().await;
            Ok(state.all_ordered().into_iter().map(deep_copy).collect())
        })
    }

    pub(crate) fn run_cursor(
        &self,
        query: Value,
        options: CursorOptions,
    ) -> impl Future<Output = DatastoreResult<Vec<Value>>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let wheres = shared.wheres();
            let matcher = Matcher::new(&wheres);
            matcher.validate(&query)?;
            let mut state = shared.state.lock().await;
            let ids = shared.candidates(&mut state, &query)?;
            let docs = ids.iter().filter_map(|id| state.get(id));
            Ok(execute(docs, &query, matcher, &options)?)
        })
    }

    /// Apply `update` to documents matching `query`
    ///
    /// `update` is either a replacement document or an object of
    /// modifiers. With `upsert` and no match, a new document is inserted:
    /// the replacement itself, or the modifiers applied to the plain-field
    /// part of `query`.
    pub fn update(
        &self,
        query: Value,
        update: Value,
        options: UpdateOptions,
    ) -> impl Future<Output = DatastoreResult<UpdateResult>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let wheres = shared.wheres();
            let matcher = Matcher::new(&wheres);
            matcher.validate(&query)?;
            validate_update(&update)?;
            let mut state = shared.state.lock().await;
            let ids = shared.candidates(&mut state, &query)?;

            let mut pairs: Vec<(Value, Value)> = Vec::new();
            for id in &ids {
                let Some(old) = state.get(id) else {
                    continue;
                };
                if !matcher.matches(old, &query)? {
                    continue;
                }
                let mut new = modify(old, &update)?;
                if shared.options.timestamp_data {
                    if let Value::Object(map) = &mut new {
                        match old.get(CREATED_AT_FIELD) {
                            Some(created) => {
                                map.insert(CREATED_AT_FIELD.to_string(), created.clone());
                            }
                            None => {
                                map.remove(CREATED_AT_FIELD);
                            }
                        }
                        map.insert(UPDATED_AT_FIELD.to_string(), now_value());
                    }
                }
                pairs.push((old.clone(), new));
                if !options.multi {
                    break;
                }
            }

            if pairs.is_empty() {
                if !options.upsert {
                    return Ok(UpdateResult::default());
                }
                let is_replacement = update
                    .as_object()
                    .is_some_and(|spec| !spec.keys().any(|k| k.starts_with('$')));
                let doc = if is_replacement {
                    check_object(&update)?;
                    update.clone()
                } else {
                    modify(&deep_copy_strict(&query), &update)?
                };
                let inserted = shared.insert_all(&mut state, &[doc])?;
                return Ok(UpdateResult {
                    num_affected: 1,
                    affected_documents: inserted,
                    upsert: true,
                });
            }

            state.replace_documents(&pairs)?;
            let updated: Vec<Value> = pairs.iter().map(|(_, new)| new.clone()).collect();
            if let Err(err) = shared.persistence.append_documents(&updated) {
                state.revert_documents(&pairs)?;
                return Err(err.into());
            }

            Ok(UpdateResult {
                num_affected: updated.len(),
                affected_documents: if options.return_updated_docs {
                    updated.iter().map(deep_copy).collect()
                } else {
                    Vec::new()
                },
                upsert: false,
            })
        })
    }

    /// Remove documents matching `query`; returns how many were removed
    pub fn remove(
        &self,
        query: Value,
        options: RemoveOptions,
    ) -> impl Future<Output = DatastoreResult<usize>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let wheres = shared.wheres();
            let matcher = Matcher::new(&wheres);
            matcher.validate(&query)?;
            let mut state = shared.state.lock().await;
            let ids = shared.candidates(&mut state, &query)?;

            let mut doomed = Vec::new();
            for id in ids {
                let Some(doc) = state.get(&id) else {
                    continue;
                };
                if matcher.matches(doc, &query)? {
                    doomed.push(id);
                    if !options.multi {
                        break;
                    }
                }
            }

            let removed = state.remove_documents(&doomed)?;
            if let Err(err) = shared.persistence.append_tombstones(&doomed) {
                state.insert_documents(&removed)?;
                return Err(err.into());
            }
            Ok(removed.len())
        })
    }

    /// Create an index unless one exists on the same field
    ///
    /// Building over existing documents is all-or-nothing.
    pub fn ensure_index(
        &self,
        options: IndexOptions,
    ) -> impl Future<Output = DatastoreResult<()>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let mut state = shared.state.lock().await;
            if !state.ensure_index(options.clone())? {
                return Ok(());
            }
            let record = LogRecord::IndexCreated(options.clone());
            if let Err(err) = shared.persistence.append_index_record(&record) {
                state.remove_index(&options.field_name);
                return Err(err.into());
            }
            log_event_with_fields(Event::IndexCreated, &[("field", &options.field_name)]);
            Ok(())
        })
    }

    /// Drop the index on `field_name`; the `_id` index cannot be removed
    pub fn remove_index(
        &self,
        field_name: impl Into<String>,
    ) -> impl Future<Output = DatastoreResult<()>> + Send + 'static {
        let field_name = field_name.into();
        self.schedule(false, move |shared| async move {
            if field_name == ID_FIELD {
                return Err(IndexError::invalid_index("The _id index cannot be removed")
                    .with_field(ID_FIELD)
                    .into());
            }
            let mut state = shared.state.lock().await;
            let Some(index) = state.remove_index(&field_name) else {
                return Ok(());
            };
            let record = LogRecord::IndexRemoved(field_name.clone());
            if let Err(err) = shared.persistence.append_index_record(&record) {
                state.put_index(index);
                return Err(err.into());
            }
            log_event_with_fields(Event::IndexRemoved, &[("field", &field_name)]);
            Ok(())
        })
    }

    /// Definitions of the user indexes
    pub fn indexes(&self) -> impl Future<Output = DatastoreResult<Vec<IndexOptions>>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            Ok(shared.state.lock().await.index_definitions())
        })
    }

    /// Rewrite the log to one line per live document and index
    pub fn compact_datafile(&self) -> impl Future<Output = DatastoreResult<()>> + Send + 'static {
        self.schedule(false, move |shared| async move {
            let state = shared.state.lock().await;
            shared.compact(&state)
        })
    }

    /// Compact every `interval`, replacing any running timer
    ///
    /// Intervals below five seconds are raised to five seconds. Must be
    /// called from within a Tokio runtime.
    pub fn set_autocompaction_interval(&self, interval: Duration) {
        let period = interval.max(MIN_AUTOCOMPACTION_INTERVAL);
        self.inner.stop_timer();

        let weak: Weak<Shared> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let compaction = Datastore { inner }.compact_datafile();
                // Failures are logged by the compaction itself
                let _ = compaction.await;
            }
        });

        *self
            .inner
            .autocompaction
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        log_event_with_fields(
            Event::AutocompactionStarted,
            &[("interval_ms", &period.as_millis().to_string())],
        );
    }

    /// Stop periodic compaction
    pub fn stop_autocompaction(&self) {
        if self.inner.stop_timer() {
            log_event(Event::AutocompactionStopped);
        }
    }

    /// Watch the number of completed compactions
    pub fn compaction_events(&self) -> watch::Receiver<u64> {
        self.inner.compactions.subscribe()
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("executor", &self.inner.executor)
            .field("persistence", &self.inner.persistence)
            .finish()
    }
}
