//! Persistence for one datastore
//!
//! Appends every change as a log line, replays the log on load and
//! rewrites it during compaction. Without a backend the datastore is
//! memory-only and every operation here is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::backend::StorageBackend;
use super::errors::{PersistenceError, PersistenceResult};
use super::hooks::SerializationHooks;
use super::record::{DecodeOutcome, LogRecord};
use crate::index::IndexOptions;
use crate::observability::{log_event_with_fields, Event};

/// Default tolerated share of corrupted lines
pub const DEFAULT_CORRUPT_ALERT_THRESHOLD: f64 = 0.1;

/// Line counts from one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Non-empty lines read across both streams
    pub total_lines: usize,
    /// Lines that failed to decode
    pub corrupt_lines: usize,
    /// Live documents after replay
    pub documents: usize,
    /// Index definitions after replay
    pub indexes: usize,
}

/// Datastore state reconstructed from the log
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    /// Live documents ordered by `_id`
    pub documents: Vec<Value>,
    /// Index definitions ordered by field name
    pub indexes: Vec<IndexOptions>,
    /// Line counts
    pub stats: LoadStats,
}

#[derive(Default)]
struct Replay {
    documents: BTreeMap<String, Value>,
    indexes: BTreeMap<String, IndexOptions>,
    total_lines: usize,
    corrupt_lines: usize,
}

impl Replay {
    fn feed(&mut self, raw: &str, hooks: &SerializationHooks) {
        if raw.is_empty() {
            return;
        }
        self.total_lines += 1;
        let line = hooks.deserialize(raw);
        match LogRecord::decode(&line) {
            Ok(LogRecord::Document(doc)) => {
                if let Some(id) = doc.get("_id").and_then(Value::as_str) {
                    self.documents.insert(id.to_string(), doc);
                }
            }
            Ok(LogRecord::Tombstone(id)) => {
                self.documents.remove(&id);
            }
            Ok(LogRecord::IndexCreated(options)) => {
                self.indexes.insert(options.field_name.clone(), options);
            }
            Ok(LogRecord::IndexRemoved(field)) => {
                self.indexes.remove(&field);
            }
            Err(DecodeOutcome::Corrupt) => self.corrupt_lines += 1,
            Err(DecodeOutcome::Ignored) => {}
        }
    }
}

/// Log persistence over an optional backend
#[derive(Debug, Clone)]
pub struct Persistence {
    backend: Option<Arc<dyn StorageBackend>>,
    hooks: SerializationHooks,
    corrupt_alert_threshold: f64,
}

impl Persistence {
    /// Persistence over `backend`; `None` means memory-only
    pub fn new(
        backend: Option<Arc<dyn StorageBackend>>,
        hooks: SerializationHooks,
        corrupt_alert_threshold: f64,
    ) -> PersistenceResult<Self> {
        if !(0.0..=1.0).contains(&corrupt_alert_threshold) {
            return Err(PersistenceError::invalid_configuration(format!(
                "corrupt_alert_threshold must be between 0 and 1, got {}",
                corrupt_alert_threshold
            )));
        }
        hooks.validate()?;
        Ok(Self {
            backend,
            hooks,
            corrupt_alert_threshold,
        })
    }

    /// Memory-only persistence
    pub fn in_memory() -> Self {
        Self {
            backend: None,
            hooks: SerializationHooks::none(),
            corrupt_alert_threshold: DEFAULT_CORRUPT_ALERT_THRESHOLD,
        }
    }

    /// Returns true when nothing is written anywhere
    pub fn is_in_memory(&self) -> bool {
        self.backend.is_none()
    }

    /// Tolerated share of corrupted lines
    pub fn corrupt_alert_threshold(&self) -> f64 {
        self.corrupt_alert_threshold
    }

    /// Initialize the backend and replay both streams
    ///
    /// Later lines win over earlier ones for the same `_id` or index field.
    /// Fails when the share of corrupted lines exceeds the threshold.
    pub fn load(&self) -> PersistenceResult<LoadedState> {
        let Some(backend) = &self.backend else {
            return Ok(LoadedState::default());
        };

        backend
            .init()
            .map_err(|e| PersistenceError::io_error("Failed to prepare storage", e))?;

        let mut replay = Replay::default();
        backend
            .read_indexes(&mut |line| replay.feed(line, &self.hooks))
            .map_err(|e| PersistenceError::read_failed("Failed to read the index stream", e))?;
        backend
            .read_data(&mut |line| replay.feed(line, &self.hooks))
            .map_err(|e| PersistenceError::read_failed("Failed to read the data stream", e))?;

        let Replay {
            documents,
            indexes,
            total_lines,
            corrupt_lines,
        } = replay;

        if total_lines > 0
            && corrupt_lines as f64 / total_lines as f64 > self.corrupt_alert_threshold
        {
            return Err(PersistenceError::data_corruption(
                corrupt_lines,
                total_lines,
                self.corrupt_alert_threshold,
            ));
        }
        if corrupt_lines > 0 {
            log_event_with_fields(
                Event::CorruptLinesSkipped,
                &[
                    ("corrupt_lines", &corrupt_lines.to_string()),
                    ("total_lines", &total_lines.to_string()),
                ],
            );
        }

        let stats = LoadStats {
            total_lines,
            corrupt_lines,
            documents: documents.len(),
            indexes: indexes.len(),
        };
        Ok(LoadedState {
            documents: documents.into_values().collect(),
            indexes: indexes.into_values().collect(),
            stats,
        })
    }

    fn encode(&self, record: &LogRecord) -> String {
        self.hooks.serialize(record.encode())
    }

    /// Append the new state of each document
    pub fn append_documents(&self, docs: &[Value]) -> PersistenceResult<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let lines: Vec<String> = docs
            .iter()
            .map(|doc| self.encode(&LogRecord::Document(doc.clone())))
            .collect();
        backend
            .append_data(&lines)
            .map_err(|e| PersistenceError::write_failed("Failed to append documents", e))
    }

    /// Append a tombstone for each id
    pub fn append_tombstones(&self, ids: &[String]) -> PersistenceResult<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let lines: Vec<String> = ids
            .iter()
            .map(|id| self.encode(&LogRecord::tombstone(id.clone())))
            .collect();
        backend
            .append_data(&lines)
            .map_err(|e| PersistenceError::write_failed("Failed to append tombstones", e))
    }

    /// Append an index creation or removal record
    pub fn append_index_record(&self, record: &LogRecord) -> PersistenceResult<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        backend
            .append_index(&[self.encode(record)])
            .map_err(|e| PersistenceError::write_failed("Failed to append index record", e))
    }

    /// Rewrite both streams as one line per live document and index
    pub fn compact<'a, I>(&self, docs: I, indexes: &[IndexOptions]) -> PersistenceResult<()>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let data: Vec<String> = docs
            .into_iter()
            .map(|doc| self.encode(&LogRecord::Document(doc.clone())))
            .collect();
        let index_lines: Vec<String> = indexes
            .iter()
            .map(|options| self.encode(&LogRecord::IndexCreated(options.clone())))
            .collect();

        backend
            .write_data(&data)
            .map_err(|e| PersistenceError::write_failed("Failed to rewrite the data stream", e))?;
        backend
            .write_indexes(&index_lines)
            .map_err(|e| PersistenceError::write_failed("Failed to rewrite the index stream", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{LineTransform, MemoryBackend};
    use serde_json::json;

    fn over(lines: &[&str]) -> (Arc<MemoryBackend>, Persistence) {
        let backend = Arc::new(MemoryBackend::with_lines(
            lines.iter().map(|l| l.to_string()).collect(),
            Vec::new(),
        ));
        let persistence = Persistence::new(
            Some(backend.clone() as Arc<dyn StorageBackend>),
            SerializationHooks::none(),
            DEFAULT_CORRUPT_ALERT_THRESHOLD,
        )
        .unwrap();
        (backend, persistence)
    }

    #[test]
    fn test_replay_last_write_wins() {
        let (_, persistence) = over(&[
            r#"{"_id":"a","n":1}"#,
            r#"{"_id":"b","n":2}"#,
            r#"{"_id":"a","n":3}"#,
            r#"{"$$deleted":true,"_id":"b"}"#,
        ]);
        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.documents, vec![json!({"_id": "a", "n": 3})]);
        assert_eq!(loaded.stats.total_lines, 4);
    }

    #[test]
    fn test_corruption_under_threshold_is_skipped() {
        let mut lines = vec![r#"{"_id":"a"}"#; 9];
        lines.push("garbage");
        let (_, persistence) = over(&lines);
        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.stats.corrupt_lines, 1);
        assert_eq!(loaded.documents.len(), 1);
    }

    #[test]
    fn test_corruption_over_threshold_fails() {
        let (_, persistence) = over(&[r#"{"_id":"a"}"#, "garbage", r#"{"_id":"b"}"#]);
        let err = persistence.load().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_threshold_validated() {
        let result = Persistence::new(None, SerializationHooks::none(), 1.5);
        assert!(result.is_err());
    }

    #[test]
    fn test_index_records_replayed() {
        let backend = Arc::new(MemoryBackend::with_lines(
            Vec::new(),
            vec![
                r#"{"$$indexCreated":{"fieldName":"a"}}"#.to_string(),
                r#"{"$$indexCreated":{"fieldName":"b","unique":true}}"#.to_string(),
                r#"{"$$indexRemoved":"a"}"#.to_string(),
            ],
        ));
        let persistence = Persistence::new(
            Some(backend as Arc<dyn StorageBackend>),
            SerializationHooks::none(),
            0.0,
        )
        .unwrap();
        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.indexes, vec![IndexOptions::new("b").unique(true)]);
    }

    #[test]
    fn test_compact_rewrites_streams() {
        let (backend, persistence) = over(&[r#"{"_id":"a","n":1}"#, r#"{"_id":"a","n":2}"#]);
        let loaded = persistence.load().unwrap();
        persistence
            .compact(loaded.documents.iter(), &[IndexOptions::new("n")])
            .unwrap();
        assert_eq!(backend.data_lines().len(), 1);
        assert_eq!(backend.index_lines().len(), 1);
    }

    #[test]
    fn test_hooks_apply_to_lines() {
        let backend = Arc::new(MemoryBackend::new());
        let reverse: LineTransform =
            Arc::new(|s: &str| s.chars().rev().collect());
        let persistence = Persistence::new(
            Some(backend.clone() as Arc<dyn StorageBackend>),
            SerializationHooks::new(reverse.clone(), reverse),
            0.0,
        )
        .unwrap();
        persistence.append_documents(&[json!({"_id": "a"})]).unwrap();
        assert!(backend.data_lines()[0].starts_with('}'));
        assert_eq!(persistence.load().unwrap().documents, vec![json!({"_id": "a"})]);
    }

    #[test]
    fn test_memory_only_is_noop() {
        let persistence = Persistence::in_memory();
        persistence.append_documents(&[json!({"_id": "a"})]).unwrap();
        assert!(persistence.load().unwrap().documents.is_empty());
    }
}
