//! Persistence subsystem for docstash
//!
//! Append-only line logs with crash-safe rewrites.
//!
//! # Durability
//!
//! - An operation is acknowledged only after its lines are flushed
//! - A rewrite is atomic: after a crash at any step, loading sees either
//!   the full old state or the full new state
//! - Corrupted lines are skipped up to a configured share, beyond which
//!   the load fails

mod backend;
mod crash_safe;
mod errors;
mod file_backend;
mod hooks;
mod persistence;
mod record;

pub use backend::{MemoryBackend, StorageBackend};
pub use crash_safe::{
    append_lines, crash_safe_write_lines, ensure_file_integrity, flush_dir, flush_file,
    read_lines, temp_path, IntegrityOutcome,
};
pub use errors::{PersistenceError, PersistenceErrorCode, PersistenceResult};
pub use file_backend::{FileBackend, INDEX_FILE_SUFFIX};
pub use hooks::{LineTransform, SerializationHooks};
pub use persistence::{LoadStats, LoadedState, Persistence, DEFAULT_CORRUPT_ALERT_THRESHOLD};
pub use record::{DecodeOutcome, LogRecord};
