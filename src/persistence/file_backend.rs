//! File-backed storage
//!
//! The data stream lives at the configured path and the index stream next
//! to it at `<path>.idx`. Appends are flushed before returning; rewrites go
//! through the crash-safe temp-file protocol.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::backend::StorageBackend;
use super::crash_safe::{
    append_lines, crash_safe_write_lines, ensure_file_integrity, ensure_parent_dir, read_lines,
    with_suffix,
};
use crate::crash_point::{maybe_crash, points};

/// Suffix of the index stream file
pub const INDEX_FILE_SUFFIX: &str = ".idx";

/// Backend storing each stream in its own file
#[derive(Debug)]
pub struct FileBackend {
    data_path: PathBuf,
    index_path: PathBuf,
    /// Serializes file access between the queue worker and other handles
    io_lock: Mutex<()>,
}

impl FileBackend {
    /// Backend for the data file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let data_path = path.into();
        let index_path = with_suffix(&data_path, INDEX_FILE_SUFFIX);
        Self {
            data_path,
            index_path,
            io_lock: Mutex::new(()),
        }
    }

    /// Path of the data stream
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Path of the index stream
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageBackend for FileBackend {
    fn init(&self) -> io::Result<()> {
        let _guard = self.lock();
        ensure_parent_dir(&self.data_path)?;
        ensure_file_integrity(&self.data_path)?;
        ensure_file_integrity(&self.index_path)?;
        maybe_crash(points::LOAD_AFTER_INTEGRITY_CHECK);
        Ok(())
    }

    fn read_indexes(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()> {
        let _guard = self.lock();
        read_lines(&self.index_path, sink)
    }

    fn read_data(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()> {
        let _guard = self.lock();
        read_lines(&self.data_path, sink)
    }

    fn write_indexes(&self, lines: &[String]) -> io::Result<()> {
        let _guard = self.lock();
        crash_safe_write_lines(&self.index_path, lines)
    }

    fn write_data(&self, lines: &[String]) -> io::Result<()> {
        let _guard = self.lock();
        crash_safe_write_lines(&self.data_path, lines)
    }

    fn append_index(&self, lines: &[String]) -> io::Result<()> {
        let _guard = self.lock();
        append_lines(&self.index_path, lines)
    }

    fn append_data(&self, lines: &[String]) -> io::Result<()> {
        let _guard = self.lock();
        append_lines(&self.data_path, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_index_stream_sits_next_to_data() {
        let backend = FileBackend::new("/tmp/x/people.db");
        assert_eq!(backend.index_path(), Path::new("/tmp/x/people.db.idx"));
    }

    #[test]
    fn test_init_creates_nested_directories() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("a/b/data.db"));
        backend.init().unwrap();
        assert!(backend.data_path().exists());
        assert!(backend.index_path().exists());
    }

    #[test]
    fn test_append_then_rewrite() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("data.db"));
        backend.init().unwrap();
        backend.append_data(&["1".to_string(), "2".to_string()]).unwrap();
        backend.write_data(&["3".to_string()]).unwrap();

        let mut lines = Vec::new();
        backend.read_data(&mut |l| lines.push(l.to_string())).unwrap();
        assert_eq!(lines, vec!["3"]);
    }
}
