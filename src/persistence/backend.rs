//! Storage backend abstraction
//!
//! A backend stores two append-only streams of text lines: the data stream
//! (documents and tombstones) and the index stream (index definitions).
//! Backends report plain `io::Error`s; `Persistence` translates them.

use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard};

/// Line storage for one datastore
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Prepare both streams, repairing an interrupted rewrite if needed
    fn init(&self) -> io::Result<()>;

    /// Feed every index stream line to `sink`, in order
    fn read_indexes(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()>;

    /// Feed every data stream line to `sink`, in order
    fn read_data(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()>;

    /// Replace the index stream atomically
    fn write_indexes(&self, lines: &[String]) -> io::Result<()>;

    /// Replace the data stream atomically
    fn write_data(&self, lines: &[String]) -> io::Result<()>;

    /// Append lines to the index stream, durable on return
    fn append_index(&self, lines: &[String]) -> io::Result<()>;

    /// Append lines to the data stream, durable on return
    fn append_data(&self, lines: &[String]) -> io::Result<()>;
}

#[derive(Debug, Default)]
struct MemoryStreams {
    data: Vec<String>,
    indexes: Vec<String>,
}

/// Backend keeping both streams in process memory
///
/// Shared through an `Arc`, it outlives the datastores that use it, which
/// lets tests reload a datastore from the same lines.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    streams: Mutex<MemoryStreams>,
}

impl MemoryBackend {
    /// Empty streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams pre-filled with raw lines
    pub fn with_lines(data: Vec<String>, indexes: Vec<String>) -> Self {
        Self {
            streams: Mutex::new(MemoryStreams { data, indexes }),
        }
    }

    fn streams(&self) -> MutexGuard<'_, MemoryStreams> {
        self.streams.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the data stream
    pub fn data_lines(&self) -> Vec<String> {
        self.streams().data.clone()
    }

    /// Copy of the index stream
    pub fn index_lines(&self) -> Vec<String> {
        self.streams().indexes.clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn init(&self) -> io::Result<()> {
        Ok(())
    }

    fn read_indexes(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()> {
        let lines = self.index_lines();
        lines.iter().for_each(|line| sink(line));
        Ok(())
    }

    fn read_data(&self, sink: &mut dyn FnMut(&str)) -> io::Result<()> {
        let lines = self.data_lines();
        lines.iter().for_each(|line| sink(line));
        Ok(())
    }

    fn write_indexes(&self, lines: &[String]) -> io::Result<()> {
        self.streams().indexes = lines.to_vec();
        Ok(())
    }

    fn write_data(&self, lines: &[String]) -> io::Result<()> {
        self.streams().data = lines.to_vec();
        Ok(())
    }

    fn append_index(&self, lines: &[String]) -> io::Result<()> {
        self.streams().indexes.extend_from_slice(lines);
        Ok(())
    }

    fn append_data(&self, lines: &[String]) -> io::Result<()> {
        self.streams().data.extend_from_slice(lines);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_streams_are_separate() {
        let backend = MemoryBackend::new();
        backend.append_data(&["a".to_string(), "b".to_string()]).unwrap();
        backend.append_index(&["i".to_string()]).unwrap();

        let mut seen = Vec::new();
        backend.read_data(&mut |line| seen.push(line.to_string())).unwrap();
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(backend.index_lines(), vec!["i"]);
    }

    #[test]
    fn test_memory_backend_rewrite_replaces() {
        let backend = MemoryBackend::with_lines(vec!["old".to_string()], Vec::new());
        backend.write_data(&["new".to_string()]).unwrap();
        assert_eq!(backend.data_lines(), vec!["new"]);
    }
}
