//! Datastore configuration
//!
//! Serializable settings load from a JSON file; the storage backend and
//! serialization hooks are attached with builders.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{DatastoreError, DatastoreResult};
use crate::persistence::{
    FileBackend, Persistence, SerializationHooks, StorageBackend, DEFAULT_CORRUPT_ALERT_THRESHOLD,
};

/// Shortest autocompaction period
pub const MIN_AUTOCOMPACTION_INTERVAL: Duration = Duration::from_millis(5000);

/// Datastore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreOptions {
    /// Data file; absent means memory-only
    #[serde(default)]
    pub filename: Option<PathBuf>,

    /// Ignore `filename` and keep everything in memory (default: false)
    #[serde(default)]
    pub in_memory_only: bool,

    /// Stamp `createdAt` and `updatedAt` (default: false)
    #[serde(default)]
    pub timestamp_data: bool,

    /// Tolerated share of corrupted lines at load (default: 0.1)
    #[serde(default = "default_corrupt_alert_threshold")]
    pub corrupt_alert_threshold: f64,

    /// Periodic compaction, in milliseconds
    #[serde(default)]
    pub autocompaction_interval_ms: Option<u64>,

    /// Load on construction (default: false)
    #[serde(default)]
    pub autoload: bool,

    /// Custom storage backend, taking precedence over `filename`
    #[serde(skip)]
    pub backend: Option<Arc<dyn StorageBackend>>,

    /// Line transforms applied to persisted lines
    #[serde(skip)]
    pub hooks: SerializationHooks,
}

fn default_corrupt_alert_threshold() -> f64 {
    DEFAULT_CORRUPT_ALERT_THRESHOLD
}

impl Default for DatastoreOptions {
    fn default() -> Self {
        Self {
            filename: None,
            in_memory_only: false,
            timestamp_data: false,
            corrupt_alert_threshold: default_corrupt_alert_threshold(),
            autocompaction_interval_ms: None,
            autoload: false,
            backend: None,
            hooks: SerializationHooks::none(),
        }
    }
}

impl DatastoreOptions {
    /// Memory-only datastore
    pub fn in_memory() -> Self {
        Self {
            in_memory_only: true,
            ..Default::default()
        }
    }

    /// Datastore persisted to `path`
    pub fn with_filename(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(path.into()),
            ..Default::default()
        }
    }

    /// Datastore persisted through a custom backend
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Default::default()
        }
    }

    /// Attach serialization hooks
    pub fn hooks(mut self, hooks: SerializationHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enable or disable timestamps
    pub fn timestamp_data(mut self, enabled: bool) -> Self {
        self.timestamp_data = enabled;
        self
    }

    /// Set the tolerated share of corrupted lines
    pub fn corrupt_alert_threshold(mut self, threshold: f64) -> Self {
        self.corrupt_alert_threshold = threshold;
        self
    }

    /// Load on construction
    pub fn autoload(mut self, enabled: bool) -> Self {
        self.autoload = enabled;
        self
    }

    /// Compact periodically
    pub fn autocompaction_interval(mut self, interval: Duration) -> Self {
        self.autocompaction_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Load options from a JSON file
    pub fn load(path: impl AsRef<Path>) -> DatastoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DatastoreError::InvalidOptions(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let options: Self = serde_json::from_str(&content).map_err(|e| {
            DatastoreError::InvalidOptions(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Check option values
    pub fn validate(&self) -> DatastoreResult<()> {
        if !(0.0..=1.0).contains(&self.corrupt_alert_threshold) {
            return Err(DatastoreError::InvalidOptions(format!(
                "corrupt_alert_threshold must be between 0 and 1, got {}",
                self.corrupt_alert_threshold
            )));
        }
        if let Some(filename) = &self.filename {
            if filename.as_os_str().is_empty() {
                return Err(DatastoreError::InvalidOptions("filename is empty".to_string()));
            }
            if filename.to_string_lossy().ends_with('~') {
                return Err(DatastoreError::InvalidOptions(
                    "The datafile name can't end with a ~, which is reserved for crash safe backup files"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Returns true when nothing is persisted
    pub fn is_in_memory(&self) -> bool {
        self.backend.is_none() && (self.in_memory_only || self.filename.is_none())
    }

    /// Autocompaction period, raised to the minimum
    pub fn autocompaction_period(&self) -> Option<Duration> {
        self.autocompaction_interval_ms
            .map(|ms| Duration::from_millis(ms).max(MIN_AUTOCOMPACTION_INTERVAL))
    }

    /// Build the persistence layer these options describe
    pub fn persistence(&self) -> DatastoreResult<Persistence> {
        let backend: Option<Arc<dyn StorageBackend>> = match (&self.backend, &self.filename) {
            (Some(backend), _) => Some(backend.clone()),
            _ if self.in_memory_only => None,
            (None, Some(filename)) => Some(Arc::new(FileBackend::new(filename.clone()))),
            (None, None) => None,
        };
        Ok(Persistence::new(
            backend,
            self.hooks.clone(),
            self.corrupt_alert_threshold,
        )?)
    }
}
