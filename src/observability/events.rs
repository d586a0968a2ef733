//! Observability events for docstash
//!
//! Every lifecycle point the engine reports is a variant here. Events are
//! explicit and typed so that log consumers can match on stable names.

use std::fmt;

use super::logger::Severity;

/// Observable events in a datastore's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Load
    /// Datastore load begins
    LoadStart,
    /// Datastore load complete, executor ready
    LoadComplete,
    /// Load aborted (corruption or storage failure)
    LoadFailed,
    /// Corrupted lines were skipped (under threshold)
    CorruptLinesSkipped,

    // Integrity
    /// Temp file promoted over a missing live file
    TempFilePromoted,
    /// First run, empty live file created
    DataFileInitialized,
    /// Directory flush skipped on this platform
    DirectorySyncSkipped,

    // Compaction
    /// Compaction started
    CompactionStart,
    /// Compaction complete
    CompactionComplete,
    /// Compaction failed
    CompactionFailed,
    /// Autocompaction timer armed
    AutocompactionStarted,
    /// Autocompaction timer stopped
    AutocompactionStopped,

    // Indexes
    /// User index created
    IndexCreated,
    /// User index removed
    IndexRemoved,
    /// Documents past their TTL were removed
    StaleDocumentsExpired,

    // Executor
    /// A queued task panicked; queue continues
    TaskAborted,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::LoadStart => "DATASTORE_LOAD_BEGIN",
            Event::LoadComplete => "DATASTORE_LOAD_COMPLETE",
            Event::LoadFailed => "DATASTORE_LOAD_FAILED",
            Event::CorruptLinesSkipped => "CORRUPT_LINES_SKIPPED",

            Event::TempFilePromoted => "TEMP_FILE_PROMOTED",
            Event::DataFileInitialized => "DATA_FILE_INITIALIZED",
            Event::DirectorySyncSkipped => "DIRECTORY_SYNC_SKIPPED",

            Event::CompactionStart => "COMPACTION_BEGIN",
            Event::CompactionComplete => "COMPACTION_COMPLETE",
            Event::CompactionFailed => "COMPACTION_FAILED",
            Event::AutocompactionStarted => "AUTOCOMPACTION_STARTED",
            Event::AutocompactionStopped => "AUTOCOMPACTION_STOPPED",

            Event::IndexCreated => "INDEX_CREATED",
            Event::IndexRemoved => "INDEX_REMOVED",
            Event::StaleDocumentsExpired => "STALE_DOCUMENTS_EXPIRED",

            Event::TaskAborted => "TASK_ABORTED",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::LoadFailed => Severity::Fatal,
            Event::CompactionFailed | Event::TaskAborted => Severity::Error,
            Event::CorruptLinesSkipped | Event::TempFilePromoted => Severity::Warn,
            Event::DirectorySyncSkipped => Severity::Trace,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::LoadStart,
            Event::LoadComplete,
            Event::LoadFailed,
            Event::CorruptLinesSkipped,
            Event::TempFilePromoted,
            Event::DataFileInitialized,
            Event::DirectorySyncSkipped,
            Event::CompactionStart,
            Event::CompactionComplete,
            Event::CompactionFailed,
            Event::AutocompactionStarted,
            Event::AutocompactionStopped,
            Event::IndexCreated,
            Event::IndexRemoved,
            Event::StaleDocumentsExpired,
            Event::TaskAborted,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::LoadFailed.is_fatal());
        assert!(!Event::CompactionFailed.is_fatal());
        assert!(!Event::LoadComplete.is_fatal());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::LoadStart), "DATASTORE_LOAD_BEGIN");
        assert_eq!(
            format!("{}", Event::CompactionComplete),
            "COMPACTION_COMPLETE"
        );
    }
}
