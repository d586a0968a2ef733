//! Observability for docstash
//!
//! Structured JSON logging of typed lifecycle events. Observability is
//! read-only: a failed log write never changes the outcome of an operation.
//!
//! ```ignore
//! use docstash::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::CompactionComplete, &[("documents", "42")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::LoadStart);
        log_event(Event::LoadComplete);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::CorruptLinesSkipped, &[("count", "3")]);
    }
}
