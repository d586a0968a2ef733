//! Serialization hooks
//!
//! An optional pair of line transforms applied after serialization and
//! before deserialization, e.g. for encryption. Both must be given and the
//! second must undo the first; otherwise the datastore refuses to start.

use std::fmt;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use super::errors::{PersistenceError, PersistenceResult};

/// Line transform
pub type LineTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

const ROUND_TRIP_SAMPLES: usize = 30;

/// Transforms applied to every persisted line
#[derive(Clone, Default)]
pub struct SerializationHooks {
    after_serialization: Option<LineTransform>,
    before_deserialization: Option<LineTransform>,
}

impl SerializationHooks {
    /// No transforms
    pub fn none() -> Self {
        Self::default()
    }

    /// Both transforms
    pub fn new(after_serialization: LineTransform, before_deserialization: LineTransform) -> Self {
        Self {
            after_serialization: Some(after_serialization),
            before_deserialization: Some(before_deserialization),
        }
    }

    /// Set only the outbound transform; `validate` rejects this alone
    pub fn after_serialization(mut self, transform: LineTransform) -> Self {
        self.after_serialization = Some(transform);
        self
    }

    /// Set only the inbound transform; `validate` rejects this alone
    pub fn before_deserialization(mut self, transform: LineTransform) -> Self {
        self.before_deserialization = Some(transform);
        self
    }

    /// Returns true if no transform is set
    pub fn is_identity(&self) -> bool {
        self.after_serialization.is_none() && self.before_deserialization.is_none()
    }

    /// Check the pair is complete and round-trips random lines
    pub fn validate(&self) -> PersistenceResult<()> {
        let (after, before) = match (&self.after_serialization, &self.before_deserialization) {
            (None, None) => return Ok(()),
            (Some(after), Some(before)) => (after, before),
            _ => {
                return Err(PersistenceError::invalid_configuration(
                    "Serialization hook defined but deserialization hook undefined, or the other way around, cautiously refusing to start to prevent data loss",
                ))
            }
        };

        let mut rng = rand::thread_rng();
        for len in 1..=ROUND_TRIP_SAMPLES {
            let sample: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            let encoded = after(&sample);
            if encoded.contains('\n') {
                return Err(PersistenceError::invalid_configuration(
                    "afterSerialization must not produce line breaks",
                ));
            }
            if before(&encoded) != sample {
                return Err(PersistenceError::invalid_configuration(
                    "beforeDeserialization is not the reverse of afterSerialization, cautiously refusing to start to prevent data loss",
                ));
            }
        }
        Ok(())
    }

    /// Apply the outbound transform
    pub fn serialize(&self, line: String) -> String {
        match &self.after_serialization {
            Some(transform) => transform(&line),
            None => line,
        }
    }

    /// Apply the inbound transform
    pub fn deserialize<'a>(&self, line: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.before_deserialization {
            Some(transform) => std::borrow::Cow::Owned(transform(line)),
            None => std::borrow::Cow::Borrowed(line),
        }
    }
}

impl fmt::Debug for SerializationHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializationHooks")
            .field("after_serialization", &self.after_serialization.is_some())
            .field("before_deserialization", &self.before_deserialization.is_some())
            .finish()
    }
}
