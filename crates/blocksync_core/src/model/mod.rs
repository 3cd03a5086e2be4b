//! Domain model for the replicated planner document.
//!
//! # Responsibility
//! - Define the entities stored in the document collections.
//! - Define the records exchanged with the external process.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID string assigned at creation.
//! - Field names serialize as camelCase to match the exchanged JSON shape.

pub mod block;
pub mod breaks;
pub mod completion;
pub mod external_task;
pub mod right_now;
pub mod task;

use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable entity identifier (UUID v4 in string form).
pub type EntityId = String;

/// Generates a fresh entity id.
pub fn new_entity_id() -> EntityId {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Validation failures for entity invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(&'static str),
    EndsBeforeStart { start_ms: i64, end_ms: i64 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "`{field}` cannot be empty"),
            Self::EndsBeforeStart { start_ms, end_ms } => {
                write!(f, "end {end_ms} is earlier than start {start_ms}")
            }
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn ensure_ordered(start_ms: i64, end_ms: Option<i64>) -> Result<(), ValidationError> {
    match end_ms {
        Some(end_ms) if end_ms < start_ms => {
            Err(ValidationError::EndsBeforeStart { start_ms, end_ms })
        }
        _ => Ok(()),
    }
}
