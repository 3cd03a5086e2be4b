//! Break model.
//!
//! # Invariants
//! - `duration` is whole minutes between `started_at` and `ended_at`, 0 while open.

use super::{ensure_ordered, new_entity_id, EntityId, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Break {
    pub id: EntityId,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Minutes.
    #[serde(default)]
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Break {
    pub fn start(started_at: i64) -> Self {
        Self {
            id: new_entity_id(),
            started_at,
            ended_at: None,
            duration: 0,
            notes: None,
        }
    }

    /// Closes the break and derives `duration` in whole minutes.
    pub fn end(&mut self, ended_at: i64) {
        self.ended_at = Some(ended_at);
        let elapsed_ms = (ended_at - self.started_at).max(0);
        self.duration = u32::try_from(elapsed_ms / 60_000).unwrap_or(u32::MAX);
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_ordered(self.started_at, self.ended_at)
    }
}

#[cfg(test)]
mod tests {
    use super::Break;

    #[test]
    fn end_derives_whole_minutes() {
        let mut entry = Break::start(0);
        assert!(entry.is_open());
        entry.end(5 * 60_000 + 59_999);
        assert_eq!(entry.duration, 5);
        assert!(!entry.is_open());
    }
}
