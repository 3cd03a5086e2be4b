//! Completion records relayed to the external process.
//!
//! # Invariants
//! - Two records denote the same real-world completion iff their
//!   `(task_id, completed_at)` pair is equal.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Composite dedup key: `task_id` + `completed_at`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub task_id: String,
    pub completed_at: String,
}

/// One entry of the completion file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEntry {
    pub task_id: String,
    /// ISO-8601, millisecond precision, `Z` suffix.
    pub completed_at: String,
    /// Minutes.
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
}

impl CompletionEntry {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            task_id: self.task_id.clone(),
            completed_at: self.completed_at.clone(),
        }
    }
}

/// Queued completion awaiting a confirmed file write.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCompletion {
    pub task_id: String,
    pub completed_at: String,
    pub duration_minutes: u32,
    pub block_id: Option<String>,
    pub retry_count: u32,
    pub queued_at: DateTime<Utc>,
}

impl PendingCompletion {
    pub fn new(
        task_id: impl Into<String>,
        duration_minutes: u32,
        block_id: Option<String>,
        completed_at: DateTime<Utc>,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            completed_at: format_completed_at(completed_at),
            duration_minutes,
            block_id,
            retry_count: 0,
            queued_at,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            task_id: self.task_id.clone(),
            completed_at: self.completed_at.clone(),
        }
    }

    pub fn to_entry(&self) -> CompletionEntry {
        CompletionEntry {
            task_id: self.task_id.clone(),
            completed_at: self.completed_at.clone(),
            duration: self.duration_minutes,
            block_id: self.block_id.clone(),
        }
    }
}

/// Formats like `2026-03-02T09:30:00.000Z`.
pub fn format_completed_at(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
