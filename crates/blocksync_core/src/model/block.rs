//! Focus block model.
//!
//! # Invariants
//! - `is_valid == false` is terminal; a block never becomes valid again.
//! - `completed_at`, when set, is not earlier than `started_at`.

use super::{ensure_ordered, new_entity_id, EntityId, ValidationError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Five self-assessment flags recorded for one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub planned: bool,
    pub focused: bool,
    pub single_task: bool,
    pub no_distractions: bool,
    pub reviewed: bool,
}

impl BlockMeta {
    pub fn all() -> Self {
        Self {
            planned: true,
            focused: true,
            single_task: true,
            no_distractions: true,
            reviewed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: EntityId,
    pub date: NaiveDate,
    /// Unix epoch milliseconds.
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,
    pub meta: BlockMeta,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Caller-supplied fields for a new block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDraft {
    pub date: NaiveDate,
    pub started_at: i64,
    pub task_id: Option<EntityId>,
    pub meta: BlockMeta,
    pub notes: Option<String>,
}

impl Block {
    pub fn from_draft(draft: BlockDraft) -> Self {
        Self {
            id: new_entity_id(),
            date: draft.date,
            started_at: draft.started_at,
            completed_at: None,
            task_id: draft.task_id,
            meta: draft.meta,
            is_valid: true,
            notes: draft.notes,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        ensure_ordered(self.started_at, self.completed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> BlockDraft {
        BlockDraft {
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            started_at: 1_000,
            task_id: None,
            meta: BlockMeta::default(),
            notes: None,
        }
    }

    #[test]
    fn new_block_is_valid_and_open() {
        let block = Block::from_draft(draft());
        assert!(block.is_valid);
        assert!(!block.is_completed());
        assert!(block.validate().is_ok());
    }

    #[test]
    fn completion_before_start_is_rejected() {
        let mut block = Block::from_draft(draft());
        block.completed_at = Some(999);
        assert_eq!(
            block.validate(),
            Err(ValidationError::EndsBeforeStart {
                start_ms: 1_000,
                end_ms: 999
            })
        );
    }

    #[test]
    fn serializes_camel_case_and_skips_empty_optionals() {
        let block = Block::from_draft(draft());
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["date"], "2026-03-02");
        assert_eq!(json["startedAt"], 1_000);
        assert_eq!(json["isValid"], true);
        assert_eq!(json["meta"]["singleTask"], false);
        assert!(json.get("completedAt").is_none());
    }
}
