//! Task and subtask model.

use super::{new_entity_id, EntityId, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: EntityId,
    pub title: String,
    pub completed: bool,
}

impl Subtask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: new_entity_id(),
            title: title.into(),
            completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub completed: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds; bumped by every update.
    pub modified_at: i64,
    #[serde(default)]
    pub blocks_spent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Task {
    pub fn new(title: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: new_entity_id(),
            title: title.into(),
            subtasks: Vec::new(),
            completed: false,
            created_at: now_ms,
            modified_at: now_ms,
            blocks_spent: 0,
            notes: None,
        }
    }

    pub fn subtask_mut(&mut self, subtask_id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|subtask| subtask.id == subtask_id)
    }

    /// Completed subtasks over total subtasks.
    pub fn progress(&self) -> (usize, usize) {
        let done = self.subtasks.iter().filter(|subtask| subtask.completed).count();
        (done, self.subtasks.len())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title"));
        }
        if self.subtasks.iter().any(|subtask| subtask.title.trim().is_empty()) {
            return Err(ValidationError::EmptyField("subtasks.title"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_clean() {
        let task = Task::new("Write report", 42);
        assert_eq!(task.created_at, 42);
        assert_eq!(task.modified_at, 42);
        assert_eq!(task.blocks_spent, 0);
        assert!(!task.completed);
        assert_eq!(task.progress(), (0, 0));
    }

    #[test]
    fn blank_title_fails_validation() {
        let task = Task::new("   ", 0);
        assert_eq!(task.validate(), Err(ValidationError::EmptyField("title")));
    }

    #[test]
    fn progress_counts_completed_subtasks() {
        let mut task = Task::new("Write report", 0);
        task.subtasks.push(Subtask::new("outline"));
        task.subtasks.push(Subtask::new("draft"));
        let first = task.subtasks[0].id.clone();
        task.subtask_mut(&first).unwrap().completed = true;
        assert_eq!(task.progress(), (1, 2));
    }
}
