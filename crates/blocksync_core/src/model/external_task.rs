//! Tasks owned by the external process (read-only input).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTask {
    pub id: String,
    pub content: String,
    pub status: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ExternalTask {
    /// Value-per-time ratio.
    ///
    /// Zero time with positive value ranks highest; zero over zero ranks lowest.
    pub fn priority(&self) -> f64 {
        if self.time > 0.0 {
            return self.value / self.time;
        }
        if self.value > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }
    }
}

pub fn filter_by_status<'a>(tasks: &'a [ExternalTask], status: &str) -> Vec<&'a ExternalTask> {
    tasks.iter().filter(|task| task.status == status).collect()
}

/// Highest priority first; ties keep input order.
pub fn sort_by_priority(tasks: &[ExternalTask]) -> Vec<ExternalTask> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(|left, right| {
        right
            .priority()
            .partial_cmp(&left.priority())
            .unwrap_or(Ordering::Equal)
    });
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: &str, value: f64, time: f64) -> ExternalTask {
        ExternalTask {
            id: id.to_string(),
            content: format!("task {id}"),
            status: status.to_string(),
            value,
            time,
            tags: None,
        }
    }

    #[test]
    fn zero_time_edges_rank_at_extremes() {
        let tasks = vec![
            task("ratio-2", "todo", 4.0, 2.0),
            task("zero-zero", "todo", 0.0, 0.0),
            task("free-win", "todo", 3.0, 0.0),
            task("ratio-half", "todo", 1.0, 2.0),
        ];
        let ids: Vec<_> = sort_by_priority(&tasks).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, ["free-win", "ratio-2", "ratio-half", "zero-zero"]);
    }

    #[test]
    fn ties_keep_input_order() {
        let tasks = vec![task("a", "todo", 2.0, 1.0), task("b", "todo", 4.0, 2.0)];
        let ids: Vec<_> = sort_by_priority(&tasks).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn filter_matches_exact_status() {
        let tasks = vec![task("a", "todo", 1.0, 1.0), task("b", "done", 1.0, 1.0)];
        let todo = filter_by_status(&tasks, "todo");
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].id, "a");
    }
}
