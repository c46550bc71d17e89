//! Task model and its claim/release/finish lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ImageRef, ProfileSnapshot};
use crate::errors::AppError;

/// Task priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TaskPriority::Low),
            "medium" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            _ => None,
        }
    }
}

/// Flat status label, used for filtering and storage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Available,
    InProgress,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Available => "available",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(TaskStatus::Available),
            "in_progress" => Some(TaskStatus::InProgress),
            "finished" => Some(TaskStatus::Finished),
            _ => None,
        }
    }
}

/// Lifecycle state of a task.
///
/// Each variant carries exactly the fields that are meaningful in it, so an
/// available task cannot have an assignee and only a finished task has
/// completion data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "status",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum TaskState {
    Available,
    InProgress {
        assigned_to: String,
        assignee_snapshot: ProfileSnapshot,
    },
    Finished {
        assigned_to: String,
        assignee_snapshot: ProfileSnapshot,
        completed_at: DateTime<Utc>,
        proof_image: ImageRef,
        completion_comment: String,
    },
}

/// A shared unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: TaskState,
}

impl Task {
    /// A fresh, unassigned task.
    pub fn new(
        title: String,
        description: String,
        priority: TaskPriority,
        created_by: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description,
            priority,
            created_by,
            created_at: now,
            state: TaskState::Available,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self.state {
            TaskState::Available => TaskStatus::Available,
            TaskState::InProgress { .. } => TaskStatus::InProgress,
            TaskState::Finished { .. } => TaskStatus::Finished,
        }
    }

    pub fn assignee(&self) -> Option<&str> {
        match &self.state {
            TaskState::Available => None,
            TaskState::InProgress { assigned_to, .. } | TaskState::Finished { assigned_to, .. } => {
                Some(assigned_to)
            }
        }
    }

    /// Proof image of a finished task, hosted or legacy.
    pub fn proof_image(&self) -> Option<&ImageRef> {
        match &self.state {
            TaskState::Finished { proof_image, .. } => Some(proof_image),
            _ => None,
        }
    }

    /// Take an available task.
    ///
    /// No version check happens here or in the store write: two concurrent claims
    /// both succeed and the later write owns the task.
    pub fn claim(&mut self, actor_id: &str, snapshot: ProfileSnapshot) -> Result<(), AppError> {
        match self.state {
            TaskState::Available => {
                self.state = TaskState::InProgress {
                    assigned_to: actor_id.to_string(),
                    assignee_snapshot: snapshot,
                };
                Ok(())
            }
            _ => Err(self.illegal("claimed", "available")),
        }
    }

    /// Hand an in-progress task back to the pool.
    pub fn release(&mut self) -> Result<(), AppError> {
        match self.state {
            TaskState::InProgress { .. } => {
                self.state = TaskState::Available;
                Ok(())
            }
            _ => Err(self.illegal("released", "in progress")),
        }
    }

    /// Complete an in-progress task with proof and a comment.
    ///
    /// Whether the caller is the assignee is checked by the request handler, not here.
    pub fn finish(
        &mut self,
        proof_image: ImageRef,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(AppError::Validation(
                "Please add a completion comment.".to_string(),
            ));
        }

        match &self.state {
            TaskState::InProgress {
                assigned_to,
                assignee_snapshot,
            } => {
                self.state = TaskState::Finished {
                    assigned_to: assigned_to.clone(),
                    assignee_snapshot: assignee_snapshot.clone(),
                    completed_at: now,
                    proof_image,
                    completion_comment: comment.to_string(),
                };
                Ok(())
            }
            _ => Err(self.illegal("finished", "in progress")),
        }
    }

    fn illegal(&self, action: &str, required: &str) -> AppError {
        AppError::InvalidState(format!(
            "Task {} cannot be {} while {}; it must be {}",
            self.id,
            action,
            self.status().as_str(),
            required
        ))
    }
}

/// Request body for creating a new task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
}

/// Query string for listing tasks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub finished: i64,
    /// In progress and assigned to the caller
    pub in_progress_mine: i64,
    pub available: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> ProfileSnapshot {
        ProfileSnapshot {
            display_name: name.to_string(),
            avatar: None,
        }
    }

    fn proof() -> ImageRef {
        ImageRef::Hosted {
            url: "https://img.example/proof.png".to_string(),
        }
    }

    fn available_task() -> Task {
        Task::new(
            "Water plants".to_string(),
            "All of them".to_string(),
            TaskPriority::High,
            "creator".to_string(),
            Utc::now(),
        )
    }

    /// The state-shape invariant every task must satisfy.
    fn assert_consistent(task: &Task) {
        assert_eq!(
            task.status() == TaskStatus::Available,
            task.assignee().is_none()
        );
        let finished_fields = matches!(task.state, TaskState::Finished { .. });
        assert_eq!(task.status() == TaskStatus::Finished, finished_fields);
    }

    #[test]
    fn test_new_task_is_available() {
        let task = available_task();
        assert_eq!(task.status(), TaskStatus::Available);
        assert_consistent(&task);
    }

    #[test]
    fn test_claim_assigns_claimant() {
        let mut task = available_task();
        task.claim("u1", snapshot("Ana")).unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.assignee(), Some("u1"));
        assert_consistent(&task);
    }

    #[test]
    fn test_claim_requires_available() {
        let mut task = available_task();
        task.claim("u1", snapshot("Ana")).unwrap();
        let err = task.claim("u2", snapshot("Bo")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(task.assignee(), Some("u1"));
    }

    #[test]
    fn test_release_clears_assignee() {
        let mut task = available_task();
        task.claim("u1", snapshot("Ana")).unwrap();
        task.release().unwrap();
        assert_eq!(task.status(), TaskStatus::Available);
        assert_eq!(task.assignee(), None);
        assert_consistent(&task);

        assert!(task.release().is_err());
    }

    #[test]
    fn test_finish_sets_completion() {
        let mut task = available_task();
        task.claim("u1", snapshot("Ana")).unwrap();
        task.finish(proof(), "  done  ", Utc::now()).unwrap();
        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.assignee(), Some("u1"));
        match &task.state {
            TaskState::Finished {
                completion_comment,
                proof_image,
                ..
            } => {
                assert_eq!(completion_comment, "done");
                assert_eq!(proof_image, &proof());
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_consistent(&task);
    }

    #[test]
    fn test_finish_without_comment_leaves_task_untouched() {
        let mut task = available_task();
        task.claim("u1", snapshot("Ana")).unwrap();
        let before = task.clone();
        let err = task.finish(proof(), "   ", Utc::now()).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(task, before);
    }

    #[test]
    fn test_finish_requires_in_progress() {
        let mut task = available_task();
        assert!(task.finish(proof(), "done", Utc::now()).is_err());
        assert_eq!(task.status(), TaskStatus::Available);
    }

    #[test]
    fn test_serialized_shape_is_flat() {
        let mut task = available_task();
        task.claim("u1", snapshot("Ana")).unwrap();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["assignedTo"], "u1");
        assert_eq!(json["assigneeSnapshot"]["displayName"], "Ana");
        assert_eq!(json["priority"], "high");
        assert!(json.get("completedAt").is_none());
    }
}
