use crate::{FlowError, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Lifecycle of a submitted task.
///
/// The only legal paths are `Pending -> Processing -> Completed` and
/// `Pending -> Processing -> Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One admitted unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub input: Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending -> Processing`
    pub fn start(&mut self) -> Result<(), FlowError> {
        self.transition(TaskStatus::Processing)
    }

    /// `Processing -> Completed`, storing the backend's result
    pub fn complete(&mut self, result: Value) -> Result<(), FlowError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `Processing -> Failed`, storing the stringified failure
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), FlowError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), FlowError> {
        if !self.status.can_transition_to(to) {
            return Err(FlowError::Execution(format!(
                "Illegal task transition {} -> {} for task {}",
                self.status, to, self.id
            )));
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sets_result_and_completion_time() {
        let mut task = Task::new(Value::from("input"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.completed_at.is_none());

        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(task.result.is_none() && task.error.is_none());

        task.complete(Value::from("done")).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(Value::from("done")));
        assert!(task.error.is_none());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn failure_records_error_only() {
        let mut task = Task::new(Value::from("input"));
        task.start().unwrap();
        task.fail("backend unavailable").unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("backend unavailable"));
        assert!(task.result.is_none());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut task = Task::new(Value::from("input"));
        task.start().unwrap();
        task.complete(Value::Null).unwrap();
        let completed_at = task.completed_at;

        assert!(task.fail("late").is_err());
        assert!(task.start().is_err());
        assert!(task.complete(Value::from("again")).is_err());
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, completed_at);
        assert!(task.error.is_none());
    }

    #[test]
    fn cannot_skip_processing() {
        let mut task = Task::new(Value::from("input"));
        assert!(task.complete(Value::Null).is_err());
        assert!(task.fail("nope").is_err());
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
