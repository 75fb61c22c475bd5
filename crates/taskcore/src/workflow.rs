use crate::{BackendError, FlowError, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Results accumulated by a workflow run, keyed by step name
pub type StepResults = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Outcome of one attempted step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", content = "value", rename_all = "lowercase")]
pub enum StepOutcome {
    Result(Value),
    Error(String),
}

/// One entry of a workflow's step history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub outcome: StepOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepRecord {
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            StepOutcome::Result(value) => Some(value),
            StepOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Error(e) => Some(e),
            StepOutcome::Result(_) => None,
        }
    }
}

/// One orchestrated multi-step run.
///
/// `steps` is append-only and lists every attempted step, including the one
/// that failed. `results` only ever holds completed steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub input: Value,
    pub status: WorkflowStatus,
    pub steps: Vec<StepRecord>,
    pub results: StepResults,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            input,
            status: WorkflowStatus::Running,
            steps: Vec::new(),
            results: HashMap::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a completed step and expose its result to later steps
    pub fn record_success(
        &mut self,
        name: impl Into<String>,
        result: Value,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<(), FlowError> {
        self.ensure_running()?;
        let name = name.into();
        self.results.insert(name.clone(), result.clone());
        self.steps.push(StepRecord {
            name,
            status: StepStatus::Completed,
            outcome: StepOutcome::Result(result),
            started_at,
            duration_ms,
        });
        Ok(())
    }

    /// Append the failed step and move the whole run to `Failed`
    pub fn record_failure(
        &mut self,
        name: impl Into<String>,
        error: &BackendError,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<(), FlowError> {
        self.ensure_running()?;
        let message = error.to_string();
        self.steps.push(StepRecord {
            name: name.into(),
            status: StepStatus::Failed,
            outcome: StepOutcome::Error(message.clone()),
            started_at,
            duration_ms,
        });
        self.status = WorkflowStatus::Failed;
        self.error = Some(message);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), FlowError> {
        self.ensure_running()?;
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), FlowError> {
        if self.is_terminal() {
            return Err(FlowError::Execution(format!(
                "Workflow {} is already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_keeps_completed_history() {
        let mut wf = Workflow::new("video", Value::from("https://youtu.be/abc"));
        wf.record_success("fetch", Value::from("transcript"), Utc::now(), 3)
            .unwrap();
        wf.record_failure("analyze", &BackendError::failed("quota exceeded"), Utc::now(), 1)
            .unwrap();

        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].status, StepStatus::Completed);
        assert_eq!(wf.steps[1].status, StepStatus::Failed);
        assert_eq!(wf.steps[1].error(), Some("Execution failed: quota exceeded"));
        assert_eq!(wf.results.len(), 1);
        assert!(wf.results.contains_key("fetch"));
        assert_eq!(wf.error.as_deref(), Some("Execution failed: quota exceeded"));
    }

    #[test]
    fn no_steps_after_terminal() {
        let mut wf = Workflow::new("video", Value::from("x"));
        wf.complete().unwrap();

        assert!(wf.record_success("late", Value::Null, Utc::now(), 0).is_err());
        assert!(wf.complete().is_err());
        assert!(wf.steps.is_empty());
        assert_eq!(wf.status, WorkflowStatus::Completed);
    }
}
