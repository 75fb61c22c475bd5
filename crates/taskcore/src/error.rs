use crate::{TaskId, Workflow, WorkflowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// A workflow step failed. The partial record is already stored in the
    /// orchestrator's registry and is carried here as well.
    #[error("Workflow failed at step '{step}': {source}")]
    StepFailed {
        step: String,
        #[source]
        source: BackendError,
        workflow: Box<Workflow>,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Id of the workflow record a step failure left behind
    pub fn failed_workflow_id(&self) -> Option<WorkflowId> {
        match self {
            FlowError::StepFailed { workflow, .. } => Some(workflow.id),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::TaskNotFound(_) | FlowError::WorkflowNotFound(_))
    }
}

/// Failure reported by a processing backend or a workflow step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },
}

impl BackendError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline has no steps")]
    Empty,

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    #[error("Invalid pipeline: {0}")]
    Invalid(String),
}
