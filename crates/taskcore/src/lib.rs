//! Core types for the task engine
//!
//! Payloads, task and workflow records with their state machines, the
//! collaborator traits the runtime executes against, pipeline definitions
//! and execution events. No scheduling logic lives here.

mod error;
mod events;
mod pipeline;
mod step;
mod task;
mod value;
mod workflow;

pub use error::{BackendError, FlowError, PipelineError};
pub use events::{EventBus, ExecutionEvent};
pub use pipeline::{PipelineSpec, StepSpec};
pub use step::{FnBackend, FnStep, ProcessingBackend, StepFunction};
pub use task::{Task, TaskId, TaskStatus};
pub use value::Value;
pub use workflow::{
    StepOutcome, StepRecord, StepResults, StepStatus, Workflow, WorkflowId, WorkflowStatus,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, FlowError>;
