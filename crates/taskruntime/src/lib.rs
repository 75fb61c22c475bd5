//! Task execution runtime
//!
//! The bounded-concurrency [`TaskExecutor`], the step-by-step
//! [`WorkflowOrchestrator`], the registries they record into, and the
//! [`TaskRuntime`] that wires them to a pipeline built from the step registry.

mod adapters;
mod executor;
mod orchestrator;
mod pipeline;
mod registry;
mod runtime;
mod store;

pub use adapters::{ExecutorStep, PipelineBackend, StepBackend};
pub use executor::TaskExecutor;
pub use orchestrator::WorkflowOrchestrator;
pub use pipeline::{Pipeline, Step};
pub use registry::{StepFactory, StepMetadata, StepRegistry};
pub use runtime::{RuntimeConfig, SystemStatus, TaskRuntime, MAX_CONCURRENT_TASKS};
pub use store::{Record, Store, TaskStore, WorkflowStore};
