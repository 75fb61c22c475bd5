//! Glue between the two collaborator traits and the executor.
//!
//! - [`StepBackend`] runs a single step as a task backend.
//! - [`PipelineBackend`] runs a whole pipeline as one task.
//! - [`ExecutorStep`] sends a workflow step through a [`TaskExecutor`] so it
//!   is queued and counted against the executor's concurrency bound.

use crate::executor::TaskExecutor;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, ProcessingBackend, StepFunction, StepResults, TaskStatus, Value};

/// A step used as a backend, invoked with no prior results
pub struct StepBackend {
    step: Arc<dyn StepFunction>,
}

impl StepBackend {
    pub fn new(step: Arc<dyn StepFunction>) -> Self {
        Self { step }
    }
}

#[async_trait]
impl ProcessingBackend for StepBackend {
    fn name(&self) -> &str {
        self.step.step_type()
    }

    async fn execute(&self, input: Value) -> Result<Value, BackendError> {
        self.step.invoke(&input, &HashMap::new()).await
    }
}

/// Runs every step of a pipeline in order and returns the results object
pub struct PipelineBackend {
    pipeline: Arc<Pipeline>,
}

impl PipelineBackend {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ProcessingBackend for PipelineBackend {
    fn name(&self) -> &str {
        self.pipeline.name()
    }

    async fn execute(&self, input: Value) -> Result<Value, BackendError> {
        let mut results = StepResults::new();
        for step in self.pipeline.steps() {
            let value = step.function.invoke(&input, &results).await.map_err(|e| {
                BackendError::ExecutionFailed(format!("step '{}' failed: {}", step.name, e))
            })?;
            results.insert(step.name.clone(), value);
        }
        Ok(Value::Object(results))
    }
}

/// Workflow step that is submitted to an executor and awaited.
///
/// The executor must be started, otherwise the step waits forever.
pub struct ExecutorStep {
    executor: Arc<TaskExecutor>,
    source: Option<String>,
}

impl ExecutorStep {
    /// Submit the workflow input
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            source: None,
        }
    }

    /// Submit the result of an earlier step instead of the workflow input
    pub fn from_step(executor: Arc<TaskExecutor>, step: impl Into<String>) -> Self {
        Self {
            executor,
            source: Some(step.into()),
        }
    }
}

#[async_trait]
impl StepFunction for ExecutorStep {
    fn step_type(&self) -> &str {
        "executor.submit"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let payload = match &self.source {
            Some(step) => prior
                .get(step)
                .cloned()
                .ok_or_else(|| BackendError::MissingInput(step.clone()))?,
            None => input.clone(),
        };

        let task_id = self
            .executor
            .submit(payload)
            .await
            .map_err(|e| BackendError::failed(e.to_string()))?;
        let task = self
            .executor
            .wait(task_id)
            .await
            .map_err(|e| BackendError::failed(e.to_string()))?;

        match (task.status, task.result, task.error) {
            (TaskStatus::Completed, Some(result), _) => Ok(result),
            (TaskStatus::Failed, _, error) => Err(BackendError::ExecutionFailed(
                error.unwrap_or_else(|| format!("task {} failed", task_id)),
            )),
            (status, _, _) => Err(BackendError::failed(format!(
                "task {} ended in unexpected state {}",
                task_id, status
            ))),
        }
    }
}
