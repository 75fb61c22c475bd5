use crate::pipeline::Pipeline;
use crate::store::WorkflowStore;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use taskcore::{
    BackendError, EventBus, ExecutionEvent, FlowError, Value, Workflow, WorkflowId, WorkflowStatus,
};
use tracing::{debug, error, info, warn};

/// Runs pipelines step by step and keeps every run's record.
///
/// Each step sees the shared input and the results of the steps before it.
/// The first failing step ends the run; the record keeps everything that
/// happened up to and including that failure.
pub struct WorkflowOrchestrator {
    workflows: WorkflowStore,
    events: Arc<EventBus>,
}

impl WorkflowOrchestrator {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            workflows: WorkflowStore::new(),
            events,
        }
    }

    /// Run `pipeline` over `input`.
    ///
    /// On success returns the completed record. When a step fails the
    /// partial record is stored first and then returned inside
    /// [`FlowError::StepFailed`].
    pub async fn run(&self, input: Value, pipeline: &Pipeline) -> Result<Workflow, FlowError> {
        if input.is_blank() {
            return Err(FlowError::InvalidInput(format!(
                "workflow input must not be empty (got {})",
                input.kind()
            )));
        }
        pipeline.validate()?;

        let mut workflow = Workflow::new(pipeline.name(), input);
        while !self.workflows.insert(workflow.clone()).await {
            workflow.id = WorkflowId::new_v4();
        }
        let workflow_id = workflow.id;

        self.events.emit(ExecutionEvent::WorkflowStarted {
            workflow_id,
            name: pipeline.name().to_string(),
            timestamp: Utc::now(),
        });
        info!(
            "Starting workflow {} ({}, {} steps)",
            workflow_id,
            pipeline.name(),
            pipeline.len()
        );

        let run_start = Instant::now();
        for (index, step) in pipeline.steps().iter().enumerate() {
            debug!("Workflow {} step {}: {}", workflow_id, index + 1, step.name);

            let started_at = Utc::now();
            let step_start = Instant::now();
            let outcome = AssertUnwindSafe(step.function.invoke(&workflow.input, &workflow.results))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(BackendError::failed("step panicked")));
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(result) => {
                    workflow.record_success(&step.name, result.clone(), started_at, duration_ms)?;
                    self.workflows.put(workflow.clone()).await;

                    self.events.emit(ExecutionEvent::StepCompleted {
                        workflow_id,
                        step: step.name.clone(),
                        result,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    info!(
                        "Workflow {} step '{}' completed in {}ms",
                        workflow_id, step.name, duration_ms
                    );
                }
                Err(err) => {
                    workflow.record_failure(&step.name, &err, started_at, duration_ms)?;
                    self.workflows.put(workflow.clone()).await;

                    self.events.emit(ExecutionEvent::StepFailed {
                        workflow_id,
                        step: step.name.clone(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                    self.events.emit(ExecutionEvent::WorkflowCompleted {
                        workflow_id,
                        success: false,
                        duration_ms: run_start.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    error!(
                        "Workflow {} failed at step '{}': {}",
                        workflow_id, step.name, err
                    );

                    return Err(FlowError::StepFailed {
                        step: step.name.clone(),
                        source: err,
                        workflow: Box::new(workflow),
                    });
                }
            }
        }

        workflow.complete()?;
        self.workflows.put(workflow.clone()).await;

        let duration_ms = run_start.elapsed().as_millis() as u64;
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            workflow_id,
            success: true,
            duration_ms,
            timestamp: Utc::now(),
        });
        info!("Workflow {} completed in {}ms", workflow_id, duration_ms);

        Ok(workflow)
    }

    /// Run one workflow per input, one after another.
    ///
    /// Returns the id of every run that was accepted, whether it completed or
    /// failed. Inputs rejected before a run starts are logged and skipped.
    pub async fn run_batch(&self, inputs: Vec<Value>, pipeline: &Pipeline) -> Vec<WorkflowId> {
        let total = inputs.len();
        let mut ids = Vec::with_capacity(total);

        for (index, input) in inputs.into_iter().enumerate() {
            match self.run(input, pipeline).await {
                Ok(workflow) => ids.push(workflow.id),
                Err(e) => match e.failed_workflow_id() {
                    Some(id) => {
                        warn!("Batch item {} (workflow {}) failed: {}", index, id, e);
                        ids.push(id);
                    }
                    None => error!("Batch item {} rejected: {}", index, e),
                },
            }
        }

        info!("Batch finished: {}/{} workflows accepted", ids.len(), total);
        ids
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, FlowError> {
        self.workflows
            .get(workflow_id)
            .await
            .ok_or(FlowError::WorkflowNotFound(workflow_id))
    }

    pub async fn get_all_workflows(&self) -> Vec<Workflow> {
        self.workflows.list().await
    }

    pub async fn count_by_status(&self, status: WorkflowStatus) -> usize {
        self.workflows.count_where(|w| w.status == status).await
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.workflows
    }
}
