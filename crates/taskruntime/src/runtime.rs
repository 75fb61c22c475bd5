use crate::adapters::PipelineBackend;
use crate::executor::TaskExecutor;
use crate::orchestrator::WorkflowOrchestrator;
use crate::pipeline::Pipeline;
use crate::registry::StepRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use taskcore::{
    EventBus, ExecutionEvent, FlowError, PipelineSpec, TaskId, Value, Workflow, WorkflowId,
    WorkflowStatus,
};
use tokio::sync::Semaphore;

/// Upper bound on `max_concurrent_tasks`: the permit pool must fit a tokio
/// semaphore and be drained by a single `acquire_many` on shutdown
pub const MAX_CONCURRENT_TASKS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of tasks allowed to run against the backend at once
    pub max_concurrent_tasks: usize,
    /// How long the dispatcher waits on an empty queue before re-checking
    /// whether it was stopped
    pub dequeue_timeout: Duration,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            dequeue_timeout: Duration::from_secs(1),
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `TASKFLOW_MAX_CONCURRENT`,
    /// `TASKFLOW_DEQUEUE_TIMEOUT_MS` and `TASKFLOW_EVENT_BUFFER`
    pub fn from_env() -> Result<Self, FlowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FlowError> {
        let mut config = Self::default();
        if let Some(n) = parse_var(&lookup, "TASKFLOW_MAX_CONCURRENT")? {
            config.max_concurrent_tasks = to_usize("TASKFLOW_MAX_CONCURRENT", n)?;
        }
        if let Some(ms) = parse_var(&lookup, "TASKFLOW_DEQUEUE_TIMEOUT_MS")? {
            config.dequeue_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "TASKFLOW_EVENT_BUFFER")? {
            config.event_buffer_size = to_usize("TASKFLOW_EVENT_BUFFER", n)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.max_concurrent_tasks == 0 {
            return Err(FlowError::InvalidInput(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks > MAX_CONCURRENT_TASKS {
            return Err(FlowError::InvalidInput(format!(
                "max_concurrent_tasks must be at most {}",
                MAX_CONCURRENT_TASKS
            )));
        }
        if self.dequeue_timeout.is_zero() {
            return Err(FlowError::InvalidInput(
                "dequeue_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_usize(key: &str, n: u64) -> Result<usize, FlowError> {
    usize::try_from(n).map_err(|_| FlowError::InvalidInput(format!("{} is out of range: {}", key, n)))
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, FlowError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| FlowError::InvalidInput(format!("{}={:?}: {}", key, raw, e))),
    }
}

/// Snapshot of the whole runtime
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub queue_depth: usize,
    pub active_tasks: usize,
    pub total_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub workflows: usize,
    pub completed_workflows: usize,
    pub failed_workflows: usize,
}

/// Executor and orchestrator sharing one pipeline, one registry and one event bus.
///
/// Tasks submitted here run the whole pipeline as a single unit of work;
/// workflows run the same pipeline step by step with a recorded history.
pub struct TaskRuntime {
    registry: Arc<StepRegistry>,
    pipeline: Arc<Pipeline>,
    executor: Arc<TaskExecutor>,
    orchestrator: Arc<WorkflowOrchestrator>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl TaskRuntime {
    pub fn new(
        registry: Arc<StepRegistry>,
        spec: &PipelineSpec,
        config: RuntimeConfig,
    ) -> Result<Self, FlowError> {
        config.validate()?;
        let pipeline = Arc::new(registry.build_pipeline(spec)?);
        Ok(Self::with_pipeline(registry, pipeline, config))
    }

    pub fn with_pipeline(
        registry: Arc<StepRegistry>,
        pipeline: Arc<Pipeline>,
        config: RuntimeConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let backend = Arc::new(PipelineBackend::new(Arc::clone(&pipeline)));
        let executor = Arc::new(TaskExecutor::with_events(
            backend,
            &config,
            Arc::clone(&event_bus),
        ));
        let orchestrator = Arc::new(WorkflowOrchestrator::new(Arc::clone(&event_bus)));

        Self {
            registry,
            pipeline,
            executor,
            orchestrator,
            event_bus,
            config,
        }
    }

    pub async fn start(&self) {
        self.executor.start().await;
    }

    pub async fn stop(&self) {
        self.executor.stop().await;
    }

    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }

    pub async fn submit(&self, input: Value) -> Result<TaskId, FlowError> {
        self.executor.submit(input).await
    }

    pub async fn submit_batch(&self, inputs: Vec<Value>) -> Vec<TaskId> {
        self.executor.submit_batch(inputs).await
    }

    pub async fn run_workflow(&self, input: Value) -> Result<Workflow, FlowError> {
        self.orchestrator.run(input, &self.pipeline).await
    }

    pub async fn run_batch(&self, inputs: Vec<Value>) -> Vec<WorkflowId> {
        self.orchestrator.run_batch(inputs, &self.pipeline).await
    }

    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus {
            running: self.executor.is_running().await,
            queue_depth: self.executor.queue_depth(),
            active_tasks: self.executor.active_count().await,
            total_tasks: self.executor.store().len().await,
            max_concurrent_tasks: self.executor.max_concurrent(),
            workflows: self.orchestrator.store().len().await,
            completed_workflows: self
                .orchestrator
                .count_by_status(WorkflowStatus::Completed)
                .await,
            failed_workflows: self.orchestrator.count_by_status(WorkflowStatus::Failed).await,
        }
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn orchestrator(&self) -> &Arc<WorkflowOrchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
