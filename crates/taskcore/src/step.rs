use crate::{BackendError, StepResults, Value};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Does the actual work for one task.
///
/// Implementations own their timeout policy; the executor waits for as long
/// as `execute` takes.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Short identifier used in logs (e.g. "pipeline.video")
    fn name(&self) -> &str {
        "backend"
    }

    async fn execute(&self, input: Value) -> Result<Value, BackendError>;
}

/// One named stage of a workflow.
///
/// Receives the workflow's shared input and the results of every step that
/// completed before it.
#[async_trait]
pub trait StepFunction: Send + Sync {
    /// Type identifier (e.g. "http.fetch", "source.video_id")
    fn step_type(&self) -> &str;

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError>;
}

/// Backend built from an async closure
pub struct FnBackend<F, Fut> {
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnBackend<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BackendError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> ProcessingBackend for FnBackend<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BackendError>> + Send,
{
    fn name(&self) -> &str {
        "fn"
    }

    async fn execute(&self, input: Value) -> Result<Value, BackendError> {
        (self.func)(input).await
    }
}

/// Step built from an async closure over owned copies of the input and prior results
pub struct FnStep<F, Fut> {
    step_type: String,
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStep<F, Fut>
where
    F: Fn(Value, StepResults) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BackendError>> + Send,
{
    pub fn new(step_type: impl Into<String>, func: F) -> Self {
        Self {
            step_type: step_type.into(),
            func,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> StepFunction for FnStep<F, Fut>
where
    F: Fn(Value, StepResults) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BackendError>> + Send,
{
    fn step_type(&self) -> &str {
        &self.step_type
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        (self.func)(input.clone(), prior.clone()).await
    }
}
