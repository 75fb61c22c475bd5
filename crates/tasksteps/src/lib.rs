//! Standard step library
//!
//! Built-in steps for common pipeline stages. Every step reads its payload
//! from the workflow input, or from an earlier step's result when its config
//! names one under `from`.

mod debug;
mod http;
mod text;
mod time;
mod transform;
mod video;

pub use debug::DebugStep;
pub use http::HttpFetchStep;
pub use text::TextStatsStep;
pub use time::DelayStep;
pub use transform::{JsonParseStep, JsonStringifyStep};
pub use video::{extract_video_id, VideoIdStep};

use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, StepResults, Value};
use taskruntime::StepRegistry;

/// Register all standard steps with a registry
pub fn register_all(registry: &mut StepRegistry) {
    registry.register(Arc::new(debug::DebugStepFactory));
    registry.register(Arc::new(http::HttpFetchStepFactory));
    registry.register(Arc::new(text::TextStatsStepFactory));
    registry.register(Arc::new(time::DelayStepFactory));
    registry.register(Arc::new(transform::JsonParseStepFactory));
    registry.register(Arc::new(transform::JsonStringifyStepFactory));
    registry.register(Arc::new(video::VideoIdStepFactory));
}

/// Registry with every standard step registered
pub fn standard_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    register_all(&mut registry);
    registry
}

/// Where a step takes its payload from
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    Workflow,
    Step(String),
}

impl InputSource {
    /// Reads the optional `from` key of a step config
    pub fn from_config(config: &HashMap<String, Value>) -> Result<Self, BackendError> {
        match config.get("from") {
            None | Some(Value::Null) => Ok(Self::Workflow),
            Some(Value::String(step)) if !step.trim().is_empty() => Ok(Self::Step(step.clone())),
            Some(other) => Err(BackendError::Configuration(format!(
                "'from' must name a step, got {}",
                other.kind()
            ))),
        }
    }

    pub fn resolve<'a>(
        &self,
        input: &'a Value,
        prior: &'a StepResults,
    ) -> Result<&'a Value, BackendError> {
        match self {
            Self::Workflow => Ok(input),
            Self::Step(step) => prior
                .get(step)
                .ok_or_else(|| BackendError::MissingInput(step.clone())),
        }
    }
}

pub(crate) fn expect_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, BackendError> {
    value.as_str().ok_or_else(|| BackendError::InvalidInputType {
        field: field.to_string(),
        expected: "string".to_string(),
        actual: value.kind().to_string(),
    })
}
