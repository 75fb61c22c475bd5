use crate::InputSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, StepFunction, StepResults, Value};
use taskruntime::{StepFactory, StepMetadata};

/// Logs its payload and passes it through unchanged
pub struct DebugStep {
    source: InputSource,
    label: String,
}

impl DebugStep {
    pub fn new(source: InputSource, label: impl Into<String>) -> Self {
        Self {
            source,
            label: label.into(),
        }
    }
}

#[async_trait]
impl StepFunction for DebugStep {
    fn step_type(&self) -> &str {
        "debug.log"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let value = self.source.resolve(input, prior)?;

        tracing::info!("DEBUG {}: {:?}", self.label, value);
        for (step, result) in prior {
            tracing::debug!("  {}: {}", step, result.kind());
        }

        Ok(value.clone())
    }
}

pub struct DebugStepFactory;

impl StepFactory for DebugStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        let label = config
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or("value");
        Ok(Arc::new(DebugStep::new(InputSource::from_config(config)?, label)))
    }

    fn step_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Logs its payload for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
