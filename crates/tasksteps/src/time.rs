use crate::InputSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, StepFunction, StepResults, Value};
use taskruntime::{StepFactory, StepMetadata};
use tokio::time::{sleep, Duration};

/// Waits for a fixed time, then passes its payload through
pub struct DelayStep {
    source: InputSource,
    delay: Duration,
}

impl DelayStep {
    pub fn new(source: InputSource, delay: Duration) -> Self {
        Self { source, delay }
    }
}

#[async_trait]
impl StepFunction for DelayStep {
    fn step_type(&self) -> &str {
        "time.delay"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let value = self.source.resolve(input, prior)?.clone();
        tracing::debug!("Delaying for {}ms", self.delay.as_millis());
        sleep(self.delay).await;
        Ok(value)
    }
}

pub struct DelayStepFactory;

impl StepFactory for DelayStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        let delay_ms = match config.get("delay_ms") {
            None => 1000.0,
            Some(v) => v
                .as_f64()
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .ok_or_else(|| {
                    BackendError::Configuration(
                        "delay_ms must be a non-negative number".to_string(),
                    )
                })?,
        };

        Ok(Arc::new(DelayStep::new(
            InputSource::from_config(config)?,
            Duration::from_millis(delay_ms as u64),
        )))
    }

    fn step_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Delay for `delay_ms` milliseconds (default 1000)".to_string(),
            category: "time".to_string(),
        }
    }
}
