use crate::{expect_str, InputSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, StepFunction, StepResults, Value};
use taskruntime::{StepFactory, StepMetadata};

/// Parse a JSON string into a structured payload
pub struct JsonParseStep {
    source: InputSource,
}

#[async_trait]
impl StepFunction for JsonParseStep {
    fn step_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let text = expect_str(self.source.resolve(input, prior)?, "json")?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| BackendError::failed(format!("JSON parse error: {}", e)))?;

        Ok(Value::from_plain_json(parsed))
    }
}

pub struct JsonParseStepFactory;

impl StepFactory for JsonParseStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        Ok(Arc::new(JsonParseStep {
            source: InputSource::from_config(config)?,
        }))
    }

    fn step_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Parse a JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Render a payload as a JSON string
pub struct JsonStringifyStep {
    source: InputSource,
    pretty: bool,
}

#[async_trait]
impl StepFunction for JsonStringifyStep {
    fn step_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let json = self.source.resolve(input, prior)?.to_plain_json();

        let rendered = if self.pretty {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        }
        .map_err(|e| BackendError::failed(format!("JSON stringify error: {}", e)))?;

        Ok(Value::String(rendered))
    }
}

pub struct JsonStringifyStepFactory;

impl StepFactory for JsonStringifyStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        let pretty = config.get("pretty").and_then(|v| v.as_bool()).unwrap_or(true);
        Ok(Arc::new(JsonStringifyStep {
            source: InputSource::from_config(config)?,
            pretty,
        }))
    }

    fn step_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Convert a payload to a JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
