use crate::{expect_str, InputSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, StepFunction, StepResults, Value};
use taskruntime::{StepFactory, StepMetadata};

/// Word, character and line counts of a text payload.
///
/// With `field` set, the text is read from that key of an object payload,
/// e.g. the `body` of an `http.fetch` result.
pub struct TextStatsStep {
    source: InputSource,
    field: Option<String>,
}

#[async_trait]
impl StepFunction for TextStatsStep {
    fn step_type(&self) -> &str {
        "text.stats"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let payload = self.source.resolve(input, prior)?;
        let text = match &self.field {
            Some(field) => {
                let value = payload
                    .get(field)
                    .ok_or_else(|| BackendError::MissingInput(field.clone()))?;
                expect_str(value, field)?
            }
            None => expect_str(payload, "text")?,
        };

        let mut stats = HashMap::new();
        stats.insert("words".to_string(), Value::from(text.split_whitespace().count()));
        stats.insert("characters".to_string(), Value::from(text.chars().count()));
        stats.insert("lines".to_string(), Value::from(text.lines().count()));
        Ok(Value::Object(stats))
    }
}

pub struct TextStatsStepFactory;

impl StepFactory for TextStatsStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        Ok(Arc::new(TextStatsStep {
            source: InputSource::from_config(config)?,
            field: config.get("field").and_then(|v| v.as_str()).map(String::from),
        }))
    }

    fn step_type(&self) -> &str {
        "text.stats"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Count words, characters and lines of a text".to_string(),
            category: "text".to_string(),
        }
    }
}
