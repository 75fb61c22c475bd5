use crate::{expect_str, InputSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use taskcore::{BackendError, StepFunction, StepResults, Value};
use taskruntime::{StepFactory, StepMetadata};

const PREFIXES: [&str; 3] = ["youtube.com/watch?v=", "youtu.be/", "youtube.com/embed/"];

/// Pull the video id out of a YouTube link.
///
/// Accepts `youtube.com/watch?v=`, `youtu.be/` and `youtube.com/embed/`
/// links, plus watch links where `v` is not the first query parameter.
pub fn extract_video_id(url: &str) -> Option<&str> {
    let url = url.trim();
    let rest = PREFIXES
        .iter()
        .find_map(|prefix| url.find(prefix).map(|at| &url[at + prefix.len()..]))
        .or_else(|| {
            let query = &url[url.find("youtube.com/watch?")? + "youtube.com/watch?".len()..];
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("v="))
        })?;

    let id = rest
        .split(|c: char| matches!(c, '&' | '?' | '#' | '\n'))
        .next()
        .unwrap_or_default();
    (!id.is_empty()).then_some(id)
}

/// Resolves a video link to its id; any other payload fails the step
pub struct VideoIdStep {
    source: InputSource,
}

#[async_trait]
impl StepFunction for VideoIdStep {
    fn step_type(&self) -> &str {
        "source.video_id"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let url = expect_str(self.source.resolve(input, prior)?, "url")?;
        let id = extract_video_id(url).ok_or_else(|| BackendError::InvalidInputType {
            field: "url".to_string(),
            expected: "YouTube video link".to_string(),
            actual: url.to_string(),
        })?;
        tracing::debug!("Resolved video id {}", id);
        Ok(Value::from(id))
    }
}

pub struct VideoIdStepFactory;

impl StepFactory for VideoIdStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        Ok(Arc::new(VideoIdStep {
            source: InputSource::from_config(config)?,
        }))
    }

    fn step_type(&self) -> &str {
        "source.video_id"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Extract the video id from a YouTube link".to_string(),
            category: "source".to_string(),
        }
    }
}
