use crate::{expect_str, InputSource};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskcore::{BackendError, StepFunction, StepResults, Value};
use taskruntime::{StepFactory, StepMetadata};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches a URL and returns `{status, body, headers}`.
///
/// The URL comes from the `url` config key when set, otherwise from the
/// step's payload. Non-2xx responses fail the step.
pub struct HttpFetchStep {
    client: reqwest::Client,
    method: Method,
    url: Option<String>,
    headers: Vec<(String, String)>,
    parse_json: bool,
    timeout_secs: u64,
    source: InputSource,
}

#[async_trait]
impl StepFunction for HttpFetchStep {
    fn step_type(&self) -> &str {
        "http.fetch"
    }

    async fn invoke(&self, input: &Value, prior: &StepResults) -> Result<Value, BackendError> {
        let payload = self.source.resolve(input, prior)?;
        let url = match &self.url {
            Some(url) => url.as_str(),
            None => expect_str(payload, "url")?,
        };

        tracing::info!("{} {}", self.method, url);

        let mut request = self.client.request(self.method.clone(), url);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if self.url.is_some() && matches!(self.method, Method::POST | Method::PUT) {
            request = request.json(&payload.to_plain_json());
        }

        let response = request.send().await.map_err(|e| self.request_error(e))?;

        let status = response.status();
        let headers: HashMap<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), Value::from(v))))
            .collect();
        let body = response.text().await.map_err(|e| self.request_error(e))?;

        tracing::debug!("Response status: {}", status);
        if !status.is_success() {
            return Err(BackendError::failed(format!("HTTP {} from {}", status, url)));
        }

        let body = if self.parse_json {
            serde_json::from_str(&body)
                .map(Value::from_plain_json)
                .map_err(|e| BackendError::failed(format!("response is not JSON: {}", e)))?
        } else {
            Value::String(body)
        };

        let mut output = HashMap::new();
        output.insert("status".to_string(), Value::from(status.as_u16() as i64));
        output.insert("body".to_string(), body);
        output.insert("headers".to_string(), Value::Object(headers));
        Ok(Value::Object(output))
    }
}

impl HttpFetchStep {
    fn request_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            BackendError::failed(format!("HTTP request failed: {}", e))
        }
    }
}

pub struct HttpFetchStepFactory;

impl StepFactory for HttpFetchStepFactory {
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn StepFunction>, BackendError> {
        let method = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let method = match method.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            other => {
                return Err(BackendError::Configuration(format!(
                    "Unsupported method: {}",
                    other
                )))
            }
        };

        let headers = match config.get("headers") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            _ => Vec::new(),
        };

        let timeout_secs = config
            .get("timeout_secs")
            .and_then(|v| v.as_f64())
            .map(|s| s as u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Arc::new(HttpFetchStep {
            client,
            method,
            url: config.get("url").and_then(|v| v.as_str()).map(String::from),
            headers,
            parse_json: config.get("parse_json").and_then(|v| v.as_bool()).unwrap_or(false),
            timeout_secs,
            source: InputSource::from_config(config)?,
        }))
    }

    fn step_type(&self) -> &str {
        "http.fetch"
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Fetch a URL over HTTP".to_string(),
            category: "http".to_string(),
        }
    }
}
