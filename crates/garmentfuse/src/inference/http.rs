use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{InferenceClient, InferenceError};
use crate::config::InferenceConfig;

/// Bearer-token JSON client: `POST {base}/models/{id}/predict`.
pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Http {
                model: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    /// Builds a client from config, resolving the API key. A missing key is
    /// not an error here; calls will fail with `NotConfigured`.
    pub fn from_config(config: &InferenceConfig) -> crate::error::Result<Self> {
        let api_key = config.api_key.resolve_optional()?;
        let client = Self::new(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(client)
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
            && self
                .api_key
                .as_ref()
                .is_some_and(|k| !k.expose_secret().is_empty())
    }

    fn endpoint(&self, model_id: &str) -> String {
        format!("{}/models/{}/predict", self.base_url, model_id)
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn invoke(&self, model_id: &str, payload: Value) -> Result<Value, InferenceError> {
        let api_key = match self.api_key {
            Some(ref key) if self.is_configured() => key,
            _ => return Err(InferenceError::NotConfigured),
        };

        let url = self.endpoint(model_id);
        tracing::debug!(model = model_id, "Invoking inference model");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&json!({ "inputs": payload }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        model: model_id.to_string(),
                        secs: self.timeout.as_secs(),
                    }
                } else {
                    InferenceError::Http {
                        model: model_id.to_string(),
                        reason: e.without_url().to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // Upstream bodies never reach job records.
            return Err(InferenceError::Status {
                model: model_id.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| InferenceError::InvalidOutput {
            model: model_id.to_string(),
            reason: format!("response is not JSON: {}", e.without_url()),
        })?;

        extract_output(model_id, body)
    }
}

/// Maps a response body to the model output: an `error` field is a
/// failure; otherwise `output`, else `result`, else the whole body.
pub(crate) fn extract_output(model_id: &str, mut body: Value) -> Result<Value, InferenceError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(InferenceError::Upstream {
            model: model_id.to_string(),
            message: crate::sanitize::truncate_message(&message, 200),
        });
    }

    if let Some(obj) = body.as_object_mut() {
        for key in ["output", "result"] {
            if let Some(value) = obj.remove(key).filter(|v| !v.is_null()) {
                return Ok(value);
            }
        }
    }

    Ok(body)
}
