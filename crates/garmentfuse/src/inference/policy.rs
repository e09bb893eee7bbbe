use std::time::Duration;

use serde_json::Value;

use super::{InferenceClient, InferenceError};
use crate::config::InferenceConfig;

/// Per-call bound and retry schedule applied around every model call.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            attempts: 3,
            backoff: Duration::from_millis(400),
        }
    }
}

impl CallPolicy {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            attempts: config.attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Invokes `model_id`, retrying transient failures with linear backoff.
    pub async fn invoke(
        &self,
        client: &dyn InferenceClient,
        model_id: &str,
        payload: Value,
    ) -> Result<Value, InferenceError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(
                self.timeout,
                client.invoke(model_id, payload.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout {
                    model: model_id.to_string(),
                    secs: self.timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    tracing::debug!(
                        model = model_id,
                        attempt,
                        error = %e,
                        "Retrying inference call"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
