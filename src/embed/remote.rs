//! HTTP-backed embedder, shared by the `Remote` and `Alternate` variants.
//!
//! Async via `reqwest`: the teacher's blocking `ureq` client cannot be used
//! on the tokio-driven indexing pipeline without a dedicated blocking pool,
//! and cancellation (spec: abort within 500ms) needs a future we can race
//! against the cancellation token, not a synchronous call.

use super::batch_timeout;
use crate::config::EmbeddingsConfig;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct RemoteEmbedder {
    client: reqwest::Client,
    host: HostConfig,
    base_timeout: std::time::Duration,
    timeout_progression: f64,
    retry_timeout_multiplier: f64,
    max_retries: u32,
    batch_counter: std::sync::atomic::AtomicUsize,
}

impl RemoteEmbedder {
    pub fn new(host: HostConfig, cfg: &EmbeddingsConfig) -> Self {
        RemoteEmbedder {
            client: reqwest::Client::new(),
            host,
            base_timeout: std::time::Duration::from_millis(cfg.base_timeout_ms),
            timeout_progression: cfg.timeout_progression,
            retry_timeout_multiplier: cfg.retry_timeout_multiplier,
            max_retries: cfg.max_retries,
            batch_counter: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.host.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.host.model
    }

    pub async fn available(&self, cancel: &CancellationToken) -> bool {
        let probe = self.client.get(format!("{}/health", self.host.endpoint.trim_end_matches('/'))).send();
        tokio::select! {
            _ = cancel.cancelled() => false,
            res = tokio::time::timeout(std::time::Duration::from_millis(500), probe) => {
                matches!(res, Ok(Ok(resp)) if resp.status().is_success())
            }
        }
    }

    pub async fn embed_batch(&self, texts: &[String], cancel: &CancellationToken) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let batch_index = self.batch_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let is_final = false;

        let mut attempt = 0;
        loop {
            let timeout = batch_timeout(self.base_timeout, batch_index, self.timeout_progression, is_final, 1.5)
                .mul_f64(self.retry_timeout_multiplier.powi(attempt as i32));

            let request = self
                .client
                .post(format!("{}/embed", self.host.endpoint.trim_end_matches('/')))
                .json(&EmbedRequest { model: &self.host.model, input: texts })
                .send();

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(CoreError::Canceled),
                res = tokio::time::timeout(timeout, request) => res,
            };

            match outcome {
                Ok(Ok(resp)) if resp.status().is_success() => {
                    let body: EmbedResponse = resp
                        .json()
                        .await
                        .map_err(|e| CoreError::BackendUnavailable(format!("malformed embedding response: {e}")))?;
                    return Ok(body.embeddings);
                }
                Ok(Ok(resp)) if resp.status().is_server_error() => {
                    if attempt >= self.max_retries {
                        return Err(CoreError::BackendUnavailable(format!("embedding service returned {}", resp.status())));
                    }
                }
                Ok(Ok(resp)) => {
                    return Err(CoreError::BackendUnavailable(format!("embedding service returned {}", resp.status())));
                }
                Ok(Err(e)) => {
                    if attempt >= self.max_retries {
                        return Err(CoreError::BackendUnavailable(format!("embedding request failed: {e}")));
                    }
                }
                Err(_elapsed) => {
                    if attempt >= self.max_retries {
                        return Err(CoreError::Transient("embedding request timed out".to_string()));
                    }
                }
            }
            attempt += 1;
        }
    }
}
