//! The embedder capability: text → unit-length fixed-dimension vector.
//!
//! Represented as a tagged enum rather than a trait object behind global
//! configuration, per the redesign direction: the concrete choice is always
//! observable at the call site and there is no process-wide hidden state
//! beyond the on-disk config file.

mod deterministic;
mod remote;

use crate::config::{EmbeddingProvider, EmbeddingsConfig};
use crate::error::{CoreError, CoreResult};
use tokio_util::sync::CancellationToken;

pub use deterministic::DeterministicEmbedder;
pub use remote::{HostConfig, RemoteEmbedder};

/// `base_timeout * min(progression, 3.0) * (is_final ? final_boost : 1)`,
/// `progression = 1 + batch_index/1000 * (config_progression - 1)`.
pub fn batch_timeout(base: std::time::Duration, batch_index: usize, config_progression: f64, is_final: bool, final_boost: f64) -> std::time::Duration {
    let progression = 1.0 + (batch_index as f64 / 1000.0) * (config_progression - 1.0);
    let factor = progression.min(3.0) * if is_final { final_boost.clamp(1.0, 2.0) } else { 1.0 };
    std::time::Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// L2-normalize in place. Returns the zero vector unchanged (its norm is 0).
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn is_unit_length(v: &[f32]) -> bool {
    if v.iter().all(|x| *x == 0.0) {
        return true;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    (norm - 1.0).abs() < 1e-3
}

/// Tagged variant: concrete embedder backend chosen at construction time.
pub enum Embedder {
    /// Primary remote HTTP embedding service.
    Remote(RemoteEmbedder),
    /// Secondary remote HTTP embedding service, typically a different
    /// dimension or model from `Remote` (e.g. a cheaper/faster fallback).
    Alternate(RemoteEmbedder),
    /// Local, offline, hash/model2vec-based embedder. Always available.
    Deterministic(DeterministicEmbedder),
}

impl Embedder {
    pub fn from_config(cfg: &EmbeddingsConfig) -> CoreResult<Self> {
        match cfg.provider {
            EmbeddingProvider::Remote => {
                let endpoint = cfg.endpoint.clone().ok_or_else(|| CoreError::invalid("embeddings.endpoint required for provider=remote"))?;
                Ok(Embedder::Remote(RemoteEmbedder::new(HostConfig { endpoint, model: cfg.model.clone(), dimensions: cfg.dimensions }, cfg)))
            }
            EmbeddingProvider::Alternate => {
                let endpoint = cfg.endpoint.clone().ok_or_else(|| CoreError::invalid("embeddings.endpoint required for provider=alternate"))?;
                Ok(Embedder::Alternate(RemoteEmbedder::new(HostConfig { endpoint, model: cfg.model.clone(), dimensions: cfg.dimensions }, cfg)))
            }
            EmbeddingProvider::Deterministic => Ok(Embedder::Deterministic(DeterministicEmbedder::new(cfg.model.clone(), cfg.dimensions))),
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Embedder::Remote(r) | Embedder::Alternate(r) => r.dimensions(),
            Embedder::Deterministic(d) => d.dimensions(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Embedder::Remote(_) => "remote",
            Embedder::Alternate(_) => "alternate",
            Embedder::Deterministic(_) => "deterministic",
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Embedder::Remote(r) | Embedder::Alternate(r) => r.model_name(),
            Embedder::Deterministic(d) => d.model_name(),
        }
    }

    pub async fn available(&self, cancel: &CancellationToken) -> bool {
        match self {
            Embedder::Remote(r) | Embedder::Alternate(r) => r.available(cancel).await,
            Embedder::Deterministic(d) => d.available(cancel).await,
        }
    }

    pub async fn embed(&self, text: &str, cancel: &CancellationToken) -> CoreResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions()]);
        }
        let mut out = match self {
            Embedder::Remote(r) | Embedder::Alternate(r) => r.embed_batch(std::slice::from_ref(&text), cancel).await?.pop().unwrap_or_default(),
            Embedder::Deterministic(d) => d.embed(text),
        };
        normalize(&mut out);
        Ok(out)
    }

    /// Batched embedding — always preferred by the pipeline over repeated
    /// single `embed` calls so a remote backend sees one round trip.
    pub async fn embed_batch(&self, texts: &[String], cancel: &CancellationToken) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut out = match self {
            Embedder::Remote(r) | Embedder::Alternate(r) => r.embed_batch(texts, cancel).await?,
            Embedder::Deterministic(d) => texts.iter().map(|t| d.embed(t)).collect(),
        };
        for v in out.iter_mut() {
            normalize(v);
        }
        Ok(out)
    }
}
