//! Local, offline embedder. Tries a static model2vec model first; if that
//! model cannot be loaded (no network on first run, unknown repo id), falls
//! back to a pure hash-based embedding so this variant is always available
//! — it never makes a network call after construction and never fails.

use model2vec_rs::model::StaticModel;
use tokio_util::sync::CancellationToken;

enum Backend {
    Model(StaticModel),
    Hash,
}

pub struct DeterministicEmbedder {
    backend: Backend,
    model_name: String,
    dimensions: usize,
}

impl DeterministicEmbedder {
    pub fn new(model_name: String, dimensions: usize) -> Self {
        match StaticModel::from_pretrained(&model_name, None, None, None) {
            Ok(model) => {
                let dim = model.encode_single("").len().max(dimensions);
                DeterministicEmbedder { backend: Backend::Model(model), model_name, dimensions: dim }
            }
            Err(e) => {
                tracing::warn!(model = %model_name, error = %e, "static embedding model unavailable, using hash fallback");
                DeterministicEmbedder { backend: Backend::Hash, model_name, dimensions: dimensions.max(1) }
            }
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub async fn available(&self, _cancel: &CancellationToken) -> bool {
        true
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        if text.trim().is_empty() {
            return vec![0.0; self.dimensions];
        }
        match &self.backend {
            Backend::Model(model) => {
                let mut v = model.encode_single(text);
                v.resize(self.dimensions, 0.0);
                v
            }
            Backend::Hash => hash_embed(text, self.dimensions),
        }
    }
}

/// Stable bag-of-tokens hash embedding: every whitespace/punctuation-split
/// token contributes to a pseudo-random set of dimensions via xxh3, so the
/// same text always yields the same vector with no model weights involved.
fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let h = xxhash_rust::xxh3::xxh3_64(token.to_lowercase().as_bytes());
        let idx = (h as usize) % dims;
        let sign = if (h >> 63) & 1 == 1 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embed_is_deterministic() {
        let a = hash_embed("fn handle_login(req)", 64);
        let b = hash_embed("fn handle_login(req)", 64);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_embed_differs_for_different_text() {
        let a = hash_embed("alpha", 64);
        let b = hash_embed("beta", 64);
        assert_ne!(a, b);
    }
}
