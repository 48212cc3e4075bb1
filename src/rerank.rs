//! Optional cross-encoder reranker (§4.10): scores (query, document) pairs
//! over HTTP. Same call shape as `embed::remote` — a dedicated small JSON API
//! rather than the embedding endpoint's batch contract.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    pub index: i64,
    pub score: f32,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponseEntry {
    index: i64,
    score: f32,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResponseEntry>,
}

pub struct Reranker {
    client: reqwest::Client,
    endpoint: String,
    timeout: std::time::Duration,
}

impl Reranker {
    pub fn new(endpoint: String, timeout_ms: u64) -> Self {
        Reranker { client: reqwest::Client::new(), endpoint, timeout: std::time::Duration::from_millis(timeout_ms) }
    }

    pub async fn available(&self, cancel: &CancellationToken) -> bool {
        let probe = self.client.get(format!("{}/health", self.endpoint.trim_end_matches('/'))).send();
        tokio::select! {
            _ = cancel.cancelled() => false,
            res = tokio::time::timeout(std::time::Duration::from_millis(500), probe) => {
                matches!(res, Ok(Ok(resp)) if resp.status().is_success())
            }
        }
    }

    /// Score `(query, documents[i])` pairs. Returned entries need not cover
    /// every index and need not be sorted by the caller's convention — the
    /// engine sorts by score itself and discards out-of-range indices.
    pub async fn rerank(&self, query: &str, documents: &[String], cancel: &CancellationToken) -> CoreResult<Vec<RerankResult>> {
        let request = self
            .client
            .post(format!("{}/rerank", self.endpoint.trim_end_matches('/')))
            .json(&RerankRequest { query, documents })
            .send();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Canceled),
            res = tokio::time::timeout(self.timeout, request) => res,
        };

        match outcome {
            Ok(Ok(resp)) if resp.status().is_success() => {
                let body: RerankResponse = resp.json().await.map_err(|e| CoreError::BackendUnavailable(format!("malformed rerank response: {e}")))?;
                Ok(body.results.into_iter().map(|e| RerankResult { index: e.index, score: e.score }).collect())
            }
            Ok(Ok(resp)) => Err(CoreError::BackendUnavailable(format!("reranker returned {}", resp.status()))),
            Ok(Err(e)) => Err(CoreError::BackendUnavailable(format!("reranker request failed: {e}"))),
            Err(_elapsed) => Err(CoreError::Transient("reranker request timed out".to_string())),
        }
    }
}

/// Reorder `items` (by the flat positional index the reranker was given) in
/// place using the reranker's scores, highest first. Invalid indices
/// (out-of-range or negative) are silently discarded, per spec.
pub fn apply_rerank<T: Clone>(items: &[T], results: &[RerankResult]) -> Vec<T> {
    let mut scored: Vec<(f32, &T)> = results
        .iter()
        .filter_map(|r| {
            if r.index < 0 {
                return None;
            }
            items.get(r.index as usize).map(|item| (r.score, item))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, item)| item.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_indices_are_dropped() {
        let items = vec!["a".to_string(), "b".to_string()];
        let results = vec![
            RerankResult { index: 1, score: 0.9 },
            RerankResult { index: 5, score: 0.8 },
            RerankResult { index: -1, score: 0.7 },
        ];
        let reordered = apply_rerank(&items, &results);
        assert_eq!(reordered, vec!["b".to_string()]);
    }

    #[test]
    fn sorts_by_descending_score() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = vec![
            RerankResult { index: 0, score: 0.1 },
            RerankResult { index: 1, score: 0.9 },
            RerankResult { index: 2, score: 0.5 },
        ];
        let reordered = apply_rerank(&items, &results);
        assert_eq!(reordered, vec!["b".to_string(), "c".to_string(), "a".to_string()]);
    }
}
