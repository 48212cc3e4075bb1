//! Typed error kinds for the retrieval core.
//!
//! Propagation policy (see each variant's doc comment): `InvalidInput`,
//! `NotIndexed`, `Fatal`, and `Canceled` always propagate to the caller.
//! `DimensionMismatch`, `BackendUnavailable`, and `Transient` are recovered
//! locally by the search engine. `Corruption` triggers a rebuild on the next
//! start or the next write and is not surfaced as a hard failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Empty query, out-of-range limit, unknown scope. No side effects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The project root has no index artifacts under `.amanmcp/`.
    #[error("not indexed: {root} — run `index` first")]
    NotIndexed { root: String },

    /// Stored `index_dimension` differs from the current embedder's dimension.
    /// Not fatal: the engine downgrades to BM25-only and reports the mismatch.
    #[error("embedder dimension mismatch: stored={stored}, current={current}")]
    DimensionMismatch { stored: usize, current: usize },

    /// Embedder or reranker HTTP failure after retries are exhausted.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Timeout or 5xx during a single embedding/rerank request; caller may retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// BM25 or vector snapshot unreadable; recovered via rebuild.
    #[error("corruption in {store}: {detail}")]
    Corruption { store: &'static str, detail: String },

    /// Metadata store write failure, disk-full, unrecoverable snapshot corruption.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Caller canceled the operation before it completed.
    #[error("canceled")]
    Canceled,
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidInput(msg.into())
    }

    /// True for the kinds the search engine recovers from locally (§7: kinds 3, 4, 5).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::DimensionMismatch { .. } | CoreError::BackendUnavailable(_) | CoreError::Transient(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
