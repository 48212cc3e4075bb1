//! Search engine (§4.8): orchestrates a single query end-to-end — expand,
//! classify, parallel dual-path search, fuse, enrich, filter, adjacent
//! context, optional rerank, truncate.

use crate::bm25::Bm25Index;
use crate::compaction::ActivityTracker;
use crate::config::Config;
use crate::embed::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::filter::{adjacent_context, compute_highlights, Highlight, ResultFilter};
use crate::fusion::{reciprocal_rank_fusion, Fused, FusionInput};
use crate::metadata::MetadataStore;
use crate::model::{Chunk, ChunkId, Document, Project, VectorRecord, RESERVED_STATE_INDEX_DIMENSION, RESERVED_STATE_INDEX_MODEL};
use crate::query::{classify, decompose, expand, FusionWeights, SubQuery};
use crate::rerank::{apply_rerank, Reranker};
use crate::vector_index::VectorIndex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// An instruction prefix some embedding models require to disambiguate a
/// search query from a passage to be indexed. Applied only to the text sent
/// to the embedder, never to the BM25 side.
const QUERY_INSTRUCTION_PREFIX: &str = "Represent this query for searching relevant code: ";

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub filter: ResultFilter,
    pub bm25_only: bool,
    pub explain: bool,
    pub weights: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct ExplainBlock {
    pub query: String,
    pub bm25_count: usize,
    pub vec_count: usize,
    pub bm25_weight: f64,
    pub vec_weight: f64,
    pub rrf_constant: u32,
    pub bm25_only: bool,
    pub dimension_mismatch: bool,
    pub sub_queries: Vec<(String, f64)>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
    pub content: String,
    pub language: String,
    /// 0.0 when bm25_only, dimension mismatch, or no bm25 hit for this chunk.
    pub bm25_score: f32,
    /// 0.0 when bm25_only, dimension mismatch, or no vector hit for this chunk.
    pub vec_score: f32,
    pub bm25_rank: Option<usize>,
    pub vec_rank: Option<usize>,
    pub in_both_lists: bool,
    pub highlights: Vec<Highlight>,
    pub before: Vec<Chunk>,
    pub after: Vec<Chunk>,
    pub explain: Option<ExplainBlock>,
}

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;
const RRF_CANDIDATE_POOL: usize = 100;

pub struct Engine {
    pub metadata: Arc<MetadataStore>,
    pub bm25: Arc<Mutex<Bm25Index>>,
    pub vector: Arc<Mutex<VectorIndex>>,
    pub embedder: Arc<Embedder>,
    pub reranker: Option<Reranker>,
    pub config: Config,
    pub activity: Arc<ActivityTracker>,
    pub project: Project,
}

struct SubQueryOutcome {
    fused: Vec<Fused>,
    weight: f64,
    bm25_count: usize,
    vec_count: usize,
    bm25_weight: f64,
    semantic_weight: f64,
}

impl Engine {
    pub async fn search(&self, raw_query: &str, options: SearchOptions, cancel: &CancellationToken) -> CoreResult<Vec<SearchHit>> {
        self.activity.mark();

        // Step 1: empty/whitespace query short-circuits with no side effects.
        if raw_query.trim().is_empty() {
            return Ok(vec![]);
        }

        // Step 2: cap limit.
        let limit = options.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT).max(1);

        // Step 3: dimension guard.
        let stored_dim = self.metadata.get_state(RESERVED_STATE_INDEX_DIMENSION)?.and_then(|v| v.parse::<usize>().ok());
        let current_dim = self.embedder.dimensions();
        let mut bm25_only = options.bm25_only;
        let mut dimension_mismatch = false;
        if let Some(stored) = stored_dim {
            if stored != current_dim {
                bm25_only = true;
                dimension_mismatch = true;
            }
        }

        // Step 4: decomposition — sub-queries run their dual-path search
        // concurrently, not one after another.
        let sub_queries = decompose(raw_query);
        let outcomes: Vec<SubQueryOutcome> =
            futures::future::try_join_all(sub_queries.iter().map(|sub| self.run_sub_query(sub, bm25_only, options.weights, cancel))).await?;

        // Weight-merge fused lists across sub-queries.
        let merged = merge_sub_queries(&outcomes);

        // Step 9: enrich — fetch chunks, drop missing ids.
        let ids: Vec<ChunkId> = merged.iter().map(|f| f.id.clone()).collect();
        let chunks = self.metadata.get_chunks(&ids)?;
        let chunk_by_id: std::collections::HashMap<ChunkId, Chunk> = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        let matched_terms: Vec<String> = raw_query.split_whitespace().map(|s| s.to_string()).collect();

        let mut hits: Vec<SearchHit> = Vec::new();
        for fused in &merged {
            let Some(chunk) = chunk_by_id.get(&fused.id) else { continue };
            if !options.filter.matches(chunk) {
                continue;
            }
            let highlights = compute_highlights(&chunk.content, &matched_terms);
            hits.push(SearchHit {
                chunk_id: chunk.id.clone(),
                file_path: chunk.path.to_string_lossy().to_string(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                score: fused.rrf_score,
                content: chunk.content.clone(),
                language: chunk.language.clone(),
                bm25_score: fused.bm25_score,
                vec_score: fused.vec_score,
                bm25_rank: fused.bm25_rank,
                vec_rank: fused.vec_rank,
                in_both_lists: fused.in_both_lists,
                highlights,
                before: vec![],
                after: vec![],
                explain: None,
            });
        }

        // Step 11: adjacent context for the top N only.
        let adjacent_n = self.config.search.adjacent_count;
        if adjacent_n > 0 {
            for hit in hits.iter_mut().take(limit) {
                let Some(chunk) = chunk_by_id.get(&hit.chunk_id) else { continue };
                let siblings = self.metadata.get_chunks_by_file(chunk.file_id)?;
                let (before, after) = adjacent_context(chunk, &siblings, adjacent_n);
                hit.before = before.into_iter().cloned().collect();
                hit.after = after.into_iter().cloned().collect();
            }
        }

        // Step 12: optional rerank.
        if let Some(reranker) = &self.reranker {
            if hits.len() >= 2 && reranker.available(cancel).await {
                let documents: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
                match reranker.rerank(raw_query, &documents, cancel).await {
                    Ok(results) => hits = apply_rerank(&hits, &results),
                    Err(e) => tracing::warn!(error = %e, "reranker unavailable, keeping fused order"),
                }
            }
        }

        // Step 13: truncate, attach explain to the first result only.
        hits.truncate(limit);
        if options.explain {
            if let Some(first) = hits.first_mut() {
                first.explain = Some(ExplainBlock {
                    query: raw_query.to_string(),
                    bm25_count: outcomes.iter().map(|o| o.bm25_count).sum(),
                    vec_count: outcomes.iter().map(|o| o.vec_count).sum(),
                    bm25_weight: outcomes.first().map(|o| o.bm25_weight).unwrap_or(0.0),
                    vec_weight: outcomes.first().map(|o| o.semantic_weight).unwrap_or(0.0),
                    rrf_constant: self.config.search.rrf_constant,
                    bm25_only,
                    dimension_mismatch,
                    sub_queries: sub_queries.iter().map(|s| (s.text.clone(), s.weight)).collect(),
                });
            }
        }

        Ok(hits)
    }

    async fn run_sub_query(&self, sub: &SubQuery, bm25_only: bool, explicit_weights: Option<(f64, f64)>, cancel: &CancellationToken) -> CoreResult<SubQueryOutcome> {
        let weights: FusionWeights = classify(&sub.text, explicit_weights);
        let expanded = expand(&sub.text);
        let embed_text = format!("{QUERY_INSTRUCTION_PREFIX}{}", sub.text);

        let bm25 = self.bm25.clone();
        let expanded_clone = expanded.clone();
        let bm25_task = tokio::task::spawn_blocking(move || bm25.lock().expect("bm25 lock poisoned").search(&expanded_clone, RRF_CANDIDATE_POOL));

        let vector_future = async {
            if bm25_only {
                return Ok(Vec::new());
            }
            let embedding = self.embedder.embed(&embed_text, cancel).await?;
            let vector = self.vector.clone();
            let k = RRF_CANDIDATE_POOL;
            tokio::task::spawn_blocking(move || vector.lock().expect("vector lock poisoned").search(&embedding, k))
                .await
                .map_err(|e| CoreError::Fatal(format!("vector search task panicked: {e}")))?
        };

        let timeout = Duration::from_millis(self.config.search.timeout_ms);
        let (bm25_result, vec_result) = tokio::join!(
            tokio::time::timeout(timeout, async { bm25_task.await.map_err(|e| CoreError::Fatal(format!("bm25 task panicked: {e}")))? }),
            tokio::time::timeout(timeout, vector_future),
        );

        let bm25_hits = match bm25_result {
            Ok(Ok(hits)) => Some(hits),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "bm25 search failed, degrading to vector-only");
                None
            }
            Err(_) => {
                tracing::warn!("bm25 search timed out, degrading to vector-only");
                None
            }
        };
        let vec_hits = match vec_result {
            Ok(Ok(hits)) => Some(hits),
            Ok(Err(e)) => {
                if !bm25_only {
                    tracing::warn!(error = %e, "vector search failed, degrading to bm25-only");
                }
                None
            }
            Err(_) => {
                tracing::warn!("vector search timed out, degrading to bm25-only");
                None
            }
        };

        if bm25_hits.is_none() && vec_hits.is_none() {
            return Err(CoreError::BackendUnavailable("both bm25 and vector search failed".to_string()));
        }

        let bm25_ids_owned: Vec<(ChunkId, f32)> = bm25_hits.as_ref().map(|hits| hits.iter().map(|h| (h.doc_id.clone(), h.score)).collect()).unwrap_or_default();
        let vec_ids_owned: Vec<(ChunkId, f32)> = vec_hits.as_ref().map(|hits| hits.iter().map(|h| (h.id.clone(), h.score)).collect()).unwrap_or_default();
        let bm25_inputs: Vec<FusionInput> = bm25_ids_owned.iter().map(|(id, score)| FusionInput { id, score: *score }).collect();
        let vec_inputs: Vec<FusionInput> = vec_ids_owned.iter().map(|(id, score)| FusionInput { id, score: *score }).collect();

        let fused = reciprocal_rank_fusion(&bm25_inputs, &vec_inputs, weights.bm25, weights.semantic, self.config.search.rrf_constant);

        Ok(SubQueryOutcome {
            bm25_count: bm25_ids_owned.len(),
            vec_count: vec_ids_owned.len(),
            fused,
            weight: sub.weight,
            bm25_weight: weights.bm25,
            semantic_weight: weights.semantic,
        })
    }

    pub fn index(&self, chunks: &[Chunk], vectors: &[VectorRecord]) -> CoreResult<()> {
        self.activity.mark();
        self.metadata.save_chunks(chunks, Some(vectors))?;
        let documents: Vec<Document> = chunks.iter().map(|c| Document { doc_id: c.id.clone(), content: c.content.clone(), path: c.path.to_string_lossy().to_string(), language: c.language.clone() }).collect();
        self.bm25.lock().expect("bm25 lock poisoned").index_documents(documents.into_iter())?;
        self.vector.lock().expect("vector lock poisoned").add(vectors)?;
        if self.metadata.get_state(RESERVED_STATE_INDEX_DIMENSION)?.is_none() {
            self.metadata.set_state(RESERVED_STATE_INDEX_DIMENSION, &self.embedder.dimensions().to_string())?;
            self.metadata.set_state(RESERVED_STATE_INDEX_MODEL, self.embedder.model_name())?;
        }
        Ok(())
    }

    /// Delete: metadata failure is fatal; BM25/vector failures are
    /// logged best-effort and the overall operation still succeeds.
    pub fn delete(&self, ids: &[ChunkId]) -> CoreResult<()> {
        self.activity.mark();
        self.metadata.delete_chunks(ids)?;
        if let Err(e) = self.bm25.lock().expect("bm25 lock poisoned").delete(ids) {
            tracing::warn!(error = %e, "bm25 delete failed, operation still reports success");
        }
        if let Err(e) = self.vector.lock().expect("vector lock poisoned").delete(ids) {
            tracing::warn!(error = %e, "vector delete failed, operation still reports success");
        }
        Ok(())
    }

    pub fn stats(&self) -> CoreResult<(u64, usize)> {
        let bm25_stats = self.bm25.lock().expect("bm25 lock poisoned").stats()?;
        let vector_count = self.vector.lock().expect("vector lock poisoned").count();
        Ok((bm25_stats.document_count, vector_count))
    }

    pub fn close(&self) -> CoreResult<()> {
        self.vector.lock().expect("vector lock poisoned").save()
    }
}

fn merge_sub_queries(outcomes: &[SubQueryOutcome]) -> Vec<Fused> {
    use std::collections::HashMap;
    if outcomes.len() == 1 {
        return outcomes[0].fused.clone();
    }

    let mut merged: HashMap<ChunkId, Fused> = HashMap::new();
    for outcome in outcomes {
        for fused in &outcome.fused {
            let entry = merged.entry(fused.id.clone()).or_insert_with(|| Fused {
                id: fused.id.clone(),
                rrf_score: 0.0,
                bm25_score: 0.0,
                vec_score: 0.0,
                bm25_rank: None,
                vec_rank: None,
                in_both_lists: false,
            });
            entry.rrf_score += (outcome.weight as f32) * fused.rrf_score;
            // Keep the score from the first sub-query that actually ranked this
            // chunk on that side; a later sub-query missing it must not zero it out.
            if entry.bm25_rank.is_none() && fused.bm25_rank.is_some() {
                entry.bm25_score = fused.bm25_score;
            }
            if entry.vec_rank.is_none() && fused.vec_rank.is_some() {
                entry.vec_score = fused.vec_score;
            }
            entry.bm25_rank = entry.bm25_rank.or(fused.bm25_rank);
            entry.vec_rank = entry.vec_rank.or(fused.vec_rank);
            entry.in_both_lists = entry.in_both_lists || fused.in_both_lists;
        }
    }

    let mut out: Vec<Fused> = merged.into_values().collect();
    out.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.0.cmp(&b.id.0)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{ChunkId, ContentKind, FileId, Symbol, SymbolKind};
    use std::path::PathBuf;

    fn build_engine(dir: &std::path::Path) -> Engine {
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let project = metadata.upsert_project_at("demo", dir, 1).unwrap();
        let bm25 = Arc::new(Mutex::new(Bm25Index::open(&dir.join("bm25"), &[]).unwrap()));
        let mut cfg = Config::default();
        cfg.embeddings.dimensions = 8;
        let vector = Arc::new(Mutex::new(VectorIndex::open(&dir.join("vec"), 8, 16).unwrap()));
        let embedder = Arc::new(Embedder::from_config(&cfg.embeddings).unwrap());
        Engine {
            metadata,
            bm25,
            vector,
            embedder,
            reranker: None,
            config: cfg,
            activity: ActivityTracker::new(),
            project,
        }
    }

    fn sample_chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: ChunkId(id.to_string()),
            file_id: FileId(1),
            path: PathBuf::from("login.rs"),
            content: content.to_string(),
            context_prefix: None,
            kind: ContentKind::Code,
            language: "rust".to_string(),
            start_line: 10,
            end_line: 20,
            symbols: vec![Symbol { name: "HandleLogin".to_string(), kind: SymbolKind::Function }],
        }
    }

    #[tokio::test]
    async fn empty_query_returns_empty_with_no_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(dir.path());
        let cancel = CancellationToken::new();
        let hits = engine.search("", SearchOptions::default(), &cancel).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn exact_identifier_query_finds_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(dir.path());
        let cancel = CancellationToken::new();

        let chunk = sample_chunk("c1", "func (s *Service) HandleLogin(w, r) { ... }");
        let embedding = engine.embedder.embed(&chunk.embedding_text(), &cancel).await.unwrap();
        engine.index(&[chunk], &[VectorRecord { id: ChunkId("c1".to_string()), vector: embedding }]).unwrap();

        let hits = engine.search("HandleLogin", SearchOptions::default(), &cancel).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id.0, "c1");
        assert_eq!(hits[0].start_line, 10);
        assert_eq!(hits[0].end_line, 20);
    }

    #[tokio::test]
    async fn reindexing_identical_chunks_is_a_stats_noop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(dir.path());
        let cancel = CancellationToken::new();

        let chunk = sample_chunk("c1", "fn login() {}");
        let embedding = engine.embedder.embed(&chunk.embedding_text(), &cancel).await.unwrap();
        let record = VectorRecord { id: ChunkId("c1".to_string()), vector: embedding };

        engine.index(&[chunk.clone()], &[record.clone()]).unwrap();
        let (docs_after_first, vecs_after_first) = engine.stats().unwrap();

        engine.index(&[chunk], &[record]).unwrap();
        let (docs_after_second, vecs_after_second) = engine.stats().unwrap();

        assert_eq!(docs_after_first, docs_after_second);
        assert_eq!(vecs_after_first, vecs_after_second);
    }

    #[tokio::test]
    async fn delete_is_best_effort_and_removes_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(dir.path());
        let cancel = CancellationToken::new();

        let chunk = sample_chunk("c1", "func (s *Service) HandleLogin(w, r) { ... }");
        let embedding = engine.embedder.embed(&chunk.embedding_text(), &cancel).await.unwrap();
        engine.index(&[chunk], &[VectorRecord { id: ChunkId("c1".to_string()), vector: embedding }]).unwrap();

        engine.delete(&[ChunkId("c1".to_string())]).unwrap();
        let hits = engine.search("HandleLogin", SearchOptions::default(), &cancel).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_forces_bm25_only_and_zero_vec_scores() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(dir.path());
        let cancel = CancellationToken::new();

        let chunk = sample_chunk("c1", "fn anything() {}");
        engine.index(&[chunk], &[VectorRecord { id: ChunkId("c1".to_string()), vector: vec![0.0; 8] }]).unwrap();
        engine.metadata.set_state(RESERVED_STATE_INDEX_DIMENSION, "99999").unwrap();

        let hits = engine
            .search("anything", SearchOptions { explain: true, ..Default::default() }, &cancel)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].vec_score, 0.0);
        let explain = hits[0].explain.as_ref().unwrap();
        assert!(explain.bm25_only);
        assert!(explain.dimension_mismatch);
    }
}
