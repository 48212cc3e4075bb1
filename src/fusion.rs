//! Reciprocal Rank Fusion: combine a BM25-ranked list and a vector-ranked
//! list into one ranked list.
//!
//! `score(d) = Σ_s w_s / (k + r_s(d))` over sides `s ∈ {bm25, vec}`, rank
//! starting at 1; a side missing a document contributes 0. Ties break by
//! (a) presence in both lists, (b) higher vector-side rank, (c) lexicographic
//! id, so results are stable across runs with no ordering surprises.

use crate::model::ChunkId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Fused {
    pub id: ChunkId,
    pub rrf_score: f32,
    /// 0.0 when the chunk did not appear on that side's list (absent, not unscored).
    pub bm25_score: f32,
    /// 0.0 when the chunk did not appear on that side's list (absent, not unscored).
    pub vec_score: f32,
    pub bm25_rank: Option<usize>,
    pub vec_rank: Option<usize>,
    pub in_both_lists: bool,
}

pub struct FusionInput<'a> {
    pub id: &'a ChunkId,
    pub score: f32,
}

/// Fuse two ranked lists (already sorted best-first) using RRF with constant
/// `k`. `bm25_weight`/`vec_weight` need not sum to 1 — the caller (classifier
/// or explicit override) owns normalization.
pub fn reciprocal_rank_fusion(bm25: &[FusionInput], vec: &[FusionInput], bm25_weight: f64, vec_weight: f64, k: u32) -> Vec<Fused> {
    let mut entries: HashMap<ChunkId, Fused> = HashMap::new();

    for (rank0, hit) in bm25.iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = (bm25_weight / (k as f64 + rank as f64)) as f32;
        let entry = entries.entry(hit.id.clone()).or_insert_with(|| Fused {
            id: hit.id.clone(),
            rrf_score: 0.0,
            bm25_score: 0.0,
            vec_score: 0.0,
            bm25_rank: None,
            vec_rank: None,
            in_both_lists: false,
        });
        entry.rrf_score += contribution;
        entry.bm25_score = hit.score;
        entry.bm25_rank = Some(rank);
    }

    for (rank0, hit) in vec.iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = (vec_weight / (k as f64 + rank as f64)) as f32;
        let entry = entries.entry(hit.id.clone()).or_insert_with(|| Fused {
            id: hit.id.clone(),
            rrf_score: 0.0,
            bm25_score: 0.0,
            vec_score: 0.0,
            bm25_rank: None,
            vec_rank: None,
            in_both_lists: false,
        });
        entry.rrf_score += contribution;
        entry.vec_score = hit.score;
        entry.vec_rank = Some(rank);
    }

    let mut out: Vec<Fused> = entries.into_values().collect();
    for entry in out.iter_mut() {
        entry.in_both_lists = entry.bm25_rank.is_some() && entry.vec_rank.is_some();
    }

    out.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.in_both_lists.cmp(&a.in_both_lists))
            .then_with(|| a.vec_rank.unwrap_or(usize::MAX).cmp(&b.vec_rank.unwrap_or(usize::MAX)))
            .then_with(|| a.id.0.cmp(&b.id.0))
    });

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[&str]) -> Vec<(ChunkId, f32)> {
        ids.iter().map(|id| (ChunkId(id.to_string()), 1.0)).collect()
    }

    #[test]
    fn rrf_numeric_check_from_spec_scenario_8() {
        let bm25_ids = hits(&["a", "b", "c", "d"]);
        let vec_ids = hits(&["c", "a", "d", "b"]);
        let bm25: Vec<FusionInput> = bm25_ids.iter().map(|(id, s)| FusionInput { id, score: *s }).collect();
        let vec: Vec<FusionInput> = vec_ids.iter().map(|(id, s)| FusionInput { id, score: *s }).collect();

        let fused = reciprocal_rank_fusion(&bm25, &vec, 0.35, 0.65, 60);
        let order: Vec<&str> = fused.iter().map(|f| f.id.0.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b", "d"]);

        let a = fused.iter().find(|f| f.id.0 == "a").unwrap();
        assert!((a.rrf_score - 0.01622).abs() < 1e-4, "a score = {}", a.rrf_score);
    }

    #[test]
    fn missing_from_one_side_still_ranks() {
        let bm25_ids = hits(&["only_bm25"]);
        let bm25: Vec<FusionInput> = bm25_ids.iter().map(|(id, s)| FusionInput { id, score: *s }).collect();
        let fused = reciprocal_rank_fusion(&bm25, &[], 0.35, 0.65, 60);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].vec_score, 0.0);
        assert!(fused[0].vec_rank.is_none());
        assert!(!fused[0].in_both_lists);
    }

    #[test]
    fn adding_low_rank_document_does_not_perturb_top_results() {
        let bm25_ids = hits(&["a", "b", "c"]);
        let bm25: Vec<FusionInput> = bm25_ids.iter().map(|(id, s)| FusionInput { id, score: *s }).collect();
        let before = reciprocal_rank_fusion(&bm25, &[], 0.35, 0.65, 60);
        let top_before: Vec<&str> = before.iter().take(2).map(|f| f.id.0.as_str()).collect();

        let mut more_ids = hits(&["a", "b", "c"]);
        more_ids.push((ChunkId("z_far".to_string()), 1.0));
        let more: Vec<FusionInput> = more_ids.iter().map(|(id, s)| FusionInput { id, score: *s }).collect();
        let after = reciprocal_rank_fusion(&more, &[], 0.35, 0.65, 60);
        let top_after: Vec<&str> = after.iter().take(2).map(|f| f.id.0.as_str()).collect();

        assert_eq!(top_before, top_after);
    }
}
