//! Approximate nearest-neighbor index over unit-length chunk embeddings.
//!
//! `hnsw_rs` has no native delete or update: a replace is a tombstone of the
//! old internal id plus an insert under a fresh one, and `delete` is a
//! tombstone only — reclaiming that space is what compaction (§4.13) is for.

use crate::error::{CoreError, CoreResult};
use crate::model::{ChunkId, VectorRecord};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const MAX_NB_CONNECTION: usize = 32;
const EF_CONSTRUCTION: usize = 200;
const NB_LAYER: usize = 16;
const EF_SEARCH: usize = 64;
const HNSW_BASENAME: &str = "vectors";

pub struct VectorHit {
    pub id: ChunkId,
    /// Similarity = 1 − cosine distance, already in `[0, 1]`.
    pub score: f32,
}

#[derive(Serialize, Deserialize, Default)]
struct IdMapMeta {
    id_to_chunk: HashMap<usize, String>,
    next_id: usize,
    dimensions: usize,
}

pub struct VectorIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    id_to_chunk: HashMap<usize, ChunkId>,
    chunk_to_id: HashMap<ChunkId, usize>,
    tombstones: HashSet<usize>,
    next_id: usize,
    dir: PathBuf,
    dimensions: usize,
    capacity: usize,
}

impl VectorIndex {
    pub fn open(dir: &Path, dimensions: usize, capacity: usize) -> CoreResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| CoreError::Fatal(format!("create vector dir: {e}")))?;

        let meta_path = dir.join(format!("{HNSW_BASENAME}.hnsw.meta"));
        if meta_path.exists() && dir.join(format!("{HNSW_BASENAME}.hnsw.graph")).exists() {
            match Self::load(dir, dimensions, capacity) {
                Ok(idx) => return Ok(idx),
                Err(e) => {
                    tracing::warn!(error = %e, "vector snapshot unreadable, starting empty");
                }
            }
        }

        Ok(VectorIndex {
            hnsw: Hnsw::<f32, DistCosine>::new(MAX_NB_CONNECTION, capacity.max(1), NB_LAYER, EF_CONSTRUCTION, DistCosine {}),
            id_to_chunk: HashMap::new(),
            chunk_to_id: HashMap::new(),
            tombstones: HashSet::new(),
            next_id: 0,
            dir: dir.to_path_buf(),
            dimensions,
            capacity: capacity.max(1),
        })
    }

    fn load(dir: &Path, dimensions: usize, capacity: usize) -> CoreResult<Self> {
        let meta_text = std::fs::read_to_string(dir.join(format!("{HNSW_BASENAME}.hnsw.meta")))
            .map_err(|e| CoreError::Corruption { store: "vector", detail: e.to_string() })?;
        let meta: IdMapMeta = serde_json::from_str(&meta_text).map_err(|e| CoreError::Corruption { store: "vector", detail: e.to_string() })?;

        let reloader: HnswIo = HnswIo::new(dir, HNSW_BASENAME);
        let hnsw: Hnsw<f32, DistCosine> = reloader
            .load_hnsw()
            .map_err(|e| CoreError::Corruption { store: "vector", detail: e.to_string() })?;

        let id_to_chunk: HashMap<usize, ChunkId> = meta.id_to_chunk.into_iter().map(|(k, v)| (k, ChunkId(v))).collect();
        let chunk_to_id = id_to_chunk.iter().map(|(id, cid)| (cid.clone(), *id)).collect();

        Ok(VectorIndex {
            hnsw,
            id_to_chunk,
            chunk_to_id,
            tombstones: HashSet::new(),
            next_id: meta.next_id,
            dir: dir.to_path_buf(),
            dimensions,
            capacity: capacity.max(1),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Insert or replace nodes; a duplicate id tombstones the old internal
    /// node and inserts a fresh one (hnsw_rs has no update-in-place).
    pub fn add(&mut self, records: &[VectorRecord]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        for r in records {
            if let Some(&old) = self.chunk_to_id.get(&r.id) {
                self.tombstones.insert(old);
            }
        }
        let assigned: Vec<usize> = (0..records.len()).map(|i| self.next_id + i).collect();
        self.next_id += records.len();

        let data: Vec<(&Vec<f32>, usize)> = records.iter().zip(assigned.iter()).map(|(r, id)| (&r.vector, *id)).collect();
        self.hnsw.parallel_insert(&data);

        for (r, id) in records.iter().zip(assigned.iter()) {
            self.id_to_chunk.insert(*id, r.id.clone());
            self.chunk_to_id.insert(r.id.clone(), *id);
        }
        Ok(())
    }

    /// Mark nodes as removed; they are excluded from search but the graph
    /// itself is untouched until the next compaction.
    pub fn delete(&mut self, ids: &[ChunkId]) -> CoreResult<()> {
        for id in ids {
            if let Some(internal) = self.chunk_to_id.remove(id) {
                self.tombstones.insert(internal);
                self.id_to_chunk.remove(&internal);
            }
        }
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> CoreResult<Vec<VectorHit>> {
        if self.chunk_to_id.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        // Over-fetch to absorb tombstoned neighbors, then trim to k.
        let fetch = (k * 3).max(k + self.tombstones.len().min(64));
        let neighbours = self.hnsw.search(query, fetch, EF_SEARCH);

        let mut hits = Vec::with_capacity(k);
        for n in neighbours {
            if self.tombstones.contains(&n.d_id) {
                continue;
            }
            let Some(id) = self.id_to_chunk.get(&n.d_id) else { continue };
            let score = (1.0 - n.distance).clamp(0.0, 1.0);
            hits.push(VectorHit { id: id.clone(), score });
            if hits.len() >= k {
                break;
            }
        }
        Ok(hits)
    }

    pub fn count(&self) -> usize {
        self.chunk_to_id.len()
    }

    pub fn save(&self) -> CoreResult<()> {
        self.hnsw.file_dump(&self.dir, HNSW_BASENAME).map_err(|e| CoreError::Fatal(format!("vector snapshot write: {e}")))?;
        let meta = IdMapMeta {
            id_to_chunk: self.id_to_chunk.iter().map(|(k, v)| (*k, v.0.clone())).collect(),
            next_id: self.next_id,
            dimensions: self.dimensions,
        };
        let text = serde_json::to_string(&meta).map_err(|e| CoreError::Fatal(format!("vector meta encode: {e}")))?;
        std::fs::write(self.dir.join(format!("{HNSW_BASENAME}.hnsw.meta")), text).map_err(|e| CoreError::Fatal(format!("vector meta write: {e}")))?;
        Ok(())
    }

    /// Rebuild the graph from a fresh snapshot of persisted embeddings,
    /// discarding tombstoned entries entirely. Used by compaction.
    pub fn rebuild(&mut self, records: impl Iterator<Item = VectorRecord>) -> CoreResult<()> {
        self.install(Self::build_fresh(records));
        Ok(())
    }

    /// Build a replacement graph from an embedding snapshot without touching
    /// `self`. The O(n) HNSW insert runs entirely off to the side — nothing
    /// here takes the index's lock — so a caller holding a cheap activity
    /// check can decide whether to `install` it or throw it away.
    pub fn build_fresh(records: impl Iterator<Item = VectorRecord>) -> RebuiltGraph {
        let records: Vec<VectorRecord> = records.collect();
        let capacity = records.len().max(1);
        let mut fresh = Hnsw::<f32, DistCosine>::new(MAX_NB_CONNECTION, capacity, NB_LAYER, EF_CONSTRUCTION, DistCosine {});
        let data: Vec<(&Vec<f32>, usize)> = records.iter().enumerate().map(|(i, r)| (&r.vector, i)).collect();
        fresh.parallel_insert(&data);

        let id_to_chunk: HashMap<usize, ChunkId> = records.iter().enumerate().map(|(i, r)| (i, r.id.clone())).collect();
        let chunk_to_id = id_to_chunk.iter().map(|(id, cid)| (cid.clone(), *id)).collect();
        RebuiltGraph { hnsw: fresh, id_to_chunk, chunk_to_id, next_id: records.len(), capacity }
    }

    /// Swap in a graph built by [`Self::build_fresh`]. Just moves
    /// already-built fields into place, so this is the only part of a
    /// rebuild that needs to hold the index's lock.
    pub fn install(&mut self, rebuilt: RebuiltGraph) {
        self.hnsw = rebuilt.hnsw;
        self.id_to_chunk = rebuilt.id_to_chunk;
        self.chunk_to_id = rebuilt.chunk_to_id;
        self.tombstones.clear();
        self.next_id = rebuilt.next_id;
        self.capacity = rebuilt.capacity;
    }
}

/// A graph built by [`VectorIndex::build_fresh`], ready to be moved into a
/// live index with [`VectorIndex::install`].
pub struct RebuiltGraph {
    hnsw: Hnsw<'static, f32, DistCosine>,
    id_to_chunk: HashMap<usize, ChunkId>,
    chunk_to_id: HashMap<ChunkId, usize>,
    next_id: usize,
    capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    #[test]
    fn add_then_search_finds_nearest() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), 2, 16).unwrap();
        idx.add(&[
            VectorRecord { id: ChunkId("a".into()), vector: v(1.0, 0.0) },
            VectorRecord { id: ChunkId("b".into()), vector: v(0.0, 1.0) },
        ])
        .unwrap();
        let hits = idx.search(&v(1.0, 0.1), 1).unwrap();
        assert_eq!(hits[0].id.0, "a");
    }

    #[test]
    fn delete_excludes_from_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), 2, 16).unwrap();
        idx.add(&[VectorRecord { id: ChunkId("a".into()), vector: v(1.0, 0.0) }]).unwrap();
        idx.delete(&[ChunkId("a".into())]).unwrap();
        assert_eq!(idx.count(), 0);
        let hits = idx.search(&v(1.0, 0.0), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn replace_tombstones_the_old_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), 2, 16).unwrap();
        idx.add(&[VectorRecord { id: ChunkId("a".into()), vector: v(1.0, 0.0) }]).unwrap();
        idx.add(&[VectorRecord { id: ChunkId("a".into()), vector: v(0.0, 1.0) }]).unwrap();
        assert_eq!(idx.count(), 1);
    }

    #[test]
    fn save_then_load_yields_same_neighbor_for_same_query() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut idx = VectorIndex::open(dir.path(), 2, 16).unwrap();
            idx.add(&[
                VectorRecord { id: ChunkId("a".into()), vector: v(1.0, 0.0) },
                VectorRecord { id: ChunkId("b".into()), vector: v(0.0, 1.0) },
            ])
            .unwrap();
            idx.save().unwrap();
        }

        let reloaded = VectorIndex::open(dir.path(), 2, 16).unwrap();
        assert_eq!(reloaded.count(), 2);
        let hits = reloaded.search(&v(1.0, 0.1), 1).unwrap();
        assert_eq!(hits[0].id.0, "a");
    }

    #[test]
    fn rebuild_discards_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), 2, 16).unwrap();
        idx.add(&[
            VectorRecord { id: ChunkId("a".into()), vector: v(1.0, 0.0) },
            VectorRecord { id: ChunkId("b".into()), vector: v(0.0, 1.0) },
        ])
        .unwrap();
        idx.delete(&[ChunkId("a".into())]).unwrap();
        idx.rebuild(vec![VectorRecord { id: ChunkId("b".into()), vector: v(0.0, 1.0) }].into_iter()).unwrap();
        assert_eq!(idx.count(), 1);
        let hits = idx.search(&v(0.0, 1.0), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.0, "b");
    }
}
