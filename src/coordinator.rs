//! Indexing coordinator (§4.12): maps coalesced watcher events onto
//! metadata/BM25/vector mutations, and runs startup reconciliation between
//! the persisted catalog and the filesystem.

use crate::bm25::Bm25Index;
use crate::chunk::{chunk_file, is_binary};
use crate::config::{Config, WatcherConfig};
use crate::embed::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::metadata::MetadataStore;
use crate::model::{
    Document, Project, ProjectId, VectorRecord, RESERVED_STATE_GITIGNORE_HASH, RESERVED_STATE_INDEX_DIMENSION, RESERVED_STATE_INDEX_MODEL,
};
use crate::scanner::{scan_workspace, ScanOptions};
use crate::vector_index::VectorIndex;
use crate::watcher::FileEvent;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct IndexStats {
    pub files_indexed: u64,
    pub chunks_indexed: u64,
    pub errors: u64,
}

pub struct Coordinator {
    pub root: PathBuf,
    pub project: Project,
    pub metadata: Arc<MetadataStore>,
    pub bm25: Arc<Mutex<Bm25Index>>,
    pub vector: Arc<Mutex<VectorIndex>>,
    pub embedder: Arc<Embedder>,
    pub config: Config,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn mtime_unix(meta: &std::fs::Metadata) -> i64 {
    meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Combined xxh3 hash over the path and contents of every active
/// `.gitignore` file under `root`, used to detect whether the ignore rule
/// set has changed since the last reconciliation.
pub fn gitignore_set_hash(root: &Path) -> String {
    let mut paths = collect_gitignore_files(root);
    paths.sort();
    let mut combined = Vec::new();
    for path in paths {
        combined.extend_from_slice(path.to_string_lossy().as_bytes());
        if let Ok(bytes) = std::fs::read(&path) {
            combined.extend_from_slice(&bytes);
        }
    }
    crate::model::xxh3_hex(&combined)
}

fn collect_gitignore_files(root: &Path) -> Vec<PathBuf> {
    const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".amanmcp"];
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let candidate = dir.join(".gitignore");
        if candidate.is_file() {
            out.push(candidate);
        }
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let skip = path.file_name().map(|n| SKIP_DIRS.iter().any(|s| n == *s)).unwrap_or(false);
                    if !skip {
                        stack.push(path);
                    }
                }
            }
        }
    }
    out
}

impl Coordinator {
    /// Read a file's rel path, hash and chunk/embed/upsert it into all three
    /// stores. Shared by single-event handling and the reconciliation walk.
    async fn reindex_file(&self, rel_path: &str, cancel: &CancellationToken) -> CoreResult<usize> {
        self.reindex_file_inner(rel_path, cancel, false).await
    }

    async fn reindex_file_inner(&self, rel_path: &str, cancel: &CancellationToken, force: bool) -> CoreResult<usize> {
        let abs_path = self.root.join(rel_path);
        let bytes = std::fs::read(&abs_path).map_err(|e| CoreError::Fatal(format!("read {rel_path}: {e}")))?;
        let meta = std::fs::metadata(&abs_path).map_err(|e| CoreError::Fatal(format!("stat {rel_path}: {e}")))?;

        if meta.len() > self.config.indexer.max_file_size {
            tracing::warn!(path = rel_path, "file exceeds max_file_size, skipping");
            return Ok(0);
        }
        if is_binary(&bytes) {
            return Ok(0);
        }
        let content = String::from_utf8_lossy(&bytes).to_string();
        let content_hash = crate::model::xxh3_hex(&bytes);

        let existing_file = self.metadata.get_file_by_path(self.project.id, rel_path)?;
        if let Some(existing) = &existing_file {
            if !force && existing.content_hash == content_hash {
                self.metadata.touch_file(existing.id, mtime_unix(&meta), now_unix())?;
                return Ok(0);
            }
        }

        let file_id = self.metadata.upsert_file(self.project.id, rel_path, &content_hash, meta.len(), mtime_unix(&meta), now_unix())?;

        // Replace: drop the old chunk set from all three stores before
        // inserting the new one. BM25/vector removal is best-effort.
        let old_ids: Vec<_> = self.metadata.get_chunks_by_file(file_id)?.into_iter().map(|c| c.id).collect();
        if !old_ids.is_empty() {
            self.metadata.delete_chunks(&old_ids)?;
            if let Err(e) = self.bm25.lock().expect("bm25 lock poisoned").delete(&old_ids) {
                tracing::warn!(error = %e, "bm25 delete failed during reindex, continuing");
            }
            if let Err(e) = self.vector.lock().expect("vector lock poisoned").delete(&old_ids) {
                tracing::warn!(error = %e, "vector delete failed during reindex, continuing");
            }
        }

        let chunks = match chunk_file(&abs_path, rel_path, &content, file_id, &self.config.indexer) {
            Ok(c) => c,
            Err(_) => return Ok(0),
        };
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.embedding_text()).collect();
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in texts.chunks(self.config.indexer.batch_size.max(1)) {
            let vectors = self.embedder.embed_batch(batch, cancel).await?;
            embeddings.extend(vectors);
        }

        let records: Vec<VectorRecord> = chunks.iter().zip(embeddings.iter()).map(|(c, v)| VectorRecord { id: c.id.clone(), vector: v.clone() }).collect();
        let documents: Vec<Document> = chunks.iter().map(|c| Document { doc_id: c.id.clone(), content: c.content.clone(), path: rel_path.to_string(), language: c.language.clone() }).collect();

        self.metadata.save_chunks(&chunks, Some(&records))?;
        if let Err(e) = self.bm25.lock().expect("bm25 lock poisoned").index_documents(documents.into_iter()) {
            tracing::warn!(error = %e, "bm25 index failed during reindex, continuing");
        }
        if let Err(e) = self.vector.lock().expect("vector lock poisoned").add(&records) {
            tracing::warn!(error = %e, "vector add failed during reindex, continuing");
        }

        if self.metadata.get_state(RESERVED_STATE_INDEX_DIMENSION)?.is_none() {
            self.metadata.set_state(RESERVED_STATE_INDEX_DIMENSION, &self.embedder.dimensions().to_string())?;
            self.metadata.set_state(RESERVED_STATE_INDEX_MODEL, self.embedder.model_name())?;
        }

        Ok(chunks.len())
    }

    async fn delete_file(&self, rel_path: &str) -> CoreResult<()> {
        let Some(file) = self.metadata.get_file_by_path(self.project.id, rel_path)? else {
            return Ok(());
        };
        let ids = self.metadata.delete_file(file.id)?;
        if let Err(e) = self.bm25.lock().expect("bm25 lock poisoned").delete(&ids) {
            tracing::warn!(error = %e, "bm25 delete failed, will reconcile on next startup");
        }
        if let Err(e) = self.vector.lock().expect("vector lock poisoned").delete(&ids) {
            tracing::warn!(error = %e, "vector delete failed, will reconcile on next startup");
        }
        Ok(())
    }

    fn rel_path_of(&self, abs_path: &Path) -> Option<String> {
        abs_path.strip_prefix(&self.root).ok().map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    pub async fn handle_event(&self, event: FileEvent, cancel: &CancellationToken) -> CoreResult<()> {
        match event {
            FileEvent::Create(path) | FileEvent::Modify(path) => {
                if let Some(rel) = self.rel_path_of(&path) {
                    if path.exists() {
                        self.reindex_file(&rel, cancel).await?;
                    }
                }
            }
            FileEvent::Delete(path) => {
                if let Some(rel) = self.rel_path_of(&path) {
                    self.delete_file(&rel).await?;
                }
            }
            FileEvent::GitignoreChanged => {
                self.reconcile_gitignore()?;
            }
            FileEvent::ConfigChanged => {
                tracing::info!("config.yaml changed; new settings apply to the next index/search call");
            }
        }
        Ok(())
    }

    /// §4.12 gitignore phase: on a rule-set change, drop now-ignored files
    /// from the index (cheap — no filesystem walk needed for additions) and
    /// fall back to a full walk to discover now-unignored files.
    fn reconcile_gitignore(&self) -> CoreResult<()> {
        let current_hash = gitignore_set_hash(&self.root);
        let stored_hash = self.metadata.get_state(RESERVED_STATE_GITIGNORE_HASH)?;
        if stored_hash.as_deref() == Some(current_hash.as_str()) {
            return Ok(());
        }

        let cfg = WatcherConfig::default();
        let filter = crate::watcher::EventFilter::build(&self.root, &cfg);
        let known = self.metadata.get_files_for_reconciliation(self.project.id)?;
        for rel_path in known.keys() {
            let abs = self.root.join(rel_path);
            if !filter.should_index(&abs) {
                if let Some(rel) = rel_path.to_str() {
                    let _ = self.delete_file_sync(rel);
                }
            }
        }

        self.metadata.set_state(RESERVED_STATE_GITIGNORE_HASH, &current_hash)?;
        Ok(())
    }

    fn delete_file_sync(&self, rel_path: &str) -> CoreResult<()> {
        let Some(file) = self.metadata.get_file_by_path(self.project.id, rel_path)? else {
            return Ok(());
        };
        let ids = self.metadata.delete_file(file.id)?;
        self.bm25.lock().expect("bm25 lock poisoned").delete(&ids).ok();
        self.vector.lock().expect("vector lock poisoned").delete(&ids).ok();
        Ok(())
    }

    /// Startup reconciliation (§4.12): gitignore phase, then a file-phase
    /// diff against the filesystem applied in deterministic order
    /// (deletions, then modifications, then additions). Periodically
    /// checkpoints so a crash mid-reconcile can resume.
    pub async fn reconcile_startup(&self, cancel: &CancellationToken) -> CoreResult<IndexStats> {
        self.reconcile_startup_inner(cancel, false).await
    }

    async fn reconcile_startup_inner(&self, cancel: &CancellationToken, force: bool) -> CoreResult<IndexStats> {
        self.reconcile_gitignore()?;

        let known = self.metadata.get_files_for_reconciliation(self.project.id)?;
        let scan_opts = ScanOptions { repo_root: self.root.clone(), target: PathBuf::from("."), max_file_bytes: self.config.indexer.max_file_size, exclude_dir_names: self.config.watcher.vendored_dirs.clone() };
        let entries = scan_workspace(&scan_opts).map_err(|e| CoreError::Fatal(format!("scan workspace: {e}")))?;

        // Stat()-ing every file in the tree is the dominant cost on a large
        // repo; the filesystem walk already happened serially in
        // `scan_workspace`, so fan the metadata reads out across cores.
        let on_disk: HashMap<PathBuf, (i64, u64)> = entries
            .par_iter()
            .filter_map(|entry| std::fs::metadata(&entry.abs_path).ok().map(|meta| (entry.rel_path.clone(), (mtime_unix(&meta), meta.len()))))
            .collect();

        let mut deleted: Vec<PathBuf> = Vec::new();
        let mut changed: Vec<PathBuf> = Vec::new();
        let mut added: Vec<PathBuf> = Vec::new();

        for (path, (mtime, size, _hash)) in &known {
            match on_disk.get(path) {
                None => deleted.push(path.clone()),
                Some((disk_mtime, disk_size)) if force || disk_mtime != mtime || disk_size != size => changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in on_disk.keys() {
            if !known.contains_key(path) {
                added.push(path.clone());
            }
        }

        let total = (deleted.len() + changed.len() + added.len()) as u64;
        let mut processed = 0u64;
        let mut chunks_indexed = 0u64;
        let mut errors = 0u64;

        for path in &deleted {
            if let Some(rel) = path.to_str() {
                self.delete_file_sync(rel).ok();
            }
            processed += 1;
            self.metadata.save_index_checkpoint(&self.project.name, processed, total, "reconcile_delete")?;
        }
        for path in changed.iter().chain(added.iter()) {
            if let Some(rel) = path.to_str() {
                match self.reindex_file_inner(rel, cancel, force).await {
                    Ok(n) => chunks_indexed += n as u64,
                    Err(e) => {
                        tracing::warn!(path = rel, error = %e, "reconcile reindex failed");
                        errors += 1;
                    }
                }
            }
            processed += 1;
            self.metadata.save_index_checkpoint(&self.project.name, processed, total, "reconcile_index")?;
        }

        self.metadata.clear_index_checkpoint()?;
        self.bm25.lock().expect("bm25 lock poisoned").stats().ok();
        self.vector.lock().expect("vector lock poisoned").save().ok();

        Ok(IndexStats { files_indexed: (changed.len() + added.len()) as u64, chunks_indexed, errors })
    }

    /// Full (re)index of the whole project, used by the `index` operation
    /// (§6) rather than incremental watcher events.
    pub async fn index_all(&self, force: bool, cancel: &CancellationToken) -> CoreResult<IndexStats> {
        self.reconcile_startup_inner(cancel, force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn build_coordinator(root: &Path) -> Coordinator {
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let project = metadata.upsert_project_at("demo", root, 1).unwrap();
        let bm25 = Arc::new(Mutex::new(Bm25Index::open(&root.join(".amanmcp/bm25"), &[]).unwrap()));
        let mut cfg = Config::default();
        cfg.embeddings.dimensions = 8;
        let vector = Arc::new(Mutex::new(VectorIndex::open(&root.join(".amanmcp/vec"), 8, 16).unwrap()));
        let embedder = Arc::new(Embedder::from_config(&cfg.embeddings).unwrap());
        Coordinator { root: root.to_path_buf(), project, metadata, bm25, vector, embedder, config: cfg }
    }

    #[tokio::test]
    async fn reindex_creates_chunks_for_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() {}\nfn two() {}\n").unwrap();
        let coord = build_coordinator(dir.path());
        let cancel = CancellationToken::new();

        let n = coord.reindex_file("a.rs", &cancel).await.unwrap();
        assert!(n > 0);
        let file = coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().unwrap();
        let chunks = coord.metadata.get_chunks_by_file(file.id).unwrap();
        assert_eq!(chunks.len(), n);
    }

    #[tokio::test]
    async fn unchanged_content_hash_skips_rechunking() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() {}\n").unwrap();
        let coord = build_coordinator(dir.path());
        let cancel = CancellationToken::new();

        let first = coord.reindex_file("a.rs", &cancel).await.unwrap();
        assert!(first > 0);
        // Same content, same hash: second pass should not re-chunk (0 returned).
        let second = coord.reindex_file("a.rs", &cancel).await.unwrap();
        assert_eq!(second, 0);

        let file = coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().unwrap();
        let chunks = coord.metadata.get_chunks_by_file(file.id).unwrap();
        assert_eq!(chunks.len(), first);
    }

    #[tokio::test]
    async fn modified_content_replaces_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() {}\n").unwrap();
        let coord = build_coordinator(dir.path());
        let cancel = CancellationToken::new();
        coord.reindex_file("a.rs", &cancel).await.unwrap();

        std::fs::write(dir.path().join("a.rs"), "fn one() {}\nfn two() {}\nfn three() {}\n").unwrap();
        let second = coord.reindex_file("a.rs", &cancel).await.unwrap();
        assert!(second > 0);

        let file = coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().unwrap();
        let chunks = coord.metadata.get_chunks_by_file(file.id).unwrap();
        assert_eq!(chunks.len(), second);
    }

    #[tokio::test]
    async fn delete_event_removes_file_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() {}\n").unwrap();
        let coord = build_coordinator(dir.path());
        let cancel = CancellationToken::new();
        coord.reindex_file("a.rs", &cancel).await.unwrap();
        assert!(coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().is_some());

        coord.delete_file("a.rs").await.unwrap();
        assert!(coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().is_none());
    }

    #[tokio::test]
    async fn startup_reconciliation_indexes_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn two() {}\n").unwrap();
        let coord = build_coordinator(dir.path());
        let cancel = CancellationToken::new();

        let stats = coord.reconcile_startup(&cancel).await.unwrap();
        assert_eq!(stats.files_indexed, 2);
        assert!(stats.chunks_indexed >= 2);
        assert_eq!(stats.errors, 0);
        assert!(coord.metadata.load_index_checkpoint().unwrap().is_none());
    }

    #[tokio::test]
    async fn startup_reconciliation_deletes_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn one() {}\n").unwrap();
        let coord = build_coordinator(dir.path());
        let cancel = CancellationToken::new();
        coord.reconcile_startup(&cancel).await.unwrap();
        assert!(coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().is_some());

        std::fs::remove_file(dir.path().join("a.rs")).unwrap();
        let stats = coord.reconcile_startup(&cancel).await.unwrap();
        assert_eq!(stats.files_indexed, 0);
        assert!(coord.metadata.get_file_by_path(coord.project.id, "a.rs").unwrap().is_none());
    }

    #[test]
    fn gitignore_set_hash_changes_when_file_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "a\n").unwrap();
        let h1 = gitignore_set_hash(dir.path());
        std::fs::write(dir.path().join(".gitignore"), "a\nb\n").unwrap();
        let h2 = gitignore_set_hash(dir.path());
        assert_ne!(h1, h2);
    }

    #[test]
    fn gitignore_set_hash_stable_with_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "a\n").unwrap();
        let h1 = gitignore_set_hash(dir.path());
        let h2 = gitignore_set_hash(dir.path());
        assert_eq!(h1, h2);
    }
}
