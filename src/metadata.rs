//! Durable catalog: projects/files/chunks/symbols/state/checkpoint.
//!
//! Backed by `rusqlite` in WAL mode over an `r2d2` connection pool. WAL gives
//! every connection a consistent read snapshot that never blocks on the
//! writer's transaction, but that only pays off if readers actually hold
//! separate connections — a single `Mutex<Connection>` would serialize them
//! all through one Rust-level lock regardless of what SQLite allows. The
//! pool hands out up to `POOL_SIZE` connections so concurrent `get_chunk`/
//! `all_documents`/etc. calls run against the database at the same time,
//! with `busy_timeout` covering the brief window where a write transaction
//! is actually committing.

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Chunk, ChunkId, ContentKind, Document, FileId, FileRecord, IndexCheckpoint, Project,
    ProjectId, Symbol, SymbolKind, VectorRecord,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Concurrent connections kept open against the catalog file. Writers still
/// serialize at the SQLite level (one WAL writer at a time); this just stops
/// readers from queuing behind them or each other.
const POOL_SIZE: u32 = 8;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    root TEXT NOT NULL UNIQUE,
    created_unix INTEGER NOT NULL,
    updated_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    mtime_unix INTEGER NOT NULL,
    last_indexed_unix INTEGER NOT NULL,
    UNIQUE(project_id, path)
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    file_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    context_prefix TEXT,
    kind TEXT NOT NULL,
    language TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS chunks_by_file ON chunks(file_id);

CREATE TABLE IF NOT EXISTS symbols (
    chunk_id TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS symbols_by_chunk ON symbols(chunk_id);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    project TEXT NOT NULL,
    processed INTEGER NOT NULL,
    total INTEGER NOT NULL,
    phase TEXT NOT NULL
);
"#;

pub struct MetadataStore {
    pool: Pool<SqliteConnectionManager>,
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let id: String = row.get(0)?;
    let file_id: i64 = row.get(1)?;
    let path: String = row.get(2)?;
    let content: String = row.get(3)?;
    let context_prefix: Option<String> = row.get(4)?;
    let kind: String = row.get(5)?;
    let language: String = row.get(6)?;
    let start_line: u32 = row.get(7)?;
    let end_line: u32 = row.get(8)?;
    Ok(Chunk {
        id: ChunkId(id),
        file_id: FileId(file_id),
        path: PathBuf::from(path),
        content,
        context_prefix,
        kind: match kind.as_str() {
            "markdown" => ContentKind::Markdown,
            "plain_text" => ContentKind::PlainText,
            _ => ContentKind::Code,
        },
        language,
        start_line,
        end_line,
        symbols: Vec::new(),
    })
}

fn kind_str(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Code => "code",
        ContentKind::Markdown => "markdown",
        ContentKind::PlainText => "plain_text",
    }
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

fn blob_to_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

impl MetadataStore {
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Fatal(format!("create metadata dir: {e}")))?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .map_err(|e| CoreError::Corruption { store: "metadata", detail: e.to_string() })?;
        let store = MetadataStore { pool };
        store.conn()?.execute_batch(SCHEMA).map_err(|e| CoreError::Fatal(format!("apply schema: {e}")))?;
        Ok(store)
    }

    /// A single-connection pool: every `:memory:` database is private to the
    /// connection that created it, so pooling beyond one connection here
    /// would just open empty, schema-less databases for the others. Tests
    /// don't need cross-connection concurrency, only a shared handle.
    pub fn open_in_memory() -> CoreResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| CoreError::Fatal(e.to_string()))?;
        let store = MetadataStore { pool };
        store.conn()?.execute_batch(SCHEMA).map_err(|e| CoreError::Fatal(format!("apply schema: {e}")))?;
        Ok(store)
    }

    fn conn(&self) -> CoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| CoreError::Fatal(format!("metadata pool exhausted: {e}")))
    }

    // ---- projects ----

    /// Upsert a project row, stamping `updated_unix` with the caller-supplied
    /// clock reading (the store itself never calls a wall-clock API so its
    /// writes stay reproducible in tests).
    pub fn upsert_project_at(&self, name: &str, root: &Path, now_unix: i64) -> CoreResult<Project> {
        let conn = self.conn()?;
        let root_str = root.to_string_lossy().to_string();
        conn.execute(
            "INSERT INTO projects(name, root, created_unix, updated_unix) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(root) DO UPDATE SET updated_unix = ?3, name = ?1",
            params![name, root_str, now_unix],
        )
        .map_err(|e| CoreError::Fatal(format!("upsert project: {e}")))?;

        conn.query_row(
            "SELECT id, name, root, created_unix, updated_unix FROM projects WHERE root = ?1",
            params![root_str],
            |row| {
                Ok(Project {
                    id: ProjectId(row.get(0)?),
                    name: row.get(1)?,
                    root: PathBuf::from(row.get::<_, String>(2)?),
                    created_unix: row.get(3)?,
                    updated_unix: row.get(4)?,
                })
            },
        )
        .map_err(|e| CoreError::Fatal(format!("read project: {e}")))
    }

    pub fn get_project_by_root(&self, root: &Path) -> CoreResult<Option<Project>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, root, created_unix, updated_unix FROM projects WHERE root = ?1",
            params![root.to_string_lossy().to_string()],
            |row| {
                Ok(Project {
                    id: ProjectId(row.get(0)?),
                    name: row.get(1)?,
                    root: PathBuf::from(row.get::<_, String>(2)?),
                    created_unix: row.get(3)?,
                    updated_unix: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| CoreError::Fatal(format!("read project: {e}")))
    }

    // ---- files ----

    pub fn upsert_file(&self, project_id: ProjectId, rel_path: &str, content_hash: &str, size_bytes: u64, mtime_unix: i64, now_unix: i64) -> CoreResult<FileId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO files(project_id, path, content_hash, size_bytes, mtime_unix, last_indexed_unix)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project_id, path) DO UPDATE SET
               content_hash = ?3, size_bytes = ?4, mtime_unix = ?5, last_indexed_unix = ?6",
            params![project_id.0, rel_path, content_hash, size_bytes as i64, mtime_unix, now_unix],
        )
        .map_err(|e| CoreError::Fatal(format!("upsert file: {e}")))?;

        conn.query_row(
            "SELECT id FROM files WHERE project_id = ?1 AND path = ?2",
            params![project_id.0, rel_path],
            |row| row.get::<_, i64>(0),
        )
        .map(FileId)
        .map_err(|e| CoreError::Fatal(format!("read file id: {e}")))
    }

    /// Update `mtime_unix`/`last_indexed_unix` only, leaving the content hash
    /// and chunks untouched — used when a Create/Modify event finds an
    /// unchanged content hash.
    pub fn touch_file(&self, file_id: FileId, mtime_unix: i64, now_unix: i64) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET mtime_unix = ?1, last_indexed_unix = ?2 WHERE id = ?3",
            params![mtime_unix, now_unix, file_id.0],
        )
        .map_err(|e| CoreError::Fatal(format!("touch file: {e}")))?;
        Ok(())
    }

    pub fn get_file_by_path(&self, project_id: ProjectId, rel_path: &str) -> CoreResult<Option<FileRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, project_id, path, content_hash, size_bytes, mtime_unix, last_indexed_unix
             FROM files WHERE project_id = ?1 AND path = ?2",
            params![project_id.0, rel_path],
            Self::row_to_file,
        )
        .optional()
        .map_err(|e| CoreError::Fatal(format!("read file: {e}")))
    }

    fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        Ok(FileRecord {
            id: FileId(row.get(0)?),
            project_id: ProjectId(row.get(1)?),
            path: PathBuf::from(row.get::<_, String>(2)?),
            content_hash: row.get(3)?,
            size_bytes: row.get::<_, i64>(4)? as u64,
            mtime_unix: row.get(5)?,
            last_indexed_unix: row.get(6)?,
        })
    }

    pub fn delete_file(&self, file_id: FileId) -> CoreResult<Vec<ChunkId>> {
        let conn = self.conn()?;
        let ids: Vec<ChunkId> = {
            let mut stmt = conn.prepare("SELECT id FROM chunks WHERE file_id = ?1").map_err(|e| CoreError::Fatal(e.to_string()))?;
            let rows = stmt
                .query_map(params![file_id.0], |row| row.get::<_, String>(0))
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            rows.filter_map(Result::ok).map(ChunkId).collect()
        };
        conn.execute("DELETE FROM symbols WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?1)", params![file_id.0]).ok();
        conn.execute("DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?1)", params![file_id.0]).ok();
        conn.execute("DELETE FROM chunks WHERE file_id = ?1", params![file_id.0])
            .map_err(|e| CoreError::Fatal(format!("delete chunks for file: {e}")))?;
        conn.execute("DELETE FROM files WHERE id = ?1", params![file_id.0])
            .map_err(|e| CoreError::Fatal(format!("delete file: {e}")))?;
        Ok(ids)
    }

    /// `path → (mtime, size, content_hash)` for every known file of a
    /// project, used by startup reconciliation to diff against the disk.
    pub fn get_files_for_reconciliation(&self, project_id: ProjectId) -> CoreResult<HashMap<PathBuf, (i64, u64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT path, mtime_unix, size_bytes, content_hash FROM files WHERE project_id = ?1")
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt
            .query_map(params![project_id.0], |row| {
                let path: String = row.get(0)?;
                let mtime: i64 = row.get(1)?;
                let size: i64 = row.get(2)?;
                let hash: String = row.get(3)?;
                Ok((PathBuf::from(path), (mtime, size as u64, hash)))
            })
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    // ---- chunks ----

    /// Replace the chunk set and (optionally) the persisted embeddings for
    /// one insertion batch. Not scoped to a single file — callers delete the
    /// old chunk set for a file before calling this with the new one.
    pub fn save_chunks(&self, chunks: &[Chunk], embeddings: Option<&[VectorRecord]>) -> CoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| CoreError::Fatal(format!("begin tx: {e}")))?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks(id, file_id, path, content, context_prefix, kind, language, start_line, end_line)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                   file_id = ?2, path = ?3, content = ?4, context_prefix = ?5, kind = ?6, language = ?7, start_line = ?8, end_line = ?9",
                params![
                    chunk.id.0,
                    chunk.file_id.0,
                    chunk.path.to_string_lossy().to_string(),
                    chunk.content,
                    chunk.context_prefix,
                    kind_str(chunk.kind),
                    chunk.language,
                    chunk.start_line,
                    chunk.end_line,
                ],
            )
            .map_err(|e| CoreError::Fatal(format!("insert chunk: {e}")))?;

            tx.execute("DELETE FROM symbols WHERE chunk_id = ?1", params![chunk.id.0]).map_err(|e| CoreError::Fatal(e.to_string()))?;
            for sym in &chunk.symbols {
                tx.execute(
                    "INSERT INTO symbols(chunk_id, name, kind) VALUES (?1, ?2, ?3)",
                    params![chunk.id.0, sym.name, sym.kind.to_string()],
                )
                .map_err(|e| CoreError::Fatal(format!("insert symbol: {e}")))?;
            }
        }
        if let Some(vectors) = embeddings {
            for v in vectors {
                tx.execute(
                    "INSERT INTO embeddings(chunk_id, dimensions, vector) VALUES (?1, ?2, ?3)
                     ON CONFLICT(chunk_id) DO UPDATE SET dimensions = ?2, vector = ?3",
                    params![v.id.0, v.vector.len() as i64, vector_to_blob(&v.vector)],
                )
                .map_err(|e| CoreError::Fatal(format!("insert embedding: {e}")))?;
            }
        }
        tx.commit().map_err(|e| CoreError::Fatal(format!("commit chunks: {e}")))?;
        Ok(())
    }

    fn attach_symbols(&self, conn: &Connection, chunk: &mut Chunk) -> CoreResult<()> {
        let mut stmt = conn.prepare("SELECT name, kind FROM symbols WHERE chunk_id = ?1").map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt
            .query_map(params![chunk.id.0], |row| {
                let name: String = row.get(0)?;
                let kind: String = row.get(1)?;
                Ok(Symbol { name, kind: SymbolKind::parse(&kind) })
            })
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        chunk.symbols = rows.filter_map(Result::ok).collect();
        Ok(())
    }

    pub fn get_chunk(&self, id: &ChunkId) -> CoreResult<Option<Chunk>> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT id, file_id, path, content, context_prefix, kind, language, start_line, end_line FROM chunks WHERE id = ?1",
                params![id.0],
                row_to_chunk,
            )
            .optional()
            .map_err(|e| CoreError::Fatal(format!("read chunk: {e}")))?;
        match found {
            Some(mut c) => {
                self.attach_symbols(&conn, &mut c)?;
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    pub fn get_chunks(&self, ids: &[ChunkId]) -> CoreResult<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let found = conn
                .query_row(
                    "SELECT id, file_id, path, content, context_prefix, kind, language, start_line, end_line FROM chunks WHERE id = ?1",
                    params![id.0],
                    row_to_chunk,
                )
                .optional()
                .map_err(|e| CoreError::Fatal(format!("read chunk: {e}")))?;
            if let Some(mut c) = found {
                self.attach_symbols(&conn, &mut c)?;
                out.push(c);
            }
        }
        Ok(out)
    }

    pub fn get_chunks_by_file(&self, file_id: FileId) -> CoreResult<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, file_id, path, content, context_prefix, kind, language, start_line, end_line FROM chunks WHERE file_id = ?1 ORDER BY start_line")
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt.query_map(params![file_id.0], row_to_chunk).map_err(|e| CoreError::Fatal(e.to_string()))?;
        let mut out: Vec<Chunk> = rows.filter_map(Result::ok).collect();
        for c in out.iter_mut() {
            self.attach_symbols(&conn, c)?;
        }
        Ok(out)
    }

    /// Delete chunks from metadata. This is the fatal-on-failure side of a
    /// delete per §3's invariant — BM25/vector deletion is the caller's
    /// best-effort responsibility, not this store's.
    pub fn delete_chunks(&self, ids: &[ChunkId]) -> CoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| CoreError::Fatal(e.to_string()))?;
        for id in ids {
            tx.execute("DELETE FROM symbols WHERE chunk_id = ?1", params![id.0]).map_err(|e| CoreError::Fatal(e.to_string()))?;
            tx.execute("DELETE FROM embeddings WHERE chunk_id = ?1", params![id.0]).map_err(|e| CoreError::Fatal(e.to_string()))?;
            tx.execute("DELETE FROM chunks WHERE id = ?1", params![id.0]).map_err(|e| CoreError::Fatal(format!("delete chunk: {e}")))?;
        }
        tx.commit().map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }

    /// Full document corpus for a BM25 rebuild after corruption is detected.
    pub fn all_documents(&self) -> CoreResult<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, content, path, language FROM chunks").map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Document {
                    doc_id: ChunkId(row.get(0)?),
                    content: row.get(1)?,
                    path: row.get(2)?,
                    language: row.get(3)?,
                })
            })
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    /// Every persisted embedding, used both for a vector-index rebuild after
    /// corruption and for compaction's periodic graph rebuild.
    pub fn all_embeddings(&self) -> CoreResult<Vec<VectorRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chunk_id, vector FROM embeddings").map_err(|e| CoreError::Fatal(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok(VectorRecord { id: ChunkId(id), vector: blob_to_vector(&blob) })
            })
            .map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    // ---- state ----

    pub fn get_state(&self, key: &str) -> CoreResult<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| row.get::<_, String>(0))
            .optional()
            .map_err(|e| CoreError::Fatal(format!("read state: {e}")))
    }

    pub fn set_state(&self, key: &str, value: &str) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO state(key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )
        .map_err(|e| CoreError::Fatal(format!("write state: {e}")))?;
        Ok(())
    }

    // ---- checkpoint ----

    pub fn save_index_checkpoint(&self, project: &str, processed: u64, total: u64, phase: &str) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO checkpoint(id, project, processed, total, phase) VALUES (0, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET project = ?1, processed = ?2, total = ?3, phase = ?4",
            params![project, processed as i64, total as i64, phase],
        )
        .map_err(|e| CoreError::Fatal(format!("write checkpoint: {e}")))?;
        Ok(())
    }

    pub fn load_index_checkpoint(&self) -> CoreResult<Option<IndexCheckpoint>> {
        let conn = self.conn()?;
        conn.query_row("SELECT project, processed, total, phase FROM checkpoint WHERE id = 0", [], |row| {
            Ok(IndexCheckpoint {
                project: row.get(0)?,
                processed: row.get::<_, i64>(1)? as u64,
                total: row.get::<_, i64>(2)? as u64,
                phase: row.get(3)?,
            })
        })
        .optional()
        .map_err(|e| CoreError::Fatal(format!("read checkpoint: {e}")))
    }

    pub fn clear_index_checkpoint(&self) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM checkpoint WHERE id = 0", []).map_err(|e| CoreError::Fatal(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Symbol;

    fn sample_chunk(id: &str, file_id: FileId) -> Chunk {
        Chunk {
            id: ChunkId(id.to_string()),
            file_id,
            path: PathBuf::from("a.rs"),
            content: "fn a() {}".to_string(),
            context_prefix: None,
            kind: ContentKind::Code,
            language: "rust".to_string(),
            start_line: 1,
            end_line: 1,
            symbols: vec![Symbol { name: "a".to_string(), kind: SymbolKind::Function }],
        }
    }

    #[test]
    fn save_and_fetch_chunk_round_trips_symbols() {
        let store = MetadataStore::open_in_memory().unwrap();
        let project = store.upsert_project_at("demo", Path::new("/tmp/demo"), 1).unwrap();
        let file_id = store.upsert_file(project.id, "a.rs", "hash1", 10, 1, 1).unwrap();
        store.save_chunks(&[sample_chunk("c1", file_id)], None).unwrap();

        let fetched = store.get_chunk(&ChunkId("c1".to_string())).unwrap().unwrap();
        assert_eq!(fetched.symbols.len(), 1);
        assert_eq!(fetched.symbols[0].name, "a");
    }

    #[test]
    fn delete_file_removes_its_chunks() {
        let store = MetadataStore::open_in_memory().unwrap();
        let project = store.upsert_project_at("demo", Path::new("/tmp/demo"), 1).unwrap();
        let file_id = store.upsert_file(project.id, "a.rs", "hash1", 10, 1, 1).unwrap();
        store.save_chunks(&[sample_chunk("c1", file_id)], None).unwrap();

        let removed = store.delete_file(file_id).unwrap();
        assert_eq!(removed, vec![ChunkId("c1".to_string())]);
        assert!(store.get_chunk(&ChunkId("c1".to_string())).unwrap().is_none());
    }

    #[test]
    fn state_round_trips() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert!(store.get_state("index_dimension").unwrap().is_none());
        store.set_state("index_dimension", "384").unwrap();
        assert_eq!(store.get_state("index_dimension").unwrap().unwrap(), "384");
    }

    #[test]
    fn checkpoint_saves_loads_and_clears() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.save_index_checkpoint("demo", 5, 10, "embedding").unwrap();
        let cp = store.load_index_checkpoint().unwrap().unwrap();
        assert_eq!(cp.processed, 5);
        assert_eq!(cp.phase, "embedding");
        store.clear_index_checkpoint().unwrap();
        assert!(store.load_index_checkpoint().unwrap().is_none());
    }
}
