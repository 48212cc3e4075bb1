//! Stdio JSON-RPC front end (§6): a thin adapter that exposes the four
//! external operations — `search`, `index`, `status`, `delete` — as MCP
//! tools over a line-delimited stdin/stdout transport. One process serves
//! any number of project roots, opening each lazily on first use and
//! keeping it warm (watcher + compaction running) for the process lifetime.
//!
//! Grounded on the teacher's `server.rs` stdio loop and root-resolution
//! heuristic; the tool surface itself is new.

use crate::bm25::Bm25Index;
use crate::compaction::{ActivityTracker, CompactionManager};
use crate::config::{index_dir, load_config};
use crate::coordinator::Coordinator;
use crate::embed::Embedder;
use crate::engine::{Engine, SearchOptions};
use crate::error::{CoreError, CoreResult};
use crate::filter::ResultFilter;
use crate::metadata::MetadataStore;
use crate::model::{ChunkId, SymbolKind};
use crate::rerank::Reranker;
use crate::vector_index::VectorIndex;
use crate::watcher::{EventFilter, ProjectWatcher};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_VECTOR_CAPACITY: usize = 200_000;

/// Everything needed to serve one project root: the search engine, the
/// coordinator used for the `index` operation, and the background tasks
/// (watcher + idle compaction) that keep it current between calls.
struct ProjectHandle {
    engine: Arc<Engine>,
    coordinator: Arc<Coordinator>,
    _watcher: Option<ProjectWatcher>,
    compaction: Arc<CompactionManager>,
    _lock: fslock::LockFile,
}

impl Drop for ProjectHandle {
    fn drop(&mut self) {
        self.compaction.stop();
    }
}

fn canonical_or_self(p: &Path) -> PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

/// Returns `true` for roots that indicate the server was started in the
/// wrong directory — filesystem root or `$HOME` — where indexing would
/// otherwise walk the whole machine.
fn is_dead_root(p: &Path) -> bool {
    if p.parent().is_none() {
        return true;
    }
    if p.components().count() <= 1 {
        return true;
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        if p == Path::new(home.trim()) {
            return true;
        }
    }
    false
}

/// Parse a file URI (or plain path) into an OS-native path, handling the
/// Windows `file:///C:/...` drive-root quirk.
fn extract_path_from_uri(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://").unwrap_or(uri);
    let rest = if rest.starts_with('/') && rest.len() >= 3 && rest.as_bytes()[1].is_ascii_alphabetic() && rest.as_bytes()[2] == b':' {
        &rest[1..]
    } else {
        rest
    };
    let s = rest.trim_end_matches('/');
    if s.is_empty() {
        None
    } else {
        Some(PathBuf::from(s))
    }
}

pub struct ServerState {
    repo_root: Option<PathBuf>,
    projects: HashMap<PathBuf, Arc<ProjectHandle>>,
    started: Instant,
    /// Identifies this server process across client reconnects; surfaced by `status`.
    instance_id: uuid::Uuid,
}

impl Default for ServerState {
    fn default() -> Self {
        ServerState { repo_root: None, projects: HashMap::new(), started: Instant::now(), instance_id: uuid::Uuid::new_v4() }
    }
}

impl ServerState {
    /// Called on the MCP `initialize` request; the editor's own answer is
    /// authoritative and overwrites any earlier bootstrap value.
    fn capture_init_root(&mut self, params: &Value) {
        let raw_uri = params
            .get("workspaceFolders")
            .and_then(|f| f.as_array())
            .and_then(|a| a.first())
            .and_then(|f| f.get("uri").or_else(|| f.get("path")))
            .and_then(|v| v.as_str())
            .or_else(|| params.get("rootUri").or_else(|| params.get("rootPath")).and_then(|v| v.as_str()));
        if let Some(root) = raw_uri.and_then(extract_path_from_uri) {
            self.repo_root = Some(root);
        }
    }

    /// Resolve the project root for a tool call: explicit `root_path` /
    /// `repoPath` param, then the cached root from `initialize` or a prior
    /// call, then the environment cascade, then cwd (refused if dead).
    fn resolve_root(&mut self, args: &Value) -> Result<PathBuf, String> {
        if let Some(path) = args.get("root_path").or_else(|| args.get("repoPath")).and_then(|v| v.as_str()) {
            let pb = canonical_or_self(Path::new(path));
            self.repo_root = Some(pb.clone());
            return Ok(pb);
        }
        if let Some(root) = &self.repo_root {
            return Ok(root.clone());
        }

        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")).unwrap_or_default();
        let env_root = std::env::var("AMANMCP_ROOT")
            .ok()
            .or_else(|| std::env::var("VSCODE_WORKSPACE_FOLDER").ok())
            .or_else(|| std::env::var("IDEA_INITIAL_DIRECTORY").ok())
            .or_else(|| std::env::var("INIT_CWD").ok().filter(|v| v.trim() != home.trim()))
            .or_else(|| std::env::var("PWD").ok().filter(|v| v.trim() != home.trim()))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        if let Some(pb) = env_root {
            let pb = canonical_or_self(&pb);
            self.repo_root = Some(pb.clone());
            return Ok(pb);
        }

        let fallback = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if is_dead_root(&fallback) {
            return Err(format!(
                "workspace root resolved to '{}' (filesystem root or home directory); pass 'root_path' explicitly",
                fallback.display()
            ));
        }
        self.repo_root = Some(fallback.clone());
        Ok(fallback)
    }

    async fn project_for(&mut self, root: &Path) -> CoreResult<Arc<ProjectHandle>> {
        if let Some(handle) = self.projects.get(root) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(open_project(root).await?);
        self.projects.insert(root.to_path_buf(), handle.clone());
        Ok(handle)
    }
}

async fn open_project(root: &Path) -> CoreResult<ProjectHandle> {
    let dir = index_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| CoreError::Fatal(format!("create {}: {e}", dir.display())))?;

    // Single-writer guarantee (§5): one lock file per root, held for the
    // life of the `ProjectHandle`.
    let lock_path = dir.join("amanmcp.lock");
    let mut lock = fslock::LockFile::open(&lock_path).map_err(|e| CoreError::Fatal(format!("open lock file {}: {e}", lock_path.display())))?;
    lock.lock().map_err(|e| CoreError::Fatal(format!("lock {}: {e}", lock_path.display())))?;

    let config = load_config(root);

    let metadata = Arc::new(MetadataStore::open(&dir.join("metadata.db"))?);
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let name = root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| root.to_string_lossy().to_string());
    let project = metadata.upsert_project_at(&name, root, now)?;

    let bm25 = Arc::new(Mutex::new(Bm25Index::open(&dir.join("bm25"), &[])?));
    let vector = Arc::new(Mutex::new(VectorIndex::open(&dir.join("vectors"), config.embeddings.dimensions, DEFAULT_VECTOR_CAPACITY)?));
    let embedder = Arc::new(Embedder::from_config(&config.embeddings)?);
    let reranker = if config.search.rerank_enabled {
        config.search.rerank_endpoint.clone().map(|endpoint| Reranker::new(endpoint, config.search.timeout_ms))
    } else {
        None
    };
    let activity = ActivityTracker::new();

    let engine = Arc::new(Engine {
        metadata: metadata.clone(),
        bm25: bm25.clone(),
        vector: vector.clone(),
        embedder: embedder.clone(),
        reranker,
        config: config.clone(),
        activity: activity.clone(),
        project: project.clone(),
    });

    let coordinator = Arc::new(Coordinator { root: root.to_path_buf(), project, metadata: metadata.clone(), bm25: bm25.clone(), vector: vector.clone(), embedder, config: config.clone() });

    let compaction = Arc::new(CompactionManager::new(metadata, vector, activity, config.indexer.idle_compaction_secs));
    tokio::spawn(compaction.clone().run());

    let (tx, mut rx) = mpsc::channel(1024);
    let filter = Arc::new(Mutex::new(EventFilter::build(root, &config.watcher)));
    let watcher = match ProjectWatcher::start(root.to_path_buf(), config.watcher.clone(), filter, tx) {
        Ok(w) => {
            let coord = coordinator.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                while let Some(event) = rx.recv().await {
                    if let Err(e) = coord.handle_event(event, &cancel).await {
                        tracing::warn!(error = %e, "watcher event handling failed");
                    }
                }
            });
            Some(w)
        }
        Err(e) => {
            tracing::warn!(error = %e, "filesystem watcher unavailable, indexing stays manual");
            None
        }
    };

    Ok(ProjectHandle { engine, coordinator, _watcher: watcher, compaction, _lock: lock })
}

fn build_filter(args: &Value) -> ResultFilter {
    let content_kind = args.get("content_kind").and_then(|v| v.as_str()).map(|s| s.to_string());
    let language = args.get("language").and_then(|v| v.as_str()).map(|s| s.to_string());
    let symbol_kind = args.get("symbol_kind").and_then(|v| v.as_str()).map(SymbolKind::parse);
    let scopes = args
        .get("scopes")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();
    ResultFilter { content_kind, language, symbol_kind, scopes }
}

async fn do_search(state: &mut ServerState, args: &Value, cancel: &CancellationToken) -> Result<Value, String> {
    let root = state.resolve_root(args)?;
    let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let handle = state.project_for(&root).await.map_err(|e| e.to_string())?;

    let options = SearchOptions {
        limit: args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize),
        filter: build_filter(args),
        bm25_only: args.get("bm25_only").and_then(|v| v.as_bool()).unwrap_or(false),
        explain: args.get("explain").and_then(|v| v.as_bool()).unwrap_or(false),
        weights: None,
    };

    let hits = handle.engine.search(&query, options, cancel).await.map_err(|e| e.to_string())?;
    let results: Vec<Value> = hits
        .iter()
        .map(|h| {
            json!({
                "file_path": h.file_path,
                "start_line": h.start_line,
                "end_line": h.end_line,
                "score": h.score,
                "content": h.content,
                "language": h.language,
                "bm25_score": h.bm25_score,
                "vec_score": h.vec_score,
                "bm25_rank": h.bm25_rank,
                "vec_rank": h.vec_rank,
                "explain": h.explain.as_ref().map(|e| json!({
                    "query": e.query,
                    "bm25_count": e.bm25_count,
                    "vec_count": e.vec_count,
                    "bm25_weight": e.bm25_weight,
                    "vec_weight": e.vec_weight,
                    "rrf_constant": e.rrf_constant,
                    "bm25_only": e.bm25_only,
                    "dimension_mismatch": e.dimension_mismatch,
                    "sub_queries": e.sub_queries,
                })),
            })
        })
        .collect();
    Ok(json!(results))
}

async fn do_index(state: &mut ServerState, args: &Value, cancel: &CancellationToken) -> Result<Value, String> {
    let root = state.resolve_root(args)?;
    let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
    let handle = state.project_for(&root).await.map_err(|e| e.to_string())?;
    let stats = handle.coordinator.index_all(force, cancel).await.map_err(|e| e.to_string())?;
    Ok(json!({ "files_indexed": stats.files_indexed, "chunks_indexed": stats.chunks_indexed, "errors": stats.errors }))
}

async fn do_status(state: &mut ServerState, args: &Value, cancel: &CancellationToken) -> Result<Value, String> {
    let root = state.resolve_root(args)?;
    let known = state.projects.contains_key(&root);
    let handle = state.project_for(&root).await.map_err(|e| e.to_string())?;
    let embedder_ready = handle.engine.embedder.available(cancel).await;
    Ok(json!({
        "running": true,
        "instance_id": state.instance_id.to_string(),
        "embedder_kind": handle.engine.embedder.kind(),
        "embedder_ready": embedder_ready,
        "projects_loaded": state.projects.len(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "already_open": known,
    }))
}

async fn do_delete(state: &mut ServerState, args: &Value) -> Result<Value, String> {
    let root = state.resolve_root(args)?;
    let ids: Vec<ChunkId> = args
        .get("ids")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(|s| ChunkId(s.to_string()))).collect())
        .unwrap_or_default();
    let handle = state.project_for(&root).await.map_err(|e| e.to_string())?;
    handle.engine.delete(&ids).map_err(|e| e.to_string())?;
    Ok(json!({ "deleted": ids.len() }))
}

fn tool_list_result(id: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "search",
                    "description": "Hybrid lexical + semantic search over an indexed code repository. Returns relevance-ranked chunks with file path, line range, and score.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "root_path": { "type": "string", "description": "Absolute path to the project root. Optional after the first call or an `initialize` with a workspace root." },
                            "query": { "type": "string", "description": "Natural-language or identifier-shaped search query." },
                            "limit": { "type": "integer", "description": "Max results, capped at 100. Default 10." },
                            "language": { "type": "string", "description": "Restrict results to this language tag (e.g. 'rust')." },
                            "scopes": { "type": "array", "items": { "type": "string" }, "description": "Restrict results to chunks whose path starts with any of these prefixes." },
                            "symbol_kind": { "type": "string", "description": "Restrict results to chunks carrying a symbol of this kind (e.g. 'function')." },
                            "content_kind": { "type": "string", "enum": ["code", "markdown", "plaintext"] },
                            "bm25_only": { "type": "boolean", "description": "Skip the vector path entirely." },
                            "explain": { "type": "boolean", "description": "Attach a fusion-weight/candidate-count explain block to the top result." }
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "index",
                    "description": "(Re)index a project root: scans the filesystem, diffs against the persisted catalog, and reindexes changed files.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "root_path": { "type": "string" },
                            "force": { "type": "boolean", "description": "Reindex every file regardless of mtime/size match." }
                        },
                        "required": []
                    }
                },
                {
                    "name": "status",
                    "description": "Report server health for a project root: whether the embedder backend is reachable and how many projects are currently loaded.",
                    "inputSchema": { "type": "object", "properties": { "root_path": { "type": "string" } }, "required": [] }
                },
                {
                    "name": "delete",
                    "description": "Delete chunks by id from the metadata store, BM25 index, and vector index.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "root_path": { "type": "string" },
                            "ids": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["ids"]
                    }
                }
            ]
        }
    })
}

fn ok_result(id: Value, payload: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": payload.to_string() }], "isError": false }
    })
}

fn err_result(id: Value, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": [{ "type": "text", "text": message }], "isError": true }
    })
}

async fn dispatch_tool_call(state: &mut ServerState, id: Value, params: &Value, cancel: &CancellationToken) -> Value {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let result = match name {
        "search" => do_search(state, &args, cancel).await,
        "index" => do_index(state, &args, cancel).await,
        "status" => do_status(state, &args, cancel).await,
        "delete" => do_delete(state, &args).await,
        other => Err(format!("unknown tool: {other}")),
    };

    match result {
        Ok(payload) => ok_result(id, payload),
        Err(message) => err_result(id, message),
    }
}

/// Run the stdio JSON-RPC loop until stdin closes. `startup_root` is an
/// optional pre-bootstrapped root (CLI `--root` / `AMANMCP_ROOT`), applied
/// before the first `initialize` arrives.
pub async fn run_stdio_server(startup_root: Option<PathBuf>) -> CoreResult<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    let mut state = ServerState::default();
    state.repo_root = startup_root.map(|p| canonical_or_self(&p));
    let cancel = CancellationToken::new();

    while let Some(line) = lines.next_line().await.map_err(|e| CoreError::Fatal(format!("stdin read: {e}")))? {
        if line.trim().is_empty() {
            continue;
        }
        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if msg.get("id").is_none() {
            continue; // notification: no reply expected
        }
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => {
                if let Some(p) = msg.get("params") {
                    state.capture_init_root(p);
                }
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                        "capabilities": { "tools": { "listChanged": true } },
                        "serverInfo": { "name": "amanmcp", "version": env!("CARGO_PKG_VERSION") }
                    }
                })
            }
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            "tools/list" => tool_list_result(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));
                dispatch_tool_call(&mut state, id, &params, &cancel).await
            }
            "resources/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "resources": [] } }),
            "prompts/list" => json!({ "jsonrpc": "2.0", "id": id, "result": { "prompts": [] } }),
            _ => json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": format!("method not found: {method}") } }),
        };

        let line_out = format!("{reply}\n");
        stdout.write_all(line_out.as_bytes()).await.map_err(|e| CoreError::Fatal(format!("stdout write: {e}")))?;
        stdout.flush().await.map_err(|e| CoreError::Fatal(format!("stdout flush: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_root_rejects_filesystem_root() {
        assert!(is_dead_root(Path::new("/")));
    }

    #[test]
    fn ordinary_path_is_not_dead() {
        assert!(!is_dead_root(Path::new("/home/user/project")));
    }

    #[test]
    fn extracts_unix_file_uri() {
        assert_eq!(extract_path_from_uri("file:///Users/dev/project"), Some(PathBuf::from("/Users/dev/project")));
    }

    #[test]
    fn extracts_windows_file_uri() {
        assert_eq!(extract_path_from_uri("file:///C:/Users/dev/project"), Some(PathBuf::from("C:/Users/dev/project")));
    }

    #[test]
    fn plain_path_passes_through() {
        assert_eq!(extract_path_from_uri("/Users/dev/project"), Some(PathBuf::from("/Users/dev/project")));
    }
}
