use amanmcp::config::load_config;
use amanmcp::error::CoreResult;
use amanmcp::filter::ResultFilter;
use amanmcp::model::ChunkId;
use amanmcp::protocol::run_stdio_server;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "amanmcp")]
#[command(version)]
#[command(about = "Hybrid lexical + semantic code search core (MCP stdio server and CLI)")]
struct Cli {
    /// Project root. Defaults to the current directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the stdio JSON-RPC (MCP) server.
    Mcp,
    /// Run a single search query and print JSON results.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        scope: Vec<String>,
        #[arg(long)]
        bm25_only: bool,
        #[arg(long)]
        explain: bool,
    },
    /// (Re)index a project root.
    Index {
        #[arg(long)]
        force: bool,
    },
    /// Report embedder/index health for a project root.
    Status,
    /// Delete chunks by id.
    Delete {
        ids: Vec<String>,
    },
}

fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf> {
    let root = cli_root.unwrap_or(std::env::current_dir().context("failed to get current dir")?);
    std::fs::canonicalize(&root).with_context(|| format!("resolving root {}", root.display()))
}

async fn open_engine_for_cli(root: &PathBuf) -> CoreResult<amanmcp::engine::Engine> {
    use amanmcp::bm25::Bm25Index;
    use amanmcp::compaction::ActivityTracker;
    use amanmcp::config::index_dir;
    use amanmcp::embed::Embedder;
    use amanmcp::metadata::MetadataStore;
    use amanmcp::vector_index::VectorIndex;
    use std::sync::{Arc, Mutex};

    let dir = index_dir(root);
    std::fs::create_dir_all(&dir).map_err(|e| amanmcp::error::CoreError::Fatal(format!("create {}: {e}", dir.display())))?;
    let config = load_config(root);
    let metadata = Arc::new(MetadataStore::open(&dir.join("metadata.db"))?);
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    let name = root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| root.to_string_lossy().to_string());
    let project = metadata.upsert_project_at(&name, root, now)?;
    let bm25 = Arc::new(Mutex::new(Bm25Index::open(&dir.join("bm25"), &[])?));
    let vector = Arc::new(Mutex::new(VectorIndex::open(&dir.join("vectors"), config.embeddings.dimensions, 200_000)?));
    let embedder = Arc::new(Embedder::from_config(&config.embeddings)?);

    Ok(amanmcp::engine::Engine {
        metadata,
        bm25,
        vector,
        embedder,
        reranker: None,
        config,
        activity: ActivityTracker::new(),
        project,
    })
}

async fn open_coordinator_for_cli(root: &PathBuf) -> CoreResult<amanmcp::coordinator::Coordinator> {
    let engine = open_engine_for_cli(root).await?;
    Ok(amanmcp::coordinator::Coordinator {
        root: root.clone(),
        project: engine.project,
        metadata: engine.metadata,
        bm25: engine.bm25,
        vector: engine.vector,
        embedder: engine.embedder,
        config: engine.config,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new().context("building tokio runtime")?;

    match cli.cmd {
        Command::Mcp => {
            let startup_root = cli.root.clone();
            rt.block_on(run_stdio_server(startup_root))?;
            Ok(())
        }
        Command::Search { query, limit, language, scope, bm25_only, explain } => {
            let root = resolve_root(cli.root)?;
            rt.block_on(async {
                let engine = open_engine_for_cli(&root).await?;
                let cancel = CancellationToken::new();
                let options = amanmcp::engine::SearchOptions {
                    limit,
                    filter: ResultFilter { language, scopes: scope, ..Default::default() },
                    bm25_only,
                    explain,
                    weights: None,
                };
                let hits = engine.search(&query, options, &cancel).await?;
                let json: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|h| {
                        serde_json::json!({
                            "file_path": h.file_path,
                            "start_line": h.start_line,
                            "end_line": h.end_line,
                            "score": h.score,
                            "language": h.language,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json)?);
                Ok::<(), anyhow::Error>(())
            })
        }
        Command::Index { force } => {
            let root = resolve_root(cli.root)?;
            rt.block_on(async {
                let coordinator = open_coordinator_for_cli(&root).await?;
                let cancel = CancellationToken::new();
                let stats = coordinator.index_all(force, &cancel).await?;
                eprintln!("files_indexed={} chunks_indexed={} errors={}", stats.files_indexed, stats.chunks_indexed, stats.errors);
                Ok::<(), anyhow::Error>(())
            })
        }
        Command::Status => {
            let root = resolve_root(cli.root)?;
            rt.block_on(async {
                let engine = open_engine_for_cli(&root).await?;
                let cancel = CancellationToken::new();
                let ready = engine.embedder.available(&cancel).await;
                println!("{}", serde_json::json!({ "embedder_kind": engine.embedder.kind(), "embedder_ready": ready }));
                Ok::<(), anyhow::Error>(())
            })
        }
        Command::Delete { ids } => {
            let root = resolve_root(cli.root)?;
            rt.block_on(async {
                let engine = open_engine_for_cli(&root).await?;
                let chunk_ids: Vec<ChunkId> = ids.into_iter().map(ChunkId).collect();
                engine.delete(&chunk_ids)?;
                Ok::<(), anyhow::Error>(())
            })
        }
    }
}
