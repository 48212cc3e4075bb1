//! Core data types shared across the chunker, stores, and search engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

/// Hash of (file path, start line, end line, content) — stable across re-runs
/// as long as the chunk's text and position do not change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(rel_path: &str, start_line: u32, end_line: u32, content: &str) -> Self {
        let digest = xxhash_rust::xxh3::xxh3_64(
            format!("{rel_path}:{start_line}:{end_line}:{content}").as_bytes(),
        );
        ChunkId(format!("{digest:016x}"))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Code,
    Markdown,
    PlainText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Type,
    Variable,
    Constant,
    Class,
    Interface,
    Enum,
    Trait,
    Struct,
    Module,
    Service,
    Other,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Trait => "trait",
            SymbolKind::Struct => "struct",
            SymbolKind::Module => "module",
            SymbolKind::Service => "service",
            SymbolKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl SymbolKind {
    pub fn parse(s: &str) -> SymbolKind {
        match s {
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            "type" => SymbolKind::Type,
            "variable" => SymbolKind::Variable,
            "constant" => SymbolKind::Constant,
            "class" => SymbolKind::Class,
            "interface" => SymbolKind::Interface,
            "enum" => SymbolKind::Enum,
            "trait" => SymbolKind::Trait,
            "struct" => SymbolKind::Struct,
            "module" => SymbolKind::Module,
            "service" => SymbolKind::Service,
            _ => SymbolKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

/// The universal unit produced by the chunker and consumed by all three stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub file_id: FileId,
    pub path: PathBuf,
    pub content: String,
    /// File-level context (package/module line, imports) prefixed ahead of `content`
    /// when formatting for embedding or display; not counted in line ranges.
    pub context_prefix: Option<String>,
    pub kind: ContentKind,
    pub language: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive.
    pub end_line: u32,
    pub symbols: Vec<Symbol>,
}

impl Chunk {
    /// Text as sent to the embedder: context prefix, then content.
    pub fn embedding_text(&self) -> String {
        match &self.context_prefix {
            Some(p) if !p.is_empty() => format!("{p}\n{}", self.content),
            _ => self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub project_id: ProjectId,
    /// Relative to the project root.
    pub path: PathBuf,
    pub content_hash: String,
    pub size_bytes: u64,
    pub mtime_unix: i64,
    pub last_indexed_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub root: PathBuf,
    pub created_unix: i64,
    pub updated_unix: i64,
}

/// BM25 view of a chunk.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: ChunkId,
    pub content: String,
    pub path: String,
    pub language: String,
}

/// ANN view of a chunk.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: ChunkId,
    pub vector: Vec<f32>,
}

/// Derived, never stored: nearest chunks before/after a target within the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacentContext {
    pub before: Vec<Chunk>,
    pub after: Vec<Chunk>,
}

pub const RESERVED_STATE_INDEX_DIMENSION: &str = "index_dimension";
pub const RESERVED_STATE_INDEX_MODEL: &str = "index_model";
pub const RESERVED_STATE_GITIGNORE_HASH: &str = "gitignore_hash";
pub const RESERVED_STATE_CHECKPOINT: &str = "checkpoint";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCheckpoint {
    pub project: String,
    pub processed: u64,
    pub total: u64,
    pub phase: String,
}

/// Compute the xxh3 hex digest of raw bytes — used for file-level change detection.
#[inline]
pub fn xxh3_hex(bytes: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable_for_same_inputs() {
        let a = ChunkId::new("src/lib.rs", 1, 10, "fn main() {}");
        let b = ChunkId::new("src/lib.rs", 1, 10, "fn main() {}");
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_differs_when_content_changes() {
        let a = ChunkId::new("src/lib.rs", 1, 10, "fn main() {}");
        let b = ChunkId::new("src/lib.rs", 1, 10, "fn main() { todo!() }");
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_id_differs_when_lines_or_path_change() {
        let base = ChunkId::new("src/lib.rs", 1, 10, "fn main() {}");
        assert_ne!(base, ChunkId::new("src/lib.rs", 2, 10, "fn main() {}"));
        assert_ne!(base, ChunkId::new("src/lib.rs", 1, 11, "fn main() {}"));
        assert_ne!(base, ChunkId::new("src/other.rs", 1, 10, "fn main() {}"));
    }

    #[test]
    fn chunk_id_display_matches_inner_string() {
        let id = ChunkId::new("a.rs", 1, 1, "x");
        assert_eq!(id.to_string(), id.0);
    }

    #[test]
    fn symbol_kind_parse_round_trips_through_display() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Method,
            SymbolKind::Type,
            SymbolKind::Variable,
            SymbolKind::Constant,
            SymbolKind::Class,
            SymbolKind::Interface,
            SymbolKind::Enum,
            SymbolKind::Trait,
            SymbolKind::Struct,
            SymbolKind::Module,
            SymbolKind::Service,
        ] {
            assert_eq!(SymbolKind::parse(&kind.to_string()), kind);
        }
    }

    #[test]
    fn symbol_kind_parse_defaults_to_other_for_unknown_strings() {
        assert_eq!(SymbolKind::parse("whatever"), SymbolKind::Other);
    }

    #[test]
    fn xxh3_hex_is_deterministic_and_content_sensitive() {
        assert_eq!(xxh3_hex(b"hello"), xxh3_hex(b"hello"));
        assert_ne!(xxh3_hex(b"hello"), xxh3_hex(b"hellp"));
    }

    #[test]
    fn embedding_text_prefixes_context_when_present() {
        let chunk = Chunk {
            id: ChunkId::new("a.rs", 1, 1, "fn x() {}"),
            file_id: FileId(1),
            path: PathBuf::from("a.rs"),
            content: "fn x() {}".to_string(),
            context_prefix: Some("mod a;".to_string()),
            kind: ContentKind::Code,
            language: "rust".to_string(),
            start_line: 1,
            end_line: 1,
            symbols: vec![],
        };
        assert_eq!(chunk.embedding_text(), "mod a;\nfn x() {}");
    }

    #[test]
    fn embedding_text_skips_empty_context_prefix() {
        let chunk = Chunk {
            id: ChunkId::new("a.rs", 1, 1, "fn x() {}"),
            file_id: FileId(1),
            path: PathBuf::from("a.rs"),
            content: "fn x() {}".to_string(),
            context_prefix: Some(String::new()),
            kind: ContentKind::Code,
            language: "rust".to_string(),
            start_line: 1,
            end_line: 1,
            symbols: vec![],
        };
        assert_eq!(chunk.embedding_text(), "fn x() {}");
    }
}
