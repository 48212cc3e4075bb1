//! The chunker: splits (path, content) into semantic [`Chunk`]s.
//!
//! Three-tier fallback for code: tree-sitter AST (`ast`) → regex symbol
//! extraction (`regex_fallback`) → fixed line windows. Markdown and
//! plain-text content kinds use their own boundary rules (`markdown`,
//! `plaintext`) before the shared token-budget merge/split pass applies.

pub mod ast;
mod markdown;
mod plaintext;
mod regex_fallback;

use crate::config::IndexerConfig;
use crate::model::{Chunk, ChunkId, ContentKind, FileId, Symbol, SymbolKind};
use std::path::Path;

/// All three tiers failed to produce any chunk for this file.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("parse skipped: no tier produced a chunk")]
pub struct ParseSkipped;

/// A candidate region of a file: half-open `[start, end)` 0-indexed lines,
/// optionally carrying the symbol that introduced it.
#[derive(Debug, Clone)]
struct Region {
    start: u32,
    end: u32,
    label: Option<(String, SymbolKind)>,
}

const MAX_SAFE_LINE_CHARS: usize = 2_000;

/// Heuristic match for minified/generated output: any of the first 5
/// non-empty lines exceeding a sane width. Parsing such files wastes CPU
/// and produces meaningless chunk boundaries.
fn looks_minified_or_generated(content: &str) -> bool {
    content.lines().filter(|l| !l.trim().is_empty()).take(5).any(|l| l.len() > MAX_SAFE_LINE_CHARS)
}

pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx"];
const PLAINTEXT_EXTENSIONS: &[&str] = &["txt", "text", "log"];

fn content_kind_for(path: &Path) -> ContentKind {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    if MARKDOWN_EXTENSIONS.contains(&ext.as_str()) {
        ContentKind::Markdown
    } else if ast::language_config().driver_for_path(path).is_some() {
        ContentKind::Code
    } else if PLAINTEXT_EXTENSIONS.contains(&ext.as_str()) || ext.is_empty() {
        ContentKind::PlainText
    } else {
        // Unknown extension: treat as plain text rather than silently dropping it.
        ContentKind::PlainText
    }
}

fn language_tag_for(path: &Path, kind: ContentKind) -> String {
    match kind {
        ContentKind::Markdown => "markdown".to_string(),
        ContentKind::PlainText => "text".to_string(),
        ContentKind::Code => ast::language_config()
            .driver_for_path(path)
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Greedily group regions so each group's estimated token count stays under
/// `max_tokens`, splitting any single region that alone exceeds the budget
/// into fixed-size line windows; then merge adjacent groups whose combined
/// tokens fall under `min_tokens`, provided their line ranges stay contiguous.
fn group_regions(regions: &[Region], source_lines: &[&str], max_tokens: usize, min_tokens: usize) -> Vec<(u32, u32, Vec<(String, SymbolKind)>)> {
    let region_text = |start: u32, end: u32| -> String {
        let s = start as usize;
        let e = (end as usize).min(source_lines.len());
        if s >= e {
            String::new()
        } else {
            source_lines[s..e].join("\n")
        }
    };

    // Tier A: split any region too large for one chunk into sub-windows.
    let mut split_regions: Vec<Region> = Vec::new();
    for region in regions {
        let tokens = estimate_tokens(&region_text(region.start, region.end));
        if tokens <= max_tokens || region.end <= region.start {
            split_regions.push(region.clone());
            continue;
        }
        let total_lines = region.end - region.start;
        let lines_per_window = ((max_tokens as u64 * total_lines as u64) / tokens.max(1) as u64).max(1) as u32;
        let mut cursor = region.start;
        let mut first = true;
        while cursor < region.end {
            let window_end = (cursor + lines_per_window).min(region.end);
            split_regions.push(Region {
                start: cursor,
                end: window_end,
                label: if first { region.label.clone() } else { None },
            });
            first = false;
            cursor = window_end;
        }
    }

    // Tier B: greedily accumulate adjacent regions while under budget.
    let mut groups: Vec<(u32, u32, Vec<(String, SymbolKind)>)> = Vec::new();
    let mut cur_start: Option<u32> = None;
    let mut cur_end = 0u32;
    let mut cur_labels: Vec<(String, SymbolKind)> = Vec::new();

    for region in &split_regions {
        if region.start >= region.end {
            continue;
        }
        match cur_start {
            None => {
                cur_start = Some(region.start);
                cur_end = region.end;
                if let Some(l) = &region.label {
                    cur_labels.push(l.clone());
                }
            }
            Some(s) => {
                let projected = estimate_tokens(&region_text(s, region.end));
                if projected > max_tokens && cur_end > s {
                    groups.push((s, cur_end, std::mem::take(&mut cur_labels)));
                    cur_start = Some(region.start);
                    cur_end = region.end;
                    if let Some(l) = &region.label {
                        cur_labels.push(l.clone());
                    }
                } else {
                    cur_end = region.end;
                    if let Some(l) = &region.label {
                        cur_labels.push(l.clone());
                    }
                }
            }
        }
    }
    if let Some(s) = cur_start {
        groups.push((s, cur_end, cur_labels));
    }

    // Tier C: merge adjacent groups under min_tokens, provided ranges stay contiguous.
    let mut merged: Vec<(u32, u32, Vec<(String, SymbolKind)>)> = Vec::new();
    for (start, end, labels) in groups {
        if let Some(last) = merged.last_mut() {
            let combined_tokens = estimate_tokens(&region_text(last.0, end));
            if last.1 == start && combined_tokens < min_tokens {
                last.1 = end;
                last.2.extend(labels);
                continue;
            }
        }
        merged.push((start, end, labels));
    }

    merged
}

fn make_chunk(
    path: &Path,
    rel_path: &str,
    file_id: FileId,
    source_lines: &[&str],
    start: u32,
    end: u32,
    labels: Vec<(String, SymbolKind)>,
    kind: ContentKind,
    language: &str,
    context_prefix: Option<&str>,
) -> Chunk {
    let s = start as usize;
    let e = (end as usize).min(source_lines.len());
    let content = source_lines[s..e].join("\n");
    let start_line_1based = start + 1;
    let end_line_1based = end.max(start + 1);

    Chunk {
        id: ChunkId::new(rel_path, start_line_1based, end_line_1based, &content),
        file_id,
        path: path.to_path_buf(),
        content,
        context_prefix: context_prefix.map(str::to_string),
        kind,
        language: language.to_string(),
        start_line: start_line_1based,
        end_line: end_line_1based,
        symbols: labels.into_iter().map(|(name, kind)| Symbol { name, kind }).collect(),
    }
}

/// Chunk a single file's text. `rel_path` is used only to key the chunk id
/// (stable across absolute-path relocation of the project root).
pub fn chunk_file(path: &Path, rel_path: &str, content: &str, file_id: FileId, cfg: &IndexerConfig) -> Result<Vec<Chunk>, ParseSkipped> {
    if content.as_bytes().len() as u64 > cfg.max_file_size {
        tracing::warn!(path = %path.display(), "file exceeds max_file_size, skipping");
        return Err(ParseSkipped);
    }
    if is_binary(content.as_bytes()) {
        return Err(ParseSkipped);
    }
    if content.trim().is_empty() {
        return Err(ParseSkipped);
    }

    let kind = content_kind_for(path);
    let language = language_tag_for(path, kind);
    let source_lines: Vec<&str> = content.lines().collect();
    let total_lines = source_lines.len() as u32;

    let (regions, context_prefix): (Vec<Region>, Option<String>) = match kind {
        ContentKind::Markdown => (markdown::header_regions(&source_lines), None),
        ContentKind::PlainText => (plaintext::paragraph_regions(&source_lines), None),
        ContentKind::Code => {
            if looks_minified_or_generated(content) {
                return Err(ParseSkipped);
            }
            if let Some((symbols, prefix)) = ast::parse(path, content) {
                let regions = symbols_to_regions(&symbols, total_lines);
                if regions.is_empty() {
                    (fixed_windows(total_lines, cfg.max_chunk_tokens, &source_lines), prefix)
                } else {
                    (regions, prefix)
                }
            } else {
                let regions = regex_fallback::symbol_regions(&source_lines);
                if regions.is_empty() {
                    (fixed_windows(total_lines, cfg.max_chunk_tokens, &source_lines), None)
                } else {
                    (regions, None)
                }
            }
        }
    };

    if regions.is_empty() {
        return Err(ParseSkipped);
    }

    let groups = group_regions(&regions, &source_lines, cfg.max_chunk_tokens, cfg.min_chunk_tokens);
    if groups.is_empty() {
        return Err(ParseSkipped);
    }

    Ok(groups
        .into_iter()
        .map(|(start, end, labels)| {
            make_chunk(path, rel_path, file_id, &source_lines, start, end, labels, kind, &language, context_prefix.as_deref())
        })
        .collect())
}

fn symbols_to_regions(symbols: &[ast::RawSymbol], total_lines: u32) -> Vec<Region> {
    let mut regions = Vec::new();
    if let Some(first) = symbols.first() {
        if first.line > 0 {
            regions.push(Region { start: 0, end: first.line, label: None });
        }
    }
    for (i, sym) in symbols.iter().enumerate() {
        let end = symbols.get(i + 1).map(|s| s.line).unwrap_or(total_lines).min(total_lines);
        let start = sym.line.min(end);
        regions.push(Region {
            start,
            end,
            label: Some((sym.name.clone(), SymbolKind::parse(sym.kind))),
        });
    }
    regions
}

fn fixed_windows(total_lines: u32, max_tokens: usize, source_lines: &[&str]) -> Vec<Region> {
    // Rough lines-per-window: assume ~8 chars/line average -> 2 tokens/line.
    let approx_lines_per_window = ((max_tokens as u64) / 2).clamp(10, 400) as u32;
    let _ = source_lines;
    let mut regions = Vec::new();
    let mut start = 0u32;
    while start < total_lines {
        let end = (start + approx_lines_per_window).min(total_lines);
        regions.push(Region { start, end, label: None });
        start = end;
    }
    if regions.is_empty() && total_lines > 0 {
        regions.push(Region { start: 0, end: total_lines, label: None });
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;

    fn cfg() -> IndexerConfig {
        IndexerConfig { max_chunk_tokens: 1500, min_chunk_tokens: 500, ..IndexerConfig::default() }
    }

    #[test]
    fn chunking_is_deterministic() {
        let content = "fn one() {\n    1\n}\n\nfn two() {\n    2\n}\n";
        let a = chunk_file(Path::new("a.rs"), "a.rs", content, FileId(1), &cfg()).unwrap();
        let b = chunk_file(Path::new("a.rs"), "a.rs", content, FileId(1), &cfg()).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.start_line, y.start_line);
            assert_eq!(x.end_line, y.end_line);
        }
    }

    #[test]
    fn binary_file_is_skipped() {
        let content = "hello\0world";
        let err = chunk_file(Path::new("a.bin"), "a.bin", content, FileId(1), &cfg());
        assert!(err.is_err());
    }

    #[test]
    fn oversized_file_is_skipped() {
        let mut small_cfg = cfg();
        small_cfg.max_file_size = 4;
        let err = chunk_file(Path::new("a.txt"), "a.txt", "hello world", FileId(1), &small_cfg);
        assert!(err.is_err());
    }

    #[test]
    fn line_ranges_are_contiguous_and_ordered() {
        let content = "fn one() {\n    1\n}\n\nfn two() {\n    2\n}\n\nfn three() {\n    3\n}\n";
        let chunks = chunk_file(Path::new("a.rs"), "a.rs", content, FileId(1), &cfg()).unwrap();
        for w in chunks.windows(2) {
            assert!(w[0].end_line < w[1].start_line || w[0].end_line == w[1].start_line - 1 + 1);
            assert!(w[0].start_line <= w[0].end_line);
        }
    }

    #[test]
    fn markdown_splits_on_headers() {
        let content = "# Title\nbody\n## Sub\nmore body\n";
        let chunks = chunk_file(Path::new("a.md"), "a.md", content, FileId(1), &cfg()).unwrap();
        assert!(chunks.iter().all(|c| matches!(c.kind, ContentKind::Markdown)));
        assert!(!chunks.is_empty());
    }
}
