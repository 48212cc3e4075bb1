//! Post-fusion filtering and result enrichment (§4.14): content-kind,
//! language, symbol-kind and path-scope filters (all AND'd together),
//! highlight-range computation, and adjacent-context lookup.

use crate::model::{Chunk, ContentKind, SymbolKind};

#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    /// `"code"`, `"docs"`, or `"all"` (no-op); any other value is also a no-op.
    pub content_kind: Option<String>,
    pub language: Option<String>,
    pub symbol_kind: Option<SymbolKind>,
    /// Non-empty list of path prefixes; a chunk passes if its path is under
    /// any one of them (OR across prefixes).
    pub scopes: Vec<String>,
}

impl ResultFilter {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(kind) = &self.content_kind {
            match kind.as_str() {
                "code" => {
                    if chunk.kind != ContentKind::Code {
                        return false;
                    }
                }
                "docs" => {
                    if chunk.kind != ContentKind::Markdown {
                        return false;
                    }
                }
                _ => {}
            }
        }
        if let Some(language) = &self.language {
            if &chunk.language != language {
                return false;
            }
        }
        if let Some(kind) = self.symbol_kind {
            if !chunk.symbols.iter().any(|s| s.kind == kind) {
                return false;
            }
        }
        if !self.scopes.is_empty() {
            let path_str = chunk.path.to_string_lossy();
            let under_any = self.scopes.iter().any(|prefix| {
                let prefix = prefix.trim_start_matches("./").trim_end_matches('/');
                // Component-boundary match: "src" must cover "src/a.rs" but
                // not a sibling "src-legacy/a.rs" or a file named "srca.rs".
                path_str == prefix || path_str.starts_with(&format!("{prefix}/"))
            });
            if !under_any {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub start_offset: usize,
    pub length: usize,
}

/// Byte ranges in `content` covering case-insensitive whole-token matches of
/// any term in `terms`. Empty input yields an empty, non-null list.
pub fn compute_highlights(content: &str, terms: &[String]) -> Vec<Highlight> {
    if terms.is_empty() || content.is_empty() {
        return vec![];
    }
    let lower_content = content.to_lowercase();
    let mut out = Vec::new();
    for term in terms {
        let term_lower = term.to_lowercase();
        if term_lower.is_empty() {
            continue;
        }
        let mut search_from = 0;
        while let Some(pos) = lower_content[search_from..].find(&term_lower) {
            let start = search_from + pos;
            out.push(Highlight { start_offset: start, length: term_lower.len() });
            search_from = start + term_lower.len().max(1);
        }
    }
    out.sort_by_key(|h| h.start_offset);
    out.dedup();
    out
}

/// Adjacent chunks in the same file, nearest-first on each side of
/// `target`'s line range. `all_in_file` need not be sorted.
pub fn adjacent_context<'a>(target: &Chunk, all_in_file: &'a [Chunk], count: usize) -> (Vec<&'a Chunk>, Vec<&'a Chunk>) {
    if count == 0 {
        return (vec![], vec![]);
    }
    let mut before: Vec<&Chunk> = all_in_file.iter().filter(|c| c.id != target.id && c.end_line <= target.start_line).collect();
    before.sort_by_key(|c| std::cmp::Reverse(c.end_line));
    before.truncate(count);
    before.reverse();

    let mut after: Vec<&Chunk> = all_in_file.iter().filter(|c| c.id != target.id && c.start_line >= target.end_line).collect();
    after.sort_by_key(|c| c.start_line);
    after.truncate(count);

    (before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkId, FileId, Symbol};
    use std::path::PathBuf;

    fn chunk(id: &str, lang: &str, kind: ContentKind, start: u32, end: u32) -> Chunk {
        Chunk {
            id: ChunkId(id.to_string()),
            file_id: FileId(1),
            path: PathBuf::from("src/a.rs"),
            content: "fn handle_login() {}".to_string(),
            context_prefix: None,
            kind,
            language: lang.to_string(),
            start_line: start,
            end_line: end,
            symbols: vec![Symbol { name: "handle_login".to_string(), kind: SymbolKind::Function }],
        }
    }

    #[test]
    fn content_kind_code_excludes_markdown() {
        let filter = ResultFilter { content_kind: Some("code".to_string()), ..Default::default() };
        assert!(!filter.matches(&chunk("a", "rust", ContentKind::Markdown, 1, 2)));
        assert!(filter.matches(&chunk("a", "rust", ContentKind::Code, 1, 2)));
    }

    #[test]
    fn all_is_a_no_op() {
        let filter = ResultFilter { content_kind: Some("all".to_string()), ..Default::default() };
        assert!(filter.matches(&chunk("a", "rust", ContentKind::Markdown, 1, 2)));
    }

    #[test]
    fn symbol_kind_requires_a_match() {
        let filter = ResultFilter { symbol_kind: Some(SymbolKind::Class), ..Default::default() };
        assert!(!filter.matches(&chunk("a", "rust", ContentKind::Code, 1, 2)));
    }

    #[test]
    fn scope_filter_is_or_across_prefixes() {
        let filter = ResultFilter { scopes: vec!["lib".to_string(), "src".to_string()], ..Default::default() };
        assert!(filter.matches(&chunk("a", "rust", ContentKind::Code, 1, 2)));
    }

    #[test]
    fn scope_filter_respects_path_component_boundaries() {
        let filter = ResultFilter { scopes: vec!["src".to_string()], ..Default::default() };
        let mut sibling = chunk("a", "rust", ContentKind::Code, 1, 2);
        sibling.path = PathBuf::from("src-legacy/a.rs");
        assert!(!filter.matches(&sibling));

        let mut same_name_file = chunk("a", "rust", ContentKind::Code, 1, 2);
        same_name_file.path = PathBuf::from("srca.rs");
        assert!(!filter.matches(&same_name_file));

        let mut exact_file_scope = chunk("a", "rust", ContentKind::Code, 1, 2);
        exact_file_scope.path = PathBuf::from("src/a.rs");
        let file_filter = ResultFilter { scopes: vec!["src/a.rs".to_string()], ..Default::default() };
        assert!(file_filter.matches(&exact_file_scope));
    }

    #[test]
    fn highlights_find_every_occurrence() {
        let hits = compute_highlights("fn handle_login() { handle_login(); }", &["handle_login".to_string()]);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn highlights_are_empty_for_empty_input() {
        assert!(compute_highlights("", &["x".to_string()]).is_empty());
        assert!(compute_highlights("text", &[]).is_empty());
    }

    #[test]
    fn adjacent_context_picks_nearest_on_each_side() {
        let target = chunk("mid", "rust", ContentKind::Code, 10, 20);
        let all = vec![
            chunk("far_before", "rust", ContentKind::Code, 1, 5),
            chunk("near_before", "rust", ContentKind::Code, 6, 9),
            chunk("mid", "rust", ContentKind::Code, 10, 20),
            chunk("near_after", "rust", ContentKind::Code, 21, 25),
            chunk("far_after", "rust", ContentKind::Code, 26, 30),
        ];
        let (before, after) = adjacent_context(&target, &all, 1);
        assert_eq!(before[0].id.0, "near_before");
        assert_eq!(after[0].id.0, "near_after");
    }
}
