//! Lexical index: Okapi BM25 over the document view of chunks, via tantivy.
//!
//! Tokenizer: lowercase, split on non-alphanumeric boundaries plus
//! camelCase/snake_case splits, configurable stopwords, no stemming — an
//! explicit choice (open question in the source material) rather than
//! tantivy's default English analyzer, which stems and would blur exact
//! identifier matches that this search engine depends on. `tokenize()`
//! does this splitting in Rust and is applied identically on the way in
//! (`index_documents`) and on the way out (`search`'s query string), so
//! `content` stays a plain tantivy `TEXT` field — its own simple
//! whitespace/punctuation split over our already-split, already-lowercase
//! tokens is a no-op.

use crate::error::{CoreError, CoreResult};
use crate::model::{ChunkId, Document};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

pub struct Bm25Hit {
    pub doc_id: ChunkId,
    pub score: f32,
    pub matched_terms: Vec<String>,
}

pub struct Bm25Stats {
    pub document_count: u64,
    pub term_count: u64,
    pub average_document_length: f64,
}

struct Fields {
    doc_id: Field,
    content: Field,
    path: Field,
    language: Field,
}

pub struct Bm25Index {
    index: Index,
    fields: Fields,
    writer: Arc<RwLock<IndexWriter>>,
    reader: IndexReader,
    dir: PathBuf,
    stopwords: HashSet<String>,
}

/// Split `camelCase`/`snake_case`/`PascalCase` identifiers into sub-tokens in
/// addition to the whole token, so `handleLogin` matches both `handlelogin`
/// and `handle`/`login` individually.
fn split_identifier(token: &str) -> Vec<String> {
    let mut parts = vec![token.to_string()];
    let mut current = String::new();
    let mut sub = Vec::new();
    let mut prev_lower = false;
    for ch in token.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                sub.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            if !current.is_empty() {
                sub.push(std::mem::take(&mut current));
            }
        }
        current.push(ch.to_ascii_lowercase());
        prev_lower = ch.is_lowercase() || ch.is_numeric();
    }
    if !current.is_empty() {
        sub.push(current);
    }
    if sub.len() > 1 {
        parts.extend(sub);
    }
    parts
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let doc_id = builder.add_text_field("doc_id", STRING | STORED);
    let content = builder.add_text_field("content", TEXT | STORED);
    let path = builder.add_text_field("path", STRING | STORED);
    let language = builder.add_text_field("language", STRING | STORED);
    (builder.build(), Fields { doc_id, content, path, language })
}

impl Bm25Index {
    pub fn open(dir: &Path, stopwords: &[String]) -> CoreResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| CoreError::Fatal(format!("create bm25 dir: {e}")))?;

        let (schema, fields) = build_schema();
        let index = match tantivy::directory::MmapDirectory::open(dir) {
            Ok(mmap_dir) => Index::open_or_create(mmap_dir, schema.clone()).map_err(|e| CoreError::Corruption { store: "bm25", detail: e.to_string() })?,
            Err(e) => return Err(CoreError::Fatal(format!("open bm25 dir: {e}"))),
        };

        let writer: IndexWriter = index.writer(50_000_000).map_err(|e| CoreError::Fatal(format!("open bm25 writer: {e}")))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| CoreError::Fatal(format!("open bm25 reader: {e}")))?;

        Ok(Bm25Index {
            index,
            fields,
            writer: Arc::new(RwLock::new(writer)),
            reader,
            dir: dir.to_path_buf(),
            stopwords: stopwords.iter().map(|s| s.to_lowercase()).collect(),
        })
    }

    /// Rebuild from scratch using the metadata store's document content —
    /// called when the on-disk index is found to be corrupted.
    pub fn rebuild(&mut self, docs: impl Iterator<Item = Document>) -> CoreResult<()> {
        std::fs::remove_dir_all(&self.dir).ok();
        *self = Bm25Index::open(&self.dir, &self.stopwords.iter().cloned().collect::<Vec<_>>())?;
        self.index_documents(docs)
    }

    pub fn index_documents(&mut self, docs: impl Iterator<Item = Document>) -> CoreResult<()> {
        let mut writer = self.writer.write().expect("bm25 writer lock poisoned");
        for document in docs {
            let term = Term::from_field_text(self.fields.doc_id, &document.doc_id.0);
            writer.delete_term(term);
            let indexed_content = self.tokenize(&document.content).join(" ");
            writer
                .add_document(doc!(
                    self.fields.doc_id => document.doc_id.0.clone(),
                    self.fields.content => indexed_content,
                    self.fields.path => document.path,
                    self.fields.language => document.language,
                ))
                .map_err(|e| CoreError::Fatal(format!("bm25 add_document: {e}")))?;
        }
        writer.commit().map_err(|e| CoreError::Fatal(format!("bm25 commit: {e}")))?;
        Ok(())
    }

    pub fn delete(&mut self, ids: &[ChunkId]) -> CoreResult<()> {
        let mut writer = self.writer.write().expect("bm25 writer lock poisoned");
        for id in ids {
            writer.delete_term(Term::from_field_text(self.fields.doc_id, &id.0));
        }
        writer.commit().map_err(|e| CoreError::Fatal(format!("bm25 delete commit: {e}")))?;
        Ok(())
    }

    pub fn search(&self, query: &str, limit: usize) -> CoreResult<Vec<Bm25Hit>> {
        let limit = limit.min(100);
        let tokens = self.tokenize(query);
        if tokens.is_empty() {
            return Ok(vec![]);
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let parsed = parser
            .parse_query(&tokens.join(" "))
            .map_err(|e| CoreError::InvalidInput(format!("bad bm25 query: {e}")))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| CoreError::Corruption { store: "bm25", detail: e.to_string() })?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(addr).map_err(|e| CoreError::Corruption { store: "bm25", detail: e.to_string() })?;
            let Some(id) = retrieved.get_first(self.fields.doc_id).and_then(|v| v.as_str()) else { continue };
            hits.push(Bm25Hit { doc_id: ChunkId(id.to_string()), score, matched_terms: tokens.clone() });
        }
        Ok(hits)
    }

    pub fn stats(&self) -> CoreResult<Bm25Stats> {
        let searcher = self.reader.searcher();
        let document_count = searcher.num_docs();
        let mut term_count = 0u64;
        let mut total_tokens = 0u64;
        for segment in searcher.segment_readers() {
            if let Ok(ii) = segment.inverted_index(self.fields.content) {
                term_count += ii.terms().num_terms() as u64;
                total_tokens += ii.total_num_tokens();
            }
        }
        let average_document_length = if document_count > 0 { total_tokens as f64 / document_count as f64 } else { 0.0 };
        Ok(Bm25Stats { document_count, term_count, average_document_length })
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_').filter(|t| !t.is_empty()) {
            for tok in split_identifier(raw) {
                if !self.stopwords.contains(&tok) {
                    out.push(tok);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_camel_and_snake_case() {
        assert!(split_identifier("handleLogin").contains(&"handle".to_string()));
        assert!(split_identifier("handleLogin").contains(&"login".to_string()));
        assert!(split_identifier("handle_login").contains(&"handle".to_string()));
    }

    #[test]
    fn single_word_token_is_unchanged() {
        let parts = split_identifier("foo");
        assert_eq!(parts, vec!["foo".to_string()]);
    }
}
