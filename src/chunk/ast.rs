//! Per-language tree-sitter drivers for the AST chunking tier.
//!
//! Each driver answers two questions for a parsed file: what are its
//! top-level symbols (for chunk boundaries), and what does its import/package
//! header look like (for the context prefix carried into every chunk of that
//! file). Body pruning and skeleton rendering are a different product and are
//! not part of this driver set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

/// A top-level declaration found by a driver. Lines are 0-indexed, matching
/// tree-sitter's native coordinates; the chunker converts to 1-based ranges.
#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub kind: &'static str,
    pub line: u32,
    pub line_end: u32,
}

pub trait LanguageDriver: Send + Sync {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn handles_path(&self, path: &Path) -> bool;
    fn language_for_path(&self, path: &Path) -> Language;

    fn find_imports(&self, _source: &[u8], _root: Node, _language: &Language) -> Vec<String> {
        vec![]
    }

    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol>;
}

fn path_ext_lower(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

fn file_name_lower(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_lowercase()
}

fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

fn strip_string_quotes(s: &str) -> String {
    let t = s.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        let (first, last) = (bytes[0], bytes[t.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') || (first == b'`' && last == b'`') {
            return t[1..t.len() - 1].to_string();
        }
    }
    t.to_string()
}

fn dedup_sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v.dedup();
    v
}

fn run_query_strings(source: &[u8], root: Node, language: &Language, query_src: &str, cap: &str) -> Vec<String> {
    let Ok(query) = Query::new(language, query_src) else { return vec![] };
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        for capture in m.captures {
            if query.capture_names()[capture.index as usize] != cap {
                continue;
            }
            let text = node_text(source, capture.node).trim().to_string();
            if !text.is_empty() {
                out.push(text);
            }
        }
    }
    out
}

fn run_query_symbols(source: &[u8], root: Node, language: &Language, query_src: &str, kind: &'static str) -> Vec<RawSymbol> {
    let Ok(query) = Query::new(language, query_src) else { return vec![] };
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut def_node: Option<Node> = None;
        for capture in m.captures {
            match query.capture_names()[capture.index as usize] {
                "name" => name_node = Some(capture.node),
                "def" => def_node = Some(capture.node),
                _ => {}
            }
        }
        let Some(name_node) = name_node else { continue };
        let def_node = def_node.unwrap_or(name_node);
        let name = node_text(source, name_node).trim().to_string();
        if name.is_empty() {
            continue;
        }
        out.push(RawSymbol {
            name,
            kind,
            line: def_node.start_position().row as u32,
            line_end: def_node.end_position().row as u32,
        });
    }
    out
}

struct RustDriver;
impl LanguageDriver for RustDriver {
    fn name(&self) -> &'static str {
        "rust"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "rs"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_rust::language()
    }
    fn find_imports(&self, source: &[u8], root: Node, language: &Language) -> Vec<String> {
        dedup_sorted(run_query_strings(source, root, language, r#"(use_declaration argument: (_) @path)"#, "path"))
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(function_item name: (identifier) @name) @def"#, "function"));
        symbols.extend(run_query_symbols(source, root, language, r#"(struct_item name: (type_identifier) @name) @def"#, "struct"));
        symbols.extend(run_query_symbols(source, root, language, r#"(enum_item name: (type_identifier) @name) @def"#, "enum"));
        symbols.extend(run_query_symbols(source, root, language, r#"(trait_item name: (type_identifier) @name) @def"#, "trait"));
        symbols.extend(run_query_symbols(
            source,
            root,
            language,
            r#"(impl_item type: (type_identifier) @name) @def"#,
            "type",
        ));
        symbols
    }
}

struct TypeScriptDriver;
impl LanguageDriver for TypeScriptDriver {
    fn name(&self) -> &'static str {
        "typescript"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        let ext = path_ext_lower(path);
        matches!(ext.as_str(), "ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs") || file_name_lower(path).ends_with(".d.ts")
    }
    fn language_for_path(&self, path: &Path) -> Language {
        let ext = path_ext_lower(path);
        if ext == "tsx" || ext == "jsx" {
            tree_sitter_typescript::language_tsx()
        } else {
            tree_sitter_typescript::language_typescript()
        }
    }
    fn find_imports(&self, source: &[u8], root: Node, language: &Language) -> Vec<String> {
        let raw = run_query_strings(source, root, language, r#"(import_statement source: (string) @src)"#, "src");
        dedup_sorted(raw.into_iter().map(|s| strip_string_quotes(&s)).collect())
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(function_declaration name: (identifier) @name) @def"#, "function"));
        symbols.extend(run_query_symbols(
            source,
            root,
            language,
            r#"(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function))) @def"#,
            "function",
        ));
        symbols.extend(run_query_symbols(source, root, language, r#"(class_declaration name: (type_identifier) @name) @def"#, "class"));
        symbols.extend(run_query_symbols(source, root, language, r#"(method_definition name: (property_identifier) @name) @def"#, "method"));
        symbols
    }
}

struct PythonDriver;
impl LanguageDriver for PythonDriver {
    fn name(&self) -> &'static str {
        "python"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "py"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_python::language()
    }
    fn find_imports(&self, source: &[u8], root: Node, language: &Language) -> Vec<String> {
        let mut out = run_query_strings(source, root, language, r#"(import_statement name: (dotted_name) @path)"#, "path");
        out.extend(run_query_strings(source, root, language, r#"(import_from_statement module_name: (dotted_name) @path)"#, "path"));
        dedup_sorted(out)
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(function_definition name: (identifier) @name) @def"#, "function"));
        symbols.extend(run_query_symbols(source, root, language, r#"(class_definition name: (identifier) @name) @def"#, "class"));
        symbols
    }
}

#[cfg(feature = "lang-go")]
struct GoDriver;
#[cfg(feature = "lang-go")]
impl LanguageDriver for GoDriver {
    fn name(&self) -> &'static str {
        "go"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "go"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_go::language()
    }
    fn find_imports(&self, source: &[u8], root: Node, language: &Language) -> Vec<String> {
        let mut out = run_query_strings(source, root, language, r#"(import_spec (interpreted_string_literal) @src)"#, "src");
        out.extend(run_query_strings(source, root, language, r#"(import_spec (raw_string_literal) @src)"#, "src"));
        dedup_sorted(out.into_iter().map(|s| strip_string_quotes(&s)).collect())
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(function_declaration name: (identifier) @name) @def"#, "function"));
        symbols.extend(run_query_symbols(source, root, language, r#"(method_declaration name: (field_identifier) @name) @def"#, "method"));
        symbols.extend(run_query_symbols(source, root, language, r#"(type_spec name: (type_identifier) @name) @def"#, "type"));
        symbols
    }
}

#[cfg(feature = "lang-dart")]
struct DartDriver;
#[cfg(feature = "lang-dart")]
impl LanguageDriver for DartDriver {
    fn name(&self) -> &'static str {
        "dart"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["dart"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "dart"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_dart::language()
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(class_definition name: (identifier) @name) @def"#, "class"));
        symbols.extend(run_query_symbols(source, root, language, r#"(enum_declaration name: (identifier) @name) @def"#, "enum"));
        symbols.extend(run_query_symbols(source, root, language, r#"(mixin_declaration (identifier) @name) @def"#, "type"));
        symbols.extend(run_query_symbols(source, root, language, r#"(function_signature name: (identifier) @name) @def"#, "function"));
        symbols.extend(run_query_symbols(
            source,
            root,
            language,
            r#"(method_signature (function_signature name: (identifier) @name)) @def"#,
            "method",
        ));
        symbols
    }
}

#[cfg(feature = "lang-java")]
struct JavaDriver;
#[cfg(feature = "lang-java")]
impl LanguageDriver for JavaDriver {
    fn name(&self) -> &'static str {
        "java"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "java"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_java::language()
    }
    fn find_imports(&self, source: &[u8], root: Node, language: &Language) -> Vec<String> {
        dedup_sorted(run_query_strings(source, root, language, r#"(import_declaration (scoped_identifier) @path)"#, "path"))
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(class_declaration (identifier) @name) @def"#, "class"));
        symbols.extend(run_query_symbols(source, root, language, r#"(interface_declaration (identifier) @name) @def"#, "interface"));
        symbols.extend(run_query_symbols(source, root, language, r#"(enum_declaration name: (identifier) @name) @def"#, "enum"));
        symbols.extend(run_query_symbols(source, root, language, r#"(method_declaration (identifier) @name) @def"#, "method"));
        symbols.extend(run_query_symbols(source, root, language, r#"(constructor_declaration (identifier) @name) @def"#, "method"));
        symbols
    }
}

#[cfg(feature = "lang-csharp")]
struct CSharpDriver;
#[cfg(feature = "lang-csharp")]
impl LanguageDriver for CSharpDriver {
    fn name(&self) -> &'static str {
        "csharp"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["cs"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "cs"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_c_sharp::language()
    }
    fn find_imports(&self, source: &[u8], root: Node, language: &Language) -> Vec<String> {
        let mut out = run_query_strings(source, root, language, r#"(using_directive (identifier) @path)"#, "path");
        out.extend(run_query_strings(source, root, language, r#"(using_directive (qualified_name) @path)"#, "path"));
        dedup_sorted(out)
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(class_declaration name: (identifier) @name) @def"#, "class"));
        symbols.extend(run_query_symbols(source, root, language, r#"(struct_declaration name: (identifier) @name) @def"#, "struct"));
        symbols.extend(run_query_symbols(source, root, language, r#"(interface_declaration name: (identifier) @name) @def"#, "interface"));
        symbols.extend(run_query_symbols(source, root, language, r#"(enum_declaration name: (identifier) @name) @def"#, "enum"));
        symbols.extend(run_query_symbols(source, root, language, r#"(method_declaration name: (identifier) @name) @def"#, "method"));
        symbols.extend(run_query_symbols(source, root, language, r#"(constructor_declaration name: (identifier) @name) @def"#, "method"));
        symbols
    }
}

#[cfg(feature = "lang-php")]
struct PhpDriver;
#[cfg(feature = "lang-php")]
impl LanguageDriver for PhpDriver {
    fn name(&self) -> &'static str {
        "php"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["php"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "php"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_php::LANGUAGE_PHP.into()
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(class_declaration name: (name) @name) @def"#, "class"));
        symbols.extend(run_query_symbols(source, root, language, r#"(interface_declaration name: (name) @name) @def"#, "interface"));
        symbols.extend(run_query_symbols(source, root, language, r#"(trait_declaration name: (name) @name) @def"#, "trait"));
        symbols.extend(run_query_symbols(source, root, language, r#"(function_definition name: (name) @name) @def"#, "function"));
        symbols.extend(run_query_symbols(source, root, language, r#"(method_declaration name: (name) @name) @def"#, "method"));
        symbols
    }
}

#[cfg(feature = "lang-proto")]
struct ProtoDriver;
#[cfg(feature = "lang-proto")]
impl LanguageDriver for ProtoDriver {
    fn name(&self) -> &'static str {
        "proto"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["proto"]
    }
    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "proto"
    }
    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_proto::LANGUAGE.into()
    }
    fn extract_symbols(&self, source: &[u8], root: Node, language: &Language) -> Vec<RawSymbol> {
        let mut symbols = Vec::new();
        symbols.extend(run_query_symbols(source, root, language, r#"(service (service_name (identifier) @name)) @def"#, "service"));
        symbols.extend(run_query_symbols(source, root, language, r#"(message (message_name (identifier) @name)) @def"#, "type"));
        symbols.extend(run_query_symbols(source, root, language, r#"(enum (enum_name (identifier) @name)) @def"#, "enum"));
        symbols.extend(run_query_symbols(source, root, language, r#"(rpc (rpc_name (identifier) @name)) @def"#, "function"));
        symbols
    }
}

pub struct LanguageConfig {
    drivers: Vec<Box<dyn LanguageDriver>>,
    by_ext: HashMap<String, usize>,
}

impl LanguageConfig {
    pub fn driver_for_path(&self, path: &Path) -> Option<&dyn LanguageDriver> {
        let ext = path_ext_lower(path);
        if let Some(&idx) = self.by_ext.get(&ext) {
            if let Some(d) = self.drivers.get(idx) {
                if d.handles_path(path) {
                    return Some(d.as_ref());
                }
            }
        }
        self.drivers.iter().find(|d| d.handles_path(path)).map(|d| d.as_ref())
    }
}

impl Default for LanguageConfig {
    fn default() -> Self {
        let mut drivers: Vec<Box<dyn LanguageDriver>> = vec![Box::new(RustDriver), Box::new(TypeScriptDriver), Box::new(PythonDriver)];

        #[cfg(feature = "lang-go")]
        drivers.push(Box::new(GoDriver));
        #[cfg(feature = "lang-dart")]
        drivers.push(Box::new(DartDriver));
        #[cfg(feature = "lang-java")]
        drivers.push(Box::new(JavaDriver));
        #[cfg(feature = "lang-csharp")]
        drivers.push(Box::new(CSharpDriver));
        #[cfg(feature = "lang-php")]
        drivers.push(Box::new(PhpDriver));
        #[cfg(feature = "lang-proto")]
        drivers.push(Box::new(ProtoDriver));

        let mut cfg = Self { drivers, by_ext: HashMap::new() };
        for (idx, d) in cfg.drivers.iter().enumerate() {
            for ext in d.extensions() {
                cfg.by_ext.insert(ext.to_string(), idx);
            }
        }
        cfg
    }
}

pub fn language_config() -> &'static LanguageConfig {
    static CFG: OnceLock<LanguageConfig> = OnceLock::new();
    CFG.get_or_init(LanguageConfig::default)
}

/// Parse `content` with the driver for `path` and return its top-level
/// symbols (sorted by start line) plus a joined import/package header.
/// Returns `None` when the file type has no driver or tree-sitter fails to
/// parse it — the caller falls back to the regex tier.
pub fn parse(path: &Path, content: &str) -> Option<(Vec<RawSymbol>, Option<String>)> {
    let driver = language_config().driver_for_path(path)?;
    let language = driver.language_for_path(path);
    let source = content.as_bytes();

    let mut parser = Parser::new();
    parser.set_language(&language).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut symbols = driver.extract_symbols(source, root, &language);
    symbols.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.name.cmp(&b.name)));

    let imports = driver.find_imports(source, root, &language);
    let prefix = if imports.is_empty() {
        None
    } else {
        Some(format!("// imports: {}", imports.join(", ")))
    };

    Some((symbols, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn rust_driver_extracts_functions_and_types() {
        let content = "use std::fmt;\n\nstruct Foo;\n\nfn bar() {}\n\ntrait Baz {}\n";
        let (symbols, prefix) = parse(Path::new("a.rs"), content).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Foo"));
        assert!(names.contains(&"bar"));
        assert!(names.contains(&"Baz"));
        assert!(prefix.unwrap().contains("std::fmt"));
    }

    #[test]
    fn typescript_driver_extracts_class_and_function() {
        let content = "import { x } from './mod';\n\nfunction greet() {}\n\nclass Widget {}\n";
        let (symbols, prefix) = parse(Path::new("a.ts"), content).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"greet"));
        assert!(names.contains(&"Widget"));
        assert!(prefix.unwrap().contains("./mod"));
    }

    #[test]
    fn python_driver_extracts_def_and_class() {
        let content = "import os\n\nclass Thing:\n    pass\n\ndef run():\n    pass\n";
        let (symbols, _prefix) = parse(Path::new("a.py"), content).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Thing"));
        assert!(names.contains(&"run"));
    }

    #[test]
    fn unknown_extension_has_no_driver() {
        assert!(parse(Path::new("a.xyz"), "whatever").is_none());
    }

    #[test]
    fn symbols_are_sorted_by_line_then_name() {
        let content = "fn b() {}\nfn a() {}\n";
        let (symbols, _) = parse(Path::new("a.rs"), content).unwrap();
        let lines: Vec<u32> = symbols.iter().map(|s| s.line).collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }
}
