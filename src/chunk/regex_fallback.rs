//! Regex-based symbol extraction: second tier, used when a file has no
//! tree-sitter driver or the driver fails to parse it. Cheap, language-naive
//! pattern matching over common declaration keywords.

use super::Region;
use crate::model::SymbolKind;
use regex::Regex;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^\s*
            (?:pub(?:\(\w+\))?\s+|export\s+(?:default\s+)?|public\s+|private\s+|protected\s+|static\s+|async\s+)*
            (?P<kw>function|fn|func|def|class|interface|struct|enum|trait|impl|type|module|namespace)
            \s+
            (?P<name>[A-Za-z_][A-Za-z0-9_]*)
            ",
        )
        .expect("static regex")
    })
}

fn kind_for(kw: &str) -> SymbolKind {
    match kw {
        "function" | "fn" | "func" | "def" => SymbolKind::Function,
        "class" => SymbolKind::Class,
        "interface" => SymbolKind::Interface,
        "struct" => SymbolKind::Struct,
        "enum" => SymbolKind::Enum,
        "trait" | "impl" => SymbolKind::Trait,
        "type" => SymbolKind::Type,
        "module" | "namespace" => SymbolKind::Module,
        _ => SymbolKind::Other,
    }
}

/// Find declaration-like lines and turn them into regions running until the
/// next match (or EOF). Returns an empty vec when nothing matches, letting
/// the caller fall back to fixed line windows.
pub fn symbol_regions(source_lines: &[&str]) -> Vec<Region> {
    let total = source_lines.len() as u32;
    let mut hits: Vec<(u32, String, SymbolKind)> = Vec::new();

    for (i, line) in source_lines.iter().enumerate() {
        if let Some(caps) = pattern().captures(line) {
            let kw = &caps["kw"];
            let name = caps["name"].to_string();
            hits.push((i as u32, name, kind_for(kw)));
        }
    }

    if hits.is_empty() {
        return vec![];
    }

    let mut regions = Vec::new();
    if hits[0].0 > 0 {
        regions.push(Region { start: 0, end: hits[0].0, label: None });
    }
    for (idx, (start, name, kind)) in hits.iter().enumerate() {
        let end = hits.get(idx + 1).map(|(s, _, _)| *s).unwrap_or(total);
        regions.push(Region { start: *start, end, label: Some((name.clone(), *kind)) });
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_function_declarations() {
        let text = "# comment\ndef handle(req):\n    pass\n\ndef other():\n    pass\n";
        let lines: Vec<&str> = text.lines().collect();
        let regions = symbol_regions(&lines);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].label.as_ref().unwrap().0, "handle");
        assert_eq!(regions[1].label.as_ref().unwrap().0, "other");
    }

    #[test]
    fn no_matches_returns_empty() {
        let text = "just some\nplain lines\n";
        let lines: Vec<&str> = text.lines().collect();
        assert!(symbol_regions(&lines).is_empty());
    }
}
