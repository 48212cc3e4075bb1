//! Lexical query expansion (§4.6). Produces a single expanded string used
//! only for the BM25 side — never sent to the embedder, which instead gets
//! the raw query wrapped in an instruction prefix (see `engine`).

/// Known code-domain synonym pairs, checked as whole lowercase words.
const SYNONYMS: &[(&str, &str)] = &[
    ("function", "func method"),
    ("func", "function method"),
    ("method", "function func"),
    ("error", "err exception"),
    ("err", "error exception"),
    ("config", "configuration settings"),
    ("configuration", "config settings"),
    ("delete", "remove del"),
    ("remove", "delete del"),
    ("create", "new make init"),
    ("auth", "authentication authorization"),
    ("authentication", "auth login"),
    ("db", "database"),
    ("database", "db"),
    ("async", "asynchronous concurrent"),
];

/// Split `camelCase`/`PascalCase`/`snake_case` identifiers into their parts,
/// e.g. `handleLogin` → `handle login`, so a whole-word query still matches
/// an identifier that only contains its parts.
fn expand_identifier_casing(word: &str) -> Option<String> {
    let has_underscore = word.contains('_');
    let has_inner_upper = word.chars().skip(1).any(|c| c.is_uppercase());
    if !has_underscore && !has_inner_upper {
        return None;
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in word.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(ch);
        prev_lower = ch.is_lowercase() || ch.is_numeric();
    }
    if !current.is_empty() {
        parts.push(current);
    }
    if parts.len() > 1 {
        Some(parts.join(" "))
    } else {
        None
    }
}

/// Expand `query` into a longer string of space-separated terms for BM25.
/// Original terms are preserved (and still dominate relevance via term
/// frequency); expansions are appended, not substituted.
pub fn expand(query: &str) -> String {
    let mut out_terms: Vec<String> = vec![query.to_string()];
    for word in query.split_whitespace() {
        let lower = word.to_lowercase();
        if let Some((_, syn)) = SYNONYMS.iter().find(|(k, _)| *k == lower) {
            out_terms.push(syn.to_string());
        }
        if let Some(split) = expand_identifier_casing(word) {
            out_terms.push(split);
        }
    }
    out_terms.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_synonym() {
        let expanded = expand("function login");
        assert!(expanded.contains("func method"));
    }

    #[test]
    fn splits_camel_case_identifier() {
        let expanded = expand("handleLogin");
        assert!(expanded.contains("handle Login"));
    }

    #[test]
    fn leaves_plain_natural_language_untouched_beyond_original() {
        let expanded = expand("how does this work");
        assert!(expanded.starts_with("how does this work"));
    }
}
