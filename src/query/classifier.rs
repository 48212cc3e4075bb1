//! Query classifier (§4.7): picks fusion weights and a label from the raw
//! query text via ordered pattern matching. No ML — these are the rules the
//! source material specifies explicitly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLabel {
    Lexical,
    Semantic,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub bm25: f64,
    pub semantic: f64,
    pub label: QueryLabel,
}

/// Default when no classifier rule fires and no explicit weights were
/// supplied: semantic wins ties.
pub const DEFAULT_WEIGHTS: FusionWeights = FusionWeights { bm25: 0.35, semantic: 0.65, label: QueryLabel::Mixed };

fn is_error_code_like(query: &str) -> bool {
    let token = query.trim();
    !token.is_empty()
        && token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && token.chars().any(|c| c.is_ascii_digit() || c == '_')
        && token.chars().any(|c| c.is_ascii_uppercase())
}

fn is_identifier_shaped(word: &str) -> bool {
    if word.is_empty() || !word.chars().next().unwrap().is_alphabetic() {
        return false;
    }
    let has_underscore = word.contains('_');
    let has_mixed_case = word.chars().any(|c| c.is_uppercase()) && word.chars().any(|c| c.is_lowercase());
    (has_underscore || has_mixed_case) && word.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn all_tokens_identifier_shaped(query: &str) -> bool {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    !tokens.is_empty() && tokens.iter().all(|t| is_identifier_shaped(t))
}

fn all_tokens_natural_language(query: &str) -> bool {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    !tokens.is_empty() && tokens.iter().all(|t| t.chars().all(|c| c.is_lowercase() || !c.is_alphabetic()))
}

/// Classify `query`, choosing a (bm25, semantic) weight pair and a label.
/// If `explicit` weights were supplied by the caller, rule 1 applies: bypass
/// classification and just label by which side dominates.
pub fn classify(query: &str, explicit: Option<(f64, f64)>) -> FusionWeights {
    if let Some((bm25, semantic)) = explicit {
        let label = if bm25 > 0.6 {
            QueryLabel::Lexical
        } else if semantic > 0.6 {
            QueryLabel::Semantic
        } else {
            QueryLabel::Mixed
        };
        return FusionWeights { bm25, semantic, label };
    }

    let trimmed = query.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return FusionWeights { bm25: 0.9, semantic: 0.1, label: QueryLabel::Lexical };
    }
    if is_error_code_like(trimmed) {
        return FusionWeights { bm25: 0.8, semantic: 0.2, label: QueryLabel::Lexical };
    }
    if all_tokens_identifier_shaped(trimmed) {
        return FusionWeights { bm25: 0.7, semantic: 0.3, label: QueryLabel::Lexical };
    }
    if all_tokens_natural_language(trimmed) {
        return FusionWeights { bm25: 0.25, semantic: 0.75, label: QueryLabel::Semantic };
    }
    FusionWeights { bm25: 0.5, semantic: 0.5, label: QueryLabel::Mixed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_query_is_lexical() {
        let w = classify("\"exact phrase\"", None);
        assert_eq!(w.label, QueryLabel::Lexical);
        assert!((w.bm25 - 0.9).abs() < 1e-9);
    }

    #[test]
    fn error_code_is_lexical() {
        let w = classify("ERR_NOT_FOUND", None);
        assert_eq!((w.bm25, w.semantic), (0.8, 0.2));
    }

    #[test]
    fn camel_case_identifier_is_lexical_leaning() {
        let w = classify("handleLogin", None);
        assert_eq!((w.bm25, w.semantic), (0.7, 0.3));
    }

    #[test]
    fn natural_language_is_semantic() {
        let w = classify("how does login work", None);
        assert_eq!(w.label, QueryLabel::Semantic);
        assert!((w.bm25 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn mixed_falls_back_to_even_split() {
        let w = classify("fix the HandleLogin bug maybe", None);
        assert_eq!(w.label, QueryLabel::Mixed);
    }

    #[test]
    fn explicit_weights_bypass_classification_rules() {
        let w = classify("anything at all", Some((0.9, 0.1)));
        assert_eq!(w.label, QueryLabel::Lexical);
        assert_eq!((w.bm25, w.semantic), (0.9, 0.1));
    }
}
