//! Multi-query decomposition (§4.12): splits a broad, generic query into
//! weighted sub-queries that are searched independently and RRF-merged by
//! the engine. Specific identifier-shaped queries are left alone — there is
//! nothing to decompose in a single exact name.

#[derive(Debug, Clone)]
pub struct SubQuery {
    pub text: String,
    pub weight: f64,
}

/// Generic phrasings that signal "explain a broad concept" rather than
/// "find one specific thing" — the case where decomposition helps recall.
const GENERIC_MARKERS: &[&str] = &["how does", "how do", "what is", "what are", "explain", "overview of", "works"];

pub fn should_decompose(query: &str) -> bool {
    let lower = query.to_lowercase();
    let word_count = query.split_whitespace().count();
    word_count >= 4 && GENERIC_MARKERS.iter().any(|m| lower.contains(m))
}

/// Produce `[{sub_query, weight}]` whose weights sum to 1. When
/// decomposition doesn't apply, returns a single sub-query at weight 1 so
/// callers can always iterate the result uniformly.
pub fn decompose(query: &str) -> Vec<SubQuery> {
    if !should_decompose(query) {
        return vec![SubQuery { text: query.to_string(), weight: 1.0 }];
    }

    let stopwords = ["how", "does", "do", "what", "is", "are", "the", "a", "an", "of", "this"];
    let keywords: Vec<&str> = query
        .split_whitespace()
        .filter(|w| !stopwords.contains(&w.to_lowercase().as_str()))
        .collect();

    if keywords.is_empty() {
        return vec![SubQuery { text: query.to_string(), weight: 1.0 }];
    }

    let mut sub_queries = vec![SubQuery { text: query.to_string(), weight: 0.5 }];
    let keyword_query = keywords.join(" ");
    sub_queries.push(SubQuery { text: keyword_query, weight: 0.5 });
    sub_queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_identifier_query_does_not_decompose() {
        assert!(!should_decompose("HandleLogin"));
        let subs = decompose("HandleLogin");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].weight, 1.0);
    }

    #[test]
    fn generic_conceptual_query_decomposes_with_weights_summing_to_one() {
        let subs = decompose("how does login work in this service");
        assert!(subs.len() >= 2);
        let total: f64 = subs.iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
