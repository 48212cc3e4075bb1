//! Markdown content kind: split at ATX header boundaries (`# `, `## `, ...).
//!
//! Each header starts a new region running until the next header of any
//! depth; the token-budget merge/split pass in `chunk::mod` handles files
//! whose sections are too large or too small.

use super::Region;

pub fn header_regions(source_lines: &[&str]) -> Vec<Region> {
    let total = source_lines.len() as u32;
    let mut headers: Vec<(u32, String)> = Vec::new();

    for (i, line) in source_lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let hashes = trimmed.chars().take_while(|&c| c == '#').count();
            if hashes >= 1 && hashes <= 6 && trimmed.as_bytes().get(hashes).is_some_and(u8::is_ascii_whitespace) {
                let title = trimmed.trim_start_matches('#').trim().to_string();
                headers.push((i as u32, title));
            }
        }
    }

    if headers.is_empty() {
        return vec![Region { start: 0, end: total, label: None }];
    }

    let mut regions = Vec::new();
    if headers[0].0 > 0 {
        regions.push(Region { start: 0, end: headers[0].0, label: None });
    }
    for (idx, (start, title)) in headers.iter().enumerate() {
        let end = headers.get(idx + 1).map(|(s, _)| *s).unwrap_or(total);
        regions.push(Region {
            start: *start,
            end,
            label: Some((title.clone(), crate::model::SymbolKind::Other)),
        });
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_headers() {
        let text = "intro\n# One\nbody one\n## Two\nbody two\n";
        let lines: Vec<&str> = text.lines().collect();
        let regions = header_regions(&lines);
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[1].label.as_ref().unwrap().0, "One");
        assert_eq!(regions[2].label.as_ref().unwrap().0, "Two");
    }

    #[test]
    fn no_headers_is_one_region() {
        let text = "just text\nmore text\n";
        let lines: Vec<&str> = text.lines().collect();
        let regions = header_regions(&lines);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].label.is_none());
    }
}
