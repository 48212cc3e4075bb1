//! Plain-text content kind: split on blank-line paragraph boundaries.
//!
//! Paragraphs carry no symbol label; the token-budget pass still applies so
//! a long plain-text file still gets windowed rather than emitted whole.

use super::Region;

pub fn paragraph_regions(source_lines: &[&str]) -> Vec<Region> {
    let total = source_lines.len() as u32;
    if total == 0 {
        return vec![];
    }

    let mut regions = Vec::new();
    let mut start: Option<u32> = None;

    for (i, line) in source_lines.iter().enumerate() {
        let i = i as u32;
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                regions.push(Region { start: s, end: i, label: None });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        regions.push(Region { start: s, end: total, label: None });
    }

    if regions.is_empty() {
        regions.push(Region { start: 0, end: total, label: None });
    }
    regions
}
