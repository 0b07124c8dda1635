use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::ChunkError;
use crate::util::char_len;

pub const PAGE_JOINER: &str = "\n\n";

const MIN_REPEATED_EDGE_PAGES: usize = 3;
const MAX_EDGE_LINE_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationStats {
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub page_number_lines_removed: usize,
    pub dehyphenation_merges: usize,
}

/// Joined document text plus the character offset each page starts at.
#[derive(Debug, Clone, Default)]
pub struct JoinedPages {
    pub text: String,
    pub page_starts: Vec<Option<usize>>,
}

/// Page cleanup heuristics. Patterns compile once per chunker.
#[derive(Debug, Clone)]
pub struct PageNormalizer {
    page_number_line: Regex,
    horizontal_whitespace: Regex,
    bullet: Regex,
}

impl PageNormalizer {
    pub fn new() -> Result<Self, ChunkError> {
        Ok(Self {
            page_number_line: Regex::new(
                r"(?i)^(?:[-–—]\s*)?(?:(?:page|pg\.?|p\.)\s*)?\d{1,4}(?:\s*(?:of|/)\s*\d{1,4})?(?:\s*[-–—])?$",
            )?,
            horizontal_whitespace: Regex::new(r"[ \t\u{00A0}\u{2000}-\u{200B}]+")?,
            bullet: Regex::new(r"^[•▪◦‣●]\s*")?,
        })
    }

    /// Cleans every page in place. Running headers and footers are only
    /// detectable across pages, so this works on the whole set.
    pub fn normalize_pages(&self, pages: &mut [String]) -> NormalizationStats {
        let mut stats = NormalizationStats::default();

        for page in pages.iter_mut() {
            *page = page
                .replace("\r\n", "\n")
                .replace('\r', "\n")
                .replace('\u{000C}', "\n")
                .replace('\u{0000}', "");
        }

        let header_candidates = detect_repeated_edge_lines(pages, true);
        let footer_candidates = detect_repeated_edge_lines(pages, false);

        for page in pages.iter_mut() {
            let mut lines = page
                .lines()
                .map(|line| line.to_string())
                .collect::<Vec<String>>();

            if let Some(index) = first_nonempty_line_index(&lines) {
                let candidate = normalize_edge_line(&lines[index]);
                if !candidate.is_empty() && header_candidates.contains(&candidate) {
                    lines.remove(index);
                    stats.header_lines_removed += 1;
                }
            }

            if let Some(index) = last_nonempty_line_index(&lines) {
                let candidate = normalize_edge_line(&lines[index]);
                if !candidate.is_empty() && footer_candidates.contains(&candidate) {
                    lines.remove(index);
                    stats.footer_lines_removed += 1;
                }
            }

            let before = lines.len();
            lines.retain(|line| !self.page_number_line.is_match(line.trim()));
            stats.page_number_lines_removed += before - lines.len();

            let (merged, merges) = merge_hyphenated_lines(lines);
            stats.dehyphenation_merges += merges;

            *page = self.normalize_text(&merged.join("\n"));
        }

        stats
    }

    /// Whitespace and glyph cleanup for a single block of text.
    pub fn normalize_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut blank_run = 0usize;

        for raw_line in text
            .replace("\r\n", "\n")
            .replace('\u{000C}', "\n")
            .replace('\u{0000}', "")
            .split('\n')
        {
            let collapsed = self.horizontal_whitespace.replace_all(raw_line, " ");
            let trimmed = collapsed.trim();
            let line = self.bullet.replace(trimmed, "- ");

            if line.is_empty() {
                blank_run += 1;
                continue;
            }

            if !out.is_empty() {
                out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
            }
            out.push_str(&line);
            blank_run = 0;
        }

        out
    }
}

/// Joins normalized pages with a blank line, recording where each starts.
/// Empty pages contribute no text and get no start offset.
pub fn join_pages(pages: &[String]) -> JoinedPages {
    let mut joined = JoinedPages {
        text: String::new(),
        page_starts: Vec::with_capacity(pages.len()),
    };
    let mut offset = 0usize;

    for page in pages {
        if page.is_empty() {
            joined.page_starts.push(None);
            continue;
        }

        if !joined.text.is_empty() {
            joined.text.push_str(PAGE_JOINER);
            offset += char_len(PAGE_JOINER);
        }

        joined.page_starts.push(Some(offset));
        joined.text.push_str(page);
        offset += char_len(page);
    }

    joined
}

fn detect_repeated_edge_lines(pages: &[String], header: bool) -> HashSet<String> {
    let mut counts = HashMap::<String, usize>::new();
    for page in pages {
        let lines = page.lines().map(str::trim).collect::<Vec<&str>>();
        let candidate = if header {
            lines.iter().copied().find(|line| !line.is_empty())
        } else {
            lines.iter().rev().copied().find(|line| !line.is_empty())
        };

        let Some(candidate) = candidate else {
            continue;
        };

        let normalized = normalize_edge_line(candidate);
        if normalized.is_empty() || char_len(&normalized) > MAX_EDGE_LINE_CHARS {
            continue;
        }
        *counts.entry(normalized).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(candidate, count)| {
            if count >= MIN_REPEATED_EDGE_PAGES {
                Some(candidate)
            } else {
                None
            }
        })
        .collect()
}

fn normalize_edge_line(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

fn first_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|line| !line.trim().is_empty())
}

fn last_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().rposition(|line| !line.trim().is_empty())
}

fn merge_hyphenated_lines(lines: Vec<String>) -> (Vec<String>, usize) {
    let mut merged = Vec::<String>::with_capacity(lines.len());
    let mut merges = 0usize;

    for line in lines {
        if let Some(previous) = merged.last_mut() {
            if should_merge_hyphenated_pair(previous, &line) {
                let joined = format!(
                    "{}{}",
                    previous.trim_end().trim_end_matches('-'),
                    line.trim_start()
                );
                *previous = joined;
                merges += 1;
                continue;
            }
        }
        merged.push(line);
    }

    (merged, merges)
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') || left.ends_with("--") {
        return false;
    }

    let starts_with_lowercase = next
        .trim_start()
        .chars()
        .next()
        .map(|character| character.is_lowercase())
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(|character| character.is_alphabetic())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_whitespace_and_blank_runs() {
        let raw = "  Intro   text\there \n\n\n\n• first point\n\u{000C}Next  line ";
        let normalizer = PageNormalizer::new().expect("patterns compile");
        assert_eq!(
            normalizer.normalize_text(raw),
            "Intro text here\n\n- first point\n\nNext line"
        );
    }

    #[test]
    fn normalize_pages_strips_running_headers_and_page_numbers() {
        let mut pages = vec![
            "J Clin Med 2023\nAlpha body text.\n1".to_string(),
            "J Clin Med 2023\nBeta body text.\nPage 2".to_string(),
            "J Clin Med  2023\nGamma body text.\n- 3 -".to_string(),
        ];

        let stats = PageNormalizer::new()
            .expect("patterns compile")
            .normalize_pages(&mut pages);

        assert_eq!(pages[0], "Alpha body text.");
        assert_eq!(pages[1], "Beta body text.");
        assert_eq!(pages[2], "Gamma body text.");
        assert_eq!(stats.header_lines_removed, 3);
        assert_eq!(stats.page_number_lines_removed, 3);
    }

    #[test]
    fn normalize_pages_merges_hyphenated_line_breaks() {
        let mut pages = vec!["patients received treat-\nment daily\nCOVID-\n19 cohort".to_string()];

        let stats = PageNormalizer::new()
            .expect("patterns compile")
            .normalize_pages(&mut pages);

        assert_eq!(pages[0], "patients received treatment daily\nCOVID-\n19 cohort");
        assert_eq!(stats.dehyphenation_merges, 1);
    }

    #[test]
    fn join_pages_records_char_offsets_and_skips_empty_pages() {
        let pages = vec!["αβγ".to_string(), String::new(), "second".to_string()];
        let joined = join_pages(&pages);

        assert_eq!(joined.text, "αβγ\n\nsecond");
        assert_eq!(joined.page_starts, vec![Some(0), None, Some(5)]);
    }
}
