use regex::Regex;

use crate::error::ChunkError;
use crate::model::ContentStats;
use crate::util::tail_chars;

/// How much of a chunk's tail is searched for a references heading.
const REFERENCES_TAIL_CHARS: usize = 100;

/// Derives statistics and content flags from a block of text.
pub trait ContentAnalyzer {
    fn analyze(&self, text: &str) -> ContentStats;
}

/// Lightweight regex heuristics. Every flag is evaluated independently.
#[derive(Debug, Clone)]
pub struct RegexContentAnalyzer {
    sentence_split: Regex,
    table: Regex,
    list: Regex,
    code: Regex,
    references: Regex,
    citations: Regex,
}

impl RegexContentAnalyzer {
    pub fn new() -> Result<Self, ChunkError> {
        Ok(Self {
            sentence_split: Regex::new(r"[.!?]+")?,
            table: Regex::new(r"\+[-=]+\+|[┌┬┐├┼┤└┴┘─│]{2,}|\|.*\|")?,
            list: Regex::new(r"(?m)^\s*(?:\d+[.)]?|[a-z][.)]|[•\-*–])\s+\w")?,
            code: Regex::new(r"[{};=]|\bdef\s+\w+\s*\(|\bclass\s+\w+")?,
            references: Regex::new(
                r"(?im:^\s*(?:\d+\.?\s+)?(?:references?|bibliography)\s*:?\s*$)|(?i:references?\s*$)",
            )?,
            citations: Regex::new(
                r"\[\d+(?:\s*[-–,]\s*\d+)*\]|\([A-Z][A-Za-z'-]+(?:\s+et\s+al\.?|\s+(?:and|&)\s+[A-Z][A-Za-z'-]+)?,\s*\d{4}[a-z]?\)",
            )?,
        })
    }
}

impl ContentAnalyzer for RegexContentAnalyzer {
    fn analyze(&self, text: &str) -> ContentStats {
        let words = text.split_whitespace().collect::<Vec<&str>>();
        let sentences = self
            .sentence_split
            .split(text)
            .filter(|sentence| !sentence.trim().is_empty())
            .collect::<Vec<&str>>();

        let avg_word_length = if words.is_empty() {
            0.0
        } else {
            let total = words.iter().map(|word| word.chars().count()).sum::<usize>();
            total as f64 / words.len() as f64
        };

        let avg_sentence_length = if sentences.is_empty() {
            0.0
        } else {
            let total = sentences
                .iter()
                .map(|sentence| sentence.split_whitespace().count())
                .sum::<usize>();
            total as f64 / sentences.len() as f64
        };

        ContentStats {
            word_count: words.len(),
            sentence_count: sentences.len(),
            avg_word_length,
            avg_sentence_length,
            contains_table: self.table.is_match(text),
            contains_list: self.list.is_match(text),
            contains_code: self.code.is_match(text),
            has_references: self
                .references
                .is_match(tail_chars(text, REFERENCES_TAIL_CHARS)),
            has_citations: self.citations.is_match(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> RegexContentAnalyzer {
        RegexContentAnalyzer::new().expect("content patterns compile")
    }

    #[test]
    fn empty_text_has_zeroed_stats() {
        let stats = analyzer().analyze("");
        assert_eq!(stats, ContentStats::default());
    }

    #[test]
    fn counts_words_and_sentences() {
        let stats = analyzer().analyze("Aspirin lowers risk. Does it help? Yes!!");
        assert_eq!(stats.word_count, 7);
        assert_eq!(stats.sentence_count, 3);
        assert!((stats.avg_sentence_length - 7.0 / 3.0).abs() < 1e-9);
        let expected_word_length = (7 + 6 + 5 + 4 + 2 + 5 + 5) as f64 / 7.0;
        assert!((stats.avg_word_length - expected_word_length).abs() < 1e-9);
    }

    #[test]
    fn numbered_line_is_a_list() {
        let stats = analyzer().analyze("Inclusion criteria\n1. Item one\n2. Item two");
        assert!(stats.contains_list);
        assert!(!analyzer().analyze("Dose was 1.5 mg daily").contains_list);
    }

    #[test]
    fn bracketed_and_author_year_citations() {
        assert!(analyzer().analyze("as shown previously [12].").has_citations);
        assert!(analyzer().analyze("consistent with (Smith, 2019).").has_citations);
        assert!(analyzer().analyze("see (Smith et al., 2020a)").has_citations);
        assert!(!analyzer().analyze("no citation here (n = 12)").has_citations);
    }

    #[test]
    fn references_heading_near_the_end() {
        let text = format!("{}\n\nReferences\n[1] Doe J. Trial.", "Body sentence. ".repeat(20));
        let stats = analyzer().analyze(&text);
        assert!(stats.has_references);

        let early = format!("References\n{}", "Body sentence. ".repeat(20));
        assert!(!analyzer().analyze(&early).has_references);
    }

    #[test]
    fn tables_and_code_patterns() {
        assert!(analyzer().analyze("| arm | n |\n| A | 10 |").contains_table);
        assert!(analyzer().analyze("+----+----+").contains_table);
        assert!(analyzer().analyze("def fit(x):\n    return x").contains_code);
        assert!(!analyzer().analyze("Patients were followed for two years").contains_code);
    }
}
