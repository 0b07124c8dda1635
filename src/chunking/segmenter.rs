use std::collections::VecDeque;

use tracing::debug;

use crate::config::ChunkerConfig;
use crate::util::char_len;

/// Byte range of a chunk inside the text it was cut from. Chunks are always
/// verbatim, contiguous slices of the source, trimmed of surrounding
/// whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    span: Span,
    chars: usize,
}

/// Recursive separator splitter: tries separators from coarsest to finest,
/// merging small pieces into windows of at most `chunk_size` characters that
/// overlap by roughly `chunk_overlap` characters.
#[derive(Debug, Clone)]
pub struct TextSegmenter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    keep_separator: bool,
}

impl TextSegmenter {
    pub fn new(config: &ChunkerConfig) -> Self {
        let separators = if config.separators.is_empty() {
            vec![String::new()]
        } else {
            config.separators.clone()
        };

        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap,
            separators,
            keep_separator: config.keep_separator,
        }
    }

    pub fn segment(&self, text: &str) -> Vec<Span> {
        let mut out = Vec::new();
        if text.trim().is_empty() {
            return out;
        }

        self.split_recursive(
            text,
            Span {
                start: 0,
                end: text.len(),
            },
            &self.separators,
            &mut out,
        );
        out
    }

    fn split_recursive(&self, text: &str, span: Span, separators: &[String], out: &mut Vec<Span>) {
        let window = span.slice(text);

        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (index, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if window.contains(candidate.as_str()) {
                separator = candidate;
                finer = &separators[index + 1..];
                break;
            }
        }

        let pieces = self.split_on(text, span, separator);
        let separator_chars = if self.keep_separator {
            0
        } else {
            char_len(separator)
        };

        let mut small = Vec::<Piece>::new();
        for piece in pieces {
            if piece.chars < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                self.merge_pieces(text, &small, separator_chars, out);
                small.clear();
            }

            if finer.is_empty() {
                // Atomic unit larger than chunk_size is emitted whole.
                push_trimmed(text, piece.span, out);
            } else {
                self.split_recursive(text, piece.span, finer, out);
            }
        }

        if !small.is_empty() {
            self.merge_pieces(text, &small, separator_chars, out);
        }
    }

    fn split_on(&self, text: &str, span: Span, separator: &str) -> Vec<Piece> {
        let window = span.slice(text);
        let mut ranges = Vec::<Span>::new();

        if separator.is_empty() {
            for (index, character) in window.char_indices() {
                let start = span.start + index;
                ranges.push(Span {
                    start,
                    end: start + character.len_utf8(),
                });
            }
        } else {
            let mut cursor = span.start;
            for (index, matched) in window.match_indices(separator) {
                let match_start = span.start + index;
                ranges.push(Span {
                    start: cursor,
                    end: match_start,
                });
                cursor = if self.keep_separator {
                    match_start
                } else {
                    match_start + matched.len()
                };
            }
            ranges.push(Span {
                start: cursor,
                end: span.end,
            });
        }

        ranges
            .into_iter()
            .filter(|range| range.end > range.start)
            .map(|range| Piece {
                span: range,
                chars: char_len(range.slice(text)),
            })
            .collect()
    }

    fn merge_pieces(&self, text: &str, pieces: &[Piece], separator_chars: usize, out: &mut Vec<Span>) {
        let mut window = VecDeque::<Piece>::new();
        let mut total = 0usize;

        for piece in pieces {
            let joiner = if window.is_empty() { 0 } else { separator_chars };

            if total + piece.chars + joiner > self.chunk_size && !window.is_empty() {
                if total > self.chunk_size {
                    debug!(
                        total,
                        chunk_size = self.chunk_size,
                        "emitting chunk longer than chunk_size"
                    );
                }

                emit_window(text, &window, out);

                while let Some(front) = window.front() {
                    let over_overlap = total > self.chunk_overlap;
                    let does_not_fit =
                        total + piece.chars + separator_chars > self.chunk_size && total > 0;
                    if !(over_overlap || does_not_fit) {
                        break;
                    }

                    let trailing = if window.len() > 1 { separator_chars } else { 0 };
                    total = total.saturating_sub(front.chars + trailing);
                    window.pop_front();
                }
            }

            window.push_back(*piece);
            total += piece.chars + if window.len() > 1 { separator_chars } else { 0 };
        }

        emit_window(text, &window, out);
    }
}

fn emit_window(text: &str, window: &VecDeque<Piece>, out: &mut Vec<Span>) {
    if let (Some(first), Some(last)) = (window.front(), window.back()) {
        push_trimmed(
            text,
            Span {
                start: first.span.start,
                end: last.span.end,
            },
            out,
        );
    }
}

fn push_trimmed(text: &str, span: Span, out: &mut Vec<Span>) {
    let raw = span.slice(text);
    let leading = raw.len() - raw.trim_start().len();
    let trailing = raw.len() - raw.trim_end().len();
    if leading + trailing >= raw.len() {
        return;
    }

    out.push(Span {
        start: span.start + leading,
        end: span.end - trailing,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    impl TextSegmenter {
        fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
            self.segment(text)
                .into_iter()
                .map(|span| span.slice(text))
                .collect()
        }
    }

    fn segmenter(chunk_size: usize, chunk_overlap: usize) -> TextSegmenter {
        TextSegmenter::new(&ChunkerConfig {
            chunk_size,
            chunk_overlap,
            ..ChunkerConfig::default()
        })
    }

    fn prose(words: usize) -> String {
        (0..words)
            .map(|index| format!("word{index:04}"))
            .collect::<Vec<String>>()
            .join(" ")
    }

    #[test]
    fn empty_and_blank_input_produce_no_chunks() {
        let segmenter = segmenter(100, 20);
        assert!(segmenter.segment("").is_empty());
        assert!(segmenter.segment(" \n\n \t").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let segmenter = segmenter(100, 20);
        assert_eq!(segmenter.split_text("  Short abstract.  "), vec!["Short abstract."]);
    }

    #[test]
    fn paragraphs_are_packed_up_to_chunk_size() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = segmenter(50, 0).split_text(text);
        assert_eq!(
            chunks,
            vec![
                "First paragraph here.\n\nSecond paragraph here.",
                "Third paragraph here."
            ]
        );
    }

    #[test]
    fn chunks_respect_size_and_overlap_neighbours() {
        let text = prose(400);
        let segmenter = segmenter(200, 50);
        let spans = segmenter.segment(&text);

        assert!(spans.len() > 1);
        for span in &spans {
            assert!(char_len(span.slice(&text)) <= 200);
        }
        for pair in spans.windows(2) {
            assert!(pair[1].start < pair[0].end, "consecutive chunks overlap");
            assert!(pair[1].start > pair[0].start, "chunks advance");
            let overlap = char_len(&text[pair[1].start..pair[0].end]);
            assert!(overlap <= 50, "overlap {overlap} exceeds configured overlap");
        }
    }

    #[test]
    fn gaps_between_chunks_are_only_whitespace() {
        let text = format!("{}\n\n{}\n{}", prose(150), prose(30), prose(220));
        let spans = segmenter(300, 60).segment(&text);

        assert!(text[..spans[0].start].trim().is_empty());
        assert!(text[spans[spans.len() - 1].end..].trim().is_empty());
        for pair in spans.windows(2) {
            if pair[1].start > pair[0].end {
                assert!(text[pair[0].end..pair[1].start].trim().is_empty());
            }
        }
    }

    #[test]
    fn oversized_token_passes_through_without_character_fallback() {
        let token = "x".repeat(2000);
        let text = format!("lead in {token} trailing words");
        let segmenter = TextSegmenter::new(&ChunkerConfig {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: vec!["\n\n".to_string(), "\n".to_string(), " ".to_string()],
            keep_separator: true,
        });

        let chunks = segmenter.split_text(&text);
        assert!(chunks.contains(&token.as_str()));
        assert!(chunks.iter().all(|chunk| chunk.len() <= 1000 || *chunk == token));
    }

    #[test]
    fn character_fallback_splits_unbroken_text_without_loss() {
        let token = "y".repeat(2000);
        let spans = segmenter(1000, 200).segment(&token);

        assert!(spans.len() >= 2);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[spans.len() - 1].end, token.len());
        assert!(spans.iter().all(|span| span.end - span.start <= 1000));
    }

    #[test]
    fn dropping_separators_still_yields_contiguous_spans() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let segmenter = TextSegmenter::new(&ChunkerConfig {
            chunk_size: 20,
            chunk_overlap: 0,
            separators: vec![" ".to_string()],
            keep_separator: false,
        });

        let chunks = segmenter.split_text(text);
        assert_eq!(chunks[0], "alpha beta gamma");
        assert!(chunks.iter().all(|chunk| text.contains(chunk)));
    }

    #[test]
    fn segmentation_is_deterministic() {
        let text = format!("{}\n\n{}", prose(300), prose(120));
        let segmenter = segmenter(250, 40);
        assert_eq!(segmenter.segment(&text), segmenter.segment(&text));
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let text = "αβγ δεζ ηθι κλμ";
        let chunks = segmenter(8, 0).split_text(text);
        assert_eq!(chunks, vec!["αβγ δεζ", "ηθι κλμ"]);
    }
}
