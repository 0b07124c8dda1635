use crate::chunking::content::ContentAnalyzer;
use crate::chunking::headers::{document_structure, section_at};
use crate::chunking::segmenter::Span;
use crate::error::ChunkError;
use crate::model::{
    CHUNK_CONTENT_TYPE, ChunkMetadata, ChunkRecord, DocumentMetadata, HeaderMatch, PageRecord,
};
use crate::util::{char_len, now_utc_string};

/// Everything the assembler joins against, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    /// Full normalized document text the chunks were cut from.
    pub text: &'a str,
    pub document: &'a DocumentMetadata,
    pub pages: &'a [PageRecord],
    /// Headers found in `text`, in offset order.
    pub headers: &'a [HeaderMatch],
}

/// Joins segmenter output with page records, content analysis and
/// section headers into the final ordered chunk records.
pub struct ChunkAssembler<'a, A: ContentAnalyzer + ?Sized> {
    analyzer: &'a A,
}

impl<'a, A: ContentAnalyzer + ?Sized> ChunkAssembler<'a, A> {
    pub fn new(analyzer: &'a A) -> Self {
        Self { analyzer }
    }

    pub fn assemble(
        &self,
        input: &AssemblyInput<'_>,
        spans: &[Span],
    ) -> Result<Vec<ChunkRecord>, ChunkError> {
        let page_starts = PageStarts::from_records(input.pages);
        let structure = document_structure(input.headers);
        let total_chunks = spans.len();
        let max_page = input.document.page_count.max(1);

        let mut cursor = CharCursor::default();
        let mut records = Vec::with_capacity(total_chunks);

        for (chunk_id, span) in spans.iter().enumerate() {
            let chunk_text = input.text.get(span.start..span.end).ok_or_else(|| {
                ChunkError::chunking(format!(
                    "chunk {chunk_id} span {}..{} is outside the document text",
                    span.start, span.end
                ))
            })?;
            if chunk_text.is_empty() {
                return Err(ChunkError::chunking(format!("chunk {chunk_id} is empty")));
            }

            let chunk_start = cursor.char_offset(input.text, span.start);
            let chunk_size = char_len(chunk_text);
            let chunk_end = chunk_start + chunk_size;

            let page_number = page_starts.page_for(chunk_start).clamp(1, max_page);
            let page_metadata = input
                .pages
                .iter()
                .find(|page| page.page_number == page_number)
                .cloned();

            let processing_timestamp = now_utc_string();
            let mut document = input.document.clone();
            document.processing_timestamp = processing_timestamp;

            records.push(ChunkRecord {
                text: chunk_text.to_string(),
                metadata: ChunkMetadata {
                    document,
                    chunk_id,
                    chunk_size,
                    total_chunks,
                    chunk_start,
                    chunk_end,
                    content_type: CHUNK_CONTENT_TYPE.to_string(),
                    stats: self.analyzer.analyze(chunk_text),
                    page_number,
                    page_metadata,
                    section: section_at(input.headers, chunk_start),
                    document_structure: structure.clone(),
                },
            });
        }

        Ok(records)
    }

    /// Assembles chunks that arrive as bare strings, recovering offsets by
    /// searching forward from the previous chunk's start.
    #[allow(dead_code)]
    pub fn assemble_strings(
        &self,
        input: &AssemblyInput<'_>,
        chunks: &[&str],
    ) -> Result<Vec<ChunkRecord>, ChunkError> {
        let mut spans = Vec::with_capacity(chunks.len());
        let mut from = 0usize;

        for (index, chunk) in chunks.iter().enumerate() {
            let start = locate_chunk(input.text, chunk, from).ok_or_else(|| {
                ChunkError::chunking(format!("chunk {index} does not occur in the document text"))
            })?;
            spans.push(Span {
                start,
                end: start + chunk.len(),
            });
            from = start;
        }

        self.assemble(input, &spans)
    }
}

/// Byte offset of `chunk` at or after `from`, falling back to the first
/// occurrence anywhere in `text`.
fn locate_chunk(text: &str, chunk: &str, from: usize) -> Option<usize> {
    if chunk.is_empty() {
        return None;
    }

    text.get(from..)
        .and_then(|rest| rest.find(chunk))
        .map(|index| from + index)
        .or_else(|| text.find(chunk))
}

/// Page start offsets. Page 1 always starts at 0; later pages contribute a
/// boundary only when their record carries a start offset.
#[derive(Debug, Clone)]
struct PageStarts {
    boundaries: Vec<(usize, usize)>,
}

impl PageStarts {
    fn from_records(pages: &[PageRecord]) -> Self {
        let mut boundaries = vec![(0usize, 1usize)];
        boundaries.extend(pages.iter().filter_map(|page| {
            page.start_offset
                .filter(|_| page.page_number > 1)
                .map(|start| (start, page.page_number))
        }));
        boundaries.sort_unstable();
        Self { boundaries }
    }

    /// Highest page number whose start is at or before `position`.
    fn page_for(&self, position: usize) -> usize {
        self.boundaries
            .iter()
            .take_while(|(start, _)| *start <= position)
            .map(|(_, page_number)| *page_number)
            .max()
            .unwrap_or(1)
    }
}

/// Maps byte offsets to char offsets, walking forward from the last lookup.
#[derive(Debug, Default)]
struct CharCursor {
    byte: usize,
    chars: usize,
}

impl CharCursor {
    fn char_offset(&mut self, text: &str, byte: usize) -> usize {
        if byte < self.byte {
            self.byte = 0;
            self.chars = 0;
        }
        self.chars += char_len(&text[self.byte..byte]);
        self.byte = byte;
        self.chars
    }
}
