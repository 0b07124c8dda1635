//! Document chunking engine: normalization, recursive segmentation, content
//! analysis, header detection and page-attributed chunk assembly.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::config::ChunkerConfig;
use crate::error::ChunkError;
use crate::model::{ChunkRecord, DocumentMetadata, PageRecord};
use crate::util::{char_len, now_utc_string, preview};

mod assembler;
mod content;
mod extract;
mod headers;
mod normalize;
mod segmenter;

use assembler::{AssemblyInput, ChunkAssembler};
use content::RegexContentAnalyzer;
use extract::{ExtractedDocument, ExtractedPage, extractor_for_path};
use headers::HeaderExtractor;
use normalize::{PageNormalizer, join_pages};
use segmenter::TextSegmenter;

pub use content::ContentAnalyzer;
pub use extract::PageExtractor;

const ERROR_PREVIEW_CHARS: usize = 500;

/// Stateless between calls: every invocation works on its own inputs and
/// returns an independent sequence, so one chunker can be shared across
/// worker threads.
#[derive(Debug, Clone)]
pub struct Chunker<A: ContentAnalyzer = RegexContentAnalyzer> {
    config: ChunkerConfig,
    segmenter: TextSegmenter,
    normalizer: PageNormalizer,
    headers: HeaderExtractor,
    analyzer: A,
}

impl Chunker<RegexContentAnalyzer> {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        Self::with_analyzer(config, RegexContentAnalyzer::new()?)
    }
}

impl<A: ContentAnalyzer> Chunker<A> {
    pub fn with_analyzer(config: ChunkerConfig, analyzer: A) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self {
            segmenter: TextSegmenter::new(&config),
            normalizer: PageNormalizer::new()?,
            headers: HeaderExtractor::new()?,
            analyzer,
            config,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Extracts and chunks a document, choosing the extractor by extension.
    pub fn chunk_document(&self, path: &Path) -> Result<Vec<ChunkRecord>, ChunkError> {
        let extractor = extractor_for_path(path);
        self.chunk_document_with(path, extractor.as_ref())
    }

    pub fn chunk_document_with(
        &self,
        path: &Path,
        extractor: &dyn PageExtractor,
    ) -> Result<Vec<ChunkRecord>, ChunkError> {
        if !path.exists() {
            return Err(ChunkError::DocumentNotFound {
                path: path.to_path_buf(),
            });
        }

        let extracted = extractor.extract(path).inspect_err(|err| {
            error!(path = %path.display(), error = %err, "document extraction failed");
        })?;
        for warning in &extracted.warnings {
            warn!(path = %path.display(), warning = %warning, "extraction warning");
        }

        let chunks = self.chunk_extracted(extracted)?;
        info!(path = %path.display(), chunks = chunks.len(), "split document into chunks");
        Ok(chunks)
    }

    /// Chunks already-extracted pages, attributing every chunk to a page.
    pub fn chunk_extracted(&self, extracted: ExtractedDocument) -> Result<Vec<ChunkRecord>, ChunkError> {
        let ExtractedDocument {
            mut metadata,
            pages,
            ..
        } = extracted;

        let mut texts = pages
            .iter()
            .map(|page| page.text.clone())
            .collect::<Vec<String>>();
        let stats = self.normalizer.normalize_pages(&mut texts);
        debug!(
            header_lines_removed = stats.header_lines_removed,
            footer_lines_removed = stats.footer_lines_removed,
            page_number_lines_removed = stats.page_number_lines_removed,
            dehyphenation_merges = stats.dehyphenation_merges,
            "normalized pages"
        );

        let joined = join_pages(&texts);
        let records = pages
            .iter()
            .zip(texts.iter())
            .zip(joined.page_starts.iter())
            .map(|((page, text), start_offset)| PageRecord {
                page_number: page.page_number,
                word_count: text.split_whitespace().count(),
                has_form: page.has_form,
                has_images: page.has_images,
                section_headers: self.headers.extract(text),
                start_offset: *start_offset,
            })
            .collect::<Vec<PageRecord>>();

        if !joined.text.is_empty() && self.analyzer.analyze(&joined.text).contains_table {
            metadata.has_tables = true;
        }
        if metadata.page_count < records.len() {
            metadata.page_count = records.len();
        }

        self.segment_and_assemble(&joined.text, &metadata, &records)
    }

    /// Chunks caller-supplied page texts (page 1 first).
    pub fn chunk_pages(
        &self,
        pages: &[String],
        base_metadata: Option<DocumentMetadata>,
    ) -> Result<Vec<ChunkRecord>, ChunkError> {
        let mut metadata =
            base_metadata.unwrap_or_else(|| DocumentMetadata::for_text_input(now_utc_string()));
        metadata.page_count = pages.len().max(1);

        let extracted = ExtractedDocument {
            metadata,
            pages: pages
                .iter()
                .enumerate()
                .map(|(index, text)| ExtractedPage {
                    page_number: index + 1,
                    text: text.clone(),
                    has_form: false,
                    has_images: false,
                })
                .collect(),
            warnings: Vec::new(),
        };

        self.chunk_extracted(extracted)
    }

    /// Chunks raw text as a single page under caller-supplied metadata.
    pub fn chunk_text(
        &self,
        text: &str,
        base_metadata: Option<DocumentMetadata>,
    ) -> Result<Vec<ChunkRecord>, ChunkError> {
        let mut metadata =
            base_metadata.unwrap_or_else(|| DocumentMetadata::for_text_input(now_utc_string()));
        metadata.page_count = 1;

        let mut pages = vec![text.to_string()];
        self.normalizer.normalize_pages(&mut pages);
        let normalized = pages.pop().unwrap_or_default();

        let chunks = self.segment_and_assemble(&normalized, &metadata, &[])?;
        info!(chunks = chunks.len(), "split text into chunks");
        Ok(chunks)
    }

    fn segment_and_assemble(
        &self,
        text: &str,
        metadata: &DocumentMetadata,
        pages: &[PageRecord],
    ) -> Result<Vec<ChunkRecord>, ChunkError> {
        let spans = self.segmenter.segment(text);
        let headers = self.headers.extract(text);
        let input = AssemblyInput {
            text,
            document: metadata,
            pages,
            headers: &headers,
        };

        ChunkAssembler::new(&self.analyzer)
            .assemble(&input, &spans)
            .inspect_err(|err| {
                error!(
                    error = %err,
                    source = %metadata.source,
                    text_chars = char_len(text),
                    text_preview = %preview(text, ERROR_PREVIEW_CHARS),
                    "chunk assembly failed"
                );
            })
    }
}
