use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{debug, warn};

use crate::error::ChunkError;
use crate::model::DocumentMetadata;
use crate::util::{non_whitespace_char_count, now_utc_string, sha256_file};

/// One physical page as it came out of the extractor. Page numbers keep the
/// page's original position even when earlier pages were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub page_number: usize,
    pub text: String,
    pub has_form: bool,
    pub has_images: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub metadata: DocumentMetadata,
    pub pages: Vec<ExtractedPage>,
    pub warnings: Vec<String>,
}

/// Turns a document on disk into per-page text plus document metadata.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ChunkError>;
}

/// Picks an extractor from the file extension.
pub fn extractor_for_path(path: &Path) -> Box<dyn PageExtractor> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "text" | "md" | "markdown" => Box::new(PlainTextExtractor),
        _ => Box::new(PdftotextExtractor),
    }
}

fn base_metadata(path: &Path, file_type: &str) -> Result<DocumentMetadata, ChunkError> {
    let file_size = fs::metadata(path)
        .map_err(|err| ChunkError::extraction(path, format!("failed to stat file: {err}")))?
        .len();
    let source_hash = sha256_file(path).map_err(|err| ChunkError::extraction(path, format!("{err:#}")))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .unwrap_or_default();

    Ok(DocumentMetadata {
        source: path.display().to_string(),
        title: Some(file_name.clone()).filter(|name| !name.is_empty()),
        file_name,
        file_type: file_type.to_string(),
        file_size,
        page_count: 0,
        author: None,
        subject: None,
        keywords: Vec::new(),
        created_date: None,
        modified_date: None,
        is_scanned: false,
        has_tables: false,
        has_images: false,
        source_hash: Some(source_hash),
        processing_timestamp: now_utc_string(),
    })
}

/// Plain text files; form feeds separate pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ChunkError> {
        let raw = fs::read(path)
            .map_err(|err| ChunkError::extraction(path, format!("failed to read file: {err}")))?;
        let text = String::from_utf8_lossy(&raw);

        let mut texts = text.split('\u{000C}').map(ToOwned::to_owned).collect::<Vec<String>>();
        while texts.last().is_some_and(|page| page.trim().is_empty()) {
            texts.pop();
        }

        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| ExtractedPage {
                page_number: index + 1,
                text,
                has_form: false,
                has_images: false,
            })
            .collect::<Vec<ExtractedPage>>();

        let mut metadata = base_metadata(path, "text/plain")?;
        metadata.page_count = pages.len();

        Ok(ExtractedDocument {
            metadata,
            pages,
            warnings: Vec::new(),
        })
    }
}

/// PDF extraction through the poppler command line tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdftotextExtractor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfInfo {
    pub pages: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub has_form: bool,
}

impl PageExtractor for PdftotextExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ChunkError> {
        let info_output = run_tool("pdfinfo", &[], path)
            .map_err(|reason| ChunkError::extraction(path, reason))?;
        let info = parse_pdfinfo(&info_output);

        let page_count = info.pages;
        let texts = match run_tool(
            "pdftotext",
            &["-enc", "UTF-8", "-f", "1", "-l", &page_count.max(1).to_string()],
            path,
        ) {
            Ok(raw) => split_pdftotext_pages(&raw, page_count)
                .into_iter()
                .map(Ok)
                .collect::<Vec<Result<String, String>>>(),
            Err(reason) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "whole-document extraction failed; retrying page by page"
                );
                extract_pages_individually(path, page_count)
            }
        };

        if page_count > 0 && texts.iter().all(Result::is_err) {
            return Err(ChunkError::extraction(path, "no page could be extracted"));
        }

        let image_pages = match run_tool("pdfimages", &["-list"], path) {
            Ok(listing) => parse_pdfimages_list(&listing),
            Err(reason) => {
                debug!(path = %path.display(), reason = %reason, "image listing unavailable");
                HashSet::new()
            }
        };

        let (pages, warnings) = collect_pages(path, texts, info.has_form, &image_pages);

        let mut metadata = base_metadata(path, "pdf")?;
        metadata.page_count = info.pages;
        if let Some(title) = info.title.clone() {
            metadata.title = Some(title);
        }
        metadata.author = info.author;
        metadata.subject = info.subject;
        metadata.keywords = info.keywords;
        metadata.created_date = info.creation_date;
        metadata.modified_date = info.modification_date;
        metadata.has_images = pages.iter().any(|page| page.has_images);
        metadata.is_scanned = info.pages > 0
            && pages
                .iter()
                .all(|page| non_whitespace_char_count(&page.text) == 0);

        Ok(ExtractedDocument {
            metadata,
            pages,
            warnings,
        })
    }
}

fn extract_pages_individually(path: &Path, page_count: usize) -> Vec<Result<String, String>> {
    (1..=page_count)
        .map(|page_number| {
            let page = page_number.to_string();
            run_tool(
                "pdftotext",
                &["-enc", "UTF-8", "-f", &page, "-l", &page],
                path,
            )
            .map(|raw| raw.replace(['\u{000C}', '\u{0000}'], ""))
        })
        .collect()
}

/// Turns per-page extraction results into page records. Entry `i` is page
/// `i + 1`; failed pages are dropped with one warning each and the pages
/// after them keep their numbers.
fn collect_pages(
    path: &Path,
    texts: Vec<Result<String, String>>,
    has_form: bool,
    image_pages: &HashSet<usize>,
) -> (Vec<ExtractedPage>, Vec<String>) {
    let mut pages = Vec::with_capacity(texts.len());
    let mut warnings = Vec::new();

    for (index, text) in texts.into_iter().enumerate() {
        let page_number = index + 1;
        match text {
            Ok(text) => pages.push(ExtractedPage {
                page_number,
                text,
                has_form,
                has_images: image_pages.contains(&page_number),
            }),
            Err(reason) => {
                warn!(path = %path.display(), page_number, reason = %reason, "skipping page");
                warnings.push(format!(
                    "page {} of {} skipped: {}",
                    page_number,
                    path.display(),
                    reason
                ));
            }
        }
    }

    (pages, warnings)
}

/// Runs `program [args] <path> -` and returns stdout, or a description of
/// the failure.
fn run_tool(program: &str, args: &[&str], path: &Path) -> Result<String, String> {
    let mut command = Command::new(program);
    command.args(args).arg(path);
    if program == "pdftotext" {
        command.arg("-");
    }

    let output = command
        .output()
        .map_err(|err| format!("failed to execute {program}: {err}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{program} returned non-zero exit status: {}",
            stderr.trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn parse_pdfinfo(output: &str) -> PdfInfo {
    let mut info = PdfInfo::default();

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let non_empty = Some(value.to_string()).filter(|value| !value.is_empty());

        match key.trim() {
            "Pages" => info.pages = value.parse::<usize>().unwrap_or(0),
            "Title" => info.title = non_empty,
            "Author" => info.author = non_empty,
            "Subject" => info.subject = non_empty,
            "Keywords" => {
                info.keywords = value
                    .split([',', ';'])
                    .map(str::trim)
                    .filter(|keyword| !keyword.is_empty())
                    .map(ToOwned::to_owned)
                    .collect();
            }
            "CreationDate" => info.creation_date = non_empty,
            "ModDate" => info.modification_date = non_empty,
            "Form" => info.has_form = !value.is_empty() && !value.eq_ignore_ascii_case("none"),
            _ => {}
        }
    }

    info
}

/// Pages with at least one image in `pdfimages -list` output.
pub fn parse_pdfimages_list(output: &str) -> HashSet<usize> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|first| first.parse::<usize>().ok())
        .collect()
}

/// pdftotext separates pages with form feeds and ends the last one with a
/// trailing feed.
pub fn split_pdftotext_pages(raw: &str, expected_pages: usize) -> Vec<String> {
    let mut pages = raw
        .split('\u{000C}')
        .map(|page| page.replace('\u{0000}', ""))
        .collect::<Vec<String>>();

    if pages.len() > expected_pages {
        pages.truncate(expected_pages);
    }
    while pages.len() < expected_pages {
        pages.push(String::new());
    }

    pages
}
