use regex::Regex;

use crate::error::ChunkError;
use crate::model::{DocumentStructure, HeaderKind, HeaderMatch, SectionRef};
use crate::util::char_len;

/// Line-oriented structural header detection. Patterns are tried in
/// priority order and the first match wins for each line.
#[derive(Debug, Clone)]
pub struct HeaderExtractor {
    patterns: Vec<(Regex, HeaderKind)>,
}

impl HeaderExtractor {
    pub fn new() -> Result<Self, ChunkError> {
        Ok(Self {
            patterns: vec![
                (
                    Regex::new(r"^(?P<prefix>\d+(?:\.\d+){2,})\.?\s+\S.*$")?,
                    HeaderKind::Subsection,
                ),
                (
                    Regex::new(r"^(?P<prefix>\d+\.\d+)\.?\s+\S.*$")?,
                    HeaderKind::Section,
                ),
                (Regex::new(r"^[A-Z][A-Z0-9a-z\s]+:$")?, HeaderKind::Field),
            ],
        })
    }

    pub fn extract(&self, text: &str) -> Vec<HeaderMatch> {
        let mut headers = Vec::new();
        let mut offset = 0usize;

        for raw_line in text.split('\n') {
            let line_offset = offset;
            offset += char_len(raw_line) + 1;

            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let leading = char_len(raw_line) - char_len(raw_line.trim_start());

            for (pattern, kind) in &self.patterns {
                let Some(captures) = pattern.captures(line) else {
                    continue;
                };

                let level = match kind {
                    HeaderKind::Field => 1,
                    HeaderKind::Section | HeaderKind::Subsection => captures
                        .name("prefix")
                        .map(|prefix| prefix.as_str().matches('.').count() as u32 + 1)
                        .unwrap_or(1),
                };

                headers.push(HeaderMatch {
                    text: line.to_string(),
                    kind: *kind,
                    level,
                    offset: line_offset + leading,
                });
                break;
            }
        }

        headers
    }
}

/// Numbered-header outline of a document, or `None` when it has no
/// numbered headers.
pub fn document_structure(headers: &[HeaderMatch]) -> Option<DocumentStructure> {
    let sections = headers
        .iter()
        .filter(|header| header.kind == HeaderKind::Section)
        .map(|header| header.text.clone())
        .collect::<Vec<String>>();
    let subsections = headers
        .iter()
        .filter(|header| header.kind == HeaderKind::Subsection)
        .map(|header| header.text.clone())
        .collect::<Vec<String>>();

    if sections.is_empty() && subsections.is_empty() {
        return None;
    }

    Some(DocumentStructure {
        total_sections: sections.len(),
        sections,
        subsections,
    })
}

/// The last header starting at or before `position`. Headers must be in
/// offset order, which `HeaderExtractor::extract` guarantees.
pub fn section_at(headers: &[HeaderMatch], position: usize) -> Option<SectionRef> {
    let index = headers.partition_point(|header| header.offset <= position);
    let header = headers.get(index.checked_sub(1)?)?;
    Some(SectionRef {
        title: header.text.clone(),
        kind: header.kind,
        level: header.level,
    })
}
