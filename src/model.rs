use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CHUNK_CONTENT_TYPE: &str = "text/plain";

/// Document-level facts captured once per extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub page_count: usize,
    #[serde(default, with = "empty_as_none")]
    pub title: Option<String>,
    #[serde(default, with = "empty_as_none")]
    pub author: Option<String>,
    #[serde(default, with = "empty_as_none")]
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    #[serde(default, with = "empty_as_none")]
    pub created_date: Option<String>,
    #[serde(default, with = "empty_as_none")]
    pub modified_date: Option<String>,
    pub is_scanned: bool,
    pub has_tables: bool,
    pub has_images: bool,
    #[serde(default, with = "empty_as_none")]
    pub source_hash: Option<String>,
    pub processing_timestamp: String,
}

impl DocumentMetadata {
    /// Metadata for caller-supplied text with no backing file.
    pub fn for_text_input(processing_timestamp: String) -> Self {
        Self {
            source: "text_input".to_string(),
            file_name: String::new(),
            file_type: "text/plain".to_string(),
            file_size: 0,
            page_count: 1,
            title: None,
            author: None,
            subject: None,
            keywords: Vec::new(),
            created_date: None,
            modified_date: None,
            is_scanned: false,
            has_tables: false,
            has_images: false,
            source_hash: None,
            processing_timestamp,
        }
    }
}

/// Absent optional strings are written as `""`, so serialized chunk records
/// never carry `null`. Reading `""` back yields `None`.
mod empty_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.filter(|value| !value.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderKind {
    Section,
    Subsection,
    Field,
}

impl HeaderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Subsection => "subsection",
            Self::Field => "field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: HeaderKind,
    pub level: u32,
    /// Character offset of the header line within the scanned text.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_number: usize,
    pub word_count: usize,
    pub has_form: bool,
    pub has_images: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section_headers: Vec<HeaderMatch>,
    /// Character offset where this page begins in the joined document text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContentStats {
    pub word_count: usize,
    pub sentence_count: usize,
    pub avg_word_length: f64,
    pub avg_sentence_length: f64,
    pub contains_table: bool,
    pub contains_list: bool,
    pub contains_code: bool,
    pub has_references: bool,
    pub has_citations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRef {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: HeaderKind,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentStructure {
    pub sections: Vec<String>,
    pub subsections: Vec<String>,
    pub total_sections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub document: DocumentMetadata,
    pub chunk_id: usize,
    pub chunk_size: usize,
    pub total_chunks: usize,
    pub chunk_start: usize,
    pub chunk_end: usize,
    pub content_type: String,
    #[serde(flatten)]
    pub stats: ContentStats,
    pub page_number: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_metadata: Option<PageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<SectionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_structure: Option<DocumentStructure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Value types a downstream store may receive. Nulls never appear: absent
/// optional strings become empty text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<&Option<String>> for MetadataValue {
    fn from(value: &Option<String>) -> Self {
        MetadataValue::Text(value.clone().unwrap_or_default())
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        MetadataValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        MetadataValue::List(value)
    }
}

pub type MetadataMap = BTreeMap<String, MetadataValue>;

impl PageRecord {
    pub fn to_value_map(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert("page_number".to_string(), self.page_number.into());
        map.insert("word_count".to_string(), self.word_count.into());
        map.insert("has_form".to_string(), self.has_form.into());
        map.insert("has_images".to_string(), self.has_images.into());
        if !self.section_headers.is_empty() {
            map.insert(
                "section_headers".to_string(),
                self.section_headers
                    .iter()
                    .map(|header| header.text.clone())
                    .collect::<Vec<String>>()
                    .into(),
            );
        }
        map
    }
}

impl ChunkMetadata {
    pub fn to_value_map(&self) -> MetadataMap {
        let document = &self.document;
        let stats = &self.stats;
        let mut map = MetadataMap::new();

        map.insert("source".to_string(), document.source.as_str().into());
        map.insert("file_name".to_string(), document.file_name.as_str().into());
        map.insert("file_type".to_string(), document.file_type.as_str().into());
        map.insert("file_size".to_string(), document.file_size.into());
        map.insert("page_count".to_string(), document.page_count.into());
        map.insert("title".to_string(), (&document.title).into());
        map.insert("author".to_string(), (&document.author).into());
        map.insert("subject".to_string(), (&document.subject).into());
        map.insert("keywords".to_string(), document.keywords.clone().into());
        map.insert("created_date".to_string(), (&document.created_date).into());
        map.insert(
            "modified_date".to_string(),
            (&document.modified_date).into(),
        );
        map.insert("is_scanned".to_string(), document.is_scanned.into());
        map.insert("has_tables".to_string(), document.has_tables.into());
        map.insert("has_images".to_string(), document.has_images.into());
        map.insert("source_hash".to_string(), (&document.source_hash).into());
        map.insert(
            "processing_timestamp".to_string(),
            document.processing_timestamp.as_str().into(),
        );

        map.insert("chunk_id".to_string(), self.chunk_id.into());
        map.insert("chunk_size".to_string(), self.chunk_size.into());
        map.insert("total_chunks".to_string(), self.total_chunks.into());
        map.insert("chunk_start".to_string(), self.chunk_start.into());
        map.insert("chunk_end".to_string(), self.chunk_end.into());
        map.insert(
            "content_type".to_string(),
            self.content_type.as_str().into(),
        );

        map.insert("word_count".to_string(), stats.word_count.into());
        map.insert("sentence_count".to_string(), stats.sentence_count.into());
        map.insert("avg_word_length".to_string(), stats.avg_word_length.into());
        map.insert(
            "avg_sentence_length".to_string(),
            stats.avg_sentence_length.into(),
        );
        map.insert("contains_table".to_string(), stats.contains_table.into());
        map.insert("contains_list".to_string(), stats.contains_list.into());
        map.insert("contains_code".to_string(), stats.contains_code.into());
        map.insert("has_references".to_string(), stats.has_references.into());
        map.insert("has_citations".to_string(), stats.has_citations.into());

        map.insert("page_number".to_string(), self.page_number.into());
        if let Some(page) = &self.page_metadata {
            map.insert(
                "page_metadata".to_string(),
                MetadataValue::Map(page.to_value_map()),
            );
        }

        if let Some(section) = &self.section {
            let mut section_map = MetadataMap::new();
            section_map.insert("title".to_string(), section.title.as_str().into());
            section_map.insert("type".to_string(), section.kind.as_str().into());
            section_map.insert("level".to_string(), (section.level as usize).into());
            map.insert("section".to_string(), MetadataValue::Map(section_map));
        }

        if let Some(structure) = &self.document_structure {
            let mut structure_map = MetadataMap::new();
            structure_map.insert("sections".to_string(), structure.sections.clone().into());
            structure_map.insert(
                "subsections".to_string(),
                structure.subsections.clone().into(),
            );
            structure_map.insert(
                "total_sections".to_string(),
                structure.total_sections.into(),
            );
            map.insert(
                "document_structure".to_string(),
                MetadataValue::Map(structure_map),
            );
        }

        map
    }
}

/// Flattens nested maps into dotted keys for stores with a flat schema.
pub fn flatten_metadata(map: &MetadataMap) -> MetadataMap {
    let mut out = MetadataMap::new();
    flatten_into(&mut out, None, map);
    out
}

fn flatten_into(out: &mut MetadataMap, prefix: Option<&str>, map: &MetadataMap) {
    for (key, value) in map {
        let full_key = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };

        match value {
            MetadataValue::Map(nested) => flatten_into(out, Some(&full_key), nested),
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestDocumentResult {
    pub source: String,
    pub doc_id: Option<String>,
    pub status: String,
    pub chunk_count: usize,
    pub stored_chunks: usize,
    pub failed_chunks: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestCounts {
    pub input_count: usize,
    pub processed_count: usize,
    pub failed_documents: usize,
    pub chunks_produced: usize,
    pub chunks_stored: usize,
    pub chunks_failed: usize,
    pub documents_total: i64,
    pub chunks_total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub db_path: String,
    pub model_id: String,
    pub chunker: crate::config::ChunkerConfig,
    pub counts: IngestCounts,
    pub documents: Vec<IngestDocumentResult>,
    pub warnings: Vec<String>,
}
