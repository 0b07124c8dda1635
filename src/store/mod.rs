//! Ingestion boundary: hands chunk records to a vector store.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::error::StoreError;
use crate::model::{ChunkRecord, MetadataMap, flatten_metadata};

mod retry;
mod sqlite;

pub use sqlite::{DB_SCHEMA_VERSION, SqliteChunkStore};

/// One chunk as a store receives it: flat metadata only.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub doc_id: String,
    pub chunk_id: usize,
    pub text: String,
    pub metadata: MetadataMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub chunk_id: usize,
    pub page_number: Option<i64>,
    pub score: f64,
    pub text: String,
}

pub trait ChunkStore {
    fn embed_and_store(&mut self, entry: &StoreEntry) -> Result<(), StoreError>;

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub stored: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

/// Stores every chunk of one document. A chunk that still fails after
/// retries is recorded and skipped; chunks stored before it stay counted.
pub fn ingest_chunks<S: ChunkStore + ?Sized>(
    store: &mut S,
    retry: &RetryPolicy,
    doc_id: &str,
    chunks: &[ChunkRecord],
) -> IngestReport {
    let mut report = IngestReport::default();

    for chunk in chunks {
        let entry = StoreEntry {
            doc_id: doc_id.to_string(),
            chunk_id: chunk.metadata.chunk_id,
            text: chunk.text.clone(),
            metadata: flatten_metadata(&chunk.metadata.to_value_map()),
        };

        let label = format!("store {}:{}", doc_id, entry.chunk_id);
        match retry.run(&label, StoreError::is_retryable, || store.embed_and_store(&entry)) {
            Ok(()) => report.stored += 1,
            Err(err) => {
                warn!(doc_id, chunk_id = entry.chunk_id, error = %err, "failed to store chunk");
                report.failed += 1;
                report
                    .failures
                    .push(format!("chunk {} of {}: {}", entry.chunk_id, doc_id, err));
            }
        }
    }

    info!(
        doc_id,
        stored = report.stored,
        failed = report.failed,
        "document chunks ingested"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunker;
    use crate::config::ChunkerConfig;
    use crate::model::MetadataValue;

    #[derive(Default)]
    struct RecordingStore {
        stored: Vec<StoreEntry>,
        fail_chunk: Option<usize>,
        transient_failures: usize,
    }

    impl ChunkStore for RecordingStore {
        fn embed_and_store(&mut self, entry: &StoreEntry) -> Result<(), StoreError> {
            if self.transient_failures > 0 {
                self.transient_failures -= 1;
                return Err(StoreError::Embedding {
                    reason: "temporarily unavailable".to_string(),
                });
            }
            if self.fail_chunk == Some(entry.chunk_id) {
                return Err(StoreError::UnsupportedMetadata {
                    key: "bad".to_string(),
                    kind: "map".to_string(),
                });
            }
            self.stored.push(entry.clone());
            Ok(())
        }

        fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn sample_chunks() -> Vec<ChunkRecord> {
        let text = vec!["Enrollment"; 400].join(" ");
        Chunker::new(ChunkerConfig::default())
            .expect("default config")
            .chunk_pages(&[text], None)
            .expect("chunking succeeds")
    }

    #[test]
    fn failed_chunk_does_not_hide_earlier_successes() {
        let chunks = sample_chunks();
        assert!(chunks.len() >= 3);

        let mut store = RecordingStore {
            fail_chunk: Some(1),
            ..RecordingStore::default()
        };
        let report = ingest_chunks(&mut store, &RetryPolicy::no_delay(3), "doc-1", &chunks);

        assert_eq!(report.failed, 1);
        assert_eq!(report.stored, chunks.len() - 1);
        assert_eq!(store.stored[0].chunk_id, 0);
        assert!(report.failures[0].contains("chunk 1"));
    }

    #[test]
    fn transient_failures_are_retried() {
        let chunks = sample_chunks();
        let mut store = RecordingStore {
            transient_failures: 2,
            ..RecordingStore::default()
        };
        let report = ingest_chunks(&mut store, &RetryPolicy::no_delay(3), "doc-2", &chunks);

        assert_eq!(report.failed, 0);
        assert_eq!(report.stored, chunks.len());
    }

    #[test]
    fn entries_carry_flat_metadata() {
        let chunks = sample_chunks();
        let mut store = RecordingStore::default();
        ingest_chunks(&mut store, &RetryPolicy::no_delay(1), "doc-3", &chunks);

        let entry = &store.stored[0];
        assert!(entry.metadata.values().all(|value| !matches!(value, MetadataValue::Map(_))));
        assert_eq!(
            entry.metadata.get("page_metadata.page_number"),
            Some(&MetadataValue::Integer(1))
        );
    }
}
