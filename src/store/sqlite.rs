use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::model::{DocumentMetadata, MetadataMap, MetadataValue};
use crate::semantic::{
    EmbeddingModel, cosine_similarity, decode_embedding_blob, embedding_text_hash,
    encode_embedding_blob,
};
use crate::store::{ChunkStore, SearchHit, StoreEntry};
use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "paperchunk-store-v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub documents: i64,
    pub chunks: i64,
    pub embeddings: i64,
}

pub struct SqliteChunkStore {
    connection: Connection,
    model: EmbeddingModel,
}

impl SqliteChunkStore {
    pub fn open(path: &Path, model: EmbeddingModel) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(connection, model)
    }

    pub fn open_in_memory(model: EmbeddingModel) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, model)
    }

    fn from_connection(connection: Connection, model: EmbeddingModel) -> Result<Self, StoreError> {
        connection.pragma_update(None, "foreign_keys", "ON")?;
        ensure_schema(&connection)?;
        Ok(Self { connection, model })
    }

    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    /// Records the source document and drops any chunks stored for it by an
    /// earlier run, so a re-chunked document never keeps stale rows.
    pub fn register_document(
        &mut self,
        doc_id: &str,
        document: &DocumentMetadata,
        chunk_count: usize,
    ) -> Result<(), StoreError> {
        let tx = self.connection.transaction()?;
        let removed = tx.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])?;
        tx.execute(
            "
            INSERT INTO documents(doc_id, source, file_name, title, page_count, source_hash, chunk_count, ingested_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(doc_id) DO UPDATE SET
              source=excluded.source,
              file_name=excluded.file_name,
              title=excluded.title,
              page_count=excluded.page_count,
              source_hash=excluded.source_hash,
              chunk_count=excluded.chunk_count,
              ingested_at=excluded.ingested_at
            ",
            params![
                doc_id,
                document.source,
                document.file_name,
                document.title,
                document.page_count as i64,
                document.source_hash,
                chunk_count as i64,
                now_utc_string(),
            ],
        )?;
        tx.commit()?;

        if removed > 0 {
            debug!(doc_id, removed, "replaced previously stored chunks");
        }
        Ok(())
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            documents: self.count("SELECT COUNT(*) FROM documents")?,
            chunks: self.count("SELECT COUNT(*) FROM chunks")?,
            embeddings: self.count("SELECT COUNT(*) FROM chunk_embeddings")?,
        })
    }

    fn count(&self, sql: &str) -> Result<i64, StoreError> {
        Ok(self.connection.query_row(sql, [], |row| row.get(0))?)
    }

    fn existing_text_hash(&self, chunk_key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .connection
            .query_row(
                "SELECT text_hash FROM chunk_embeddings WHERE chunk_key = ?1 AND model_id = ?2",
                params![chunk_key, self.model.model_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl ChunkStore for SqliteChunkStore {
    fn embed_and_store(&mut self, entry: &StoreEntry) -> Result<(), StoreError> {
        ensure_flat(&entry.metadata)?;

        let chunk_key = chunk_key(&entry.doc_id, entry.chunk_id);
        let text_hash = embedding_text_hash(&entry.text);
        let page_number = match entry.metadata.get("page_number") {
            Some(MetadataValue::Integer(page)) => Some(*page),
            _ => None,
        };
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let reuse_embedding =
            self.existing_text_hash(&chunk_key)?.as_deref() == Some(text_hash.as_str());

        let tx = self.connection.transaction()?;
        tx.execute(
            "
            INSERT INTO chunks(chunk_key, doc_id, chunk_id, page_number, text, metadata_json, text_hash)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(chunk_key) DO UPDATE SET
              page_number=excluded.page_number,
              text=excluded.text,
              metadata_json=excluded.metadata_json,
              text_hash=excluded.text_hash
            ",
            params![
                chunk_key,
                entry.doc_id,
                entry.chunk_id as i64,
                page_number,
                entry.text,
                metadata_json,
                text_hash,
            ],
        )?;

        if reuse_embedding {
            debug!(chunk_key = %chunk_key, "embedding unchanged; skipped");
        } else {
            let vector = self.model.embed(&entry.text);
            tx.execute(
                "
                INSERT INTO chunk_embeddings(chunk_key, model_id, embedding, embedding_dim, text_hash, generated_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(chunk_key, model_id) DO UPDATE SET
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  text_hash=excluded.text_hash,
                  generated_at=excluded.generated_at
                ",
                params![
                    chunk_key,
                    self.model.model_id,
                    encode_embedding_blob(&vector),
                    vector.len() as i64,
                    text_hash,
                    now_utc_string(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.model.embed(query);
        let mut statement = self.connection.prepare(
            "
            SELECT c.doc_id, c.chunk_id, c.page_number, c.text, e.embedding, e.embedding_dim
            FROM chunk_embeddings e
            JOIN chunks c ON c.chunk_key = e.chunk_key
            WHERE e.model_id = ?1
            ",
        )?;
        let mut rows = statement.query(params![self.model.model_id])?;

        let mut hits = Vec::<SearchHit>::new();
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(4)?;
            let dim: i64 = row.get(5)?;
            let Some(vector) = decode_embedding_blob(&blob, dim.max(0) as usize) else {
                continue;
            };

            hits.push(SearchHit {
                doc_id: row.get(0)?,
                chunk_id: row.get::<_, i64>(1)?.max(0) as usize,
                page_number: row.get(2)?,
                score: cosine_similarity(&query_vector, &vector),
                text: row.get(3)?,
            });
        }

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.doc_id.cmp(&right.doc_id))
                .then_with(|| left.chunk_id.cmp(&right.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn chunk_key(doc_id: &str, chunk_id: usize) -> String {
    format!("{doc_id}:{chunk_id}")
}

fn ensure_flat(metadata: &MetadataMap) -> Result<(), StoreError> {
    match metadata
        .iter()
        .find(|(_, value)| matches!(value, MetadataValue::Map(_)))
    {
        Some((key, value)) => Err(StoreError::UnsupportedMetadata {
            key: key.clone(),
            kind: value.kind().to_string(),
        }),
        None => Ok(()),
    }
}

fn ensure_schema(connection: &Connection) -> Result<(), StoreError> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
          doc_id TEXT PRIMARY KEY,
          source TEXT NOT NULL,
          file_name TEXT NOT NULL,
          title TEXT,
          page_count INTEGER NOT NULL,
          source_hash TEXT,
          chunk_count INTEGER NOT NULL DEFAULT 0,
          ingested_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
          chunk_key TEXT PRIMARY KEY,
          doc_id TEXT NOT NULL,
          chunk_id INTEGER NOT NULL,
          page_number INTEGER,
          text TEXT NOT NULL,
          metadata_json TEXT NOT NULL,
          text_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunk_embeddings (
          chunk_key TEXT NOT NULL,
          model_id TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          text_hash TEXT NOT NULL,
          generated_at TEXT NOT NULL,
          PRIMARY KEY (chunk_key, model_id),
          FOREIGN KEY (chunk_key) REFERENCES chunks(chunk_key) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id, chunk_id);
        CREATE INDEX IF NOT EXISTS idx_chunk_embeddings_model ON chunk_embeddings(model_id);
        ",
    )?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteChunkStore {
        SqliteChunkStore::open_in_memory(EmbeddingModel::resolve("")).expect("in-memory store")
    }

    fn entry(doc_id: &str, chunk_id: usize, text: &str) -> StoreEntry {
        let mut metadata = MetadataMap::new();
        metadata.insert("page_number".to_string(), MetadataValue::Integer(2));
        metadata.insert("has_citations".to_string(), MetadataValue::Bool(false));
        metadata.insert(
            "section.title".to_string(),
            MetadataValue::Text("2.1 Methods".to_string()),
        );
        StoreEntry {
            doc_id: doc_id.to_string(),
            chunk_id,
            text: text.to_string(),
            metadata,
        }
    }

    #[test]
    fn stores_chunks_and_ranks_by_similarity() {
        let mut store = store();
        store
            .embed_and_store(&entry("doc", 0, "Beta blockers reduce mortality after infarction."))
            .expect("store chunk 0");
        store
            .embed_and_store(&entry("doc", 1, "Sample collection followed the lab protocol."))
            .expect("store chunk 1");

        let hits = store.search("beta blockers mortality", 2).expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, 0);
        assert_eq!(hits[0].page_number, Some(2));
        assert!(hits[0].score > hits[1].score);

        let counts = store.counts().expect("counts");
        assert_eq!(counts.chunks, 2);
        assert_eq!(counts.embeddings, 2);
    }

    #[test]
    fn nested_metadata_is_rejected() {
        let mut store = store();
        let mut bad = entry("doc", 0, "text");
        bad.metadata
            .insert("section".to_string(), MetadataValue::Map(MetadataMap::new()));

        let err = store.embed_and_store(&bad).expect_err("nested map rejected");
        assert!(matches!(err, StoreError::UnsupportedMetadata { ref key, .. } if key == "section"));
        assert_eq!(store.counts().expect("counts").chunks, 0);
    }

    #[test]
    fn restoring_a_chunk_replaces_it() {
        let mut store = store();
        store
            .embed_and_store(&entry("doc", 0, "first version"))
            .expect("first store");
        store
            .embed_and_store(&entry("doc", 0, "second version"))
            .expect("second store");

        let counts = store.counts().expect("counts");
        assert_eq!(counts.chunks, 1);
        assert_eq!(counts.embeddings, 1);
        let hits = store.search("second version", 1).expect("search");
        assert_eq!(hits[0].text, "second version");
    }

    #[test]
    fn reregistering_a_document_drops_its_old_chunks() {
        let mut store = store();
        let document = DocumentMetadata::for_text_input(now_utc_string());

        store
            .register_document("doc-r", &document, 5)
            .expect("first registration");
        for chunk_id in 0..5 {
            store
                .embed_and_store(&entry("doc-r", chunk_id, &format!("old chunk {chunk_id}")))
                .expect("store old chunk");
        }
        store
            .embed_and_store(&entry("doc-other", 0, "unrelated chunk"))
            .expect("store other document");

        store
            .register_document("doc-r", &document, 2)
            .expect("second registration");
        for chunk_id in 0..2 {
            store
                .embed_and_store(&entry("doc-r", chunk_id, &format!("new chunk {chunk_id}")))
                .expect("store new chunk");
        }

        let counts = store.counts().expect("counts");
        assert_eq!(counts.documents, 1);
        assert_eq!(counts.chunks, 3);
        assert_eq!(counts.embeddings, 3);

        let hits = store.search("old chunk", 10).expect("search");
        assert!(hits.iter().all(|hit| !hit.text.starts_with("old")));
        assert!(hits.iter().filter(|hit| hit.doc_id == "doc-r").all(|hit| hit.chunk_id < 2));
    }

    #[test]
    fn registered_documents_are_counted() {
        let mut store = store();
        let document = DocumentMetadata::for_text_input(now_utc_string());
        store
            .register_document("doc-a", &document, 4)
            .expect("register");
        store
            .register_document("doc-a", &document, 5)
            .expect("re-register");

        assert_eq!(store.counts().expect("counts").documents, 1);
        assert!(store.search("", 3).expect("blank query").is_empty());
    }
}
