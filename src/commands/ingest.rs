use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::chunking::Chunker;
use crate::cli::IngestArgs;
use crate::config::{ChunkerConfig, RetryPolicy};
use crate::error::ChunkError;
use crate::model::{ChunkRecord, IngestCounts, IngestDocumentResult, IngestRunManifest};
use crate::semantic::EmbeddingModel;
use crate::store::{DB_SCHEMA_VERSION, SqliteChunkStore, ingest_chunks};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

const DOC_ID_HASH_CHARS: usize = 12;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let config = args.chunker.resolve()?;
    let chunker = Chunker::new(config)?;
    let retry = RetryPolicy {
        max_attempts: args.max_attempts,
        ..RetryPolicy::default()
    };

    if let Some(parent) = args.db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        default_manifest_dir(&args.db_path).join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    info!(
        run_id = %run_id,
        inputs = args.inputs.len(),
        db_path = %args.db_path.display(),
        "starting ingest"
    );

    // Each document gets its own chunking pass; storing stays on this thread.
    let chunked = args
        .inputs
        .par_iter()
        .map(|path| (path.clone(), chunker.chunk_document(path)))
        .collect::<Vec<(PathBuf, Result<Vec<ChunkRecord>, ChunkError>)>>();

    let model = EmbeddingModel::resolve(&args.model_id);
    let mut store = SqliteChunkStore::open(&args.db_path, model.clone())
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;

    let mut documents = Vec::<IngestDocumentResult>::with_capacity(chunked.len());
    let mut warnings = Vec::<String>::new();

    for (path, outcome) in chunked {
        let source = path.display().to_string();
        let records = match outcome {
            Ok(records) => records,
            Err(err) => {
                error!(path = %source, error = %err, "skipping document");
                warnings.push(format!("{source}: {err}"));
                documents.push(IngestDocumentResult {
                    source,
                    doc_id: None,
                    status: "failed".to_string(),
                    chunk_count: 0,
                    stored_chunks: 0,
                    failed_chunks: 0,
                    error: Some(err.to_string()),
                });
                continue;
            }
        };

        let Some(first) = records.first() else {
            warn!(path = %source, "document produced no chunks");
            documents.push(IngestDocumentResult {
                source,
                doc_id: None,
                status: "empty".to_string(),
                chunk_count: 0,
                stored_chunks: 0,
                failed_chunks: 0,
                error: None,
            });
            continue;
        };

        let doc_id = doc_id_for(&path, first.metadata.document.source_hash.as_deref());
        store
            .register_document(&doc_id, &first.metadata.document, records.len())
            .with_context(|| format!("failed to register {source}"))?;

        let report = ingest_chunks(&mut store, &retry, &doc_id, &records);
        warnings.extend(report.failures.iter().cloned());
        documents.push(IngestDocumentResult {
            source,
            doc_id: Some(doc_id),
            status: if report.failed == 0 {
                "completed".to_string()
            } else {
                "partial".to_string()
            },
            chunk_count: records.len(),
            stored_chunks: report.stored,
            failed_chunks: report.failed,
            error: None,
        });
    }

    let totals = store.counts()?;
    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args, chunker.config()),
        db_path: args.db_path.display().to_string(),
        model_id: model.model_id,
        chunker: chunker.config().clone(),
        counts: IngestCounts {
            input_count: args.inputs.len(),
            processed_count: documents
                .iter()
                .filter(|document| document.doc_id.is_some())
                .count(),
            failed_documents: documents
                .iter()
                .filter(|document| document.status == "failed")
                .count(),
            chunks_produced: documents.iter().map(|document| document.chunk_count).sum(),
            chunks_stored: documents.iter().map(|document| document.stored_chunks).sum(),
            chunks_failed: documents.iter().map(|document| document.failed_chunks).sum(),
            documents_total: totals.documents,
            chunks_total: totals.chunks,
        },
        documents,
        warnings,
    };

    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote ingest run manifest");
    info!(
        processed = manifest.counts.processed_count,
        failed = manifest.counts.failed_documents,
        chunks_stored = manifest.counts.chunks_stored,
        "ingest completed"
    );

    Ok(())
}

fn default_manifest_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(|parent| parent.join("manifests"))
        .unwrap_or_else(|| PathBuf::from("manifests"))
}

/// `<file stem>-<hash prefix>`, stable across runs for identical bytes.
fn doc_id_for(path: &Path, source_hash: Option<&str>) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let stem = stem
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || character == '-' || character == '_' {
                character.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>();

    match source_hash {
        Some(hash) => format!(
            "{stem}-{}",
            hash.chars().take(DOC_ID_HASH_CHARS).collect::<String>()
        ),
        None => stem,
    }
}

fn render_ingest_command(args: &IngestArgs, config: &ChunkerConfig) -> String {
    let mut parts = vec!["paperchunk".to_string(), "ingest".to_string()];
    for input in &args.inputs {
        parts.push(format!("--input {}", input.display()));
    }
    parts.push(format!("--db-path {}", args.db_path.display()));
    parts.push(format!("--model-id {}", args.model_id));
    parts.push(format!("--max-attempts {}", args.max_attempts));
    parts.push(format!("--chunk-size {}", config.chunk_size));
    parts.push(format!("--chunk-overlap {}", config.chunk_overlap));
    if !config.keep_separator {
        parts.push("--no-keep-separator".to_string());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::ChunkerArgs;

    #[test]
    fn doc_ids_are_sanitized_and_hash_scoped() {
        assert_eq!(
            doc_id_for(Path::new("/data/Smith et al 2021.pdf"), Some("abcdef0123456789")),
            "smith_et_al_2021-abcdef012345"
        );
        assert_eq!(doc_id_for(Path::new("notes.txt"), None), "notes");
    }

    #[test]
    fn ingest_records_successes_and_failures_in_the_manifest() {
        let dir = std::env::temp_dir().join(format!("paperchunk_cmd_ingest_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let good = dir.join("trial.txt");
        fs::write(&good, vec!["Randomized"; 300].join(" ")).expect("write input");
        let missing = dir.join("missing.pdf");
        let manifest_path = dir.join("manifest.json");

        run(IngestArgs {
            inputs: vec![good, missing],
            db_path: dir.join("store.sqlite"),
            model_id: String::new(),
            max_attempts: 1,
            manifest_path: Some(manifest_path.clone()),
            chunker: ChunkerArgs {
                config: None,
                chunk_size: Some(500),
                chunk_overlap: Some(50),
                separators: Vec::new(),
                no_keep_separator: false,
            },
        })
        .expect("ingest succeeds overall");

        let raw = fs::read(&manifest_path).expect("manifest written");
        let manifest: serde_json::Value = serde_json::from_slice(&raw).expect("valid json");
        assert_eq!(manifest["counts"]["input_count"], 2);
        assert_eq!(manifest["counts"]["processed_count"], 1);
        assert_eq!(manifest["counts"]["failed_documents"], 1);
        assert_eq!(manifest["documents"][0]["status"], "completed");
        assert_eq!(manifest["documents"][1]["status"], "failed");
        assert_eq!(
            manifest["counts"]["chunks_stored"],
            manifest["counts"]["chunks_total"]
        );

        let _ = fs::remove_dir_all(&dir);
    }
}
