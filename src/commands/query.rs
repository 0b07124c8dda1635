use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::QueryArgs;
use crate::semantic::EmbeddingModel;
use crate::store::{ChunkStore, SearchHit, SqliteChunkStore};
use crate::util::preview;

const TEXT_PREVIEW_CHARS: usize = 240;

#[derive(Debug, Serialize)]
struct QueryResponse<'a> {
    query: &'a str,
    model_id: &'a str,
    limit: usize,
    returned: usize,
    results: &'a [SearchHit],
}

pub fn run(args: QueryArgs) -> Result<()> {
    if !args.db_path.exists() {
        bail!("database not found: {}", args.db_path.display());
    }

    let model = EmbeddingModel::resolve(&args.model_id);
    let store = SqliteChunkStore::open(&args.db_path, model)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;
    let hits = store.search(&args.query, args.limit)?;

    info!(query = %args.query, returned = hits.len(), "query completed");

    if args.json {
        write_json_response(&args, &store.model().model_id, &hits)
    } else {
        write_text_response(&args.query, &hits)
    }
}

fn write_json_response(args: &QueryArgs, model_id: &str, hits: &[SearchHit]) -> Result<()> {
    let response = QueryResponse {
        query: &args.query,
        model_id,
        limit: args.limit,
        returned: hits.len(),
        results: hits,
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize query json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(query: &str, hits: &[SearchHit]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Query: {query}")?;
    writeln!(output, "Results: {}", hits.len())?;
    for (rank, hit) in hits.iter().enumerate() {
        writeln!(
            output,
            "{}. {} chunk {} page {} score={:.4}",
            rank + 1,
            hit.doc_id,
            hit.chunk_id,
            hit.page_number
                .map(|page| page.to_string())
                .unwrap_or_else(|| "-".to_string()),
            hit.score,
        )?;
        writeln!(output, "   {}", render_preview(&hit.text))?;
    }

    output.flush()?;
    Ok(())
}

fn render_preview(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    let shown = preview(&flattened, TEXT_PREVIEW_CHARS);
    if shown.len() < flattened.len() {
        format!("{shown}...")
    } else {
        shown.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(render_preview("Cohort\n\nstudy"), "Cohort study");

        let long = "word ".repeat(100);
        let rendered = render_preview(&long);
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.chars().count(), TEXT_PREVIEW_CHARS + 3);
    }
}
