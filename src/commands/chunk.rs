use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::chunking::Chunker;
use crate::cli::ChunkArgs;
use crate::model::ChunkRecord;
use crate::util::write_json_pretty;

pub fn run(args: ChunkArgs) -> Result<()> {
    let config = args.chunker.resolve()?;
    let source = match &args.input {
        Some(path) => path.display().to_string(),
        None => "<stdin>".to_string(),
    };
    info!(
        input = %source,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        "chunking document"
    );

    let chunker = Chunker::new(config)?;
    let records = match &args.input {
        Some(path) => chunker
            .chunk_document(path)
            .with_context(|| format!("failed to chunk {source}"))?,
        None if args.stdin => chunk_reader(&chunker, std::io::stdin().lock())?,
        None => bail!("either --input or --stdin is required"),
    };

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &records)?;
            info!(path = %path.display(), chunks = records.len(), "wrote chunk records");
        }
        None => {
            let data =
                serde_json::to_vec_pretty(&records).context("failed to serialize chunk records")?;
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&data)
                .and_then(|_| stdout.write_all(b"\n"))
                .context("failed to write chunk records to stdout")?;
        }
    }

    Ok(())
}

/// Chunks raw text. Form feeds mark page breaks; without any the text is a
/// single page.
fn chunk_reader(chunker: &Chunker, mut reader: impl Read) -> Result<Vec<ChunkRecord>> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .context("failed to read text from stdin")?;

    let records = if text.contains('\u{000C}') {
        let pages = text
            .trim_end_matches(['\u{000C}', '\n'])
            .split('\u{000C}')
            .map(ToOwned::to_owned)
            .collect::<Vec<String>>();
        chunker.chunk_pages(&pages, None)
    } else {
        chunker.chunk_text(&text, None)
    };
    records.context("failed to chunk text from stdin")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::ChunkerArgs;
    use crate::config::ChunkerConfig;

    #[test]
    fn writes_records_for_a_text_document() {
        let dir = std::env::temp_dir().join(format!("paperchunk_cmd_chunk_{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let input = dir.join("note.txt");
        let output = dir.join("out/chunks.json");
        fs::write(&input, vec!["Placebo"; 300].join(" ")).expect("write input");

        run(ChunkArgs {
            input: Some(input.clone()),
            stdin: false,
            chunker: ChunkerArgs {
                config: None,
                chunk_size: Some(400),
                chunk_overlap: Some(40),
                separators: Vec::new(),
                no_keep_separator: false,
            },
            output: Some(output.clone()),
        })
        .expect("chunk command succeeds");

        let raw = fs::read(&output).expect("output written");
        let records: Vec<ChunkRecord> = serde_json::from_slice(&raw).expect("valid json");
        assert!(records.len() > 1);
        assert!(records.iter().all(|record| record.metadata.chunk_size <= 400));
        assert_eq!(records[0].metadata.document.file_name, "note.txt");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn reader_text_without_form_feeds_is_one_page() {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            ..ChunkerConfig::default()
        })
        .expect("valid config");
        let text = vec!["Hypertension"; 60].join(" ");

        let records = chunk_reader(&chunker, text.as_bytes()).expect("chunking succeeds");
        assert!(records.len() > 1);
        assert!(records.iter().all(|record| record.metadata.page_number == 1));
        assert!(records.iter().all(|record| record.metadata.document.page_count == 1));
    }

    #[test]
    fn reader_form_feeds_split_pages() {
        let chunker = Chunker::new(ChunkerConfig::default()).expect("valid config");
        let text = "Background on statin therapy.\u{000C}Outcomes at twelve months.\u{000C}\n";

        let records = chunk_reader(&chunker, text.as_bytes()).expect("chunking succeeds");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.document.page_count, 2);
        assert_eq!(records[0].metadata.page_number, 1);
        assert!(records[0].text.contains("Outcomes at twelve months."));
    }
}
