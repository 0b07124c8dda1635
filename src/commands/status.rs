use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::semantic::EmbeddingModel;
use crate::store::SqliteChunkStore;

pub fn run(args: StatusArgs) -> Result<()> {
    info!(db_path = %args.db_path.display(), "status requested");

    if !args.db_path.exists() {
        warn!(path = %args.db_path.display(), "database file missing");
        return Ok(());
    }

    let store = SqliteChunkStore::open(&args.db_path, EmbeddingModel::resolve(""))
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;
    let counts = store.counts()?;

    info!(
        path = %args.db_path.display(),
        documents = counts.documents,
        chunks = counts.chunks,
        embeddings = counts.embeddings,
        "database status"
    );

    Ok(())
}
