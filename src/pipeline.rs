use crate::chunking::{estimate_token_count, split_documents, Chunk};
use crate::config::{IndexPolicy, RagConfig};
use crate::document::load_directory;
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{corpus_fingerprint, VectorIndex};
use log::{info, warn};

/// The single decision taken at startup
#[derive(Debug)]
enum StartupAction {
    Load,
    Build(Vec<Chunk>),
}

/// Load and split the corpus.
///
/// An empty corpus, or one whose documents are all empty, is an
/// [`Error::EmptyCorpus`].
pub fn prepare_chunks(config: &RagConfig) -> Result<Vec<Chunk>> {
    let outcome = load_directory(&config.corpus_dir, &config.json_mapping)?;
    for skipped in &outcome.skipped {
        warn!("Skipped: {}", skipped);
    }
    if outcome.documents.is_empty() {
        return Err(Error::EmptyCorpus(config.corpus_dir.clone()));
    }

    let chunks = split_documents(&outcome.documents, config.chunk_size, config.chunk_overlap)?;
    if chunks.is_empty() {
        return Err(Error::EmptyCorpus(config.corpus_dir.clone()));
    }

    let tokens: usize = chunks.iter().map(|c| estimate_token_count(&c.content)).sum();
    info!(
        "Split {} documents into {} chunks (~{} tokens)",
        outcome.documents.len(),
        chunks.len(),
        tokens
    );
    Ok(chunks)
}

/// Make an index ready: load the snapshot in `config.index_dir` when there is
/// one (subject to `config.index_policy`), otherwise build it from the corpus
/// and save it right away.
pub async fn ensure_index(config: &RagConfig, embedder: &dyn EmbeddingProvider) -> Result<VectorIndex> {
    config.validate()?;
    let dir = &config.index_dir;
    let initial_size = VectorIndex::snapshot_size(dir);
    info!("Initial index size: {} bytes", initial_size);

    let action = if !VectorIndex::snapshot_exists(dir) {
        StartupAction::Build(prepare_chunks(config)?)
    } else {
        match config.index_policy {
            IndexPolicy::Reuse => StartupAction::Load,
            IndexPolicy::AlwaysRebuild => StartupAction::Build(prepare_chunks(config)?),
            IndexPolicy::RebuildIfStale => {
                let chunks = prepare_chunks(config)?;
                let stored = VectorIndex::stored_fingerprint(dir)?;
                if stored == corpus_fingerprint(&chunks) {
                    StartupAction::Load
                } else {
                    info!("Corpus changed since the index was saved, rebuilding");
                    StartupAction::Build(chunks)
                }
            }
        }
    };

    let index = match action {
        StartupAction::Load => {
            info!("Loading index from {}", dir.display());
            VectorIndex::load(dir, &config.expectation())?
        }
        StartupAction::Build(chunks) => {
            let index = VectorIndex::build(chunks, embedder, &config.build_options()).await?;
            index.save(dir)?;
            index
        }
    };

    info!(
        "Index ready: {} vectors, final size {} bytes",
        index.len(),
        VectorIndex::snapshot_size(dir)
    );
    Ok(index)
}
