//! In-process vector index with atomic on-disk snapshots.
//!
//! A snapshot directory holds three files:
//!
//! - `manifest.json`: model, dimension, metric, corpus fingerprint and the
//!   names and SHA-256 checksums of the two data files
//! - `index-*.json`: the vectors, in insertion order
//! - `chunks-*.json`: the chunk payload, in the same order
//!
//! Data files get fresh names on every save and the manifest is replaced by a
//! rename, so a reader either sees the previous snapshot or the new one.
//! Saves take an exclusive lock on `.lock` in the directory and loads a shared
//! one, so old data files are never removed under a reader or a second writer.

use crate::chunking::Chunk;
use crate::embeddings::{Embedding, EmbeddingProvider};
use crate::error::{Error, ProviderError, Result};
use crate::similarity::DistanceMetric;
use fs2::FileExt;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = ".lock";
const FORMAT_VERSION: u32 = 1;

/// A chunk together with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// A retrieved chunk and its distance to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// How chunks are embedded while building or extending an index
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Texts per embedding request
    pub batch_size: usize,
    /// Embedding requests in flight at once
    pub concurrency: usize,
    pub metric: DistanceMetric,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            batch_size: 16,
            concurrency: 4,
            metric: DistanceMetric::Cosine,
        }
    }
}

/// What a loaded snapshot must agree with
#[derive(Debug, Clone)]
pub struct IndexExpectation {
    /// The configured embedding model
    pub model: String,
    /// The vector length of that model, when known up front
    pub dimension: Option<usize>,
    /// The configured distance metric
    pub metric: DistanceMetric,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    model: String,
    dimension: usize,
    metric: DistanceMetric,
    entry_count: usize,
    corpus_fingerprint: String,
    vectors_file: String,
    vectors_sha256: String,
    chunks_file: String,
    chunks_sha256: String,
}

#[derive(Serialize)]
struct VectorsOut<'a> {
    dimension: usize,
    metric: DistanceMetric,
    vectors: Vec<&'a [f32]>,
}

#[derive(Deserialize)]
struct VectorsIn {
    dimension: usize,
    metric: DistanceMetric,
    vectors: Vec<Vec<f32>>,
}

/// Chunks and their vectors, searchable by distance to a query vector
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dimension: usize,
    metric: DistanceMetric,
    fingerprint: String,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Assemble an index from already embedded chunks.
    ///
    /// Every embedding must have the same length.
    pub fn from_entries(
        model: impl Into<String>,
        metric: DistanceMetric,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        let dimension = entries
            .first()
            .map(|e| e.embedding.dimension())
            .unwrap_or(0);
        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.dimension() != dimension)
        {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: bad.embedding.dimension(),
            });
        }

        let fingerprint = corpus_fingerprint(entries.iter().map(|e| &e.chunk));
        Ok(VectorIndex {
            model: model.into(),
            dimension,
            metric,
            fingerprint,
            entries,
        })
    }

    /// Embed every chunk and build an index from the results.
    ///
    /// Either every chunk is embedded or nothing is indexed.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        options: &BuildOptions,
    ) -> Result<Self> {
        info!(
            "Embedding {} chunks with {} (batch size {}, concurrency {})",
            chunks.len(),
            embedder.model_name(),
            options.batch_size,
            options.concurrency
        );

        let embeddings = embed_chunks(&chunks, embedder, options).await?;
        let dimension = check_dimensions(&embeddings, None)?;

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        let index = VectorIndex::from_entries(embedder.model_name(), options.metric, entries)?;

        info!(
            "Built index with {} vectors of dimension {}",
            index.len(),
            dimension.unwrap_or(0)
        );
        Ok(index)
    }

    /// Embed and append more chunks; on any failure the index is unchanged.
    pub async fn extend(
        &mut self,
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        options: &BuildOptions,
    ) -> Result<()> {
        if embedder.model_name() != self.model {
            return Err(Error::Configuration(format!(
                "index was built with '{}' but extension uses '{}'",
                self.model,
                embedder.model_name()
            )));
        }

        let embeddings = embed_chunks(&chunks, embedder, options).await?;
        let expected = if self.entries.is_empty() {
            None
        } else {
            Some(self.dimension)
        };
        if let Some(dimension) = check_dimensions(&embeddings, expected)? {
            self.dimension = dimension;
        }

        self.entries.extend(
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexEntry { chunk, embedding }),
        );
        self.fingerprint = corpus_fingerprint(self.entries.iter().map(|e| &e.chunk));
        debug!("Index now holds {} vectors", self.entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// SHA-256 over the indexed chunks, used to detect a changed corpus
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// The `k` nearest chunks with their distances, nearest first.
    ///
    /// Equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut ranked: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, self.metric.distance(query, &e.embedding.values)))
            .collect();
        // sort_by is stable
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .map(|(i, distance)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                distance,
            })
            .collect())
    }

    /// The `k` nearest chunks, nearest first
    pub fn retrieve(&self, query: &[f32], k: usize) -> Result<Vec<Chunk>> {
        Ok(self
            .search(query, k)?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }

    /// Whether a snapshot has been saved in `dir`
    pub fn snapshot_exists<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(MANIFEST_FILE).is_file()
    }

    /// Total bytes of the snapshot in `dir`, or 0 if there is none
    pub fn snapshot_size<P: AsRef<Path>>(dir: P) -> u64 {
        let dir = dir.as_ref();
        let Ok(manifest) = read_manifest(dir) else {
            return 0;
        };
        [
            MANIFEST_FILE,
            manifest.vectors_file.as_str(),
            manifest.chunks_file.as_str(),
        ]
        .into_iter()
        .filter_map(|name| fs::metadata(dir.join(name)).ok())
        .map(|meta| meta.len())
        .sum()
    }

    /// Persist the index into `dir`, replacing any previous snapshot atomically
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        self.save_with(dir.as_ref(), commit_manifest)
    }

    fn save_with<F>(&self, dir: &Path, commit: F) -> Result<()>
    where
        F: FnOnce(&Path, &Manifest) -> Result<()>,
    {
        fs::create_dir_all(dir)?;
        let _lock = DirLock::exclusive(dir)?;
        let previous = read_manifest(dir).ok();

        let mut written = Vec::new();
        if let Err(e) = self.write_snapshot(dir, &mut written, commit) {
            for path in &written {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        if let Some(previous) = previous {
            for name in [previous.vectors_file, previous.chunks_file] {
                if !is_plain_file_name(&name) {
                    continue;
                }
                let path = dir.join(&name);
                if written.contains(&path) {
                    continue;
                }
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove old snapshot file {}: {}", path.display(), e);
                }
            }
        }

        info!("Saved index with {} vectors to {}", self.len(), dir.display());
        Ok(())
    }

    fn write_snapshot<F>(&self, dir: &Path, written: &mut Vec<PathBuf>, commit: F) -> Result<()>
    where
        F: FnOnce(&Path, &Manifest) -> Result<()>,
    {
        let vectors = serde_json::to_vec(&VectorsOut {
            dimension: self.dimension,
            metric: self.metric,
            vectors: self
                .entries
                .iter()
                .map(|e| e.embedding.values.as_slice())
                .collect(),
        })?;
        let chunks = serde_json::to_vec(&self.entries.iter().map(|e| &e.chunk).collect::<Vec<_>>())?;

        let vectors_path = write_data_file(dir, "index-", &vectors)?;
        written.push(vectors_path.clone());
        let chunks_path = write_data_file(dir, "chunks-", &chunks)?;
        written.push(chunks_path.clone());

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            model: self.model.clone(),
            dimension: self.dimension,
            metric: self.metric,
            entry_count: self.entries.len(),
            corpus_fingerprint: self.fingerprint.clone(),
            vectors_file: file_name_string(&vectors_path),
            vectors_sha256: sha256_hex(&vectors),
            chunks_file: file_name_string(&chunks_path),
            chunks_sha256: sha256_hex(&chunks),
        };
        commit(dir, &manifest)
    }

    /// Load a snapshot saved by [`VectorIndex::save`]
    pub fn load<P: AsRef<Path>>(dir: P, expected: &IndexExpectation) -> Result<Self> {
        let dir = dir.as_ref();
        let _lock = match DirLock::shared(dir) {
            Ok(lock) => Some(lock),
            Err(e) => {
                debug!("Reading {} unlocked: {}", dir.display(), e);
                None
            }
        };
        let manifest = read_manifest(dir)?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::corrupt(
                dir,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }
        if manifest.model != expected.model {
            return Err(Error::corrupt(
                dir,
                format!(
                    "built with embedding model '{}' but '{}' is configured",
                    manifest.model, expected.model
                ),
            ));
        }
        if manifest.metric != expected.metric {
            return Err(Error::corrupt(
                dir,
                format!(
                    "saved with {} distance but {} is configured; rebuild the index",
                    manifest.metric, expected.metric
                ),
            ));
        }
        if let Some(dimension) = expected.dimension {
            if manifest.entry_count > 0 && manifest.dimension != dimension {
                return Err(Error::corrupt(
                    dir,
                    format!(
                        "vectors have dimension {} but the embedding model produces {}",
                        manifest.dimension, dimension
                    ),
                ));
            }
        }

        let vector_bytes = read_verified(dir, &manifest.vectors_file, &manifest.vectors_sha256)?;
        let chunk_bytes = read_verified(dir, &manifest.chunks_file, &manifest.chunks_sha256)?;
        let vectors: VectorsIn = serde_json::from_slice(&vector_bytes)
            .map_err(|e| Error::corrupt(dir, format!("undecodable vectors: {}", e)))?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&chunk_bytes)
            .map_err(|e| Error::corrupt(dir, format!("undecodable chunks: {}", e)))?;

        if vectors.dimension != manifest.dimension || vectors.metric != manifest.metric {
            return Err(Error::corrupt(dir, "vector file disagrees with manifest"));
        }
        if vectors.vectors.len() != manifest.entry_count || chunks.len() != manifest.entry_count {
            return Err(Error::corrupt(
                dir,
                format!(
                    "expected {} entries, found {} vectors and {} chunks",
                    manifest.entry_count,
                    vectors.vectors.len(),
                    chunks.len()
                ),
            ));
        }
        if let Some(bad) = vectors.vectors.iter().find(|v| v.len() != manifest.dimension) {
            return Err(Error::corrupt(
                dir,
                format!(
                    "vector of dimension {} in an index of dimension {}",
                    bad.len(),
                    manifest.dimension
                ),
            ));
        }

        let entries = chunks
            .into_iter()
            .zip(vectors.vectors)
            .map(|(chunk, values)| IndexEntry {
                chunk,
                embedding: Embedding::new(values),
            })
            .collect();

        info!(
            "Loaded index with {} vectors from {}",
            manifest.entry_count,
            dir.display()
        );

        Ok(VectorIndex {
            model: manifest.model,
            dimension: manifest.dimension,
            metric: manifest.metric,
            fingerprint: manifest.corpus_fingerprint,
            entries,
        })
    }

    /// Fingerprint stored in the snapshot in `dir`
    pub fn stored_fingerprint<P: AsRef<Path>>(dir: P) -> Result<String> {
        Ok(read_manifest(dir.as_ref())?.corpus_fingerprint)
    }
}

/// SHA-256 over chunk sources, ordinals and contents, in order
pub fn corpus_fingerprint<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.source.as_bytes());
        hasher.update([0u8]);
        hasher.update((chunk.ordinal as u64).to_le_bytes());
        hasher.update(chunk.content.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

async fn embed_chunks(
    chunks: &[Chunk],
    embedder: &dyn EmbeddingProvider,
    options: &BuildOptions,
) -> Result<Vec<Embedding>> {
    let batches: Vec<Vec<&str>> = chunks
        .chunks(options.batch_size.max(1))
        .map(|batch| batch.iter().map(|c| c.content.as_str()).collect())
        .collect();
    let total = batches.len();

    // buffered() yields results in submission order, not completion order
    let embedded: Vec<Vec<Embedding>> = stream::iter(batches.iter().enumerate())
        .map(|(i, texts)| async move {
            let embeddings = embedder.embed_batch(texts).await.map_err(Error::Embedding)?;
            if embeddings.len() != texts.len() {
                return Err(Error::Embedding(ProviderError::InvalidResponse(format!(
                    "asked for {} embeddings, got {}",
                    texts.len(),
                    embeddings.len()
                ))));
            }
            debug!("Embedded batch {}/{}", i + 1, total);
            Ok(embeddings)
        })
        .buffered(options.concurrency.max(1))
        .try_collect()
        .await?;

    Ok(embedded.into_iter().flatten().collect())
}

/// All embeddings must share one non-zero length, equal to `expected` if given
fn check_dimensions(embeddings: &[Embedding], expected: Option<usize>) -> Result<Option<usize>> {
    let Some(first) = embeddings.first() else {
        return Ok(expected);
    };
    let dimension = expected.unwrap_or(first.dimension());
    if dimension == 0 {
        return Err(Error::Embedding(ProviderError::InvalidResponse(
            "embedding is empty".to_string(),
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.dimension() != dimension) {
        return Err(Error::Embedding(ProviderError::InvalidResponse(format!(
            "embedding dimension {} differs from {}",
            bad.dimension(),
            dimension
        ))));
    }
    Ok(Some(dimension))
}

fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path)
        .map_err(|e| Error::corrupt(dir, format!("cannot read {}: {}", MANIFEST_FILE, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::corrupt(dir, format!("undecodable {}: {}", MANIFEST_FILE, e)))
}

fn read_verified(dir: &Path, name: &str, sha256: &str) -> Result<Vec<u8>> {
    if !is_plain_file_name(name) {
        return Err(Error::corrupt(dir, format!("invalid data file name '{}'", name)));
    }
    let bytes = fs::read(dir.join(name))
        .map_err(|e| Error::corrupt(dir, format!("cannot read {}: {}", name, e)))?;
    if sha256_hex(&bytes) != sha256 {
        return Err(Error::corrupt(dir, format!("checksum mismatch for {}", name)));
    }
    Ok(bytes)
}

/// Swap in the new manifest with a single rename
fn commit_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".manifest-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(manifest)?)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(MANIFEST_FILE)).map_err(|e| e.error)?;
    Ok(())
}

/// Advisory lock on a snapshot directory, released on drop
struct DirLock(File);

impl DirLock {
    fn exclusive(dir: &Path) -> Result<Self> {
        let file = open_lock_file(dir)?;
        FileExt::lock_exclusive(&file)?;
        Ok(DirLock(file))
    }

    fn shared(dir: &Path) -> Result<Self> {
        let file = open_lock_file(dir)?;
        FileExt::lock_shared(&file)?;
        Ok(DirLock(file))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn open_lock_file(dir: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))
}

fn write_data_file(dir: &Path, prefix: &str, bytes: &[u8]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".json")
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

fn is_plain_file_name(name: &str) -> bool {
    Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
