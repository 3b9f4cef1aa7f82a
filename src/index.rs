//! Flat inner-product vector index over chunked issue records.
//!
//! Records are grouped into chunks of up to K adjacent records of the same
//! kind; each chunk's canonical text is embedded as one vector. The index
//! persists as a sidecar triple sharing one base path:
//!
//! ```text
//! <base>.index          header (magic, version, dim, rows) + row-major f32 LE
//! <base>.metadata.jsonl one ChunkMeta JSON object per line, row order
//! <base>.config.json    descriptor {model_name, chunk_count, vector_dimension, …}
//! ```
//!
//! Invariants enforced at load time: index row *i* corresponds to metadata
//! line *i*; the descriptor's chunk count matches both; vectors are
//! unit-length. A rebuild writes the full new set to `.tmp` files and then
//! renames into place, so an aborted build leaves the previous sidecars
//! intact.
//!
//! Scores are cosine similarity in `[-1, 1]` (inner product of normalized
//! vectors).

use anyhow::Context;
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{Paths, DEFAULT_INDEX_NAME};
use crate::embedder::{self, Embedder, DEFAULT_MODEL};
use crate::error::OpError;
use crate::extract::canonical_text;
use crate::models::{ChunkMeta, IssueDataset, IssueKind, SearchHit};
use crate::store;

/// Records per chunk unless overridden.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

const INDEX_MAGIC: &[u8; 4] = b"ILNX";
const INDEX_VERSION: u32 = 1;

/// Failure modes of the persisted index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index not built: {0}")]
    NotBuilt(String),

    #[error(
        "vector index incompatible: built with {stored_model} ({stored_dim} dims), \
         current model is {current_model} ({current_dim} dims)"
    )]
    Incompatible {
        stored_model: String,
        stored_dim: usize,
        current_model: String,
        current_dim: usize,
    },

    #[error("vector index corrupt: {0}")]
    Corrupt(String),
}

impl From<IndexError> for OpError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotBuilt(msg) => OpError::InputMissing(msg),
            incompatible @ IndexError::Incompatible { .. } => {
                OpError::IndexIncompatible(incompatible.to_string())
            }
            IndexError::Corrupt(msg) => OpError::IndexCorrupt(msg),
        }
    }
}

/// Small JSON descriptor persisted next to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub model_name: String,
    pub chunk_count: usize,
    pub vector_dimension: usize,
    pub created_at: String,
    #[serde(default = "default_encoding")]
    pub metadata_encoding: String,
}

fn default_encoding() -> String {
    "jsonl".to_string()
}

/// An index loaded into memory: an immutable snapshot of the sidecars.
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    /// Row-major `rows × dim` matrix of unit-length vectors.
    vectors: Vec<f32>,
    metadata: Vec<ChunkMeta>,
    descriptor: IndexDescriptor,
}

/// Summary statistics for an index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub vector_dimension: usize,
    pub total_records: usize,
    pub story_chunks: usize,
    pub bug_chunks: usize,
}

impl VectorIndex {
    /// Assemble an index from freshly built parts. `vectors` rows must
    /// already be L2-normalized and ordered like `metadata`.
    pub fn from_parts(vectors: Vec<Vec<f32>>, metadata: Vec<ChunkMeta>, model_name: &str) -> Self {
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let descriptor = IndexDescriptor {
            model_name: model_name.to_string(),
            chunk_count: metadata.len(),
            vector_dimension: dim,
            created_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            metadata_encoding: default_encoding(),
        };
        VectorIndex {
            dim,
            vectors: flat,
            metadata,
            descriptor,
        }
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn metadata(&self) -> &[ChunkMeta] {
        &self.metadata
    }

    /// Persist the sidecar triple atomically: everything is written to
    /// `.tmp` files first, then renamed over the previous set.
    pub fn save(&self, base: &Path) -> anyhow::Result<()> {
        if let Some(parent) = base.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Create index dir: {}", parent.display()))?;
        }

        let index_path = sidecar(base, "index");
        let metadata_path = sidecar(base, "metadata.jsonl");
        let config_path = sidecar(base, "config.json");

        // Index file: header + row-major little-endian f32 matrix.
        let rows = self.metadata.len();
        let mut buf = Vec::with_capacity(16 + self.vectors.len() * 4);
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(rows as u32).to_le_bytes());
        for value in &self.vectors {
            buf.extend_from_slice(&value.to_le_bytes());
        }

        let tmp_index = tmp_path(&index_path);
        std::fs::write(&tmp_index, &buf)
            .with_context(|| format!("Write index: {}", tmp_index.display()))?;

        let tmp_metadata = tmp_path(&metadata_path);
        {
            let file = std::fs::File::create(&tmp_metadata)
                .with_context(|| format!("Write metadata: {}", tmp_metadata.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            for meta in &self.metadata {
                serde_json::to_writer(&mut writer, meta).context("Serialize chunk metadata")?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }

        let tmp_config = tmp_path(&config_path);
        store::save_json(&tmp_config, &self.descriptor)?;

        // All three staged; swap into place.
        std::fs::rename(&tmp_index, &index_path)?;
        std::fs::rename(&tmp_metadata, &metadata_path)?;
        std::fs::rename(&tmp_config, &config_path)?;
        tracing::info!(base = %base.display(), rows, dim = self.dim, "vector index saved");
        Ok(())
    }

    /// Load an immutable snapshot of the sidecars.
    pub fn load(base: &Path) -> Result<VectorIndex, IndexError> {
        let index_path = sidecar(base, "index");
        if !index_path.exists() {
            return Err(IndexError::NotBuilt(format!(
                "no index at {}",
                index_path.display()
            )));
        }

        let bytes = std::fs::read(&index_path)
            .map_err(|e| IndexError::Corrupt(format!("cannot read index file: {}", e)))?;
        if bytes.len() < 16 || &bytes[0..4] != INDEX_MAGIC {
            return Err(IndexError::Corrupt("bad index header".to_string()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != INDEX_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index version {}",
                version
            )));
        }
        let dim = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let rows = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
        let expected = 16 + rows * dim * 4;
        if bytes.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "index size mismatch: {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let vectors: Vec<f32> = bytes[16..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let metadata_path = sidecar(base, "metadata.jsonl");
        let metadata_text = std::fs::read_to_string(&metadata_path)
            .map_err(|e| IndexError::Corrupt(format!("cannot read metadata sidecar: {}", e)))?;
        let metadata: Vec<ChunkMeta> = metadata_text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| IndexError::Corrupt(format!("bad metadata line: {}", e)))
            })
            .collect::<Result<_, _>>()?;
        if metadata.len() != rows {
            return Err(IndexError::Corrupt(format!(
                "metadata/index row mismatch: {} metadata entries, {} index rows",
                metadata.len(),
                rows
            )));
        }

        let config_path = sidecar(base, "config.json");
        let config_text = std::fs::read_to_string(&config_path)
            .map_err(|e| IndexError::Corrupt(format!("cannot read descriptor: {}", e)))?;
        let descriptor: IndexDescriptor = serde_json::from_str(&config_text)
            .map_err(|e| IndexError::Corrupt(format!("bad descriptor: {}", e)))?;
        if descriptor.chunk_count != rows {
            return Err(IndexError::Corrupt(format!(
                "descriptor chunk_count {} != {} index rows",
                descriptor.chunk_count, rows
            )));
        }
        if descriptor.vector_dimension != dim {
            return Err(IndexError::Corrupt(format!(
                "descriptor dimension {} != {} index dimension",
                descriptor.vector_dimension, dim
            )));
        }

        Ok(VectorIndex {
            dim,
            vectors,
            metadata,
            descriptor,
        })
    }

    /// Refuse an index built with a different model or dimensionality.
    pub fn ensure_compatible(&self, model_name: &str, dims: usize) -> Result<(), IndexError> {
        if self.descriptor.model_name != model_name || self.dim != dims {
            return Err(IndexError::Incompatible {
                stored_model: self.descriptor.model_name.clone(),
                stored_dim: self.dim,
                current_model: model_name.to_string(),
                current_dim: dims,
            });
        }
        Ok(())
    }

    /// Top-k rows by inner product against a normalized query vector,
    /// descending score. Fewer than k rows simply yields fewer hits.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<SearchHit> {
        if query.len() != self.dim || top_k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(row, vector)| {
                let dot: f32 = vector.iter().zip(query).map(|(a, b)| a * b).sum();
                (dot, row)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
            .into_iter()
            .map(|(score, row)| SearchHit {
                score,
                metadata: self.metadata[row].clone(),
            })
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            chunk_count: self.metadata.len(),
            vector_dimension: self.dim,
            total_records: self.metadata.iter().map(|m| m.item_count).sum(),
            story_chunks: self
                .metadata
                .iter()
                .filter(|m| m.item_type == IssueKind::Story)
                .count(),
            bug_chunks: self
                .metadata
                .iter()
                .filter(|m| m.item_type == IssueKind::Bug)
                .count(),
        }
    }
}

fn sidecar(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(suffix);
    base.with_file_name(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Normalize a vector to unit length in place; zero vectors stay zero.
pub fn normalize_l2(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in v {
            *x /= norm;
        }
    }
}

/// Split a dataset into chunk metadata (with the joined canonical text to
/// embed). Pure and deterministic: rebuilding over the same dataset with
/// the same K reproduces identical chunk ids.
pub fn chunk_dataset(dataset: &IssueDataset, chunk_size: usize) -> Vec<ChunkMeta> {
    let mut chunks = Vec::new();
    for kind in [IssueKind::Story, IssueKind::Bug] {
        let records = dataset.records_of(kind);
        for (chunk_index, group) in records.chunks(chunk_size.max(1)).enumerate() {
            let texts: Vec<String> = group.iter().map(|r| canonical_text(r, kind)).collect();
            let text = texts.join(" | ");
            chunks.push(ChunkMeta {
                chunk_id: chunk_id(kind, chunk_index, &text),
                item_type: kind,
                item_ids: group.iter().map(|r| r.id.clone()).collect(),
                item_count: group.len(),
                chunk_index,
                original_items: group.to_vec(),
                text,
            });
        }
    }
    chunks
}

/// `<kind>_<index>_<hash>` with a stable text-derived hash, so ids survive
/// rebuilds over unchanged data.
fn chunk_id(kind: IssueKind, chunk_index: usize, text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let hash = u64::from_be_bytes(prefix) % 10000;
    format!("{}_{}_{}", kind.as_str(), chunk_index, hash)
}

// ============ Operations ============

/// Result of `ilens index build`.
#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub status: &'static str,
    pub message: String,
    pub stats: IndexStats,
    pub vector_db_path: String,
}

/// Build (or fully rebuild) the index from a dataset.
pub async fn run_build(
    paths: &Paths,
    dataset: &IssueDataset,
    chunk_size: usize,
) -> Result<BuildReport, OpError> {
    let base = paths.vector_base_path(DEFAULT_INDEX_NAME);
    let chunks = chunk_dataset(dataset, chunk_size);
    tracing::info!(
        stories = dataset.stories.len(),
        bugs = dataset.bugs.len(),
        chunks = chunks.len(),
        "chunked dataset for indexing"
    );

    if chunks.is_empty() {
        // Nothing to embed; leave any previous sidecars untouched.
        return Ok(BuildReport {
            status: "success",
            message: "dataset is empty; nothing to index".to_string(),
            stats: IndexStats {
                chunk_count: 0,
                vector_dimension: 0,
                total_records: 0,
                story_chunks: 0,
                bug_chunks: 0,
            },
            vector_db_path: base.display().to_string(),
        });
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let mut vectors = embedder::encode_batch(paths, texts).await?;
    for vector in &mut vectors {
        normalize_l2(vector);
    }

    let index = VectorIndex::from_parts(vectors, chunks, DEFAULT_MODEL);
    index.save(&base)?;
    let stats = index.stats();

    Ok(BuildReport {
        status: "success",
        message: format!("indexed {} chunks", stats.chunk_count),
        stats,
        vector_db_path: base.display().to_string(),
    })
}

/// One formatted search batch in a [`SearchReport`].
#[derive(Debug, Serialize)]
pub struct SearchBatch {
    pub batch_rank: usize,
    pub relevance_score: f32,
    pub chunk_id: String,
    pub item_type: IssueKind,
    pub item_count: usize,
    pub item_ids: Vec<String>,
    pub items: Vec<crate::models::IssueRecord>,
}

/// Result of `ilens search`.
#[derive(Debug, Serialize)]
pub struct SearchReport {
    pub status: &'static str,
    pub query: String,
    pub batches: usize,
    pub results: Vec<SearchBatch>,
}

/// Query the persisted index.
pub async fn run_search(
    paths: &Paths,
    query: &str,
    top_k: usize,
) -> Result<SearchReport, OpError> {
    if query.trim().is_empty() {
        return Err(OpError::InputMalformed("query is empty".to_string()));
    }

    let base = paths.vector_base_path(DEFAULT_INDEX_NAME);
    let index = VectorIndex::load(&base)?;
    let embedder = Embedder::shared(paths).map_err(OpError::Other)?;
    index.ensure_compatible(embedder.model_name(), embedder.dims())?;

    let mut query_vectors = embedder::encode_batch(paths, vec![query.to_string()]).await?;
    let mut query_vector = query_vectors
        .pop()
        .ok_or_else(|| OpError::Other(anyhow::anyhow!("empty query embedding")))?;
    normalize_l2(&mut query_vector);

    let hits = index.search(&query_vector, top_k);
    let results: Vec<SearchBatch> = hits
        .into_iter()
        .enumerate()
        .map(|(rank, hit)| SearchBatch {
            batch_rank: rank + 1,
            relevance_score: hit.score,
            chunk_id: hit.metadata.chunk_id,
            item_type: hit.metadata.item_type,
            item_count: hit.metadata.item_count,
            item_ids: hit.metadata.item_ids,
            items: hit.metadata.original_items,
        })
        .collect();

    Ok(SearchReport {
        status: "success",
        query: query.to_string(),
        batches: results.len(),
        results,
    })
}

/// Result of `ilens index info`.
#[derive(Debug, Serialize)]
pub struct InfoReport {
    pub status: &'static str,
    pub stats: IndexStats,
    pub model_name: String,
    pub created_at: String,
    pub database_path: String,
}

/// Inspect the persisted index without touching the model.
pub fn run_info(paths: &Paths) -> Result<InfoReport, OpError> {
    let base = paths.vector_base_path(DEFAULT_INDEX_NAME);
    let index = VectorIndex::load(&base)?;
    Ok(InfoReport {
        status: "success",
        stats: index.stats(),
        model_name: index.descriptor().model_name.clone(),
        created_at: index.descriptor().created_at.clone(),
        database_path: base.display().to_string(),
    })
}
