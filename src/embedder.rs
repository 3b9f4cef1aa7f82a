//! Local sentence-embedding model with a process-wide cache.
//!
//! Pure-Rust inference path: the ONNX encoder runs under tract, tokenization
//! uses the tokenizers crate, and batches execute on `spawn_blocking`. No
//! ONNX Runtime or system dependencies.
//!
//! The model lives under the hub snapshot convention
//! `models/models--sentence-transformers--<name>/snapshots/<rev>/`; the
//! most-recently-modified snapshot wins. When no snapshot exists the model
//! and tokenizer are downloaded once into that layout, then every later run
//! loads from disk. The loaded handle is a lazily-initialized singleton,
//! read-only after construction, so concurrent operations share one model.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tract_onnx::prelude::*;

use crate::config::Paths;

/// Default sentence encoder: small, multilingual, 384 dimensions.
pub const DEFAULT_MODEL: &str = "paraphrase-MiniLM-L6-v2";
const MODEL_ORG: &str = "sentence-transformers";
const MODEL_DIMS: usize = 384;
const MAX_SEQUENCE_LEN: usize = 256;

type OnnxModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

static SHARED: OnceLock<Embedder> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// A loaded sentence-embedding model.
pub struct Embedder {
    model: OnnxModel,
    tokenizer: tokenizers::Tokenizer,
    input_count: usize,
    dims: usize,
}

impl Embedder {
    /// The shared process-wide embedder, loading it on first touch.
    /// Concurrent first touches serialize on an init lock so the model is
    /// loaded at most once.
    pub fn shared(paths: &Paths) -> Result<&'static Embedder> {
        if let Some(embedder) = SHARED.get() {
            return Ok(embedder);
        }
        let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(embedder) = SHARED.get() {
            return Ok(embedder);
        }
        let embedder = Embedder::load(paths, DEFAULT_MODEL)?;
        Ok(SHARED.get_or_init(|| embedder))
    }

    /// Load a model from the local snapshot cache, downloading it first if
    /// no snapshot exists.
    pub fn load(paths: &Paths, model_name: &str) -> Result<Embedder> {
        let snapshot = match find_latest_snapshot(paths, model_name)? {
            Some(dir) => {
                tracing::info!(snapshot = %dir.display(), "using local model snapshot");
                dir
            }
            None => {
                tracing::info!(model = model_name, "no local snapshot, downloading once");
                download_snapshot(paths, model_name)?
            }
        };

        let onnx_path = locate_onnx(&snapshot)?;
        let tokenizer_path = snapshot.join("tokenizer.json");

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Load tokenizer {}: {}", tokenizer_path.display(), e))?;

        let graph = tract_onnx::onnx()
            .model_for_path(&onnx_path)
            .with_context(|| format!("Load ONNX model: {}", onnx_path.display()))?;
        let input_count = graph.inputs.len();
        let model = graph
            .into_optimized()
            .context("Optimize ONNX graph")?
            .into_runnable()
            .context("Build runnable model")?;

        Ok(Embedder {
            model,
            tokenizer,
            input_count,
            dims: MODEL_DIMS,
        })
    }

    pub fn model_name(&self) -> &'static str {
        DEFAULT_MODEL
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Encode a batch of texts into mean-pooled sentence vectors, one row
    /// per input. Rows are NOT normalized; callers normalize before
    /// indexing.
    pub fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings: Vec<_> = texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| anyhow::anyhow!("Tokenize for embedding: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .clamp(1, MAX_SEQUENCE_LEN);

        let batch = encodings.len();
        let mut input_ids = vec![0i64; batch * max_len];
        let mut attention_mask = vec![0i64; batch * max_len];
        for (i, enc) in encodings.iter().enumerate() {
            let ids = enc.get_ids();
            let len = ids.len().min(max_len);
            for (j, &id) in ids.iter().take(len).enumerate() {
                input_ids[i * max_len + j] = id as i64;
                attention_mask[i * max_len + j] = 1;
            }
        }

        let ids_tensor: Tensor =
            ndarray::Array2::from_shape_vec((batch, max_len), input_ids)?.into();
        let mask_tensor: Tensor =
            ndarray::Array2::from_shape_vec((batch, max_len), attention_mask)?.into();

        let mut inputs = tvec!(ids_tensor.into(), mask_tensor.into());
        if self.input_count >= 3 {
            // BERT-style exports also take token_type_ids; all zeros for
            // single-segment input.
            let types_tensor: Tensor =
                ndarray::Array2::<i64>::zeros((batch, max_len)).into();
            inputs.push(types_tensor.into());
        }

        let outputs = self.model.run(inputs)?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Model produced no output tensor"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| anyhow::anyhow!("Output tensor to array: {}", e))?;

        let mut vectors = Vec::with_capacity(batch);
        match view.shape() {
            // [batch, dims]: already pooled sentence embeddings.
            [rows, _] => {
                for i in 0..*rows {
                    vectors.push(view.slice(ndarray::s![i, ..]).iter().copied().collect());
                }
            }
            // [batch, seq, dims]: mean-pool over the attended positions.
            [_, seq, _] => {
                for (i, enc) in encodings.iter().enumerate() {
                    let valid = enc.get_ids().len().min(*seq).min(max_len).max(1);
                    let mut pooled = vec![0f32; self.dims];
                    for j in 0..valid {
                        for (k, &v) in view.slice(ndarray::s![i, j, ..]).iter().enumerate() {
                            if k < self.dims {
                                pooled[k] += v;
                            }
                        }
                    }
                    for value in &mut pooled {
                        *value /= valid as f32;
                    }
                    vectors.push(pooled);
                }
            }
            other => bail!("Unexpected embedding output shape: {:?}", other),
        }
        Ok(vectors)
    }
}

/// Encode on the blocking pool; embedding a large dataset is CPU-bound.
pub async fn encode_batch(paths: &Paths, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    let embedder = Embedder::shared(paths)?;
    tokio::task::spawn_blocking(move || embedder.encode(&texts))
        .await
        .context("Embedding task panicked")?
}

/// Directory of the most-recently-modified snapshot, if any.
fn find_latest_snapshot(paths: &Paths, model_name: &str) -> Result<Option<PathBuf>> {
    let snapshots_dir = paths
        .models_dir()
        .join(format!("models--{}--{}", MODEL_ORG, model_name))
        .join("snapshots");
    if !snapshots_dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(&snapshots_dir)
        .with_context(|| format!("Read snapshots dir: {}", snapshots_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if latest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

fn locate_onnx(snapshot: &Path) -> Result<PathBuf> {
    for candidate in ["onnx/model.onnx", "model.onnx"] {
        let path = snapshot.join(candidate);
        if path.exists() {
            return Ok(path);
        }
    }
    bail!("No ONNX model found under snapshot: {}", snapshot.display())
}

/// One-time download of the model and tokenizer into the snapshot layout.
fn download_snapshot(paths: &Paths, model_name: &str) -> Result<PathBuf> {
    let repo = format!("{}/{}", MODEL_ORG, model_name);
    let snapshot = paths
        .models_dir()
        .join(format!("models--{}--{}", MODEL_ORG, model_name))
        .join("snapshots")
        .join("main");

    for file in ["onnx/model.onnx", "tokenizer.json"] {
        let target = snapshot.join(file);
        if target.exists() {
            continue;
        }
        let url = format!("https://huggingface.co/{}/resolve/main/{}", repo, file);
        tracing::info!(url = %url, "downloading model file");
        let response = reqwest::blocking::get(&url)
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Download {}", url))?;
        let bytes = response.bytes().context("Read download body")?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Create model dir: {}", parent.display()))?;
        }
        std::fs::write(&target, &bytes)
            .with_context(|| format!("Write model file: {}", target.display()))?;
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_snapshot_dir_is_none() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();
        assert!(find_latest_snapshot(&paths, DEFAULT_MODEL).unwrap().is_none());
    }

    #[test]
    fn test_latest_snapshot_by_mtime() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();
        let base = paths
            .models_dir()
            .join(format!("models--{}--{}", MODEL_ORG, DEFAULT_MODEL))
            .join("snapshots");
        let older = base.join("aaa111");
        let newer = base.join("bbb222");
        std::fs::create_dir_all(&older).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::create_dir_all(&newer).unwrap();

        let found = find_latest_snapshot(&paths, DEFAULT_MODEL).unwrap().unwrap();
        assert_eq!(found, newer);
    }
}
