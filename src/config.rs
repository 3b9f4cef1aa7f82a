//! Project-root discovery and the on-disk layout.
//!
//! All state lives in flat files under a single project root:
//!
//! ```text
//! <root>/
//!   local_data/              issue datasets, evaluation outputs
//!   local_data/vector_data/  vector-index sidecars
//!   local_data/time_trend/   trend chart PNGs
//!   models/                  embedding-model snapshots, tokenizer
//!   config/                  rubric + requirement knowledge base
//! ```
//!
//! The root is resolved once: an explicit `ILENS_ROOT` wins; otherwise the
//! current directory and its ancestors are probed for an existing
//! `local_data/` marker; otherwise the current directory is used as-is.
//! Required directories are created on first access.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default issue-dataset file, relative to `local_data/`.
pub const DEFAULT_DATA_FILE: &str = "issue_data.json";

/// Default vector-index base name under `local_data/vector_data/`.
pub const DEFAULT_INDEX_NAME: &str = "issue_vectors";

/// Resolved project layout. Cheap to clone; owns only the root path.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve the project root and create the required directories.
    pub fn discover() -> Result<Self> {
        let root = if let Ok(explicit) = std::env::var("ILENS_ROOT") {
            PathBuf::from(explicit)
        } else {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_marker_root(&cwd).unwrap_or(cwd)
        };
        let paths = Self { root };
        paths.ensure_layout()?;
        Ok(paths)
    }

    /// Build a `Paths` rooted at an explicit directory (tests, embedding).
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = Self { root: root.into() };
        paths.ensure_layout()?;
        Ok(paths)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.local_data_dir(),
            self.vector_data_dir(),
            self.time_trend_dir(),
            self.models_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_data_dir(&self) -> PathBuf {
        self.root.join("local_data")
    }

    pub fn vector_data_dir(&self) -> PathBuf {
        self.local_data_dir().join("vector_data")
    }

    pub fn time_trend_dir(&self) -> PathBuf {
        self.local_data_dir().join("time_trend")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Resolve a data-file path. Absolute paths pass through; paths that
    /// already start with `local_data/` are resolved against the root;
    /// anything else is taken relative to `local_data/`.
    pub fn data_file_path(&self, relative: &str) -> PathBuf {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else if relative.starts_with("local_data/") || relative.starts_with("local_data\\") {
            self.root.join(candidate)
        } else {
            self.local_data_dir().join(candidate)
        }
    }

    /// Base path for the vector-index sidecar triple (`<base>.index`,
    /// `<base>.metadata.jsonl`, `<base>.config.json`).
    pub fn vector_base_path(&self, name: &str) -> PathBuf {
        self.vector_data_dir().join(name)
    }

    /// Local tokenizer snapshot directory.
    pub fn tokenizer_dir(&self) -> PathBuf {
        self.models_dir().join("deepseek_v3_tokenizer")
    }

    /// Rubric configuration file.
    pub fn rubric_path(&self) -> PathBuf {
        self.config_dir().join("test_case_rules.json")
    }

    /// Requirement knowledge-base file.
    pub fn knowledge_base_path(&self) -> PathBuf {
        self.config_dir().join("require_list_config.json")
    }
}

/// Walk upward from `start` looking for a directory that already contains
/// a `local_data/` marker.
fn find_marker_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join("local_data").is_dir() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_created() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();
        assert!(paths.local_data_dir().is_dir());
        assert!(paths.vector_data_dir().is_dir());
        assert!(paths.time_trend_dir().is_dir());
        assert!(paths.models_dir().is_dir());
    }

    #[test]
    fn test_data_file_resolution() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();

        let bare = paths.data_file_path("issue_data.json");
        assert_eq!(bare, paths.local_data_dir().join("issue_data.json"));

        let prefixed = paths.data_file_path("local_data/issue_data.json");
        assert_eq!(prefixed, bare);

        let abs = tmp.path().join("elsewhere.json");
        assert_eq!(paths.data_file_path(abs.to_str().unwrap()), abs);
    }

    #[test]
    fn test_marker_root_found_from_subdir() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("local_data")).unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_marker_root(&nested).unwrap();
        assert_eq!(found, tmp.path());
    }
}
