//! Filesystem locations for persistent data.

use std::path::{Path, PathBuf};

/// Base directory for data that outlives any one workspace.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("embedix"))
        .unwrap_or_else(|| PathBuf::from(".embedix"))
}

/// Cache directory for downloaded embedding models.
pub fn models_dir() -> PathBuf {
    data_dir().join("models")
}

/// Index directory for one corpus under one embedding-model version.
///
/// Scoping the path by model version keeps incompatible vector spaces in
/// separate directories: after a model upgrade the stale directory is never
/// read again and the new one starts cold, triggering a full re-index.
pub fn index_dir(base: &Path, model_version: &str, corpus: &str) -> PathBuf {
    base.join(model_version).join(corpus)
}
