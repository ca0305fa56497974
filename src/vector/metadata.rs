//! Metadata sidecar for persisted vector indices.
//!
//! Tracks the embedding model, dimension, and entry count alongside the
//! binary snapshot so stale or incompatible data is detected on load instead
//! of being mixed into a live index.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::vector::types::VectorError;

/// Current Unix timestamp in seconds.
pub(crate) fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Metadata persisted next to a vector snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Name of the embedding model used
    pub model_name: String,

    /// Dimension of embeddings
    pub dimension: usize,

    /// Number of entries stored
    pub entry_count: usize,

    /// Unix timestamp when created
    pub created_at: u64,

    /// Unix timestamp when last updated
    pub updated_at: u64,

    /// Version of the metadata format
    pub version: u32,
}

impl IndexMetadata {
    /// Current metadata version
    const CURRENT_VERSION: u32 = 1;

    /// Create new metadata with current timestamp
    pub fn new(model_name: String, dimension: usize, entry_count: usize) -> Self {
        let now = get_utc_timestamp();
        Self {
            model_name,
            dimension,
            entry_count,
            created_at: now,
            updated_at: now,
            version: Self::CURRENT_VERSION,
        }
    }

    /// Update the metadata with a new entry count and timestamp
    pub fn update(&mut self, entry_count: usize) {
        self.entry_count = entry_count;
        self.updated_at = get_utc_timestamp();
    }

    /// Whether persisted data with this metadata is usable by an index built
    /// for the given model and dimension.
    pub fn is_compatible(&self, model_name: &str, dimension: usize) -> bool {
        self.model_name == model_name && self.dimension == dimension
    }

    /// Save metadata to a JSON file in the given directory
    pub fn save(&self, dir: &Path) -> Result<(), VectorError> {
        let metadata_path = dir.join("metadata.json");

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VectorError::Metadata(format!("Failed to serialize metadata: {e}")))?;

        std::fs::write(&metadata_path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file in the given directory
    pub fn load(dir: &Path) -> Result<Self, VectorError> {
        let metadata_path = dir.join("metadata.json");

        let json = std::fs::read_to_string(&metadata_path)?;

        let metadata: Self = serde_json::from_str(&json)
            .map_err(|e| VectorError::Metadata(format!("Failed to parse metadata: {e}")))?;

        if metadata.version > Self::CURRENT_VERSION {
            return Err(VectorError::Metadata(format!(
                "Metadata version {} is newer than supported version {}",
                metadata.version,
                Self::CURRENT_VERSION
            )));
        }

        Ok(metadata)
    }

    /// Check if a metadata file exists in the given directory
    pub fn exists(dir: &Path) -> bool {
        dir.join("metadata.json").exists()
    }
}
