//! Embedding generation for vector indexing.
//!
//! Provides the trait the mutation pipeline embeds text through, a fastembed
//! implementation using the AllMiniLML6V2 model, and a single-flight cache
//! that lets the heavyweight model instance be dropped under memory pressure
//! and reloaded on the next use.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::types::EntityKind;
use crate::vector::types::VectorDimension;

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe and capable of batch processing.
/// Absence of a model is an expected condition (cold start, disabled
/// feature), not an error: `generate_embeddings` returns `None` and the
/// caller skips the affected work.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, one vector per input text.
    ///
    /// Returns `None` when the model is unavailable.
    fn generate_embeddings(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>>;

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Version identifier of the underlying model.
    ///
    /// Scopes the on-disk index path so vectors from incompatible model
    /// versions never share a snapshot.
    fn model_version(&self) -> &str;
}

/// FastEmbed implementation using the AllMiniLML6V2 model.
///
/// Produces 384-dimensional unit-length embeddings.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    version: String,
}

impl FastEmbedGenerator {
    /// Create a new FastEmbed generator, downloading the model into
    /// `cache_dir` on first use.
    ///
    /// Returns `None` if the model fails to initialize or download; callers
    /// treat that as "embedding service unavailable".
    pub fn new(cache_dir: PathBuf) -> Option<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false),
        );
        let model = match model {
            Ok(m) => m,
            Err(e) => {
                warn!("Embedding model unavailable: {e}");
                return None;
            }
        };

        Some(Self {
            model: Mutex::new(model),
            dimension: VectorDimension::dimension_384(),
            version: "AllMiniLML6V2-1".to_string(),
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }

        // fastembed expects Vec<String> for the embed method
        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        match self.model.lock().embed(text_strings, None) {
            Ok(embeddings) => Some(embeddings),
            Err(e) => {
                warn!("Embedding generation failed: {e}");
                None
            }
        }
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_version(&self) -> &str {
        &self.version
    }
}

type GeneratorLoader = dyn Fn() -> Option<Arc<dyn EmbeddingGenerator>> + Send + Sync;

/// Single-flight cache for the embedding model instance.
///
/// The model is expensive to hold, so hosts may evict it under memory
/// pressure; the next `get` reloads it. The slot mutex is held across the
/// load, so concurrent misses produce exactly one load.
pub struct ModelCache {
    slot: Mutex<Option<Arc<dyn EmbeddingGenerator>>>,
    loader: Box<GeneratorLoader>,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelCache {
    /// Create a cache that loads the generator on first use.
    ///
    /// The loader must be idempotent; it is invoked again after every
    /// eviction.
    pub fn new(
        loader: impl Fn() -> Option<Arc<dyn EmbeddingGenerator>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            slot: Mutex::new(None),
            loader: Box::new(loader),
        }
    }

    /// Create a cache pre-populated with the given generator.
    ///
    /// Eviction followed by `get` hands out the same instance again.
    pub fn preloaded(generator: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            slot: Mutex::new(Some(Arc::clone(&generator))),
            loader: Box::new(move || Some(Arc::clone(&generator))),
        }
    }

    /// Get the cached generator, loading it if absent.
    ///
    /// Returns `None` if the loader cannot produce a model.
    pub fn get(&self) -> Option<Arc<dyn EmbeddingGenerator>> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = (self.loader)();
        }
        slot.clone()
    }

    /// Drop the cached instance; the next `get` reloads it.
    pub fn evict(&self) {
        self.slot.lock().take();
    }

    /// Whether a model instance is currently cached.
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Scale a vector to unit length in place.
///
/// Zero vectors are left untouched; they cannot be normalized and score
/// zero against every query.
pub fn normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Compose the indexable representation for an entity.
///
/// Combines kind and display name into a single text optimized for
/// semantic matching.
#[must_use]
pub fn create_entity_text(kind: EntityKind, name: &str, detail: Option<&str>) -> String {
    if let Some(detail) = detail {
        format!("{} {name} {detail}", kind.as_str())
    } else {
        format!("{} {name}", kind.as_str())
    }
}

/// Deterministic embedding generator for tests and model-less hosts.
///
/// Produces unit-length vectors derived from text content so that equal
/// texts embed identically and related code terms land near each other.
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
}

impl Default for MockEmbeddingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingGenerator {
    /// Create a new mock generator with standard 384 dimensions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dimension: VectorDimension::dimension_384(),
        }
    }

    /// Create a generator with custom dimension for testing.
    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self { dimension }
    }
}

impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        let dim = self.dimension.get();
        let mut embeddings = Vec::with_capacity(texts.len());

        for text in texts {
            let mut embedding = vec![0.1; dim];

            // Spread each byte's contribution over the vector so distinct
            // texts produce distinct directions.
            for (i, byte) in text.bytes().enumerate() {
                let at = (i * 31 + byte as usize) % dim;
                embedding[at] += f32::from(byte) / 255.0;
            }

            normalize(&mut embedding);
            embeddings.push(embedding);
        }

        Some(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_version(&self) -> &str {
        "mock-1"
    }
}
