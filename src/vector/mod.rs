//! Vector index and its supporting infrastructure.
//!
//! The index itself lives in [`index`]; [`storage`] owns the on-disk
//! snapshot format, [`metadata`] its sidecar, and [`embedding`] the model
//! abstraction the mutation pipeline embeds text through.

pub mod embedding;
pub mod index;
pub mod metadata;
pub mod storage;
pub mod types;

pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, MockEmbeddingGenerator, ModelCache,
    create_entity_text, normalize,
};
pub use index::VectorIndex;
pub use metadata::IndexMetadata;
pub use storage::{SnapshotError, VectorSnapshot};
pub use types::{VECTOR_DIMENSION_384, VectorDimension, VectorError};
