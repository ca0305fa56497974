//! The main library module for embedix
pub mod budget;
pub mod config;
pub mod error;
pub mod init;
pub mod queue;
pub mod reconcile;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use budget::{FixedMemoryProbe, MemoryBudgetCoordinator, MemoryProbe, SystemMemoryProbe};
pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use queue::{IndexingThrottle, LowMemoryNotifier, MutationQueue, PendingMutation};
pub use reconcile::{Entity, EntityExtractor, ReconcileSummary, ReconciliationEngine};
pub use types::{EntityId, EntityKind, UnitId};
pub use vector::{
    EmbeddingGenerator, FastEmbedGenerator, MockEmbeddingGenerator, ModelCache, VectorDimension,
    VectorError, VectorIndex,
};
