//! In-memory vector index with disk persistence and linear-scan search.
//!
//! The index owns a map from entity ID to a unit-length embedding vector.
//! Mutations arrive serialized through the mutation queue; searches read a
//! consistent snapshot under a shared lock on the caller's thread. Search is
//! a full linear scan by design: corpora stay in the thousands-to-tens-of-
//! thousands range, where scan cost is dominated by the per-vector
//! multiply-add and an approximate k-NN structure buys nothing but
//! complexity.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::types::EntityId;
use crate::vector::metadata::IndexMetadata;
use crate::vector::storage::{SnapshotError, VectorSnapshot};
use crate::vector::types::{VectorDimension, VectorError};

/// File name of the binary snapshot inside the index directory.
const SNAPSHOT_FILE: &str = "entries.vec";

/// Estimated bytes per entry beyond the raw vector: map bucket, the
/// `Arc<str>` ID and its allocation.
const ENTRY_OVERHEAD_BYTES: usize = 112;

/// Disk-backed store of text-embedding vectors for one entity corpus.
///
/// All vectors are unit-length, so cosine similarity degenerates to a dot
/// product. The capacity limit is owned by the memory budget coordinator
/// and may change at any time; entries beyond the limit are rejected by
/// `check_can_add_entry`, never silently evicted.
pub struct VectorIndex {
    entries: RwLock<HashMap<EntityId, Vec<f32>>>,
    capacity_limit: AtomicUsize,
    dimension: VectorDimension,
    model_name: String,
    dir: PathBuf,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("entries", &self.len())
            .field("capacity_limit", &self.capacity_limit())
            .field("dimension", &self.dimension.get())
            .field("model_name", &self.model_name)
            .field("dir", &self.dir)
            .finish()
    }
}

impl VectorIndex {
    /// Creates an empty index persisting under `dir`.
    ///
    /// `dir` should already be scoped by the embedding model's version (see
    /// `init::index_dir`), so a model upgrade lands in a fresh directory.
    pub fn new(
        dir: impl Into<PathBuf>,
        dimension: VectorDimension,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity_limit: AtomicUsize::new(usize::MAX),
            dimension,
            model_name: model_name.into(),
            dir: dir.into(),
        }
    }

    /// Returns the directory the index persists into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the vector dimension of this index.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of entries currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether an entry exists for the given ID.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Current maximum entry count.
    #[must_use]
    pub fn capacity_limit(&self) -> usize {
        self.capacity_limit.load(Ordering::Acquire)
    }

    /// Replaces the capacity limit. Called by the budget coordinator;
    /// existing entries above a lowered limit stay in place, only further
    /// inserts are refused.
    pub fn set_capacity_limit(&self, limit: usize) {
        self.capacity_limit.store(limit, Ordering::Release);
    }

    /// Whether one more unique entry fits under the capacity limit.
    ///
    /// Callers check this before starting embedding computation for a
    /// batch, to fail fast instead of wasting model time on vectors that
    /// cannot be stored.
    #[must_use]
    pub fn check_can_add_entry(&self) -> bool {
        self.len() < self.capacity_limit()
    }

    /// Inserts or overwrites entries.
    ///
    /// Succeeds unconditionally; callers are expected to have consulted
    /// `check_can_add_entry` first.
    pub fn add_entries(&self, pairs: impl IntoIterator<Item = (EntityId, Vec<f32>)>) {
        let mut entries = self.entries.write();
        for (id, vector) in pairs {
            entries.insert(id, vector);
        }
    }

    /// Removes the entry if present; no-op otherwise.
    pub fn delete_entry(&self, id: &EntityId) {
        self.entries.write().remove(id);
    }

    /// Atomic delete-then-insert used for renames with a fresh embedding.
    ///
    /// When `old_id == new_id` this is a pure value replace.
    pub fn update_entry(&self, old_id: &EntityId, new_id: EntityId, embedding: Vec<f32>) {
        let mut entries = self.entries.write();
        entries.remove(old_id);
        entries.insert(new_id, embedding);
    }

    /// Moves an existing entry to a new key, keeping its vector.
    ///
    /// Returns false if no entry exists under `old_id`.
    pub fn rename_entry(&self, old_id: &EntityId, new_id: EntityId) -> bool {
        let mut entries = self.entries.write();
        match entries.remove(old_id) {
            Some(vector) => {
                entries.insert(new_id, vector);
                true
            }
            None => false,
        }
    }

    /// Removes any entry whose ID is absent from `expected`.
    ///
    /// Used to prune entities that no longer exist in the corpus after
    /// structural changes the reconciler did not observe one by one.
    pub fn filter_ids_to(&self, expected: &HashMap<EntityId, u32>) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|id, _| expected.contains_key(id));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Pruned {removed} stale entries from index at {:?}", self.dir);
        }
    }

    /// Whether the index already has coverage for every given ID.
    ///
    /// Lets callers skip a no-op indexing pass entirely.
    #[must_use]
    pub fn check_all_ids_present<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a EntityId>,
    ) -> bool {
        let entries = self.entries.read();
        ids.into_iter().all(|id| entries.contains_key(id))
    }

    /// Returns up to `top_k` entries ordered by descending cosine
    /// similarity to `query` (a dot product, since vectors are
    /// pre-normalized). Entries scoring below `threshold` are excluded.
    ///
    /// Ties break on the entity ID, so identical index state always ranks
    /// identically.
    #[must_use]
    pub fn find_closest(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: Option<f32>,
    ) -> Vec<(EntityId, f32)> {
        let mut scored = self.rank(query, threshold);
        scored.truncate(top_k);
        scored
    }

    /// Same ranking criterion as `find_closest`, produced as a lazy
    /// sequence for callers that consume a prefix.
    ///
    /// The ranking sort itself is computed eagerly over all qualifying
    /// entries; early termination only saves downstream work. The sequence
    /// is restartable: call again after a recompute for fresh results.
    pub fn stream_find_close(
        &self,
        query: &[f32],
        threshold: Option<f32>,
    ) -> impl Iterator<Item = (EntityId, f32)> + use<> {
        self.rank(query, threshold).into_iter()
    }

    fn rank(&self, query: &[f32], threshold: Option<f32>) -> Vec<(EntityId, f32)> {
        if query.len() != self.dimension.get() {
            warn!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension.get()
            );
            return Vec::new();
        }

        let entries = self.entries.read();
        let mut scored: Vec<(EntityId, f32)> = entries
            .iter()
            .map(|(id, vector)| (id.clone(), dot(query, vector)))
            .filter(|(_, score)| threshold.is_none_or(|t| *score >= t))
            .collect();
        drop(entries);

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }

    /// Estimated bytes held by the current entries.
    #[must_use]
    pub fn estimate_memory_usage(&self) -> u64 {
        (self.len() * self.entry_footprint()) as u64
    }

    /// Maximum entry count fitting in `budget_bytes`.
    ///
    /// Pure function of vector dimensionality and per-entry overhead.
    #[must_use]
    pub fn estimate_limit_by_memory(&self, budget_bytes: u64) -> usize {
        (budget_bytes / self.entry_footprint() as u64) as usize
    }

    fn entry_footprint(&self) -> usize {
        self.dimension.get() * std::mem::size_of::<f32>() + ENTRY_OVERHEAD_BYTES
    }

    /// Loads the persisted snapshot, replacing the in-memory entries.
    ///
    /// Any failure - missing files, foreign format, incompatible model or
    /// dimension - leaves the index empty: a cold start costs only
    /// re-computation, never correctness. Returns the number of entries
    /// loaded.
    pub fn load_from_disk(&self) -> usize {
        match self.try_load() {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to load index from {:?}: {e}", self.dir);
                0
            }
        }
    }

    /// Strict variant of [`Self::load_from_disk`] for callers that want the
    /// failure rather than a silent cold start.
    ///
    /// A missing or stale-model directory is still a normal cold start
    /// (`Ok(0)`); only unreadable or malformed data is an error.
    pub fn try_load(&self) -> IndexResult<usize> {
        if !IndexMetadata::exists(&self.dir) {
            debug!("No metadata at {:?}, starting with empty index", self.dir);
            return Ok(0);
        }

        let metadata = IndexMetadata::load(&self.dir)?;
        if !metadata.is_compatible(&self.model_name, self.dimension.get()) {
            warn!(
                "Stale index at {:?} (model {}, dimension {}), starting empty",
                self.dir, metadata.model_name, metadata.dimension
            );
            return Ok(0);
        }

        let snapshot = VectorSnapshot::new(self.dir.join(SNAPSHOT_FILE), self.dimension);
        let loaded = snapshot.read().map_err(|e| self.read_error(e))?;

        let count = loaded.len();
        *self.entries.write() = loaded.into_iter().collect();
        debug!("Loaded {count} entries from {:?}", self.dir);
        Ok(count)
    }

    /// Persists a whole-index snapshot.
    ///
    /// Best-effort: failures are logged and swallowed, since losing
    /// embeddings only costs re-computation. Safe to call after partial
    /// indexing; the caller must guarantee no mutation is in flight (the
    /// mutation queue's drain discipline provides this).
    pub fn save_to_disk(&self) {
        if let Err(e) = self.try_save() {
            warn!("Failed to save index snapshot to {:?}: {e}", self.dir);
        }
    }

    /// Strict variant of [`Self::save_to_disk`].
    pub fn try_save(&self) -> IndexResult<()> {
        let entries = self.entries.read();
        let snapshot = VectorSnapshot::new(self.dir.join(SNAPSHOT_FILE), self.dimension);
        snapshot.write(&entries).map_err(|e| self.write_error(e))?;

        let metadata = IndexMetadata::new(
            self.model_name.clone(),
            self.dimension.get(),
            entries.len(),
        );
        metadata.save(&self.dir)?;

        debug!("Saved {} entries to {:?}", entries.len(), self.dir);
        Ok(())
    }

    fn read_error(&self, e: SnapshotError) -> IndexError {
        match e {
            SnapshotError::Io(source) => IndexError::SnapshotRead {
                path: self.dir.join(SNAPSHOT_FILE),
                source,
            },
            SnapshotError::InvalidFormat(msg) => {
                IndexError::Vector(VectorError::InvalidFormat(msg))
            }
            SnapshotError::Vector(e) => IndexError::Vector(e),
        }
    }

    fn write_error(&self, e: SnapshotError) -> IndexError {
        match e {
            SnapshotError::Io(source) => IndexError::SnapshotWrite {
                path: self.dir.join(SNAPSHOT_FILE),
                source,
            },
            SnapshotError::InvalidFormat(msg) => {
                IndexError::Vector(VectorError::InvalidFormat(msg))
            }
            SnapshotError::Vector(e) => IndexError::Vector(e),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
