//! Diff-based reconciliation of entity sets against a changing corpus.
//!
//! For every source unit (typically a file) the engine remembers the
//! last-observed multiset of entity IDs. When a unit changes, the current
//! entities are re-extracted and diffed against that snapshot by occurrence
//! count, producing the minimal add/delete batches for the mutation queue.
//! Counting occurrences, rather than diffing sets, is what keeps duplicate
//! IDs honest: "present twice now, was present once" requires an insertion
//! that a set diff would never see.
//!
//! Cross-unit moves are a known limitation: an entity relocated between two
//! units reconciles correctly only when both units' change events fire; if
//! only one fires, the index can go stale until the other unit is observed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::queue::MutationQueue;
use crate::types::{EntityId, UnitId};

/// An indexable entity produced by the extractor: a stable ID plus the text
/// that represents it to the embedding model.
///
/// Entities are owned by the host; only `(id, embedding)` pairs are
/// ultimately retained in the index.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub text: String,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Extractor collaborator: returns the entities a unit currently declares.
///
/// Synchronous and side-effect-free; invoked on every observed change of a
/// unit.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, unit: &UnitId) -> Vec<Entity>;
}

/// Last-observed occurrences of one entity within a unit.
#[derive(Debug, Clone, PartialEq)]
struct UnitEntry {
    count: u32,
    text: String,
}

/// What a reconciliation pass scheduled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Distinct IDs batched into an add task.
    pub added: usize,
    /// Distinct IDs batched into a delete task.
    pub deleted: usize,
}

/// Keeps one index in sync with its corpus, one unit at a time.
///
/// The engine is the only writer of diffs into its mutation queue, and the
/// per-unit snapshot map is serialized behind a mutex so an unserialized
/// change-notification stream cannot corrupt it.
pub struct ReconciliationEngine {
    extractor: Arc<dyn EntityExtractor>,
    queue: MutationQueue,
    snapshots: Mutex<HashMap<UnitId, HashMap<EntityId, UnitEntry>>>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("units", &self.snapshots.lock().len())
            .finish()
    }
}

impl ReconciliationEngine {
    pub fn new(extractor: Arc<dyn EntityExtractor>, queue: MutationQueue) -> Self {
        Self {
            extractor,
            queue,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// The queue this engine feeds.
    #[must_use]
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Whether the engine currently tracks the given unit.
    #[must_use]
    pub fn has_unit(&self, unit: &UnitId) -> bool {
        self.snapshots.lock().contains_key(unit)
    }

    /// Reconciles a changed unit: re-extracts its entities, schedules the
    /// minimal mutations against the last-known snapshot, and replaces the
    /// snapshot.
    pub fn unit_changed(&self, unit: &UnitId) -> ReconcileSummary {
        let new_entries = group_by_id(self.extractor.extract(unit));
        let mut snapshots = self.snapshots.lock();
        let old_entries = snapshots.remove(unit).unwrap_or_default();

        // First observation of a unit whose entities the index already
        // covers (an index freshly loaded from disk): record the snapshot
        // and skip the pass entirely.
        if old_entries.is_empty()
            && !new_entries.is_empty()
            && self.queue.index().check_all_ids_present(new_entries.keys())
        {
            debug!("Unit {unit} already covered by index, skipping");
            snapshots.insert(unit.clone(), new_entries);
            return ReconcileSummary::default();
        }

        let (adds, deletes) = diff_by_count(&old_entries, &new_entries);
        let summary = ReconcileSummary {
            added: adds.len(),
            deleted: deletes.len(),
        };

        if !new_entries.is_empty() {
            snapshots.insert(unit.clone(), new_entries);
        }

        if summary.added > 0 || summary.deleted > 0 {
            debug!(
                "Unit {unit}: {} to add, {} to delete",
                summary.added, summary.deleted
            );
        }
        // Scheduled while the snapshot lock is held, so concurrent change
        // events cannot interleave their task batches out of snapshot order.
        let (ids, texts) = adds.into_iter().unzip();
        self.queue.schedule_add(ids, texts);
        self.queue.schedule_delete(deletes);

        summary
    }

    /// Reconciles a deleted unit, as if it now contributed nothing.
    pub fn unit_removed(&self, unit: &UnitId) -> ReconcileSummary {
        let mut snapshots = self.snapshots.lock();
        let old_entries = snapshots.remove(unit).unwrap_or_default();

        let (_, deletes) = diff_by_count(&old_entries, &HashMap::new());
        let summary = ReconcileSummary {
            added: 0,
            deleted: deletes.len(),
        };
        self.queue.schedule_delete(deletes);
        summary
    }

    /// Reconciles a renamed unit, preserving identity where possible.
    ///
    /// When the unit is itself the entity (exactly one entity before and
    /// after), a single rename task re-keys the cached embedding; the
    /// embedding is only recomputed if the representation text changed with
    /// the name. Units carrying several entities fall back to a
    /// remove-then-change pass.
    pub fn unit_renamed(&self, old_unit: &UnitId, new_unit: &UnitId) {
        let new_entries = group_by_id(self.extractor.extract(new_unit));

        let mut snapshots = self.snapshots.lock();
        let old_entries = snapshots.remove(old_unit).unwrap_or_default();

        if let (Some((old_id, old_entry)), Some((new_id, new_entry)), 1, 1) = (
            old_entries.iter().next(),
            new_entries.iter().next(),
            old_entries.len(),
            new_entries.len(),
        ) {
            if old_id != new_id || old_entry.text != new_entry.text {
                let new_text = (old_entry.text != new_entry.text).then(|| new_entry.text.clone());
                self.queue
                    .schedule_rename(old_id.clone(), new_id.clone(), new_text);
            }
            snapshots.insert(new_unit.clone(), new_entries);
            return;
        }

        // Multi-entity unit: no single identity to preserve.
        let (_, deletes) = diff_by_count(&old_entries, &HashMap::new());
        self.queue.schedule_delete(deletes);
        drop(snapshots);
        self.unit_changed(new_unit);
    }

    /// Merged occurrence counts across all tracked units.
    ///
    /// Feed this to [`crate::vector::VectorIndex::filter_ids_to`] to prune
    /// entries for entities no longer present anywhere in the corpus.
    #[must_use]
    pub fn expected_counts(&self) -> HashMap<EntityId, u32> {
        let snapshots = self.snapshots.lock();
        let mut merged: HashMap<EntityId, u32> = HashMap::new();
        for entries in snapshots.values() {
            for (id, entry) in entries {
                *merged.entry(id.clone()).or_default() += entry.count;
            }
        }
        merged
    }

    /// Removes index entries for entities absent from every tracked unit.
    ///
    /// Used after external structural changes the engine did not observe
    /// one unit at a time.
    pub fn prune_index_to_known_units(&self) {
        self.queue.index().filter_ids_to(&self.expected_counts());
    }
}

fn group_by_id(entities: Vec<Entity>) -> HashMap<EntityId, UnitEntry> {
    let mut grouped: HashMap<EntityId, UnitEntry> = HashMap::new();
    for entity in entities {
        grouped
            .entry(entity.id)
            .and_modify(|e| e.count += 1)
            .or_insert(UnitEntry {
                count: 1,
                text: entity.text,
            });
    }
    grouped
}

/// Minimal mutations turning `old` into `new`, by occurrence count.
///
/// Returns the IDs to add (with their representation text) and the IDs to
/// delete; an ID whose count is unchanged appears in neither.
fn diff_by_count(
    old: &HashMap<EntityId, UnitEntry>,
    new: &HashMap<EntityId, UnitEntry>,
) -> (Vec<(EntityId, String)>, Vec<EntityId>) {
    let mut adds = Vec::new();
    let mut deletes = Vec::new();

    for (id, entry) in new {
        let old_count = old.get(id).map_or(0, |e| e.count);
        if entry.count > old_count {
            adds.push((id.clone(), entry.text.clone()));
        }
    }
    for (id, entry) in old {
        let new_count = new.get(id).map_or(0, |e| e.count);
        if entry.count > new_count {
            deletes.push(id.clone());
        }
    }

    // Deterministic task contents regardless of map iteration order.
    adds.sort_by(|a, b| a.0.cmp(&b.0));
    deletes.sort();

    (adds, deletes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::types::VectorDimension;
    use crate::vector::{MockEmbeddingGenerator, ModelCache, VectorIndex};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Extractor whose per-unit results the test scripts up front.
    #[derive(Default)]
    struct ScriptedExtractor {
        units: Mutex<HashMap<UnitId, Vec<(String, String)>>>,
    }

    impl ScriptedExtractor {
        fn set(&self, unit: &str, entities: &[(&str, &str)]) {
            self.units.lock().insert(
                UnitId::new(unit),
                entities
                    .iter()
                    .map(|(id, text)| (id.to_string(), text.to_string()))
                    .collect(),
            );
        }
    }

    impl EntityExtractor for ScriptedExtractor {
        fn extract(&self, unit: &UnitId) -> Vec<Entity> {
            self.units
                .lock()
                .get(unit)
                .map(|entities| {
                    entities
                        .iter()
                        .map(|(id, text)| Entity::new(id.as_str(), text.as_str()))
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    fn test_engine() -> (TempDir, Arc<ScriptedExtractor>, ReconciliationEngine) {
        let temp_dir = TempDir::new().unwrap();
        let index = Arc::new(VectorIndex::new(
            temp_dir.path().join("idx"),
            VectorDimension::new(8).unwrap(),
            "mock-1",
        ));
        let model = Arc::new(ModelCache::preloaded(Arc::new(
            MockEmbeddingGenerator::with_dimension(VectorDimension::new(8).unwrap()),
        )));
        let queue = MutationQueue::new(index, model, None);

        let extractor = Arc::new(ScriptedExtractor::default());
        let engine =
            ReconciliationEngine::new(Arc::clone(&extractor) as Arc<dyn EntityExtractor>, queue);
        (temp_dir, extractor, engine)
    }

    fn entries(pairs: &[(&str, u32, &str)]) -> HashMap<EntityId, UnitEntry> {
        pairs
            .iter()
            .map(|(id, count, text)| {
                (
                    EntityId::new(id),
                    UnitEntry {
                        count: *count,
                        text: text.to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_diff_with_duplicate_ids() {
        // {A:2, B:1} -> {A:1, B:1, C:1} must emit exactly Delete(A) and
        // Add(C): B unchanged, A net-decreased, C newly introduced.
        let old = entries(&[("A", 2, "a"), ("B", 1, "b")]);
        let new = entries(&[("A", 1, "a"), ("B", 1, "b"), ("C", 1, "c")]);

        let (adds, deletes) = diff_by_count(&old, &new);
        assert_eq!(adds, vec![(EntityId::new("C"), "c".to_string())]);
        assert_eq!(deletes, vec![EntityId::new("A")]);
    }

    #[test]
    fn test_diff_duplicate_increase_requires_add() {
        // A set diff would miss the second occurrence entirely.
        let old = entries(&[("A", 1, "a")]);
        let new = entries(&[("A", 2, "a")]);

        let (adds, deletes) = diff_by_count(&old, &new);
        assert_eq!(adds, vec![(EntityId::new("A"), "a".to_string())]);
        assert!(deletes.is_empty());
    }

    #[test]
    fn test_unit_change_indexes_new_entities() {
        let (_dir, extractor, engine) = test_engine();

        extractor.set("src/lib.rs", &[("parse", "symbol parse"), ("emit", "symbol emit")]);
        let summary = engine.unit_changed(&UnitId::new("src/lib.rs"));
        assert_eq!(summary, ReconcileSummary { added: 2, deleted: 0 });

        engine.queue().wait_until_ready(true);
        let index = engine.queue().index();
        assert!(index.contains(&EntityId::new("parse")));
        assert!(index.contains(&EntityId::new("emit")));
    }

    #[test]
    fn test_unit_change_diffs_against_snapshot() {
        let (_dir, extractor, engine) = test_engine();
        let unit = UnitId::new("src/lib.rs");

        extractor.set("src/lib.rs", &[("A", "a"), ("A", "a"), ("B", "b")]);
        engine.unit_changed(&unit);
        engine.queue().wait_until_ready(true);

        extractor.set("src/lib.rs", &[("A", "a"), ("B", "b"), ("C", "c")]);
        let summary = engine.unit_changed(&unit);
        assert_eq!(summary, ReconcileSummary { added: 1, deleted: 1 });

        engine.queue().wait_until_ready(true);
        let index = engine.queue().index();
        assert!(index.contains(&EntityId::new("B")));
        assert!(index.contains(&EntityId::new("C")));
    }

    #[test]
    fn test_unit_removal_deletes_everything_and_drops_snapshot() {
        let (_dir, extractor, engine) = test_engine();
        let unit = UnitId::new("src/gone.rs");

        extractor.set("src/gone.rs", &[("X", "x"), ("Y", "y")]);
        engine.unit_changed(&unit);
        engine.queue().wait_until_ready(true);
        assert!(engine.has_unit(&unit));

        let summary = engine.unit_removed(&unit);
        assert_eq!(summary, ReconcileSummary { added: 0, deleted: 2 });
        assert!(!engine.has_unit(&unit));

        engine.queue().wait_until_ready(true);
        assert!(engine.queue().index().is_empty());
        assert!(engine.expected_counts().is_empty());
    }

    #[test]
    fn test_empty_extraction_drops_snapshot() {
        let (_dir, extractor, engine) = test_engine();
        let unit = UnitId::new("src/emptied.rs");

        extractor.set("src/emptied.rs", &[("X", "x")]);
        engine.unit_changed(&unit);
        assert!(engine.has_unit(&unit));

        extractor.set("src/emptied.rs", &[]);
        engine.unit_changed(&unit);
        assert!(!engine.has_unit(&unit));
    }

    #[test]
    fn test_cold_start_skips_already_covered_unit() {
        let (_dir, extractor, engine) = test_engine();

        // Simulate an index loaded from disk before any snapshot exists.
        engine.queue().index().add_entries([
            (EntityId::new("A"), vec![0.5; 8]),
            (EntityId::new("B"), vec![0.5; 8]),
        ]);

        extractor.set("src/lib.rs", &[("A", "a"), ("B", "b")]);
        let summary = engine.unit_changed(&UnitId::new("src/lib.rs"));
        assert_eq!(summary, ReconcileSummary::default());
        assert!(engine.has_unit(&UnitId::new("src/lib.rs")));
    }

    #[test]
    fn test_rename_without_text_change_keeps_vector() {
        let (_dir, extractor, engine) = test_engine();
        let old_unit = UnitId::new("docs/a.md");
        let new_unit = UnitId::new("docs/b.md");

        extractor.set("docs/a.md", &[("docs/a.md", "file a contents summary")]);
        engine.unit_changed(&old_unit);
        engine.queue().wait_until_ready(true);

        let before = engine
            .queue()
            .index()
            .find_closest(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1, None);

        // Same representation text under the new name.
        extractor.set("docs/b.md", &[("docs/b.md", "file a contents summary")]);
        engine.unit_renamed(&old_unit, &new_unit);
        engine.queue().wait_until_ready(true);

        let index = engine.queue().index();
        assert!(!index.contains(&EntityId::new("docs/a.md")));
        assert!(index.contains(&EntityId::new("docs/b.md")));

        let after = index.find_closest(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1, None);
        assert_eq!(before[0].1, after[0].1);
        assert!(!engine.has_unit(&old_unit));
        assert!(engine.has_unit(&new_unit));
    }

    #[test]
    fn test_rename_with_text_change_recomputes() {
        let (_dir, extractor, engine) = test_engine();
        let old_unit = UnitId::new("docs/a.md");
        let new_unit = UnitId::new("docs/b.md");

        extractor.set("docs/a.md", &[("docs/a.md", "file a")]);
        engine.unit_changed(&old_unit);
        engine.queue().wait_until_ready(true);

        extractor.set("docs/b.md", &[("docs/b.md", "entirely new representation")]);
        engine.unit_renamed(&old_unit, &new_unit);
        engine.queue().wait_until_ready(true);

        let index = engine.queue().index();
        assert!(!index.contains(&EntityId::new("docs/a.md")));
        assert!(index.contains(&EntityId::new("docs/b.md")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_expected_counts_merge_across_units() {
        let (_dir, extractor, engine) = test_engine();

        extractor.set("a.rs", &[("shared", "s"), ("only_a", "a")]);
        extractor.set("b.rs", &[("shared", "s"), ("only_b", "b")]);
        engine.unit_changed(&UnitId::new("a.rs"));
        engine.unit_changed(&UnitId::new("b.rs"));

        let counts = engine.expected_counts();
        assert_eq!(counts.get(&EntityId::new("shared")), Some(&2));
        assert_eq!(counts.get(&EntityId::new("only_a")), Some(&1));
        assert_eq!(counts.get(&EntityId::new("only_b")), Some(&1));
    }

    #[test]
    fn test_prune_index_to_known_units() {
        let (_dir, extractor, engine) = test_engine();

        extractor.set("a.rs", &[("keep", "k")]);
        engine.unit_changed(&UnitId::new("a.rs"));
        engine.queue().wait_until_ready(true);

        // An entry the engine never observed, e.g. left over on disk.
        engine
            .queue()
            .index()
            .add_entries([(EntityId::new("orphan"), vec![0.5; 8])]);

        engine.prune_index_to_known_units();
        let index = engine.queue().index();
        assert!(index.contains(&EntityId::new("keep")));
        assert!(!index.contains(&EntityId::new("orphan")));
    }
}
