//! Serialized mutation pipeline for a vector index.
//!
//! All writes against one index flow through a single FIFO queue drained by
//! at most one background worker, so mutations always apply in submission
//! order and a consistent snapshot is one lock away for readers. Mutations
//! carry raw text, not vectors: embedding happens when a task executes,
//! which keeps enqueueing cheap and queued work cancellable before any
//! model time is spent.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::EntityId;
use crate::vector::embedding::normalize;
use crate::vector::{ModelCache, VectorIndex};

/// How long a forced wait parks when the queue is already idle, covering a
/// task enqueued moments before the wait.
const FORCE_WAIT_GRACE: Duration = Duration::from_millis(50);

/// A queued write against the index.
///
/// Text is embedded at execution time, not enqueue time.
#[derive(Debug, Clone)]
pub enum PendingMutation {
    /// Insert or refresh entries; `texts` parallels `ids`.
    Add {
        ids: Vec<EntityId>,
        texts: Vec<String>,
    },
    /// Remove entries.
    Delete { ids: Vec<EntityId> },
    /// Re-key an entry. With `new_text` absent the stored vector moves
    /// unchanged; with it present the embedding is recomputed for the new
    /// key.
    Rename {
        old_id: EntityId,
        new_id: EntityId,
        new_text: Option<String>,
    },
}

/// Out-of-band sink for the capacity-exceeded signal.
///
/// Fired at most once per queue-drain event, not once per rejected task.
/// Delivery (notification UI, telemetry) is the host's concern.
pub trait LowMemoryNotifier: Send + Sync {
    fn notify_low_memory(&self);
}

struct QueueState {
    pending: VecDeque<PendingMutation>,
    /// A background worker is draining this queue.
    active: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        !self.active && self.pending.is_empty()
    }
}

struct QueueCore {
    index: Arc<VectorIndex>,
    model: Arc<ModelCache>,
    notifier: Option<Arc<dyn LowMemoryNotifier>>,
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// Ordered, single-consumer task queue serializing all writes against one
/// [`VectorIndex`].
///
/// State machine: `Idle -> Active -> Idle`. The worker thread starts lazily
/// on the first scheduled task and exits when the queue drains; at no point
/// do two workers drain the same queue.
#[derive(Clone)]
pub struct MutationQueue {
    core: Arc<QueueCore>,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("MutationQueue")
            .field("pending", &state.pending.len())
            .field("active", &state.active)
            .finish()
    }
}

impl MutationQueue {
    /// Creates a queue feeding the given index.
    pub fn new(
        index: Arc<VectorIndex>,
        model: Arc<ModelCache>,
        notifier: Option<Arc<dyn LowMemoryNotifier>>,
    ) -> Self {
        Self {
            core: Arc::new(QueueCore {
                index,
                model,
                notifier,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: false,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// The index this queue mutates.
    #[must_use]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.core.index
    }

    /// Appends a task; starts the background worker if the queue was idle.
    pub fn schedule_task(&self, task: PendingMutation) {
        let mut state = self.core.state.lock();
        state.pending.push_back(task);
        if !state.active {
            state.active = true;
            let core = Arc::clone(&self.core);
            let spawned = std::thread::Builder::new()
                .name("embedix-mutations".to_string())
                .spawn(move || core.drain());
            if let Err(e) = spawned {
                state.active = false;
                warn!("Failed to spawn mutation worker: {e}");
            }
        }
    }

    /// Schedules an add batch; `texts` must parallel `ids`.
    pub fn schedule_add(&self, ids: Vec<EntityId>, texts: Vec<String>) {
        debug_assert_eq!(ids.len(), texts.len());
        if ids.is_empty() {
            return;
        }
        self.schedule_task(PendingMutation::Add { ids, texts });
    }

    /// Schedules a delete batch.
    pub fn schedule_delete(&self, ids: Vec<EntityId>) {
        if ids.is_empty() {
            return;
        }
        self.schedule_task(PendingMutation::Delete { ids });
    }

    /// Schedules a re-key, recomputing the embedding only when `new_text`
    /// is given.
    pub fn schedule_rename(&self, old_id: EntityId, new_id: EntityId, new_text: Option<String>) {
        self.schedule_task(PendingMutation::Rename {
            old_id,
            new_id,
            new_text,
        });
    }

    /// Blocks until the queue returns to idle.
    ///
    /// With `force_wait` the call parks for at least one wait cycle even if
    /// the queue looks idle, guarding against a task enqueued microseconds
    /// earlier; without it an idle queue returns immediately.
    pub fn wait_until_ready(&self, force_wait: bool) {
        let mut state = self.core.state.lock();
        if state.is_idle() {
            if !force_wait {
                return;
            }
            self.core.idle.wait_for(&mut state, FORCE_WAIT_GRACE);
        }
        while !state.is_idle() {
            self.core.idle.wait(&mut state);
        }
    }

    /// Empties the queue without executing the remaining tasks.
    ///
    /// An already-executing task runs to completion; only queued tasks are
    /// discarded.
    pub fn cancel_index_tasks(&self) {
        let mut state = self.core.state.lock();
        let discarded = state.pending.len();
        state.pending.clear();
        if discarded > 0 {
            debug!("Cancelled {discarded} queued mutation tasks");
        }
    }

    /// Whether the queue is idle (no queued tasks, no running worker).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.core.state.lock().is_idle()
    }
}

/// Process-wide throttle over bulk reindexing.
///
/// Holding the guard across a bulk reindex keeps several corpora from
/// saturating the CPU simultaneously. Purely a throughput policy: per-index
/// correctness comes from each queue's own ordering, not from this lock.
#[derive(Default)]
pub struct IndexingThrottle {
    lock: Mutex<()>,
}

impl IndexingThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no other bulk reindex holds the throttle.
    pub fn acquire(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl QueueCore {
    fn drain(self: Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        state.active = false;
                        self.idle.notify_all();
                        return;
                    }
                }
            };
            self.execute(task);
        }
    }

    fn execute(&self, task: PendingMutation) {
        match task {
            PendingMutation::Add { ids, texts } => self.execute_add(ids, texts),
            PendingMutation::Delete { ids } => {
                for id in &ids {
                    self.index.delete_entry(id);
                }
            }
            PendingMutation::Rename {
                old_id,
                new_id,
                new_text,
            } => self.execute_rename(old_id, new_id, new_text),
        }
    }

    fn execute_add(&self, ids: Vec<EntityId>, texts: Vec<String>) {
        // Fail fast before spending model time on vectors that cannot be
        // stored anyway.
        if !self.index.check_can_add_entry() {
            self.reject_over_capacity();
            return;
        }

        let Some(vectors) = self.embed(&texts) else {
            return;
        };
        if vectors.len() != ids.len() {
            warn!(
                "Embedding batch returned {} vectors for {} texts, dropping batch",
                vectors.len(),
                ids.len()
            );
            return;
        }

        self.index.add_entries(ids.into_iter().zip(vectors));
    }

    fn execute_rename(&self, old_id: EntityId, new_id: EntityId, new_text: Option<String>) {
        match new_text {
            None => {
                if !self.index.rename_entry(&old_id, new_id) {
                    debug!("Rename source {old_id} not present in index");
                }
            }
            Some(text) => {
                let Some(mut vectors) = self.embed(std::slice::from_ref(&text)) else {
                    return;
                };
                let Some(vector) = vectors.pop() else {
                    return;
                };
                self.index.update_entry(&old_id, new_id, vector);
            }
        }
    }

    /// Batch-embed and normalize; `None` when the model is unavailable,
    /// which makes the surrounding task a no-op rather than an error.
    fn embed(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let generator = self.model.get()?;
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut vectors = generator.generate_embeddings(&refs)?;
        for vector in &mut vectors {
            normalize(vector);
        }
        Some(vectors)
    }

    /// Over budget: continuing to accept entries is futile, so the whole
    /// remaining queue is discarded and the low-memory signal fires once.
    fn reject_over_capacity(&self) {
        let discarded = {
            let mut state = self.state.lock();
            let discarded = state.pending.len();
            state.pending.clear();
            discarded
        };
        warn!(
            "Index at {:?} reached its capacity limit of {}; discarding {discarded} queued tasks",
            self.index.dir(),
            self.index.capacity_limit()
        );
        if let Some(notifier) = &self.notifier {
            notifier.notify_low_memory();
        }
    }
}
