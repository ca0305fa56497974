//! Process-wide memory budgeting across vector indices.
//!
//! Several independently-growing indices (files, classes, symbols, actions)
//! compete for one machine's memory. A static per-index limit either starves
//! a heavily weighted corpus or lets one corpus exhaust memory the others
//! need, so the coordinator derives every index's entry ceiling from a
//! shared fraction of available memory, split proportionally by declared
//! weight.
//!
//! The free-memory baseline is snapshotted once, at the first registration,
//! and excludes what tracked indices already hold - otherwise the act of
//! indexing would shrink the apparent budget on every recomputation.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::vector::VectorIndex;

/// Fraction of the baseline free memory shared by all indices.
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.25;

/// Source of the machine's available-memory reading.
///
/// Injected into the coordinator so tests can pin the budget.
pub trait MemoryProbe: Send + Sync {
    /// Currently available bytes of system memory.
    fn available_bytes(&self) -> u64;
}

/// Probe reading the operating system's view of available memory.
///
/// Uses `MemAvailable` from `/proc/meminfo` on Linux and the machine's
/// total memory via `sysctl` on macOS (the closest figure the platform
/// cheaply reports). Falls back to a conservative constant elsewhere.
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_bytes(&self) -> u64 {
        const FALLBACK_BYTES: u64 = 8 * 1024 * 1024 * 1024;

        #[cfg(target_os = "linux")]
        {
            if let Ok(contents) = std::fs::read_to_string("/proc/meminfo")
                && let Some(line) = contents
                    .lines()
                    .find(|line| line.starts_with("MemAvailable:"))
                && let Some(kb_str) = line.split_whitespace().nth(1)
                && let Ok(kb) = kb_str.parse::<u64>()
            {
                return kb * 1024;
            }
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(output) = std::process::Command::new("sysctl")
                .args(["-n", "hw.memsize"])
                .output()
                && let Ok(memsize_str) = String::from_utf8(output.stdout)
                && let Ok(memsize) = memsize_str.trim().parse::<u64>()
            {
                return memsize;
            }
        }

        FALLBACK_BYTES
    }
}

/// Probe returning a fixed value; for tests.
pub struct FixedMemoryProbe(pub u64);

impl MemoryProbe for FixedMemoryProbe {
    fn available_bytes(&self) -> u64 {
        self.0
    }
}

struct IndexRegistration {
    index: Arc<VectorIndex>,
    weight: u32,
    strong_limit: Option<usize>,
}

#[derive(Default)]
struct CoordinatorState {
    /// Byte budget shared by all indices, fixed at first registration.
    total_budget: Option<u64>,
    registrations: Vec<IndexRegistration>,
}

/// Registry of all active vector indices and owner of their capacity limits.
///
/// One instance per process, shared via `Arc` and injected into whatever
/// constructs indices - never reached through static state. Registration is
/// idempotent per index identity; indices are never unregistered and live
/// for the process lifetime.
pub struct MemoryBudgetCoordinator {
    memory_fraction: f64,
    probe: Box<dyn MemoryProbe>,
    state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for MemoryBudgetCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBudgetCoordinator")
            .field("memory_fraction", &self.memory_fraction)
            .field("total_budget", &state.total_budget)
            .field("registrations", &state.registrations.len())
            .finish()
    }
}

impl Default for MemoryBudgetCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBudgetCoordinator {
    /// Coordinator with the system probe and the default memory fraction.
    pub fn new() -> Self {
        Self::with_probe(Box::new(SystemMemoryProbe), DEFAULT_MEMORY_FRACTION)
    }

    /// Coordinator with an explicit probe and fraction.
    pub fn with_probe(probe: Box<dyn MemoryProbe>, memory_fraction: f64) -> Self {
        Self {
            memory_fraction,
            probe,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    /// Registers an index and recomputes every tracked index's limit.
    ///
    /// Idempotent: re-registering the same index (by `Arc` identity) is a
    /// no-op. The first registration snapshots the free-memory baseline,
    /// adding back what the registering index already holds so previously
    /// loaded entries do not count against the budget.
    pub fn register_index(
        &self,
        index: &Arc<VectorIndex>,
        weight: u32,
        strong_limit: Option<usize>,
    ) {
        let mut state = self.state.lock();

        if state
            .registrations
            .iter()
            .any(|r| Arc::ptr_eq(&r.index, index))
        {
            return;
        }

        if state.total_budget.is_none() {
            let baseline = self.probe.available_bytes() + index.estimate_memory_usage();
            let budget = (baseline as f64 * self.memory_fraction) as u64;
            debug!("Memory baseline {baseline} bytes, index budget {budget} bytes");
            state.total_budget = Some(budget);
        }

        state.registrations.push(IndexRegistration {
            index: Arc::clone(index),
            weight: weight.max(1),
            strong_limit,
        });

        Self::recompute_limits(&state);
    }

    /// Number of currently registered indices.
    pub fn registered_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Weight-proportional share allocation. Idempotent and side-effect-free
    /// beyond mutating each index's capacity limit.
    fn recompute_limits(state: &CoordinatorState) {
        let Some(total_budget) = state.total_budget else {
            return;
        };
        let total_weight: u64 = state.registrations.iter().map(|r| u64::from(r.weight)).sum();
        if total_weight == 0 {
            return;
        }

        for registration in &state.registrations {
            let share = total_budget * u64::from(registration.weight) / total_weight;
            let mut limit = registration.index.estimate_limit_by_memory(share);
            if let Some(strong_limit) = registration.strong_limit {
                limit = limit.min(strong_limit);
            }
            registration.index.set_capacity_limit(limit);
            debug!(
                "Index at {:?}: {share} bytes -> limit {limit}",
                registration.index.dir()
            );
        }
    }
}
