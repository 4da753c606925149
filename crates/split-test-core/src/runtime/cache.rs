// crates/split-test-core/src/runtime/cache.rs
// ============================================================================
// Module: Split Test Config Cache
// Description: Bounded read-through cache of test definitions.
// Purpose: Serve allocation reads without touching the store or a write lock.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Allocation only needs a test's status and variant configuration, so hits
//! are served under a read lock. Cached snapshots carry the counters from the
//! moment they were loaded; those counters are not authoritative and must not
//! be shown to admins. Writers invalidate an entry after every lifecycle
//! write or deletion. Each invalidation bumps a generation counter; a
//! read-through load that started before the bump is returned to its caller
//! but never cached, so a snapshot read before a lifecycle write cannot
//! outlive it. When full, the oldest entry is evicted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::core::ExperimentTest;
use crate::core::TestId;
use crate::interfaces::StoreError;
use crate::interfaces::TestStore;

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Cached definition with its insertion sequence.
#[derive(Debug)]
struct CachedTest {
    /// Snapshot shared with readers.
    test: Arc<ExperimentTest>,
    /// Monotonic insertion sequence used for eviction.
    sequence: u64,
}

/// Mutable cache state.
#[derive(Debug, Default)]
struct CacheState {
    /// Entries keyed by test id.
    entries: BTreeMap<TestId, CachedTest>,
    /// Next insertion sequence.
    next_sequence: u64,
    /// Invalidation generation, bumped by every [`TestConfigCache::invalidate`].
    generation: u64,
}

/// Read-through cache of test definitions.
///
/// # Invariants
/// - Holds at most `capacity` entries; capacity 0 disables caching.
#[derive(Debug)]
pub struct TestConfigCache {
    /// Cache state behind a reader-writer lock.
    state: RwLock<CacheState>,
    /// Maximum number of entries.
    capacity: usize,
}

impl TestConfigCache {
    /// Creates a cache holding at most `capacity` tests.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            capacity,
        }
    }

    /// Returns the cached snapshot for a test.
    #[must_use]
    pub fn get(&self, test_id: &TestId) -> Option<Arc<ExperimentTest>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.get(test_id).map(|entry| Arc::clone(&entry.test))
    }

    /// Caches a snapshot, evicting the oldest entry when full.
    pub fn insert(&self, test: ExperimentTest) -> Arc<ExperimentTest> {
        let test = Arc::new(test);
        if self.capacity == 0 {
            return test;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.store_entry(&mut state, &test);
        test
    }

    /// Caches a snapshot only if no invalidation happened since `generation`.
    fn insert_if_current(&self, test: ExperimentTest, generation: u64) -> Arc<ExperimentTest> {
        let test = Arc::new(test);
        if self.capacity == 0 {
            return test;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            self.store_entry(&mut state, &test);
        }
        test
    }

    /// Inserts an entry under the write lock, evicting the oldest when full.
    fn store_entry(&self, state: &mut CacheState, test: &Arc<ExperimentTest>) {
        if !state.entries.contains_key(&test.id) && state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.sequence)
                .map(|(test_id, _)| test_id.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
            }
        }
        let sequence = state.next_sequence;
        state.next_sequence = sequence.wrapping_add(1);
        state.entries.insert(
            test.id.clone(),
            CachedTest {
                test: Arc::clone(test),
                sequence,
            },
        );
    }

    /// Drops any cached snapshot for a test.
    pub fn invalidate(&self, test_id: &TestId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.entries.remove(test_id);
        state.generation = state.generation.wrapping_add(1);
    }

    /// Returns the cached snapshot or loads and caches it from the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store load fails.
    pub fn get_or_load<S: TestStore + ?Sized>(
        &self,
        store: &S,
        test_id: &TestId,
    ) -> Result<Option<Arc<ExperimentTest>>, StoreError> {
        let generation = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = state.entries.get(test_id) {
                return Ok(Some(Arc::clone(&entry.test)));
            }
            state.generation
        };
        Ok(store.load(test_id)?.map(|test| self.insert_if_current(test, generation)))
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
