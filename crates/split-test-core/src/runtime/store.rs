// crates/split-test-core/src/runtime/store.rs
// ============================================================================
// Module: Split Test In-Memory Store
// Description: Mutex-backed test store and a shared store wrapper.
// Purpose: Provide a dependency-free store for tests, demos, and `memory` mode.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`InMemoryTestStore`] keeps every test in one map behind a mutex. Each
//! operation, including counter increments, completes inside a single
//! critical section, which makes increments atomic and revision checks
//! linearizable. State is lost when the process exits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::ExperimentTest;
use crate::core::ExperimentVariant;
use crate::core::PageSlug;
use crate::core::TestId;
use crate::core::TestStatus;
use crate::core::VariantId;
use crate::interfaces::CounterOutcome;
use crate::interfaces::LifecycleUpdate;
use crate::interfaces::MAX_REVENUE_CENTS;
use crate::interfaces::StoreError;
use crate::interfaces::TestStore;
use crate::interfaces::VariantCounters;
use crate::interfaces::WriteOutcome;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory test store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTestStore {
    /// Tests keyed by identifier, protected by a mutex.
    tests: Arc<Mutex<BTreeMap<TestId, ExperimentTest>>>,
}

impl InMemoryTestStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tests: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Locks the test map.
    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<TestId, ExperimentTest>>, StoreError> {
        self.tests.lock().map_err(|_| StoreError::Store("test store mutex poisoned".to_string()))
    }
}

/// Snapshots a variant's counters.
fn counters(variant: &ExperimentVariant) -> VariantCounters {
    VariantCounters {
        variant_id: variant.id.clone(),
        views: variant.views,
        conversions: variant.conversions,
        revenue_cents: variant.revenue_cents,
    }
}

/// Resolves a running test's variant or the reason it cannot take events.
fn running_variant<'a>(
    tests: &'a mut BTreeMap<TestId, ExperimentTest>,
    test_id: &TestId,
    variant_id: &VariantId,
) -> Result<&'a mut ExperimentVariant, CounterOutcome> {
    let Some(test) = tests.get_mut(test_id) else {
        return Err(CounterOutcome::UnknownTest);
    };
    let status = test.status;
    let Some(variant) = test.variants.iter_mut().find(|variant| &variant.id == variant_id) else {
        return Err(CounterOutcome::UnknownVariant);
    };
    if status != TestStatus::Running {
        return Err(CounterOutcome::NotRunning(status));
    }
    Ok(variant)
}

impl TestStore for InMemoryTestStore {
    fn insert(&self, test: &ExperimentTest) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.contains_key(&test.id) {
            return Err(StoreError::Conflict(format!("test already exists: {}", test.id)));
        }
        guard.insert(test.id.clone(), test.clone());
        drop(guard);
        Ok(())
    }

    fn load(&self, test_id: &TestId) -> Result<Option<ExperimentTest>, StoreError> {
        Ok(self.lock()?.get(test_id).cloned())
    }

    fn list(&self, page_slug: Option<&PageSlug>) -> Result<Vec<ExperimentTest>, StoreError> {
        let mut tests: Vec<ExperimentTest> = self
            .lock()?
            .values()
            .filter(|test| page_slug.is_none_or(|slug| &test.page_slug == slug))
            .cloned()
            .collect();
        tests.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(tests)
    }

    fn update_lifecycle(&self, update: &LifecycleUpdate) -> Result<WriteOutcome, StoreError> {
        let mut guard = self.lock()?;
        let Some(test) = guard.get_mut(&update.test_id) else {
            return Ok(WriteOutcome::Missing);
        };
        if test.revision != update.expected_revision {
            return Ok(WriteOutcome::RevisionConflict {
                current: test.revision,
            });
        }
        test.status = update.status;
        test.start_date = update.start_date;
        test.end_date = update.end_date;
        test.winner_id.clone_from(&update.winner_id);
        test.revision = test.revision.saturating_add(1);
        Ok(WriteOutcome::Applied {
            revision: test.revision,
        })
    }

    fn delete(
        &self,
        test_id: &TestId,
        expected_revision: u64,
    ) -> Result<WriteOutcome, StoreError> {
        let mut guard = self.lock()?;
        let Some(test) = guard.get(test_id) else {
            return Ok(WriteOutcome::Missing);
        };
        if test.revision != expected_revision {
            return Ok(WriteOutcome::RevisionConflict {
                current: test.revision,
            });
        }
        guard.remove(test_id);
        drop(guard);
        Ok(WriteOutcome::Applied {
            revision: 0,
        })
    }

    fn increment_views(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
    ) -> Result<CounterOutcome, StoreError> {
        let mut guard = self.lock()?;
        let variant = match running_variant(&mut guard, test_id, variant_id) {
            Ok(variant) => variant,
            Err(outcome) => return Ok(outcome),
        };
        variant.views = variant.views.saturating_add(1);
        Ok(CounterOutcome::Recorded(counters(variant)))
    }

    fn increment_conversions(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        revenue_cents: Option<u64>,
    ) -> Result<CounterOutcome, StoreError> {
        let mut guard = self.lock()?;
        let variant = match running_variant(&mut guard, test_id, variant_id) {
            Ok(variant) => variant,
            Err(outcome) => return Ok(outcome),
        };
        if variant.conversions >= variant.views {
            return Ok(CounterOutcome::Orphaned(counters(variant)));
        }
        variant.conversions += 1;
        if let Some(amount) = revenue_cents {
            let total = variant.revenue_cents.unwrap_or(0).saturating_add(amount);
            variant.revenue_cents = Some(total.min(MAX_REVENUE_CENTS));
        }
        Ok(CounterOutcome::Recorded(counters(variant)))
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

// ============================================================================
// SECTION: Shared Store Wrapper
// ============================================================================

/// Shared test store backed by an `Arc` trait object.
#[derive(Clone)]
pub struct SharedTestStore {
    /// Inner store implementation.
    inner: Arc<dyn TestStore + Send + Sync>,
}

impl SharedTestStore {
    /// Wraps a test store in a shared, clonable wrapper.
    #[must_use]
    pub fn from_store(store: impl TestStore + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn TestStore + Send + Sync>) -> Self {
        Self {
            inner: store,
        }
    }
}

impl TestStore for SharedTestStore {
    fn insert(&self, test: &ExperimentTest) -> Result<(), StoreError> {
        self.inner.insert(test)
    }

    fn load(&self, test_id: &TestId) -> Result<Option<ExperimentTest>, StoreError> {
        self.inner.load(test_id)
    }

    fn list(&self, page_slug: Option<&PageSlug>) -> Result<Vec<ExperimentTest>, StoreError> {
        self.inner.list(page_slug)
    }

    fn update_lifecycle(&self, update: &LifecycleUpdate) -> Result<WriteOutcome, StoreError> {
        self.inner.update_lifecycle(update)
    }

    fn delete(
        &self,
        test_id: &TestId,
        expected_revision: u64,
    ) -> Result<WriteOutcome, StoreError> {
        self.inner.delete(test_id, expected_revision)
    }

    fn increment_views(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
    ) -> Result<CounterOutcome, StoreError> {
        self.inner.increment_views(test_id, variant_id)
    }

    fn increment_conversions(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        revenue_cents: Option<u64>,
    ) -> Result<CounterOutcome, StoreError> {
        self.inner.increment_conversions(test_id, variant_id, revenue_cents)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.inner.readiness()
    }
}
