// crates/split-test-core/src/runtime/aggregator.rs
// ============================================================================
// Module: Split Test Metrics Aggregator
// Description: View and conversion recording against variant counters.
// Purpose: Translate store counter outcomes into runtime errors.
// Dependencies: crate::{core, interfaces, runtime::error}
// ============================================================================

//! ## Overview
//! Increments are delegated to the store, which performs them atomically and
//! reports why an increment was refused. This layer never reads then writes
//! counters itself, so concurrent visitors cannot lose updates here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::TestId;
use crate::core::VariantId;
use crate::interfaces::CounterOutcome;
use crate::interfaces::TestStore;
use crate::interfaces::VariantCounters;
use crate::runtime::error::ExperimentError;

// ============================================================================
// SECTION: Aggregator
// ============================================================================

/// Records visitor events against a test store.
#[derive(Debug, Clone)]
pub struct MetricsAggregator<S> {
    /// Backing store.
    store: S,
}

impl<S: TestStore> MetricsAggregator<S> {
    /// Creates an aggregator over the given store.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Records one view.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the test or variant is unknown, the
    /// test is not running, or the store fails.
    pub fn record_view(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
    ) -> Result<VariantCounters, ExperimentError> {
        let outcome = self.store.increment_views(test_id, variant_id)?;
        resolve(outcome, test_id, variant_id)
    }

    /// Records one conversion with optional revenue in minor units.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::OrphanConversion`] when the variant has no
    /// unconverted views left, plus the errors of [`Self::record_view`].
    pub fn record_conversion(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        revenue_cents: Option<u64>,
    ) -> Result<VariantCounters, ExperimentError> {
        let outcome = self.store.increment_conversions(test_id, variant_id, revenue_cents)?;
        resolve(outcome, test_id, variant_id)
    }
}

/// Maps a store counter outcome onto the runtime result.
fn resolve(
    outcome: CounterOutcome,
    test_id: &TestId,
    variant_id: &VariantId,
) -> Result<VariantCounters, ExperimentError> {
    match outcome {
        CounterOutcome::Recorded(counters) => Ok(counters),
        CounterOutcome::UnknownTest => Err(ExperimentError::UnknownTest(test_id.to_string())),
        CounterOutcome::UnknownVariant => Err(ExperimentError::UnknownVariant {
            test_id: test_id.to_string(),
            variant_id: variant_id.to_string(),
        }),
        CounterOutcome::NotRunning(status) => Err(ExperimentError::TestNotRunning {
            test_id: test_id.to_string(),
            status,
        }),
        CounterOutcome::Orphaned(counters) => Err(ExperimentError::OrphanConversion {
            test_id: test_id.to_string(),
            variant_id: variant_id.to_string(),
            views: counters.views,
            conversions: counters.conversions,
        }),
    }
}
