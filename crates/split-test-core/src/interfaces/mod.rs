// crates/split-test-core/src/interfaces/mod.rs
// ============================================================================
// Module: Split Test Interfaces
// Description: Backend-agnostic persistence contract for experiment tests.
// Purpose: Define the store operations the runtime relies on.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`TestStore`] is the single writer of experiment state. Lifecycle fields
//! and counters are written by separate operations so that hot-path counter
//! increments never contend with the revision compare-and-swap used by
//! lifecycle transitions.
//!
//! Security posture: stores hold admin-defined data and visitor-driven
//! counters; backends must treat counter requests as untrusted input and
//! never create rows on increment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ExperimentTest;
use crate::core::PageSlug;
use crate::core::TestId;
use crate::core::TestStatus;
use crate::core::Timestamp;
use crate::core::VariantId;

// ============================================================================
// SECTION: Store Records
// ============================================================================

/// Ceiling for accumulated revenue per variant; additions saturate here.
///
/// Matches the largest value a signed 64-bit storage column can hold.
pub const MAX_REVENUE_CENTS: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Counter snapshot for one variant after an increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantCounters {
    /// Variant identifier.
    pub variant_id: VariantId,
    /// Views after the operation.
    pub views: u64,
    /// Conversions after the operation.
    pub conversions: u64,
    /// Accumulated revenue after the operation.
    pub revenue_cents: Option<u64>,
}

/// Lifecycle write guarded by the expected revision.
///
/// # Invariants
/// - Applied only when the stored revision equals `expected_revision`.
/// - A successful write stores revision `expected_revision + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleUpdate {
    /// Test being transitioned.
    pub test_id: TestId,
    /// Revision observed by the caller.
    pub expected_revision: u64,
    /// New status.
    pub status: TestStatus,
    /// New start date.
    pub start_date: Option<Timestamp>,
    /// New end date.
    pub end_date: Option<Timestamp>,
    /// New winner.
    pub winner_id: Option<VariantId>,
}

/// Outcome of a revision-guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Write applied; carries the new revision (0 for deletions).
    Applied {
        /// Revision now stored.
        revision: u64,
    },
    /// No test with the given identifier.
    Missing,
    /// Stored revision differs from the expected one.
    RevisionConflict {
        /// Revision currently stored.
        current: u64,
    },
}

/// Outcome of a counter increment.
///
/// Every variant other than `Recorded` leaves counters unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOutcome {
    /// Increment applied.
    Recorded(VariantCounters),
    /// No test with the given identifier.
    UnknownTest,
    /// The test has no such variant.
    UnknownVariant,
    /// The test is not accepting events.
    NotRunning(TestStatus),
    /// A conversion would exceed views; carries the unchanged counters.
    Orphaned(VariantCounters),
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Test store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("test store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("test store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("test store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("test store invalid data: {0}")]
    Invalid(String),
    /// Insert collided with an existing test identifier.
    #[error("test store conflict: {0}")]
    Conflict(String),
    /// Store reported an error.
    #[error("test store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Test Store
// ============================================================================

/// Persistence contract for experiment tests and their counters.
pub trait TestStore {
    /// Inserts a new test.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the identifier already exists.
    fn insert(&self, test: &ExperimentTest) -> Result<(), StoreError>;

    /// Loads a test with current counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, test_id: &TestId) -> Result<Option<ExperimentTest>, StoreError>;

    /// Lists tests, optionally filtered by page, ordered by creation time then id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn list(&self, page_slug: Option<&PageSlug>) -> Result<Vec<ExperimentTest>, StoreError>;

    /// Applies a lifecycle write when the stored revision matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn update_lifecycle(&self, update: &LifecycleUpdate) -> Result<WriteOutcome, StoreError>;

    /// Deletes a test and its counters when the stored revision matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn delete(&self, test_id: &TestId, expected_revision: u64)
    -> Result<WriteOutcome, StoreError>;

    /// Atomically adds one view to a variant of a running test.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the increment fails.
    fn increment_views(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
    ) -> Result<CounterOutcome, StoreError>;

    /// Atomically adds one conversion (and optional revenue) to a variant of
    /// a running test, refusing when conversions would exceed views.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the increment fails.
    fn increment_conversions(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        revenue_cents: Option<u64>,
    ) -> Result<CounterOutcome, StoreError>;

    /// Checks store readiness for health reporting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is not ready.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
