// crates/split-test-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Split Test Lifecycle Controller
// Description: Creation, transitions, winner declaration, and deletion.
// Purpose: Apply the experiment state machine through revision-guarded writes.
// Dependencies: crate::{core, interfaces, runtime::error}, serde
// ============================================================================

//! ## Overview
//! State machine:
//!
//! ```text
//! draft --start--> running --pause--> paused --start--> running
//! running | paused --declare_winner--> completed (terminal)
//! ```
//!
//! Every transition reads the test, checks the rule against the observed
//! status, then writes with a compare-and-swap on the observed revision. A
//! writer that loses the race gets [`ExperimentError::ConcurrentModification`]
//! and the stored state is whatever the winner wrote.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ExperimentTest;
use crate::core::TestDraft;
use crate::core::TestId;
use crate::core::TestStatus;
use crate::core::Timestamp;
use crate::core::VariantId;
use crate::interfaces::LifecycleUpdate;
use crate::interfaces::StoreError;
use crate::interfaces::TestStore;
use crate::interfaces::WriteOutcome;
use crate::runtime::error::ExperimentError;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Requested lifecycle change, as accepted by `PATCH /experiments/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    /// Target status.
    pub status: TestStatus,
    /// Winner, required when the target is `completed`.
    #[serde(default)]
    pub winner_id: Option<VariantId>,
}

// ============================================================================
// SECTION: Controller
// ============================================================================

/// Lifecycle controller over a test store.
#[derive(Debug, Clone)]
pub struct LifecycleController<S> {
    /// Backing store.
    store: S,
}

impl<S: TestStore> LifecycleController<S> {
    /// Creates a controller over the given store.
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

    /// Validates a draft and persists it as a new `draft` test with zero counters.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Draft`] for invalid drafts and
    /// [`ExperimentError::ConcurrentModification`] when the id is taken.
    pub fn create_test(
        &self,
        test_id: TestId,
        draft: &TestDraft,
        now: Timestamp,
    ) -> Result<ExperimentTest, ExperimentError> {
        if test_id.as_str().trim().is_empty() {
            return Err(ExperimentError::Validation("test id must be non-empty".to_string()));
        }
        let test = ExperimentTest::from_draft(test_id, draft, now)?;
        match self.store.insert(&test) {
            Ok(()) => Ok(test),
            Err(StoreError::Conflict(_)) => {
                Err(ExperimentError::ConcurrentModification(test.id.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Loads a test or fails with [`ExperimentError::UnknownTest`].
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the test is missing or the store fails.
    pub fn get_test(&self, test_id: &TestId) -> Result<ExperimentTest, ExperimentError> {
        self.store.load(test_id)?.ok_or_else(|| ExperimentError::UnknownTest(test_id.to_string()))
    }

    /// Starts a `draft` or `paused` test. The start date is kept on resume.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::InvalidState`] from `running` or `completed`.
    pub fn start_test(
        &self,
        test_id: &TestId,
        now: Timestamp,
    ) -> Result<ExperimentTest, ExperimentError> {
        let test = self.get_test(test_id)?;
        if !matches!(test.status, TestStatus::Draft | TestStatus::Paused) {
            return Err(invalid_state(&test, "start"));
        }
        let update = LifecycleUpdate {
            test_id: test.id.clone(),
            expected_revision: test.revision,
            status: TestStatus::Running,
            start_date: test.start_date.or(Some(now)),
            end_date: None,
            winner_id: None,
        };
        self.commit(test, update)
    }

    /// Pauses a `running` test.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::InvalidState`] unless the test is running.
    pub fn pause_test(&self, test_id: &TestId) -> Result<ExperimentTest, ExperimentError> {
        let test = self.get_test(test_id)?;
        if test.status != TestStatus::Running {
            return Err(invalid_state(&test, "pause"));
        }
        let update = LifecycleUpdate {
            test_id: test.id.clone(),
            expected_revision: test.revision,
            status: TestStatus::Paused,
            start_date: test.start_date,
            end_date: None,
            winner_id: None,
        };
        self.commit(test, update)
    }

    /// Completes a `running` or `paused` test with the given winner.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::InvalidState`] from `draft` or `completed`,
    /// and [`ExperimentError::UnknownVariant`] for a foreign variant.
    pub fn declare_winner(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        now: Timestamp,
    ) -> Result<ExperimentTest, ExperimentError> {
        let test = self.get_test(test_id)?;
        if !matches!(test.status, TestStatus::Running | TestStatus::Paused) {
            return Err(invalid_state(&test, "declare a winner for"));
        }
        if test.variant(variant_id).is_none() {
            return Err(ExperimentError::UnknownVariant {
                test_id: test.id.to_string(),
                variant_id: variant_id.to_string(),
            });
        }
        let update = LifecycleUpdate {
            test_id: test.id.clone(),
            expected_revision: test.revision,
            status: TestStatus::Completed,
            start_date: test.start_date,
            end_date: Some(now),
            winner_id: Some(variant_id.clone()),
        };
        self.commit(test, update)
    }

    /// Dispatches a transition request to the matching operation.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Validation`] for malformed requests and the
    /// errors of the dispatched operation otherwise.
    pub fn apply_transition(
        &self,
        test_id: &TestId,
        request: &TransitionRequest,
        now: Timestamp,
    ) -> Result<ExperimentTest, ExperimentError> {
        match (request.status, request.winner_id.as_ref()) {
            (TestStatus::Completed, Some(winner_id)) => self.declare_winner(test_id, winner_id, now),
            (TestStatus::Completed, None) => Err(ExperimentError::Validation(
                "winnerId is required to complete a test".to_string(),
            )),
            (_, Some(_)) => Err(ExperimentError::Validation(
                "winnerId is only accepted with status completed".to_string(),
            )),
            (TestStatus::Running, None) => self.start_test(test_id, now),
            (TestStatus::Paused, None) => self.pause_test(test_id),
            (TestStatus::Draft, None) => {
                let test = self.get_test(test_id)?;
                Err(invalid_state(&test, "return to draft"))
            }
        }
    }

    /// Deletes a test that is not running, returning its last snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::InvalidState`] for running tests and
    /// [`ExperimentError::ConcurrentModification`] when the test changed.
    pub fn delete_test(&self, test_id: &TestId) -> Result<ExperimentTest, ExperimentError> {
        let test = self.get_test(test_id)?;
        if test.status == TestStatus::Running {
            return Err(invalid_state(&test, "delete"));
        }
        match self.store.delete(test_id, test.revision)? {
            WriteOutcome::Applied {
                ..
            } => Ok(test),
            WriteOutcome::Missing => Err(ExperimentError::UnknownTest(test_id.to_string())),
            WriteOutcome::RevisionConflict {
                ..
            } => Err(ExperimentError::ConcurrentModification(test_id.to_string())),
        }
    }

    /// Writes a lifecycle update and mirrors it onto the loaded snapshot.
    fn commit(
        &self,
        mut test: ExperimentTest,
        update: LifecycleUpdate,
    ) -> Result<ExperimentTest, ExperimentError> {
        match self.store.update_lifecycle(&update)? {
            WriteOutcome::Applied {
                revision,
            } => {
                test.status = update.status;
                test.start_date = update.start_date;
                test.end_date = update.end_date;
                test.winner_id = update.winner_id;
                test.revision = revision;
                Ok(test)
            }
            WriteOutcome::Missing => Err(ExperimentError::UnknownTest(update.test_id.to_string())),
            WriteOutcome::RevisionConflict {
                ..
            } => Err(ExperimentError::ConcurrentModification(update.test_id.to_string())),
        }
    }
}

/// Builds an invalid-state error for the test's current status.
fn invalid_state(test: &ExperimentTest, action: &'static str) -> ExperimentError {
    ExperimentError::InvalidState {
        test_id: test.id.to_string(),
        status: test.status,
        action,
    }
}
