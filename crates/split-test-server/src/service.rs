// crates/split-test-server/src/service.rs
// ============================================================================
// Module: Experiment Service
// Description: Store-backed facade over the experiment runtime.
// Purpose: Single entry point for every REST and CLI operation.
// Dependencies: split-test-core, rand
// ============================================================================

//! ## Overview
//! [`ExperimentService`] combines the lifecycle controller, metrics
//! aggregator, allocator, and dashboard over one [`SharedTestStore`]. It
//! assigns test ids and timestamps, keeps the allocation cache coherent with
//! lifecycle writes, applies the optional automatic winner rule, and emits
//! audit events. All methods are blocking.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rand::Rng;
use split_test_core::Assignment;
use split_test_core::AutoWinnerRule;
use split_test_core::ExperimentError;
use split_test_core::ExperimentTest;
use split_test_core::LifecycleController;
use split_test_core::MetricsAggregator;
use split_test_core::PageSlug;
use split_test_core::SharedTestStore;
use split_test_core::SignificancePolicy;
use split_test_core::StoreError;
use split_test_core::TestConfigCache;
use split_test_core::TestDraft;
use split_test_core::TestId;
use split_test_core::TestStore;
use split_test_core::TestSummary;
use split_test_core::Timestamp;
use split_test_core::TransitionRequest;
use split_test_core::VariantAllocator;
use split_test_core::VariantCounters;
use split_test_core::VariantId;
use split_test_core::VisitorId;
use split_test_core::summarize;

use crate::audit::AuditOutcome;
use crate::audit::ExperimentAuditEvent;
use crate::audit::ExperimentAuditEventParams;
use crate::audit::ExperimentAuditSink;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Tunables for [`ExperimentService`].
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Significance estimate used by summaries.
    pub significance: SignificancePolicy,
    /// Automatic winner rule; `None` leaves winners to admins.
    pub auto_winner: Option<AutoWinnerRule>,
    /// Allocation cache capacity; 0 disables caching.
    pub config_cache_entries: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            significance: SignificancePolicy::default(),
            auto_winner: None,
            config_cache_entries: 1_024,
        }
    }
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Experiment service shared by every request handler.
///
/// # Invariants
/// - Every lifecycle write made through the service invalidates the cached
///   definition of that test.
pub struct ExperimentService {
    /// Lifecycle controller over the shared store.
    lifecycle: LifecycleController<SharedTestStore>,
    /// Counter aggregator over the shared store.
    metrics: MetricsAggregator<SharedTestStore>,
    /// Allocation read cache.
    cache: TestConfigCache,
    /// Service options.
    options: ServiceOptions,
    /// Audit sink.
    audit: Arc<dyn ExperimentAuditSink>,
}

impl ExperimentService {
    /// Creates a service over `store`.
    #[must_use]
    pub fn new(
        store: SharedTestStore,
        options: ServiceOptions,
        audit: Arc<dyn ExperimentAuditSink>,
    ) -> Self {
        Self {
            lifecycle: LifecycleController::new(store.clone()),
            metrics: MetricsAggregator::new(store),
            cache: TestConfigCache::new(options.config_cache_entries),
            options,
            audit,
        }
    }

    /// Returns the audit sink.
    #[must_use]
    pub fn audit(&self) -> &dyn ExperimentAuditSink {
        self.audit.as_ref()
    }

    /// Returns the service options.
    #[must_use]
    pub const fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Checks that the store is usable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is not ready.
    pub fn readiness(&self) -> Result<(), StoreError> {
        self.lifecycle.store().readiness()
    }

    /// Lists tests, optionally for one page, by creation time then id.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Store`] when the store fails.
    pub fn list_tests(
        &self,
        page_slug: Option<&PageSlug>,
    ) -> Result<Vec<ExperimentTest>, ExperimentError> {
        Ok(self.lifecycle.store().list(page_slug)?)
    }

    /// Creates a draft test under a fresh `exp-` identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the draft is invalid or the store fails.
    pub fn create_test(&self, draft: &TestDraft) -> Result<ExperimentTest, ExperimentError> {
        let test = self.lifecycle.create_test(generate_test_id(), draft, now())?;
        self.record(ExperimentAuditEventParams {
            status: Some(test.status),
            ..ExperimentAuditEventParams::applied("experiment_created", test.id.as_str())
        });
        Ok(test)
    }

    /// Loads one test.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::UnknownTest`] when the test does not exist.
    pub fn get_test(&self, test_id: &TestId) -> Result<ExperimentTest, ExperimentError> {
        self.lifecycle.get_test(test_id)
    }

    /// Applies a requested lifecycle transition.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the transition is not allowed, loses
    /// a concurrent write, or the store fails.
    pub fn transition(
        &self,
        test_id: &TestId,
        request: &TransitionRequest,
    ) -> Result<ExperimentTest, ExperimentError> {
        let result = self.lifecycle.apply_transition(test_id, request, now());
        self.cache.invalidate(test_id);
        match &result {
            Ok(test) => self.record(ExperimentAuditEventParams {
                variant_id: test.winner_id.as_ref().map(ToString::to_string),
                status: Some(test.status),
                ..ExperimentAuditEventParams::applied("experiment_transition", test_id.as_str())
            }),
            Err(err) => self.record(ExperimentAuditEventParams {
                status: Some(request.status),
                outcome: AuditOutcome::Rejected,
                error_kind: Some(err.kind()),
                message: Some(err.to_string()),
                ..ExperimentAuditEventParams::applied("experiment_transition", test_id.as_str())
            }),
        }
        result
    }

    /// Deletes a test that is not running.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the test is running, missing, or
    /// changed concurrently.
    pub fn delete_test(&self, test_id: &TestId) -> Result<ExperimentTest, ExperimentError> {
        let deleted = self.lifecycle.delete_test(test_id)?;
        self.cache.invalidate(test_id);
        self.record(ExperimentAuditEventParams {
            status: Some(deleted.status),
            ..ExperimentAuditEventParams::applied("experiment_deleted", test_id.as_str())
        });
        Ok(deleted)
    }

    /// Assigns a visitor to a variant, serving the control when allocation
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::UnknownTest`] for unknown tests and
    /// [`ExperimentError::Validation`] for an empty visitor id.
    pub fn assign(
        &self,
        test_id: &TestId,
        visitor_id: &VisitorId,
    ) -> Result<Assignment, ExperimentError> {
        if visitor_id.as_str().trim().is_empty() {
            return Err(ExperimentError::Validation("visitorId must be non-empty".to_string()));
        }
        let test = self
            .cache
            .get_or_load(self.lifecycle.store(), test_id)?
            .ok_or_else(|| ExperimentError::UnknownTest(test_id.to_string()))?;
        let assignment = VariantAllocator::allocate_or_control(&test, visitor_id)
            .ok_or_else(|| ExperimentError::Validation(format!("test {test_id} has no variants")))?;
        if assignment.fallback {
            self.record(ExperimentAuditEventParams {
                variant_id: Some(assignment.variant_id.to_string()),
                status: Some(test.status),
                outcome: AuditOutcome::Fallback,
                error_kind: assignment.reason,
                ..ExperimentAuditEventParams::applied("allocation_fallback", test_id.as_str())
            });
        }
        Ok(assignment)
    }

    /// Records one view.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError`] when the test or variant is unknown or the
    /// test is not running.
    pub fn record_view(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
    ) -> Result<VariantCounters, ExperimentError> {
        self.metrics.record_view(test_id, variant_id)
    }

    /// Records one conversion, then applies the automatic winner rule.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::OrphanConversion`] when the variant has no
    /// unconverted views, plus the errors of [`Self::record_view`].
    pub fn record_conversion(
        &self,
        test_id: &TestId,
        variant_id: &VariantId,
        revenue_cents: Option<u64>,
    ) -> Result<VariantCounters, ExperimentError> {
        let counters = match self.metrics.record_conversion(test_id, variant_id, revenue_cents) {
            Ok(counters) => counters,
            Err(err) => {
                if matches!(err, ExperimentError::OrphanConversion { .. }) {
                    self.record(ExperimentAuditEventParams {
                        variant_id: Some(variant_id.to_string()),
                        outcome: AuditOutcome::Rejected,
                        error_kind: Some(err.kind()),
                        message: Some(err.to_string()),
                        ..ExperimentAuditEventParams::applied("orphan_conversion", test_id.as_str())
                    });
                }
                return Err(err);
            }
        };
        if let Some(rule) = self.options.auto_winner {
            self.apply_auto_winner(test_id, &rule);
        }
        Ok(counters)
    }

    /// Builds the dashboard summary for a test.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::UnknownTest`] when the test does not exist.
    pub fn summary(&self, test_id: &TestId) -> Result<TestSummary, ExperimentError> {
        let test = self.lifecycle.get_test(test_id)?;
        Ok(summarize(&test, &self.options.significance))
    }

    /// Declares the rule's candidate as winner. Losing a race to another
    /// writer is not an error for the conversion that triggered it.
    fn apply_auto_winner(&self, test_id: &TestId, rule: &AutoWinnerRule) {
        let Ok(test) = self.lifecycle.get_test(test_id) else {
            return;
        };
        let Some(candidate) = rule.winner_candidate(&test) else {
            return;
        };
        let result = self.lifecycle.declare_winner(test_id, &candidate, now());
        self.cache.invalidate(test_id);
        match result {
            Ok(completed) => self.record(ExperimentAuditEventParams {
                variant_id: Some(candidate.to_string()),
                status: Some(completed.status),
                ..ExperimentAuditEventParams::applied("auto_winner_declared", test_id.as_str())
            }),
            Err(
                ExperimentError::ConcurrentModification(_) | ExperimentError::InvalidState { .. },
            ) => {}
            Err(err) => self.record(ExperimentAuditEventParams {
                variant_id: Some(candidate.to_string()),
                outcome: AuditOutcome::Rejected,
                error_kind: Some(err.kind()),
                message: Some(err.to_string()),
                ..ExperimentAuditEventParams::applied("auto_winner_declared", test_id.as_str())
            }),
        }
    }

    /// Emits an audit event.
    fn record(&self, params: ExperimentAuditEventParams) {
        self.audit.record(&ExperimentAuditEvent::new(params));
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current wall-clock time.
fn now() -> Timestamp {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    Timestamp::UnixMillis(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// Generates a random test identifier.
fn generate_test_id() -> TestId {
    let suffix: u64 = rand::thread_rng().r#gen();
    TestId::new(format!("exp-{suffix:016x}"))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
