// crates/split-test-core/tests/lifecycle.rs
// ============================================================================
// Module: Lifecycle Controller Tests
// Description: State machine, winner declaration, and revision guards.
// Purpose: Ensure transitions follow the lifecycle rules and never overwrite.
// Dependencies: split-test-core
// ============================================================================
//! ## Overview
//! Exercises every lifecycle transition against the in-memory store,
//! including concurrent winner declarations and stale-snapshot writers.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use split_test_core::CounterOutcome;
use split_test_core::ErrorKind;
use split_test_core::ExperimentTest;
use split_test_core::InMemoryTestStore;
use split_test_core::LifecycleController;
use split_test_core::LifecycleUpdate;
use split_test_core::PageSlug;
use split_test_core::StoreError;
use split_test_core::TestDraft;
use split_test_core::TestId;
use split_test_core::TestStatus;
use split_test_core::TestStore;
use split_test_core::Timestamp;
use split_test_core::TransitionRequest;
use split_test_core::VariantDraft;
use split_test_core::VariantId;
use split_test_core::WriteOutcome;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn hero_draft() -> TestDraft {
    TestDraft {
        name: "Hero Test".to_string(),
        page_slug: PageSlug::new("home"),
        variants: vec![VariantDraft::new("A", 50), VariantDraft::new("B", 50)],
        traffic_split: None,
    }
}

fn controller_with_test() -> (LifecycleController<InMemoryTestStore>, TestId) {
    let controller = LifecycleController::new(InMemoryTestStore::new());
    let test_id = TestId::new("hero");
    controller.create_test(test_id.clone(), &hero_draft(), Timestamp::Logical(1)).unwrap();
    (controller, test_id)
}

/// Store that always returns a fixed snapshot from `load`.
struct StaleLoadStore {
    inner: InMemoryTestStore,
    snapshot: ExperimentTest,
}

impl TestStore for StaleLoadStore {
    fn insert(&self, test: &ExperimentTest) -> Result<(), StoreError> {
        self.inner.insert(test)
    }

    fn load(&self, _test_id: &TestId) -> Result<Option<ExperimentTest>, StoreError> {
        Ok(Some(self.snapshot.clone()))
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
}

// ============================================================================
// SECTION: Creation
// ============================================================================

#[test]
fn create_persists_draft_with_zero_counters() {
    let (controller, test_id) = controller_with_test();
    let test = controller.get_test(&test_id).unwrap();
    assert_eq!(test.status, TestStatus::Draft);
    assert_eq!(test.revision, 1);
    assert!(test.start_date.is_none());
    assert!(test.winner_id.is_none());
    assert_eq!(test.traffic_split.get("A"), Some(&50));
    assert!(test.variants.iter().all(|variant| variant.views == 0 && variant.conversions == 0));
}

#[test]
fn create_rejects_single_variant_and_bad_sums() {
    let controller = LifecycleController::new(InMemoryTestStore::new());
    let mut draft = hero_draft();
    draft.variants.truncate(1);
    let err = controller.create_test(TestId::new("t"), &draft, Timestamp::Logical(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let mut draft = hero_draft();
    draft.variants[1].traffic_percentage = Some(40);
    let err = controller.create_test(TestId::new("t"), &draft, Timestamp::Logical(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(controller.store().list(None).unwrap().is_empty());
}

#[test]
fn create_rejects_duplicate_ids() {
    let (controller, test_id) = controller_with_test();
    let err = controller.create_test(test_id, &hero_draft(), Timestamp::Logical(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentModificationError);
}

// ============================================================================
// SECTION: Transitions
// ============================================================================

#[test]
fn start_pause_resume_keeps_start_date() {
    let (controller, test_id) = controller_with_test();
    let started = controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    assert_eq!(started.status, TestStatus::Running);
    assert_eq!(started.start_date, Some(Timestamp::Logical(10)));

    let paused = controller.pause_test(&test_id).unwrap();
    assert_eq!(paused.status, TestStatus::Paused);

    let resumed = controller.start_test(&test_id, Timestamp::Logical(20)).unwrap();
    assert_eq!(resumed.status, TestStatus::Running);
    assert_eq!(resumed.start_date, Some(Timestamp::Logical(10)));
    assert_eq!(resumed.revision, 4);
}

#[test]
fn pause_requires_running() {
    let (controller, test_id) = controller_with_test();
    let err = controller.pause_test(&test_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
}

#[test]
fn start_while_running_is_invalid() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    let err = controller.start_test(&test_id, Timestamp::Logical(11)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
}

#[test]
fn declare_winner_on_draft_is_invalid() {
    let (controller, test_id) = controller_with_test();
    let err = controller
        .declare_winner(&test_id, &VariantId::new("variant-1"), Timestamp::Logical(5))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
}

#[test]
fn declare_winner_succeeds_once_and_is_irreversible() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    let completed = controller
        .declare_winner(&test_id, &VariantId::new("variant-1"), Timestamp::Logical(30))
        .unwrap();
    assert_eq!(completed.status, TestStatus::Completed);
    assert_eq!(completed.winner_id, Some(VariantId::new("variant-1")));
    assert_eq!(completed.end_date, Some(Timestamp::Logical(30)));

    let err = controller
        .declare_winner(&test_id, &VariantId::new("variant-2"), Timestamp::Logical(31))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
    let err = controller.start_test(&test_id, Timestamp::Logical(32)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let stored = controller.get_test(&test_id).unwrap();
    assert_eq!(stored.winner_id, Some(VariantId::new("variant-1")));
}

#[test]
fn declare_winner_from_paused_is_allowed() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    controller.pause_test(&test_id).unwrap();
    let completed = controller
        .declare_winner(&test_id, &VariantId::new("variant-2"), Timestamp::Logical(40))
        .unwrap();
    assert_eq!(completed.status, TestStatus::Completed);
}

#[test]
fn declare_unknown_variant_leaves_state_unchanged() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    let err = controller
        .declare_winner(&test_id, &VariantId::new("nope"), Timestamp::Logical(11))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownVariantError);
    assert_eq!(controller.get_test(&test_id).unwrap().status, TestStatus::Running);
}

#[test]
fn unknown_test_is_reported() {
    let controller = LifecycleController::new(InMemoryTestStore::new());
    let err = controller.start_test(&TestId::new("missing"), Timestamp::Logical(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTestError);
}

#[test]
fn transition_requests_dispatch_and_validate() {
    let (controller, test_id) = controller_with_test();
    let back_to_draft = TransitionRequest {
        status: TestStatus::Draft,
        winner_id: None,
    };
    let err = controller.apply_transition(&test_id, &back_to_draft, Timestamp::Logical(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let start = TransitionRequest {
        status: TestStatus::Running,
        winner_id: None,
    };
    controller.apply_transition(&test_id, &start, Timestamp::Logical(3)).unwrap();

    let complete_without_winner = TransitionRequest {
        status: TestStatus::Completed,
        winner_id: None,
    };
    let err = controller
        .apply_transition(&test_id, &complete_without_winner, Timestamp::Logical(4))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let pause_with_winner = TransitionRequest {
        status: TestStatus::Paused,
        winner_id: Some(VariantId::new("variant-1")),
    };
    let err =
        controller.apply_transition(&test_id, &pause_with_winner, Timestamp::Logical(5)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let complete = TransitionRequest {
        status: TestStatus::Completed,
        winner_id: Some(VariantId::new("variant-2")),
    };
    let done = controller.apply_transition(&test_id, &complete, Timestamp::Logical(6)).unwrap();
    assert_eq!(done.winner_id, Some(VariantId::new("variant-2")));
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

#[test]
fn stale_writer_gets_concurrent_modification() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    let snapshot = controller.get_test(&test_id).unwrap();

    let stale = LifecycleController::new(StaleLoadStore {
        inner: controller.store().clone(),
        snapshot,
    });
    controller
        .declare_winner(&test_id, &VariantId::new("variant-2"), Timestamp::Logical(20))
        .unwrap();
    let err = stale
        .declare_winner(&test_id, &VariantId::new("variant-1"), Timestamp::Logical(21))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrentModificationError);
    assert_eq!(
        controller.get_test(&test_id).unwrap().winner_id,
        Some(VariantId::new("variant-2"))
    );
}

#[test]
fn concurrent_winner_declarations_produce_one_winner() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    let controller = Arc::new(controller);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0 .. 8)
        .map(|index| {
            let controller = Arc::clone(&controller);
            let barrier = Arc::clone(&barrier);
            let test_id = test_id.clone();
            thread::spawn(move || {
                let winner = VariantId::for_position(index % 2);
                barrier.wait();
                controller.declare_winner(&test_id, &winner, Timestamp::Logical(100))
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert!(matches!(
                err.kind(),
                ErrorKind::ConcurrentModificationError | ErrorKind::InvalidStateError
            )),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(controller.get_test(&test_id).unwrap().status, TestStatus::Completed);
}

// ============================================================================
// SECTION: Deletion
// ============================================================================

#[test]
fn delete_is_refused_while_running() {
    let (controller, test_id) = controller_with_test();
    controller.start_test(&test_id, Timestamp::Logical(10)).unwrap();
    let err = controller.delete_test(&test_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    controller.pause_test(&test_id).unwrap();
    controller.delete_test(&test_id).unwrap();
    assert!(controller.store().load(&test_id).unwrap().is_none());
}
