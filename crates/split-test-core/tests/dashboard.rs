// crates/split-test-core/tests/dashboard.rs
// ============================================================================
// Module: Dashboard Tests
// Description: Leader selection, significance guidance, and auto-winner rule.
// Purpose: Ensure derived indicators never overstate results.
// Dependencies: split-test-core, serde_json
// ============================================================================

//! ## Overview
//! Dashboard tests cover tie handling, the labelled significance heuristic,
//! the optional z-test, and the opt-in automatic winner rule.

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
    clippy::float_cmp,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use split_test_core::AutoWinnerRule;
use split_test_core::ExperimentTest;
use split_test_core::PageSlug;
use split_test_core::SIGNIFICANCE_LABEL;
use split_test_core::SignificanceMethod;
use split_test_core::SignificancePolicy;
use split_test_core::TestDraft;
use split_test_core::TestId;
use split_test_core::TestStatus;
use split_test_core::Timestamp;
use split_test_core::VariantDraft;
use split_test_core::VariantId;
use split_test_core::leading_variant;
use split_test_core::significance;
use split_test_core::summarize;

fn test_with_counts(counts: &[(u64, u64)]) -> ExperimentTest {
    let share = 100 / i64::try_from(counts.len()).unwrap();
    let mut variants: Vec<VariantDraft> = (0 .. counts.len())
        .map(|index| VariantDraft::new(format!("V{index}"), share))
        .collect();
    let remainder = 100 - share * i64::try_from(counts.len()).unwrap();
    variants[0].traffic_percentage = Some(share + remainder);
    let draft = TestDraft {
        name: "Dash".to_string(),
        page_slug: PageSlug::new("home"),
        variants,
        traffic_split: None,
    };
    let mut test =
        ExperimentTest::from_draft(TestId::new("dash"), &draft, Timestamp::UnixMillis(0)).unwrap();
    test.status = TestStatus::Running;
    for (variant, (views, conversions)) in test.variants.iter_mut().zip(counts) {
        variant.views = *views;
        variant.conversions = *conversions;
    }
    test
}

#[test]
fn ties_have_no_leader() {
    assert!(leading_variant(&test_with_counts(&[(0, 0), (0, 0)])).is_none());
    assert!(leading_variant(&test_with_counts(&[(100, 10), (200, 20)])).is_none());
    assert!(leading_variant(&test_with_counts(&[(100, 10), (100, 5), (50, 5)])).is_none());
}

#[test]
fn strict_leader_is_reported() {
    let test = test_with_counts(&[(100, 10), (100, 11), (0, 0)]);
    assert_eq!(leading_variant(&test).unwrap().id, VariantId::new("variant-2"));
}

#[test]
fn view_threshold_heuristic_is_capped_and_labelled() {
    let policy = SignificancePolicy::default();
    let halfway = significance(&test_with_counts(&[(300, 1), (200, 1)]), &policy);
    assert_eq!(halfway.percent, 50.0);
    assert_eq!(halfway.label, SIGNIFICANCE_LABEL);
    assert!(halfway.note.contains("not a statistical test"));

    let capped = significance(&test_with_counts(&[(3_000, 1), (2_000, 1)]), &policy);
    assert_eq!(capped.percent, 100.0);
}

#[test]
fn z_test_reports_confidence_for_clear_difference() {
    let policy = SignificancePolicy {
        method: SignificanceMethod::TwoProportionZ,
        view_threshold: 1_000,
    };
    let estimate = significance(&test_with_counts(&[(2_000, 100), (2_000, 200)]), &policy);
    assert!(estimate.z_score.unwrap() > 5.0);
    assert!(estimate.percent > 99.0);
    assert_eq!(estimate.label, SIGNIFICANCE_LABEL);

    let empty = significance(&test_with_counts(&[(0, 0), (0, 0)]), &policy);
    assert!(empty.z_score.is_none());
    assert_eq!(empty.percent, 0.0);
}

#[test]
fn auto_winner_needs_views_and_confidence() {
    let rule = AutoWinnerRule {
        min_views_per_variant: 500,
        min_confidence_percent: 95.0,
    };
    let clear = test_with_counts(&[(2_000, 100), (2_000, 200)]);
    assert_eq!(rule.winner_candidate(&clear), Some(VariantId::new("variant-2")));

    let too_few = test_with_counts(&[(400, 10), (2_000, 200)]);
    assert_eq!(rule.winner_candidate(&too_few), None);

    let noisy = test_with_counts(&[(600, 30), (600, 32)]);
    assert_eq!(rule.winner_candidate(&noisy), None);

    let mut paused = clear;
    paused.status = TestStatus::Paused;
    assert_eq!(rule.winner_candidate(&paused), None);
}

#[test]
fn summary_marks_control_leader_and_dates() {
    let mut test = test_with_counts(&[(600, 60), (400, 20)]);
    test.start_date = Some(Timestamp::UnixMillis(1_700_000_000_000));
    let summary = summarize(&test, &SignificancePolicy::default());
    assert_eq!(summary.total_views, 1_000);
    assert_eq!(summary.total_conversions, 80);
    assert_eq!(summary.leading_variant_id, Some(VariantId::new("variant-1")));
    assert!(summary.variants[0].is_control && summary.variants[0].is_leader);
    assert_eq!(summary.variants[1].conversion_rate, 5.0);
    assert_eq!(summary.significance.percent, 100.0);
    assert_eq!(summary.start_date.as_deref(), Some("2023-11-14T22:13:20Z"));
    assert!(summary.end_date.is_none());

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["leadingVariantId"], "variant-1");
    assert_eq!(json["significance"]["label"], "directional");
}
