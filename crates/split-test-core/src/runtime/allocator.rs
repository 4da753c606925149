// crates/split-test-core/src/runtime/allocator.rs
// ============================================================================
// Module: Split Test Variant Allocator
// Description: Deterministic visitor-to-variant bucketing.
// Purpose: Give each visitor a stable variant that honors the traffic split.
// Dependencies: crate::{core, runtime::error}, serde
// ============================================================================

//! ## Overview
//! Allocation is a pure function of `(test id, visitor id, variant config)`.
//! The visitor lands in bucket `SHA-256(test id, visitor id) mod 100` and the
//! variants' cumulative percentages, walked in declaration order, pick the
//! first variant whose upper bound exceeds that bucket. No binding is stored:
//! repeat visits recompute the same answer.
//!
//! Visitor-facing callers use [`VariantAllocator::allocate_or_control`], which
//! never fails and falls back to the control variant instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ExperimentTest;
use crate::core::ExperimentVariant;
use crate::core::TestId;
use crate::core::TestStatus;
use crate::core::VariantId;
use crate::core::VisitorId;
use crate::core::hashing::stable_bucket;
use crate::runtime::error::ErrorKind;
use crate::runtime::error::ExperimentError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of allocation buckets; one per traffic percentage point.
pub const ALLOCATION_BUCKETS: u64 = 100;

// ============================================================================
// SECTION: Assignment
// ============================================================================

/// Result of allocating a visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Test identifier.
    pub test_id: TestId,
    /// Assigned variant.
    pub variant_id: VariantId,
    /// Assigned variant label.
    pub variant_name: String,
    /// True when the control was served because allocation failed.
    pub fallback: bool,
    /// Why allocation fell back, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorKind>,
}

impl Assignment {
    /// Builds an assignment for a variant.
    fn for_variant(test_id: &TestId, variant: &ExperimentVariant) -> Self {
        Self {
            test_id: test_id.clone(),
            variant_id: variant.id.clone(),
            variant_name: variant.name.clone(),
            fallback: false,
            reason: None,
        }
    }
}

// ============================================================================
// SECTION: Allocator
// ============================================================================

/// Stateless, lock-free variant allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariantAllocator;

impl VariantAllocator {
    /// Returns the visitor's bucket in `[0, 100)` for a test.
    #[must_use]
    pub fn bucket(test_id: &TestId, visitor_id: &VisitorId) -> u64 {
        stable_bucket(test_id.as_str(), visitor_id.as_str(), ALLOCATION_BUCKETS)
    }

    /// Returns the variant whose cumulative range covers `bucket`.
    ///
    /// Zero-percent variants own an empty range and are never selected.
    #[must_use]
    pub fn variant_for_bucket(test: &ExperimentTest, bucket: u64) -> Option<&ExperimentVariant> {
        let mut upper = 0_u64;
        for variant in &test.variants {
            upper += u64::from(variant.traffic_percentage);
            if bucket < upper {
                return Some(variant);
            }
        }
        None
    }

    /// Allocates a visitor to a variant of a running test.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::TestNotRunning`] unless the test is running
    /// and [`ExperimentError::Validation`] for empty visitor ids or a split
    /// that does not cover the bucket.
    pub fn allocate(
        test: &ExperimentTest,
        visitor_id: &VisitorId,
    ) -> Result<Assignment, ExperimentError> {
        if visitor_id.as_str().trim().is_empty() {
            return Err(ExperimentError::Validation("visitorId must be non-empty".to_string()));
        }
        if test.status != TestStatus::Running {
            return Err(ExperimentError::TestNotRunning {
                test_id: test.id.to_string(),
                status: test.status,
            });
        }
        let bucket = Self::bucket(&test.id, visitor_id);
        Self::variant_for_bucket(test, bucket)
            .map(|variant| Assignment::for_variant(&test.id, variant))
            .ok_or_else(|| {
                ExperimentError::Validation(format!(
                    "traffic split of test {} does not cover bucket {bucket}",
                    test.id
                ))
            })
    }

    /// Allocates a visitor, serving the control variant when allocation fails.
    ///
    /// Returns `None` only for a test with no variants at all.
    #[must_use]
    pub fn allocate_or_control(test: &ExperimentTest, visitor_id: &VisitorId) -> Option<Assignment> {
        match Self::allocate(test, visitor_id) {
            Ok(assignment) => Some(assignment),
            Err(err) => test.control().map(|control| Assignment {
                fallback: true,
                reason: Some(err.kind()),
                ..Assignment::for_variant(&test.id, control)
            }),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test fixtures use unwraps for clarity.")]

    use super::*;
    use crate::core::PageSlug;
    use crate::core::TestDraft;
    use crate::core::Timestamp;
    use crate::core::VariantDraft;

    fn running_test(split: &[(&str, i64)]) -> ExperimentTest {
        let draft = TestDraft {
            name: "Split".to_string(),
            page_slug: PageSlug::new("home"),
            variants: split.iter().map(|(name, pct)| VariantDraft::new(*name, *pct)).collect(),
            traffic_split: None,
        };
        let mut test =
            ExperimentTest::from_draft(TestId::new("t-1"), &draft, Timestamp::Logical(1)).unwrap();
        test.status = TestStatus::Running;
        test
    }

    #[test]
    fn zero_percent_variant_is_never_selected() {
        let test = running_test(&[("A", 0), ("B", 100)]);
        for bucket in 0 .. ALLOCATION_BUCKETS {
            let variant = VariantAllocator::variant_for_bucket(&test, bucket).unwrap();
            assert_eq!(variant.name, "B");
        }
    }

    #[test]
    fn cumulative_ranges_follow_declaration_order() {
        let test = running_test(&[("A", 20), ("B", 30), ("C", 50)]);
        assert_eq!(VariantAllocator::variant_for_bucket(&test, 0).unwrap().name, "A");
        assert_eq!(VariantAllocator::variant_for_bucket(&test, 19).unwrap().name, "A");
        assert_eq!(VariantAllocator::variant_for_bucket(&test, 20).unwrap().name, "B");
        assert_eq!(VariantAllocator::variant_for_bucket(&test, 49).unwrap().name, "B");
        assert_eq!(VariantAllocator::variant_for_bucket(&test, 50).unwrap().name, "C");
        assert_eq!(VariantAllocator::variant_for_bucket(&test, 99).unwrap().name, "C");
        assert!(VariantAllocator::variant_for_bucket(&test, 100).is_none());
    }

    #[test]
    fn paused_test_falls_back_to_control() {
        let mut test = running_test(&[("A", 10), ("B", 90)]);
        test.status = TestStatus::Paused;
        let assignment =
            VariantAllocator::allocate_or_control(&test, &VisitorId::new("v-1")).unwrap();
        assert!(assignment.fallback);
        assert_eq!(assignment.variant_name, "A");
        assert_eq!(assignment.reason, Some(ErrorKind::TestNotRunningError));
    }

    #[test]
    fn empty_visitor_is_a_validation_error() {
        let test = running_test(&[("A", 50), ("B", 50)]);
        let err = VariantAllocator::allocate(&test, &VisitorId::new("  ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
