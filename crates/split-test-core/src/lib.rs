// crates/split-test-core/src/lib.rs
// ============================================================================
// Module: Split Test Core Library
// Description: Public API surface for the Split Test core.
// Purpose: Expose experiment types, store interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Split Test core owns the experiment model for page-level A/B tests:
//! lifecycle transitions, deterministic visitor allocation, counter
//! aggregation, and the derived dashboard indicators. It is storage-agnostic
//! and integrates through the [`TestStore`] interface. Hosts supply
//! identifiers and timestamps; the core never reads wall-clock time.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CounterOutcome;
pub use interfaces::LifecycleUpdate;
pub use interfaces::MAX_REVENUE_CENTS;
pub use interfaces::StoreError;
pub use interfaces::TestStore;
pub use interfaces::VariantCounters;
pub use interfaces::WriteOutcome;
pub use runtime::ALLOCATION_BUCKETS;
pub use runtime::Assignment;
pub use runtime::AutoWinnerRule;
pub use runtime::DEFAULT_SIGNIFICANCE_VIEW_THRESHOLD;
pub use runtime::ErrorKind;
pub use runtime::ExperimentError;
pub use runtime::InMemoryTestStore;
pub use runtime::LifecycleController;
pub use runtime::MetricsAggregator;
pub use runtime::SIGNIFICANCE_LABEL;
pub use runtime::SharedTestStore;
pub use runtime::SignificanceEstimate;
pub use runtime::SignificanceMethod;
pub use runtime::SignificancePolicy;
pub use runtime::TestConfigCache;
pub use runtime::TestSummary;
pub use runtime::TransitionRequest;
pub use runtime::VariantAllocator;
pub use runtime::VariantSummary;
pub use runtime::leading_variant;
pub use runtime::significance;
pub use runtime::summarize;
