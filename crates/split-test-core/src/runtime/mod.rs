// crates/split-test-core/src/runtime/mod.rs
// ============================================================================
// Module: Split Test Runtime
// Description: Lifecycle, allocation, metrics, and dashboard logic.
// Purpose: Implement experiment behavior on top of the store interface.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules hold the experiment behavior. Every host surface (HTTP,
//! CLI, tests) goes through these types so the state machine and counter
//! rules are enforced in one place.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod aggregator;
pub mod allocator;
pub mod cache;
pub mod dashboard;
pub mod error;
pub mod lifecycle;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use aggregator::MetricsAggregator;
pub use allocator::ALLOCATION_BUCKETS;
pub use allocator::Assignment;
pub use allocator::VariantAllocator;
pub use cache::TestConfigCache;
pub use dashboard::AutoWinnerRule;
pub use dashboard::DEFAULT_SIGNIFICANCE_VIEW_THRESHOLD;
pub use dashboard::SIGNIFICANCE_LABEL;
pub use dashboard::SignificanceEstimate;
pub use dashboard::SignificanceMethod;
pub use dashboard::SignificancePolicy;
pub use dashboard::TestSummary;
pub use dashboard::VariantSummary;
pub use dashboard::leading_variant;
pub use dashboard::significance;
pub use dashboard::summarize;
pub use error::ErrorKind;
pub use error::ExperimentError;
pub use lifecycle::LifecycleController;
pub use lifecycle::TransitionRequest;
pub use store::InMemoryTestStore;
pub use store::SharedTestStore;
