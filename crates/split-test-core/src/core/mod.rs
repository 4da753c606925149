// crates/split-test-core/src/core/mod.rs
// ============================================================================
// Module: Split Test Core Types
// Description: Canonical experiment definitions, identifiers, and time values.
// Purpose: Provide stable, serializable types for experiments and their variants.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Core types define experiment tests, their variants, and the draft payload
//! used to create them. These types are the canonical source of truth for
//! the REST surface and for every store backend.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod experiment;
pub mod hashing;
pub mod identifiers;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use experiment::DraftError;
pub use experiment::ExperimentTest;
pub use experiment::ExperimentVariant;
pub use experiment::TestDraft;
pub use experiment::TestStatus;
pub use experiment::VariantDraft;
pub use experiment::conversion_rate;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::PageSlug;
pub use identifiers::TestId;
pub use identifiers::VariantId;
pub use identifiers::VisitorId;
pub use time::Timestamp;
