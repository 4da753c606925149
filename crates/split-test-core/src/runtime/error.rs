// crates/split-test-core/src/runtime/error.rs
// ============================================================================
// Module: Split Test Runtime Errors
// Description: Error taxonomy shared by lifecycle, allocation, and metrics.
// Purpose: Give every surface one stable error kind per failure class.
// Dependencies: crate::{core, interfaces}, serde, thiserror
// ============================================================================

//! ## Overview
//! [`ExperimentError`] carries the details; [`ErrorKind`] is the stable
//! label serialized on the wire and used for status mapping by hosts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::DraftError;
use crate::core::TestStatus;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Error Kind
// ============================================================================

/// Stable error classification exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input or an invalid draft.
    ValidationError,
    /// Illegal lifecycle transition.
    InvalidStateError,
    /// No such test.
    UnknownTestError,
    /// No such variant in the test.
    UnknownVariantError,
    /// Conversion without a matching view.
    OrphanConversionError,
    /// Lost a lifecycle compare-and-swap.
    ConcurrentModificationError,
    /// Test is not accepting traffic or events.
    TestNotRunningError,
    /// Persistence failure.
    StoreError,
}

impl ErrorKind {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::InvalidStateError => "InvalidStateError",
            Self::UnknownTestError => "UnknownTestError",
            Self::UnknownVariantError => "UnknownVariantError",
            Self::OrphanConversionError => "OrphanConversionError",
            Self::ConcurrentModificationError => "ConcurrentModificationError",
            Self::TestNotRunningError => "TestNotRunningError",
            Self::StoreError => "StoreError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Experiment Error
// ============================================================================

/// Experiment runtime errors.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Draft failed validation.
    #[error("invalid test definition: {0}")]
    Draft(#[from] DraftError),
    /// Request input failed validation.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Transition not allowed from the current status.
    #[error("cannot {action} test {test_id} while {status}")]
    InvalidState {
        /// Test identifier.
        test_id: String,
        /// Current status.
        status: TestStatus,
        /// Attempted action.
        action: &'static str,
    },
    /// Test not found.
    #[error("unknown test: {0}")]
    UnknownTest(String),
    /// Variant not found in the test.
    #[error("unknown variant {variant_id} for test {test_id}")]
    UnknownVariant {
        /// Test identifier.
        test_id: String,
        /// Variant identifier.
        variant_id: String,
    },
    /// Conversion would exceed recorded views.
    #[error(
        "conversion rejected for variant {variant_id} of test {test_id}: {conversions} \
         conversions already match {views} views"
    )]
    OrphanConversion {
        /// Test identifier.
        test_id: String,
        /// Variant identifier.
        variant_id: String,
        /// Views at rejection time.
        views: u64,
        /// Conversions at rejection time.
        conversions: u64,
    },
    /// Another writer changed the test first.
    #[error("test {0} was modified concurrently; reload and retry")]
    ConcurrentModification(String),
    /// Test is not running.
    #[error("test {test_id} is not running (status: {status})")]
    TestNotRunning {
        /// Test identifier.
        test_id: String,
        /// Current status.
        status: TestStatus,
    },
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExperimentError {
    /// Returns the stable error classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Draft(_) | Self::Validation(_) => ErrorKind::ValidationError,
            Self::InvalidState {
                ..
            } => ErrorKind::InvalidStateError,
            Self::UnknownTest(_) => ErrorKind::UnknownTestError,
            Self::UnknownVariant {
                ..
            } => ErrorKind::UnknownVariantError,
            Self::OrphanConversion {
                ..
            } => ErrorKind::OrphanConversionError,
            Self::ConcurrentModification(_) => ErrorKind::ConcurrentModificationError,
            Self::TestNotRunning {
                ..
            } => ErrorKind::TestNotRunningError,
            Self::Store(_) => ErrorKind::StoreError,
        }
    }
}
