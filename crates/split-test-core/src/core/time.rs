// crates/split-test-core/src/core/time.rs
// ============================================================================
// Module: Split Test Time Model
// Description: Canonical timestamp representation for lifecycle dates.
// Purpose: Keep lifecycle transitions replayable by taking time from callers.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Lifecycle operations take explicit timestamps supplied by the host. The
//! core never reads wall-clock time, which keeps controller behavior
//! deterministic under test.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Canonical timestamp used for experiment start, end, and creation dates.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads wall-clock time.
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Timestamp {
    /// Unix epoch milliseconds.
    UnixMillis(i64),
    /// Monotonic logical time value.
    Logical(u64),
}

impl Timestamp {
    /// Returns the timestamp as unix milliseconds when available.
    #[must_use]
    pub const fn as_unix_millis(&self) -> Option<i64> {
        match self {
            Self::UnixMillis(value) => Some(*value),
            Self::Logical(_) => None,
        }
    }

    /// Returns the timestamp as logical time when available.
    #[must_use]
    pub const fn as_logical(&self) -> Option<u64> {
        match self {
            Self::UnixMillis(_) => None,
            Self::Logical(value) => Some(*value),
        }
    }

    /// Renders unix timestamps as RFC 3339 strings for display.
    ///
    /// Logical timestamps and out-of-range values return `None`.
    #[must_use]
    pub fn to_rfc3339(&self) -> Option<String> {
        let millis = self.as_unix_millis()?;
        let nanos = i128::from(millis).checked_mul(1_000_000)?;
        let datetime = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
        datetime.format(&Rfc3339).ok()
    }
}
