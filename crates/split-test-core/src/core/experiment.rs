// crates/split-test-core/src/core/experiment.rs
// ============================================================================
// Module: Split Test Experiment Model
// Description: Experiment tests, variants, lifecycle status, and creation drafts.
// Purpose: Define the canonical experiment shape and its creation-time validation.
// Dependencies: crate::core::{identifiers, time}, serde, thiserror
// ============================================================================

//! ## Overview
//! An [`ExperimentTest`] is a named experiment on one page with an ordered
//! list of variants. The first variant is the control and doubles as the
//! allocation fallback. Creation goes through [`TestDraft::validate`], which
//! resolves each variant's traffic percentage from the variant itself or the
//! draft's traffic split and rejects anything that does not sum to 100.
//!
//! Conversion rates are never stored: [`ExperimentVariant`] serializes a
//! `conversionRate` computed from its counters and ignores that field on
//! input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

use crate::core::identifiers::PageSlug;
use crate::core::identifiers::TestId;
use crate::core::identifiers::VariantId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Minimum number of variants in a test.
pub const MIN_VARIANTS: usize = 2;
/// Maximum number of variants in a test.
pub const MAX_VARIANTS: usize = 100;
/// Maximum length of names, slugs, and variant identifiers.
pub const MAX_LABEL_LENGTH: usize = 256;
/// Required total of all variant traffic percentages.
pub const TOTAL_TRAFFIC_PERCENT: i64 = 100;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of an experiment test.
///
/// # Invariants
/// - `Completed` is terminal.
/// - Only `Running` allocates visitors and records events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Created, serving no traffic.
    Draft,
    /// Allocating visitors and recording events.
    Running,
    /// Allocation frozen; counters preserved.
    Paused,
    /// Terminal; a winner has been declared.
    Completed,
}

impl TestStatus {
    /// Returns the stable wire and storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// Parses a stored status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "draft" => Some(Self::Draft),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Returns true when no transition may leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Variants
// ============================================================================

/// Returns the conversion rate as a percentage (0 when there are no views).
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Counters far below 2^52 in practice.")]
pub fn conversion_rate(views: u64, conversions: u64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    (conversions as f64 * 100.0) / views as f64
}

/// One alternative version of the page under test.
///
/// # Invariants
/// - `conversions <= views`; both only increase.
/// - `traffic_percentage` is within `0..=100`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentVariant {
    /// Identifier unique within the test.
    pub id: VariantId,
    /// Human label (for example "Control").
    pub name: String,
    /// Share of visitors routed to this variant.
    pub traffic_percentage: u8,
    /// Recorded page views.
    #[serde(default)]
    pub views: u64,
    /// Recorded conversions.
    #[serde(default)]
    pub conversions: u64,
    /// Accumulated revenue in minor currency units, when any was reported.
    #[serde(default)]
    pub revenue_cents: Option<u64>,
}

impl ExperimentVariant {
    /// Returns the derived conversion rate percentage.
    #[must_use]
    pub fn conversion_rate(&self) -> f64 {
        conversion_rate(self.views, self.conversions)
    }
}

/// Wire form of a variant including the derived conversion rate.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VariantWire<'a> {
    /// Variant identifier.
    id: &'a VariantId,
    /// Variant label.
    name: &'a str,
    /// Traffic percentage.
    traffic_percentage: u8,
    /// Recorded views.
    views: u64,
    /// Recorded conversions.
    conversions: u64,
    /// Derived conversion rate.
    conversion_rate: f64,
    /// Accumulated revenue.
    #[serde(skip_serializing_if = "Option::is_none")]
    revenue_cents: Option<u64>,
}

impl Serialize for ExperimentVariant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VariantWire {
            id: &self.id,
            name: &self.name,
            traffic_percentage: self.traffic_percentage,
            views: self.views,
            conversions: self.conversions,
            conversion_rate: self.conversion_rate(),
            revenue_cents: self.revenue_cents,
        }
        .serialize(serializer)
    }
}

// ============================================================================
// SECTION: Experiment Test
// ============================================================================

/// Persisted experiment definition with lifecycle state and counters.
///
/// # Invariants
/// - At least [`MIN_VARIANTS`] variants; percentages sum to 100.
/// - `traffic_split` mirrors the variants' percentages keyed by name.
/// - `winner_id` is set iff `status == Completed`.
/// - `revision` increases on every lifecycle write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentTest {
    /// Test identifier.
    pub id: TestId,
    /// Human label.
    pub name: String,
    /// Page the test applies to.
    pub page_slug: PageSlug,
    /// Lifecycle status.
    pub status: TestStatus,
    /// Ordered variants; the first is the control.
    pub variants: Vec<ExperimentVariant>,
    /// Variant name to traffic percentage.
    pub traffic_split: BTreeMap<String, u8>,
    /// Set on the first transition into `Running`.
    #[serde(default)]
    pub start_date: Option<Timestamp>,
    /// Set on the transition into `Completed`.
    #[serde(default)]
    pub end_date: Option<Timestamp>,
    /// Declared winner, only when completed.
    #[serde(default)]
    pub winner_id: Option<VariantId>,
    /// Optimistic concurrency revision.
    pub revision: u64,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

impl ExperimentTest {
    /// Builds a new draft test with zeroed counters from a validated draft.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError`] when the draft is invalid.
    pub fn from_draft(
        id: TestId,
        draft: &TestDraft,
        created_at: Timestamp,
    ) -> Result<Self, DraftError> {
        let variants = draft.validate()?;
        let traffic_split = variants
            .iter()
            .map(|variant| (variant.name.clone(), variant.traffic_percentage))
            .collect();
        Ok(Self {
            id,
            name: draft.name.trim().to_string(),
            page_slug: PageSlug::new(draft.page_slug.as_str().trim()),
            status: TestStatus::Draft,
            variants,
            traffic_split,
            start_date: None,
            end_date: None,
            winner_id: None,
            revision: 1,
            created_at,
        })
    }

    /// Returns the variant with the given identifier.
    #[must_use]
    pub fn variant(&self, variant_id: &VariantId) -> Option<&ExperimentVariant> {
        self.variants.iter().find(|variant| &variant.id == variant_id)
    }

    /// Returns the control variant (the first one).
    #[must_use]
    pub fn control(&self) -> Option<&ExperimentVariant> {
        self.variants.first()
    }

    /// Returns total views across variants.
    #[must_use]
    pub fn total_views(&self) -> u64 {
        self.variants.iter().map(|variant| variant.views).fold(0, u64::saturating_add)
    }

    /// Returns total conversions across variants.
    #[must_use]
    pub fn total_conversions(&self) -> u64 {
        self.variants.iter().map(|variant| variant.conversions).fold(0, u64::saturating_add)
    }
}

// ============================================================================
// SECTION: Drafts
// ============================================================================

/// Variant entry of a creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDraft {
    /// Optional caller-chosen identifier; defaults to `variant-{n}`.
    #[serde(default)]
    pub id: Option<VariantId>,
    /// Variant label.
    pub name: String,
    /// Traffic percentage; may instead come from the draft's traffic split.
    #[serde(default)]
    pub traffic_percentage: Option<i64>,
}

impl VariantDraft {
    /// Creates a variant draft with an explicit percentage.
    #[must_use]
    pub fn new(name: impl Into<String>, traffic_percentage: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            traffic_percentage: Some(traffic_percentage),
        }
    }
}

/// Creation request for a new experiment test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDraft {
    /// Human label.
    pub name: String,
    /// Target page slug.
    pub page_slug: PageSlug,
    /// Ordered variants; the first is the control.
    pub variants: Vec<VariantDraft>,
    /// Optional variant name to percentage mapping.
    #[serde(default)]
    pub traffic_split: Option<BTreeMap<String, i64>>,
}

impl TestDraft {
    /// Validates the draft and returns zero-counter variants in draft order.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError`] describing the first violated rule.
    pub fn validate(&self) -> Result<Vec<ExperimentVariant>, DraftError> {
        validate_label("name", &self.name)?;
        validate_label("pageSlug", self.page_slug.as_str())?;
        if self.variants.len() < MIN_VARIANTS {
            return Err(DraftError::TooFewVariants {
                found: self.variants.len(),
            });
        }
        if self.variants.len() > MAX_VARIANTS {
            return Err(DraftError::TooManyVariants {
                found: self.variants.len(),
            });
        }

        let split = self.traffic_split.as_ref();
        let mut names = BTreeSet::new();
        let mut ids = BTreeSet::new();
        let mut variants = Vec::with_capacity(self.variants.len());
        let mut total: i64 = 0;
        for (index, entry) in self.variants.iter().enumerate() {
            let name = entry.name.trim();
            validate_label("variants.name", name)?;
            if !names.insert(name.to_string()) {
                return Err(DraftError::DuplicateVariantName(name.to_string()));
            }
            let id = match &entry.id {
                Some(id) => {
                    validate_label("variants.id", id.as_str())?;
                    id.clone()
                }
                None => VariantId::for_position(index),
            };
            if !ids.insert(id.clone()) {
                return Err(DraftError::DuplicateVariantId(id.to_string()));
            }
            let declared = entry.traffic_percentage;
            let from_split = split.and_then(|split| split.get(name).copied());
            let percentage = match (declared, from_split) {
                (Some(declared), Some(from_split)) if declared != from_split => {
                    return Err(DraftError::SplitMismatch {
                        variant: name.to_string(),
                        declared,
                        split: from_split,
                    });
                }
                (Some(value), _) | (None, Some(value)) => value,
                (None, None) => return Err(DraftError::MissingPercentage(name.to_string())),
            };
            let Ok(traffic_percentage) = u8::try_from(percentage) else {
                return Err(DraftError::PercentageOutOfRange {
                    variant: name.to_string(),
                    value: percentage,
                });
            };
            if i64::from(traffic_percentage) > TOTAL_TRAFFIC_PERCENT {
                return Err(DraftError::PercentageOutOfRange {
                    variant: name.to_string(),
                    value: percentage,
                });
            }
            total += i64::from(traffic_percentage);
            variants.push(ExperimentVariant {
                id,
                name: name.to_string(),
                traffic_percentage,
                views: 0,
                conversions: 0,
                revenue_cents: None,
            });
        }
        if let Some(split) = split
            && let Some(unknown) = split.keys().find(|key| !names.contains(key.trim()))
        {
            return Err(DraftError::UnknownSplitEntry(unknown.clone()));
        }
        if total != TOTAL_TRAFFIC_PERCENT {
            return Err(DraftError::SplitSum {
                total,
            });
        }
        Ok(variants)
    }
}

/// Validates a non-empty, bounded label.
fn validate_label(field: &'static str, value: &str) -> Result<(), DraftError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DraftError::EmptyField(field));
    }
    if trimmed.len() > MAX_LABEL_LENGTH {
        return Err(DraftError::FieldTooLong(field));
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Draft validation failures.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    /// A required text field is empty.
    #[error("{0} must be non-empty")]
    EmptyField(&'static str),
    /// A text field exceeds [`MAX_LABEL_LENGTH`].
    #[error("{0} exceeds max length")]
    FieldTooLong(&'static str),
    /// Fewer than [`MIN_VARIANTS`] variants.
    #[error("a test needs at least {MIN_VARIANTS} variants, found {found}")]
    TooFewVariants {
        /// Number of variants supplied.
        found: usize,
    },
    /// More than [`MAX_VARIANTS`] variants.
    #[error("a test allows at most {MAX_VARIANTS} variants, found {found}")]
    TooManyVariants {
        /// Number of variants supplied.
        found: usize,
    },
    /// Two variants share a name.
    #[error("duplicate variant name: {0}")]
    DuplicateVariantName(String),
    /// Two variants share an identifier.
    #[error("duplicate variant id: {0}")]
    DuplicateVariantId(String),
    /// Neither the variant nor the traffic split supplies a percentage.
    #[error("variant {0} has no traffic percentage")]
    MissingPercentage(String),
    /// The variant and the traffic split disagree.
    #[error("variant {variant} declares {declared}% but traffic split says {split}%")]
    SplitMismatch {
        /// Variant name.
        variant: String,
        /// Percentage on the variant entry.
        declared: i64,
        /// Percentage in the traffic split.
        split: i64,
    },
    /// A traffic split entry names no variant.
    #[error("traffic split names unknown variant: {0}")]
    UnknownSplitEntry(String),
    /// A percentage is outside `0..=100`.
    #[error("variant {variant} traffic percentage {value} is outside 0..=100")]
    PercentageOutOfRange {
        /// Variant name.
        variant: String,
        /// Rejected value.
        value: i64,
    },
    /// Percentages do not sum to 100.
    #[error("traffic percentages must sum to 100, got {total}")]
    SplitSum {
        /// Actual sum.
        total: i64,
    },
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::float_cmp,
        reason = "Test fixtures use unwraps and exact float literals for clarity."
    )]

    use super::*;

    fn draft(variants: Vec<VariantDraft>) -> TestDraft {
        TestDraft {
            name: "Hero Test".to_string(),
            page_slug: PageSlug::new("home"),
            variants,
            traffic_split: None,
        }
    }

    #[test]
    fn default_variant_ids_follow_position() {
        let variants =
            draft(vec![VariantDraft::new("A", 50), VariantDraft::new("B", 50)]).validate().unwrap();
        assert_eq!(variants[0].id.as_str(), "variant-1");
        assert_eq!(variants[1].id.as_str(), "variant-2");
    }

    #[test]
    fn percentages_can_come_from_traffic_split() {
        let mut request = draft(vec![
            VariantDraft {
                id: None,
                name: "A".to_string(),
                traffic_percentage: None,
            },
            VariantDraft::new("B", 30),
        ]);
        request.traffic_split = Some(BTreeMap::from([("A".to_string(), 70)]));
        let variants = request.validate().unwrap();
        assert_eq!(variants[0].traffic_percentage, 70);
        assert_eq!(variants[1].traffic_percentage, 30);
    }

    #[test]
    fn split_mismatch_is_rejected() {
        let mut request = draft(vec![VariantDraft::new("A", 50), VariantDraft::new("B", 50)]);
        request.traffic_split = Some(BTreeMap::from([("A".to_string(), 60)]));
        assert!(matches!(request.validate(), Err(DraftError::SplitMismatch { .. })));
    }

    #[test]
    fn unknown_split_entry_is_rejected() {
        let mut request = draft(vec![VariantDraft::new("A", 50), VariantDraft::new("B", 50)]);
        request.traffic_split = Some(BTreeMap::from([("C".to_string(), 0)]));
        assert_eq!(request.validate(), Err(DraftError::UnknownSplitEntry("C".to_string())));
    }

    #[test]
    fn negative_percentage_is_rejected() {
        let request = draft(vec![VariantDraft::new("A", -10), VariantDraft::new("B", 110)]);
        assert!(matches!(request.validate(), Err(DraftError::PercentageOutOfRange { .. })));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let request = draft(vec![VariantDraft::new("A", 50), VariantDraft::new(" A ", 50)]);
        assert_eq!(request.validate(), Err(DraftError::DuplicateVariantName("A".to_string())));
    }

    #[test]
    fn conversion_rate_is_zero_without_views() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(600, 60), 10.0);
        assert_eq!(conversion_rate(400, 20), 5.0);
    }

    #[test]
    fn variant_wire_form_includes_conversion_rate() {
        let variant = ExperimentVariant {
            id: VariantId::new("a"),
            name: "A".to_string(),
            traffic_percentage: 50,
            views: 10,
            conversions: 1,
            revenue_cents: None,
        };
        let value = serde_json::to_value(&variant).unwrap();
        assert_eq!(value["conversionRate"], serde_json::json!(10.0));
        assert_eq!(value["trafficPercentage"], serde_json::json!(50));
        assert!(value.get("revenueCents").is_none());
        let back: ExperimentVariant = serde_json::from_value(value).unwrap();
        assert_eq!(back, variant);
    }
}
