// crates/split-test-core/src/runtime/dashboard.rs
// ============================================================================
// Module: Split Test Dashboard
// Description: Read-only derived indicators for experiment tests.
// Purpose: Compute leaders, significance guidance, and dashboard summaries.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Everything here is derived from a loaded [`ExperimentTest`] and never
//! written back. The default significance indicator is a view-count
//! heuristic and is always labelled as directional guidance. The optional
//! two-proportion z-test compares the control against the strongest
//! challenger; it is still an approximation and carries the same label.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::f64::consts::SQRT_2;

use serde::Deserialize;
use serde::Serialize;

use crate::core::ExperimentTest;
use crate::core::ExperimentVariant;
use crate::core::PageSlug;
use crate::core::TestId;
use crate::core::TestStatus;
use crate::core::VariantId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default combined view count at which the heuristic reports 100%.
pub const DEFAULT_SIGNIFICANCE_VIEW_THRESHOLD: u64 = 1000;

/// Label attached to every significance estimate.
pub const SIGNIFICANCE_LABEL: &str = "directional";

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Significance estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceMethod {
    /// Share of a fixed combined view threshold reached, capped at 100.
    #[default]
    ViewThreshold,
    /// Approximate pooled two-proportion z-test, control vs best challenger.
    TwoProportionZ,
}

/// Significance configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignificancePolicy {
    /// Estimation method.
    pub method: SignificanceMethod,
    /// View threshold for [`SignificanceMethod::ViewThreshold`].
    pub view_threshold: u64,
}

impl Default for SignificancePolicy {
    fn default() -> Self {
        Self {
            method: SignificanceMethod::ViewThreshold,
            view_threshold: DEFAULT_SIGNIFICANCE_VIEW_THRESHOLD,
        }
    }
}

/// Opt-in rule for declaring a winner without an admin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoWinnerRule {
    /// Minimum views every variant must have.
    pub min_views_per_variant: u64,
    /// Minimum z-test confidence percentage.
    pub min_confidence_percent: f64,
}

impl AutoWinnerRule {
    /// Returns the variant the rule would declare, if any.
    ///
    /// Requires a running test, enough views on every variant, a strict
    /// leader, and sufficient confidence between control and best challenger.
    #[must_use]
    pub fn winner_candidate(&self, test: &ExperimentTest) -> Option<VariantId> {
        if test.status != TestStatus::Running {
            return None;
        }
        if test.variants.iter().any(|variant| variant.views < self.min_views_per_variant) {
            return None;
        }
        let leader = leading_variant(test)?;
        let (control, challenger) = head_to_head(test)?;
        let z = two_proportion_z(
            control.views,
            control.conversions,
            challenger.views,
            challenger.conversions,
        )?;
        (confidence_percent(z) >= self.min_confidence_percent).then(|| leader.id.clone())
    }
}

// ============================================================================
// SECTION: Estimates
// ============================================================================

/// Significance guidance shown next to a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificanceEstimate {
    /// Method that produced the estimate.
    pub method: SignificanceMethod,
    /// Always [`SIGNIFICANCE_LABEL`].
    pub label: String,
    /// Capped percentage in `[0, 100]`.
    pub percent: f64,
    /// z-score of the best challenger vs control, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    /// Human explanation of what the number means.
    pub note: String,
}

/// Per-variant dashboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    /// Variant identifier.
    pub variant_id: VariantId,
    /// Variant label.
    pub name: String,
    /// Configured traffic share.
    pub traffic_percentage: u8,
    /// Views.
    pub views: u64,
    /// Conversions.
    pub conversions: u64,
    /// Derived conversion rate percentage.
    pub conversion_rate: f64,
    /// Accumulated revenue in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue_cents: Option<u64>,
    /// True for the first variant.
    pub is_control: bool,
    /// True for the strict leader.
    pub is_leader: bool,
}

/// Dashboard view of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    /// Test identifier.
    pub test_id: TestId,
    /// Test label.
    pub name: String,
    /// Target page.
    pub page_slug: PageSlug,
    /// Lifecycle status.
    pub status: TestStatus,
    /// Views across variants.
    pub total_views: u64,
    /// Conversions across variants.
    pub total_conversions: u64,
    /// Strict leader by conversion rate; absent on ties.
    #[serde(default)]
    pub leading_variant_id: Option<VariantId>,
    /// Declared winner.
    #[serde(default)]
    pub winner_id: Option<VariantId>,
    /// Significance guidance.
    pub significance: SignificanceEstimate,
    /// RFC 3339 start date.
    #[serde(default)]
    pub start_date: Option<String>,
    /// RFC 3339 end date.
    #[serde(default)]
    pub end_date: Option<String>,
    /// Per-variant rows in declaration order.
    pub variants: Vec<VariantSummary>,
}

// ============================================================================
// SECTION: Derivations
// ============================================================================

/// Compares conversion rates exactly by cross-multiplying counts.
fn compare_rates(left: &ExperimentVariant, right: &ExperimentVariant) -> Ordering {
    let fraction = |variant: &ExperimentVariant| {
        if variant.views == 0 {
            (0_u128, 1_u128)
        } else {
            (u128::from(variant.conversions), u128::from(variant.views))
        }
    };
    let (left_num, left_den) = fraction(left);
    let (right_num, right_den) = fraction(right);
    (left_num * right_den).cmp(&(right_num * left_den))
}

/// Returns the variant with the strictly highest conversion rate.
///
/// Ties for the top rate, including all-zero tests, yield `None`.
#[must_use]
pub fn leading_variant(test: &ExperimentTest) -> Option<&ExperimentVariant> {
    let mut leader: Option<&ExperimentVariant> = None;
    let mut tied = false;
    for variant in &test.variants {
        match leader {
            None => leader = Some(variant),
            Some(current) => match compare_rates(variant, current) {
                Ordering::Greater => {
                    leader = Some(variant);
                    tied = false;
                }
                Ordering::Equal => tied = true,
                Ordering::Less => {}
            },
        }
    }
    if tied { None } else { leader }
}

/// Returns the control and the best non-control variant (first on ties).
fn head_to_head(test: &ExperimentTest) -> Option<(&ExperimentVariant, &ExperimentVariant)> {
    let (control, rest) = test.variants.split_first()?;
    let mut best: Option<&ExperimentVariant> = None;
    for variant in rest {
        best = match best {
            Some(current) if compare_rates(variant, current) != Ordering::Greater => Some(current),
            _ => Some(variant),
        };
    }
    best.map(|challenger| (control, challenger))
}

/// Pooled two-proportion z-score of the challenger against the control.
///
/// Returns `None` when either side has no views or the pooled variance is zero.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Counters far below 2^52 in practice.")]
pub fn two_proportion_z(
    control_views: u64,
    control_conversions: u64,
    challenger_views: u64,
    challenger_conversions: u64,
) -> Option<f64> {
    if control_views == 0 || challenger_views == 0 {
        return None;
    }
    let n1 = control_views as f64;
    let n2 = challenger_views as f64;
    let c1 = control_conversions as f64;
    let c2 = challenger_conversions as f64;
    let pooled = (c1 + c2) / (n1 + n2);
    let variance = pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2);
    if variance <= 0.0 || !variance.is_finite() {
        return None;
    }
    Some((c2 / n2 - c1 / n1) / variance.sqrt())
}

/// Error function, Abramowitz and Stegun 7.1.26 (max error 1.5e-7).
fn erf(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / P.mul_add(x, 1.0);
    let poly = t * A5.mul_add(t, A4).mul_add(t, A3).mul_add(t, A2).mul_add(t, A1);
    sign * poly.mul_add(-(-x * x).exp(), 1.0)
}

/// Two-sided confidence percentage for a z-score: `(2Φ(|z|) - 1) * 100`.
#[must_use]
pub fn confidence_percent(z: f64) -> f64 {
    (erf(z.abs() / SQRT_2) * 100.0).clamp(0.0, 100.0)
}

/// Computes significance guidance under the given policy.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Counters far below 2^52 in practice.")]
pub fn significance(test: &ExperimentTest, policy: &SignificancePolicy) -> SignificanceEstimate {
    match policy.method {
        SignificanceMethod::ViewThreshold => {
            let total = test.total_views();
            let percent = if policy.view_threshold == 0 {
                100.0
            } else {
                (total as f64 / policy.view_threshold as f64 * 100.0).min(100.0)
            };
            SignificanceEstimate {
                method: SignificanceMethod::ViewThreshold,
                label: SIGNIFICANCE_LABEL.to_string(),
                percent,
                z_score: None,
                note: format!(
                    "{total} of {} combined views collected; directional guidance only, not a \
                     statistical test",
                    policy.view_threshold
                ),
            }
        }
        SignificanceMethod::TwoProportionZ => {
            let pair = head_to_head(test);
            let z_score = pair.and_then(|(control, challenger)| {
                two_proportion_z(
                    control.views,
                    control.conversions,
                    challenger.views,
                    challenger.conversions,
                )
            });
            let note = match (pair, z_score) {
                (Some((_, challenger)), Some(_)) => format!(
                    "approximate two-proportion z-test of {} against control; guidance only",
                    challenger.name
                ),
                _ => "not enough data for a z-test; guidance only".to_string(),
            };
            SignificanceEstimate {
                method: SignificanceMethod::TwoProportionZ,
                label: SIGNIFICANCE_LABEL.to_string(),
                percent: z_score.map_or(0.0, confidence_percent),
                z_score,
                note,
            }
        }
    }
}

/// Builds the dashboard summary for a test.
#[must_use]
pub fn summarize(test: &ExperimentTest, policy: &SignificancePolicy) -> TestSummary {
    let leader = leading_variant(test).map(|variant| variant.id.clone());
    let variants = test
        .variants
        .iter()
        .enumerate()
        .map(|(index, variant)| VariantSummary {
            variant_id: variant.id.clone(),
            name: variant.name.clone(),
            traffic_percentage: variant.traffic_percentage,
            views: variant.views,
            conversions: variant.conversions,
            conversion_rate: variant.conversion_rate(),
            revenue_cents: variant.revenue_cents,
            is_control: index == 0,
            is_leader: leader.as_ref() == Some(&variant.id),
        })
        .collect();
    TestSummary {
        test_id: test.id.clone(),
        name: test.name.clone(),
        page_slug: test.page_slug.clone(),
        status: test.status,
        total_views: test.total_views(),
        total_conversions: test.total_conversions(),
        leading_variant_id: leader,
        winner_id: test.winner_id.clone(),
        significance: significance(test, policy),
        start_date: test.start_date.as_ref().and_then(|date| date.to_rfc3339()),
        end_date: test.end_date.as_ref().and_then(|date| date.to_rfc3339()),
        variants,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
