//! # Stage: Significance Evaluator
//!
//! ## Responsibility
//! Pure statistical comparison of two arms. Builds a 2×2 contingency table
//! (arm × {converted, not-converted}), computes expected counts under the
//! pooled-rate null hypothesis, and sums (observed − expected)²/expected over
//! the four cells. The statistic maps to a *coarse* confidence bucket using
//! fixed critical values for 1 degree of freedom — a deliberate
//! simplification that trades continuous p-values for the four discrete
//! levels the threshold-gated decision system actually consumes:
//!
//! | χ²        | confidence |
//! |-----------|------------|
//! | > 10.828  | 99.9%      |
//! | > 6.635   | 99%        |
//! | > 3.841   | 95%        |
//! | otherwise | not significant |
//!
//! ## Guarantees
//! - Pure: no side effects, safe to run in parallel across experiments
//! - Non-panicking: degenerate input (an arm with zero views, zero
//!   conversions, or all conversions) yields an insufficient-data result,
//!   never a division by zero and never `significant = true`
//!
//! ## NOT Responsible For
//! - Choosing a winner or deciding scale eligibility (winner selector)
//! - Accumulating counts (metrics aggregator)

use serde::{Deserialize, Serialize};

use crate::metrics::Arm;

// ---------------------------------------------------------------------------
// Critical values — chi-square, 1 degree of freedom
// ---------------------------------------------------------------------------

const CHI2_999: f64 = 10.828;
const CHI2_99: f64 = 6.635;
const CHI2_95: f64 = 3.841;

/// z-scores for the normal-approximation confidence interval.
const Z_95: f64 = 1.96;
const Z_99: f64 = 2.576;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Outcome of one two-arm comparison. Recomputed from current arm state each
/// cycle, never persisted independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    pub chi_square: f64,
    /// 95.0 / 99.0 / 99.9, or 0.0 when not significant.
    pub confidence_percent: f64,
    pub significant: bool,
    /// Interval for the variant's rate, when computable.
    pub interval: Option<ConfidenceInterval>,
}

impl SignificanceResult {
    fn insufficient() -> Self {
        Self {
            chi_square: 0.0,
            confidence_percent: 0.0,
            significant: false,
            interval: None,
        }
    }
}

/// Normal-approximation interval around an observed conversion rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub rate: f64,
}

/// Supported interval confidence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalLevel {
    P95,
    P99,
}

impl IntervalLevel {
    fn z(self) -> f64 {
        match self {
            IntervalLevel::P95 => Z_95,
            IntervalLevel::P99 => Z_99,
        }
    }
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

/// Compare control against one variant.
///
/// Returns an insufficient-data result (not significant, χ² = 0) when either
/// arm has zero views, zero conversions, or all conversions — a degenerate
/// arm carries no rate evidence, so a comparison against it must never come
/// back significant.
pub fn evaluate(control: &Arm, variant: &Arm) -> SignificanceResult {
    if [control, variant]
        .iter()
        .any(|arm| arm.views == 0 || arm.conversions == 0 || arm.conversions == arm.views)
    {
        return SignificanceResult::insufficient();
    }
    let total_views = (control.views + variant.views) as f64;
    let total_conversions = (control.conversions + variant.conversions) as f64;

    let pooled = total_conversions / total_views;
    let chi_square = [control, variant]
        .iter()
        .map(|arm| {
            let n = arm.views as f64;
            let observed_conv = arm.conversions as f64;
            let expected_conv = n * pooled;
            let observed_non = n - observed_conv;
            let expected_non = n * (1.0 - pooled);
            (observed_conv - expected_conv).powi(2) / expected_conv
                + (observed_non - expected_non).powi(2) / expected_non
        })
        .sum::<f64>();

    let confidence_percent = confidence_bucket(chi_square);
    let significant = confidence_percent > 0.0;
    let interval = confidence_interval(variant.conversions, variant.views, IntervalLevel::P95);

    SignificanceResult {
        chi_square,
        confidence_percent,
        significant,
        interval,
    }
}

/// Map a chi-square statistic (1 df) to its coarse confidence bucket.
pub fn confidence_bucket(chi_square: f64) -> f64 {
    if chi_square > CHI2_999 {
        99.9
    } else if chi_square > CHI2_99 {
        99.0
    } else if chi_square > CHI2_95 {
        95.0
    } else {
        0.0
    }
}

/// Normal-approximation confidence interval: `rate ± z·sqrt(rate(1−rate)/n)`.
///
/// Returns `None` when `views == 0` — insufficient data, never a division by
/// zero. Bounds are clamped to [0, 1], so `lower <= rate <= upper` always
/// holds.
pub fn confidence_interval(
    conversions: u64,
    views: u64,
    level: IntervalLevel,
) -> Option<ConfidenceInterval> {
    if views == 0 {
        return None;
    }
    let rate = conversions as f64 / views as f64;
    let half_width = level.z() * (rate * (1.0 - rate) / views as f64).sqrt();
    Some(ConfidenceInterval {
        lower: (rate - half_width).max(0.0),
        upper: (rate + half_width).min(1.0),
        rate,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
