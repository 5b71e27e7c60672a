//! # Stage: Winner Selector
//!
//! ## Responsibility
//! Picks the best-performing arm of an experiment and decides scaling
//! eligibility. Works on immutable snapshots; pure and parallel-safe.
//!
//! ## Guarantees
//! - Sample-floor honest: with any arm below the configured conversion floor
//!   the verdict is `InsufficientData` — a low-sample variant is never
//!   declared a winner, even with positive lift
//! - Deterministic tie-break: equal lift to within rounding prefers the
//!   larger sample, then the earlier-created arm
//!
//! ## NOT Responsible For
//! - Computing the chi-square statistic (significance evaluator)
//! - Acting on the verdict (lifecycle manager / orchestrator)

use serde::{Deserialize, Serialize};

use crate::config::StrategyParams;
use crate::evaluate::significance::{self, SignificanceResult};
use crate::metrics::Arm;

/// Lifts within this margin (percentage points) count as a tie.
const LIFT_TIE_EPSILON: f64 = 0.05;

// ---------------------------------------------------------------------------
// Verdict types
// ---------------------------------------------------------------------------

/// Outcome of one winner-selection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    /// A best variant was identified (it may still not be ready to scale).
    Winner(WinnerVerdict),
    /// Some arm is below the sample floor, or there are no variants; no
    /// winner is declared.
    InsufficientData { reason: String },
}

impl Verdict {
    pub fn winner(&self) -> Option<&WinnerVerdict> {
        match self {
            Verdict::Winner(w) => Some(w),
            Verdict::InsufficientData { .. } => None,
        }
    }

    /// `true` only when a winner exists and cleared every scaling gate.
    pub fn ready_to_scale(&self) -> bool {
        self.winner().map(|w| w.ready_to_scale).unwrap_or(false)
    }
}

/// The selected winner and its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerVerdict {
    pub winner_id: String,
    /// Relative improvement over control, in percent.
    pub lift: f64,
    pub significance: SignificanceResult,
    /// significant && confidence >= threshold && lift >= min_improvement.
    pub ready_to_scale: bool,
}

// ---------------------------------------------------------------------------
// select_winner
// ---------------------------------------------------------------------------

/// Compare every variant against control and pick the best.
///
/// `lift = (variant.rate / control.rate − 1) × 100`. The winner is the
/// variant with the highest lift; ties within [`LIFT_TIE_EPSILON`] go to the
/// larger sample, then to the earlier arm in `variants`.
pub fn select_winner(control: &Arm, variants: &[&Arm], params: &StrategyParams) -> Verdict {
    if variants.is_empty() {
        return Verdict::InsufficientData {
            reason: "experiment has no variants".into(),
        };
    }
    if let Some(thin) = std::iter::once(control)
        .chain(variants.iter().copied())
        .find(|a| a.conversions < params.min_sample_conversions)
    {
        return Verdict::InsufficientData {
            reason: format!(
                "arm '{}' has {} conversions, below the floor of {}",
                thin.id, thin.conversions, params.min_sample_conversions
            ),
        };
    }
    if control.rate() == 0.0 {
        return Verdict::InsufficientData {
            reason: format!("control arm '{}' has a zero conversion rate", control.id),
        };
    }

    let mut best: Option<(&Arm, f64)> = None;
    for variant in variants {
        let lift = (variant.rate() / control.rate() - 1.0) * 100.0;
        best = match best {
            None => Some((variant, lift)),
            Some((current, current_lift)) => {
                if lift > current_lift + LIFT_TIE_EPSILON {
                    Some((variant, lift))
                } else if (lift - current_lift).abs() <= LIFT_TIE_EPSILON
                    && variant.views > current.views
                {
                    // Tie: prefer the larger sample. Earlier arms win the
                    // remaining ties because iteration preserves order.
                    Some((variant, lift))
                } else {
                    Some((current, current_lift))
                }
            }
        };
    }

    // Unwrap is safe: variants is non-empty.
    let (winner, lift) = best.expect("non-empty variants");
    let significance = significance::evaluate(control, winner);
    let ready_to_scale = significance.significant
        && significance.confidence_percent >= params.scale_confidence_threshold
        && lift >= params.min_improvement;

    Verdict::Winner(WinnerVerdict {
        winner_id: winner.id.clone(),
        lift,
        significance,
        ready_to_scale,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn arm(id: &str, views: u64, conversions: u64) -> Arm {
        Arm {
            id: id.into(),
            label: id.into(),
            views,
            conversions,
        }
    }

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    #[test]
    fn test_scenario_a_ready_to_scale() {
        // 5.5% control vs 9.2% variant on 1000 views each.
        let control = arm("control", 1000, 55);
        let variant = arm("hero", 1000, 92);
        let verdict = select_winner(&control, &[&variant], &params());
        let w = verdict.winner().expect("winner expected");
        assert_eq!(w.winner_id, "hero");
        assert!((w.lift - 67.27).abs() < 0.1, "lift={}", w.lift);
        assert!(w.significance.significant);
        assert!(w.significance.confidence_percent >= 95.0);
        assert!(w.ready_to_scale);
    }

    #[test]
    fn test_scenario_b_small_sample_no_winner() {
        // 120 views / 7 conversions is under the 30-conversion floor.
        let control = arm("control", 900, 50);
        let variant = arm("thin", 120, 7);
        let verdict = select_winner(&control, &[&variant], &params());
        assert!(verdict.winner().is_none());
        assert!(!verdict.ready_to_scale());
    }

    #[test]
    fn test_positive_lift_below_floor_not_scaled() {
        // Both arms clear the sample floor, but lift < min_improvement.
        let control = arm("control", 10_000, 500);
        let variant = arm("tweak", 10_000, 510); // +2% lift
        let p = StrategyParams {
            min_improvement: 5.0,
            ..params()
        };
        let verdict = select_winner(&control, &[&variant], &p);
        if let Some(w) = verdict.winner() {
            assert!(!w.ready_to_scale);
        }
    }

    #[test]
    fn test_not_significant_not_scaled() {
        let control = arm("control", 1000, 50);
        let variant = arm("noise", 1000, 53);
        let verdict = select_winner(&control, &[&variant], &params());
        let w = verdict.winner().unwrap();
        assert!(!w.significance.significant);
        assert!(!w.ready_to_scale);
    }

    #[test]
    fn test_highest_lift_wins() {
        let control = arm("control", 1000, 50);
        let mid = arm("mid", 1000, 70);
        let high = arm("high", 1000, 95);
        let verdict = select_winner(&control, &[&mid, &high], &params());
        assert_eq!(verdict.winner().unwrap().winner_id, "high");
    }

    #[test]
    fn test_tie_prefers_larger_sample() {
        let control = arm("control", 1000, 50);
        let small = arm("small", 1000, 80); // 8.0%
        let large = arm("large", 10_000, 800); // 8.0%
        let verdict = select_winner(&control, &[&small, &large], &params());
        assert_eq!(verdict.winner().unwrap().winner_id, "large");
    }

    #[test]
    fn test_tie_equal_samples_prefers_earlier_arm() {
        let control = arm("control", 1000, 50);
        let first = arm("first", 1000, 80);
        let second = arm("second", 1000, 80);
        let verdict = select_winner(&control, &[&first, &second], &params());
        assert_eq!(verdict.winner().unwrap().winner_id, "first");
    }

    #[test]
    fn test_no_variants_insufficient() {
        let control = arm("control", 1000, 50);
        let verdict = select_winner(&control, &[], &params());
        assert!(verdict.winner().is_none());
    }

    #[test]
    fn test_zero_rate_control_insufficient() {
        // Bypass the floor check so the zero-rate guard is what fires.
        let p = StrategyParams {
            min_sample_conversions: 0,
            ..params()
        };
        let control = arm("control", 1000, 0);
        let variant = arm("v", 1000, 80);
        let verdict = select_winner(&control, &[&variant], &p);
        assert!(verdict.winner().is_none());
    }

    #[test]
    fn test_negative_lift_reported() {
        let control = arm("control", 1000, 90);
        let worse = arm("worse", 1000, 45);
        let verdict = select_winner(&control, &[&worse], &params());
        let w = verdict.winner().unwrap();
        assert!(w.lift < 0.0);
        assert!(!w.ready_to_scale);
    }

    #[test]
    fn test_control_below_floor_insufficient() {
        let control = arm("control", 100, 5);
        let variant = arm("v", 1000, 92);
        let verdict = select_winner(&control, &[&variant], &params());
        assert!(verdict.winner().is_none());
    }
}
