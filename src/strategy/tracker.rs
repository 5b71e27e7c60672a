//! # Stage: Effectiveness Tracker
//!
//! ## Responsibility
//! Records the outcome of each completed cycle into an append-only history.
//! One [`IterationRecord`] per cycle; `quality_delta` is the sum of
//! per-target improvement deltas observed since the prior record.
//!
//! ## Guarantees
//! - Append-only: past records are never mutated or removed; the history
//!   accessor hands out clones, not mutable references
//! - Numbered: iteration numbers are assigned on append, strictly increasing
//!
//! ## NOT Responsible For
//! - Trend analysis over the history (strategy optimizer)
//! - Computing the per-target deltas themselves (caller supplies them)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::lifecycle::pattern::TargetId;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Improvement observed on one target during the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetImprovement {
    pub target: TargetId,
    /// Improvement delta for this target (conversion-rate points, positive =
    /// better).
    pub delta: f64,
}

/// Outcome of one pattern's pilot evaluation in this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotResult {
    pub pattern_id: String,
    pub lift: f64,
    pub improvements: Vec<TargetImprovement>,
}

/// Outcome of one pattern's scale-out in this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingResult {
    pub pattern_id: String,
    pub lift: f64,
    pub improvements: Vec<TargetImprovement>,
    /// Mutation calls issued during the scale-out (for ROI accounting).
    pub mutations_issued: u64,
    pub reached_production: bool,
}

// ---------------------------------------------------------------------------
// IterationRecord
// ---------------------------------------------------------------------------

/// One completed cycle of pilot evaluation + scaling decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_number: u64,
    pub date: NaiveDate,
    /// Number of targets in pilot during this iteration.
    pub pilot_targets: usize,
    /// Number of targets newly scaled during this iteration.
    pub scaled_targets: usize,
    /// Sum of per-target improvement deltas since the prior record.
    pub quality_delta: f64,
    pub patterns_involved: Vec<String>,
    /// Lift of each pattern that reached production this iteration.
    pub production_lifts: Vec<f64>,
    /// Total mutation calls issued this iteration.
    pub mutations_issued: u64,
}

// ---------------------------------------------------------------------------
// EffectivenessTracker
// ---------------------------------------------------------------------------

/// Append-only iteration history.
#[derive(Debug, Default)]
pub struct EffectivenessTracker {
    records: Vec<IterationRecord>,
}

impl EffectivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tracker from persisted history (state store load path).
    pub fn from_history(records: Vec<IterationRecord>) -> Self {
        Self { records }
    }

    /// Fold this cycle's pilot and scaling outcomes into one record and
    /// append it.
    pub fn record_iteration(
        &mut self,
        date: NaiveDate,
        pilot_results: &[PilotResult],
        scaling_results: &[ScalingResult],
    ) -> IterationRecord {
        let quality_delta: f64 = pilot_results
            .iter()
            .flat_map(|p| p.improvements.iter())
            .chain(scaling_results.iter().flat_map(|s| s.improvements.iter()))
            .map(|i| i.delta)
            .sum();

        let mut patterns_involved: Vec<String> = pilot_results
            .iter()
            .map(|p| p.pattern_id.clone())
            .chain(scaling_results.iter().map(|s| s.pattern_id.clone()))
            .collect();
        patterns_involved.sort();
        patterns_involved.dedup();

        let record = IterationRecord {
            iteration_number: self.records.len() as u64 + 1,
            date,
            pilot_targets: pilot_results.iter().map(|p| p.improvements.len()).sum(),
            scaled_targets: scaling_results.iter().map(|s| s.improvements.len()).sum(),
            quality_delta,
            patterns_involved,
            production_lifts: scaling_results
                .iter()
                .filter(|s| s.reached_production)
                .map(|s| s.lift)
                .collect(),
            mutations_issued: scaling_results.iter().map(|s| s.mutations_issued).sum(),
        };
        self.records.push(record.clone());
        record
    }

    /// The full history, oldest first. Clones — the internal records cannot
    /// be mutated through this.
    pub fn history(&self) -> Vec<IterationRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn improvement(target: &str, delta: f64) -> TargetImprovement {
        TargetImprovement {
            target: target.into(),
            delta,
        }
    }

    fn pilot(pattern: &str, lift: f64, deltas: &[(&str, f64)]) -> PilotResult {
        PilotResult {
            pattern_id: pattern.into(),
            lift,
            improvements: deltas.iter().map(|(t, d)| improvement(t, *d)).collect(),
        }
    }

    fn scaling(pattern: &str, lift: f64, deltas: &[(&str, f64)], production: bool) -> ScalingResult {
        ScalingResult {
            pattern_id: pattern.into(),
            lift,
            improvements: deltas.iter().map(|(t, d)| improvement(t, *d)).collect(),
            mutations_issued: deltas.len() as u64,
            reached_production: production,
        }
    }

    #[test]
    fn test_quality_delta_sums_all_improvements() {
        let mut tracker = EffectivenessTracker::new();
        let record = tracker.record_iteration(
            date(1),
            &[pilot("p1", 20.0, &[("t1", 0.5), ("t2", 0.3)])],
            &[scaling("p2", 15.0, &[("t3", 0.2)], true)],
        );
        assert!((record.quality_delta - 1.0).abs() < 1e-9);
        assert_eq!(record.pilot_targets, 2);
        assert_eq!(record.scaled_targets, 1);
    }

    #[test]
    fn test_iteration_numbers_increase() {
        let mut tracker = EffectivenessTracker::new();
        let a = tracker.record_iteration(date(1), &[], &[]);
        let b = tracker.record_iteration(date(8), &[], &[]);
        assert_eq!(a.iteration_number, 1);
        assert_eq!(b.iteration_number, 2);
    }

    #[test]
    fn test_patterns_involved_deduped_and_sorted() {
        let mut tracker = EffectivenessTracker::new();
        let record = tracker.record_iteration(
            date(1),
            &[pilot("p2", 10.0, &[]), pilot("p1", 5.0, &[])],
            &[scaling("p2", 10.0, &[], false)],
        );
        assert_eq!(record.patterns_involved, vec!["p1", "p2"]);
    }

    #[test]
    fn test_production_lifts_only_from_production_patterns() {
        let mut tracker = EffectivenessTracker::new();
        let record = tracker.record_iteration(
            date(1),
            &[],
            &[
                scaling("p1", 30.0, &[("t1", 0.1)], true),
                scaling("p2", 8.0, &[("t2", 0.1)], false),
            ],
        );
        assert_eq!(record.production_lifts, vec![30.0]);
    }

    #[test]
    fn test_history_is_append_only_clone() {
        let mut tracker = EffectivenessTracker::new();
        tracker.record_iteration(date(1), &[], &[]);
        let mut history = tracker.history();
        history[0].quality_delta = 999.0;
        // Mutating the clone does not touch the tracker.
        assert_eq!(tracker.history()[0].quality_delta, 0.0);
    }

    #[test]
    fn test_from_history_continues_numbering() {
        let mut tracker = EffectivenessTracker::new();
        tracker.record_iteration(date(1), &[], &[]);
        tracker.record_iteration(date(8), &[], &[]);
        let mut restored = EffectivenessTracker::from_history(tracker.history());
        let next = restored.record_iteration(date(15), &[], &[]);
        assert_eq!(next.iteration_number, 3);
    }

    #[test]
    fn test_mutations_summed() {
        let mut tracker = EffectivenessTracker::new();
        let record = tracker.record_iteration(
            date(1),
            &[],
            &[
                scaling("p1", 10.0, &[("t1", 0.1), ("t2", 0.1)], true),
                scaling("p2", 5.0, &[("t3", 0.1)], false),
            ],
        );
        assert_eq!(record.mutations_issued, 3);
    }
}
