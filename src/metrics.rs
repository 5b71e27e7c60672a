//! # Stage: Metrics Aggregator
//!
//! ## Responsibility
//! Accumulates per-arm view/conversion counts over time. Feeds immutable
//! [`Experiment`] snapshots to the significance evaluator each cycle.
//! Maintains a per-arm daily series; gaps in the series are zero-filled on
//! read — missing data is never estimated.
//!
//! ## Guarantees
//! - Atomic per arm: each arm's counters sit behind their own lock, so
//!   concurrent ingestion for the same arm serializes while distinct arms
//!   proceed in parallel
//! - Invariant-preserving: a delta that would leave an arm with
//!   `conversions > views` is rejected, never clamped
//! - Additive and commutative: ingestion order does not affect totals
//!
//! ## NOT Responsible For
//! - Deduplicating double-counted upstream events (the metrics source's job)
//! - Statistical comparison (significance evaluator)
//! - Persistence (state store)

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// Arm / Experiment — the core data model
// ---------------------------------------------------------------------------

/// One variant (including control) within an experiment, tracked by
/// cumulative views and conversions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub id: String,
    pub label: String,
    pub views: u64,
    pub conversions: u64,
}

impl Arm {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            views: 0,
            conversions: 0,
        }
    }

    /// Conversion rate, or 0.0 for an arm with no views.
    pub fn rate(&self) -> f64 {
        if self.views == 0 {
            0.0
        } else {
            self.conversions as f64 / self.views as f64
        }
    }
}

/// A registered experiment: a set of arms, one distinguished as control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub arms: Vec<Arm>,
    pub control_arm_id: String,
    pub started_at: NaiveDate,
    pub min_duration_days: u32,
}

impl Experiment {
    /// The control arm, if present.
    pub fn control(&self) -> Option<&Arm> {
        self.arms.iter().find(|a| a.id == self.control_arm_id)
    }

    /// All non-control arms, in registration order.
    pub fn variants(&self) -> Vec<&Arm> {
        self.arms
            .iter()
            .filter(|a| a.id != self.control_arm_id)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MetricsSource — pluggable upstream
// ---------------------------------------------------------------------------

/// One record delivered by the upstream metrics source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub arm_id: String,
    pub date: NaiveDate,
    pub views: u64,
    pub conversions: u64,
}

/// Something that can deliver a batch of metrics records.
///
/// Upstream deduplication of double-counted events is the source's
/// responsibility; the aggregator applies whatever it is handed.
pub trait MetricsSource: Send + Sync {
    /// Fetch the next batch of records.
    ///
    /// # Errors
    /// Returns `EngineError::MetricsSource` when the upstream is unreachable.
    fn fetch(&self) -> Result<Vec<MetricsRecord>>;
}

/// A rand-backed source that fabricates plausible traffic for the registered
/// arms. Used by tests and the demo binary; production wires a real source.
pub struct SimulatedMetricsSource {
    arm_ids: Vec<String>,
    date: NaiveDate,
    /// Base conversion rate; each arm after the first gets a small bump so
    /// simulated experiments actually produce winners.
    base_rate: f64,
    daily_views: u64,
}

impl SimulatedMetricsSource {
    pub fn new(arm_ids: Vec<String>, date: NaiveDate) -> Self {
        Self {
            arm_ids,
            date,
            base_rate: 0.05,
            daily_views: 1_000,
        }
    }
}

impl MetricsSource for SimulatedMetricsSource {
    fn fetch(&self) -> Result<Vec<MetricsRecord>> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let records = self
            .arm_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let rate = self.base_rate * (1.0 + 0.4 * i as f64);
                let views = self.daily_views + rng.gen_range(0..200);
                let conversions = (0..views).filter(|_| rng.gen_bool(rate.min(1.0))).count() as u64;
                MetricsRecord {
                    arm_id: id.clone(),
                    date: self.date,
                    views,
                    conversions,
                }
            })
            .collect();
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Per-arm accumulator
// ---------------------------------------------------------------------------

/// Mutable counters for one arm. Guarded by the per-arm mutex in the
/// aggregator, never accessed directly.
#[derive(Debug, Default)]
struct ArmCounters {
    label: String,
    views: u64,
    conversions: u64,
    /// Daily deltas, keyed by date. Sparse; read-side zero-fills gaps.
    daily: BTreeMap<NaiveDate, (u64, u64)>,
}

/// Cumulative totals plus a zero-filled daily series for one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub arm_id: String,
    /// One entry per calendar day from the first to the last observed date,
    /// gaps filled with zeros.
    pub days: Vec<MetricsRecord>,
}

// ---------------------------------------------------------------------------
// MetricsAggregator
// ---------------------------------------------------------------------------

/// Accumulates per-arm counters and serves experiment snapshots.
pub struct MetricsAggregator {
    arms: RwLock<HashMap<String, Mutex<ArmCounters>>>,
    experiments: RwLock<HashMap<String, ExperimentMeta>>,
}

#[derive(Debug, Clone)]
struct ExperimentMeta {
    arm_ids: Vec<String>,
    control_arm_id: String,
    started_at: NaiveDate,
    min_duration_days: u32,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            arms: RwLock::new(HashMap::new()),
            experiments: RwLock::new(HashMap::new()),
        }
    }

    /// Register an experiment and create counters for its arms.
    pub fn register_experiment(
        &self,
        experiment_id: impl Into<String>,
        arms: &[(String, String)],
        control_arm_id: impl Into<String>,
        started_at: NaiveDate,
        min_duration_days: u32,
    ) {
        let experiment_id = experiment_id.into();
        let mut arm_map = self.arms.write().unwrap_or_else(|e| e.into_inner());
        for (id, label) in arms {
            arm_map.entry(id.clone()).or_insert_with(|| {
                Mutex::new(ArmCounters {
                    label: label.clone(),
                    ..ArmCounters::default()
                })
            });
        }
        drop(arm_map);

        let meta = ExperimentMeta {
            arm_ids: arms.iter().map(|(id, _)| id.clone()).collect(),
            control_arm_id: control_arm_id.into(),
            started_at,
            min_duration_days,
        };
        self.experiments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(experiment_id, meta);
    }

    /// Additively update one arm's cumulative counters.
    ///
    /// # Errors
    /// - `UnknownArm` when the arm was never registered.
    /// - `InvalidDelta` when the update would leave the arm with more
    ///   conversions than views; the counters are left untouched.
    pub fn ingest(
        &self,
        arm_id: &str,
        views_delta: u64,
        conversions_delta: u64,
        date: NaiveDate,
    ) -> Result<()> {
        let arms = self.arms.read().unwrap_or_else(|e| e.into_inner());
        let cell = arms
            .get(arm_id)
            .ok_or_else(|| EngineError::UnknownArm(arm_id.to_string()))?;

        let mut counters = cell.lock().unwrap_or_else(|e| e.into_inner());
        let new_views = counters.views.saturating_add(views_delta);
        let new_conversions = counters.conversions.saturating_add(conversions_delta);
        if new_conversions > new_views {
            return Err(EngineError::InvalidDelta {
                arm: arm_id.to_string(),
                views: new_views,
                conversions: new_conversions,
            });
        }
        counters.views = new_views;
        counters.conversions = new_conversions;
        let day = counters.daily.entry(date).or_insert((0, 0));
        day.0 = day.0.saturating_add(views_delta);
        day.1 = day.1.saturating_add(conversions_delta);
        debug!(arm = arm_id, views = new_views, conversions = new_conversions, "ingested delta");
        Ok(())
    }

    /// Ingest a whole batch from a metrics source, one record at a time.
    /// An invalid record is skipped (and surfaced in the returned count) so
    /// one bad row does not poison the batch.
    pub fn ingest_batch(&self, records: &[MetricsRecord]) -> usize {
        let mut rejected = 0;
        for r in records {
            if let Err(err) = self.ingest(&r.arm_id, r.views, r.conversions, r.date) {
                tracing::warn!(%err, arm = %r.arm_id, "rejected metrics record");
                rejected += 1;
            }
        }
        rejected
    }

    /// Current cumulative state of one experiment's arms.
    pub fn snapshot(&self, experiment_id: &str) -> Result<Experiment> {
        let experiments = self.experiments.read().unwrap_or_else(|e| e.into_inner());
        let meta = experiments
            .get(experiment_id)
            .ok_or_else(|| EngineError::UnknownExperiment(experiment_id.to_string()))?
            .clone();
        drop(experiments);

        let arms_map = self.arms.read().unwrap_or_else(|e| e.into_inner());
        let mut arms = Vec::with_capacity(meta.arm_ids.len());
        for id in &meta.arm_ids {
            let cell = arms_map
                .get(id)
                .ok_or_else(|| EngineError::UnknownArm(id.clone()))?;
            let counters = cell.lock().unwrap_or_else(|e| e.into_inner());
            arms.push(Arm {
                id: id.clone(),
                label: counters.label.clone(),
                views: counters.views,
                conversions: counters.conversions,
            });
        }
        Ok(Experiment {
            id: experiment_id.to_string(),
            arms,
            control_arm_id: meta.control_arm_id,
            started_at: meta.started_at,
            min_duration_days: meta.min_duration_days,
        })
    }

    /// Zero-filled daily series for one arm, from its first to its last
    /// observed date. An arm with no observations yields an empty series.
    pub fn daily_series(&self, arm_id: &str) -> Result<DailySeries> {
        let arms = self.arms.read().unwrap_or_else(|e| e.into_inner());
        let cell = arms
            .get(arm_id)
            .ok_or_else(|| EngineError::UnknownArm(arm_id.to_string()))?;
        let counters = cell.lock().unwrap_or_else(|e| e.into_inner());

        let mut days = Vec::new();
        if let (Some((&first, _)), Some((&last, _))) = (
            counters.daily.iter().next(),
            counters.daily.iter().next_back(),
        ) {
            let mut cursor = first;
            loop {
                let (views, conversions) = counters.daily.get(&cursor).copied().unwrap_or((0, 0));
                days.push(MetricsRecord {
                    arm_id: arm_id.to_string(),
                    date: cursor,
                    views,
                    conversions,
                });
                if cursor == last {
                    break;
                }
                match cursor.succ_opt() {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
        }
        Ok(DailySeries {
            arm_id: arm_id.to_string(),
            days,
        })
    }

    /// All registered experiment ids.
    pub fn experiment_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .experiments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn aggregator_with_two_arms() -> MetricsAggregator {
        let agg = MetricsAggregator::new();
        agg.register_experiment(
            "exp-1",
            &[
                ("control".into(), "Original".into()),
                ("variant".into(), "Hero CTA".into()),
            ],
            "control",
            day(1),
            7,
        );
        agg
    }

    #[test]
    fn test_arm_rate_zero_views() {
        let arm = Arm::new("a", "A");
        assert_eq!(arm.rate(), 0.0);
    }

    #[test]
    fn test_arm_rate_basic() {
        let arm = Arm {
            views: 1000,
            conversions: 55,
            ..Arm::new("a", "A")
        };
        assert!((arm.rate() - 0.055).abs() < 1e-12);
    }

    #[test]
    fn test_ingest_accumulates() {
        let agg = aggregator_with_two_arms();
        agg.ingest("control", 100, 5, day(1)).unwrap();
        agg.ingest("control", 200, 10, day(2)).unwrap();
        let snap = agg.snapshot("exp-1").unwrap();
        let control = snap.control().unwrap();
        assert_eq!(control.views, 300);
        assert_eq!(control.conversions, 15);
    }

    #[test]
    fn test_ingest_unknown_arm_errors() {
        let agg = aggregator_with_two_arms();
        assert!(matches!(
            agg.ingest("nope", 1, 0, day(1)),
            Err(EngineError::UnknownArm(_))
        ));
    }

    #[test]
    fn test_ingest_rejects_conversions_exceeding_views() {
        let agg = aggregator_with_two_arms();
        agg.ingest("control", 10, 10, day(1)).unwrap();
        let err = agg.ingest("control", 0, 1, day(1));
        assert!(matches!(err, Err(EngineError::InvalidDelta { .. })));
        // Counters untouched after rejection.
        let snap = agg.snapshot("exp-1").unwrap();
        assert_eq!(snap.control().unwrap().conversions, 10);
    }

    #[test]
    fn test_ingest_commutative() {
        let a = aggregator_with_two_arms();
        let b = aggregator_with_two_arms();
        a.ingest("variant", 100, 7, day(1)).unwrap();
        a.ingest("variant", 50, 3, day(2)).unwrap();
        b.ingest("variant", 50, 3, day(2)).unwrap();
        b.ingest("variant", 100, 7, day(1)).unwrap();
        assert_eq!(
            a.snapshot("exp-1").unwrap().variants()[0],
            b.snapshot("exp-1").unwrap().variants()[0]
        );
    }

    #[test]
    fn test_snapshot_unknown_experiment_errors() {
        let agg = aggregator_with_two_arms();
        assert!(matches!(
            agg.snapshot("exp-9"),
            Err(EngineError::UnknownExperiment(_))
        ));
    }

    #[test]
    fn test_daily_series_zero_fills_gaps() {
        let agg = aggregator_with_two_arms();
        agg.ingest("control", 100, 5, day(1)).unwrap();
        agg.ingest("control", 80, 4, day(4)).unwrap();
        let series = agg.daily_series("control").unwrap();
        assert_eq!(series.days.len(), 4);
        assert_eq!(series.days[1].views, 0);
        assert_eq!(series.days[2].conversions, 0);
        assert_eq!(series.days[3].views, 80);
    }

    #[test]
    fn test_daily_series_empty_for_untouched_arm() {
        let agg = aggregator_with_two_arms();
        let series = agg.daily_series("variant").unwrap();
        assert!(series.days.is_empty());
    }

    #[test]
    fn test_ingest_batch_skips_bad_rows() {
        let agg = aggregator_with_two_arms();
        let records = vec![
            MetricsRecord {
                arm_id: "control".into(),
                date: day(1),
                views: 100,
                conversions: 5,
            },
            MetricsRecord {
                arm_id: "ghost".into(),
                date: day(1),
                views: 10,
                conversions: 1,
            },
            MetricsRecord {
                arm_id: "variant".into(),
                date: day(1),
                views: 90,
                conversions: 9,
            },
        ];
        let rejected = agg.ingest_batch(&records);
        assert_eq!(rejected, 1);
        let snap = agg.snapshot("exp-1").unwrap();
        assert_eq!(snap.control().unwrap().views, 100);
        assert_eq!(snap.variants()[0].views, 90);
    }

    #[test]
    fn test_concurrent_ingest_same_arm() {
        use std::sync::Arc;
        let agg = Arc::new(aggregator_with_two_arms());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let agg = Arc::clone(&agg);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    agg.ingest("control", 10, 1, day(1)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snap = agg.snapshot("exp-1").unwrap();
        assert_eq!(snap.control().unwrap().views, 8_000);
        assert_eq!(snap.control().unwrap().conversions, 800);
    }

    #[test]
    fn test_ingest_saturates_instead_of_overflowing() {
        let agg = aggregator_with_two_arms();
        agg.ingest("control", u64::MAX, 0, day(1)).unwrap();
        agg.ingest("control", u64::MAX, 0, day(1)).unwrap();
        // Cumulative totals and the daily series saturate together.
        let snap = agg.snapshot("exp-1").unwrap();
        assert_eq!(snap.control().unwrap().views, u64::MAX);
        let series = agg.daily_series("control").unwrap();
        assert_eq!(series.days[0].views, u64::MAX);
    }

    #[test]
    fn test_simulated_source_respects_invariant() {
        let src = SimulatedMetricsSource::new(vec!["a".into(), "b".into()], day(1));
        for r in src.fetch().unwrap() {
            assert!(r.conversions <= r.views);
        }
    }

    proptest! {
        // conversions <= views holds for every reachable arm state
        #[test]
        fn prop_conversions_never_exceed_views(deltas in proptest::collection::vec((0u64..500, 0u64..500), 1..40)) {
            let agg = aggregator_with_two_arms();
            for (v, c) in deltas {
                let _ = agg.ingest("control", v, c, day(1));
                let snap = agg.snapshot("exp-1").unwrap();
                let arm = snap.control().unwrap();
                prop_assert!(arm.conversions <= arm.views);
            }
        }
    }
}
