//! # Stage: Strategy Optimizer
//!
//! ## Responsibility
//! Analyzes the iteration history for velocity, effectiveness, and ROI
//! trends; detects saturation; and recommends cadence and threshold
//! adjustments that feed back into the next cycle's configuration.
//!
//! Impact projections are linear extrapolations of current velocity at 1/3/6
//! iteration horizons. That is an acknowledged simplification — a production
//! forecaster would do better — but the contract here only requires
//! monotonic extrapolation.
//!
//! ## Guarantees
//! - Honest about thin data: fewer than 2 historical iterations yields an
//!   `InsufficientData` status, never a fabricated trend
//! - Stagnation never answers with "iterate faster" alone: the remedy list
//!   always includes a floor or mode change
//! - Bounded: trend snapshots are kept in a ring of the last
//!   `trend_retention` entries (default 30)
//!
//! ## NOT Responsible For
//! - Applying the recommended parameters (orchestrator writes them back)
//! - Generating the candidate proposals exploratory mode asks for
//!   (candidate generator)

use std::collections::VecDeque;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{IterationCadence, OptimizerConfig, StrategyParams};
use crate::strategy::tracker::IterationRecord;

/// Proxy revenue attributed to one quality-delta point. Used only for the
/// relative ROI trend, not for reporting real money.
const REVENUE_PER_QUALITY_POINT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Whether the analysis had enough history to mean anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Ok,
    InsufficientData,
}

/// Linear projection of cumulative quality delta at a future horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactProjection {
    pub horizon_iterations: u32,
    pub projected_quality_delta: f64,
}

/// The action plan, split by urgency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub immediate: Vec<String>,
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
}

/// One per optimizer run; retained in a bounded ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub date: NaiveDate,
    pub velocity: f64,
    pub effectiveness: f64,
    pub roi: f64,
    pub strategy_params: StrategyParams,
}

/// Full output of one `analyze` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub status: AnalysisStatus,
    /// Mean quality delta per iteration over the trailing window.
    pub velocity: f64,
    /// Mean lift among patterns that reached production in the window.
    pub effectiveness: f64,
    /// Proxy revenue impact per mutation over the window.
    pub roi: f64,
    pub stagnant: bool,
    pub cadence: IterationCadence,
    /// Revised parameters for the next cycle.
    pub recommended_params: StrategyParams,
    /// `true` when the engine should widen its candidate pool instead of
    /// refining existing patterns.
    pub exploratory_mode: bool,
    /// Ranked, most important first.
    pub reasoning: Vec<String>,
    pub action_plan: ActionPlan,
    pub projections: Vec<ImpactProjection>,
}

impl StrategyRecommendation {
    fn insufficient(params: &StrategyParams) -> Self {
        Self {
            status: AnalysisStatus::InsufficientData,
            velocity: 0.0,
            effectiveness: 0.0,
            roi: 0.0,
            stagnant: false,
            cadence: params.iteration_frequency,
            recommended_params: params.clone(),
            exploratory_mode: false,
            reasoning: vec!["fewer than 2 recorded iterations; no trend available".into()],
            action_plan: ActionPlan {
                immediate: vec!["continue collecting iteration data".into()],
                ..ActionPlan::default()
            },
            projections: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// StrategyOptimizer
// ---------------------------------------------------------------------------

pub struct StrategyOptimizer {
    cfg: OptimizerConfig,
    trends: VecDeque<TrendSnapshot>,
}

impl StrategyOptimizer {
    pub fn new(cfg: OptimizerConfig) -> Self {
        Self {
            cfg,
            trends: VecDeque::new(),
        }
    }

    /// Analyze the history and produce a recommendation for the next cycle.
    ///
    /// Records a [`TrendSnapshot`] as a side effect (bounded ring).
    pub fn analyze(
        &mut self,
        history: &[IterationRecord],
        params: &StrategyParams,
        today: NaiveDate,
    ) -> StrategyRecommendation {
        if history.len() < 2 {
            return StrategyRecommendation::insufficient(params);
        }

        let window_start = history.len().saturating_sub(self.cfg.trailing_window);
        let window = &history[window_start..];

        let velocity =
            window.iter().map(|r| r.quality_delta).sum::<f64>() / window.len() as f64;

        let production_lifts: Vec<f64> = window
            .iter()
            .flat_map(|r| r.production_lifts.iter().copied())
            .collect();
        let effectiveness = if production_lifts.is_empty() {
            0.0
        } else {
            production_lifts.iter().sum::<f64>() / production_lifts.len() as f64
        };

        let mutations: u64 = window.iter().map(|r| r.mutations_issued).sum();
        let revenue_proxy: f64 = window
            .iter()
            .map(|r| r.quality_delta * REVENUE_PER_QUALITY_POINT)
            .sum();
        let roi = if mutations == 0 {
            0.0
        } else {
            revenue_proxy / mutations as f64
        };

        let stagnant = self.detect_stagnation(history, params);

        let (cadence, recommended_params, exploratory_mode, reasoning, action_plan) =
            self.recommend(velocity, effectiveness, stagnant, &production_lifts, params);

        let projections = [1u32, 3, 6]
            .iter()
            .map(|&h| ImpactProjection {
                horizon_iterations: h,
                projected_quality_delta: velocity * h as f64,
            })
            .collect();

        self.push_trend(TrendSnapshot {
            date: today,
            velocity,
            effectiveness,
            roi,
            strategy_params: recommended_params.clone(),
        });

        debug!(velocity, effectiveness, roi, stagnant, "strategy analysis complete");
        StrategyRecommendation {
            status: AnalysisStatus::Ok,
            velocity,
            effectiveness,
            roi,
            stagnant,
            cadence,
            recommended_params,
            exploratory_mode,
            reasoning,
            action_plan,
            projections,
        }
    }

    /// Saturation: per-iteration velocity magnitude stayed below the
    /// improvement floor for at least `stagnation_run` consecutive
    /// iterations at the end of the history.
    fn detect_stagnation(&self, history: &[IterationRecord], params: &StrategyParams) -> bool {
        if history.len() < self.cfg.stagnation_run {
            return false;
        }
        history[history.len() - self.cfg.stagnation_run..]
            .iter()
            .all(|r| r.quality_delta.abs() < params.min_improvement)
    }

    #[allow(clippy::type_complexity)]
    fn recommend(
        &self,
        velocity: f64,
        effectiveness: f64,
        stagnant: bool,
        production_lifts: &[f64],
        params: &StrategyParams,
    ) -> (IterationCadence, StrategyParams, bool, Vec<String>, ActionPlan) {
        let mut reasoning = Vec::new();
        let mut plan = ActionPlan::default();
        let mut recommended = params.clone();
        let mut exploratory = false;

        let cadence = if stagnant {
            // Slowing down is allowed; speeding up alone is not a remedy for
            // saturation.
            exploratory = true;
            recommended.min_improvement = (params.min_improvement * 0.8).max(0.5);
            recommended.min_cycle_duration_days = params
                .min_cycle_duration_days
                .max(IterationCadence::BiWeekly.days());

            reasoning.push(format!(
                "velocity {:.2} has stayed below the {:.2} improvement floor for {} iterations; the current pattern pool is saturated",
                velocity, params.min_improvement, self.cfg.stagnation_run
            ));
            reasoning.push(format!(
                "lowering min_improvement to {:.2} admits smaller but real wins",
                recommended.min_improvement
            ));
            reasoning.push(
                "switching to exploratory mode widens the candidate pool instead of re-refining exhausted patterns".into(),
            );

            plan.immediate
                .push("generate a fresh ranked candidate pool (exploratory mode)".into());
            plan.immediate.push(format!(
                "apply lowered improvement floor {:.2}",
                recommended.min_improvement
            ));
            plan.short_term
                .push("pilot the top two candidates on a small target subset".into());
            plan.long_term
                .push("re-evaluate cadence once velocity recovers above the floor".into());
            IterationCadence::Monthly
        } else if velocity >= 2.0 * params.min_improvement {
            reasoning.push(format!(
                "velocity {velocity:.2} is well above the improvement floor; the pipeline supports a weekly cadence"
            ));
            plan.immediate.push("keep scaling qualified patterns".into());
            plan.short_term
                .push("add newly launched pages to the target universe".into());
            plan.long_term
                .push("watch for velocity decay as the universe saturates".into());
            IterationCadence::Weekly
        } else if velocity >= params.min_improvement {
            reasoning.push(format!(
                "velocity {velocity:.2} clears the floor with little headroom; bi-weekly cadence balances signal against churn"
            ));
            plan.immediate.push("continue current pilots".into());
            plan.short_term
                .push("review patterns stuck in pilot for two or more iterations".into());
            plan.long_term
                .push("consider exploratory mode if velocity declines further".into());
            IterationCadence::BiWeekly
        } else {
            reasoning.push(format!(
                "velocity {velocity:.2} is below the improvement floor but not yet a sustained stall; slowing to monthly gathers more signal per decision"
            ));
            plan.immediate
                .push("hold current pilots; do not start new ones".into());
            plan.short_term
                .push("audit pilot sample sizes against the conversion floor".into());
            plan.long_term
                .push("prepare an exploratory candidate pool in case stall persists".into());
            IterationCadence::Monthly
        };
        recommended.iteration_frequency = cadence;

        if production_lifts.iter().any(|&l| l < 0.0) {
            reasoning.push(
                "a production pattern shows negative lift in this window; flag it for retirement review".into(),
            );
            plan.short_term
                .push("review regressing production patterns for retirement".into());
        }
        if effectiveness > 0.0 {
            reasoning.push(format!(
                "patterns reaching production in this window average {effectiveness:.1}% lift"
            ));
        }

        (cadence, recommended, exploratory, reasoning, plan)
    }

    fn push_trend(&mut self, snapshot: TrendSnapshot) {
        if self.trends.len() >= self.cfg.trend_retention {
            self.trends.pop_front();
        }
        self.trends.push_back(snapshot);
    }

    /// Retained trend snapshots, oldest first.
    pub fn trends(&self) -> impl Iterator<Item = &TrendSnapshot> {
        self.trends.iter()
    }

    pub fn trend_count(&self) -> usize {
        self.trends.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
