//! # Evaluation Cycle Orchestrator
//!
//! The main loop that closes the experiment → lifecycle → strategy feedback
//! cycle:
//!
//! ```text
//! MetricsSource ──► MetricsAggregator ──► SignificanceEvaluator ──► WinnerSelector
//!       ▲                                                                │
//!       │                       PatternLifecycleManager ◄───────────────┘
//!       │                                   │
//!       │                        EffectivenessTracker
//!       │                                   │
//!       └──────── StrategyOptimizer ◄──────┘   (revised params feed back)
//! ```
//!
//! ## What It Does
//!
//! 1. Pulls a batch from the [`MetricsSource`] and ingests it.
//! 2. Snapshots every experiment and runs winner selection.
//! 3. Records verdicts against linked patterns, promotes qualified pilots,
//!    and scales validated patterns toward the universe.
//! 4. Folds the cycle's outcomes into the append-only iteration history.
//! 5. Runs the strategy optimizer and writes its revised parameters back as
//!    the configuration of the next cycle.
//! 6. When the optimizer calls for exploratory mode, registers a ranked
//!    batch of candidate patterns from the generator.
//! 7. Emits a structured [`CycleReport`] for the downstream presentation
//!    layer.
//!
//! This is a periodic batch process, not a request handler. The
//! `min_cycle_duration` gate is a business rule (don't re-evaluate too
//! soon), not a performance deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{EngineConfig, StrategyParams};
use crate::error::Result;
use crate::evaluate::winner::{self, Verdict, WinnerVerdict};
use crate::lifecycle::candidates::{CandidateGenerator, ProposalContext};
use crate::lifecycle::manager::{ContentMutator, PatternLifecycleManager, ScaleOutcome};
use crate::lifecycle::pattern::{Pattern, PatternStatus};
use crate::metrics::{MetricsAggregator, MetricsSource};
use crate::store::StateStore;
use crate::strategy::optimizer::{
    ActionPlan, AnalysisStatus, StrategyOptimizer, StrategyRecommendation,
};
use crate::strategy::tracker::{
    EffectivenessTracker, IterationRecord, PilotResult, ScalingResult, TargetImprovement,
};

// ---------------------------------------------------------------------------
// CycleConfig
// ---------------------------------------------------------------------------

/// Configuration for the cycle runner.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// How often the async loop wakes up to consider running a cycle.
    pub poll_interval: Duration,
    /// Maximum candidate proposals registered per exploratory activation.
    pub proposal_limit: usize,
    /// Engine-wide settings (initial strategy params, optimizer window).
    pub engine: EngineConfig,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3_600),
            proposal_limit: 3,
            engine: EngineConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// CycleReport — the reporting boundary
// ---------------------------------------------------------------------------

/// Verdict for one experiment in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    pub experiment_id: String,
    pub verdict: Verdict,
}

/// Structured per-cycle result for the downstream presentation layer.
/// Formatting and rendering are out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub date: NaiveDate,
    /// `true` when the min-cycle-duration gate skipped this run entirely.
    pub skipped: bool,
    pub experiments: Vec<ExperimentOutcome>,
    /// Best ready-to-scale verdict of the cycle, if any.
    pub winner: Option<WinnerVerdict>,
    pub scaled: Vec<ScaleOutcome>,
    pub iteration: Option<IterationRecord>,
    pub recommendation: Option<StrategyRecommendation>,
    pub action_plan: ActionPlan,
    /// Candidate patterns registered by an exploratory activation.
    pub proposals_registered: Vec<String>,
}

impl CycleReport {
    fn skipped(date: NaiveDate) -> Self {
        Self {
            date,
            skipped: true,
            experiments: Vec::new(),
            winner: None,
            scaled: Vec::new(),
            iteration: None,
            recommendation: None,
            action_plan: ActionPlan::default(),
            proposals_registered: Vec::new(),
        }
    }
}

/// Counters about the runner's activity, readable from outside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleStatus {
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub experiments_evaluated: u64,
    pub patterns_scaled: u64,
    pub pattern_failures: u64,
    pub running: bool,
}

// ---------------------------------------------------------------------------
// EvaluationCycle
// ---------------------------------------------------------------------------

/// Ties the engine components into a single runnable loop.
pub struct EvaluationCycle {
    cfg: CycleConfig,
    aggregator: Arc<MetricsAggregator>,
    manager: Arc<PatternLifecycleManager>,
    source: Arc<dyn MetricsSource>,
    mutator: Arc<dyn ContentMutator>,
    store: Arc<dyn StateStore>,
    generator: Arc<dyn CandidateGenerator>,
    tracker: Mutex<EffectivenessTracker>,
    optimizer: Mutex<StrategyOptimizer>,
    params: Mutex<StrategyParams>,
    /// experiment id → pattern id under evaluation.
    links: Mutex<HashMap<String, String>>,
    last_run: Mutex<Option<NaiveDate>>,
    status: Arc<Mutex<CycleStatus>>,
}

impl EvaluationCycle {
    /// Build a runner. Persisted state is read back from the store:
    /// strategy params and iteration history when present, and any patterns
    /// the manager does not already hold.
    pub fn new(
        cfg: CycleConfig,
        aggregator: Arc<MetricsAggregator>,
        manager: Arc<PatternLifecycleManager>,
        source: Arc<dyn MetricsSource>,
        mutator: Arc<dyn ContentMutator>,
        store: Arc<dyn StateStore>,
        generator: Arc<dyn CandidateGenerator>,
    ) -> Result<Self> {
        let params = store
            .load_params()?
            .unwrap_or_else(|| cfg.engine.strategy.clone());
        let tracker = EffectivenessTracker::from_history(store.load_history()?);
        let optimizer = StrategyOptimizer::new(cfg.engine.optimizer.clone());
        let restored = manager.hydrate(store.load_patterns()?);
        if restored > 0 {
            info!(restored, "patterns restored from store");
        }
        Ok(Self {
            cfg,
            aggregator,
            manager,
            source,
            mutator,
            store,
            generator,
            tracker: Mutex::new(tracker),
            optimizer: Mutex::new(optimizer),
            params: Mutex::new(params),
            links: Mutex::new(HashMap::new()),
            last_run: Mutex::new(None),
            status: Arc::new(Mutex::new(CycleStatus::default())),
        })
    }

    /// Associate an experiment with the pattern it is piloting.
    pub fn link_experiment(&self, experiment_id: impl Into<String>, pattern_id: impl Into<String>) {
        self.links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(experiment_id.into(), pattern_id.into());
    }

    /// Cloneable handle to the shared status counters.
    pub fn status_handle(&self) -> Arc<Mutex<CycleStatus>> {
        Arc::clone(&self.status)
    }

    /// Current strategy parameters (revised by the optimizer between cycles).
    pub fn current_params(&self) -> StrategyParams {
        self.params.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the periodic loop until the task is cancelled.
    pub async fn run(self: Arc<Self>) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).running = true;
        let mut tick = interval(self.cfg.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let today = Utc::now().date_naive();
            match self.run_once(today) {
                Ok(report) if report.skipped => {}
                Ok(report) => {
                    info!(
                        date = %report.date,
                        experiments = report.experiments.len(),
                        scaled = report.scaled.len(),
                        "cycle complete"
                    );
                }
                Err(err) => error!(%err, "cycle failed"),
            }
        }
    }

    /// Run one full batch cycle. `pub` so tests and the CLI can drive it
    /// synchronously without spawning tasks.
    pub fn run_once(&self, today: NaiveDate) -> Result<CycleReport> {
        let params = self.current_params();

        // Business-rule gate: don't re-evaluate too soon.
        {
            let last = self.last_run.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(prev) = *last {
                let elapsed = (today - prev).num_days();
                if elapsed < params.min_cycle_duration_days as i64 {
                    info!(
                        elapsed,
                        required = params.min_cycle_duration_days,
                        "cycle skipped by min-cycle-duration gate"
                    );
                    self.status
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .cycles_skipped += 1;
                    return Ok(CycleReport::skipped(today));
                }
            }
        }

        // 1. Ingest fresh metrics.
        let records = self.source.fetch()?;
        self.aggregator.ingest_batch(&records);

        // 2–3. Evaluate experiments and drive pattern lifecycles. A failure
        // on one pattern is isolated: logged, counted, and the run proceeds.
        let mut experiments = Vec::new();
        let mut pilot_results = Vec::new();
        let mut scaling_results = Vec::new();
        let mut scaled = Vec::new();
        for experiment_id in self.aggregator.experiment_ids() {
            match self.evaluate_experiment(&experiment_id, today, &params) {
                Ok(Some(eval)) => {
                    experiments.push(ExperimentOutcome {
                        experiment_id,
                        verdict: eval.verdict,
                    });
                    pilot_results.extend(eval.pilot);
                    if let Some((outcome, scaling)) = eval.scale {
                        scaled.push(outcome);
                        scaling_results.push(scaling);
                    }
                }
                Ok(None) => {} // experiment still inside its minimum duration
                Err(err) => {
                    warn!(%err, experiment = %experiment_id, "experiment evaluation failed; continuing");
                    self.status
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .pattern_failures += 1;
                }
            }
        }

        // 4. Record the iteration.
        let iteration = {
            let mut tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
            tracker.record_iteration(today, &pilot_results, &scaling_results)
        };
        self.store.append_iteration(&iteration)?;
        self.store.save_patterns(&self.manager.all())?;

        // 5. Optimize and feed revised parameters back.
        let history = self
            .tracker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history();
        let recommendation = {
            let mut optimizer = self.optimizer.lock().unwrap_or_else(|e| e.into_inner());
            optimizer.analyze(&history, &params, today)
        };
        let mut proposals_registered = Vec::new();
        if recommendation.status == AnalysisStatus::Ok {
            *self.params.lock().unwrap_or_else(|e| e.into_inner()) =
                recommendation.recommended_params.clone();
            self.store.save_params(&recommendation.recommended_params)?;

            // 6. Exploratory mode: widen the candidate pool.
            if recommendation.exploratory_mode {
                proposals_registered = self.register_proposals();
            }
        }

        // 7. Emit the report.
        let winner = experiments
            .iter()
            .filter_map(|e| e.verdict.winner())
            .filter(|w| w.ready_to_scale)
            .max_by(|a, b| a.lift.partial_cmp(&b.lift).unwrap_or(std::cmp::Ordering::Equal))
            .cloned();

        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(today);
        {
            let mut s = self.status.lock().unwrap_or_else(|e| e.into_inner());
            s.cycles_run += 1;
            s.experiments_evaluated += experiments.len() as u64;
            s.patterns_scaled += scaled.iter().filter(|o| o.reached_production).count() as u64;
        }

        Ok(CycleReport {
            date: today,
            skipped: false,
            experiments,
            winner,
            scaled,
            action_plan: recommendation.action_plan.clone(),
            iteration: Some(iteration),
            recommendation: Some(recommendation),
            proposals_registered,
        })
    }

    /// Evaluate one experiment and, when a pattern is linked, advance its
    /// lifecycle. Returns `None` while the experiment is inside its minimum
    /// duration.
    fn evaluate_experiment(
        &self,
        experiment_id: &str,
        today: NaiveDate,
        params: &StrategyParams,
    ) -> Result<Option<ExperimentEvaluation>> {
        let snapshot = self.aggregator.snapshot(experiment_id)?;
        let age_days = (today - snapshot.started_at).num_days();
        if age_days < snapshot.min_duration_days as i64 {
            return Ok(None);
        }

        let control = match snapshot.control() {
            Some(c) => c,
            None => {
                return Ok(Some(ExperimentEvaluation {
                    verdict: Verdict::InsufficientData {
                        reason: format!(
                            "experiment '{experiment_id}' has no control arm '{}'",
                            snapshot.control_arm_id
                        ),
                    },
                    pilot: Vec::new(),
                    scale: None,
                }))
            }
        };
        let variants = snapshot.variants();
        let verdict = winner::select_winner(control, &variants, params);

        let pattern_id = self
            .links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(experiment_id)
            .cloned();
        let Some(pattern_id) = pattern_id else {
            return Ok(Some(ExperimentEvaluation {
                verdict,
                pilot: Vec::new(),
                scale: None,
            }));
        };

        let mut pilot = Vec::new();
        let mut scale = None;
        if let Some(w) = verdict.winner() {
            self.manager.record_verdict(&pattern_id, w)?;

            let pattern = self.manager.get(&pattern_id)?;
            let rate_delta_points = variants
                .iter()
                .find(|v| v.id == w.winner_id)
                .map(|v| (v.rate() - control.rate()) * 100.0)
                .unwrap_or(0.0);
            pilot.push(PilotResult {
                pattern_id: pattern_id.clone(),
                lift: w.lift,
                improvements: pattern
                    .pilot_targets
                    .iter()
                    .map(|t| TargetImprovement {
                        target: t.clone(),
                        delta: rate_delta_points,
                    })
                    .collect(),
            });

            if w.ready_to_scale {
                if pattern.status == PatternStatus::Pilot {
                    self.manager.promote(&pattern_id, PatternStatus::Validated)?;
                }
                let current = self.manager.get(&pattern_id)?;
                if current.status == PatternStatus::Validated {
                    let outcome = self
                        .manager
                        .scale_pattern(&pattern_id, self.mutator.as_ref())?;
                    let scaling = ScalingResult {
                        pattern_id: pattern_id.clone(),
                        lift: w.lift,
                        improvements: outcome
                            .result
                            .applied
                            .iter()
                            .map(|t| TargetImprovement {
                                target: t.clone(),
                                delta: rate_delta_points,
                            })
                            .collect(),
                        mutations_issued: (outcome.result.applied.len()
                            + outcome.result.failed.len())
                            as u64,
                        reached_production: outcome.reached_production,
                    };
                    scale = Some((outcome, scaling));
                }
            }
        }

        Ok(Some(ExperimentEvaluation {
            verdict,
            pilot,
            scale,
        }))
    }

    /// Pull a ranked proposal batch from the generator and register each as
    /// an exploratory pattern.
    fn register_proposals(&self) -> Vec<String> {
        let live = self.manager.all();
        let best_observed_lift = live
            .iter()
            .filter_map(|p| p.best_observed_lift)
            .fold(None, |acc: Option<f64>, l| {
                Some(acc.map_or(l, |a| a.max(l)))
            });
        let ctx = ProposalContext {
            covered_categories: Vec::new(),
            best_observed_lift,
            limit: self.cfg.proposal_limit,
        };
        let mut registered = Vec::new();
        for proposal in self.generator.propose(&ctx) {
            let pattern = Pattern::exploratory(&proposal.pattern_id, &proposal.name);
            match self.manager.register(pattern) {
                Ok(()) => {
                    info!(
                        pattern = %proposal.pattern_id,
                        name = %proposal.name,
                        impact = proposal.expected_impact,
                        "exploratory candidate registered"
                    );
                    registered.push(proposal.pattern_id);
                }
                Err(err) => warn!(%err, "skipping candidate registration"),
            }
        }
        registered
    }
}

struct ExperimentEvaluation {
    verdict: Verdict,
    pilot: Vec<PilotResult>,
    scale: Option<(ScaleOutcome, ScalingResult)>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
