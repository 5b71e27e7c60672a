//! # Stage: Configuration
//!
//! ## Responsibility
//! Tunable strategy parameters and engine settings, with TOML loading for
//! the binary and validated defaults for everything else.
//!
//! [`StrategyParams`] is special: the optimizer revises it between cycles,
//! so it flows through the engine as data, not as static config.
//!
//! ## Guarantees
//! - `validate` rejects parameter sets that would make the engine vacuous
//!   (zero-day cycles, confidence thresholds outside the chi-square buckets)
//!
//! ## NOT Responsible For
//! - Revising the parameters (strategy optimizer)
//! - Persisting revised parameters between runs (state store)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ---------------------------------------------------------------------------
// IterationCadence
// ---------------------------------------------------------------------------

/// How often a full evaluation cycle should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationCadence {
    Weekly,
    BiWeekly,
    Monthly,
}

impl IterationCadence {
    pub fn days(self) -> u32 {
        match self {
            IterationCadence::Weekly => 7,
            IterationCadence::BiWeekly => 14,
            IterationCadence::Monthly => 30,
        }
    }
}

impl std::fmt::Display for IterationCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationCadence::Weekly => write!(f, "weekly"),
            IterationCadence::BiWeekly => write!(f, "bi-weekly"),
            IterationCadence::Monthly => write!(f, "monthly"),
        }
    }
}

// ---------------------------------------------------------------------------
// StrategyParams
// ---------------------------------------------------------------------------

/// The tunable knobs of the evaluation strategy. Revised by the optimizer
/// between cycles; treat an instance as belonging to one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Minimum relative lift (percent) a winner needs to be scaled.
    pub min_improvement: f64,
    /// Minimum confidence bucket (percent) a winner needs to be scaled.
    pub scale_confidence_threshold: f64,
    /// Every arm must have at least this many conversions before a verdict
    /// is declared.
    pub min_sample_conversions: u64,
    /// Cycles closer together than this are skipped.
    pub min_cycle_duration_days: u32,
    pub iteration_frequency: IterationCadence,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_improvement: 5.0,
            scale_confidence_threshold: 95.0,
            min_sample_conversions: 30,
            min_cycle_duration_days: 7,
            iteration_frequency: IterationCadence::Weekly,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<()> {
        if !self.min_improvement.is_finite() || self.min_improvement < 0.0 {
            return Err(EngineError::Config(format!(
                "min_improvement must be a non-negative number, got {}",
                self.min_improvement
            )));
        }
        // The chi-square buckets only produce 95.0, 99.0, or 99.9; a
        // threshold above 99.9 can never be met.
        if !(0.0..=99.9).contains(&self.scale_confidence_threshold) {
            return Err(EngineError::Config(format!(
                "scale_confidence_threshold must be within 0..=99.9, got {}",
                self.scale_confidence_threshold
            )));
        }
        if self.min_cycle_duration_days == 0 {
            return Err(EngineError::Config(
                "min_cycle_duration_days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OptimizerConfig
// ---------------------------------------------------------------------------

/// Static settings of the strategy optimizer (not revised between cycles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Trend metrics are means over the last this-many iterations.
    pub trailing_window: usize,
    /// Trend snapshots retained in the ring.
    pub trend_retention: usize,
    /// Consecutive below-floor iterations that count as stagnation.
    pub stagnation_run: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            trailing_window: 5,
            trend_retention: 30,
            stagnation_run: 3,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trailing_window == 0 || self.stagnation_run == 0 {
            return Err(EngineError::Config(
                "trailing_window and stagnation_run must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: StrategyParams,
    pub optimizer: OptimizerConfig,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        self.optimizer.validate()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
