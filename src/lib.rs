//! # liftgate
//!
//! Experiment evaluation and pattern lifecycle engine for content A/B
//! rollouts. The engine ingests per-arm conversion metrics, evaluates
//! experiments with a 2x2 chi-square test, selects winners, drives winning
//! patterns through a one-way lifecycle (exploratory → pilot → validated →
//! production), records per-iteration effectiveness, and feeds a strategy
//! optimizer whose revised parameters configure the next cycle.
//!
//! ## Module map
//! - [`metrics`] — per-arm counter accumulation and experiment snapshots
//! - [`evaluate`] — chi-square significance and winner selection
//! - [`lifecycle`] — pattern registry, idempotent application, scaling,
//!   candidate generation
//! - [`strategy`] — iteration history and the strategy optimizer
//! - [`orchestrator`] — the cycle runner tying the stages together
//! - [`store`] — the persistence boundary
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use liftgate::config::EngineConfig;
//! use liftgate::lifecycle::candidates::TemplateCatalog;
//! use liftgate::lifecycle::manager::{PatternLifecycleManager, RecordingMutator};
//! use liftgate::metrics::{MetricsAggregator, SimulatedMetricsSource};
//! use liftgate::orchestrator::{CycleConfig, EvaluationCycle};
//! use liftgate::store::InMemoryStore;
//!
//! let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
//! let aggregator = Arc::new(MetricsAggregator::new());
//! aggregator.register_experiment(
//!     "exp-hero-cta",
//!     &[("control".into(), "Original".into()), ("hero".into(), "Hero CTA".into())],
//!     "control",
//!     today,
//!     0,
//! );
//! let cycle = EvaluationCycle::new(
//!     CycleConfig { engine: EngineConfig::default(), ..CycleConfig::default() },
//!     aggregator,
//!     Arc::new(PatternLifecycleManager::new((1..=10).map(|i| format!("page-{i}")))),
//!     Arc::new(SimulatedMetricsSource::new(vec!["control".into(), "hero".into()], today)),
//!     Arc::new(RecordingMutator::new()),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(TemplateCatalog::new()),
//! ).unwrap();
//! let report = cycle.run_once(today).unwrap();
//! println!("{:#?}", report.winner);
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod strategy;

pub use config::{EngineConfig, StrategyParams};
pub use error::{EngineError, Result};
pub use orchestrator::{CycleConfig, CycleReport, EvaluationCycle};
