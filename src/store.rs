//! # Stage: State Store
//!
//! ## Responsibility
//! The persistence boundary. State is read at the start of a cycle and
//! written back at the end; storage technology is an implementation detail
//! behind the [`StateStore`] trait. The in-memory implementation here backs
//! tests and the demo binary; a database-backed store slots in by
//! implementing the same trait.
//!
//! ## Guarantees
//! - Append-only history: `append_iteration` is the only way history grows;
//!   nothing rewrites past records
//! - Monotonic patterns: `save_patterns` refuses a write that would shrink
//!   any pattern's `applied_targets`
//!
//! ## NOT Responsible For
//! - Deciding what to persist or when (orchestrator)

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::StrategyParams;
use crate::error::{EngineError, Result};
use crate::lifecycle::pattern::Pattern;
use crate::strategy::tracker::IterationRecord;

// ---------------------------------------------------------------------------
// StateStore trait
// ---------------------------------------------------------------------------

/// Durable engine state between cycles.
pub trait StateStore: Send + Sync {
    /// All persisted patterns.
    fn load_patterns(&self) -> Result<Vec<Pattern>>;

    /// Persist the current pattern catalog.
    ///
    /// # Errors
    /// Returns `EngineError::Store` when a pattern's applied-target set would
    /// shrink — that write would violate monotonicity and indicates a bug in
    /// the caller, not a storage failure.
    fn save_patterns(&self, patterns: &[Pattern]) -> Result<()>;

    /// Append one iteration record to the history.
    fn append_iteration(&self, record: &IterationRecord) -> Result<()>;

    /// Full iteration history, oldest first.
    fn load_history(&self) -> Result<Vec<IterationRecord>>;

    /// Last-known strategy parameters, if any were saved.
    fn load_params(&self) -> Result<Option<StrategyParams>>;

    fn save_params(&self, params: &StrategyParams) -> Result<()>;
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    patterns: HashMap<String, Pattern>,
    history: Vec<IterationRecord>,
    params: Option<StrategyParams>,
}

/// Mutex-protected in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    fn load_patterns(&self) -> Result<Vec<Pattern>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut patterns: Vec<Pattern> = state.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(patterns)
    }

    fn save_patterns(&self, patterns: &[Pattern]) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for pattern in patterns {
            if let Some(existing) = state.patterns.get(&pattern.id) {
                if !existing.applied_targets.is_subset(&pattern.applied_targets) {
                    return Err(EngineError::Store(format!(
                        "refusing to shrink applied_targets of pattern '{}'",
                        pattern.id
                    )));
                }
            }
        }
        for pattern in patterns {
            state.patterns.insert(pattern.id.clone(), pattern.clone());
        }
        Ok(())
    }

    fn append_iteration(&self, record: &IterationRecord) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .push(record.clone());
        Ok(())
    }

    fn load_history(&self) -> Result<Vec<IterationRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .clone())
    }

    fn load_params(&self) -> Result<Option<StrategyParams>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .params
            .clone())
    }

    fn save_params(&self, params: &StrategyParams) -> Result<()> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).params = Some(params.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn pattern_with_targets(id: &str, targets: &[&str]) -> Pattern {
        let mut p = Pattern::exploratory(id, "test");
        for t in targets {
            p.applied_targets.insert(t.to_string());
        }
        p
    }

    #[test]
    fn test_save_and_load_patterns() {
        let store = InMemoryStore::new();
        store
            .save_patterns(&[pattern_with_targets("p1", &["t1"])])
            .unwrap();
        let loaded = store.load_patterns().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].is_applied("t1"));
    }

    #[test]
    fn test_save_rejects_shrinking_applied_targets() {
        let store = InMemoryStore::new();
        store
            .save_patterns(&[pattern_with_targets("p1", &["t1", "t2"])])
            .unwrap();
        let err = store.save_patterns(&[pattern_with_targets("p1", &["t1"])]);
        assert!(matches!(err, Err(EngineError::Store(_))));
        // Original state intact.
        assert_eq!(store.load_patterns().unwrap()[0].applied_targets.len(), 2);
    }

    #[test]
    fn test_save_allows_growth() {
        let store = InMemoryStore::new();
        store
            .save_patterns(&[pattern_with_targets("p1", &["t1"])])
            .unwrap();
        store
            .save_patterns(&[pattern_with_targets("p1", &["t1", "t2"])])
            .unwrap();
        assert_eq!(store.load_patterns().unwrap()[0].applied_targets.len(), 2);
    }

    #[test]
    fn test_history_appends_in_order() {
        let store = InMemoryStore::new();
        for n in 1..=3u64 {
            store
                .append_iteration(&IterationRecord {
                    iteration_number: n,
                    date: NaiveDate::from_ymd_opt(2026, 6, n as u32).unwrap(),
                    pilot_targets: 0,
                    scaled_targets: 0,
                    quality_delta: n as f64,
                    patterns_involved: vec![],
                    production_lifts: vec![],
                    mutations_issued: 0,
                })
                .unwrap();
        }
        let history = store.load_history().unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].iteration_number, 3);
    }

    #[test]
    fn test_params_roundtrip() {
        let store = InMemoryStore::new();
        assert!(store.load_params().unwrap().is_none());
        let params = StrategyParams {
            min_improvement: 2.5,
            ..StrategyParams::default()
        };
        store.save_params(&params).unwrap();
        assert_eq!(store.load_params().unwrap(), Some(params));
    }
}
