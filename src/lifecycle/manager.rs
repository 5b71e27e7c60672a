//! # Stage: Pattern Lifecycle Manager
//!
//! ## Responsibility
//! Owns the pattern/target registry. Applies patterns to targets through the
//! external [`ContentMutator`], advances pattern status through the legal
//! transition table, and scales validated patterns to the remaining target
//! universe.
//!
//! ## Guarantees
//! - Idempotent: a `(pattern, target)` pair is applied at most once; a
//!   re-apply is a silent skip and issues no mutation call
//! - Monotonic: `applied_targets` never shrinks
//! - Partial-failure tolerant: a failing target is logged and skipped, the
//!   rest of the batch continues
//! - Serialized per pattern: each registry entry sits behind its own mutex,
//!   so concurrent cycle runs cannot interleave mutations of one pattern;
//!   distinct patterns proceed concurrently
//! - Resumable: an interrupted scale-out re-run simply skips the targets
//!   already applied — no compensating rollback exists or is needed
//!
//! ## NOT Responsible For
//! - Actually mutating page content (the [`ContentMutator`] boundary, where
//!   retry/backoff for transient I/O also belongs)
//! - Deciding *whether* a pattern deserves scaling (winner selector)
//! - Persisting the registry between cycles (state store)

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::evaluate::winner::WinnerVerdict;
use crate::lifecycle::pattern::{Pattern, PatternStatus, TargetId};

// ---------------------------------------------------------------------------
// ContentMutator — external boundary
// ---------------------------------------------------------------------------

/// The external system that actually rewrites a target's content.
///
/// Implementations must tolerate being called again for an already-mutated
/// target without adverse effect — defense in depth alongside the manager's
/// own idempotency tracking.
pub trait ContentMutator: Send + Sync {
    /// Apply `pattern_id` to `target_id`.
    ///
    /// # Errors
    /// Returns a human-readable reason on failure; the manager logs it and
    /// continues with the remaining targets.
    fn mutate(&self, target_id: &str, pattern_id: &str) -> std::result::Result<(), String>;
}

/// A mutator that records every call in memory. Used by tests and the demo
/// binary; optionally fails a configured set of targets.
#[derive(Default)]
pub struct RecordingMutator {
    calls: Mutex<Vec<(String, String)>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingMutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `mutate` fail for the given target from now on.
    pub fn fail_target(&self, target: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.into());
    }

    /// All `(target, pattern)` calls issued so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of calls issued for one target.
    pub fn calls_for(&self, target: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(t, _)| t == target)
            .count()
    }
}

impl ContentMutator for RecordingMutator {
    fn mutate(&self, target_id: &str, pattern_id: &str) -> std::result::Result<(), String> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(target_id)
        {
            return Err(format!("mutation rejected for '{target_id}'"));
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((target_id.to_string(), pattern_id.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ApplyResult / ScaleOutcome
// ---------------------------------------------------------------------------

/// What happened to each target in one `apply_pattern` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Targets newly applied in this batch.
    pub applied: Vec<TargetId>,
    /// Targets skipped because they were already applied.
    pub skipped: Vec<TargetId>,
    /// Targets whose mutation failed, with the mutator's reason. They remain
    /// unapplied and will be retried by a later idempotent pass.
    pub failed: Vec<(TargetId, String)>,
}

impl ApplyResult {
    pub fn fully_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of one `scale_pattern` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleOutcome {
    pub pattern_id: String,
    /// Targets that were candidates for this scale-out (universe minus
    /// applied minus pilot).
    pub candidates: Vec<TargetId>,
    pub result: ApplyResult,
    /// `true` once the whole non-pilot universe is applied; the pattern has
    /// been promoted to `Production`.
    pub reached_production: bool,
}

// ---------------------------------------------------------------------------
// PatternLifecycleManager
// ---------------------------------------------------------------------------

/// Registry of patterns plus the full target universe.
///
/// Entries are `Arc<Mutex<Pattern>>` under an outer `RwLock` map: the outer
/// lock is held only to look up or insert entries, the per-pattern mutex is
/// held for the duration of any mutation of that pattern.
pub struct PatternLifecycleManager {
    patterns: RwLock<HashMap<String, Arc<Mutex<Pattern>>>>,
    universe: RwLock<BTreeSet<TargetId>>,
}

impl PatternLifecycleManager {
    pub fn new(universe: impl IntoIterator<Item = TargetId>) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            universe: RwLock::new(universe.into_iter().collect()),
        }
    }

    /// Add a target to the universe (new page went live).
    pub fn add_target(&self, target: impl Into<TargetId>) {
        self.universe
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.into());
    }

    /// Current universe size.
    pub fn universe_len(&self) -> usize {
        self.universe.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Insert a pattern into the registry. Replaces nothing: a duplicate id
    /// is a corrupt-registry error, since silently overwriting would drop
    /// applied-target history.
    pub fn register(&self, pattern: Pattern) -> Result<()> {
        let mut map = self.patterns.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&pattern.id) {
            return Err(EngineError::CorruptEntry {
                pattern: pattern.id,
                reason: "duplicate registration".into(),
            });
        }
        debug!(pattern = %pattern.id, status = %pattern.status, "registered pattern");
        map.insert(pattern.id.clone(), Arc::new(Mutex::new(pattern)));
        Ok(())
    }

    /// Load persisted patterns into the registry. An id already registered
    /// in this process is left untouched; its live state is at least as
    /// advanced as the stored copy. Returns the number restored.
    pub fn hydrate(&self, patterns: impl IntoIterator<Item = Pattern>) -> usize {
        let mut map = self.patterns.write().unwrap_or_else(|e| e.into_inner());
        let mut restored = 0;
        for pattern in patterns {
            if map.contains_key(&pattern.id) {
                continue;
            }
            debug!(pattern = %pattern.id, status = %pattern.status, "restored pattern");
            map.insert(pattern.id.clone(), Arc::new(Mutex::new(pattern)));
            restored += 1;
        }
        restored
    }

    fn entry(&self, pattern_id: &str) -> Result<Arc<Mutex<Pattern>>> {
        self.patterns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(pattern_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPattern(pattern_id.to_string()))
    }

    /// A clone of one pattern's current state.
    pub fn get(&self, pattern_id: &str) -> Result<Pattern> {
        let entry = self.entry(pattern_id)?;
        let guard = entry.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    /// Clones of all patterns, ordered by id.
    pub fn all(&self) -> Vec<Pattern> {
        let map = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Pattern> = map
            .values()
            .map(|e| e.lock().unwrap_or_else(|g| g.into_inner()).clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Assign the pilot target subset and move the pattern to `Pilot`.
    ///
    /// Pilot targets are applied immediately (that is what a pilot is), so
    /// the pilot experiment can start collecting metrics.
    pub fn start_pilot(
        &self,
        pattern_id: &str,
        pilot_targets: impl IntoIterator<Item = TargetId>,
        mutator: &dyn ContentMutator,
    ) -> Result<ApplyResult> {
        let entry = self.entry(pattern_id)?;
        let mut pattern = entry.lock().unwrap_or_else(|e| e.into_inner());
        if !pattern.status.can_transition_to(PatternStatus::Pilot) {
            return Err(EngineError::IllegalTransition {
                pattern: pattern_id.to_string(),
                from: pattern.status,
                to: PatternStatus::Pilot,
            });
        }
        pattern.pilot_targets = pilot_targets.into_iter().collect();
        let targets: Vec<TargetId> = pattern.pilot_targets.iter().cloned().collect();
        let result = apply_locked(&mut pattern, &targets, mutator);
        pattern.status = PatternStatus::Pilot;
        info!(pattern = pattern_id, pilots = targets.len(), "pilot started");
        Ok(result)
    }

    /// Apply the pattern to each target not already applied.
    ///
    /// Already-applied targets are skipped silently; a failing target is
    /// logged and skipped. Never aborts the batch.
    pub fn apply_pattern(
        &self,
        pattern_id: &str,
        targets: &[TargetId],
        mutator: &dyn ContentMutator,
    ) -> Result<ApplyResult> {
        let entry = self.entry(pattern_id)?;
        let mut pattern = entry.lock().unwrap_or_else(|e| e.into_inner());
        Ok(apply_locked(&mut pattern, targets, mutator))
    }

    /// Record a winner verdict as qualifying evidence for this pattern.
    ///
    /// Only a verdict that cleared every scaling gate marks the pattern
    /// `qualified`; `best_observed_lift` tracks the highest lift seen either
    /// way.
    pub fn record_verdict(&self, pattern_id: &str, verdict: &WinnerVerdict) -> Result<()> {
        let entry = self.entry(pattern_id)?;
        let mut pattern = entry.lock().unwrap_or_else(|e| e.into_inner());
        let best = pattern.best_observed_lift.unwrap_or(f64::NEG_INFINITY);
        if verdict.lift > best {
            pattern.best_observed_lift = Some(verdict.lift);
        }
        if verdict.ready_to_scale {
            pattern.qualified = true;
            debug!(pattern = pattern_id, lift = verdict.lift, "qualifying verdict recorded");
        }
        Ok(())
    }

    /// Advance the pattern's status.
    ///
    /// # Errors
    /// - `IllegalTransition` for any edge outside the legal table — rejected,
    ///   never silently coerced.
    /// - `NotQualified` for `Pilot -> Validated` without a recorded
    ///   qualifying verdict.
    pub fn promote(&self, pattern_id: &str, to: PatternStatus) -> Result<()> {
        let entry = self.entry(pattern_id)?;
        let mut pattern = entry.lock().unwrap_or_else(|e| e.into_inner());
        if !pattern.status.can_transition_to(to) {
            return Err(EngineError::IllegalTransition {
                pattern: pattern_id.to_string(),
                from: pattern.status,
                to,
            });
        }
        if to == PatternStatus::Validated && !pattern.qualified {
            return Err(EngineError::NotQualified(pattern_id.to_string()));
        }
        info!(pattern = pattern_id, from = %pattern.status, to = %to, "status change");
        pattern.status = to;
        Ok(())
    }

    /// Scale a validated pattern toward the full target universe.
    ///
    /// Candidates = universe − applied − pilot; pilot targets are explicitly
    /// excluded from the scale-out batch. Once the non-pilot universe is
    /// fully applied the pattern is promoted to `Production`.
    pub fn scale_pattern(
        &self,
        pattern_id: &str,
        mutator: &dyn ContentMutator,
    ) -> Result<ScaleOutcome> {
        let entry = self.entry(pattern_id)?;
        let mut pattern = entry.lock().unwrap_or_else(|e| e.into_inner());
        if pattern.status != PatternStatus::Validated {
            return Err(EngineError::IllegalTransition {
                pattern: pattern_id.to_string(),
                from: pattern.status,
                to: PatternStatus::Production,
            });
        }

        let universe = self.universe.read().unwrap_or_else(|e| e.into_inner());
        let candidates: Vec<TargetId> = universe
            .iter()
            .filter(|t| !pattern.applied_targets.contains(*t) && !pattern.pilot_targets.contains(*t))
            .cloned()
            .collect();
        let non_pilot_total = universe
            .iter()
            .filter(|t| !pattern.pilot_targets.contains(*t))
            .count();
        drop(universe);

        let result = apply_locked(&mut pattern, &candidates, mutator);
        pattern.last_scaled_at = Some(Utc::now());

        let applied_non_pilot = pattern
            .applied_targets
            .iter()
            .filter(|t| !pattern.pilot_targets.contains(*t))
            .count();
        let reached_production = applied_non_pilot == non_pilot_total;
        if reached_production {
            info!(pattern = pattern_id, targets = non_pilot_total, "fully scaled, production");
            pattern.status = PatternStatus::Production;
        } else {
            warn!(
                pattern = pattern_id,
                failed = result.failed.len(),
                "scale-out incomplete; failed targets will retry next cycle"
            );
        }

        Ok(ScaleOutcome {
            pattern_id: pattern_id.to_string(),
            candidates,
            result,
            reached_production,
        })
    }
}

/// Shared application loop; caller holds the pattern's mutex.
fn apply_locked(
    pattern: &mut Pattern,
    targets: &[TargetId],
    mutator: &dyn ContentMutator,
) -> ApplyResult {
    let mut result = ApplyResult {
        applied: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };
    for target in targets {
        if pattern.is_applied(target) {
            result.skipped.push(target.clone());
            continue;
        }
        match mutator.mutate(target, &pattern.id) {
            Ok(()) => {
                pattern.applied_targets.insert(target.clone());
                result.applied.push(target.clone());
            }
            Err(reason) => {
                warn!(pattern = %pattern.id, target = %target, %reason, "mutation failed, skipping");
                result.failed.push((target.clone(), reason));
            }
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
