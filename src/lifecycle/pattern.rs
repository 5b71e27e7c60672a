//! Pattern model and the legal status-transition table.
//!
//! A pattern is a reusable content modification applied to many targets. It
//! moves through a one-way lifecycle; `applied_targets` only ever grows, and
//! a `(pattern, target)` pair is an idempotency key.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PatternStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a pattern.
///
/// `Retired` is the demotion path for a production pattern whose
/// effectiveness regresses. It is only ever entered through an explicit
/// `promote(.., Retired)` call — the optimizer may *suggest* retirement but
/// never triggers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    /// Hypothesis only; no targets assigned.
    Exploratory,
    /// Assigned to a small pilot subset.
    Pilot,
    /// Pilot experiment was significant and cleared the improvement floor.
    Validated,
    /// Scaled to the full (non-pilot) target universe.
    Production,
    /// Demoted after post-production regression.
    Retired,
}

impl PatternStatus {
    /// `true` when `self -> to` is in the legal transition table.
    pub fn can_transition_to(self, to: PatternStatus) -> bool {
        matches!(
            (self, to),
            (PatternStatus::Exploratory, PatternStatus::Pilot)
                | (PatternStatus::Pilot, PatternStatus::Validated)
                | (PatternStatus::Validated, PatternStatus::Production)
                | (PatternStatus::Production, PatternStatus::Retired)
        )
    }
}

impl std::fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternStatus::Exploratory => write!(f, "exploratory"),
            PatternStatus::Pilot => write!(f, "pilot"),
            PatternStatus::Validated => write!(f, "validated"),
            PatternStatus::Production => write!(f, "production"),
            PatternStatus::Retired => write!(f, "retired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// A stable identifier for an addressable surface a pattern can be applied
/// to (e.g. a page).
pub type TargetId = String;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub status: PatternStatus,
    /// Monotonically non-decreasing — patterns are never un-applied.
    pub applied_targets: BTreeSet<TargetId>,
    /// The pilot subset; excluded from scale-out batches.
    pub pilot_targets: BTreeSet<TargetId>,
    pub created_at: DateTime<Utc>,
    pub last_scaled_at: Option<DateTime<Utc>>,
    /// Highest lift observed in any qualifying verdict.
    pub best_observed_lift: Option<f64>,
    /// Set once a verdict cleared every scaling gate; required evidence for
    /// promotion to `Validated`.
    pub qualified: bool,
}

impl Pattern {
    /// Create a fresh exploratory pattern with only a hypothesis.
    pub fn exploratory(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: PatternStatus::Exploratory,
            applied_targets: BTreeSet::new(),
            pilot_targets: BTreeSet::new(),
            created_at: Utc::now(),
            last_scaled_at: None,
            best_observed_lift: None,
            qualified: false,
        }
    }

    /// `true` when the pattern has already been applied to `target`.
    pub fn is_applied(&self, target: &str) -> bool {
        self.applied_targets.contains(target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_forward_chain() {
        assert!(PatternStatus::Exploratory.can_transition_to(PatternStatus::Pilot));
        assert!(PatternStatus::Pilot.can_transition_to(PatternStatus::Validated));
        assert!(PatternStatus::Validated.can_transition_to(PatternStatus::Production));
        assert!(PatternStatus::Production.can_transition_to(PatternStatus::Retired));
    }

    #[test]
    fn test_skipping_stages_illegal() {
        assert!(!PatternStatus::Exploratory.can_transition_to(PatternStatus::Production));
        assert!(!PatternStatus::Exploratory.can_transition_to(PatternStatus::Validated));
        assert!(!PatternStatus::Pilot.can_transition_to(PatternStatus::Production));
    }

    #[test]
    fn test_backward_transitions_illegal() {
        assert!(!PatternStatus::Production.can_transition_to(PatternStatus::Pilot));
        assert!(!PatternStatus::Validated.can_transition_to(PatternStatus::Exploratory));
        assert!(!PatternStatus::Retired.can_transition_to(PatternStatus::Production));
    }

    #[test]
    fn test_self_transition_illegal() {
        assert!(!PatternStatus::Pilot.can_transition_to(PatternStatus::Pilot));
    }

    #[test]
    fn test_retirement_only_from_production() {
        assert!(!PatternStatus::Pilot.can_transition_to(PatternStatus::Retired));
        assert!(!PatternStatus::Validated.can_transition_to(PatternStatus::Retired));
    }

    #[test]
    fn test_exploratory_pattern_starts_empty() {
        let p = Pattern::exploratory("p1", "Sticky CTA");
        assert_eq!(p.status, PatternStatus::Exploratory);
        assert!(p.applied_targets.is_empty());
        assert!(p.pilot_targets.is_empty());
        assert!(!p.qualified);
    }

    #[test]
    fn test_serde_roundtrip() {
        let p = Pattern::exploratory("p1", "Sticky CTA");
        let json = serde_json::to_string(&p).unwrap();
        let back: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
