//! Engine-wide error type.
//!
//! Every fallible public operation returns [`Result`]. Errors carry enough
//! context to log without a backtrace; recoverable per-target mutation
//! failures are NOT errors here — they surface in `ApplyResult::failed` so a
//! batch can continue.

use thiserror::Error;

use crate::lifecycle::pattern::PatternStatus;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown arm '{0}'")]
    UnknownArm(String),

    #[error("unknown experiment '{0}'")]
    UnknownExperiment(String),

    #[error("unknown pattern '{0}'")]
    UnknownPattern(String),

    /// The delta would leave an arm with more conversions than views. The
    /// counters are left untouched; the record is rejected, never clamped.
    #[error("invalid delta for arm '{arm}': {conversions} conversions > {views} views")]
    InvalidDelta {
        arm: String,
        views: u64,
        conversions: u64,
    },

    #[error("illegal transition for pattern '{pattern}': {from} -> {to}")]
    IllegalTransition {
        pattern: String,
        from: PatternStatus,
        to: PatternStatus,
    },

    /// Promotion to `Validated` was attempted without a recorded qualifying
    /// verdict.
    #[error("pattern '{0}' has no qualifying verdict on record")]
    NotQualified(String),

    #[error("corrupt registry entry for pattern '{pattern}': {reason}")]
    CorruptEntry { pattern: String, reason: String },

    #[error("metrics source failure: {0}")]
    MetricsSource(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("state store failure: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = EngineError::InvalidDelta {
            arm: "control".into(),
            views: 10,
            conversions: 11,
        };
        let msg = err.to_string();
        assert!(msg.contains("control"));
        assert!(msg.contains("11"));
    }

    #[test]
    fn test_illegal_transition_names_both_states() {
        let err = EngineError::IllegalTransition {
            pattern: "p1".into(),
            from: PatternStatus::Exploratory,
            to: PatternStatus::Production,
        };
        assert_eq!(
            err.to_string(),
            "illegal transition for pattern 'p1': exploratory -> production"
        );
    }
}
