//! # Module: evaluate
//!
//! Pure statistical decision-making over immutable arm snapshots.
//!
//! ## Sub-modules
//! - [`significance`] — chi-square two-proportion test, confidence intervals
//! - [`winner`] — best-arm selection and scale-eligibility gating

pub mod significance;
pub mod winner;
