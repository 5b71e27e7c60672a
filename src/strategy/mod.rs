//! # Module: strategy
//!
//! The feedback half of the engine: what happened, and what to change next.
//!
//! ## Sub-modules
//! - [`tracker`] — append-only per-iteration outcome history
//! - [`optimizer`] — trend analysis, saturation detection, cadence/threshold
//!   recommendations

pub mod optimizer;
pub mod tracker;
