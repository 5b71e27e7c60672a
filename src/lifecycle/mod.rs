//! # Module: lifecycle
//!
//! The pattern catalog and everything that moves it: proposal generation,
//! idempotent application, status transitions, and scale-out.
//!
//! ## Sub-modules
//! - [`pattern`] — pattern model and the legal transition table
//! - [`manager`] — registry, [`manager::ContentMutator`] boundary, scaling
//! - [`candidates`] — ranked proposal generation for exploratory mode

pub mod candidates;
pub mod manager;
pub mod pattern;
