//! # tiermem Configuration Module
//!
//! This module centralizes all tuning constants for tiermem. Constants are
//! grouped by their functional area and interdependencies are documented and
//! enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The threshold controller, the allocation router, and the bounded log share
//! several values that must stay in agreement. For example, the aggressive
//! controller step is defined as five times the normal step; if the two drift
//! apart, the controller reacts to diverging workloads at a different rate
//! than the convergence tests assert. Co-locating the values and adding
//! compile-time checks prevents such mismatches.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency notes
//!
//! Runtime policy configuration (which placement policy to run, threshold
//! bounds, target ratio, check period) is per-instance state, not a constant,
//! and lives in [`crate::tiering::ThresholdConfig`].

pub mod constants;
pub use constants::*;
