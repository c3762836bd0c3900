//! # Tiered Allocation Routing
//!
//! This module decides, per allocation, which of two heterogeneous backing
//! stores serves the request, and keeps that decision boundary tuned to a
//! configured usage ratio between the stores.
//!
//! ## Architecture Overview
//!
//! ```text
//! +-----------------------------------------------------------+
//! |                     TieredAllocator                       |
//! |                                                           |
//! |  allocate(n) ──> placement(n) ──> TierBackend::allocate   |
//! |                      │                    │               |
//! |                      │ atomic load        │ usable size   |
//! |                      v                    v               |
//! |            ThresholdController      UsageAccountant       |
//! |                      ^                    │               |
//! |                      └──── tick() ────────┘               |
//! +-----------------------------------------------------------+
//! ```
//!
//! Requests of at least the current threshold route to the persistent tier,
//! smaller ones to the fast tier. A periodic tick compares the live
//! persistent:fast byte ratio against the configured target and nudges the
//! threshold up or down with hysteresis: a small step while the deviation is
//! shrinking, a five-fold step while it is growing.
//!
//! ## Placement Is Final
//!
//! A block's tier is fixed at allocation time. Resizes stay within the
//! original tier even when the new size would route differently, and no
//! cross-tier fallback is attempted when the selected tier reports
//! out-of-memory.
//!
//! ## Module Organization
//!
//! - `backend`: the opaque allocate/resize/release capability each tier
//!   provides, plus the built-in heap-backed implementation
//! - `policy`: placement policies and the adaptive threshold controller
//! - `router`: the allocator facade that ties backends, controller, and
//!   accountant together
//!
//! ## Thread Safety
//!
//! Allocation paths read the threshold with a single atomic load and update
//! usage with atomic counters; no allocation ever blocks on a controller
//! tick. The tick itself is non-reentrant: a cycle that collides with an
//! in-progress one is skipped, never queued.

mod backend;
mod policy;
mod router;

pub use backend::{AllocError, Allocation, HeapBackend, TierBackend};
pub use policy::{MemoryPolicy, ThresholdConfig, ThresholdController};
pub use router::TieredAllocator;
