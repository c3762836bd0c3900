//! # tiermem - Adaptive Two-Tier Memory Routing
//!
//! tiermem routes memory allocations across two heterogeneous backing
//! stores - a fast volatile store ("DRAM") and a slower persistent-capacity
//! store ("PMEM") - and keeps a configured usage ratio between them under
//! changing workload. It also provides the capacity-bounded persistent log
//! used to buffer writes when the persistent store acts as a durable
//! overflow target.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tiermem::{ThresholdConfig, TieredAllocator};
//!
//! let allocator = TieredAllocator::with_heap_backends(
//!     ThresholdConfig::ratio_target(
//!         64,        // initial threshold (bytes)
//!         16,        // min threshold
//!         4096,      // max threshold
//!         1.0,       // target persistent:fast ratio
//!         10,        // adjustment every 10 ticks
//!     ),
//! )?;
//!
//! let block = allocator.allocate(128)?;        // routes by size
//! allocator.tick();                            // from a periodic task
//! unsafe { allocator.release(block) };
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------+
//! |                 Host (server, cache, ...)               |
//! +---------------------------------------------------------+
//! |        TieredAllocator (routing + tier recovery)         |
//! +------------------------+--------------------------------+
//! |  ThresholdController   |        UsageAccountant          |
//! |  (adaptive placement)  |   (per-tier live-byte atomics)  |
//! +------------------------+--------------------------------+
//! |   TierBackend (fast)   |    TierBackend (persistent)     |
//! +------------------------+--------------------------------+
//!
//!              BoundedLog (independent; durable
//!              overflow buffer with drain protocol)
//! ```
//!
//! Every allocation consults the controller's threshold with one atomic
//! load: requests at or above it go to the persistent tier, smaller ones to
//! the fast tier. A periodic tick compares the live persistent:fast byte
//! ratio against the target and retunes the threshold with hysteresis - a
//! 5% step while converging, a 25% step while diverging, both scaled by how
//! far off the ratio is, and both confined to hard min/max rails.
//!
//! The bounded log is independent of the routing path: it is a fixed-
//! capacity append file whose overflow protocol drains the full contents to
//! an external sink before any byte is overwritten.
//!
//! ## Module Overview
//!
//! - [`config`]: centralized tuning constants
//! - [`memory`]: per-tier usage accounting
//! - [`tiering`]: backends, placement policies, threshold controller, router
//! - [`storage`]: the capacity-bounded persistent log
//!
//! ## Non-Goals
//!
//! tiermem does not implement the allocation algorithm inside either backing
//! store (backends are opaque capabilities), never migrates a block between
//! tiers after placement, and never falls back to the other tier when the
//! selected one reports out-of-memory.

pub mod config;
pub mod memory;
pub mod storage;
pub mod tiering;

pub use memory::{Tier, UsageAccountant, UsageStats};
pub use storage::{BoundedLog, DrainSink, LogError};
pub use tiering::{
    AllocError, Allocation, HeapBackend, MemoryPolicy, ThresholdConfig, ThresholdController,
    TierBackend, TieredAllocator,
};
