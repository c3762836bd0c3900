//! # tiermem Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together and documenting their relationships.
//! Constants that depend on each other are co-located to prevent mismatch
//! bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! THRESHOLD_STEP_NORMAL (0.05)
//!       │
//!       └─> THRESHOLD_STEP_AGGRESSIVE (must be exactly 5x normal)
//!             The controller switches between the two based on whether the
//!             ratio deviation improved since the previous adjustment cycle.
//!
//! RATIO_DEAD_BAND (0.02)
//!       │
//!       └─> Deviations at or below this never move the threshold. Must be
//!           small relative to any realistic target ratio or the controller
//!           parks permanently.
//!
//! USAGE_CHURN_FLOOR (100 bytes)
//!       │
//!       └─> Total-usage movement at or below this skips the whole
//!           adjustment cycle (checkpoint still advances).
//!
//! LOG_HEADER_SIZE (64 bytes)
//!       │
//!       ├─> Must equal size_of::<LogHeader>() (compile-time asserted in
//!       │   storage::bounded_log)
//!       │
//!       └─> Backing file length = LOG_HEADER_SIZE + capacity
//!
//! DRAIN_CHUNK_SIZE (8192 bytes)
//!       │
//!       └─> Granularity of drain-sink callbacks during log overflow. Logs
//!           smaller than one chunk drain in a single callback.
//!
//! HEAP_ALLOC_QUANTUM (16 bytes)
//!       │
//!       └─> Usable-size rounding of the built-in heap backend. Must be a
//!           power of two and a valid allocation alignment.
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions at the bottom of this file:
//!
//! 1. `THRESHOLD_STEP_AGGRESSIVE == 5.0 * THRESHOLD_STEP_NORMAL`
//! 2. `HEAP_ALLOC_QUANTUM` is a nonzero power of two
//! 3. `BLOCK_SHARD_COUNT` is a nonzero power of two (shard index is a mask)
//! 4. `MIN_LOG_CAPACITY >= DRAIN_CHUNK_SIZE` is NOT required; tiny logs are
//!    legal and drain in one callback
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{THRESHOLD_STEP_NORMAL, RATIO_DEAD_BAND};
//! ```

// ============================================================================
// THRESHOLD CONTROLLER
// These constants are tightly coupled - changing one may require changing
// others
// ============================================================================

/// Fractional threshold step applied when the ratio deviation is shrinking
/// (the workload is already converging toward the target).
pub const THRESHOLD_STEP_NORMAL: f64 = 0.05;

/// Fractional threshold step applied when the ratio deviation is growing.
/// MUST be exactly five times [`THRESHOLD_STEP_NORMAL`]; the convergence
/// tests encode this ratio.
pub const THRESHOLD_STEP_AGGRESSIVE: f64 = THRESHOLD_STEP_NORMAL * 5.0;

/// Ratio deviations at or below this value are treated as "on target" and
/// never move the threshold. Prevents oscillation around the setpoint.
pub const RATIO_DEAD_BAND: f64 = 0.02;

/// Total-usage movement (bytes, absolute) at or below this skips the whole
/// adjustment cycle. Avoids retuning the threshold on negligible churn.
pub const USAGE_CHURN_FLOOR: usize = 100;

/// Default number of scheduler ticks between adjustment cycles under the
/// ratio-target policy.
pub const DEFAULT_CHECK_PERIOD: u64 = 10;

/// Default fast:persistent target when the host does not configure one.
pub const DEFAULT_TARGET_RATIO: f64 = 1.0;

// ============================================================================
// BOUNDED LOG LAYOUT
// ============================================================================

/// On-disk size of the bounded log header. The data region starts at this
/// offset; the backing file is exactly `LOG_HEADER_SIZE + capacity` bytes.
pub const LOG_HEADER_SIZE: usize = 64;

/// Magic bytes identifying a tiermem bounded log file.
pub const LOG_MAGIC: &[u8; 8] = b"TMEMLOG\x00";

/// Current on-disk format version.
pub const LOG_FORMAT_VERSION: u32 = 1;

/// Smallest capacity a log may be created with. Below this the overflow
/// protocol degenerates to draining on every append.
pub const MIN_LOG_CAPACITY: u64 = 64;

/// Granularity of drain-sink callbacks. The drain walks the log contents in
/// append order, handing the sink one chunk of at most this many bytes per
/// callback; the final chunk may be shorter.
pub const DRAIN_CHUNK_SIZE: usize = 8192;

// ============================================================================
// ALLOCATION ROUTING
// ============================================================================

/// Usable-size rounding granularity of the built-in heap backend. Allocator
/// bins never hand back fewer bytes than requested, so the credited usable
/// size is the request rounded up to this quantum.
pub const HEAP_ALLOC_QUANTUM: usize = 16;

/// Number of shards in the pointer-to-tier side table. Shard selection masks
/// the pointer hash, so this must be a power of two.
pub const BLOCK_SHARD_COUNT: usize = 64;

const _: () = assert!(
    THRESHOLD_STEP_AGGRESSIVE == THRESHOLD_STEP_NORMAL * 5.0,
    "aggressive step must be exactly five times the normal step"
);

const _: () = assert!(
    HEAP_ALLOC_QUANTUM.is_power_of_two(),
    "HEAP_ALLOC_QUANTUM must be a power of two to serve as an alignment"
);

const _: () = assert!(
    BLOCK_SHARD_COUNT.is_power_of_two(),
    "BLOCK_SHARD_COUNT must be a power of two: shard index is hash & (N-1)"
);

const _: () = assert!(
    RATIO_DEAD_BAND > 0.0,
    "a zero dead band makes the controller oscillate around the target"
);
