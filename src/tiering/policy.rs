//! # Placement Policies and the Threshold Controller
//!
//! Four mutually exclusive placement policies, selected once at construction:
//!
//! 1. **AlwaysFast** - threshold pinned at `usize::MAX`; everything routes to
//!    the fast tier.
//! 2. **AlwaysPersistent** - threshold pinned at zero; everything routes to
//!    the persistent tier.
//! 3. **StaticThreshold** - threshold fixed at a configured constant.
//! 4. **RatioTarget** - threshold starts at a configured value and is
//!    retuned every `check_period` ticks to steer the live persistent:fast
//!    byte ratio toward a configured target.
//!
//! ## Control Loop
//!
//! Only RatioTarget runs the periodic cycle. Each cycle:
//!
//! 1. Read per-tier usage; skip entirely when total usage moved by no more
//!    than [`USAGE_CHURN_FLOOR`] bytes since the previous cycle.
//! 2. Compute the current persistent:fast ratio (fast usage floored at one
//!    byte) and its absolute deviation from the target.
//! 3. Deviations within [`RATIO_DEAD_BAND`] leave the threshold alone.
//! 4. Otherwise scale a base step by `current_ratio / target_ratio`: the
//!    normal 5% step while the deviation is shrinking against the previous
//!    cycle's checkpoint, the aggressive 25% step while it is growing.
//! 5. Too much persistent usage raises the threshold (pushing future
//!    allocations toward fast), too little lowers it. A candidate outside
//!    `[min_threshold, max_threshold]` is rejected for the cycle; the
//!    threshold holds its current value rather than clamping, keeping the
//!    configured bounds as hard rails.
//!
//! ## First Cycle
//!
//! The deviation checkpoint starts at zero, so the first adjustment can
//! never observe an "improving" trend and always takes the aggressive step.
//! This is deliberate: a freshly started controller has no history and the
//! workload is by definition unconverged.
//!
//! ## Scheduling Contract
//!
//! `tick()` is driven by one cooperative periodic task. It is non-reentrant:
//! a cycle that collides with an in-progress one is skipped, never queued.
//! Allocation paths read the threshold with a single atomic load and never
//! wait on a cycle.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use eyre::{bail, ensure, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::{
    DEFAULT_CHECK_PERIOD, DEFAULT_TARGET_RATIO, RATIO_DEAD_BAND, THRESHOLD_STEP_AGGRESSIVE,
    THRESHOLD_STEP_NORMAL, USAGE_CHURN_FLOOR,
};
use crate::memory::{Tier, UsageAccountant};

/// Placement policy, fixed for the lifetime of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    AlwaysFast,
    AlwaysPersistent,
    StaticThreshold,
    RatioTarget,
}

impl MemoryPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryPolicy::AlwaysFast => "always_fast",
            MemoryPolicy::AlwaysPersistent => "always_persistent",
            MemoryPolicy::StaticThreshold => "static_threshold",
            MemoryPolicy::RatioTarget => "ratio_target",
        }
    }
}

impl FromStr for MemoryPolicy {
    type Err = eyre::Report;

    /// An unrecognized policy name is a startup invariant violation for the
    /// host; there is no recoverable fallback policy.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "always_fast" => Ok(MemoryPolicy::AlwaysFast),
            "always_persistent" => Ok(MemoryPolicy::AlwaysPersistent),
            "static_threshold" => Ok(MemoryPolicy::StaticThreshold),
            "ratio_target" => Ok(MemoryPolicy::RatioTarget),
            other => bail!("unrecognized memory policy {:?}", other),
        }
    }
}

/// Controller configuration. Which fields matter depends on the policy:
/// `static_threshold` under StaticThreshold; the threshold bounds, target
/// ratio, and check period under RatioTarget.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub policy: MemoryPolicy,
    pub static_threshold: usize,
    pub initial_threshold: usize,
    pub min_threshold: usize,
    pub max_threshold: usize,
    pub target_ratio: f64,
    pub check_period: u64,
}

impl ThresholdConfig {
    pub fn always_fast() -> Self {
        Self {
            policy: MemoryPolicy::AlwaysFast,
            ..Self::base()
        }
    }

    pub fn always_persistent() -> Self {
        Self {
            policy: MemoryPolicy::AlwaysPersistent,
            ..Self::base()
        }
    }

    pub fn static_threshold(bytes: usize) -> Self {
        Self {
            policy: MemoryPolicy::StaticThreshold,
            static_threshold: bytes,
            ..Self::base()
        }
    }

    pub fn ratio_target(
        initial_threshold: usize,
        min_threshold: usize,
        max_threshold: usize,
        target_ratio: f64,
        check_period: u64,
    ) -> Self {
        Self {
            policy: MemoryPolicy::RatioTarget,
            initial_threshold,
            min_threshold,
            max_threshold,
            target_ratio,
            check_period,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            policy: MemoryPolicy::AlwaysFast,
            static_threshold: 0,
            initial_threshold: 0,
            min_threshold: 0,
            max_threshold: usize::MAX,
            target_ratio: DEFAULT_TARGET_RATIO,
            check_period: DEFAULT_CHECK_PERIOD,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy != MemoryPolicy::RatioTarget {
            return Ok(());
        }

        ensure!(
            self.target_ratio.is_finite() && self.target_ratio > 0.0,
            "target_ratio must be a finite value greater than zero, got {}",
            self.target_ratio
        );
        ensure!(
            self.min_threshold <= self.max_threshold,
            "min_threshold {} exceeds max_threshold {}",
            self.min_threshold,
            self.max_threshold
        );
        ensure!(
            (self.min_threshold..=self.max_threshold).contains(&self.initial_threshold),
            "initial_threshold {} outside [{}, {}]",
            self.initial_threshold,
            self.min_threshold,
            self.max_threshold
        );
        ensure!(self.check_period >= 1, "check_period must be at least one tick");

        Ok(())
    }
}

/// Controller state observed at the previous adjustment cycle. Used only to
/// decide whether the deviation is improving (normal step) or degrading
/// (aggressive step). Never persisted.
#[derive(Debug, Default)]
struct RatioCheckpoint {
    ratio_diff: f64,
    total_used: usize,
}

/// The adaptive threshold controller.
///
/// Owns the routing threshold. Allocation paths read it through
/// [`placement`](Self::placement) / [`threshold`](Self::threshold) with a
/// single atomic load; the periodic [`tick`](Self::tick) is the only writer.
#[derive(Debug)]
pub struct ThresholdController {
    config: ThresholdConfig,
    threshold: AtomicUsize,
    ticks: AtomicU64,
    checkpoint: Mutex<RatioCheckpoint>,
}

impl ThresholdController {
    pub fn new(config: ThresholdConfig) -> Result<Self> {
        config.validate()?;

        let initial = match config.policy {
            MemoryPolicy::AlwaysFast => usize::MAX,
            MemoryPolicy::AlwaysPersistent => 0,
            MemoryPolicy::StaticThreshold => config.static_threshold,
            MemoryPolicy::RatioTarget => config.initial_threshold,
        };

        Ok(Self {
            config,
            threshold: AtomicUsize::new(initial),
            ticks: AtomicU64::new(0),
            checkpoint: Mutex::new(RatioCheckpoint::default()),
        })
    }

    pub fn policy(&self) -> MemoryPolicy {
        self.config.policy
    }

    /// Current routing threshold. A cheap atomic load, safe on hot paths.
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Acquire)
    }

    /// Tier for a request of `size` bytes: at or above the threshold routes
    /// persistent, below it fast. Unconditional under the two fixed
    /// policies.
    pub fn placement(&self, size: usize) -> Tier {
        match self.config.policy {
            MemoryPolicy::AlwaysFast => Tier::Fast,
            MemoryPolicy::AlwaysPersistent => Tier::Persistent,
            MemoryPolicy::StaticThreshold | MemoryPolicy::RatioTarget => {
                if size >= self.threshold() {
                    Tier::Persistent
                } else {
                    Tier::Fast
                }
            }
        }
    }

    /// Advance the controller clock by one tick. Every `check_period` ticks
    /// under RatioTarget this runs one adjustment cycle; under every other
    /// policy it is a no-op.
    pub fn tick(&self, accountant: &UsageAccountant) {
        if self.config.policy != MemoryPolicy::RatioTarget {
            return;
        }

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if tick % self.config.check_period != 0 {
            return;
        }

        // Non-reentrant: a cycle colliding with an in-progress one is
        // skipped until the schedule comes around again.
        let Some(mut checkpoint) = self.checkpoint.try_lock() else {
            return;
        };

        self.adjust(accountant, &mut checkpoint);
    }

    fn adjust(&self, accountant: &UsageAccountant, checkpoint: &mut RatioCheckpoint) {
        let persistent_used = accountant.total(Tier::Persistent);
        let fast_used = accountant.total(Tier::Fast);
        let total_used = persistent_used + fast_used;

        if total_used.abs_diff(checkpoint.total_used) > USAGE_CHURN_FLOOR {
            let target_ratio = self.config.target_ratio;
            let current_ratio = persistent_used as f64 / fast_used.max(1) as f64;
            let ratio_diff = (current_ratio - target_ratio).abs();

            if ratio_diff > RATIO_DEAD_BAND {
                let multiplier = current_ratio / target_ratio;
                let step = if ratio_diff < checkpoint.ratio_diff {
                    multiplier * THRESHOLD_STEP_NORMAL
                } else {
                    multiplier * THRESHOLD_STEP_AGGRESSIVE
                };

                let threshold = self.threshold.load(Ordering::Acquire);
                if target_ratio < current_ratio {
                    // Too much persistent usage: raise the threshold so more
                    // requests stay in the fast tier.
                    let higher = ((1.0 + step) * threshold as f64).ceil();
                    if higher <= self.config.max_threshold as f64 {
                        let higher = higher as usize;
                        self.threshold.store(higher, Ordering::Release);
                        debug!(
                            from = threshold,
                            to = higher,
                            ratio = current_ratio,
                            "raised placement threshold"
                        );
                    }
                } else {
                    let lower = ((1.0 - step) * threshold as f64).floor();
                    if lower >= self.config.min_threshold as f64 {
                        let lower = lower as usize;
                        self.threshold.store(lower, Ordering::Release);
                        debug!(
                            from = threshold,
                            to = lower,
                            ratio = current_ratio,
                            "lowered placement threshold"
                        );
                    }
                }
            }
            checkpoint.ratio_diff = ratio_diff;
        }
        checkpoint.total_used = total_used;
    }
}
