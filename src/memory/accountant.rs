//! # Per-Tier Usage Accountant
//!
//! Live-byte counters for the two memory tiers.
//!
//! ## Design Principles
//!
//! 1. **Usable sizes, not requested sizes**: the router credits what the
//!    backing allocator actually handed out (which may exceed the request due
//!    to internal rounding), and debits exactly the credited quantity later.
//! 2. **Thread Safety**: counters use atomics for lock-free operation.
//! 3. **Underflow guard**: a debit larger than the current counter is a
//!    caller invariant violation; the counter saturates at zero instead of
//!    wrapping so a single bad debit cannot poison every later reading.
//!
//! ## What Is Tracked
//!
//! Only bytes owned by blocks routed through [`crate::tiering`]. Allocations
//! the host performs behind the router's back are invisible here.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Identity of a backing store. Selected once per allocation and never
/// changed afterwards; blocks do not migrate between tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Fast volatile store (DRAM).
    Fast,
    /// Slower persistent-capacity store (PMEM).
    Persistent,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Persistent => "persistent",
        }
    }
}

/// Point-in-time snapshot of per-tier usage.
#[derive(Debug, Clone)]
pub struct UsageStats {
    pub fast_used: usize,
    pub persistent_used: usize,
}

impl UsageStats {
    pub fn total(&self) -> usize {
        self.fast_used + self.persistent_used
    }

    /// Persistent:fast usage ratio, the quantity the threshold controller
    /// steers. Fast usage is floored at one byte to keep the ratio finite.
    pub fn persistent_to_fast_ratio(&self) -> f64 {
        self.persistent_used as f64 / self.fast_used.max(1) as f64
    }
}

impl std::fmt::Display for UsageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fast:{},persistent:{},ratio:{:.3}",
            self.fast_used,
            self.persistent_used,
            self.persistent_to_fast_ratio()
        )
    }
}

/// Live-byte counters, one per tier.
#[derive(Debug, Default)]
pub struct UsageAccountant {
    fast_used: AtomicUsize,
    persistent_used: AtomicUsize,
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self {
            fast_used: AtomicUsize::new(0),
            persistent_used: AtomicUsize::new(0),
        }
    }

    fn counter(&self, tier: Tier) -> &AtomicUsize {
        match tier {
            Tier::Fast => &self.fast_used,
            Tier::Persistent => &self.persistent_used,
        }
    }

    /// Record `bytes` newly live in `tier`.
    pub fn credit(&self, tier: Tier, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.counter(tier).fetch_add(bytes, Ordering::AcqRel);
    }

    /// Record `bytes` no longer live in `tier`. Saturates at zero: debiting
    /// more than was credited is a caller bug, and wrapping would corrupt
    /// every subsequent total.
    pub fn debit(&self, tier: Tier, bytes: usize) {
        if bytes == 0 {
            return;
        }

        let counter = self.counter(tier);

        loop {
            let current = counter.load(Ordering::Acquire);
            debug_assert!(
                current >= bytes,
                "debit of {} bytes from {} tier holding only {}",
                bytes,
                tier.name(),
                current
            );
            let new_value = current.saturating_sub(bytes);

            match counter.compare_exchange_weak(
                current,
                new_value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(_) => continue,
            }
        }
    }

    /// Current live bytes in `tier`.
    pub fn total(&self, tier: Tier) -> usize {
        self.counter(tier).load(Ordering::Acquire)
    }

    /// Current live bytes across both tiers.
    pub fn total_all(&self) -> usize {
        self.total(Tier::Fast) + self.total(Tier::Persistent)
    }

    pub fn stats(&self) -> UsageStats {
        UsageStats {
            fast_used: self.total(Tier::Fast),
            persistent_used: self.total(Tier::Persistent),
        }
    }
}
