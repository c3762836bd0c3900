//! # Usage Accounting
//!
//! This module tracks live bytes per memory tier. It is pure bookkeeping:
//! the allocation router credits a block's usable size when a tier hands the
//! block out and debits the same quantity when the block is resized or
//! released, and the threshold controller reads the per-tier totals once per
//! adjustment cycle.
//!
//! ## Enforcement Model
//!
//! Unlike a budget, the accountant never refuses anything; admission is the
//! backing allocator's job. Its only contract is that after any sequence of
//! allocate/resize/release calls, `total(tier)` equals the sum of usable
//! sizes of the blocks currently live in that tier.
//!
//! ## Thread Safety
//!
//! All counters are atomics with acquire/release ordering; credit and debit
//! are lock-free and safe under concurrent callers from multiple allocation
//! threads. No operation blocks on another caller.

mod accountant;

pub use accountant::{Tier, UsageAccountant, UsageStats};
