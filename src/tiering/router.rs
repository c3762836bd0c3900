//! # Allocation Router
//!
//! [`TieredAllocator`] is the facade the host allocates through. It consults
//! the threshold controller for a tier, invokes that tier's backend, and
//! keeps the usage accountant synchronized with the tier-reported usable
//! sizes.
//!
//! ## Tier Recovery on Free
//!
//! Release and resize must determine a block's tier without being told by
//! the caller. Instead of tagging each block with an in-band prefix header,
//! the router keeps an out-of-band side table mapping the block address to
//! its tier and last reported usable size. The table is sharded by address
//! to keep allocation threads from contending on one lock; no shard lock is
//! ever held across a backend call.
//!
//! ## Accounting Discipline
//!
//! - On allocate: credit the usable size the backend reported.
//! - On resize: debit the old usable size, credit the new one. Both happen
//!   on the success path only; a failed resize leaves block and counters
//!   untouched.
//! - On release: debit the recorded usable size, then release.
//!
//! A failed backend call never mutates counters or the side table.

use std::ptr::NonNull;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::BLOCK_SHARD_COUNT;
use crate::memory::{Tier, UsageAccountant, UsageStats};
use crate::tiering::backend::{AllocError, HeapBackend, TierBackend};
use crate::tiering::policy::{ThresholdConfig, ThresholdController};

#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    tier: Tier,
    usable_size: usize,
}

/// Routes allocate/resize/release requests across two tier backends.
pub struct TieredAllocator {
    fast: Box<dyn TierBackend>,
    persistent: Box<dyn TierBackend>,
    controller: ThresholdController,
    accountant: UsageAccountant,
    blocks: Vec<Mutex<HashMap<usize, BlockInfo>>>,
}

impl TieredAllocator {
    pub fn new(
        fast: Box<dyn TierBackend>,
        persistent: Box<dyn TierBackend>,
        config: ThresholdConfig,
    ) -> Result<Self> {
        let controller = ThresholdController::new(config)?;
        let blocks = (0..BLOCK_SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();

        Ok(Self {
            fast,
            persistent,
            controller,
            accountant: UsageAccountant::new(),
            blocks,
        })
    }

    /// Both tiers served by the process heap. The placement and accounting
    /// logic is identical to a DRAM/PMEM deployment; only the backing kinds
    /// differ.
    pub fn with_heap_backends(config: ThresholdConfig) -> Result<Self> {
        Self::new(Box::new(HeapBackend::new()), Box::new(HeapBackend::new()), config)
    }

    fn backend(&self, tier: Tier) -> &dyn TierBackend {
        match tier {
            Tier::Fast => self.fast.as_ref(),
            Tier::Persistent => self.persistent.as_ref(),
        }
    }

    fn shard(&self, addr: usize) -> &Mutex<HashMap<usize, BlockInfo>> {
        // Block addresses share low zero bits from alignment; shift them out
        // before masking so consecutive blocks spread across shards.
        &self.blocks[(addr >> 4) & (BLOCK_SHARD_COUNT - 1)]
    }

    fn lookup(&self, addr: usize) -> Option<BlockInfo> {
        self.shard(addr).lock().get(&addr).copied()
    }

    fn record(&self, addr: usize, info: BlockInfo) {
        self.shard(addr).lock().insert(addr, info);
    }

    fn forget(&self, addr: usize) -> Option<BlockInfo> {
        self.shard(addr).lock().remove(&addr)
    }

    fn allocate_in(&self, size: usize, zeroed: bool) -> Result<Option<NonNull<u8>>> {
        if size == 0 {
            return Ok(None);
        }

        let tier = self.controller.placement(size);
        let backend = self.backend(tier);
        let block = if zeroed {
            backend.allocate_zeroed(size)?
        } else {
            backend.allocate(size)?
        };

        self.record(
            block.ptr.as_ptr() as usize,
            BlockInfo {
                tier,
                usable_size: block.usable_size,
            },
        );
        self.accountant.credit(tier, block.usable_size);

        Ok(Some(block.ptr))
    }

    /// Allocate `size` bytes in the tier the current threshold selects.
    /// Zero-sized requests never produce a live block.
    pub fn allocate(&self, size: usize) -> Result<Option<NonNull<u8>>> {
        self.allocate_in(size, false)
    }

    /// Allocate `size` zeroed bytes in the tier the current threshold
    /// selects.
    pub fn allocate_zeroed(&self, size: usize) -> Result<Option<NonNull<u8>>> {
        self.allocate_in(size, true)
    }

    /// Resize a block in place of its owning tier; a block never migrates
    /// to the other tier, even when `new_size` would route differently.
    ///
    /// `new_size == 0` is equivalent to release; a null `ptr` degenerates to
    /// `allocate(new_size)`.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been returned by this allocator and still
    /// be live. On success the old pointer is invalidated.
    pub unsafe fn resize(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            self.release(Some(ptr));
            return Ok(None);
        }

        // The entry leaves the table before the backend call: the backend
        // may free the old block, and a concurrent allocate handed the same
        // address must not find a stale entry to collide with (or have its
        // fresh entry erased afterwards). The caller exclusively owns the
        // block for the duration of the call, so nothing can legitimately
        // look it up meanwhile.
        let addr = ptr.as_ptr() as usize;
        let Some(info) = self.forget(addr) else {
            bail!(AllocError::InvalidArgument { requested: new_size });
        };

        let block = match self.backend(info.tier).resize(ptr, info.usable_size, new_size) {
            Ok(block) => block,
            Err(err) => {
                // The block survives a failed resize untouched; restore its
                // entry so accounting and later release still see it.
                self.record(addr, info);
                return Err(err);
            }
        };

        self.record(
            block.ptr.as_ptr() as usize,
            BlockInfo {
                tier: info.tier,
                usable_size: block.usable_size,
            },
        );
        self.accountant.debit(info.tier, info.usable_size);
        self.accountant.credit(info.tier, block.usable_size);

        Ok(Some(block.ptr))
    }

    /// Release a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been returned by this allocator and still
    /// be live. The block must not be used afterwards.
    pub unsafe fn release(&self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        let addr = ptr.as_ptr() as usize;
        let Some(info) = self.forget(addr) else {
            debug_assert!(false, "release of pointer not owned by this allocator");
            debug!(addr, "release of unknown block ignored");
            return;
        };

        self.accountant.debit(info.tier, info.usable_size);
        self.backend(info.tier).release(ptr, info.usable_size);
    }

    /// Usable size of a live block; zero for null or unknown pointers. No
    /// accounting side effect.
    pub fn usable_size(&self, ptr: Option<NonNull<u8>>) -> usize {
        ptr.and_then(|p| self.lookup(p.as_ptr() as usize))
            .map(|info| info.usable_size)
            .unwrap_or(0)
    }

    /// Tier that owns a live block, if the pointer is known.
    pub fn tier_of(&self, ptr: NonNull<u8>) -> Option<Tier> {
        self.lookup(ptr.as_ptr() as usize).map(|info| info.tier)
    }

    /// Live bytes currently accounted to `tier`.
    pub fn used_memory(&self, tier: Tier) -> usize {
        self.accountant.total(tier)
    }

    pub fn stats(&self) -> UsageStats {
        self.accountant.stats()
    }

    /// Current routing threshold.
    pub fn threshold(&self) -> usize {
        self.controller.threshold()
    }

    /// Advance the controller clock by one tick. Called from the host's
    /// periodic scheduler, never from allocation paths.
    pub fn tick(&self) {
        self.controller.tick(&self.accountant);
    }

    pub fn controller(&self) -> &ThresholdController {
        &self.controller
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.accountant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiering::backend::Allocation;

    /// Backend that refuses every call; for failure-path accounting tests.
    struct ExhaustedBackend;

    impl TierBackend for ExhaustedBackend {
        fn allocate(&self, size: usize) -> Result<Allocation> {
            bail!(AllocError::OutOfMemory { requested: size });
        }

        fn allocate_zeroed(&self, size: usize) -> Result<Allocation> {
            bail!(AllocError::OutOfMemory { requested: size });
        }

        unsafe fn resize(
            &self,
            _ptr: NonNull<u8>,
            _old_usable: usize,
            new_size: usize,
        ) -> Result<Allocation> {
            bail!(AllocError::OutOfMemory { requested: new_size });
        }

        unsafe fn release(&self, _ptr: NonNull<u8>, _usable: usize) {
            unreachable!("exhausted backend never hands out blocks");
        }
    }

    fn static_router(threshold: usize) -> TieredAllocator {
        TieredAllocator::with_heap_backends(ThresholdConfig::static_threshold(threshold))
            .unwrap()
    }

    #[test]
    fn test_routes_by_threshold() {
        let router = static_router(64);

        let small = router.allocate(16).unwrap().unwrap();
        let large = router.allocate(128).unwrap().unwrap();

        assert_eq!(router.tier_of(small), Some(Tier::Fast));
        assert_eq!(router.tier_of(large), Some(Tier::Persistent));

        unsafe {
            router.release(Some(small));
            router.release(Some(large));
        }
    }

    #[test]
    fn test_zero_size_allocate_returns_no_block() {
        let router = static_router(64);

        assert!(router.allocate(0).unwrap().is_none());
        assert_eq!(router.used_memory(Tier::Fast), 0);
        assert_eq!(router.used_memory(Tier::Persistent), 0);
    }

    #[test]
    fn test_accounting_tracks_usable_sizes() {
        let router = static_router(64);

        let a = router.allocate(10).unwrap().unwrap();
        let b = router.allocate(100).unwrap().unwrap();

        assert_eq!(router.used_memory(Tier::Fast), router.usable_size(Some(a)));
        assert_eq!(
            router.used_memory(Tier::Persistent),
            router.usable_size(Some(b))
        );

        unsafe {
            router.release(Some(a));
            router.release(Some(b));
        }

        assert_eq!(router.used_memory(Tier::Fast), 0);
        assert_eq!(router.used_memory(Tier::Persistent), 0);
    }

    #[test]
    fn test_release_null_is_noop() {
        let router = static_router(64);
        unsafe { router.release(None) };
        assert_eq!(router.used_memory(Tier::Fast), 0);
    }

    #[test]
    fn test_resize_null_degenerates_to_allocate() {
        let router = static_router(64);

        let ptr = unsafe { router.resize(None, 32).unwrap() }.unwrap();
        assert_eq!(router.tier_of(ptr), Some(Tier::Fast));

        unsafe { router.release(Some(ptr)) };
    }

    #[test]
    fn test_resize_to_zero_is_release() {
        let router = static_router(64);

        let ptr = router.allocate(32).unwrap().unwrap();
        let result = unsafe { router.resize(Some(ptr), 0).unwrap() };

        assert!(result.is_none());
        assert_eq!(router.used_memory(Tier::Fast), 0);
    }

    #[test]
    fn test_resize_stays_in_original_tier() {
        let router = static_router(64);

        let ptr = router.allocate(16).unwrap().unwrap();
        assert_eq!(router.tier_of(ptr), Some(Tier::Fast));

        // Growing past the threshold must not migrate the block.
        let grown = unsafe { router.resize(Some(ptr), 256).unwrap() }.unwrap();
        assert_eq!(router.tier_of(grown), Some(Tier::Fast));
        assert_eq!(router.used_memory(Tier::Persistent), 0);
        assert_eq!(router.used_memory(Tier::Fast), router.usable_size(Some(grown)));

        unsafe { router.release(Some(grown)) };
    }

    #[test]
    fn test_failed_allocate_leaves_counters_untouched() {
        let router = TieredAllocator::new(
            Box::new(ExhaustedBackend),
            Box::new(ExhaustedBackend),
            ThresholdConfig::static_threshold(64),
        )
        .unwrap();

        let err = router.allocate(32).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AllocError>(),
            Some(AllocError::OutOfMemory { requested: 32 })
        ));
        assert_eq!(router.used_memory(Tier::Fast), 0);
        assert_eq!(router.used_memory(Tier::Persistent), 0);
    }

    /// Backend that hands out real heap blocks but refuses to resize them;
    /// exercises the resize failure path against live blocks.
    struct PinnedBackend {
        inner: HeapBackend,
    }

    impl TierBackend for PinnedBackend {
        fn allocate(&self, size: usize) -> Result<Allocation> {
            self.inner.allocate(size)
        }

        fn allocate_zeroed(&self, size: usize) -> Result<Allocation> {
            self.inner.allocate_zeroed(size)
        }

        unsafe fn resize(
            &self,
            _ptr: NonNull<u8>,
            _old_usable: usize,
            new_size: usize,
        ) -> Result<Allocation> {
            bail!(AllocError::OutOfMemory { requested: new_size });
        }

        unsafe fn release(&self, ptr: NonNull<u8>, usable: usize) {
            self.inner.release(ptr, usable);
        }
    }

    #[test]
    fn test_failed_resize_leaves_block_and_counters_untouched() {
        let router = TieredAllocator::new(
            Box::new(PinnedBackend {
                inner: HeapBackend::new(),
            }),
            Box::new(HeapBackend::new()),
            ThresholdConfig::static_threshold(1 << 20),
        )
        .unwrap();

        let ptr = router.allocate(100).unwrap().unwrap();
        let usable = router.usable_size(Some(ptr));

        let err = unsafe { router.resize(Some(ptr), 500) }.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AllocError>(),
            Some(AllocError::OutOfMemory { requested: 500 })
        ));

        // The block is still tracked with its original tier and size, and
        // the counters never moved.
        assert_eq!(router.usable_size(Some(ptr)), usable);
        assert_eq!(router.tier_of(ptr), Some(Tier::Fast));
        assert_eq!(router.used_memory(Tier::Fast), usable);
        assert_eq!(router.used_memory(Tier::Persistent), 0);

        unsafe { router.release(Some(ptr)) };
        assert_eq!(router.used_memory(Tier::Fast), 0);
    }

    #[test]
    fn test_usable_size_of_unknown_pointer_is_zero() {
        let router = static_router(64);
        assert_eq!(router.usable_size(None), 0);
        assert_eq!(router.usable_size(NonNull::new(0xdead0 as *mut u8)), 0);
    }
}
