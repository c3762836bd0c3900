//! # Tier Backend Capability
//!
//! Each backing store is consumed through the [`TierBackend`] trait: an
//! opaque allocate/resize/release/usable-size capability. The router selects
//! one of two backends per request and never looks inside them.
//!
//! ## Usable Size
//!
//! Real allocators round requests up to internal bin sizes, so the bytes a
//! block actually occupies can exceed the bytes asked for. Backends report
//! that usable size on every successful call; it is the quantity the router
//! credits to the accountant and must debit when the block dies. Accounting
//! against requested sizes instead would leak the rounding slack.
//!
//! ## Built-In Backend
//!
//! [`HeapBackend`] implements the capability over `std::alloc`. It serves as
//! the fast tier by default and stands in for a persistent-memory kind in
//! tests; hosts with a real PMEM allocator implement [`TierBackend`] over it
//! and hand the router a pair of backends at construction.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use eyre::{bail, Result};

use crate::config::HEAP_ALLOC_QUANTUM;

/// Allocation-boundary failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The selected tier cannot satisfy the request. No fallback to the
    /// other tier is attempted.
    OutOfMemory { requested: usize },
    /// The size/alignment combination is malformed; rejected before any
    /// tier call.
    InvalidArgument { requested: usize },
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::OutOfMemory { requested } => {
                write!(f, "tier allocation of {} bytes failed: out of memory", requested)
            }
            AllocError::InvalidArgument { requested } => {
                write!(f, "allocation of {} bytes is not representable", requested)
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// A live block handed out by a backend: the payload pointer and the usable
/// size the backend will honor until the block is resized or released.
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    pub ptr: NonNull<u8>,
    pub usable_size: usize,
}

/// The allocate/resize/release capability one backing store provides.
///
/// Implementations must be callable from multiple threads concurrently; the
/// router performs no serialization around backend calls.
pub trait TierBackend: Send + Sync {
    /// Allocate at least `size` bytes. `size` is nonzero; zero-sized
    /// requests are resolved by the router before any backend call.
    fn allocate(&self, size: usize) -> Result<Allocation>;

    /// Allocate at least `size` bytes of zeroed memory.
    fn allocate_zeroed(&self, size: usize) -> Result<Allocation>;

    /// Resize a block previously returned by this backend.
    ///
    /// On failure the original block is untouched and still owned by the
    /// caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this backend and `old_usable` must be
    /// the usable size it reported most recently for that block.
    unsafe fn resize(&self, ptr: NonNull<u8>, old_usable: usize, new_size: usize)
        -> Result<Allocation>;

    /// Release a block previously returned by this backend.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this backend and `usable` must be the
    /// usable size it reported most recently for that block. The block must
    /// not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, usable: usize);
}

/// `std::alloc`-backed tier. Usable size is the request rounded up to
/// [`HEAP_ALLOC_QUANTUM`], which is also the allocation alignment.
#[derive(Debug, Default)]
pub struct HeapBackend;

impl HeapBackend {
    pub fn new() -> Self {
        Self
    }

    /// Round the request up to the usable-size quantum, rejecting sizes the
    /// allocator cannot represent.
    fn layout_for(size: usize) -> Result<Layout> {
        if size == 0 {
            bail!(AllocError::InvalidArgument { requested: 0 });
        }

        let rounded = match size.checked_add(HEAP_ALLOC_QUANTUM - 1) {
            Some(n) => n & !(HEAP_ALLOC_QUANTUM - 1),
            None => bail!(AllocError::InvalidArgument { requested: size }),
        };

        match Layout::from_size_align(rounded, HEAP_ALLOC_QUANTUM) {
            Ok(layout) => Ok(layout),
            Err(_) => bail!(AllocError::InvalidArgument { requested: size }),
        }
    }
}

impl TierBackend for HeapBackend {
    fn allocate(&self, size: usize) -> Result<Allocation> {
        let layout = Self::layout_for(size)?;

        // Layout size is nonzero by construction above.
        let raw = unsafe { alloc::alloc(layout) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(Allocation {
                ptr,
                usable_size: layout.size(),
            }),
            None => bail!(AllocError::OutOfMemory { requested: size }),
        }
    }

    fn allocate_zeroed(&self, size: usize) -> Result<Allocation> {
        let layout = Self::layout_for(size)?;

        let raw = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(raw) {
            Some(ptr) => Ok(Allocation {
                ptr,
                usable_size: layout.size(),
            }),
            None => bail!(AllocError::OutOfMemory { requested: size }),
        }
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_usable: usize,
        new_size: usize,
    ) -> Result<Allocation> {
        let new_layout = Self::layout_for(new_size)?;
        let old_layout = Layout::from_size_align(old_usable, HEAP_ALLOC_QUANTUM)
            .map_err(|_| AllocError::InvalidArgument { requested: old_usable })?;

        let raw = alloc::realloc(ptr.as_ptr(), old_layout, new_layout.size());
        match NonNull::new(raw) {
            Some(ptr) => Ok(Allocation {
                ptr,
                usable_size: new_layout.size(),
            }),
            None => bail!(AllocError::OutOfMemory { requested: new_size }),
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, usable: usize) {
        debug_assert_eq!(usable % HEAP_ALLOC_QUANTUM, 0);
        let layout = Layout::from_size_align_unchecked(usable, HEAP_ALLOC_QUANTUM);
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}
