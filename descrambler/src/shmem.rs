//! # Shared transport memory
//!
//! Bytes travel to and from the descrambling service through a shared
//! region rather than through the call itself. This module owns that
//! region: a page-aligned, zero-filled allocation wrapped in a cloneable
//! [`SharedHeap`] handle, and a [`TransportBuffer`] that grows the region on
//! demand and never shrinks it.
//!
//! ## Growth
//!
//! Requested sizes are rounded up to [`ALLOCATION_ALIGNMENT`] and then to
//! the next [`GROWTH_QUANTUM`] multiple. Growth allocates the replacement
//! region first and swaps it in only once the allocation has succeeded, so
//! a failed grow leaves the previous region fully usable. The old region is
//! freed when the last handle over it drops.
//!
//! ## Access
//!
//! Each region carries a process-unique heap id, so a handle from before a
//! grow is distinguishable from the live region. The byte accessors are
//! `unsafe`: nothing in the type system ties region access to the session
//! lock or to an in-flight service call, so the caller carries that proof.

use std::alloc::alloc_zeroed;
use std::alloc::dealloc;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Error;

/// Alignment of every transport region, in bytes.
///
/// Matches the platform allocator's page granularity. The value is not
/// queried from the OS; adjust it for targets with larger minimum pages.
pub const ALLOCATION_ALIGNMENT: usize = 4096;

/// Regions are sized in whole multiples of this quantum.
///
/// Coarse rounding keeps reallocation rare when transform sizes creep
/// upward a few bytes at a time.
pub const GROWTH_QUANTUM: usize = 64 * 1024;

/// Source of process-unique region ids.
static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Region {
    ptr: NonNull<u8>,
    layout: Layout,
    id: u64,
}

// SAFETY: the region is plain bytes with no thread affinity. All access
// goes through the unsafe accessors on SharedHeap, whose contracts require
// the caller to hold the serialization the owning session provides.
unsafe impl Send for Region {}
// SAFETY: as above; concurrent access is excluded by the accessor contracts,
// not by this type.
unsafe impl Sync for Region {}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout
        // and is freed exactly once, when the last handle drops.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

/// Cloneable handle to one shared transport region.
///
/// The region stays mapped until every handle over it has dropped, so a
/// descriptor held by a service implementation can never dangle, even after
/// the owning [`TransportBuffer`] has grown past it.
#[derive(Debug, Clone)]
pub struct SharedHeap {
    region: Arc<Region>,
}

impl SharedHeap {
    /// Allocates a zero-filled region of exactly `size` bytes, or `None`
    /// when the size is not representable as a layout or the allocator
    /// refuses it.
    ///
    /// `size` comes pre-rounded from [`TransportBuffer::ensure_capacity`]
    /// and is never zero.
    fn allocate(size: usize) -> Option<Self> {
        debug_assert!(size > 0);
        let layout = Layout::from_size_align(size, ALLOCATION_ALIGNMENT).ok()?;

        // SAFETY: the layout is valid and has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)?;

        Some(Self {
            region: Arc::new(Region {
                ptr,
                layout,
                id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
            }),
        })
    }

    /// Process-unique id of the underlying region. Two handles compare as
    /// covering the same region exactly when their ids match.
    pub fn id(&self) -> u64 {
        self.region.id
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> usize {
        self.region.layout.size()
    }

    /// The region's bytes, for reading.
    ///
    /// # Safety
    ///
    /// The caller must hold the region's access slot: either the owning
    /// session's lock with no descramble call in flight, or the inside of a
    /// `descramble` invocation that received a descriptor over this region.
    /// No other thread may write the region while the slice lives.
    pub unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.region.ptr.as_ptr(), self.size())
    }

    /// The region's bytes, for writing.
    ///
    /// # Safety
    ///
    /// Same contract as [`SharedHeap::bytes`], strengthened to exclusive
    /// access: no other thread may read or write the region while the slice
    /// lives.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.region.ptr.as_ptr(), self.size())
    }
}

/// The lazily grown region a session reuses across transforms.
pub(crate) struct TransportBuffer {
    heap: Option<SharedHeap>,
}

impl TransportBuffer {
    /// An empty buffer with no region. The first `ensure_capacity` call
    /// allocates one.
    pub(crate) const fn new() -> Self {
        Self { heap: None }
    }

    /// Current region size in bytes, zero when no region exists yet.
    pub(crate) fn capacity(&self) -> usize {
        self.heap.as_ref().map_or(0, SharedHeap::size)
    }

    /// Makes sure the region holds at least `needed` bytes and returns it.
    ///
    /// A request the current region already covers returns that region
    /// untouched, so descriptors over it stay valid. A growing request
    /// allocates the rounded-up replacement first and swaps it in only on
    /// success; the previous region outlives the swap for as long as any
    /// handle still points at it.
    ///
    /// ## Errors
    ///
    /// [`Error::OutOfMemory`], carrying the requested `needed` size, if the
    /// rounded size overflows, is not representable as a layout, or the
    /// allocator refuses it. The existing region is left untouched in every
    /// failure case.
    pub(crate) fn ensure_capacity(&mut self, needed: usize) -> Result<&SharedHeap, Error> {
        let needs_region = match &self.heap {
            Some(heap) => heap.size() < needed,
            None => true,
        };

        if needs_region {
            let capacity = rounded_capacity(needed)?;
            let heap = SharedHeap::allocate(capacity).ok_or(Error::OutOfMemory(needed))?;
            tracing::debug!(
                old_capacity = self.capacity(),
                new_capacity = capacity,
                heap_id = heap.id(),
                "grew shared transport region"
            );
            self.heap = Some(heap);
        }

        match &self.heap {
            Some(heap) => Ok(heap),
            None => Err(Error::OutOfMemory(needed)),
        }
    }
}

/// Rounds `needed` up to the allocation alignment, then up to the next
/// growth quantum. Zero-byte requests still reserve one quantum, and a
/// failure reports `needed` itself rather than an intermediate rounding.
fn rounded_capacity(needed: usize) -> Result<usize, Error> {
    let aligned = needed
        .max(1)
        .checked_add(ALLOCATION_ALIGNMENT - 1)
        .ok_or(Error::OutOfMemory(needed))?
        & !(ALLOCATION_ALIGNMENT - 1);
    let rounded = aligned
        .checked_add(GROWTH_QUANTUM - 1)
        .ok_or(Error::OutOfMemory(needed))?
        & !(GROWTH_QUANTUM - 1);
    Ok(rounded)
}
