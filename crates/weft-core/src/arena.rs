//! Bump arena backing the queue store.
//!
//! A single contiguous region is reserved up front; allocations carve
//! aligned sub-ranges off a monotonic offset. Individual deallocation is a
//! no-op — the region is reclaimed wholesale via [`BumpArena::reset`] or on
//! drop. All queue ring buffers are placed here so an entire topology's hot
//! storage sits in one contiguous block.
//!
//! Allocation is expected to happen during single-threaded engine build.
//! The offset is atomic only so the arena can be shared behind an `Arc`
//! without poisoning `Sync` for everything that holds it.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Base alignment of the backing region. Covers every envelope type and
/// keeps ring buffers cache-line aligned at offset zero.
const REGION_ALIGN: usize = 64;

/// A monotonic bump allocator over one contiguous byte region.
///
/// # Example
///
/// ```rust
/// use weft_core::arena::BumpArena;
///
/// let arena = BumpArena::new(4096);
/// let range = arena.allocate(128, 8).unwrap();
/// assert_eq!(range.as_ptr() as usize % 8, 0);
/// assert_eq!(arena.used_bytes(), 128);
/// ```
pub struct BumpArena {
    base: NonNull<u8>,
    capacity: usize,
    offset: AtomicUsize,
}

// SAFETY: the arena only hands out raw ranges; the region itself is plain
// bytes and the offset is atomic.
#[allow(unsafe_code)]
unsafe impl Send for BumpArena {}

// SAFETY: see above; concurrent `allocate` calls race only on the atomic
// offset and never hand out overlapping ranges.
#[allow(unsafe_code)]
unsafe impl Sync for BumpArena {}

impl BumpArena {
    /// Reserves a region of `capacity_bytes`.
    ///
    /// A zero-capacity arena is valid and refuses every allocation.
    ///
    /// # Panics
    ///
    /// Panics if the capacity cannot be represented as an allocation layout
    /// or the underlying allocation fails.
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        let base = if capacity_bytes == 0 {
            NonNull::dangling()
        } else {
            let layout = Layout::from_size_align(capacity_bytes, REGION_ALIGN)
                .expect("arena capacity exceeds layout limits");
            // SAFETY: layout has non-zero size.
            #[allow(unsafe_code)]
            let ptr = unsafe { alloc(layout) };
            NonNull::new(ptr).expect("arena region allocation failed")
        };

        Self {
            base,
            capacity: capacity_bytes,
            offset: AtomicUsize::new(0),
        }
    }

    /// Carves an aligned range of `bytes` off the region.
    ///
    /// Returns `None` on a zero-length request, a non-power-of-two
    /// alignment, or exhaustion. The returned range is uninitialized.
    pub fn allocate(&self, bytes: usize, align: usize) -> Option<NonNull<u8>> {
        if bytes == 0 || align == 0 || !align.is_power_of_two() {
            return None;
        }

        let base_addr = self.base.as_ptr() as usize;
        let mut current = self.offset.load(Ordering::Relaxed);

        loop {
            let addr = base_addr.checked_add(current)?;
            let aligned = addr.checked_add(align - 1)? & !(align - 1);
            let start = aligned - base_addr;
            let end = start.checked_add(bytes)?;
            if end > self.capacity {
                return None;
            }

            match self.offset.compare_exchange_weak(
                current,
                end,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: start + bytes <= capacity, so the pointer is
                    // inside the live region and non-null.
                    #[allow(unsafe_code)]
                    return Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Rewinds the offset to zero.
    ///
    /// The caller must ensure no previously returned range is referenced
    /// afterwards; the memory is handed out again by later allocations.
    pub fn reset(&self) {
        self.offset.store(0, Ordering::Relaxed);
    }

    /// Bytes consumed so far, including alignment padding.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.offset.load(Ordering::Relaxed)
    }

    /// Total capacity of the region.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity
    }
}

impl Drop for BumpArena {
    fn drop(&mut self) {
        if self.capacity > 0 {
            let layout = Layout::from_size_align(self.capacity, REGION_ALIGN)
                .expect("arena capacity exceeds layout limits");
            // SAFETY: base was produced by `alloc` with this exact layout.
            #[allow(unsafe_code)]
            unsafe {
                dealloc(self.base.as_ptr(), layout);
            }
        }
    }
}

impl std::fmt::Debug for BumpArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BumpArena")
            .field("capacity_bytes", &self.capacity)
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_allocation() {
        let arena = BumpArena::new(1024);

        let a = arena.allocate(1, 1).unwrap();
        let b = arena.allocate(8, 8).unwrap();

        assert_eq!(b.as_ptr() as usize % 8, 0);
        assert!(b.as_ptr() as usize > a.as_ptr() as usize);
        // 1 byte + 7 padding + 8 bytes
        assert_eq!(arena.used_bytes(), 16);
    }

    #[test]
    fn test_exhaustion() {
        let arena = BumpArena::new(64);

        assert!(arena.allocate(48, 8).is_some());
        assert!(arena.allocate(32, 8).is_none());
        // A smaller request still fits.
        assert!(arena.allocate(16, 8).is_some());
        assert!(arena.allocate(1, 1).is_none());
    }

    #[test]
    fn test_rejects_bad_requests() {
        let arena = BumpArena::new(64);

        assert!(arena.allocate(0, 8).is_none());
        assert!(arena.allocate(8, 0).is_none());
        assert!(arena.allocate(8, 3).is_none());
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn test_zero_capacity() {
        let arena = BumpArena::new(0);
        assert!(arena.allocate(1, 1).is_none());
        assert_eq!(arena.capacity_bytes(), 0);
    }

    #[test]
    fn test_reset() {
        let arena = BumpArena::new(128);

        arena.allocate(100, 8).unwrap();
        assert_eq!(arena.used_bytes(), 100);

        arena.reset();
        assert_eq!(arena.used_bytes(), 0);
        assert!(arena.allocate(100, 8).is_some());
    }

    #[test]
    fn test_non_overlapping_ranges() {
        let arena = BumpArena::new(256);

        let a = arena.allocate(32, 8).unwrap().as_ptr() as usize;
        let b = arena.allocate(32, 8).unwrap().as_ptr() as usize;
        let c = arena.allocate(32, 8).unwrap().as_ptr() as usize;

        assert!(a + 32 <= b);
        assert!(b + 32 <= c);
    }
}
