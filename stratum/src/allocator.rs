//! Segment allocator: backs large page regions from
//! size-classed pools over anonymous OS memory, so the page
//! reader/writer's decompression path can avoid per-page heap
//! allocation for its larger buffers.

use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, StratumError};

/// Size classes a segment can be rounded up to. `allocate` picks the
/// smallest class that fits the request.
const SIZE_CLASSES: [usize; 5] = [4 * 1024, 16 * 1024, 64 * 1024, 256 * 1024, 1024 * 1024];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass(usize);

impl SizeClass {
    fn for_size(size: usize) -> Option<Self> {
        SIZE_CLASSES.iter().find(|&&class| class >= size).map(|&class| Self(class))
    }

    #[must_use]
    pub const fn bytes(self) -> usize {
        self.0
    }

    fn pool_index(self) -> usize {
        SIZE_CLASSES
            .iter()
            .position(|&class| class == self.0)
            .expect("SizeClass is only ever constructed from SIZE_CLASSES")
    }
}

/// An anonymous memory region borrowed from a pool. Consuming
/// ownership (rather than an explicit double-release guard) is what
/// makes `release` idempotent: the type system prevents a segment
/// being released twice.
#[derive(Debug)]
pub struct Segment {
    ptr: NonNull<u8>,
    len: usize,
    class: SizeClass,
}

// SAFETY: the pointer is an OS-backed mapping exclusively owned by
// this `Segment`; no other handle aliases it.
unsafe impl Send for Segment {}

impl Segment {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` points to `len` bytes mapped for the lifetime
        // of this segment.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: exclusive access via `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn size_class(&self) -> SizeClass {
        self.class
    }
}

struct Pool {
    borrowed: usize,
}

/// Process-wide singleton backing page-sized memory regions: one
/// mutex-guarded pool per size class, plus a global physical-byte
/// counter clamped at zero.
pub struct SegmentAllocator {
    pools: [Mutex<Pool>; SIZE_CLASSES.len()],
    physical_bytes: AtomicUsize,
}

impl SegmentAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: std::array::from_fn(|_| Mutex::new(Pool { borrowed: 0 })),
            physical_bytes: AtomicUsize::new(0),
        }
    }

    /// Returns a segment of at least `size` bytes. The borrowed-set
    /// membership and physical-bytes counter are updated atomically
    /// with respect to the pool's own mutex.
    pub fn allocate(&self, size: usize) -> Result<Segment> {
        let class = SizeClass::for_size(size).ok_or(StratumError::PoolExhausted("no size class large enough"))?;
        let mut pool = self.pools[class.pool_index()].lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        // SAFETY: anonymous, non-file-backed mapping; failure is
        // reported through the return value, not dereferenced.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                class.bytes(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if raw == libc::MAP_FAILED {
            return Err(StratumError::PoolExhausted("mmap failed to back a new segment"));
        }

        pool.borrowed += 1;
        self.physical_bytes.fetch_add(class.bytes(), Ordering::AcqRel);

        Ok(Segment {
            // SAFETY: mmap returned a non-MAP_FAILED pointer.
            ptr: unsafe { NonNull::new_unchecked(raw.cast()) },
            len: class.bytes(),
            class,
        })
    }

    /// Advises the OS to release the segment's physical backing and
    /// marks its slot borrowable again. Idempotent by construction:
    /// `Segment` is consumed, so a second call is a type error, not a
    /// runtime one.
    pub fn release(&self, segment: Segment) {
        let class = segment.class;
        let mut pool = self.pools[class.pool_index()].lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        // SAFETY: `segment` uniquely owns this mapping and is
        // consumed here, so nothing observes it afterwards.
        unsafe {
            libc::munmap(segment.ptr.as_ptr().cast(), segment.len);
        }

        pool.borrowed = pool.borrowed.saturating_sub(1);
        sub_clamped(&self.physical_bytes, segment.len);
        std::mem::forget(segment);
    }

    #[must_use]
    pub fn physical_bytes(&self) -> usize {
        self.physical_bytes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn borrowed_count(&self, class_bytes: usize) -> usize {
        SizeClass::for_size(class_bytes).map_or(0, |class| {
            self.pools[class.pool_index()].lock().unwrap_or_else(std::sync::PoisonError::into_inner).borrowed
        })
    }
}

impl Default for SegmentAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Subtracts `amount` from `counter`, clamping at zero instead of
/// wrapping: physical accounting never goes negative.
fn sub_clamped(counter: &AtomicUsize, amount: usize) {
    let mut current = counter.load(Ordering::Acquire);
    loop {
        let next = current.saturating_sub(amount);
        match counter.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}
