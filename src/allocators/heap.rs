//! A multithreaded memory allocator.

use crate::allocators::raw_heap::{ChunkInfo, RawHeap};
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::growers::Grower;
use crate::header::CHUNK_ALIGN;
use crate::util::raw_ptr;

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::{null_mut, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use static_assertions::const_assert;
use tracing::error;

/// A multithreaded memory allocator.
///
/// This allocator is a `Mutex` wrapper over [`RawHeap`]: every call holds the lock for its
/// whole search, split or merge, so no thread ever observes a half-updated chunk sequence.
/// It can be used through its inherent methods or installed as the `#[global_allocator]`.
pub struct Heap<G: Grower> {
    inner: Mutex<RawHeap<G>>,
    ready: AtomicBool,
}

impl<G: Grower> Heap<G> {
    /// Creates an uninitialized heap with the default [`HeapConfig`].
    pub const fn new(grower: G) -> Self {
        Heap::with_config(grower, HeapConfig::new())
    }

    pub const fn with_config(grower: G, config: HeapConfig) -> Self {
        Heap {
            inner: Mutex::new(RawHeap::with_config(grower, config)),
            ready: AtomicBool::new(false),
        }
    }

    /// Maps the initial region. Must succeed before [`allocate`](Heap::allocate) can.
    /// Calling it again on a ready heap does nothing.
    pub fn init(&self) -> Result<(), HeapError> {
        let mut heap = self.lock();
        heap.init()?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns whether [`init`](Heap::init) has completed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Allocates `size` bytes. See [`RawHeap::allocate`].
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.lock().allocate(size)
    }

    /// Releases an allocation. See [`RawHeap::free`].
    ///
    /// # Safety
    /// `ptr` must be null or a pointer returned by [`allocate`](Heap::allocate) on this heap.
    pub unsafe fn free(&self, ptr: *mut u8) {
        self.lock().free(ptr)
    }

    /// Sum of the payload sizes of all free chunks. See [`RawHeap::available`].
    pub fn available(&self) -> usize {
        self.lock().available()
    }

    pub fn regions(&self) -> usize {
        self.lock().regions()
    }

    /// Calls `f` for every chunk in sequence order while holding the heap lock.
    ///
    /// `f` must not allocate from this heap, which includes any allocation at all
    /// when this heap is the global allocator.
    pub fn visit_chunks(&self, f: impl FnMut(ChunkInfo)) {
        self.lock().visit_chunks(f)
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, RawHeap<G>> {
        // The sequence is consistent between calls, a panicking holder can't leave it torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//---------------impl GlobalAlloc for Heap---------------//

/// Bytes reserved right below an over-aligned pointer for the payload address.
const BACK_LINK: usize = size_of::<*mut u8>();

const_assert!(BACK_LINK <= CHUNK_ALIGN);

/// Serves a `layout` whose alignment exceeds [`CHUNK_ALIGN`] from a plain chunk.
///
/// The chunk is over-allocated by `layout.align()` bytes. Since every payload is
/// [`CHUNK_ALIGN`]-aligned, the next `layout.align()` boundary strictly past the payload start
/// lies between [`CHUNK_ALIGN`] and `layout.align()` bytes into it, which leaves room for
/// the back link below it and `layout.size()` bytes above it.
fn allocate_over_aligned<G: Grower>(heap: &mut RawHeap<G>, layout: Layout) -> *mut u8 {
    debug_assert!(layout.align() > CHUNK_ALIGN);
    let Some(size) = layout.size().checked_add(layout.align()) else {
        return null_mut();
    };
    let payload = match heap.allocate(size) {
        Ok(payload) => payload.as_ptr(),
        Err(_) => return null_mut(),
    };

    let offset = layout.align() - payload as usize % layout.align();
    unsafe {
        let aligned = payload.add(offset);
        aligned.cast::<*mut u8>().sub(1).write(payload);
        aligned
    }
}

/// Recovers the payload address stored by [`allocate_over_aligned`].
///
/// # Safety
/// `ptr` must have been returned by [`allocate_over_aligned`].
#[inline]
unsafe fn over_aligned_payload(ptr: *mut u8) -> *mut u8 {
    ptr.cast::<*mut u8>().sub(1).read()
}

unsafe impl<G: Grower + Send> GlobalAlloc for Heap<G> {
    /// Initializes the heap on first use. Returns null on any allocation failure.
    ///
    /// Alignments above [`CHUNK_ALIGN`](crate::CHUNK_ALIGN) cost up to `layout.align()`
    /// extra bytes per allocation.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();
        if !heap.is_ready() {
            if let Err(e) = heap.init() {
                error!(?e, "Lazy heap initialization failed.");
                return null_mut();
            }
            self.ready.store(true, Ordering::Release);
        }
        if layout.align() > CHUNK_ALIGN {
            return allocate_over_aligned(&mut heap, layout);
        }
        raw_ptr(heap.allocate(layout.size()).ok())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if !ptr.is_null() && layout.align() > CHUNK_ALIGN {
            self.free(over_aligned_payload(ptr))
        } else {
            self.free(ptr)
        }
    }
}
