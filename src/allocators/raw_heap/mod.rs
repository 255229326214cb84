//! A singlethreaded first-fit chunk allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Available memory accounting
// `available` always equals the sum of the payload sizes of all free chunks.
// Allocating a chunk subtracts its final (post-split) size plus the header of the split-off
// remainder, freeing adds the payload back, and every merge adds the absorbed header.
// Allocating and then freeing the same chunk therefore restores the previous value exactly.
//
// ## Sequence invariants
// Within a region every chunk's `next` is the first byte after its payload, and no two free
// chunks of the same region are ever neighbours once a call returns.

use self::util::augment_size;
use crate::arena::Arena;
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::growers::Grower;
use crate::header::{Chunk, CHUNK_ALIGN, HEADER_SIZE};

use core::fmt::Debug;
use core::ptr::NonNull;

use tracing::{debug, instrument, warn, Level};

mod util;

/// A snapshot of one chunk, as reported by [`RawHeap::visit_chunks`].
///
/// This is the only view of chunk headers outside the crate; the headers themselves
/// are not reachable:
/// ```compile_fail
/// use chunk_malloc::header::Chunk;
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    /// First payload byte of the chunk.
    pub payload: NonNull<u8>,
    pub size: usize,
    pub in_use: bool,
    /// Whether this chunk starts an OS region.
    pub region_head: bool,
}

/// A single threaded memory allocator.
pub struct RawHeap<G: Grower> {
    arena: Arena<G>,
    config: HeapConfig,
}

// The heap exclusively owns every chunk its pointers refer to.
unsafe impl<G: Grower + Send> Send for RawHeap<G> {}

impl<G: Grower> Debug for RawHeap<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawHeap")
            .field("ready", &self.is_ready())
            .field("available", &self.available())
            .field("regions", &self.regions())
            .field("config", &self.config)
            .finish()
    }
}

impl<G: Grower> RawHeap<G> {
    /// Creates an uninitialized heap that will obtain its memory from `grower`.
    #[inline]
    pub const fn new(grower: G) -> Self {
        RawHeap::with_config(grower, HeapConfig::new())
    }

    #[inline]
    pub const fn with_config(grower: G, config: HeapConfig) -> Self {
        RawHeap {
            arena: Arena::new(grower),
            config,
        }
    }

    /// Maps the initial region. Calling this on an initialized heap does nothing.
    pub fn init(&mut self) -> Result<(), HeapError> {
        if self.is_ready() {
            debug!("Heap already initialized.");
            return Ok(());
        }
        self.arena.initialize(self.config.initial_pages())
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.arena.is_initialized()
    }

    /// Bytes currently available for allocation without growing the heap.
    ///
    /// This is always the sum of the payload sizes of all free chunks; headers are not counted.
    /// - An allocation subtracts the chunk's payload, plus one header if a remainder is split off.
    /// - A free adds the freed payload back.
    /// - Every merge adds back the header it absorbs.
    ///
    /// Freeing a chunk between two chunks in use therefore adds just its payload.
    #[inline]
    pub fn available(&self) -> usize {
        self.arena.available()
    }

    #[inline]
    pub fn regions(&self) -> usize {
        self.arena.regions()
    }

    #[inline]
    pub fn config(&self) -> HeapConfig {
        self.config
    }

    /// Allocates `size` bytes and returns a [`CHUNK_ALIGN`]-aligned pointer to them.
    ///
    /// The first free chunk that is large enough is used; if there is none the heap
    /// grows by one region and the search is repeated once.
    ///
    /// [`CHUNK_ALIGN`]: crate::CHUNK_ALIGN
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let size = augment_size(size)?;
        if !self.is_ready() {
            return Err(HeapError::NotInitialized);
        }
        debug!(augmented_size = size, "Size augmented.");

        if let Some(chunk) = unsafe { self.arena.sequence.first_fit(size) } {
            debug!(?chunk, "Found free chunk to accommodate object.");
            return Ok(unsafe { self.place(chunk, size) });
        }

        debug!("Couldn't find free chunk to accommodate object, requesting heap growth.");
        self.arena.grow(size)?;

        match unsafe { self.arena.sequence.first_fit(size) } {
            Some(chunk) => Ok(unsafe { self.place(chunk, size) }),
            None => Err(HeapError::OutOfMemory),
        }
    }

    /// Releases the allocation at `ptr`. A null `ptr` is ignored, as is a pointer
    /// whose chunk is already free.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer returned by [`allocate`](RawHeap::allocate) on this heap.
    #[instrument(level = "info", skip(self))]
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        if !self.is_ready() {
            warn!("Free called on an uninitialized heap, ignoring.");
            return;
        }
        debug_assert_eq!(
            ptr as usize % CHUNK_ALIGN,
            0,
            "All allocations should have chunk alignment."
        );

        let chunk = Chunk::from_payload(payload);
        let header = &mut *chunk.as_ptr();
        if !header.in_use {
            warn!(?chunk, "Chunk is already free, ignoring.");
            return;
        }

        header.in_use = false;
        self.arena.available += header.size;
        debug!(?chunk, size = header.size, "Chunk freed.");

        self.merge_next(chunk);
        self.merge_into_predecessor(chunk);
    }

    /// Calls `f` for every chunk in sequence order.
    ///
    /// `f` must not allocate from this heap.
    pub fn visit_chunks(&self, mut f: impl FnMut(ChunkInfo)) {
        for chunk in unsafe { self.arena.sequence.iter() } {
            let header = unsafe { &*chunk.as_ptr() };
            f(ChunkInfo {
                payload: unsafe { Chunk::payload(chunk) },
                size: header.size,
                in_use: header.in_use,
                region_head: header.region_head,
            });
        }
    }

    /// Marks the free `chunk` as occupied, first splitting off everything past `size`
    /// into a new free chunk if the remainder can hold more than a header.
    /// Returns the payload address.
    ///
    /// # Safety
    /// `chunk` must be a free chunk of this heap with a payload of at least `size` bytes,
    /// and `size` must be a multiple of [`CHUNK_ALIGN`].
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG))]
    unsafe fn place(&mut self, chunk: NonNull<Chunk>, size: usize) -> NonNull<u8> {
        let header = &mut *chunk.as_ptr();
        debug_assert!(!header.in_use, "Chunk should be free.");
        debug_assert!(header.size >= size);
        debug_assert_eq!(size % CHUNK_ALIGN, 0);

        let remainder = (header.size - size).checked_sub(HEADER_SIZE);
        match remainder {
            Some(remainder) if remainder > HEADER_SIZE => {
                let split_at = NonNull::new_unchecked(Chunk::payload(chunk).as_ptr().add(size));
                let split = Chunk::write_free(split_at, remainder, false, header.next);
                header.next = split.as_ptr();
                header.size = size;
                self.arena.available -= HEADER_SIZE;
                debug!(?split, remainder, "Split off free remainder.");
            }
            _ => debug!(size = header.size, "No room for a remainder, using whole chunk."),
        }

        header.in_use = true;
        self.arena.available -= header.size;
        Chunk::payload(chunk)
    }

    /// Absorbs the successor of `chunk` if it is free and in the same region.
    ///
    /// # Safety
    /// `chunk` must be a free chunk of this heap.
    unsafe fn merge_next(&mut self, chunk: NonNull<Chunk>) {
        let Some(next) = NonNull::new((*chunk.as_ptr()).next) else {
            return;
        };
        if (*next.as_ptr()).in_use || !Chunk::adjoins(chunk, next) {
            return;
        }

        let absorbed = next.as_ptr().read();
        let header = &mut *chunk.as_ptr();
        header.size += HEADER_SIZE + absorbed.size;
        header.next = absorbed.next;
        self.arena.available += HEADER_SIZE;
        debug!(?chunk, ?next, merged_size = header.size, "Merged with successive free chunk.");
    }

    /// Lets the predecessor of `chunk` absorb it if the predecessor is free and in the
    /// same region. Finding the predecessor walks the sequence from its head.
    ///
    /// # Safety
    /// `chunk` must be a free chunk of this heap.
    unsafe fn merge_into_predecessor(&mut self, chunk: NonNull<Chunk>) {
        let Some(prev) = self.arena.sequence.predecessor_of(chunk) else {
            return;
        };
        if (*prev.as_ptr()).in_use || !Chunk::adjoins(prev, chunk) {
            return;
        }

        let absorbed = chunk.as_ptr().read();
        let prev_header = &mut *prev.as_ptr();
        prev_header.size += HEADER_SIZE + absorbed.size;
        prev_header.next = absorbed.next;
        self.arena.available += HEADER_SIZE;
        debug!(?prev, ?chunk, merged_size = prev_header.size, "Merged into preceding free chunk.");
    }
}

#[cfg(test)]
mod tests;
