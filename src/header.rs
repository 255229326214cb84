//! Defines the [`Chunk`] header and associated constants and functions.
//!
//! A chunk is a header immediately followed by its payload. The header is never
//! handed out; callers only see the payload address, and [`Chunk::from_payload`]
//! is the one place that turns such an address back into a header.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use static_assertions::const_assert;

/// Alignment of every payload handed out by the allocator.
pub const CHUNK_ALIGN: usize = 16;

pub const HEADER_SIZE: usize = size_of::<Chunk>();
pub const HEADER_ALIGN: usize = align_of::<Chunk>();

// Payloads directly follow headers, so headers must preserve payload alignment.
const_assert!(HEADER_SIZE % CHUNK_ALIGN == 0);
const_assert!(HEADER_ALIGN >= CHUNK_ALIGN);

/// Bookkeeping record placed in front of every payload.
///
/// All fields are only read or written while the owning heap is exclusively borrowed,
/// which is what makes plain (non-atomic) fields sufficient.
#[derive(Debug)]
#[repr(C, align(16))]
pub struct Chunk {
    /// Payload size in bytes, excluding this header.
    pub size: usize,
    pub in_use: bool,
    /// Set on the first chunk of every OS region. Chunks are never merged into a predecessor
    /// across such a boundary, since the two regions need not be contiguous.
    pub region_head: bool,
    /// The next chunk in sequence order or null for the last chunk.
    /// Within a region this is exactly the first byte after the payload.
    pub next: *mut Chunk,
}

impl Chunk {
    /// Writes a free chunk header with `size` payload bytes at `at`.
    ///
    /// # Safety
    /// `at` must be [`HEADER_ALIGN`]-aligned and valid for writes of `HEADER_SIZE + size` bytes
    /// that do not belong to any live chunk.
    #[inline]
    pub unsafe fn write_free(
        at: NonNull<u8>,
        size: usize,
        region_head: bool,
        next: *mut Chunk,
    ) -> NonNull<Chunk> {
        debug_assert_eq!(at.as_ptr() as usize % HEADER_ALIGN, 0);
        debug_assert_eq!(size % CHUNK_ALIGN, 0);
        let chunk: NonNull<Chunk> = at.cast();
        chunk.as_ptr().write(Chunk {
            size,
            in_use: false,
            region_head,
            next,
        });
        chunk
    }

    /// Recovers the header of the chunk whose payload starts at `payload`.
    ///
    /// # Safety
    /// `payload` must have been returned by [`Chunk::payload`] for a chunk that is still
    /// part of a live sequence.
    #[inline(always)]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Chunk> {
        NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast()
    }

    /// Returns the address of the first payload byte of `chunk`.
    ///
    /// # Safety
    /// `chunk` must point to a header followed by its payload, inside one mapped region.
    #[inline(always)]
    pub unsafe fn payload(chunk: NonNull<Chunk>) -> NonNull<u8> {
        NonNull::new_unchecked(chunk.as_ptr().cast::<u8>().add(HEADER_SIZE))
    }

    /// Returns the first byte after the payload of `chunk`.
    ///
    /// # Safety
    /// `chunk` must point to an initialized header.
    #[inline(always)]
    pub unsafe fn end(chunk: NonNull<Chunk>) -> *mut u8 {
        Chunk::payload(chunk).as_ptr().add((*chunk.as_ptr()).size)
    }

    /// Returns whether `next` follows `chunk` in memory with no gap, i.e. whether
    /// the two chunks may be merged.
    ///
    /// # Safety
    /// Both pointers must point to initialized headers.
    #[inline]
    pub unsafe fn adjoins(chunk: NonNull<Chunk>, next: NonNull<Chunk>) -> bool {
        !(*next.as_ptr()).region_head && Chunk::end(chunk) == next.as_ptr().cast()
    }

    #[cfg(test)]
    pub(crate) const fn detached(size: usize) -> Chunk {
        Chunk {
            size,
            in_use: false,
            region_head: false,
            next: core::ptr::null_mut(),
        }
    }
}
