//! [`Grower`] trait and structures that implement it.
//!
//! A grower is the heap's only source of raw memory. Every call hands out a fresh,
//! zero-filled, read-write region; regions are never given back.

use core::ptr::{null_mut, NonNull};

use libc::{mmap, sysconf, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE};

use crate::header::HEADER_ALIGN;

/// Page size assumed when the platform refuses to report one.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// A trait for types that hand out whole, independent memory regions.
///
/// # Safety
/// Implementors must return regions that are valid for reads and writes for the remaining
/// lifetime of the process, zero-filled, aligned for a chunk header (16 bytes) and disjoint
/// from every region returned before. Copying or moving the grower must not invalidate them.
pub unsafe trait Grower {
    /// Returns the granularity, in bytes, of every region handed out by [`map`](Grower::map).
    fn page_size(&self) -> usize;

    /// Maps a new region of exactly `size` bytes and returns its start
    /// or `Err(())` if no memory could be obtained.
    ///
    /// # Safety
    /// Callers must pass a nonzero multiple of [`page_size`](Grower::page_size).
    unsafe fn map(&mut self, size: usize) -> Result<NonNull<u8>, ()>;
}

/// A grower that obtains private anonymous mappings from the OS via [`libc::mmap`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapGrower {
    _private: (),
}

impl MmapGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        MmapGrower { _private: () }
    }
}

unsafe impl Grower for MmapGrower {
    fn page_size(&self) -> usize {
        let size = unsafe { sysconf(_SC_PAGESIZE) };
        match usize::try_from(size) {
            Ok(size) if size >= HEADER_ALIGN && size.is_power_of_two() => size,
            _ => FALLBACK_PAGE_SIZE,
        }
    }

    unsafe fn map(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        debug_assert!(size > 0);
        let start = mmap(
            null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        );
        if start == MAP_FAILED {
            return Err(());
        }
        debug_assert_eq!(start as usize % HEADER_ALIGN, 0);
        NonNull::new(start.cast::<u8>()).ok_or(())
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    unsafe fn map(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        (**self).map(size)
    }
}
