//! The [`Arena`], which turns OS regions into chunks.
//!
//! Every region obtained from the [`Grower`] is formatted as a single free chunk spanning the
//! whole region and linked at the end of the heap's [`ChunkSequence`]. Regions are never
//! returned and never merged with one another.

use core::ptr::NonNull;

use tracing::{debug, error, instrument, Level};

use crate::error::HeapError;
use crate::growers::Grower;
use crate::header::{Chunk, HEADER_SIZE};
use crate::sequence::ChunkSequence;
use crate::util::align_up;

pub struct Arena<G: Grower> {
    grower: G,
    pub(crate) sequence: ChunkSequence,
    /// Running count of bytes available for allocation.
    pub(crate) available: usize,
    regions: usize,
}

impl<G: Grower> Arena<G> {
    #[inline]
    pub const fn new(grower: G) -> Self {
        Arena {
            grower,
            sequence: ChunkSequence::new(),
            available: 0,
            regions: 0,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.sequence.head().is_some()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.available
    }

    /// Number of regions mapped so far.
    #[inline]
    pub fn regions(&self) -> usize {
        self.regions
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.grower.page_size()
    }

    /// Maps `initial_pages` pages and makes them the first chunk of the heap.
    ///
    /// Must only be called on an arena that is not yet initialized.
    #[instrument(level = "info", skip(self), err(Debug, level = Level::ERROR))]
    pub fn initialize(&mut self, initial_pages: usize) -> Result<(), HeapError> {
        debug_assert!(!self.is_initialized(), "Arena should only be initialized once.");
        let region_size = initial_pages
            .max(1)
            .checked_mul(self.page_size())
            .ok_or(HeapError::OutOfMemory)?;
        let chunk = self.map_region(region_size)?;
        debug!(?chunk, region_size, "Mapped initial region.");
        Ok(())
    }

    /// Maps a region large enough to hold a chunk of `requested_size` bytes, header included,
    /// and links it at the end of the sequence. Returns the new free chunk.
    ///
    /// `requested_size` is expected to already be rounded to the chunk alignment,
    /// which guarantees the returned chunk can satisfy it.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    pub fn grow(&mut self, requested_size: usize) -> Result<NonNull<Chunk>, HeapError> {
        let region_size = requested_size
            .checked_add(HEADER_SIZE)
            .and_then(|n| align_up(n, self.page_size()))
            .ok_or(HeapError::OutOfMemory)?;
        debug!(region_size, "Calculated growth amount.");
        let chunk = self.map_region(region_size)?;
        debug_assert!(unsafe { (*chunk.as_ptr()).size } >= requested_size);
        Ok(chunk)
    }

    /// Requests a region of `region_size` bytes from the grower, formats it as one free chunk
    /// and appends it to the sequence.
    fn map_region(&mut self, region_size: usize) -> Result<NonNull<Chunk>, HeapError> {
        if region_size > isize::MAX as usize {
            error!(region_size, "Region size exceeds the address space.");
            return Err(HeapError::OutOfMemory);
        }
        let start = match unsafe { self.grower.map(region_size) } {
            Ok(start) => start,
            Err(()) => {
                error!(region_size, "Grower refused to map a region.");
                return Err(HeapError::OutOfMemory);
            }
        };

        let size = region_size - HEADER_SIZE;
        unsafe {
            let chunk = Chunk::write_free(start, size, true, core::ptr::null_mut());
            self.sequence.append(chunk);
            self.available += size;
            self.regions += 1;
            Ok(chunk)
        }
    }
}
