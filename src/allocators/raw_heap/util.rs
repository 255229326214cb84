//! Utility functions specific to the [`RawHeap`](super::RawHeap) allocator.

use crate::error::HeapError;
use crate::header::CHUNK_ALIGN;
use crate::util::align_up;

/// Rounds a requested payload size up to the chunk alignment.
///
/// Returns [`HeapError::InvalidArgument`] for a zero size and [`HeapError::OutOfMemory`]
/// if the rounded size can not describe an allocated object.
#[inline]
pub fn augment_size(size: usize) -> Result<usize, HeapError> {
    if size == 0 {
        return Err(HeapError::InvalidArgument);
    }
    // Size of objects should not exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    match align_up(size, CHUNK_ALIGN) {
        Some(new_size) if new_size <= isize::MAX as usize => Ok(new_size),
        _ => Err(HeapError::OutOfMemory),
    }
}
