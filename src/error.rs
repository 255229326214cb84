//! The [`HeapError`] type returned by fallible heap operations.

use core::fmt;

/// Errors surfaced by [`Heap`](crate::Heap) and [`RawHeap`](crate::RawHeap).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeapError {
    /// An allocation was attempted before the heap was initialized.
    NotInitialized,
    /// The OS refused to map a region, either at initialization or during growth.
    /// Also reported for requests whose size can not be represented once rounded up.
    OutOfMemory,
    /// A zero-size allocation was requested.
    InvalidArgument,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::NotInitialized => f.write_str("heap is not initialized"),
            HeapError::OutOfMemory => f.write_str("out of memory"),
            HeapError::InvalidArgument => f.write_str("allocation size must be greater than zero"),
        }
    }
}

impl std::error::Error for HeapError {}
