//! Defines the [`ChunkSequence`] struct, the address-ordered list of every chunk on the heap.
//!
//! Unlike a freelist, the sequence links free and occupied chunks alike, so every search
//! walks the whole heap. There are no back links: finding the predecessor of a chunk is a
//! linear scan from the head and its cost grows with the number of chunks.

use core::marker::PhantomData;
use core::ptr::{null_mut, NonNull};

use crate::header::Chunk;

#[derive(Debug)]
pub struct ChunkSequence {
    head: *mut Chunk,
}

impl ChunkSequence {
    /// Creates an empty sequence.
    #[inline]
    pub const fn new() -> Self {
        ChunkSequence { head: null_mut() }
    }

    /// Returns the first chunk or `None` if the sequence is empty.
    #[inline]
    pub fn head(&self) -> Option<NonNull<Chunk>> {
        NonNull::new(self.head)
    }

    /// Returns an iterator over the chunks in sequence order.
    ///
    /// # Safety
    /// Every chunk reachable from the head must be initialized and must stay so,
    /// with unchanged links, while the iterator is alive.
    #[inline]
    pub unsafe fn iter(&self) -> Iter<'_> {
        Iter {
            cur: self.head,
            _seq: PhantomData,
        }
    }

    /// Returns the first free chunk with a payload of at least `size` bytes.
    /// This operation has a time complexity of *O*(n).
    ///
    /// # Safety
    /// See [`iter`](ChunkSequence::iter).
    pub unsafe fn first_fit(&self, size: usize) -> Option<NonNull<Chunk>> {
        self.iter().find(|c| {
            let c = &*c.as_ptr();
            !c.in_use && c.size >= size
        })
    }

    /// Returns the chunk whose `next` is `chunk` or `None` if `chunk` is the head
    /// or not part of the sequence.
    /// This operation has a time complexity of *O*(n).
    ///
    /// # Safety
    /// See [`iter`](ChunkSequence::iter).
    pub unsafe fn predecessor_of(&self, chunk: NonNull<Chunk>) -> Option<NonNull<Chunk>> {
        self.iter().find(|c| (*c.as_ptr()).next == chunk.as_ptr())
    }

    /// Returns the last chunk or `None` if the sequence is empty.
    ///
    /// # Safety
    /// See [`iter`](ChunkSequence::iter).
    pub unsafe fn tail(&self) -> Option<NonNull<Chunk>> {
        self.iter().last()
    }

    /// Links `chunk` after the last chunk of the sequence.
    ///
    /// # Safety
    /// `chunk` must be an initialized header that is not yet part of the sequence and
    /// whose `next` is null. See also [`iter`](ChunkSequence::iter).
    pub unsafe fn append(&mut self, chunk: NonNull<Chunk>) {
        debug_assert!((*chunk.as_ptr()).next.is_null());
        match self.tail() {
            None => self.head = chunk.as_ptr(),
            Some(tail) => (*tail.as_ptr()).next = chunk.as_ptr(),
        }
    }
}

pub struct Iter<'a> {
    cur: *mut Chunk,
    _seq: PhantomData<&'a ChunkSequence>,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<Chunk>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let cur = NonNull::new(self.cur)?;
        self.cur = unsafe { (*cur.as_ptr()).next };
        Some(cur)
    }
}
