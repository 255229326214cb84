//! Construction-time settings for a heap.

/// Number of pages mapped by [`Heap::init`](crate::Heap::init) when no other value is given.
pub const DEFAULT_INITIAL_PAGES: usize = 10;

/// Settings consumed when a heap is initialized.
///
/// Every constructor is `const` so that a configured heap can be placed in a `static`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    initial_pages: usize,
}

impl HeapConfig {
    #[inline]
    pub const fn new() -> Self {
        HeapConfig {
            initial_pages: DEFAULT_INITIAL_PAGES,
        }
    }

    /// Sets how many pages the first region spans. A count of 0 is treated as 1.
    #[inline]
    pub const fn with_initial_pages(mut self, pages: usize) -> Self {
        self.initial_pages = if pages == 0 { 1 } else { pages };
        self
    }

    #[inline]
    pub const fn initial_pages(&self) -> usize {
        self.initial_pages
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig::new()
    }
}
