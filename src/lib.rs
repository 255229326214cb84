//! A first-fit chunk allocator over anonymous memory mappings.
//!
//! The heap is built exclusively from memory obtained from the OS through `mmap`; no other
//! allocator is involved. It is a small, readable design rather than a production allocator:
//! one shared arena, one lock, first-fit search, and merging of immediate neighbours only.
//!
//! # Usage
//! ```
//! use chunk_malloc::{Heap, HeapConfig, MmapGrower};
//!
//! static HEAP: Heap<MmapGrower> =
//!     Heap::with_config(MmapGrower::new(), HeapConfig::new().with_initial_pages(4));
//!
//! fn main() {
//!     HEAP.init().expect("Couldn't map the initial region.");
//!
//!     let p = HEAP.allocate(100).unwrap();
//!     assert_eq!(p.as_ptr() as usize % 16, 0);
//!     unsafe { HEAP.free(p.as_ptr()) };
//! }
//! ```
//!
//! A [`Heap`] can also serve as the global allocator, in which case it initializes
//! itself on the first allocation:
//! ```no_run
//! use chunk_malloc::{Heap, MmapGrower};
//!
//! #[global_allocator]
//! static ALLOCATOR: Heap<MmapGrower> = Heap::new(MmapGrower::new());
//!
//! fn main() {
//!     let v: Vec<u32> = vec![1, 2, 3];
//!     println!("Chunks are cool {:?}", v);
//! }
//! ```
//!
//! # Allocators
//! Two allocators are exported by this crate - [`RawHeap`] and [`Heap`].
//! [`RawHeap`] is single-threaded and operates on `&mut self`,
//! [`Heap`] is just a `Mutex` wrapper over it to allow for multithreading.
//!
//! # Mode of operation
//! - When an allocation is requested its size is rounded up to 16 bytes and the chunk
//!   sequence is walked from the start. The first free chunk that is large enough wins.
//!   If it has room for more than one extra header past the request, the surplus is split
//!   off as a new free chunk.
//! - If no chunk is large enough the heap asks its [grower](#growers) for a fresh region big
//!   enough for the request plus a header and searches once more.
//! - When an allocation is freed its chunk is marked free and merged with its immediate
//!   neighbours if they are free too.
//!
//! ## Chunks
//! Every byte of the heap belongs to a chunk: a header followed by a payload.
//! The header stores the payload size, whether the chunk is in use and a link to the next chunk.
//! Callers only ever see payload addresses.
//!
//! ## The chunk sequence
//! All chunks, free or not, form one singly linked list in address order. Inside a region
//! each chunk's successor starts right where its payload ends. Regions are appended at the end
//! of the sequence and are never merged, so two chunks of different regions never coalesce.
//! Because there are no back links, merging a freed chunk into its predecessor requires a
//! scan from the head of the sequence; freeing is linear in the number of chunks.
//!
//! ## Growers
//! A grower is the heap's source of raw memory: anything that implements [`Grower`] and can
//! hand out fresh page-granular regions. [`MmapGrower`] maps private anonymous memory.
//!
//! [`Grower`]: growers::Grower
//! [`MmapGrower`]: growers::MmapGrower

pub use crate::allocators::{ChunkInfo, Heap, RawHeap};
pub use crate::config::HeapConfig;
pub use crate::error::HeapError;
pub use crate::growers::{Grower, MmapGrower};
pub use crate::header::{CHUNK_ALIGN, HEADER_SIZE};

pub mod allocators;
mod arena;
pub mod config;
mod error;
pub mod growers;
mod header;
mod sequence;
mod util;
