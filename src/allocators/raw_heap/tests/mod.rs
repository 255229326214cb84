use crate::growers::buffer_grower::BufferGrower;
use crate::growers::MmapGrower;

use super::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};


const PAGE: usize = 4096;
const BUF_SIZE: usize = 16 * PAGE;

#[repr(C, align(4096))]
struct Buf([u8; BUF_SIZE]);

impl Buf {
    fn new() -> Box<Buf> {
        Box::new(Buf([0; BUF_SIZE]))
    }

    /// A grower that can hand out at most `pages` pages of this buffer.
    fn grower(&mut self, pages: usize) -> BufferGrower {
        BufferGrower::new(self.0.as_mut_ptr(), pages * PAGE, PAGE)
    }
}

fn pages(n: usize) -> HeapConfig {
    HeapConfig::new().with_initial_pages(n)
}

fn chunks<G: Grower>(heap: &RawHeap<G>) -> Vec<ChunkInfo> {
    let mut chunks = vec![];
    heap.visit_chunks(|c| chunks.push(c));
    chunks
}

fn info_of<G: Grower>(heap: &RawHeap<G>, p: NonNull<u8>) -> ChunkInfo {
    chunks(heap)
        .into_iter()
        .find(|c| c.payload == p)
        .expect("Pointer should be the payload of a chunk.")
}

/// Checks the accounting and layout invariants every public call must leave behind.
fn check_invariants<G: Grower>(heap: &RawHeap<G>) {
    let chunks = chunks(heap);
    let free: usize = chunks.iter().filter(|c| !c.in_use).map(|c| c.size).sum();
    assert_eq!(free, heap.available(), "Available memory should equal free payload bytes.");
    assert_eq!(
        chunks.iter().filter(|c| c.region_head).count(),
        heap.regions(),
        "Every region should start with exactly one region head."
    );
    if let Some(first) = chunks.first() {
        assert!(first.region_head);
    }

    for c in &chunks {
        assert_eq!(c.payload.as_ptr() as usize % CHUNK_ALIGN, 0);
        assert_eq!(c.size % CHUNK_ALIGN, 0);
    }
    for w in chunks.windows(2) {
        if w[1].region_head {
            continue;
        }
        assert_eq!(
            w[0].payload.as_ptr() as usize + w[0].size + HEADER_SIZE,
            w[1].payload.as_ptr() as usize,
            "Chunks of one region should be contiguous."
        );
        assert!(w[0].in_use || w[1].in_use, "Neighbouring free chunks should be merged.");
    }
}

#[test]
fn test_init() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(4));
    assert!(!heap.is_ready());

    heap.init().unwrap();
    assert!(heap.is_ready());
    assert_eq!(heap.available(), 4 * PAGE - HEADER_SIZE);
    assert_eq!(heap.regions(), 1);
    check_invariants(&heap);
}

#[test]
fn test_init_is_idempotent() {
    let mut buf = Buf::new();
    let mut grower = buf.grower(16);
    {
        let mut heap = RawHeap::with_config(&mut grower, pages(2));
        heap.init().unwrap();
        let p = heap.allocate(32).unwrap();
        let available = heap.available();
        heap.init().unwrap();
        assert_eq!(heap.available(), available);
        assert_eq!(info_of(&heap, p).size, 32);
    }
    assert_eq!(grower.maps, 1);
}

#[test]
fn test_init_out_of_memory() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(2), pages(4));
    assert_eq!(heap.init(), Err(HeapError::OutOfMemory));
    assert!(!heap.is_ready());
    assert_eq!(heap.allocate(16), Err(HeapError::NotInitialized));
}

#[test]
fn test_not_initialized() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::new(buf.grower(16));
    assert_eq!(heap.allocate(100), Err(HeapError::NotInitialized));
    unsafe { heap.free(core::ptr::null_mut()) };
    assert!(!heap.is_ready());
    assert_eq!(heap.available(), 0);
    assert!(chunks(&heap).is_empty());
}

#[test]
fn test_allocate_and_free_restores_available() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(4));
    heap.init().unwrap();
    let before = heap.available();

    let p = heap.allocate(100).unwrap();
    assert_eq!(p.as_ptr() as usize % 16, 0);
    assert_eq!(heap.available(), before - (112 + HEADER_SIZE));
    assert_eq!(info_of(&heap, p).size, 112);
    unsafe { p.as_ptr().write_bytes(0xEE, 100) };
    check_invariants(&heap);

    unsafe { heap.free(p.as_ptr()) };
    assert_eq!(heap.available(), before);
    assert_eq!(chunks(&heap).len(), 1);
    check_invariants(&heap);
}

#[test]
fn test_zero_size() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();
    let before = chunks(&heap);
    let available = heap.available();

    assert_eq!(heap.allocate(0), Err(HeapError::InvalidArgument));
    assert_eq!(chunks(&heap), before);
    assert_eq!(heap.available(), available);
}

#[test]
fn test_free_null() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();
    let _p = heap.allocate(48).unwrap();
    let before = chunks(&heap);
    let available = heap.available();

    unsafe { heap.free(core::ptr::null_mut()) };
    assert_eq!(chunks(&heap), before);
    assert_eq!(heap.available(), available);
}

#[test]
fn test_first_fit_reuse() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();

    let p1 = heap.allocate(64).unwrap();
    let p2 = heap.allocate(64).unwrap();
    assert_eq!(p1.as_ptr() as usize + 64 + HEADER_SIZE, p2.as_ptr() as usize);

    unsafe { heap.free(p1.as_ptr()) };
    let p3 = heap.allocate(64).unwrap();
    assert_eq!(p1, p3);
    assert_eq!(heap.regions(), 1);
    check_invariants(&heap);
}

#[test]
fn test_first_fit_takes_earliest_chunk() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();

    let p1 = heap.allocate(256).unwrap();
    let _guard1 = heap.allocate(16).unwrap();
    let p2 = heap.allocate(256).unwrap();
    let _guard2 = heap.allocate(16).unwrap();
    unsafe {
        heap.free(p2.as_ptr());
        heap.free(p1.as_ptr());
    }

    // Both holes fit, the one closer to the head wins and gets split.
    let p3 = heap.allocate(64).unwrap();
    assert_eq!(p3, p1);
    assert_eq!(info_of(&heap, p3).size, 64);
    check_invariants(&heap);
}

#[test]
fn test_split_threshold() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();
    let whole = PAGE - HEADER_SIZE;

    // A remainder of exactly one header is not worth a chunk.
    let p = heap.allocate(whole - 2 * HEADER_SIZE).unwrap();
    assert_eq!(info_of(&heap, p).size, whole);
    assert_eq!(heap.available(), 0);
    assert_eq!(chunks(&heap).len(), 1);
    unsafe { heap.free(p.as_ptr()) };
    assert_eq!(heap.available(), whole);

    // One alignment step more and the remainder gets its own chunk.
    let p = heap.allocate(whole - 2 * HEADER_SIZE - CHUNK_ALIGN).unwrap();
    assert_eq!(info_of(&heap, p).size, whole - 2 * HEADER_SIZE - CHUNK_ALIGN);
    let all = chunks(&heap);
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].size, HEADER_SIZE + CHUNK_ALIGN);
    assert!(!all[1].in_use);
    check_invariants(&heap);
}

#[test]
fn test_coalesce_forward() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();

    let p1 = heap.allocate(64).unwrap();
    let p2 = heap.allocate(64).unwrap();
    let _p3 = heap.allocate(64).unwrap();
    unsafe {
        heap.free(p2.as_ptr());
        heap.free(p1.as_ptr());
    }

    let all = chunks(&heap);
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].payload, p1);
    assert_eq!(all[0].size, 2 * 64 + HEADER_SIZE);
    assert!(!all[0].in_use);
    check_invariants(&heap);
}

#[test]
fn test_coalesce_backward() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();

    let p1 = heap.allocate(64).unwrap();
    let p2 = heap.allocate(64).unwrap();
    let _p3 = heap.allocate(64).unwrap();
    unsafe {
        heap.free(p1.as_ptr());
        heap.free(p2.as_ptr());
    }

    let all = chunks(&heap);
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].payload, p1);
    assert_eq!(all[0].size, 2 * 64 + HEADER_SIZE);
    check_invariants(&heap);
}

#[test]
fn test_coalesce_both_sides() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(4));
    heap.init().unwrap();
    let initial = heap.available();

    let p1 = heap.allocate(100).unwrap();
    let p2 = heap.allocate(200).unwrap();
    let p3 = heap.allocate(300).unwrap();
    unsafe {
        heap.free(p1.as_ptr());
        heap.free(p3.as_ptr());
        check_invariants(&heap);
        heap.free(p2.as_ptr());
    }

    let all = chunks(&heap);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].size, 4 * PAGE - HEADER_SIZE);
    assert_eq!(heap.available(), initial);
}

#[test]
fn test_available_counts_free_payload() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();
    let initial = heap.available();

    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();
    let c = heap.allocate(64).unwrap();
    let all_in_use = heap.available();
    assert_eq!(all_in_use, initial - 3 * (64 + HEADER_SIZE));

    // No neighbour to merge with, only the payload comes back.
    unsafe { heap.free(b.as_ptr()) };
    assert_eq!(heap.available(), all_in_use + 64);

    // Merging with `b` also gives back the absorbed header.
    unsafe { heap.free(a.as_ptr()) };
    assert_eq!(heap.available(), all_in_use + 2 * 64 + HEADER_SIZE);
    check_invariants(&heap);

    // Merging on both sides restores the single initial chunk.
    unsafe { heap.free(c.as_ptr()) };
    assert_eq!(heap.available(), initial);
    check_invariants(&heap);
}

#[test]
fn test_double_free_is_ignored() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();

    let p1 = heap.allocate(64).unwrap();
    let p2 = heap.allocate(64).unwrap();
    unsafe { heap.free(p1.as_ptr()) };
    let snapshot = chunks(&heap);
    let available = heap.available();

    unsafe { heap.free(p1.as_ptr()) };
    assert_eq!(chunks(&heap), snapshot);
    assert_eq!(heap.available(), available);

    // The neighbour is still intact and frees normally.
    unsafe { heap.free(p2.as_ptr()) };
    assert_eq!(chunks(&heap).len(), 1);
    check_invariants(&heap);
}

#[test]
fn test_growth() {
    let mut buf = Buf::new();
    let mut grower = buf.grower(16);
    {
        let mut heap = RawHeap::with_config(&mut grower, pages(1));
        heap.init().unwrap();
        assert!(heap.available() < 2 * PAGE);

        let p = heap.allocate(2 * PAGE).unwrap();
        assert_eq!(heap.regions(), 2);
        let info = info_of(&heap, p);
        assert!(info.size >= 2 * PAGE);
        assert!(info.region_head);
        unsafe { p.as_ptr().write_bytes(0x11, 2 * PAGE) };
        check_invariants(&heap);
    }
    assert_eq!(grower.maps, 2);
}

#[test]
fn test_growth_for_near_page_sizes() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();

    // Requests within a header of a page still get a single satisfying region.
    for size in [PAGE - HEADER_SIZE, PAGE - HEADER_SIZE + 1, PAGE, PAGE + 1] {
        let regions = heap.regions();
        let p = heap.allocate(size).unwrap();
        assert!(heap.regions() <= regions + 1);
        assert!(info_of(&heap, p).size >= size);
        check_invariants(&heap);
    }
}

#[test]
fn test_region_boundary_caps_coalescing() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(1));
    heap.init().unwrap();
    let whole = PAGE - HEADER_SIZE;

    let p1 = heap.allocate(whole).unwrap();
    assert_eq!(heap.available(), 0);
    let p2 = heap.allocate(whole).unwrap();
    assert_eq!(heap.regions(), 2);
    // The buffer grower hands out adjacent regions, only the region head stops the merge.
    assert_eq!(p1.as_ptr() as usize + whole + HEADER_SIZE, p2.as_ptr() as usize);

    unsafe {
        heap.free(p1.as_ptr());
        heap.free(p2.as_ptr());
    }
    let all = chunks(&heap);
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|c| !c.in_use && c.size == whole));
    assert_eq!(heap.available(), 2 * whole);
    check_invariants(&heap);
}

#[test]
fn test_growth_out_of_memory() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(2), pages(1));
    heap.init().unwrap();
    let snapshot = chunks(&heap);
    let available = heap.available();

    assert_eq!(heap.allocate(4 * PAGE), Err(HeapError::OutOfMemory));
    assert_eq!(chunks(&heap), snapshot);
    assert_eq!(heap.available(), available);
    assert_eq!(heap.regions(), 1);

    assert_eq!(heap.allocate(usize::MAX), Err(HeapError::OutOfMemory));
    assert!(heap.allocate(64).is_ok());
}

#[test]
fn test_alignment() {
    let mut buf = Buf::new();
    let mut heap = RawHeap::with_config(buf.grower(16), pages(16));
    heap.init().unwrap();

    let mut live = vec![];
    for size in 1..=128 {
        let p = heap.allocate(size).unwrap();
        assert_eq!(p.as_ptr() as usize % CHUNK_ALIGN, 0);
        unsafe { p.as_ptr().write_bytes(size as u8, size) };
        live.push((p, size));
    }
    for &(p, size) in &live {
        for i in 0..size {
            unsafe { assert_eq!(*p.as_ptr().add(i), size as u8) };
        }
    }
    check_invariants(&heap);
}

#[test]
fn test_random_workload() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut heap = RawHeap::with_config(MmapGrower::new(), pages(1));
    heap.init().unwrap();

    let mut live: Vec<(NonNull<u8>, usize, u8)> = vec![];
    for round in 0..2000 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = rng.gen_range(1..=700);
            let p = heap.allocate(size).unwrap();
            let tag = (round % 251) as u8;
            unsafe { p.as_ptr().write_bytes(tag, size) };
            live.push((p, size, tag));
        } else {
            let (p, size, tag) = live.swap_remove(rng.gen_range(0..live.len()));
            for i in 0..size {
                unsafe { assert_eq!(*p.as_ptr().add(i), tag, "Allocation was overwritten.") };
            }
            unsafe { heap.free(p.as_ptr()) };
        }
        if round % 100 == 0 {
            check_invariants(&heap);
        }
    }

    let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|&(p, size, _)| (p.as_ptr() as usize, p.as_ptr() as usize + size))
        .collect();
    ranges.sort_unstable();
    for w in ranges.windows(2) {
        assert!(w[0].1 <= w[1].0, "Live allocations should never overlap.");
    }

    for (p, _, _) in live.drain(..) {
        unsafe { heap.free(p.as_ptr()) };
    }
    check_invariants(&heap);
    assert_eq!(chunks(&heap).len(), heap.regions());
}

#[test]
fn test_with_logging() {
    tracing::subscriber::with_default(format::subscriber(), || {
        let mut buf = Buf::new();
        let mut heap = RawHeap::with_config(buf.grower(2), pages(1));
        heap.init().unwrap();
        let p1 = heap.allocate(64).unwrap();
        let p2 = heap.allocate(1024).unwrap();
        assert_eq!(heap.allocate(PAGE * 4), Err(HeapError::OutOfMemory));
        unsafe {
            heap.free(p1.as_ptr());
            heap.free(p1.as_ptr());
            heap.free(p2.as_ptr());
        }
        check_invariants(&heap);
    });
}
