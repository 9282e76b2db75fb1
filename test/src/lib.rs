//! Randomized model testing for `segfit_alloc`.
//!
//! An `Operations` value is a whole allocator workload: a sequence of
//! allocations, frees, and reallocations over one private heap. Running it
//! fills every allocation with a known byte pattern, verifies the pattern
//! at every free and across every reallocation, and runs the full heap
//! checker after each step, so a run both exercises the allocator and
//! proves the heap never goes inconsistent or hands out overlapping
//! blocks.
//!
//! Everything here builds private heaps, one per run, which the
//! claim-once static-array backend cannot provide; under that feature the
//! whole model suite is compiled out and only the singleton tests in
//! `tests/` remain.

#![cfg(not(feature = "static_array_backend"))]

use std::ptr::{self, NonNull};
use std::slice;

use quickcheck::{Arbitrary, Gen, QuickCheck};
use segfit_alloc::{Arena, Heap};

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Allocate this many bytes.
    Alloc(usize),

    /// Free the n^th allocation made so far; no-op if already freed.
    Free(usize),

    /// Reallocate the n^th allocation to this many bytes; no-op if freed.
    Realloc(usize, usize),
}

pub use Operation::*;

fn pick(g: &mut Gen, n: usize) -> usize {
    usize::arbitrary(g) % n
}

fn one_in(g: &mut Gen, n: usize) -> bool {
    pick(g, n) == 0
}

/// An allocation size, biased the way the allocator is shaped: mostly
/// small, some spanning the 64 KiB encoding boundary, a few properly
/// large.
fn arbitrary_size(g: &mut Gen) -> usize {
    if one_in(g, 1000) {
        return 0;
    }
    if one_in(g, 25) {
        // Right around the small/large encoding boundary.
        return 65_400 + pick(g, 300);
    }
    if one_in(g, 20) {
        // Large path.
        return 65_536 + pick(g, 130_000);
    }
    1 + pick(g, 512)
}

impl Operation {
    fn arbitrary_alloc(g: &mut Gen, active: &mut Vec<usize>, made: &mut usize) -> Self {
        active.push(*made);
        *made += 1;
        Alloc(arbitrary_size(g))
    }

    fn arbitrary_free(g: &mut Gen, active: &mut Vec<usize>) -> Self {
        assert!(!active.is_empty());
        let i = pick(g, active.len());
        Free(active.swap_remove(i))
    }

    fn arbitrary_realloc(g: &mut Gen, active: &[usize]) -> Self {
        assert!(!active.is_empty());
        let i = pick(g, active.len());
        Realloc(active[i], arbitrary_size(g))
    }
}

#[derive(Debug, Clone)]
pub struct Operations(pub Vec<Operation>);

const NUM_OPERATIONS: usize = 2_000;

impl Arbitrary for Operations {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut made = 0;
        let mut active = vec![];
        let mut ops = Vec::with_capacity(NUM_OPERATIONS);

        for _ in 0..NUM_OPERATIONS {
            // Free with P = 1/4, realloc with P = 1/8, allocate otherwise,
            // so the heap keeps growing and the free lists keep churning.
            if !active.is_empty() && one_in(g, 4) {
                ops.push(Operation::arbitrary_free(g, &mut active));
            } else if !active.is_empty() && one_in(g, 8) {
                ops.push(Operation::arbitrary_realloc(g, &active));
            } else {
                ops.push(Operation::arbitrary_alloc(g, &mut active, &mut made));
            }
        }

        // Wind the workload down to empty so every run also exercises the
        // full-coalesce endgame.
        ops.reserve_exact(active.len());
        while !active.is_empty() {
            ops.push(Operation::arbitrary_free(g, &mut active));
        }

        Operations(ops)
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let ops = self.0.clone();
        let prefixes =
            (0..self.0.len()).map(move |i| Operations(ops.iter().cloned().take(i).collect()));

        let ops = self.0.clone();
        let smaller_allocs = (0..self.0.len()).map(move |i| {
            Operations(
                ops.iter()
                    .enumerate()
                    .map(|(j, op)| match *op {
                        Alloc(size) if i == j => Alloc(size / 2),
                        Realloc(idx, size) if i == j => Realloc(idx, size / 2),
                        op => op,
                    })
                    .collect(),
            )
        });

        Box::new(prefixes.chain(smaller_allocs))
    }
}

/// A live allocation: where it is, how big it is, and the byte it is
/// filled with.
struct Live {
    ptr: NonNull<u8>,
    size: usize,
    fill: u8,
}

fn verify(live: &Live) {
    let bytes = unsafe { slice::from_raw_parts(live.ptr.as_ptr(), live.size) };
    assert!(
        bytes.iter().all(|&b| b == live.fill),
        "allocation of {} bytes at {:p} lost its fill pattern",
        live.size,
        live.ptr
    );
}

impl Operations {
    /// Run the workload against a fresh private heap, checking everything
    /// checkable at every step.
    pub fn run(&self) {
        let mut heap = Heap::new(Arena::new().expect("arena")).expect("heap bootstrap");
        let mut allocs: Vec<Option<Live>> = Vec::new();

        for (step, op) in self.0.iter().enumerate() {
            let fill = (step % 251) as u8;
            match *op {
                Alloc(size) => match heap.allocate(size) {
                    Some(ptr) => {
                        assert_eq!(ptr.as_ptr() as usize % 8, 0);
                        unsafe { ptr::write_bytes(ptr.as_ptr(), fill, size) };
                        allocs.push(Some(Live { ptr, size, fill }));
                    }
                    None => {
                        assert_eq!(size, 0, "allocation of {} bytes failed", size);
                        allocs.push(None);
                    }
                },
                Free(idx) => {
                    if let Some(entry) = allocs.get_mut(idx) {
                        if let Some(live) = entry.take() {
                            verify(&live);
                            unsafe { heap.release(live.ptr.as_ptr()) };
                        }
                    }
                }
                Realloc(idx, size) => {
                    if let Some(entry) = allocs.get_mut(idx) {
                        if let Some(live) = entry.take() {
                            verify(&live);
                            match unsafe { heap.reallocate(live.ptr.as_ptr(), size) } {
                                Some(ptr) => {
                                    // The prefix must survive the move.
                                    let keep = live.size.min(size);
                                    let bytes =
                                        unsafe { slice::from_raw_parts(ptr.as_ptr(), keep) };
                                    assert!(bytes.iter().all(|&b| b == live.fill));
                                    unsafe { ptr::write_bytes(ptr.as_ptr(), fill, size) };
                                    *entry = Some(Live { ptr, size, fill });
                                }
                                None => {
                                    // Only the free-and-nil case; the
                                    // workload never outgrows the provider.
                                    assert_eq!(size, 0);
                                }
                            }
                        }
                    }
                }
            }
            heap.check(false);
        }

        // Drain whatever the workload left behind; the heap must collapse
        // back to a single wilderness without tripping the checker.
        for entry in allocs.iter_mut() {
            if let Some(live) = entry.take() {
                verify(&live);
                unsafe { heap.release(live.ptr.as_ptr()) };
            }
        }
        heap.check(false);
    }
}

macro_rules! run_quickchecks {
    ($name:ident) => {
        #[test]
        fn $name() {
            fn model(ops: Operations) {
                ops.run();
            }

            // A generous generator size so the integer draws behind
            // `arbitrary_size` actually span the large-allocation range.
            QuickCheck::new()
                .gen(Gen::new(1 << 21))
                .tests(2)
                .quickcheck(model as fn(Operations) -> ());
        }
    };
}

// Let the test harness run our quickchecks concurrently with each other.
run_quickchecks!(quickchecks_0);
run_quickchecks!(quickchecks_1);
run_quickchecks!(quickchecks_2);
run_quickchecks!(quickchecks_3);

////////////////////////////////////////////////////////////////////////////////

#[test]
fn regression_lone_allocation() {
    Operations(vec![Alloc(1)]).run();
}

#[test]
fn regression_reuse_after_free() {
    Operations(vec![Alloc(1414), Free(0), Alloc(1414), Free(1)]).run();
}

#[test]
fn regression_zero_size_between_frees() {
    Operations(vec![Alloc(168), Free(0), Alloc(0), Alloc(168), Free(2)]).run();
}

#[test]
fn regression_shrinking_refill() {
    Operations(vec![Alloc(13672), Free(0), Alloc(1)]).run();
}

#[test]
fn regression_boundary_then_large() {
    Operations(vec![Alloc(65520), Free(0), Alloc(80000), Free(1)]).run();
}

#[test]
fn regression_realloc_across_the_boundary() {
    Operations(vec![Alloc(60000), Realloc(0, 70000), Realloc(0, 120), Free(0)]).run();
}

#[test]
fn allocate_size_zero() {
    use std::iter;
    Operations(
        iter::repeat(Alloc(0))
            .take(1000)
            .chain((0..1000).map(Free))
            .collect(),
    )
    .run();
}

#[test]
fn allocate_many_small() {
    use std::iter;
    Operations(
        iter::repeat(Alloc(16))
            .take(100)
            .chain((0..100).map(Free))
            .chain(iter::repeat(Alloc(256)).take(100))
            .chain((0..100).map(|i| Free(i + 100)))
            .collect(),
    )
    .run();
}

#[test]
fn allocate_many_large() {
    use std::iter;
    Operations(
        iter::repeat(Alloc(70_000))
            .take(50)
            .chain((0..50).map(Free))
            .chain(iter::repeat(Alloc(260_000)).take(50))
            .chain((0..50).map(|i| Free(i + 50)))
            .collect(),
    )
    .run();
}

////////////////////////////////////////////////////////////////////////////////

// Adapted from
// https://github.com/alexcrichton/dlmalloc-rs/blob/master/tests/smoke.rs

#[test]
fn smoke() {
    let mut heap = Heap::new(Arena::new().unwrap()).unwrap();
    unsafe {
        let ptr = heap.allocate(1).expect("should allocate one byte");
        *ptr.as_ptr() = 9;
        assert_eq!(*ptr.as_ptr(), 9);
        heap.release(ptr.as_ptr());

        let ptr = heap.allocate(1).expect("should allocate again");
        *ptr.as_ptr() = 10;
        assert_eq!(*ptr.as_ptr(), 10);
        heap.release(ptr.as_ptr());
    }
}

// Too slow with the extra assertion checks enabled, and the fixed-size
// static backend is too small.
#[test]
#[cfg(not(any(feature = "extra_assertions", feature = "static_array_backend")))]
fn stress() {
    use rand::Rng;

    let mut heap = Heap::new(Arena::new().unwrap()).unwrap();
    let mut rng = rand::thread_rng();
    let mut ptrs: Vec<(NonNull<u8>, usize)> = Vec::new();
    unsafe {
        for _ in 0..100_000 {
            let free = !ptrs.is_empty()
                && ((ptrs.len() < 1_000 && rng.gen_bool(1.0 / 3.0)) || rng.gen());
            if free {
                let idx = rng.gen_range(0..ptrs.len());
                let (ptr, _size) = ptrs.swap_remove(idx);
                heap.release(ptr.as_ptr());
                continue;
            }

            if !ptrs.is_empty() && rng.gen_bool(0.01) {
                let idx = rng.gen_range(0..ptrs.len());
                let (ptr, size) = ptrs.swap_remove(idx);
                let new_size = if rng.gen() {
                    rng.gen_range(size..size * 2 + 1)
                } else if size > 10 {
                    rng.gen_range(size / 2..size)
                } else {
                    ptrs.push((ptr, size));
                    continue;
                };
                let mut tmp = Vec::new();
                for i in 0..size.min(new_size) {
                    tmp.push(*ptr.as_ptr().add(i));
                }
                let ptr = heap.reallocate(ptr.as_ptr(), new_size).unwrap();
                for (i, byte) in tmp.iter().enumerate() {
                    assert_eq!(*byte, *ptr.as_ptr().add(i));
                }
                ptrs.push((ptr, new_size));
            }

            let size = if rng.gen() {
                rng.gen_range(1..128)
            } else {
                rng.gen_range(1..128 * 1024)
            };

            let zero = rng.gen_bool(0.02);
            let ptr = if zero {
                heap.zeroed_allocate(1, size).unwrap()
            } else {
                heap.allocate(size).unwrap()
            };
            for i in 0..size {
                if zero {
                    assert_eq!(*ptr.as_ptr().add(i), 0);
                }
                *ptr.as_ptr().add(i) = 0xce;
            }
            ptrs.push((ptr, size));
        }
    }
    heap.check(false);
}
