//! The sixteen segregated free lists.
//!
//! The bin heads are not native statics: they live in the first 64 bytes of
//! the heap itself, as `u32` heap offsets (0 = nil), so every link in the
//! structure, heads included, survives in the heap image.
//!
//! A bin's head is the most recently inserted block. `prev_free` walks from
//! the head toward older entries, `next_free` toward newer ones; the search
//! in `heap.rs` traverses via `prev_free`, so recently freed blocks are
//! reconsidered first. Bins 0..=4 hold exactly one size each (16, 24, 32,
//! 40, 48), which is what lets the search take their head without scanning.

use crate::block;
use crate::raw::{Offset, RawHeap, NIL};

/// Number of segregated lists.
pub(crate) const NUM_BINS: usize = 16;

/// Bytes reserved at the bottom of the heap for the bin heads.
pub(crate) const SEG_BYTES: u32 = (NUM_BINS as u32) * 4;

/// Map a block size to its bin. Monotone nondecreasing; exact-size bins
/// 0..=4 first, then ranges growing hyper-exponentially.
pub(crate) fn index_of(size: u32) -> usize {
    extra_assert!(size >= block::MINSIZE);
    if size <= 48 {
        return (size as usize >> 3) - 2;
    }
    match size {
        49..=72 => 5,
        73..=136 => 6,
        137..=264 => 7,
        265..=520 => 8,
        521..=1032 => 9,
        1033..=2056 => 10,
        2057..=4104 => 11,
        4105..=16392 => 12,
        16393..=32774 => 13,
        32775..=262152 => 14,
        _ => 15,
    }
}

pub(crate) fn head(h: &RawHeap, bin: usize) -> Offset {
    extra_assert!(bin < NUM_BINS);
    h.get32(bin as u32 * 4)
}

fn set_head(h: &RawHeap, bin: usize, to: Offset) {
    extra_assert!(bin < NUM_BINS);
    h.set32(bin as u32 * 4, to);
}

pub(crate) fn clear(h: &RawHeap) {
    for bin in 0..NUM_BINS {
        set_head(h, bin, NIL);
    }
}

/// Push a free block onto the head of its bin.
///
/// Precondition: the block is free, its header is current, and it is not
/// the wilderness (the wilderness belongs to no bin).
pub(crate) fn insert(h: &RawHeap, p: Offset) {
    extra_assert!(!block::is_alloc(h, p));
    let bin = index_of(block::size(h, p));
    let last = head(h, bin);
    set_head(h, bin, p);
    block::set_prev_free(h, p, last);
    block::set_next_free(h, p, NIL);
    if last != NIL {
        block::set_next_free(h, last, p);
    }
}

/// Unlink a free block from its bin.
pub(crate) fn remove(h: &RawHeap, p: Offset) {
    extra_assert!(!block::is_alloc(h, p));
    let bin = index_of(block::size(h, p));
    let prev = block::prev_free(h, p);
    let next = block::next_free(h, p);
    if head(h, bin) == p {
        set_head(h, bin, prev);
        if prev != NIL {
            block::set_next_free(h, prev, NIL);
        }
    } else if prev == NIL {
        // Oldest entry of a multi-element bin.
        block::set_prev_free(h, next, NIL);
    } else {
        block::set_prev_free(h, next, prev);
        block::set_next_free(h, prev, next);
    }
}
