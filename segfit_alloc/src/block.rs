//! The on-heap block codec.
//!
//! A block with payload offset `p` owns the bytes `[p-2, p-2+size)`. The
//! 16-bit header tag at `p-2` packs the size (a multiple of 8, so the low
//! three bits are free) with three flags:
//!
//! ```text
//! 15........3   2     1      0
//! [  size   ] LARGE PALLOC ALLOC
//! ```
//!
//! Small blocks (size < 64 KiB) store the size in the tag itself. Large
//! blocks store the all-ones sentinel in the tag's size field and the true
//! size as a 32-bit word at `p` (its low bits mirror the flags and are
//! masked off on read). The footer mirrors the header at the other end of
//! the block: the tag is the block's last two bytes, the large extension
//! word sits just before it. Footers are current for free blocks and for
//! large allocated blocks only; small allocated blocks hand those bytes to
//! the payload and rely on the successor's PALLOC flag instead.
//!
//! Allocated large blocks additionally keep a copy of the header tag at
//! `p+6`. Their externally exposed pointer is `p+8` (keeping it 8-aligned
//! past the extension word), and `release` finds its way back by reading
//! the 16-bit word two bytes below the exposed pointer: for a small block
//! that is the real header, and for a large block it must still be a tag
//! with the LARGE bit set.
//!
//! Free blocks carry their list links as heap offsets in the payload:
//! `prev_free` then `next_free`, at `p`/`p+4` for small blocks and at
//! `p+4`/`p+8` for large ones (after the extension word).

use crate::raw::{Offset, RawHeap};

pub(crate) const HSIZE: u32 = 2;
pub(crate) const WSIZE: u32 = 4;
pub(crate) const DSIZE: u32 = 8;

/// Minimum block size: header + the two free-list links + footer.
pub(crate) const MINSIZE: u32 = 16;

/// This block is allocated.
pub(crate) const ALLOC: u16 = 0x1;
/// The block immediately before this one is allocated.
pub(crate) const PALLOC: u16 = 0x2;
/// The block uses the large encoding; its size lives in the extension word.
pub(crate) const LARGE: u16 = 0x4;

/// Size-field value reserved for the large encoding (all thirteen bits set).
/// Only meaningful together with the LARGE flag; a tag holding 65528 with
/// LARGE clear is an ordinary small block of that size.
pub(crate) const LARGE_SENTINEL: u16 = 65528;

/// Smallest size that must use the large encoding.
pub(crate) const LARGE_MIN: u32 = 65536;

fn pack16(size: u32, palloc: bool, alloc: bool) -> u16 {
    extra_assert!(size < LARGE_MIN);
    extra_assert_eq!(size % 8, 0);
    size as u16 | flags(palloc, alloc)
}

fn flags(palloc: bool, alloc: bool) -> u16 {
    (if palloc { PALLOC } else { 0 }) | (if alloc { ALLOC } else { 0 })
}

fn large_tag(palloc: bool, alloc: bool) -> u16 {
    LARGE_SENTINEL | LARGE | flags(palloc, alloc)
}

pub(crate) fn is_large_tag(tag: u16) -> bool {
    tag & LARGE != 0
}

/// The block's size, from its header.
pub(crate) fn size(h: &RawHeap, p: Offset) -> u32 {
    let tag = h.get16(p - HSIZE);
    if is_large_tag(tag) {
        h.get32(p) & !0x7
    } else {
        (tag & !0x7) as u32
    }
}

/// The block's size, from its footer. Only meaningful when the footer is
/// current (free blocks, large allocated blocks).
pub(crate) fn footer_size(h: &RawHeap, p: Offset) -> u32 {
    let end = p + size(h, p);
    let tag = h.get16(end - WSIZE);
    if is_large_tag(tag) {
        h.get32(end - DSIZE) & !0x7
    } else {
        (tag & !0x7) as u32
    }
}

pub(crate) fn is_alloc(h: &RawHeap, p: Offset) -> bool {
    h.get16(p - HSIZE) & ALLOC != 0
}

pub(crate) fn is_palloc(h: &RawHeap, p: Offset) -> bool {
    h.get16(p - HSIZE) & PALLOC != 0
}

pub(crate) fn is_large(h: &RawHeap, p: Offset) -> bool {
    is_large_tag(h.get16(p - HSIZE))
}

/// Flags of the footer tag, for the checker's header/footer agreement test.
pub(crate) fn footer_flags(h: &RawHeap, p: Offset) -> (bool, bool, bool) {
    let tag = h.get16(p + size(h, p) - WSIZE);
    (tag & LARGE != 0, tag & PALLOC != 0, tag & ALLOC != 0)
}

/// Rewrite the PALLOC flag in the header tag at `p-2` without touching the
/// rest of the tag. Used on a block's successor whenever the block's
/// allocation state changes.
pub(crate) fn set_palloc(h: &RawHeap, p: Offset, palloc: bool) {
    let tag = h.get16(p - HSIZE);
    let tag = if palloc { tag | PALLOC } else { tag & !PALLOC };
    h.set16(p - HSIZE, tag);
}

/// Clear the ALLOC flag in the footer tag of the block at `p`.
pub(crate) fn clear_footer_alloc(h: &RawHeap, p: Offset) {
    let at = p + size(h, p) - WSIZE;
    let tag = h.get16(at);
    h.set16(at, tag & !ALLOC);
}

/// Write the block's header. For large blocks this writes the sentinel tag
/// and the extension word, plus (when allocating) the tag copy at `p+6`
/// that `release` reads through the exposed pointer.
pub(crate) fn write_header(h: &RawHeap, p: Offset, size: u32, palloc: bool, alloc: bool) {
    if size < LARGE_MIN {
        h.set16(p - HSIZE, pack16(size, palloc, alloc));
    } else {
        let tag = large_tag(palloc, alloc);
        h.set16(p - HSIZE, tag);
        h.set32(p, size | flags(palloc, alloc) as u32 | LARGE as u32);
        if alloc {
            h.set16(p + 6, tag);
        }
    }
}

/// Write the block's footer (tag in the last two bytes; for large blocks the
/// extension word just before it).
pub(crate) fn write_footer(h: &RawHeap, p: Offset, size: u32, palloc: bool, alloc: bool) {
    let end = p + size;
    if size < LARGE_MIN {
        h.set16(end - WSIZE, pack16(size, palloc, alloc));
    } else {
        h.set16(end - WSIZE, large_tag(palloc, alloc));
        h.set32(end - DSIZE, size | flags(palloc, alloc) as u32 | LARGE as u32);
    }
}

/// Payload offset of the next block on the heap.
pub(crate) fn next(h: &RawHeap, p: Offset) -> Offset {
    p + size(h, p)
}

/// Payload offset of the previous block on the heap, via its footer. Only
/// valid when the previous block's footer is current, i.e. when PALLOC of
/// this block is clear.
pub(crate) fn prev(h: &RawHeap, p: Offset) -> Offset {
    let tag = h.get16(p - WSIZE);
    let size = if is_large_tag(tag) {
        h.get32(p - DSIZE) & !0x7
    } else {
        (tag & !0x7) as u32
    };
    p - size
}

fn link_base(h: &RawHeap, p: Offset) -> Offset {
    if is_large(h, p) {
        p + WSIZE
    } else {
        p
    }
}

/// Offset of the next-older free block in this block's bin (0 = nil).
pub(crate) fn prev_free(h: &RawHeap, p: Offset) -> Offset {
    extra_assert!(!is_alloc(h, p));
    h.get32(link_base(h, p))
}

/// Offset of the next-newer free block in this block's bin (0 = nil).
pub(crate) fn next_free(h: &RawHeap, p: Offset) -> Offset {
    extra_assert!(!is_alloc(h, p));
    h.get32(link_base(h, p) + WSIZE)
}

pub(crate) fn set_prev_free(h: &RawHeap, p: Offset, to: Offset) {
    h.set32(link_base(h, p), to);
}

pub(crate) fn set_next_free(h: &RawHeap, p: Offset, to: Offset) {
    h.set32(link_base(h, p) + WSIZE, to);
}
