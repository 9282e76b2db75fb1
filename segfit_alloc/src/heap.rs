//! The placement engine: search, split, coalesce, growth, and the public
//! operations, all over one `Heap` instance.

use core::ptr::{self, NonNull};

use memory_units::Bytes;

use crate::bins;
use crate::block::{self, DSIZE, HSIZE, LARGE_MIN, MINSIZE, WSIZE};
use crate::provider::{AllocErr, Provider};
use crate::raw::{Offset, RawHeap, NIL};

/// Grow the heap by at least this many bytes at a time.
pub(crate) const CHUNKSIZE: u32 = 192;

/// Payload offset of the prologue sentinel: bin heads (64 bytes), two bytes
/// of alignment padding, then the prologue header.
pub(crate) const PROLOGUE: Offset = bins::SEG_BYTES + WSIZE;

/// Payload offset of the first real block.
pub(crate) const FIRST_BLOCK: Offset = PROLOGUE + WSIZE;

/// Bytes of the bootstrap region: bin heads, padding, prologue header and
/// footer, initial epilogue header.
const BOOT_BYTES: u32 = bins::SEG_BYTES + 2 * WSIZE;

/// Requests above this return nil before any size arithmetic; heap offsets
/// are `u32` and the providers reserve 1 GiB.
const MAX_REQUEST: usize = 1 << 30;

/// A sixteen-bin segregated best-fit allocator over a grow-only heap.
///
/// All bookkeeping beyond these three words lives on the heap itself: the
/// bin heads occupy the first 64 bytes, and free-list links are stored in
/// the payloads of free blocks, as offsets from the provider's base.
pub struct Heap<P: Provider> {
    provider: P,
    /// The top-of-heap free block. Never a member of any bin, never fully
    /// consumed, always at least MINSIZE.
    wilderness: Offset,
    /// Payload offset of the epilogue sentinel (always one past the end of
    /// the heap).
    epilogue: Offset,
}

impl<P: Provider> Heap<P> {
    /// Build an allocator over a fresh provider: seg-list array, prologue,
    /// epilogue, and the initial `CHUNKSIZE` wilderness.
    pub fn new(mut provider: P) -> Result<Heap<P>, AllocErr> {
        let start = provider.grow(Bytes(BOOT_BYTES as usize))?;
        extra_assert_eq!(start.as_ptr(), provider.lo());

        let h = RawHeap::new(provider.lo(), provider.hi());
        bins::clear(&h);
        // Alignment padding, prologue header, prologue footer. The prologue
        // is a zero-size allocated sentinel; its footer is what terminates
        // backward scans from the first block.
        h.set16(PROLOGUE - 2 * HSIZE, 0);
        h.set16(PROLOGUE - HSIZE, block::ALLOC);
        h.set16(PROLOGUE, block::ALLOC);
        // Initial epilogue header, directly after the prologue.
        h.set16(FIRST_BLOCK - HSIZE, block::PALLOC | block::ALLOC);

        let mut heap = Heap {
            provider,
            wilderness: FIRST_BLOCK,
            epilogue: FIRST_BLOCK,
        };
        let bp = heap.extend(CHUNKSIZE)?;
        heap.wilderness = bp;
        Ok(heap)
    }

    fn raw(&self) -> RawHeap {
        RawHeap::new(self.provider.lo(), self.provider.hi())
    }

    /// Allocate `size` bytes. Returns the 8-aligned payload pointer, or
    /// `None` for a zero-size request or when the provider is exhausted.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.debug_check();
        if size == 0 || size > MAX_REQUEST {
            return None;
        }

        // Round up so the payload fits behind the 2-byte header, keep the
        // result a multiple of 8, and never go below MINSIZE. Anything that
        // would need the large encoding gets two more words for the
        // extension machinery; the threshold sits at 65528 rather than
        // 65536 so that a small-encoded asize can never collide with the
        // header sentinel.
        let mut asize = ((size + 1) / DSIZE as usize) * DSIZE as usize + DSIZE as usize;
        if size <= DSIZE as usize - 2 {
            asize += DSIZE as usize;
        }
        if asize >= block::LARGE_SENTINEL as usize {
            asize += 2 * DSIZE as usize;
        }
        debug_assert_ne!(asize, block::LARGE_SENTINEL as usize);
        debug_assert!(asize >= MINSIZE as usize);
        let asize = asize as u32;

        let bp = match self.find_fit(asize) {
            Some(bp) => bp,
            None => {
                // No fit anywhere. Grow by what the wilderness is missing,
                // but never less than CHUNKSIZE.
                let wsize = block::size(&self.raw(), self.wilderness);
                let mut need = asize;
                if asize >= wsize - MINSIZE {
                    need -= wsize - MINSIZE;
                }
                let bp = self.extend(need.max(CHUNKSIZE)).ok()?;
                self.wilderness = bp;
                bp
            }
        };
        self.place(bp, asize);

        // Large blocks expose payload + 8: past the extension word, still
        // 8-aligned, with a tag copy right below it for release to find.
        let user = if asize >= LARGE_MIN { bp + DSIZE } else { bp };
        let p = self.raw().addr(user);
        self.debug_check();
        NonNull::new(p)
    }

    /// Release an allocation. `ptr` must be nil or a live pointer previously
    /// returned by one of the allocating operations on this heap.
    ///
    /// # Safety
    ///
    /// Releasing anything else, or releasing the same pointer twice,
    /// corrupts the heap.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        self.debug_check();
        if ptr.is_null() {
            return;
        }
        let h = self.raw();
        let mut bp = h.offset_of(ptr);
        if block::is_large_tag(h.get16(bp - HSIZE)) {
            // Exposed large pointers sit one double-word past the payload.
            bp -= DSIZE;
        }

        let size = block::size(&h, bp);
        let palloc = block::is_palloc(&h, bp);
        block::write_header(&h, bp, size, palloc, false);
        block::write_footer(&h, bp, size, palloc, false);
        block::set_palloc(&h, block::next(&h, bp), false);

        // Decided before coalescing: if the freed block runs into the
        // wilderness, the merged result replaces it instead of entering a
        // bin. (The wilderness is the last block, so nothing can ever merge
        // in from above it.)
        let absorbs_wilderness = block::next(&h, bp) == self.wilderness;

        let bp = self.coalesce(bp);

        let h = self.raw();
        if absorbs_wilderness {
            self.wilderness = bp;
        } else {
            bins::insert(&h, bp);
            block::set_palloc(&h, block::next(&h, bp), false);
        }
        self.debug_check();
    }

    /// Resize an allocation, always by allocate-copy-release. Returns nil
    /// (leaving the old allocation untouched) if the new block cannot be
    /// allocated; releases and returns nil when `size` is zero.
    ///
    /// # Safety
    ///
    /// Same contract as [`Heap::release`] for `ptr`.
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            self.release(ptr);
            return None;
        }
        if ptr.is_null() {
            return self.allocate(size);
        }

        let new = self.allocate(size)?;

        let h = self.raw();
        let bp = h.offset_of(ptr);
        // Usable payload behind the old pointer: the whole block minus the
        // header (small), or minus the extension machinery at both ends
        // (large). Conservative by a couple of bytes for large blocks, but
        // never smaller than the size originally requested.
        let old_usable = if block::is_large_tag(h.get16(bp - HSIZE)) {
            block::size(&h, bp - DSIZE) as usize - 18
        } else {
            block::size(&h, bp) as usize - HSIZE as usize
        };

        ptr::copy_nonoverlapping(ptr, new.as_ptr(), size.min(old_usable));
        self.release(ptr);
        Some(new)
    }

    /// Allocate a zeroed region for `count` elements of `size` bytes.
    pub fn zeroed_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let bytes = count.checked_mul(size)?;
        let p = self.allocate(bytes)?;
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0, bytes);
        }
        Some(p)
    }

    /// Best-fit search over the bins, falling back to the wilderness. The
    /// returned block has been removed from its bin; the wilderness is
    /// returned in place (it is in none).
    fn find_fit(&mut self, asize: u32) -> Option<Offset> {
        let h = self.raw();

        for bin in bins::index_of(asize)..bins::NUM_BINS {
            let head = bins::head(&h, bin);
            if head == NIL {
                continue;
            }
            extra_assert!(!block::is_alloc(&h, head));

            let mut best: Option<(u32, Offset)> = None;

            let head_size = block::size(&h, head);
            if head_size >= asize {
                // Bins 0..=4 hold a single size each, so their head cannot
                // be beaten by anything deeper in the list.
                if bin <= 4 {
                    bins::remove(&h, head);
                    return Some(head);
                }
                best = Some((head_size - asize, head));
            }

            // Walk toward older entries, keeping the first block with the
            // smallest slack.
            let mut p = block::prev_free(&h, head);
            while p != NIL {
                let size = block::size(&h, p);
                if size >= asize && best.map_or(true, |(slack, _)| size - asize < slack) {
                    best = Some((size - asize, p));
                }
                p = block::prev_free(&h, p);
            }

            if let Some((_, bp)) = best {
                bins::remove(&h, bp);
                return Some(bp);
            }
        }

        // The wilderness serves any request that leaves it at least MINSIZE
        // to carry on with.
        let wsize = block::size(&h, self.wilderness);
        extra_assert!(wsize >= MINSIZE);
        if asize <= wsize - MINSIZE {
            Some(self.wilderness)
        } else {
            None
        }
    }

    /// Carve an allocated block of `asize` bytes out of the chosen host.
    /// The host is either freshly removed from its bin or the wilderness.
    fn place(&mut self, bp: Offset, asize: u32) {
        let h = self.raw();
        extra_assert!(!block::is_alloc(&h, bp));
        let csize = block::size(&h, bp);
        let was_wilderness = bp == self.wilderness;

        if csize - asize >= MINSIZE {
            // Coalescing guarantees the predecessor of any free block is
            // allocated, so the new block's PALLOC is set.
            block::write_header(&h, bp, asize, true, true);
            if asize >= LARGE_MIN {
                block::write_footer(&h, bp, asize, true, true);
            }

            let tail = bp + asize;
            block::write_header(&h, tail, csize - asize, true, false);
            block::write_footer(&h, tail, csize - asize, true, false);
            block::set_palloc(&h, block::next(&h, tail), false);
            if was_wilderness {
                self.wilderness = tail;
            } else {
                bins::insert(&h, tail);
            }
        } else {
            // Consume the whole host. The search never lets the wilderness
            // get here: it only offers the wilderness with MINSIZE slack.
            extra_assert!(!was_wilderness);
            block::write_header(&h, bp, csize, true, true);
            if csize >= LARGE_MIN {
                block::write_footer(&h, bp, csize, true, true);
            }
            block::set_palloc(&h, block::next(&h, bp), true);
        }
    }

    /// Merge a just-freed block with its free neighbors, unlinking absorbed
    /// neighbors from their bins (the wilderness is in none). The caller has
    /// already written `bp`'s header and footer as free.
    fn coalesce(&mut self, bp: Offset) -> Offset {
        let h = self.raw();
        let next = block::next(&h, bp);
        let prev_alloc = block::is_palloc(&h, bp);
        let next_alloc = block::is_alloc(&h, next);
        let mut size = block::size(&h, bp);

        match (prev_alloc, next_alloc) {
            (true, true) => {
                block::clear_footer_alloc(&h, bp);
                bp
            }
            (true, false) => {
                size += block::size(&h, next);
                if next != self.wilderness {
                    bins::remove(&h, next);
                }
                block::write_header(&h, bp, size, true, false);
                block::write_footer(&h, bp, size, true, false);
                bp
            }
            (false, true) => {
                let prev = block::prev(&h, bp);
                let palloc = block::is_palloc(&h, prev);
                size += block::size(&h, prev);
                if prev != self.wilderness {
                    bins::remove(&h, prev);
                }
                block::write_header(&h, prev, size, palloc, false);
                block::write_footer(&h, prev, size, palloc, false);
                prev
            }
            (false, false) => {
                let prev = block::prev(&h, bp);
                size += block::size(&h, prev) + block::size(&h, next);
                if prev != self.wilderness {
                    bins::remove(&h, prev);
                }
                if next != self.wilderness {
                    bins::remove(&h, next);
                }
                block::write_header(&h, prev, size, true, false);
                block::write_footer(&h, prev, size, true, false);
                prev
            }
        }
    }

    /// Ask the provider for `bytes` more (rounded up to a multiple of 8),
    /// stitch the new region in as a free block where the epilogue used to
    /// be, write a fresh epilogue, and coalesce backward. The caller
    /// assigns the result as the new wilderness.
    fn extend(&mut self, bytes: u32) -> Result<Offset, AllocErr> {
        let size = (bytes + DSIZE - 1) & !(DSIZE - 1);
        let start = self.provider.grow(Bytes(size as usize))?;

        let h = self.raw();
        let bp = h.offset_of(start.as_ptr());
        extra_assert_eq!(bp, self.epilogue);

        // The new block inherits its PALLOC from whatever the last block
        // was; at bootstrap that is the epilogue sentinel itself.
        let palloc = block::is_alloc(&h, self.wilderness);
        block::write_header(&h, bp, size, palloc, false);
        block::write_footer(&h, bp, size, palloc, false);

        self.epilogue = bp + size;
        h.set16(self.epilogue - HSIZE, block::ALLOC);

        Ok(self.coalesce(bp))
    }

    /// Run the full consistency check at public-API boundaries when the
    /// expensive assertions are enabled.
    #[cfg(feature = "extra_assertions")]
    fn debug_check(&self) {
        self.check(false);
    }

    #[cfg(not(feature = "extra_assertions"))]
    #[inline(always)]
    fn debug_check(&self) {}

    pub(crate) fn roots(&self) -> (RawHeap, Offset, Offset) {
        (self.raw(), self.wilderness, self.epilogue)
    }
}
