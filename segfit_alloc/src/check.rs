//! The full-walk heap verifier.
//!
//! Walks every block from prologue to epilogue, then every bin, and panics
//! on the first violated invariant. O(heap), so callers only run it from
//! tests or behind the "extra_assertions" feature; it must nevertheless be
//! callable at any point between public operations and pass.

use crate::bins;
use crate::block;
use crate::heap::{Heap, FIRST_BLOCK, PROLOGUE};
use crate::provider::Provider;
use crate::raw::{Offset, RawHeap, NIL};

macro_rules! trace {
    ( $verbose:expr, $( $args:tt )* ) => {
        #[cfg(any(test, feature = "use_std_for_test_debugging"))]
        {
            if $verbose {
                std::println!( $( $args )* );
            }
        }
        #[cfg(not(any(test, feature = "use_std_for_test_debugging")))]
        {
            let _ = $verbose;
        }
    };
}

impl<P: Provider> Heap<P> {
    /// Verify every heap invariant, printing each block when `verbose`
    /// (test and `use_std_for_test_debugging` builds only). Returns 0;
    /// panics on corruption.
    pub fn check(&self, verbose: bool) -> i32 {
        let (h, wilderness, epilogue) = self.roots();

        trace!(verbose, "checking prologue");
        assert_eq!(block::size(&h, PROLOGUE), 0, "prologue must be size 0");
        assert!(block::is_alloc(&h, PROLOGUE), "prologue must be allocated");

        // Walk the block sequence. `prev_was_alloc` checks that every
        // PALLOC mirrors the predecessor's ALLOC bit; `prev_was_free` that
        // no two free blocks ever sit next to each other.
        let mut free_blocks = 0u32;
        let mut prev_was_alloc = true;
        let mut prev_was_free = false;
        let mut bp = FIRST_BLOCK;
        while block::size(&h, bp) != 0 {
            let size = block::size(&h, bp);
            let alloc = block::is_alloc(&h, bp);
            trace!(
                verbose,
                "block @ {:>8}: size {:>8} alloc {} palloc {} large {}",
                bp,
                size,
                alloc as u8,
                block::is_palloc(&h, bp) as u8,
                block::is_large(&h, bp) as u8,
            );

            assert!(h.contains(bp), "block offset out of heap");
            assert!(h.contains(bp + size - 1), "block end out of heap");
            assert_eq!(h.addr(bp) as usize % 8, 0, "payload not 8-aligned");
            assert_eq!(size % 8, 0, "block size not a multiple of 8");
            assert!(size >= block::MINSIZE, "undersized block");
            assert_eq!(
                block::is_palloc(&h, bp),
                prev_was_alloc,
                "PALLOC disagrees with predecessor's ALLOC at {}",
                bp
            );

            if !alloc {
                assert!(!prev_was_free, "adjacent free blocks at {}", bp);
                self.check_footer(&h, bp);
                free_blocks += 1;
            } else if block::is_large(&h, bp) {
                // Large allocated blocks keep a live footer too.
                self.check_footer(&h, bp);
            }

            prev_was_alloc = alloc;
            prev_was_free = !alloc;
            bp = block::next(&h, bp);
        }

        // The walk must end exactly at the epilogue sentinel, one past the
        // end of the heap, with the wilderness as the last real block.
        assert_eq!(bp, epilogue, "walk did not end at the epilogue");
        assert_eq!(bp as usize, h.len(), "epilogue not at the heap end");
        assert!(block::is_alloc(&h, bp), "epilogue must be allocated");
        assert!(
            !block::is_palloc(&h, bp),
            "epilogue claims an allocated predecessor, but the wilderness is free"
        );
        assert_eq!(
            block::prev(&h, bp),
            wilderness,
            "last block is not the wilderness"
        );

        // Now every bin: membership, link symmetry, and the census.
        let mut bin_members = 0u32;
        for bin in 0..bins::NUM_BINS {
            let mut p = bins::head(&h, bin);
            let mut newer = NIL;
            while p != NIL {
                bin_members += 1;
                trace!(
                    verbose,
                    "bin {:>2} member @ {:>8}: size {:>8}",
                    bin,
                    p,
                    block::size(&h, p)
                );

                assert!(h.contains(p), "bin member outside the heap");
                assert_eq!(h.addr(p) as usize % 8, 0, "bin member not 8-aligned");
                assert!(!block::is_alloc(&h, p), "allocated block in bin {}", bin);
                assert!(block::size(&h, p) >= block::MINSIZE);
                assert_eq!(
                    bins::index_of(block::size(&h, p)),
                    bin,
                    "block of size {} filed in bin {}",
                    block::size(&h, p),
                    bin
                );
                assert_ne!(p, wilderness, "wilderness filed in bin {}", bin);
                assert_eq!(
                    block::next_free(&h, p),
                    newer,
                    "broken next_free link at {}",
                    p
                );
                if block::prev_free(&h, p) != NIL {
                    assert_eq!(
                        block::next_free(&h, block::prev_free(&h, p)),
                        p,
                        "asymmetric free links at {}",
                        p
                    );
                }

                newer = p;
                p = block::prev_free(&h, p);
            }
        }

        // Every free block is in exactly one bin, except the wilderness.
        assert_eq!(
            free_blocks,
            bin_members + 1,
            "free blocks on the heap vs bins + wilderness"
        );

        0
    }

    /// Header/footer agreement for a block with a live footer.
    fn check_footer(&self, h: &RawHeap, bp: Offset) {
        assert_eq!(
            block::size(h, bp),
            block::footer_size(h, bp),
            "header/footer size mismatch at {}",
            bp
        );
        let (large, palloc, alloc) = block::footer_flags(h, bp);
        assert_eq!(large, block::is_large(h, bp), "LARGE mismatch at {}", bp);
        assert_eq!(palloc, block::is_palloc(h, bp), "PALLOC mismatch at {}", bp);
        assert_eq!(alloc, block::is_alloc(h, bp), "ALLOC mismatch at {}", bp);
    }
}
