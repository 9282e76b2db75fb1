use core::arch::wasm32;
use core::ptr::NonNull;

use memory_units::{Bytes, Pages, RoundUpTo};

use crate::provider::{AllocErr, Provider};

/// The WebAssembly page size, in bytes.
const PAGE_SIZE: usize = 65536;

/// A grow-only arena over wasm linear memory. The arena claims everything
/// from the current end of memory at construction time and commits further
/// pages with `memory_grow`.
///
/// Linear memory can only ever grow, which is exactly the provider
/// contract; but growth is a process-wide resource, so the arena assumes
/// nothing else in the program calls `memory_grow` once it exists.
pub struct Arena {
    base: usize,
    brk: usize,
    committed: usize,
}

impl Arena {
    /// Claim everything from the current end of linear memory onward.
    pub fn new() -> Result<Arena, AllocErr> {
        let base = wasm32::memory_size(0) * PAGE_SIZE;
        Ok(Arena {
            base,
            brk: 0,
            committed: 0,
        })
    }
}

unsafe impl Provider for Arena {
    fn lo(&self) -> *mut u8 {
        self.base as *mut u8
    }

    fn hi(&self) -> *mut u8 {
        (self.base + self.brk).wrapping_sub(1) as *mut u8
    }

    fn grow(&mut self, n: Bytes) -> Result<NonNull<u8>, AllocErr> {
        let new_brk = self.brk.checked_add(n.0).ok_or(AllocErr)?;
        if new_brk > self.committed {
            let pages: Pages = Bytes(new_brk - self.committed).round_up_to();
            if wasm32::memory_grow(0, pages.0) == usize::MAX {
                return Err(AllocErr);
            }
            self.committed += pages.0 * PAGE_SIZE;
        }
        let start = (self.base + self.brk) as *mut u8;
        self.brk = new_brk;
        NonNull::new(start).ok_or(AllocErr)
    }
}
