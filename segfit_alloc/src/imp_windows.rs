use core::ptr::NonNull;

use memory_units::{Bytes, Pages, RoundUpTo};

use winapi::shared::ntdef::NULL;
use winapi::um::memoryapi::VirtualAlloc;
use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

use crate::provider::{AllocErr, Provider};

/// Size of the up-front address-space reservation; see `imp_unix`.
const RESERVE: Bytes = Bytes(1 << 30);

/// A contiguous grow-only arena: one `MEM_RESERVE` region, committed in
/// page-rounded steps as the brk advances.
pub struct Arena {
    base: *mut u8,
    brk: usize,
    committed: usize,
}

// The arena exclusively owns its reservation.
unsafe impl Send for Arena {}

impl Arena {
    /// Reserve address space for a new arena.
    pub fn new() -> Result<Arena, AllocErr> {
        let base = unsafe { VirtualAlloc(NULL, RESERVE.0, MEM_RESERVE, PAGE_NOACCESS) };
        if base.is_null() {
            return Err(AllocErr);
        }
        Ok(Arena {
            base: base as *mut u8,
            brk: 0,
            committed: 0,
        })
    }
}

unsafe impl Provider for Arena {
    fn lo(&self) -> *mut u8 {
        self.base
    }

    fn hi(&self) -> *mut u8 {
        self.base.wrapping_add(self.brk).wrapping_sub(1)
    }

    fn grow(&mut self, n: Bytes) -> Result<NonNull<u8>, AllocErr> {
        let new_brk = self.brk.checked_add(n.0).ok_or(AllocErr)?;
        if new_brk > RESERVE.0 {
            return Err(AllocErr);
        }
        if new_brk > self.committed {
            let pages: Pages = Bytes(new_brk).round_up_to();
            let bytes: Bytes = pages.into();
            let committed = unsafe {
                VirtualAlloc(
                    self.base.add(self.committed) as _,
                    bytes.0 - self.committed,
                    MEM_COMMIT,
                    PAGE_READWRITE,
                )
            };
            if committed.is_null() {
                return Err(AllocErr);
            }
            self.committed = bytes.0;
        }
        let start = unsafe { self.base.add(self.brk) };
        self.brk = new_brk;
        Ok(unsafe { NonNull::new_unchecked(start) })
    }
}
