use core::ptr::{self, NonNull};

use memory_units::{Bytes, Pages, RoundUpTo};

use crate::provider::{AllocErr, Provider};

/// Size of the up-front address-space reservation. Nothing is committed
/// until the heap grows into it; it only bounds how far the heap can go,
/// and keeps every heap offset below 2^31.
const RESERVE: Bytes = Bytes(1 << 30);

/// A contiguous grow-only arena: one big `PROT_NONE` reservation, committed
/// page by page with `mprotect` as the brk advances. Reserving up front is
/// what lets `grow` extend the region without ever relocating it.
pub struct Arena {
    base: *mut u8,
    /// Bytes handed out. `hi()` is `base + brk - 1`.
    brk: usize,
    /// Bytes committed (page-rounded, >= brk).
    committed: usize,
}

// The arena exclusively owns its mapping.
unsafe impl Send for Arena {}

impl Arena {
    /// Reserve address space for a new arena.
    pub fn new() -> Result<Arena, AllocErr> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                RESERVE.0,
                libc::PROT_NONE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(AllocErr);
        }
        Ok(Arena {
            base: addr as *mut u8,
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
            let rc = unsafe {
                libc::mprotect(
                    self.base.add(self.committed) as *mut libc::c_void,
                    bytes.0 - self.committed,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };
            if rc != 0 {
                return Err(AllocErr);
            }
            self.committed = bytes.0;
        }
        let start = unsafe { self.base.add(self.brk) };
        self.brk = new_brk;
        Ok(unsafe { NonNull::new_unchecked(start) })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, RESERVE.0);
        }
    }
}
