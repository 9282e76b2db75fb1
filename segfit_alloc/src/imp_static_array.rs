use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use memory_units::Bytes;

use crate::provider::{AllocErr, Provider};

const SCRATCH_LEN_BYTES: usize = 32 * 1024 * 1024;

#[repr(align(4096))]
struct ScratchHeap([u8; SCRATCH_LEN_BYTES]);

static mut SCRATCH_HEAP: ScratchHeap = ScratchHeap([0; SCRATCH_LEN_BYTES]);

static CLAIMED: AtomicBool = AtomicBool::new(false);

/// A grow-only arena over one fixed static buffer, for targets with no
/// (or an esoteric) operating system. There is exactly one buffer in the
/// program, so only one `Arena` can ever be constructed.
pub struct Arena {
    brk: usize,
}

impl Arena {
    /// Claim the static scratch heap. Fails if it was already claimed.
    pub fn new() -> Result<Arena, AllocErr> {
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(AllocErr);
        }
        Ok(Arena { brk: 0 })
    }

    fn base(&self) -> *mut u8 {
        unsafe { core::ptr::addr_of_mut!(SCRATCH_HEAP.0) as *mut u8 }
    }
}

unsafe impl Provider for Arena {
    fn lo(&self) -> *mut u8 {
        self.base()
    }

    fn hi(&self) -> *mut u8 {
        self.base().wrapping_add(self.brk).wrapping_sub(1)
    }

    fn grow(&mut self, n: Bytes) -> Result<NonNull<u8>, AllocErr> {
        let new_brk = self.brk.checked_add(n.0).ok_or(AllocErr)?;
        if new_brk > SCRATCH_LEN_BYTES {
            return Err(AllocErr);
        }
        let start = unsafe { self.base().add(self.brk) };
        self.brk = new_brk;
        Ok(unsafe { NonNull::new_unchecked(start) })
    }
}
