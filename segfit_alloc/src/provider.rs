//! The heap-provider seam.

use core::fmt;
use core::ptr::NonNull;

use memory_units::Bytes;

/// The provider could not extend the heap (or a heap could not be built at
/// all). The only failure the allocator ever surfaces; the public API maps
/// it to a nil pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocErr;

impl fmt::Display for AllocErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("heap provider exhausted")
    }
}

/// A single contiguous, monotonically growing byte region (the `sbrk`
/// shape). The allocator is the region's only writer.
///
/// # Safety
///
/// Implementors must guarantee, for as long as the provider is alive:
///
/// * `lo()` is constant after the first successful `grow`, and at least
///   8-byte aligned;
/// * `hi()` is monotonically non-decreasing, with `hi() - lo() + 1` bytes
///   readable and writable after any successful `grow`;
/// * `grow(n)` extends the region by exactly `n` bytes and returns the old
///   `hi() + 1`, preserving the contents of everything below it;
/// * the region never moves and is not aliased by anything else.
pub unsafe trait Provider {
    /// Lowest valid heap address.
    fn lo(&self) -> *mut u8;

    /// Highest valid heap address.
    fn hi(&self) -> *mut u8;

    /// Extend the heap by exactly `n` bytes.
    fn grow(&mut self, n: Bytes) -> Result<NonNull<u8>, AllocErr>;
}
