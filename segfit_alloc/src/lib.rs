/*!

## About

`segfit_alloc`: a sixteen-bin segregated best-fit allocator over a single
contiguous, grow-only heap.

The allocator manages one byte region obtained from a pluggable *heap
provider* (the `sbrk` shape: the region only ever grows, and never moves).
All of its bookkeeping lives inside that region: the sixteen bin heads
occupy the first 64 bytes, every block carries a 16-bit packed header (and,
when free or large, a mirroring footer), and free-list links are stored in
free blocks' payloads as 32-bit offsets from the heap base. Blocks of
64 KiB and up switch to an extended encoding that keeps the true size in a
32-bit side word.

The placement policy is best-fit within a size-segregated bin, with two
twists:

- bins 0..=4 each hold exactly one size, so their head is taken without
  scanning;
- the block at the top of the heap (the *wilderness*) belongs to no bin
  and is split last, which keeps growth appetite and fragmentation down.

Freed blocks coalesce with their neighbors immediately, using the packed
PALLOC flag (each block records whether its predecessor is allocated) so
that allocated blocks don't need footers.

## Using `segfit_alloc` as the global allocator

```rust,ignore
use segfit_alloc::SegFitAlloc;

#[global_allocator]
static ALLOC: SegFitAlloc = SegFitAlloc::INIT;
```

The global allocator lazily builds one process-wide heap over the platform
provider behind a spin lock. Note the alignment constraint below.

Private heaps are first-class; embedders (and the tests) build their own:

```rust,ignore
use segfit_alloc::{Arena, Heap};

let mut heap = Heap::new(Arena::new()?)?;
let p = heap.allocate(24);
```

## `cargo` features

- **extra_assertions**: enable expensive integrity assertions, including a
  full heap-consistency check at every public entry and exit. Very slow;
  useful when debugging the allocator itself or hunting heap corruption.

- **static_array_backend**: use a fixed 32 MiB static buffer as the heap
  provider instead of the OS, for `#![no_std]` environments with no usable
  operating system.

- **use_std_for_test_debugging**: let the checker's verbose mode print in
  non-test builds.

## Implementation notes and constraints

- Payloads are 8-byte aligned, and 8 is the *maximum* supported alignment:
  the global-allocator surface refuses layouts over-aligned beyond a double
  word. Minimum block size is 16 bytes; a small allocation pays 2 bytes of
  overhead, a large (≥ 64 KiB) one 24.

- Memory is never returned to the provider. Freed blocks coalesce and wait
  in their bins (or rejoin the wilderness) for reuse.

- Allocation is O(bin length) in the worst case; release is O(1).

- Single-threaded by design. A `Heap` is a plain single-owner value; the
  global surface serializes every operation behind a mutex.

Heap layout, offsets from the provider base:

```text
+--------------------------------------------------------------+
|  0..64    seg_list: 16 x u32 bin heads (heap offsets, 0=nil) |
| 64..66    alignment padding                                  |
| 66..68    prologue header  (size 0, ALLOC)                   |
| 68..70    prologue footer  (size 0, ALLOC)                   |
| 70..      blocks; first payload at 72                        |
|   ...                                                        |
|           the wilderness (top-of-heap free block)            |
| end-2..   epilogue header (size 0, ALLOC)                    |
+--------------------------------------------------------------+
```

The prologue and epilogue are permanent zero-size "allocated" sentinels, so
boundary walks in either direction terminate without special cases.

## License

Licensed under the [Mozilla Public License 2.0](https://www.mozilla.org/en-US/MPL/2.0/).

[TL;DR?](https://choosealicense.com/licenses/mpl-2.0/)

> Permissions of this weak copyleft license are conditioned on making available
> source code of licensed files and modifications of those files under the same
> license (or in certain cases, one of the GNU licenses). Copyright and license
> notices must be preserved. Contributors provide an express grant of patent
> rights. However, a larger work using the licensed work may be distributed
> under different terms and without source code for files added in the larger
> work.

## Contribution

Unless you explicitly state otherwise, any contribution intentionally
submitted for inclusion in the work by you shall be licensed as above,
without any additional terms or conditions.

*/

#![deny(missing_docs)]
#![cfg_attr(not(any(test, feature = "use_std_for_test_debugging")), no_std)]

use cfg_if::cfg_if;

#[macro_use]
mod extra_assert;

cfg_if! {
    if #[cfg(feature = "static_array_backend")] {
        mod imp_static_array;
        use imp_static_array as imp;
    } else if #[cfg(target_arch = "wasm32")] {
        mod imp_wasm32;
        use imp_wasm32 as imp;
    } else if #[cfg(unix)] {
        mod imp_unix;
        use imp_unix as imp;
    } else if #[cfg(windows)] {
        mod imp_windows;
        use imp_windows as imp;
    } else {
        compile_error! {
            "no segfit_alloc heap provider for this target; \
             try the \"static_array_backend\" feature"
        }
    }
}

mod bins;
mod block;
mod check;
mod heap;
mod provider;
mod raw;

pub use heap::Heap;
pub use imp::Arena;
pub use provider::{AllocErr, Provider};

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::Mutex;

/// The maximum alignment the allocator can honor. Every payload is 8-byte
/// aligned; nothing stronger is available.
pub const MAX_SUPPORTED_ALIGN: usize = 8;

/// The one process-wide heap behind the [`SegFitAlloc`] compatibility
/// surface, built on first use.
static GLOBAL_HEAP: Mutex<Option<Heap<imp::Arena>>> = Mutex::new(None);

fn with_global_heap<T>(f: impl FnOnce(&mut Heap<imp::Arena>) -> T) -> Result<T, AllocErr> {
    let mut heap = GLOBAL_HEAP.lock();
    if heap.is_none() {
        *heap = Some(Heap::new(imp::Arena::new()?)?);
    }
    Ok(f(heap.as_mut().unwrap()))
}

/// The hidden-singleton allocator: a handle to one process-wide [`Heap`]
/// over the platform provider, usable as the Rust global allocator.
///
/// Layouts with an alignment above [`MAX_SUPPORTED_ALIGN`] are refused with
/// a nil pointer.
pub struct SegFitAlloc;

impl SegFitAlloc {
    /// An initial `const` construction, for `static`s that get set as the
    /// global allocator.
    pub const INIT: Self = SegFitAlloc;

    /// Run the full consistency check on the process-wide heap; builds the
    /// heap first if nothing allocated yet. Returns 0, panicking on any
    /// violated invariant.
    pub fn check(&self, verbose: bool) -> i32 {
        with_global_heap(|heap| heap.check(verbose)).unwrap_or(0)
    }
}

unsafe impl GlobalAlloc for SegFitAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }
        match with_global_heap(|heap| heap.allocate(layout.size())) {
            Ok(Some(p)) => p.as_ptr(),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let _ = with_global_heap(|heap| unsafe { heap.release(ptr) });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }
        match with_global_heap(|heap| unsafe { heap.reallocate(ptr, new_size) }) {
            Ok(Some(p)) => p.as_ptr(),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return ptr::null_mut();
        }
        match with_global_heap(|heap| heap.zeroed_allocate(1, layout.size())) {
            Ok(Some(p)) => p.as_ptr(),
            _ => ptr::null_mut(),
        }
    }
}
