//! C-ABI entry points for external linking.
//!
//! Gated behind `features = ["ffi"]` (the `c-abi` feature builds them into
//! a staticlib). Names are stable: `runmalloc_alloc`, `runmalloc_free`,
//! `runmalloc_calloc`, `runmalloc_realloc`, `runmalloc_stats`, and (with
//! `std`) `runmalloc_print_stats`.

use crate::allocator;
use crate::stats::{self, Snapshot};

/// C `malloc`. Size 0 yields null.
#[unsafe(no_mangle)]
pub extern "C" fn runmalloc_alloc(size: usize) -> *mut u8 {
    allocator::allocate(size)
}

/// C `free`. Null is a no-op; unrecognised pointers are ignored.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by these entry
/// points and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn runmalloc_free(ptr: *mut u8) {
    unsafe { allocator::free(ptr) };
}

/// C `calloc`, with overflow-checked element math.
#[unsafe(no_mangle)]
pub extern "C" fn runmalloc_calloc(count: usize, size: usize) -> *mut u8 {
    allocator::clear_allocate(count, size)
}

/// C `realloc`.
///
/// # Safety
/// `ptr` must be null or a live pointer from these entry points.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn runmalloc_realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    unsafe { allocator::reallocate(ptr, new_size) }
}

/// Fill `out` with a statistics snapshot.
///
/// # Safety
/// `out` must be a valid pointer to a `Snapshot`-sized buffer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn runmalloc_stats(out: *mut Snapshot) {
    if !out.is_null() {
        unsafe { out.write(stats::snapshot()) };
    }
}

/// Print the human-readable statistics report to stdout.
#[cfg(feature = "std")]
#[unsafe(no_mangle)]
pub extern "C" fn runmalloc_print_stats() {
    stats::print_stats();
}
