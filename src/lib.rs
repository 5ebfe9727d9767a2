#![no_std]

//! runmalloc: a two-tier memory allocator.
//!
//! Requests up to [`config::SMALL_MAX`] bytes are served by the small tier:
//! a per-thread cache of size-class free lists fronting thread-owned slab
//! runs with a lock-free cross-thread return path. Larger requests go to a
//! single boundary-tag arena with eager coalescing, serialised by one lock.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: runmalloc::RunMalloc = runmalloc::RunMalloc;
//! ```
//!
//! Or call [`allocator::allocate`] / [`allocator::free`] directly.

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod arena;
pub mod config;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod macros;
pub mod platform;
pub mod runmap;
pub mod size_class;
#[cfg(feature = "std")]
pub mod slab;
pub mod stats;
pub mod sync;
#[cfg(feature = "std")]
pub mod tls_cache;

// Re-export the allocator at crate root for convenience
pub use allocator::RunMalloc;

// Panic handler for staticlib builds (no_std has no default panic handler).
// Only active when panic="abort" (i.e., the `fast` profile), not during normal checks.
#[cfg(all(feature = "ffi", not(test), not(feature = "std"), panic = "abort"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    unsafe extern "C" {
        fn abort() -> !;
    }
    unsafe { abort() }
}
