//! OS platform abstraction: virtual memory and thread identity.
//!
//! Provides `vm_alloc`/`vm_alloc_aligned`/`vm_free` wrapping the platform
//! virtual memory APIs (mmap on Unix, VirtualAlloc on Windows), and a dense
//! 32-bit `thread_id`. Everything here goes straight to the OS — the
//! allocator's own entry points are never re-entered from this module.

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

/// Allocate `size` bytes of page-aligned, zero-initialised virtual memory.
/// Returns null on failure.
///
/// # Safety
/// Caller must eventually call `vm_free` with the returned pointer and the
/// same `size`.
#[inline]
pub unsafe fn vm_alloc(size: usize) -> *mut u8 {
    #[cfg(unix)]
    {
        unsafe { unix::vm_alloc(size) }
    }
    #[cfg(windows)]
    {
        unsafe { windows::vm_alloc(size) }
    }
}

/// Allocate `size` bytes aligned to `align` (a power of two, at least the
/// page size). Used for run regions, which the free path locates by masking
/// pointers with `align - 1`. Returns null on failure.
///
/// # Safety
/// Caller must eventually call `vm_free` with the returned pointer and the
/// same `size`.
#[inline]
pub unsafe fn vm_alloc_aligned(size: usize, align: usize) -> *mut u8 {
    debug_assert!(align.is_power_of_two());
    #[cfg(unix)]
    {
        unsafe { unix::vm_alloc_aligned(size, align) }
    }
    #[cfg(windows)]
    {
        unsafe { windows::vm_alloc_aligned(size, align) }
    }
}

/// Release virtual memory previously obtained from `vm_alloc` or
/// `vm_alloc_aligned`.
///
/// # Safety
/// `ptr` must have come from this module and `size` must match the original
/// request.
#[inline]
pub unsafe fn vm_free(ptr: *mut u8, size: usize) {
    #[cfg(unix)]
    {
        unsafe { unix::vm_free(ptr, size) };
    }
    #[cfg(windows)]
    {
        unsafe { windows::vm_free(ptr, size) };
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use core::sync::atomic::{AtomicU32, Ordering};

        static TID_COUNTER: AtomicU32 = AtomicU32::new(0);

        std::thread_local! {
            static TID: core::cell::Cell<u32> = const { core::cell::Cell::new(u32::MAX) };
        }

        /// Dense 32-bit id for the calling thread, assigned on first demand
        /// and stable for the thread's lifetime.
        #[inline]
        pub fn thread_id() -> u32 {
            TID.with(|tid| {
                let t = tid.get();
                if t != u32::MAX {
                    return t;
                }
                let t = TID_COUNTER.fetch_add(1, Ordering::Relaxed);
                tid.set(t);
                t
            })
        }
    }
}
