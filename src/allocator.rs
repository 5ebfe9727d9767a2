//! Dispatch layer: ties the tiers together and implements `GlobalAlloc`.
//!
//! Process-wide state lives here: the boundary-tag arena behind one
//! `SpinMutex`, and the lock-free run map the free path consults to tell
//! small-tier pointers from large-tier ones. The `RunMalloc` struct is
//! zero-sized; register it with `#[global_allocator]` or call
//! [`allocate`]/[`free`]/[`clear_allocate`]/[`reallocate`] directly.
//!
//! A freed pointer carries no trusted metadata of its own: masking it to
//! RUN_SIZE alignment yields a candidate run base, and only a run-map hit
//! makes it a small-tier block (the RUN_MAGIC sentinel is a debug check,
//! since large payloads can spell anything). Otherwise the boundary-tag
//! header before the payload must carry BLOCK_MAGIC; pointers matching
//! neither are silently ignored.

use crate::arena::{self, Arena};
use crate::config::SMALL_MAX;
use crate::runmap::RunMap;
use crate::size_class::{class_to_size, round8, size_class};
use crate::stat;
use crate::sync::SpinMutex;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use crate::config::{CACHE_LINE, RUN_MAGIC, RUN_SIZE, SIZE_CLASS_COUNT};
        use crate::slab::{self, SlabRun};
        use crate::tls_cache;
    }
}

pub(crate) static ARENA: SpinMutex<Arena> = SpinMutex::new(Arena::new());
pub(crate) static RUN_MAP: RunMap = RunMap::new();

static ARENA_READY: AtomicBool = AtomicBool::new(false);

#[inline]
fn ensure_init() {
    if !ARENA_READY.load(Ordering::Acquire) {
        init_slow();
    }
}

#[cold]
fn init_slow() {
    // arena::init is idempotent under the lock, so a racing duplicate call
    // is harmless.
    ARENA.lock().init();
    ARENA_READY.store(true, Ordering::Release);
}

/// Allocate `size` bytes, 8-byte aligned. Size 0 and out-of-memory both
/// yield null.
pub fn allocate(size: usize) -> *mut u8 {
    if size == 0 {
        return ptr::null_mut();
    }
    ensure_init();
    stat!(add_requested(size));

    if size <= SMALL_MAX {
        alloc_small(size)
    } else {
        alloc_large(size)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        #[inline]
        fn alloc_small(size: usize) -> *mut u8 {
            match tls_cache::with(|tc| unsafe { tc.alloc(size, &RUN_MAP) }) {
                Some(p) => {
                    if !p.is_null() {
                        stat!(add_allocated(class_to_size(size_class(round8(size)))));
                    }
                    p
                }
                // TLS already torn down: let the arena serve it.
                None => alloc_large(size),
            }
        }
    } else {
        // No thread-local tier in this configuration; everything is a
        // boundary-tag block.
        #[inline]
        fn alloc_small(size: usize) -> *mut u8 {
            alloc_large(size)
        }
    }
}

#[inline]
fn alloc_large(size: usize) -> *mut u8 {
    let p = unsafe { ARENA.lock().alloc(size) };
    if !p.is_null() {
        stat!(add_allocated(round8(size)));
    }
    p
}

/// Look up the registered run containing `ptr`, if any.
#[cfg(feature = "std")]
#[inline]
fn small_run_of(ptr: *mut u8) -> *mut SlabRun {
    let base = (ptr as usize) & !(RUN_SIZE - 1);
    let run = RUN_MAP.get(base).cast::<SlabRun>();
    debug_assert!(run.is_null() || unsafe { (*run).magic } == RUN_MAGIC);
    run
}

/// Release a pointer previously returned by this allocator. Null is a
/// no-op; pointers this allocator does not recognise are ignored.
///
/// # Safety
/// `ptr` must be null, live, or point into memory where reading the
/// preceding block header is permissible.
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    #[cfg(feature = "std")]
    {
        let run = small_run_of(ptr);
        if !run.is_null() {
            stat!(sub_allocated(class_to_size(unsafe { (*run).class_id } as usize)));
            if tls_cache::with(|tc| unsafe { tc.free(ptr, run) }).is_none() {
                // TLS torn down mid-shutdown: hand the block straight back
                unsafe { slab::run_free(run, ptr) };
            }
            return;
        }
    }

    if let Some(payload) = unsafe { arena::payload_size(ptr) } {
        stat!(sub_allocated(payload));
        unsafe { ARENA.lock().free(ptr) };
    }
}

/// Allocate `count * size` zeroed bytes. Overflow of the product yields
/// null.
pub fn clear_allocate(count: usize, size: usize) -> *mut u8 {
    let total = match count.checked_mul(size) {
        Some(total) => total,
        None => return ptr::null_mut(),
    };
    let ptr = allocate(total);
    if !ptr.is_null() {
        // Recycled blocks carry old contents and free-list links
        unsafe { ptr::write_bytes(ptr, 0, total) };
    }
    ptr
}

/// Resize an allocation. Null grows from nothing; size 0 frees and returns
/// null. A small block whose new size maps to its current class is returned
/// unchanged; anything else moves.
///
/// # Safety
/// `ptr` must be null or a live pointer from this allocator.
pub unsafe fn reallocate(ptr: *mut u8, new_size: usize) -> *mut u8 {
    if ptr.is_null() {
        return allocate(new_size);
    }
    if new_size == 0 {
        unsafe { free(ptr) };
        return ptr::null_mut();
    }

    #[cfg(feature = "std")]
    {
        let run = small_run_of(ptr);
        if !run.is_null() {
            let cls = unsafe { (*run).class_id } as usize;
            if new_size <= SMALL_MAX && size_class(round8(new_size)) == cls {
                return ptr;
            }
            return unsafe { move_allocation(ptr, class_to_size(cls), new_size) };
        }
    }

    match unsafe { arena::payload_size(ptr) } {
        Some(old_payload) => unsafe { move_allocation(ptr, old_payload, new_size) },
        None => ptr::null_mut(),
    }
}

/// Allocate fresh, copy the surviving prefix, release the original. The
/// original is left intact when the new allocation fails.
unsafe fn move_allocation(ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
    let new_ptr = allocate(new_size);
    if new_ptr.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
        free(ptr);
    }
    new_ptr
}

/// Usable payload bytes behind a live pointer, through either tier.
fn usable_size(ptr: *mut u8) -> Option<usize> {
    #[cfg(feature = "std")]
    {
        let run = small_run_of(ptr);
        if !run.is_null() {
            return Some(class_to_size(unsafe { (*run).class_id } as usize));
        }
    }
    unsafe { arena::payload_size(ptr) }
}

/// Requests that need more than the natural 8-byte alignment. Small sizes
/// are bumped to a class whose block size the alignment divides (block
/// starts are cache-line-aligned multiples of the block size); everything
/// else takes the arena's aligned path.
fn alloc_over_aligned(size: usize, align: usize) -> *mut u8 {
    ensure_init();
    stat!(add_requested(size));

    #[cfg(feature = "std")]
    if size <= SMALL_MAX && align <= CACHE_LINE {
        let mut cls = size_class(round8(size.max(align)));
        while cls < SIZE_CLASS_COUNT {
            if class_to_size(cls) % align == 0 {
                return alloc_small(class_to_size(cls));
            }
            cls += 1;
        }
    }

    let p = unsafe { ARENA.lock().alloc_aligned(size, align) };
    if !p.is_null() {
        stat!(add_allocated(round8(size)));
    }
    p
}

/// Walk every arena region and assert the boundary-tag invariants
/// (sentinels, header/footer agreement, no adjacent free blocks).
/// Diagnostic; panics on violation.
pub fn verify_arena() {
    ARENA.lock().check_blocks();
}

pub(crate) fn arena_free_stats() -> (usize, usize) {
    ARENA.lock().free_stats()
}

/// Two-tier allocator front end.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: runmalloc::RunMalloc = runmalloc::RunMalloc;
/// ```
pub struct RunMalloc;

unsafe impl GlobalAlloc for RunMalloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size == 0 {
            return layout.align() as *mut u8;
        }
        if layout.align() <= 8 {
            return allocate(size);
        }
        alloc_over_aligned(size, layout.align())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        unsafe { free(ptr) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }
        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }

        if layout.align() <= 8 {
            return unsafe { reallocate(ptr, new_size) };
        }

        // Over-aligned: reallocate() could legally move the block to a
        // position with only natural alignment, so do the move here with
        // the alignment preserved.
        let new_ptr = alloc_over_aligned(new_size, layout.align());
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        let old_size = usable_size(ptr).unwrap_or(layout.size());
        unsafe {
            ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
            free(ptr);
        }
        new_ptr
    }
}
