//! Slab runs: fixed-block pools for one size class, owned by one thread.
//!
//! A run is a RUN_SIZE-aligned span whose header sits at offset 0 (sentinel
//! first, so the free path can probe a masked pointer). The owner thread
//! allocates and frees through `local_free` with no atomics; other threads
//! return blocks by pushing onto the `remote_free` Treiber stack, which the
//! owner folds back in with [`run_drain_remote`]. `in_use` counts blocks
//! handed out minus blocks returned *as seen by the owner* — remote frees
//! park on the stack without touching it, so emptiness is only meaningful
//! after a drain.

use crate::config::{CACHE_LINE, RUN_MAGIC, RUN_SIZE};
use crate::platform;
use crate::size_class::class_to_size;
use crate::stat;
use core::mem::size_of;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// An intrusive free list node stored inside freed memory.
/// The `next` pointer occupies the first 8 bytes of the freed block.
#[repr(C)]
pub struct FreeObject {
    pub next: *mut FreeObject,
}

/// `remote_free` on its own cache line so remote writers don't false-share
/// with the owner's hot fields.
#[repr(align(64))]
pub struct RemoteStack(pub AtomicPtr<FreeObject>);

/// Header at the start of every run. `magic` must stay the first field.
#[repr(C)]
pub struct SlabRun {
    pub magic: u32,
    pub class_id: u32,
    pub block_size: u32,
    pub capacity: u32,
    pub in_use: u32,
    pub owner_tid: u32,
    /// Older runs of the same class still owned by this thread.
    pub next_run: *mut SlabRun,
    /// Intrusive free list, touched only by the owner thread.
    pub local_free: *mut FreeObject,
    pub remote_free: RemoteStack,
}

/// Blocks begin at the first cache-line boundary after the header.
pub const RUN_HEADER_SIZE: usize = (size_of::<SlabRun>() + CACHE_LINE - 1) & !(CACHE_LINE - 1);

// The free path probes a 32-bit sentinel at the masked base address.
const _: () = assert!(core::mem::offset_of!(SlabRun, magic) == 0);

/// Stamp a freshly mapped RUN_SIZE span as a run for `class_id`, owned by
/// the calling thread, and chain all blocks onto its local free list.
///
/// # Safety
/// `mem` must be a RUN_SIZE-aligned, RUN_SIZE-byte span with no other users.
pub unsafe fn run_init(mem: *mut u8, class_id: u32) -> *mut SlabRun {
    let run: *mut SlabRun = mem.cast();
    let block_size = class_to_size(class_id as usize) as u32;

    unsafe {
        (*run).magic = RUN_MAGIC;
        (*run).class_id = class_id;
        (*run).block_size = block_size;
        (*run).owner_tid = platform::thread_id();
        (*run).next_run = ptr::null_mut();
        (*run).local_free = ptr::null_mut();
        (*run).remote_free.0.store(ptr::null_mut(), Ordering::Relaxed);

        let base = mem.add(RUN_HEADER_SIZE);
        let capacity = ((RUN_SIZE - RUN_HEADER_SIZE) / block_size as usize) as u32;
        (*run).capacity = capacity;
        (*run).in_use = 0;

        // Thread every block into the intrusive free list
        for i in 0..capacity as usize {
            let block = base.add(i * block_size as usize).cast::<FreeObject>();
            (*block).next = if i + 1 < capacity as usize {
                base.add((i + 1) * block_size as usize).cast()
            } else {
                ptr::null_mut()
            };
        }
        (*run).local_free = base.cast();

        stat!(add_slab_capacity(capacity as usize));
    }
    run
}

/// Pop one block. Caller must be the owning thread. Null when exhausted.
///
/// # Safety
/// `run` must be a live run owned by the calling thread.
pub unsafe fn run_alloc(run: *mut SlabRun) -> *mut u8 {
    unsafe {
        let block = (*run).local_free;
        if block.is_null() {
            return ptr::null_mut();
        }
        (*run).local_free = (*block).next;
        (*run).in_use += 1;
        stat!(inc_slab_in_use());
        block.cast()
    }
}

/// Return one block to its run. The owner pushes straight onto `local_free`
/// and decrements `in_use`; any other thread pushes onto the remote stack
/// and leaves `in_use` alone (the owner decrements when it drains).
///
/// # Safety
/// `ptr` must be a block of `run` that is not currently on any free list.
pub unsafe fn run_free(run: *mut SlabRun, ptr: *mut u8) {
    let obj: *mut FreeObject = ptr.cast();
    unsafe {
        if platform::thread_id() == (*run).owner_tid {
            (*obj).next = (*run).local_free;
            (*run).local_free = obj;
            (*run).in_use -= 1;
            stat!(dec_slab_in_use());
        } else {
            // Release so the owner's acquire drain sees our writes through
            // the block, including the `next` link itself.
            let remote = &(*run).remote_free.0;
            let mut head = remote.load(Ordering::Relaxed);
            loop {
                (*obj).next = head;
                match remote.compare_exchange_weak(
                    head,
                    obj,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => head = observed,
                }
            }
        }
    }
}

/// Fold remotely freed blocks into `local_free`. Owner only.
///
/// # Safety
/// `run` must be a live run owned by the calling thread.
pub unsafe fn run_drain_remote(run: *mut SlabRun) {
    unsafe {
        let mut head = (*run)
            .remote_free
            .0
            .swap(ptr::null_mut(), Ordering::Acquire);
        while !head.is_null() {
            let next = (*head).next;
            (*head).next = (*run).local_free;
            (*run).local_free = head;
            (*run).in_use -= 1;
            stat!(dec_slab_in_use());
            head = next;
        }
    }
}

/// True when no block of the run is outstanding. Only meaningful on the
/// owner thread, after a drain.
///
/// # Safety
/// `run` must be a live run.
pub unsafe fn run_is_empty(run: *mut SlabRun) -> bool {
    unsafe { (*run).in_use == 0 }
}

/// Run header for a block pointer. Valid only when the truncated base is a
/// registered run (runs are RUN_SIZE-aligned and RUN_SIZE is a power of two).
#[inline]
pub fn run_of(ptr: *mut u8) -> *mut SlabRun {
    ((ptr as usize) & !(RUN_SIZE - 1)) as *mut SlabRun
}
