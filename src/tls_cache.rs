//! Per-thread cache for the small tier.
//!
//! One bounded free list per size class keeps the hot paths free of locks
//! and atomics: a cache hit is a pointer pop, a cache push is a pointer
//! write. Misses refill from the thread's current run; a full list spills
//! back to the block's run (which handles the owner/remote distinction).
//!
//! A list may hold blocks from several runs, including runs owned by other
//! threads — blocks cached here are still counted in their run's `in_use`,
//! which is what makes releasing an empty run sound.
//!
//! Storage is a const-initialised `thread_local!` (no lazy init, no heap),
//! with a separate drop guard that flushes the cache back to its runs at
//! thread exit and releases whatever runs end up empty. Runs still holding
//! live blocks are orphaned; remote frees keep accumulating on them
//! unreclaimed.

use crate::arena;
use crate::config::{RUN_MAGIC, SIZE_CLASS_COUNT, TLS_MAX_LOCAL};
use crate::runmap::RunMap;
use crate::size_class::{round8, size_class};
use crate::slab::{self, FreeObject, SlabRun};
use crate::stat;
use core::cell::UnsafeCell;
use core::ptr;

/// Per-(thread x size class) state, isolated to its own cache line.
#[repr(align(64))]
struct PerClassCache {
    /// Local free list (same intrusive scheme as inside a run).
    head: *mut FreeObject,
    /// Blocks currently on `head`, capped at TLS_MAX_LOCAL.
    count: u32,
    /// Runs assigned to this thread for this class.
    run_count: u32,
    /// Refill source; older runs hang off its `next_run` chain.
    current_run: *mut SlabRun,
}

impl PerClassCache {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            count: 0,
            run_count: 0,
            current_run: ptr::null_mut(),
        }
    }
}

pub struct TlsCache {
    classes: [PerClassCache; SIZE_CLASS_COUNT],
    exit_guard_armed: bool,
}

impl TlsCache {
    pub const fn new() -> Self {
        Self {
            classes: [const { PerClassCache::new() }; SIZE_CLASS_COUNT],
            exit_guard_armed: false,
        }
    }

    /// Allocate a small block. Null only when the OS refuses a fresh run.
    ///
    /// # Safety
    /// Must only be called on the thread owning this cache.
    pub unsafe fn alloc(&mut self, size: usize, runmap: &RunMap) -> *mut u8 {
        let cls = size_class(round8(size));
        let pc = &mut self.classes[cls];

        let block = pc.head;
        if !block.is_null() {
            // A cached block must still belong to a live run: releases only
            // happen at in_use == 0, and cached blocks are counted there.
            debug_assert_eq!(unsafe { (*slab::run_of(block.cast())).magic }, RUN_MAGIC);
            unsafe { pc.head = (*block).next };
            pc.count -= 1;
            stat!(inc_slab_in_use());
            return block.cast();
        }

        unsafe { self.refill(cls, runmap) }
    }

    /// Cache a freed block, or spill it to its run once the list is full.
    ///
    /// # Safety
    /// `ptr` must be a live block of `run`, and `run` a registered run.
    pub unsafe fn free(&mut self, ptr: *mut u8, run: *mut SlabRun) {
        let cls = unsafe { (*run).class_id } as usize;
        let pc = &mut self.classes[cls];

        if pc.count >= TLS_MAX_LOCAL {
            // Bounds steady-state cache memory; the run sorts out whether we
            // are its owner or a remote thread.
            unsafe { slab::run_free(run, ptr) };
            return;
        }

        let obj: *mut FreeObject = ptr.cast();
        unsafe { (*obj).next = pc.head };
        pc.head = obj;
        pc.count += 1;
        stat!(dec_slab_in_use());
    }

    /// Miss path: drain the current run's remote stack, reuse it if that
    /// produced blocks, release it if it turned out empty, and otherwise
    /// put a fresh run in front of it.
    #[cold]
    unsafe fn refill(&mut self, cls: usize, runmap: &RunMap) -> *mut u8 {
        let pc = &mut self.classes[cls];

        let run = pc.current_run;
        if !run.is_null() {
            unsafe {
                slab::run_drain_remote(run);
                if !(*run).local_free.is_null() {
                    return slab::run_alloc(run);
                }
                if slab::run_is_empty(run) {
                    // No caller and no cache (ours or anyone's) holds a block
                    // of this run, so the span can go back to the OS.
                    pc.current_run = (*run).next_run;
                    pc.run_count -= 1;
                    arena::free_run(run.cast(), runmap);
                }
            }
        }

        let mem = arena::alloc_run(runmap);
        if mem.is_null() {
            return ptr::null_mut();
        }

        unsafe {
            let fresh = slab::run_init(mem, cls as u32);
            (*fresh).next_run = pc.current_run;
            pc.current_run = fresh;
            pc.run_count += 1;
            stat!(add_metadata(slab::RUN_HEADER_SIZE));
            slab::run_alloc(fresh)
        }
    }

    /// Thread exit: hand every cached block back to its run, then drain this
    /// thread's run chains and release the runs that come up empty.
    unsafe fn flush_and_destroy(&mut self, runmap: &RunMap) {
        for cls in 0..SIZE_CLASS_COUNT {
            let pc = &mut self.classes[cls];

            let mut obj = pc.head;
            pc.head = ptr::null_mut();
            pc.count = 0;
            while !obj.is_null() {
                unsafe {
                    let next = (*obj).next;
                    let run = slab::run_of(obj.cast());
                    debug_assert_eq!((*run).magic, RUN_MAGIC);
                    // Caching already counted this block out of slab_in_use;
                    // run_free is about to count it out again.
                    stat!(inc_slab_in_use());
                    slab::run_free(run, obj.cast());
                    obj = next;
                }
            }

            let mut run = pc.current_run;
            pc.current_run = ptr::null_mut();
            while !run.is_null() {
                unsafe {
                    let next = (*run).next_run;
                    (*run).next_run = ptr::null_mut();
                    slab::run_drain_remote(run);
                    if slab::run_is_empty(run) {
                        pc.run_count -= 1;
                        arena::free_run(run.cast(), runmap);
                    }
                    run = next;
                }
            }
        }
    }
}

impl Default for TlsCache {
    fn default() -> Self {
        Self::new()
    }
}

std::thread_local! {
    static CACHE: UnsafeCell<TlsCache> = const { UnsafeCell::new(TlsCache::new()) };
    static EXIT_GUARD: ExitGuard = const { ExitGuard };
}

struct ExitGuard;

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = CACHE.try_with(|cell| unsafe {
            (*cell.get()).flush_and_destroy(&crate::allocator::RUN_MAP);
        });
    }
}

/// Run `f` against the calling thread's cache. Returns `None` during thread
/// teardown, once the cache TLS slot is gone — callers fall back to the
/// arena / direct run free.
#[inline]
pub fn with<R>(f: impl FnOnce(&mut TlsCache) -> R) -> Option<R> {
    CACHE
        .try_with(|cell| {
            let cache = cell.get();
            // Arm the flag before registering: if registration itself
            // allocates, the reentrant call skips this branch. No reference
            // into the cache is held across the registration.
            if unsafe { !(*cache).exit_guard_armed } {
                unsafe { (*cache).exit_guard_armed = true };
                let _ = EXIT_GUARD.try_with(|_| {});
            }
            f(unsafe { &mut *cache })
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SMALL_MAX;
    use alloc::boxed::Box;
    use alloc::vec;
    use alloc::vec::Vec;

    fn make_runmap() -> &'static RunMap {
        Box::leak(Box::new(RunMap::new()))
    }

    #[test]
    fn test_alloc_and_cache_hit_is_lifo() {
        let map = make_runmap();
        let mut tc = TlsCache::new();
        unsafe {
            let p = tc.alloc(64, map);
            assert!(!p.is_null());
            p.write_bytes(0xAB, 64);

            let run = slab::run_of(p);
            assert_eq!((*run).class_id, 7);
            tc.free(p, run);
            assert_eq!(tc.classes[7].count, 1);

            // Cached block comes straight back
            let q = tc.alloc(64, map);
            assert_eq!(p, q);
            assert_eq!(tc.classes[7].count, 0);
            tc.free(q, run);

            tc.flush_and_destroy(map);
        }
    }

    #[test]
    fn test_every_class_round_trips() {
        let map = make_runmap();
        let mut tc = TlsCache::new();
        unsafe {
            for s in (8..=SMALL_MAX).step_by(8) {
                let p = tc.alloc(s, map);
                assert!(!p.is_null(), "alloc failed for size {}", s);
                p.write_bytes(0x42, s);
                tc.free(p, slab::run_of(p));
            }
            tc.flush_and_destroy(map);
        }
    }

    #[test]
    fn test_cap_spills_to_run() {
        let map = make_runmap();
        let mut tc = TlsCache::new();
        let n = TLS_MAX_LOCAL as usize + 10;
        unsafe {
            let mut ptrs = Vec::new();
            for _ in 0..n {
                let p = tc.alloc(64, map);
                assert!(!p.is_null());
                ptrs.push(p);
            }
            let run = tc.classes[7].current_run;
            assert_eq!((*run).in_use as usize, n);

            for p in ptrs {
                tc.free(p, slab::run_of(p));
            }
            // The first TLS_MAX_LOCAL frees were cached (still counted in
            // in_use); the overflow went back to the run's local list.
            assert_eq!(tc.classes[7].count, TLS_MAX_LOCAL);
            assert_eq!((*run).in_use as usize, TLS_MAX_LOCAL as usize);

            tc.flush_and_destroy(map);
        }
    }

    #[test]
    fn test_refill_drains_remote_frees() {
        let map = make_runmap();
        let mut tc = TlsCache::new();
        unsafe {
            // Exhaust one run completely so the next alloc must refill
            let first = tc.alloc(128, map);
            assert!(!first.is_null());
            let run = slab::run_of(first);
            let cap = (*run).capacity as usize;

            let mut blocks = vec![first as usize];
            for _ in 1..cap {
                let p = tc.alloc(128, map);
                assert!(!p.is_null());
                blocks.push(p as usize);
            }
            assert!((*run).local_free.is_null());

            // Another thread returns a few blocks: they land on remote_free
            let returned: Vec<usize> = blocks.iter().rev().take(4).copied().collect();
            let to_free = returned.clone();
            std::thread::spawn(move || {
                for b in to_free {
                    slab::run_free(slab::run_of(b as *mut u8), b as *mut u8);
                }
            })
            .join()
            .unwrap();

            // The refill drains them into local_free and serves one
            let p = tc.alloc(128, map);
            assert!(
                returned.contains(&(p as usize)),
                "refill must reuse drained blocks"
            );
            assert_eq!(tc.classes[15].current_run, run, "no new run needed");

            tc.flush_and_destroy(map);
        }
    }

    #[test]
    fn test_exit_flush_releases_empty_runs() {
        let map = make_runmap();
        let mut tc = TlsCache::new();
        unsafe {
            let p = tc.alloc(256, map);
            assert!(!p.is_null());
            let run = slab::run_of(p);
            let base = run as usize;
            assert_eq!(map.get(base), base as *mut u8);

            tc.free(p, run);
            tc.flush_and_destroy(map);

            // The cached block went back to its run, the run came up empty,
            // and the span was unmapped and unregistered.
            assert!(map.get(base).is_null());
            assert!(tc.classes[31].current_run.is_null());
        }
    }

    #[test]
    fn test_exhausted_run_is_chained_not_lost() {
        let map = make_runmap();
        let mut tc = TlsCache::new();
        unsafe {
            let first = tc.alloc(SMALL_MAX, map);
            assert!(!first.is_null());
            let run = slab::run_of(first);
            let cap = (*run).capacity as usize;

            let mut ptrs = vec![first];
            for _ in 1..cap {
                let p = tc.alloc(SMALL_MAX, map);
                assert!(!p.is_null());
                ptrs.push(p);
            }

            // Next alloc exhausts the run and installs a fresh one in front
            let extra = tc.alloc(SMALL_MAX, map);
            assert!(!extra.is_null());
            let cls = SIZE_CLASS_COUNT - 1;
            let fresh = tc.classes[cls].current_run;
            assert_ne!(fresh, run);
            assert_eq!((*fresh).next_run, run);
            assert_eq!(tc.classes[cls].run_count, 2);

            for p in ptrs {
                tc.free(p, slab::run_of(p));
            }
            tc.free(extra, slab::run_of(extra));
            tc.flush_and_destroy(map);
        }
    }
}
