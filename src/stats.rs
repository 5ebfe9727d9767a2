//! Approximate allocation statistics.
//!
//! Global counters are relaxed atomics — observational only, never used for
//! synchronization. With the `std` feature the hot paths accumulate deltas
//! in a per-thread batch that is flushed to the globals once it has seen
//! [`STATS_FLUSH_OPS`](crate::config::STATS_FLUSH_OPS) operations or
//! [`STATS_FLUSH_BYTES`](crate::config::STATS_FLUSH_BYTES) accumulated
//! bytes (and at thread exit), so steady-state allocation touches no shared
//! cache line. Counters are therefore monotone per thread but only
//! eventually consistent globally; a [`snapshot`] deliberately does not
//! chase other threads' unflushed batches.

use core::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Counters {
    pub bytes_requested: AtomicUsize,
    pub bytes_allocated: AtomicUsize,
    pub bytes_metadata: AtomicUsize,
    pub slab_in_use: AtomicUsize,
    pub slab_capacity: AtomicUsize,
}

impl Counters {
    const fn new() -> Self {
        Self {
            bytes_requested: AtomicUsize::new(0),
            bytes_allocated: AtomicUsize::new(0),
            bytes_metadata: AtomicUsize::new(0),
            slab_in_use: AtomicUsize::new(0),
            slab_capacity: AtomicUsize::new(0),
        }
    }
}

pub(crate) static COUNTERS: Counters = Counters::new();

/// A point-in-time view of the allocator.
///
/// The byte and slab counters are best-effort under concurrency (see the
/// module docs); `bytes_free` and `largest_free_block` are computed from
/// the arena free list under its lock and are exact at the moment of the
/// walk.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Sum of all byte sizes passed to allocate.
    pub bytes_requested: usize,
    /// Bytes currently handed out, measured in rounded block sizes.
    pub bytes_allocated: usize,
    /// Bytes spent on allocator bookkeeping (run headers).
    pub bytes_metadata: usize,
    /// Free payload bytes on the arena free list.
    pub bytes_free: usize,
    /// Largest single free arena payload.
    pub largest_free_block: usize,
    /// Small blocks currently live with callers.
    pub slab_in_use: usize,
    /// Total small-block slots across all runs ever created.
    pub slab_capacity: usize,
}

/// Load the global counters and walk the arena free list.
pub fn snapshot() -> Snapshot {
    let c = &COUNTERS;
    let (bytes_free, largest_free_block) = crate::allocator::arena_free_stats();
    Snapshot {
        bytes_requested: c.bytes_requested.load(Ordering::Relaxed),
        bytes_allocated: c.bytes_allocated.load(Ordering::Relaxed),
        bytes_metadata: c.bytes_metadata.load(Ordering::Relaxed),
        bytes_free,
        largest_free_block,
        slab_in_use: c.slab_in_use.load(Ordering::Relaxed),
        slab_capacity: c.slab_capacity.load(Ordering::Relaxed),
    }
}

/// Print a human-readable report to stdout.
#[cfg(feature = "std")]
pub fn print_stats() {
    use std::println;

    let s = snapshot();
    println!("=== runmalloc stats ===");
    println!("  requested:      {} B", s.bytes_requested);
    println!("  allocated:      {} B", s.bytes_allocated);
    println!("  metadata:       {} B", s.bytes_metadata);
    println!("  free (arena):   {} B", s.bytes_free);
    println!("  largest free:   {} B", s.largest_free_block);
    println!("  slab in use:    {}", s.slab_in_use);
    println!("  slab capacity:  {}", s.slab_capacity);

    let int_frag = if s.bytes_allocated > 0 {
        1.0 - s.bytes_requested as f64 / s.bytes_allocated as f64
    } else {
        0.0
    };
    let ext_frag = if s.bytes_free > 0 {
        1.0 - s.largest_free_block as f64 / s.bytes_free as f64
    } else {
        0.0
    };
    println!("  internal frag:  {:.1}%", int_frag * 100.0);
    println!("  external frag:  {:.1}%", ext_frag * 100.0);
}

cfg_if::cfg_if! {
    if #[cfg(all(feature = "stats", feature = "std"))] {
        use core::cell::UnsafeCell;

        #[derive(Default)]
        struct LocalBatch {
            req_bytes: usize,
            alloc_bytes_add: usize,
            alloc_bytes_sub: usize,
            meta_bytes: usize,
            slab_inuse_inc: usize,
            slab_inuse_dec: usize,
            slab_capacity_add: usize,
            ops: usize,
        }

        impl LocalBatch {
            const fn new() -> Self {
                Self {
                    req_bytes: 0,
                    alloc_bytes_add: 0,
                    alloc_bytes_sub: 0,
                    meta_bytes: 0,
                    slab_inuse_inc: 0,
                    slab_inuse_dec: 0,
                    slab_capacity_add: 0,
                    ops: 0,
                }
            }

            fn flush_if_needed(&mut self) {
                if self.ops < crate::config::STATS_FLUSH_OPS
                    && (self.req_bytes
                        + self.alloc_bytes_add
                        + self.alloc_bytes_sub
                        + self.meta_bytes)
                        < crate::config::STATS_FLUSH_BYTES
                {
                    return;
                }
                self.flush();
            }

            fn flush(&mut self) {
                let g = &COUNTERS;
                if self.req_bytes > 0 {
                    g.bytes_requested.fetch_add(self.req_bytes, Ordering::Relaxed);
                    self.req_bytes = 0;
                }
                if self.alloc_bytes_add > 0 {
                    g.bytes_allocated.fetch_add(self.alloc_bytes_add, Ordering::Relaxed);
                    self.alloc_bytes_add = 0;
                }
                if self.alloc_bytes_sub > 0 {
                    g.bytes_allocated.fetch_sub(self.alloc_bytes_sub, Ordering::Relaxed);
                    self.alloc_bytes_sub = 0;
                }
                if self.meta_bytes > 0 {
                    g.bytes_metadata.fetch_add(self.meta_bytes, Ordering::Relaxed);
                    self.meta_bytes = 0;
                }
                if self.slab_inuse_inc > 0 {
                    g.slab_in_use.fetch_add(self.slab_inuse_inc, Ordering::Relaxed);
                    self.slab_inuse_inc = 0;
                }
                if self.slab_inuse_dec > 0 {
                    g.slab_in_use.fetch_sub(self.slab_inuse_dec, Ordering::Relaxed);
                    self.slab_inuse_dec = 0;
                }
                if self.slab_capacity_add > 0 {
                    g.slab_capacity.fetch_add(self.slab_capacity_add, Ordering::Relaxed);
                    self.slab_capacity_add = 0;
                }
                self.ops = 0;
            }
        }

        impl Drop for LocalBatch {
            fn drop(&mut self) {
                self.flush();
            }
        }

        std::thread_local! {
            static BATCH: UnsafeCell<LocalBatch> = const { UnsafeCell::new(LocalBatch::new()) };
        }

        /// Apply `f` to the thread's batch, or fall back to `direct` against
        /// the globals when TLS is already torn down.
        #[inline]
        fn with_batch(f: impl FnOnce(&mut LocalBatch), direct: impl FnOnce(&Counters)) {
            // SAFETY: the batch is only ever touched by its own thread, and
            // none of the closures re-enter this module.
            if BATCH.try_with(|cell| f(unsafe { &mut *cell.get() })).is_err() {
                direct(&COUNTERS);
            }
        }

        /// Push the calling thread's pending deltas to the global counters.
        pub fn flush_thread() {
            with_batch(|b| b.flush(), |_| {});
        }

        pub(crate) fn add_requested(bytes: usize) {
            with_batch(
                |b| {
                    b.req_bytes += bytes;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.bytes_requested.fetch_add(bytes, Ordering::Relaxed);
                },
            );
        }

        pub(crate) fn add_allocated(bytes: usize) {
            with_batch(
                |b| {
                    b.alloc_bytes_add += bytes;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
                },
            );
        }

        pub(crate) fn sub_allocated(bytes: usize) {
            with_batch(
                |b| {
                    b.alloc_bytes_sub += bytes;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.bytes_allocated.fetch_sub(bytes, Ordering::Relaxed);
                },
            );
        }

        pub(crate) fn add_metadata(bytes: usize) {
            with_batch(
                |b| {
                    b.meta_bytes += bytes;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.bytes_metadata.fetch_add(bytes, Ordering::Relaxed);
                },
            );
        }

        pub(crate) fn inc_slab_in_use() {
            with_batch(
                |b| {
                    b.slab_inuse_inc += 1;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.slab_in_use.fetch_add(1, Ordering::Relaxed);
                },
            );
        }

        pub(crate) fn dec_slab_in_use() {
            with_batch(
                |b| {
                    b.slab_inuse_dec += 1;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.slab_in_use.fetch_sub(1, Ordering::Relaxed);
                },
            );
        }

        pub(crate) fn add_slab_capacity(blocks: usize) {
            with_batch(
                |b| {
                    b.slab_capacity_add += blocks;
                    b.ops += 1;
                    b.flush_if_needed();
                },
                |g| {
                    g.slab_capacity.fetch_add(blocks, Ordering::Relaxed);
                },
            );
        }
    } else if #[cfg(feature = "stats")] {
        // Without TLS there is nowhere to batch: hit the globals directly.

        /// No batches exist in this configuration; nothing to do.
        pub fn flush_thread() {}

        pub(crate) fn add_requested(bytes: usize) {
            COUNTERS.bytes_requested.fetch_add(bytes, Ordering::Relaxed);
        }

        pub(crate) fn add_allocated(bytes: usize) {
            COUNTERS.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
        }

        pub(crate) fn sub_allocated(bytes: usize) {
            COUNTERS.bytes_allocated.fetch_sub(bytes, Ordering::Relaxed);
        }

        pub(crate) fn add_metadata(bytes: usize) {
            COUNTERS.bytes_metadata.fetch_add(bytes, Ordering::Relaxed);
        }

        pub(crate) fn inc_slab_in_use() {
            COUNTERS.slab_in_use.fetch_add(1, Ordering::Relaxed);
        }

        pub(crate) fn dec_slab_in_use() {
            COUNTERS.slab_in_use.fetch_sub(1, Ordering::Relaxed);
        }

        pub(crate) fn add_slab_capacity(blocks: usize) {
            COUNTERS.slab_capacity.fetch_add(blocks, Ordering::Relaxed);
        }
    } else {
        /// Statistics are compiled out; nothing to do.
        pub fn flush_thread() {}
    }
}

#[cfg(all(test, feature = "stats"))]
mod tests {
    use super::*;

    #[test]
    fn test_batch_flushes_on_demand() {
        let before = COUNTERS.bytes_requested.load(Ordering::Relaxed);
        add_requested(123);
        add_requested(456);
        flush_thread();
        let after = COUNTERS.bytes_requested.load(Ordering::Relaxed);
        // Other tests may run concurrently on this counter, so only assert
        // that our own contribution arrived.
        assert!(after >= before + 123 + 456);
    }

    #[test]
    fn test_batch_flushes_on_byte_threshold() {
        let before = COUNTERS.bytes_metadata.load(Ordering::Relaxed);
        add_metadata(crate::config::STATS_FLUSH_BYTES + 1);
        // Threshold exceeded: the delta must be globally visible without an
        // explicit flush.
        let after = COUNTERS.bytes_metadata.load(Ordering::Relaxed);
        assert!(after >= before + crate::config::STATS_FLUSH_BYTES + 1);
    }

    #[test]
    fn test_snapshot_reads_arena() {
        // allocate() initialises the arena, so free bytes must be visible
        let p = crate::allocator::allocate(2048);
        assert!(!p.is_null());
        let s = snapshot();
        assert!(s.bytes_free > 0);
        assert!(s.largest_free_block <= s.bytes_free);
        unsafe { crate::allocator::free(p) };
    }
}
