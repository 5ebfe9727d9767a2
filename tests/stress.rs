//! Stress tests with fill-pattern corruption detection, running with the
//! allocator registered as the global allocator so every Vec and channel in
//! the test exercises it too.
//!
//! Allocate memory, fill it with a pattern derived from its address, hand
//! it between threads, and verify the pattern before freeing. Any
//! use-after-free, double-free, or overlap shows up as a mismatch.

use runmalloc::RunMalloc;
use std::alloc::{GlobalAlloc, Layout};

#[global_allocator]
static GLOBAL: RunMalloc = RunMalloc;

/// Fill a buffer with a deterministic pattern derived from its address and size.
fn fill_pattern(ptr: *mut u8, size: usize) {
    let seed = ptr as usize ^ size;
    for i in 0..size {
        unsafe {
            *ptr.add(i) = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        }
    }
}

/// Verify the fill pattern. Returns true if intact.
fn check_pattern(ptr: *mut u8, size: usize) -> bool {
    let seed = ptr as usize ^ size;
    for i in 0..size {
        let expected = ((seed.wrapping_add(i).wrapping_mul(0x9E37_79B9)) & 0xFF) as u8;
        if unsafe { *ptr.add(i) } != expected {
            return false;
        }
    }
    true
}

#[test]
fn stress_fill_pattern_single_thread() {
    let sizes: &[usize] = &[8, 16, 32, 64, 128, 256, 512, 1024, 4096, 8192, 65536];
    let rounds = 50;

    let mut live: Vec<(*mut u8, Layout)> = Vec::new();

    for round in 0..rounds {
        for &size in sizes {
            let layout = Layout::from_size_align(size, 8).unwrap();
            let ptr = unsafe { GLOBAL.alloc(layout) };
            assert!(!ptr.is_null(), "alloc failed for size {size}");
            fill_pattern(ptr, size);
            live.push((ptr, layout));
        }

        for &(ptr, layout) in &live {
            assert!(
                check_pattern(ptr, layout.size()),
                "corruption detected at round {round}, size {}",
                layout.size()
            );
        }

        // Retire half of the oldest allocations each round
        let retire = live.len() / 2;
        for (ptr, layout) in live.drain(..retire) {
            assert!(check_pattern(ptr, layout.size()));
            unsafe { GLOBAL.dealloc(ptr, layout) };
        }
    }

    for (ptr, layout) in live {
        assert!(check_pattern(ptr, layout.size()));
        unsafe { GLOBAL.dealloc(ptr, layout) };
    }
}

#[test]
fn stress_cross_thread_handoff() {
    use std::sync::mpsc;

    const THREADS: usize = 4;
    const BATCHES: usize = 20;
    const PER_BATCH: usize = 50;

    // Each worker allocates batches and sends them to the verifier, which
    // checks the patterns and frees from a different thread than the one
    // that allocated.
    let (tx, rx) = mpsc::channel::<Vec<(usize, usize)>>();

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                let sizes = [16usize, 48, 128, 512, 2048];
                for b in 0..BATCHES {
                    let mut batch = Vec::with_capacity(PER_BATCH);
                    for i in 0..PER_BATCH {
                        let size = sizes[(t + b + i) % sizes.len()];
                        let layout = Layout::from_size_align(size, 8).unwrap();
                        let ptr = unsafe { GLOBAL.alloc(layout) };
                        assert!(!ptr.is_null());
                        fill_pattern(ptr, size);
                        batch.push((ptr as usize, size));
                    }
                    tx.send(batch).unwrap();
                }
            })
        })
        .collect();
    drop(tx);

    let mut received = 0;
    while let Ok(batch) = rx.recv() {
        received += batch.len();
        for (addr, size) in batch {
            let ptr = addr as *mut u8;
            assert!(check_pattern(ptr, size), "corruption in handed-off block");
            let layout = Layout::from_size_align(size, 8).unwrap();
            unsafe { GLOBAL.dealloc(ptr, layout) };
        }
    }
    assert_eq!(received, THREADS * BATCHES * PER_BATCH);

    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn stress_vec_growth_through_global() {
    // Vec growth reallocates through the global allocator hooks
    let mut v: Vec<u64> = Vec::new();
    for i in 0..100_000u64 {
        v.push(i);
    }
    for (i, &x) in v.iter().enumerate() {
        assert_eq!(x, i as u64);
    }
    drop(v);

    let mut strings: Vec<String> = Vec::new();
    for i in 0..1000 {
        strings.push(format!("block number {i} with some padding text"));
    }
    for (i, s) in strings.iter().enumerate() {
        assert!(s.contains(&i.to_string()));
    }
}
