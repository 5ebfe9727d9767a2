//! Arena coalescing behavior and boundary-tag invariants.

use runmalloc::allocator::{allocate, free, verify_arena};
use runmalloc::stats;

#[test]
fn free_then_alloc_combined_size() {
    // Two adjacent large blocks, freed in allocation order, must merge so
    // a request for their combined footprint can be satisfied in place.
    let a = allocate(65536);
    let b = allocate(65536);
    assert!(!a.is_null());
    assert!(!b.is_null());
    unsafe {
        free(a);
        free(b);
    }
    verify_arena();

    let c = allocate(131072);
    assert!(!c.is_null());
    unsafe { free(c) };
    verify_arena();
}

#[test]
fn repeated_churn() {
    for _ in 0..100 {
        let p = allocate(1024 * 64);
        assert!(!p.is_null());
        unsafe { free(p) };
    }
    verify_arena();
}

#[test]
fn fragmentation_is_visible_in_stats() {
    let mut ptrs: Vec<*mut u8> = (0..50).map(|_| allocate(4096)).collect();
    assert!(ptrs.iter().all(|p| !p.is_null()));

    // Free alternating blocks to create external fragmentation
    for i in (0..50).step_by(2) {
        unsafe { free(ptrs[i]) };
        ptrs[i] = core::ptr::null_mut();
    }

    let s = stats::snapshot();
    assert!(s.bytes_free > 0);
    assert!(s.largest_free_block <= s.bytes_free);
    verify_arena();

    for i in (1..50).step_by(2) {
        unsafe { free(ptrs[i]) };
    }
    verify_arena();
}

#[test]
fn interleaved_sizes_keep_invariants() {
    let mut live: Vec<(*mut u8, usize)> = Vec::new();
    for round in 0..15usize {
        for i in 0..8usize {
            let size = 600 + round * 997 + i * 131;
            let p = allocate(size);
            assert!(!p.is_null());
            unsafe { p.write_bytes(0xD1, size) };
            live.push((p, size));
        }
        // Free half, oldest first
        for _ in 0..4 {
            let (p, _) = live.remove(0);
            unsafe { free(p) };
        }
        verify_arena();
    }
    for (p, _) in live {
        unsafe { free(p) };
    }
    verify_arena();
}
