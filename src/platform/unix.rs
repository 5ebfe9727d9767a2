//! Unix virtual memory implementation using mmap/munmap.

use core::ffi::c_void;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const MAP_PRIVATE: i32 = 0x02;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;

// mmap guarantees at least this much alignment on every supported target.
const SYSTEM_PAGE: usize = 4096;

unsafe extern "C" {
    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;
}

unsafe fn map(size: usize) -> *mut u8 {
    let raw = unsafe {
        mmap(
            core::ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        core::ptr::null_mut()
    } else {
        raw as *mut u8
    }
}

pub unsafe fn vm_alloc(size: usize) -> *mut u8 {
    unsafe { map(size) }
}

pub unsafe fn vm_alloc_aligned(size: usize, align: usize) -> *mut u8 {
    if align <= SYSTEM_PAGE {
        return unsafe { map(size) };
    }

    // mmap only guarantees system-page alignment, so over-allocate and trim
    // the leading and trailing slack back to the kernel.
    let raw = unsafe { map(size + align) };
    if raw.is_null() {
        return core::ptr::null_mut();
    }

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + align - 1) & !(align - 1);

    let lead = aligned_addr - raw_addr;
    if lead > 0 {
        unsafe { munmap(raw_addr as *mut c_void, lead) };
    }

    let trail = (raw_addr + size + align) - (aligned_addr + size);
    if trail > 0 {
        unsafe { munmap((aligned_addr + size) as *mut c_void, trail) };
    }

    aligned_addr as *mut u8
}

pub unsafe fn vm_free(ptr: *mut u8, size: usize) {
    unsafe { munmap(ptr as *mut c_void, size) };
}
