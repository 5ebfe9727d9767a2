//! Windows virtual memory implementation using VirtualAlloc/VirtualFree.

use core::ffi::c_void;

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_RELEASE: u32 = 0x8000;
const PAGE_READWRITE: u32 = 0x04;

// Windows allocation granularity is 64 KiB; every VirtualAlloc base is a
// multiple of it.
const ALLOC_GRANULARITY: usize = 65536;

unsafe extern "system" {
    #[link_name = "VirtualAlloc"]
    fn virtual_alloc(
        lp_address: *mut c_void,
        dw_size: usize,
        fl_allocation_type: u32,
        fl_protect: u32,
    ) -> *mut c_void;

    #[link_name = "VirtualFree"]
    fn virtual_free(lp_address: *mut c_void, dw_size: usize, dw_free_type: u32) -> i32;
}

pub unsafe fn vm_alloc(size: usize) -> *mut u8 {
    let ptr = unsafe {
        virtual_alloc(
            core::ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    ptr as *mut u8
}

pub unsafe fn vm_alloc_aligned(size: usize, align: usize) -> *mut u8 {
    if align <= ALLOC_GRANULARITY {
        return unsafe { vm_alloc(size) };
    }

    // VirtualAlloc cannot be trimmed like mmap: reserve an oversized range
    // to learn where an aligned base exists, release it, then allocate at
    // that exact address. Another thread can steal the address between the
    // two calls, so retry a few times.
    for _ in 0..8 {
        let probe = unsafe {
            virtual_alloc(
                core::ptr::null_mut(),
                size + align,
                MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if probe.is_null() {
            return core::ptr::null_mut();
        }
        let aligned = ((probe as usize) + align - 1) & !(align - 1);
        unsafe { virtual_free(probe, 0, MEM_RELEASE) };

        let ptr = unsafe {
            virtual_alloc(
                aligned as *mut c_void,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if !ptr.is_null() {
            return ptr as *mut u8;
        }
    }
    core::ptr::null_mut()
}

pub unsafe fn vm_free(ptr: *mut u8, _size: usize) {
    // MEM_RELEASE requires dwSize = 0 (releases the entire allocation)
    unsafe { virtual_free(ptr as *mut c_void, 0, MEM_RELEASE) };
}
