use crate::util::abort_with_message;
use core::ptr;

// Darwin does not charge anonymous PROT_NONE mappings against a
// reservation limit, so no MAP_NORESERVE equivalent is needed.

/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn reserve_noaccess(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_rw(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// # Safety
/// `ptr` must have been returned by one of the map functions with the
/// same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn protect_read_write(ptr: *mut u8, size: usize) {
    let ret = libc::mprotect(
        ptr as *mut libc::c_void,
        size,
        libc::PROT_READ | libc::PROT_WRITE,
    );
    if ret != 0 {
        abort_with_message("trapalloc: mprotect(PROT_READ|PROT_WRITE) failed\n");
    }
}

/// # Safety
/// Region must be valid and page-aligned.
pub unsafe fn protect_none(ptr: *mut u8, size: usize) {
    let ret = libc::mprotect(ptr as *mut libc::c_void, size, libc::PROT_NONE);
    if ret != 0 {
        abort_with_message("trapalloc: mprotect(PROT_NONE) failed\n");
    }
}

pub fn os_page_size() -> usize {
    unsafe {
        let n = libc::sysconf(libc::_SC_PAGESIZE);
        if n < 1 {
            0
        } else {
            n as usize
        }
    }
}
