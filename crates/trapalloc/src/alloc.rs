//! The page allocator façade: a reserved virtual window plus the free-page
//! ring, with the protection transitions that make freed pages trap.

use crate::config::{DEFAULT_LOG2_PAGE_COUNT, MAX_LOG2_PAGE_COUNT, PAGE_SIZE};
use crate::platform;
use crate::ring::FreePageRing;
use crate::util::{abort_with_message, is_aligned};

/// Hands out unique page-aligned virtual addresses, one page at a time.
///
/// Pages are born inaccessible, become readable and writable on
/// [`allocate`](Self::allocate), and become inaccessible again on
/// [`free`](Self::free) -- *before* the page index re-enters the free
/// ring. From that instant until the page is reissued (at least a full
/// trip around the ring later), any access to the freed address raises
/// the platform's protection fault. The trap is the feature.
///
/// All operations are callable from any thread. There are no locks; the
/// only blocking is inside the kernel's protection changes.
pub struct VirtualPageAllocator {
    window: *mut u8,
    window_bytes: usize,
    page_count: u32,
    ring: FreePageRing,
}

unsafe impl Send for VirtualPageAllocator {}
unsafe impl Sync for VirtualPageAllocator {}

impl VirtualPageAllocator {
    /// Reserve the default window: 2^24 pages, 64 GiB of virtual address
    /// space. Only pages that are allocated and touched consume physical
    /// memory. Aborts the process if the reservation fails.
    pub fn new() -> Self {
        Self::with_log2_page_count(DEFAULT_LOG2_PAGE_COUNT)
    }

    /// Reserve a reduced window of `2^log2` pages. Intended for harnesses
    /// that need to reach exhaustion or wrap the ring quickly; production
    /// callers use [`new`](Self::new).
    pub fn with_log2_page_count(log2: u32) -> Self {
        assert!(log2 <= MAX_LOG2_PAGE_COUNT);

        if platform::os_page_size() != PAGE_SIZE {
            abort_with_message("trapalloc: compiled page size does not match the OS page size\n");
        }

        let page_count = 1u32 << log2;
        let window_bytes = page_count as usize * PAGE_SIZE;
        let window = unsafe { platform::reserve_noaccess(window_bytes) };
        if window.is_null() {
            abort_with_message("trapalloc: failed to reserve the page window\n");
        }

        VirtualPageAllocator {
            window,
            window_bytes,
            page_count,
            ring: FreePageRing::new(page_count),
        }
    }

    /// Allocate one page. Returns a page-aligned address valid for reads
    /// and writes of exactly [`PAGE_SIZE`] bytes. Contents are
    /// unspecified; callers needing zeroed memory must zero it themselves.
    ///
    /// Aborts the process if every page is live: by construction that
    /// means more than `page_count` concurrent single-page allocations,
    /// which is a programming error, and a heap whose bottom layer starts
    /// returning null fails unpredictably everywhere at once.
    pub fn allocate(&self) -> *mut u8 {
        let index = match self.ring.pop() {
            Some(index) => index,
            None => abort_with_message("trapalloc: out of virtual pages\n"),
        };
        let page = unsafe { self.window.add(index as usize * PAGE_SIZE) };
        unsafe { platform::protect_read_write(page, PAGE_SIZE) };
        page
    }

    /// Free a page. The address becomes inaccessible immediately; the
    /// page index is recycled only after everything older in the ring.
    ///
    /// # Safety
    /// `page` must have been returned by [`allocate`](Self::allocate) on
    /// this instance and not yet freed. Double free is undefined
    /// behaviour.
    pub unsafe fn free(&self, page: *mut u8) {
        let offset = (page as usize).wrapping_sub(self.window as usize);
        debug_assert!(
            offset < self.window_bytes,
            "free() of a pointer outside the page window"
        );
        debug_assert!(
            is_aligned(offset, PAGE_SIZE),
            "free() of a pointer that is not page-aligned"
        );

        // The trap starts here, before the index is publicly recyclable.
        platform::protect_none(page, PAGE_SIZE);
        self.ring.push((offset / PAGE_SIZE) as u32);
    }

    /// Whether `ptr` points into the reserved window.
    pub fn contains(&self, ptr: *const u8) -> bool {
        (ptr as usize).wrapping_sub(self.window as usize) < self.window_bytes
    }

    /// Number of pages currently free.
    pub fn free_pages(&self) -> u32 {
        self.ring.free_count()
    }

    /// Total number of pages in the window.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }
}

impl Default for VirtualPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VirtualPageAllocator {
    fn drop(&mut self) {
        // Outstanding allocations become invalid; callers have drained.
        unsafe { platform::unmap(self.window, self.window_bytes) };
    }
}
