#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use trapalloc::config::PAGE_SIZE;
use trapalloc::VirtualPageAllocator;

/// Fuzz target that interprets a byte slice as a sequence of page
/// allocator operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=allocate, 1=free, 2=write)
///   byte 1: slot index (which tracked page to operate on)
///
/// We track up to 64 live pages against a 256-page allocator, so the
/// interesting paths (recycling, the slot handshake) are hit constantly
/// while exhaustion stays unreachable.
const MAX_SLOTS: usize = 64;

fn allocator() -> &'static VirtualPageAllocator {
    static ALLOC: OnceLock<VirtualPageAllocator> = OnceLock::new();
    ALLOC.get_or_init(|| VirtualPageAllocator::with_log2_page_count(8))
}

fuzz_target!(|data: &[u8]| {
    let a = allocator();
    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];

    let mut i = 0;
    while i + 2 <= data.len() {
        let opcode = data[i] % 3;
        let slot = data[i + 1] as usize % MAX_SLOTS;
        i += 2;

        match opcode {
            0 => {
                if !slots[slot].is_null() {
                    unsafe { a.free(slots[slot]) };
                }
                let p = a.allocate();
                assert!(a.contains(p));
                assert_eq!(p as usize % PAGE_SIZE, 0);
                slots[slot] = p;
            }
            1 => {
                if !slots[slot].is_null() {
                    unsafe { a.free(slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                }
            }
            _ => {
                if !slots[slot].is_null() {
                    unsafe { std::ptr::write_bytes(slots[slot], slot as u8, PAGE_SIZE) };
                }
            }
        }
    }

    // Drain before returning; the allocator is shared across runs.
    for p in slots {
        if !p.is_null() {
            unsafe { a.free(p) };
        }
    }
});
