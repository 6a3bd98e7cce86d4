//! Build-time configuration. There is no runtime configuration surface:
//! no environment variables, no files. The window geometry is fixed when
//! the crate is compiled.

/// Size of one virtual page in bytes. Must equal the OS page size;
/// construction verifies this and aborts on mismatch.
pub const PAGE_SIZE: usize = 4096;

/// log2 of the default window capacity: 2^24 pages, 64 GiB of virtual
/// address space at 4 KiB pages.
pub const DEFAULT_LOG2_PAGE_COUNT: u32 = 24;

/// Upper bound on the capacity exponent. Page indices must fit in the low
/// 24 bits of a ring slot; bits 24-30 are reserved for future expansion.
pub const MAX_LOG2_PAGE_COUNT: u32 = 24;

/// Bit 31 of a ring slot: set while the slot is mid-handshake (taken by a
/// consumer, or taken by a producer that has not yet published its page
/// index). Clear on any slot holding a valid free page index.
pub const SLOT_ALLOCATED: u32 = 1 << 31;
