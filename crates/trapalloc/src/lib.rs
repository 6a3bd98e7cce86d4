//! trapalloc: a lock-free virtual page allocator for use-after-free hardening.
//!
//! Every allocation hands out a fresh page-aligned virtual address inside a
//! large reserved window; every free flips that page back to inaccessible
//! *before* recycling its index, so a stale pointer dereference raises a
//! synchronous protection fault instead of silently corrupting memory.
//!
//! The crate is a leaf component: the surrounding heap decides which
//! requests deserve a dedicated page and calls [`VirtualPageAllocator`].

extern crate libc;

pub mod alloc;
pub mod config;
pub mod platform;
pub mod ring;
pub mod util;

pub use alloc::VirtualPageAllocator;
