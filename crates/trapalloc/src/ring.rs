//! Lock-free ring of free page indices.
//!
//! The ring is a multi-producer multi-consumer FIFO over a fixed array of
//! atomic u32 slots, one per page in the window. All cross-thread
//! coordination goes through a single packed `AtomicU64`:
//!
//!   bits  0..32  head        ring index of the oldest free slot
//!   bits 32..64  free_count  number of currently free pages
//!
//! Consumers CAS `{head+1, free_count-1}`; producers fetch-add the count
//! half and write their page index into slot `(head + free_count) & mask`.
//! Because the ring capacity equals the page count, the tail can never
//! catch the head: `free_count == 0` and `free_count == capacity` are the
//! two endpoints.
//!
//! A consumer and a producer can meet on the same slot when the ring is
//! nearly empty: the producer has bumped `free_count` but not yet stored
//! its page index, and a consumer already claimed the slot off the new
//! count. Slot bit 31 (`SLOT_ALLOCATED`) resolves this: consumers leave
//! the bit set behind them when they take an index, producers clear it
//! when they publish, and a consumer that observes the bit spins until
//! the publish store lands. The spin is bounded by the length of one
//! producer critical section and is almost never taken.

use crate::config::SLOT_ALLOCATED;
use crate::platform;
use crate::util::{abort_with_message, align_up};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[inline]
fn pack(head: u32, free_count: u32) -> u64 {
    ((free_count as u64) << 32) | (head as u64)
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// FIFO free list of page indices. One slot per page; slots live in a
/// dedicated eagerly-committed mapping so the ring never touches the heap
/// it underpins.
pub struct FreePageRing {
    slots: *mut AtomicU32,
    slots_bytes: usize,
    mask: u32,
    capacity: u32,
    state: AtomicU64,
}

unsafe impl Send for FreePageRing {}
unsafe impl Sync for FreePageRing {}

impl FreePageRing {
    /// Map and seed a ring with `capacity` free page indices `0..capacity`.
    /// `capacity` must be a power of two no larger than 2^24 (indices must
    /// fit in the low 24 bits of a slot). Aborts if the mapping fails.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two());
        assert!(capacity <= 1 << 24);

        let slots_bytes = align_up(
            capacity as usize * core::mem::size_of::<AtomicU32>(),
            crate::config::PAGE_SIZE,
        );
        let mem = unsafe { platform::map_rw(slots_bytes) };
        if mem.is_null() {
            abort_with_message("trapalloc: failed to map the free-page ring\n");
        }
        let slots = mem as *mut AtomicU32;

        // Single-threaded at this point; every page starts free exactly once.
        for i in 0..capacity {
            unsafe { (*slots.add(i as usize)).store(i, Ordering::Relaxed) };
        }

        FreePageRing {
            slots,
            slots_bytes,
            mask: capacity - 1,
            capacity,
            state: AtomicU64::new(pack(0, capacity)),
        }
    }

    #[inline]
    fn slot(&self, index: u32) -> &AtomicU32 {
        debug_assert!(index <= self.mask);
        unsafe { &*self.slots.add(index as usize) }
    }

    /// Take the oldest free page index, or `None` if no pages are free.
    /// The caller owns the returned page until it is pushed back.
    pub fn pop(&self) -> Option<u32> {
        let mut cur = self.state.load(Ordering::Relaxed);
        let head = loop {
            let (head, free_count) = unpack(cur);
            if free_count == 0 {
                return None;
            }
            let next = pack((head + 1) & self.mask, free_count - 1);
            // The successful CAS is the linearization point; it transfers
            // ownership of slot `head` to this consumer.
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break head,
                Err(seen) => cur = seen,
            }
        };

        let slot = self.slot(head);
        // A producer may have advertised this slot (count already bumped)
        // without having published its page index yet. Wait out its store.
        let mut word = slot.load(Ordering::Acquire);
        while word & SLOT_ALLOCATED != 0 {
            spin_loop();
            word = slot.load(Ordering::Acquire);
        }

        // Leave the in-flight bit behind: the slot will be reassigned to a
        // future producer, and the consumer that follows must wait for that
        // producer's publish rather than read this now-stale index.
        slot.store(word | SLOT_ALLOCATED, Ordering::Release);
        Some(word)
    }

    /// Return a page index to the ring. The index becomes the newest free
    /// entry; it is handed out again only after every older entry.
    pub fn push(&self, page_index: u32) {
        debug_assert!(page_index & SLOT_ALLOCATED == 0);
        let slot = self.claim_tail();
        self.publish(slot, page_index);
    }

    /// First producer half: advertise one more free page and reserve the
    /// tail slot. Consumers may claim the slot as soon as this returns;
    /// they block on the in-flight bit until `publish`.
    fn claim_tail(&self) -> u32 {
        let prev = self.state.fetch_add(1 << 32, Ordering::AcqRel);
        let (head, free_count) = unpack(prev);
        (head.wrapping_add(free_count)) & self.mask
    }

    /// Second producer half: store the page index, clearing the in-flight
    /// bit and releasing any consumer spinning on this slot.
    fn publish(&self, slot_index: u32, page_index: u32) {
        self.slot(slot_index).store(page_index, Ordering::Release);
    }

    /// Number of pages currently free.
    pub fn free_count(&self) -> u32 {
        unpack(self.state.load(Ordering::Acquire)).1
    }

    /// Total ring capacity in pages.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Drop for FreePageRing {
    fn drop(&mut self) {
        unsafe { platform::unmap(self.slots as *mut u8, self.slots_bytes) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn starts_full_and_pops_in_fifo_order() {
        let ring = FreePageRing::new(8);
        assert_eq!(ring.free_count(), 8);
        for expected in 0..8 {
            assert_eq!(ring.pop(), Some(expected));
        }
        assert_eq!(ring.free_count(), 0);
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn pushed_index_comes_back_after_older_entries() {
        let ring = FreePageRing::new(4);
        let a = ring.pop().unwrap();
        let b = ring.pop().unwrap();
        ring.push(a);
        ring.push(b);
        // Two older entries are still queued ahead of the returns.
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(a));
        assert_eq!(ring.pop(), Some(b));
    }

    #[test]
    fn head_wraps_around_the_mask() {
        let ring = FreePageRing::new(2);
        for _ in 0..100 {
            let p = ring.pop().unwrap();
            ring.push(p);
        }
        assert_eq!(ring.free_count(), 2);
        // Both indices still present exactly once.
        let x = ring.pop().unwrap();
        let y = ring.pop().unwrap();
        assert_ne!(x, y);
        assert_eq!(ring.pop(), None);
    }

    /// A consumer that lands on a slot whose producer has claimed it but
    /// not yet published must observe the in-flight bit, wait, and return
    /// the freshly published index -- never the stale one left by the
    /// previous cycle.
    #[test]
    fn consumer_waits_for_producer_publish() {
        let ring = FreePageRing::new(4);
        for expected in 0..4 {
            assert_eq!(ring.pop(), Some(expected));
        }

        // Producer half one: slot 0 is advertised free again, but still
        // carries the poisoned word from its previous cycle.
        let tail = ring.claim_tail();
        assert_eq!(tail, 0);

        let published = AtomicBool::new(false);
        std::thread::scope(|s| {
            let consumer = s.spawn(|| {
                let got = ring.pop().expect("count was already advertised");
                assert!(
                    published.load(Ordering::Relaxed),
                    "pop returned before the producer published"
                );
                got
            });

            // Give the consumer time to reach the spin on the in-flight bit.
            std::thread::sleep(Duration::from_millis(50));
            published.store(true, Ordering::Relaxed);
            ring.publish(tail, 2);

            assert_eq!(consumer.join().unwrap(), 2);
        });
    }

    #[test]
    fn conservation_across_mixed_traffic() {
        let ring = FreePageRing::new(16);
        let mut live = Vec::new();
        for _ in 0..5 {
            live.push(ring.pop().unwrap());
        }
        assert_eq!(ring.free_count() as usize + live.len(), 16);
        for p in live.drain(..) {
            ring.push(p);
        }
        assert_eq!(ring.free_count(), 16);
    }

    proptest! {
        /// Arbitrary single-threaded pop/push interleavings behave exactly
        /// like a FIFO queue: same contents, same order, conserved count.
        #[test]
        fn matches_fifo_model(ops in proptest::collection::vec(any::<u8>(), 0..128)) {
            let ring = FreePageRing::new(8);
            let mut model: VecDeque<u32> = (0..8).collect();
            let mut live: Vec<u32> = Vec::new();

            for op in ops {
                if op & 1 == 0 {
                    match ring.pop() {
                        Some(got) => {
                            prop_assert_eq!(Some(got), model.pop_front());
                            live.push(got);
                        }
                        None => prop_assert!(model.is_empty()),
                    }
                } else if !live.is_empty() {
                    let page = live.swap_remove(op as usize % live.len());
                    ring.push(page);
                    model.push_back(page);
                }
                prop_assert_eq!(ring.free_count() as usize, model.len());
                prop_assert_eq!(ring.free_count() as usize + live.len(), 8);
            }

            while let Some(expected) = model.pop_front() {
                prop_assert_eq!(ring.pop(), Some(expected));
            }
            prop_assert_eq!(ring.pop(), None);
        }
    }
}
