//! Ring configuration, sequence arithmetic and the shared slot array.
//!
//! This module provides the foundational primitives for both disciplines:
//! - Configuration with capacity validation
//! - Sequence-to-(index, lap) mapping, bitmask based when the capacity is a power of two
//! - Overrun detection and recovery for readers that fell behind
//! - The [`Ring`] aggregate owning the publish counter and every slot

use crate::slot::Slot;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Configuration for a ring.
///
/// Any non-zero capacity works. A power of two turns the modulo and the
/// division in [`RingConfig::split`] into a mask and a shift.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of slots in the ring.
    pub capacity: usize,
    /// `capacity - 1` when the capacity is a power of two.
    mask: Option<u64>,
}

impl RingConfig {
    /// Creates a new ring configuration with the specified capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    ///
    /// # Example
    /// ```
    /// use basalt_ring::RingConfig;
    /// let fast = RingConfig::new(1024); // mask based indexing
    /// let odd = RingConfig::new(1000);  // modulo based indexing
    /// assert_eq!(fast.split(1025), (1, 1));
    /// assert_eq!(odd.split(1025), (25, 1));
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");
        let mask = capacity.is_power_of_two().then_some(capacity as u64 - 1);
        Self { capacity, mask }
    }

    /// Returns the bitmask for power-of-two capacities.
    ///
    /// ```
    /// use basalt_ring::RingConfig;
    /// assert_eq!(RingConfig::new(8).mask(), Some(7));
    /// assert_eq!(RingConfig::new(6).mask(), None);
    /// ```
    #[inline(always)]
    pub fn mask(&self) -> Option<u64> {
        self.mask
    }

    /// Maps a sequence number to its slot index and lap.
    ///
    /// ```text
    /// capacity = 4
    /// seq =  0 → (0, 0)
    /// seq =  3 → (3, 0)
    /// seq =  4 → (0, 1)  wraps into the second lap
    /// seq = 10 → (2, 2)
    /// ```
    #[inline(always)]
    pub fn split(&self, seq: u64) -> (usize, u64) {
        match self.mask {
            Some(mask) => (
                seq_to_index(seq, mask) as usize,
                seq >> (self.capacity.trailing_zeros()),
            ),
            None => {
                let cap = self.capacity as u64;
                ((seq % cap) as usize, seq / cap)
            }
        }
    }
}

/// Converts a sequence number to an array index using a power-of-two mask.
///
/// `seq & mask` is equivalent to `seq % capacity` without the division.
///
/// ```text
/// mask = 7
/// seq =  5 → 5
/// seq =  8 → 0  (wraps around)
/// seq = 15 → 7
/// ```
#[inline(always)]
pub fn seq_to_index(seq: u64, mask: u64) -> u64 {
    seq & mask
}

/// Detects and recovers from reader overruns.
///
/// An overrun occurs when the writer has lapped the reader: the slots the
/// reader still wanted now hold newer laps.
///
/// # Recovery Strategy
///
/// The reader is fast-forwarded to the oldest sequence the ring can still
/// hold (exactly `capacity` behind the writer). Skipped sequences are added
/// to `overruns`.
///
/// ```text
/// capacity = 8, write_seq = 20, read_seq = 5
///
/// behind = 20 - 5 = 15 > 8
/// skipped = 15 - 8 = 7
/// read_seq = 20 - 8 = 12
/// ```
#[inline(always)]
pub fn apply_overrun_policy(write_seq: u64, read_seq: &mut u64, capacity: u64, overruns: &mut u64) {
    // saturating_sub guards a reader that is ahead of a retracted publish
    let behind = write_seq.saturating_sub(*read_seq);
    if behind > capacity {
        *overruns += behind - capacity;
        *read_seq = write_seq - capacity;
    }
}

/// Fixed array of slots plus the publish counter.
///
/// Constructed once, never resized. Handles share it through an `Arc` and it
/// is dropped with the last of them.
pub(crate) struct Ring<const C: usize> {
    /// Total publishes issued. Padded away from the slots.
    publish_counter: CachePadded<AtomicU64>,
    slots: Box<[Slot<C>]>,
    config: RingConfig,
}

impl<const C: usize> Ring<C> {
    pub(crate) fn new(config: RingConfig) -> Self {
        let slots = (0..config.capacity).map(|_| Slot::new()).collect();
        Self {
            publish_counter: CachePadded::new(AtomicU64::new(0)),
            slots,
            config,
        }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Claims the next sequence number.
    ///
    /// Relaxed: the counter only assigns slot identity; payload visibility is
    /// carried by the slot's own version.
    #[inline(always)]
    pub(crate) fn next_sequence(&self) -> u64 {
        self.publish_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Gives back a sequence whose publish did not happen.
    ///
    /// Only sound with a single producer, which both disciplines require.
    #[inline(always)]
    pub(crate) fn retract(&self, seq: u64) {
        self.publish_counter.store(seq, Ordering::Relaxed);
    }

    /// Number of sequences handed out so far.
    #[inline(always)]
    pub(crate) fn published(&self) -> u64 {
        self.publish_counter.load(Ordering::Acquire)
    }

    /// Moves a reader whose slot reported `Stale` past the lost sequence.
    ///
    /// Normally the writer lapped the reader and the cursor lands `capacity`
    /// behind the writer. A lapping publish that failed was retracted, which
    /// leaves the counter only `capacity` ahead; the cursor still moves by one.
    #[inline]
    pub(crate) fn skip_stale(&self, read_seq: &mut u64, lost: &mut u64) {
        let cap = self.capacity() as u64;
        let write_seq = self.published().max(*read_seq + cap + 1);
        apply_overrun_policy(write_seq, read_seq, cap, lost);
    }

    #[inline(always)]
    pub(crate) fn slot_at(&self, index: usize) -> &Slot<C> {
        &self.slots[index]
    }

    /// Slot, index and lap for a sequence number.
    #[inline(always)]
    pub(crate) fn locate(&self, seq: u64) -> (&Slot<C>, usize, u64) {
        let (index, lap) = self.config.split(seq);
        (&self.slots[index], index, lap)
    }
}
