//! Versioned slot: the unit of storage shared by the producer and its readers.
//!
//! A slot is a fixed-size byte buffer guarded by a 32-bit version counter.
//! The version doubles as a sequence lock and as a lap marker:
//!
//! ```text
//! lap L being written    version = 2L      (even: do not read)
//! lap L published        version = 2L + 1  (odd: readable)
//! ```
//!
//! Readers know which lap their cursor expects, so comparing the loaded
//! version against `2L + 1` tells them whether the slot is not yet published
//! (older), readable (equal) or already overwritten by a newer lap (newer).
//! The counter wraps at 2^32; comparisons are done on the wrapping distance.
//!
//! # Broadcast transitions
//!
//! ```text
//!            begin (store 2L)            commit (store 2L+1, Release)
//! Published ──────────────────► Writable ──────────────────────────► Published
//!  (2L-1)                         (2L)                                (2L+1)
//! ```
//!
//! Readers never write to a broadcast slot.
//!
//! # Exclusive transitions
//!
//! The exclusive discipline adds an explicit state byte. `Published` is the
//! "available" flag: a completed publish that has not been consumed yet.
//!
//! ```text
//!          claim                fill ok / commit
//! Idle ─────────────► Writing ───────────────────► Published
//!  ▲                     ▲  │ fill failed                │  │
//!  │                     │  └──────► Idle              │  │ reader CAS
//!  │                     └───────────────────────────────┘  ▼
//!  │                          reclaim (unread overwritten)  Reading
//!  │                                                         │
//!  └─────────────────────── consumed (store 2L+2) ───────────┘
//!                          copy failed: Reading ─► Published
//! ```
//!
//! A producer that finds the slot in `Reading` backs off with a contention
//! error instead of overwriting it.

use std::cell::UnsafeCell;
use std::cmp::Ordering as Position;
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering, fence};

/// Payload bytes per slot when no capacity is given explicitly.
pub const DEFAULT_SLOT_SIZE: usize = 64;

/// Bytes one slot with `C` payload bytes occupies, header and padding included.
pub const fn slot_stride<const C: usize>() -> usize {
    std::mem::size_of::<Slot<C>>()
}

/// Version held by a slot while lap `lap` is being written into it.
#[inline(always)]
pub(crate) fn writing_version(lap: u64) -> u32 {
    (lap as u32).wrapping_mul(2)
}

/// Version held by a slot once lap `lap` is readable.
#[inline(always)]
pub(crate) fn published_version(lap: u64) -> u32 {
    writing_version(lap) | 1
}

/// Where `version` sits relative to `expected`, tolerant of wraparound.
#[inline(always)]
pub(crate) fn compare_versions(version: u32, expected: u32) -> Position {
    (version.wrapping_sub(expected) as i32).cmp(&0)
}

/// Outcome of a single non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A complete payload of this many bytes was copied out.
    Ready(usize),
    /// Nothing has been published for this cursor yet.
    NotReady,
    /// The payload for this cursor was overwritten by a newer lap.
    Stale,
}

/// Broadcast view of a slot, decoded from its version parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    /// Never published, or a write is in progress.
    Writable { version: u32 },
    /// A complete payload is readable.
    Published { version: u32 },
}

impl BroadcastState {
    #[inline(always)]
    pub fn decode(version: u32) -> Self {
        if version & 1 == 1 {
            BroadcastState::Published { version }
        } else {
            BroadcastState::Writable { version }
        }
    }

    #[inline(always)]
    pub fn version(self) -> u32 {
        match self {
            BroadcastState::Writable { version } | BroadcastState::Published { version } => version,
        }
    }
}

/// Exclusive-mode lifecycle of a slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveState {
    /// Free for the producer; holds nothing unread.
    Idle = 0,
    /// The producer owns the slot and is filling it.
    Writing = 1,
    /// A complete payload waits for the reader.
    Published = 2,
    /// The reader owns the slot and is copying it out.
    Reading = 3,
}

impl ExclusiveState {
    #[inline(always)]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ExclusiveState::Idle,
            1 => ExclusiveState::Writing,
            2 => ExclusiveState::Published,
            _ => ExclusiveState::Reading,
        }
    }
}

/// How the producer obtained write access to an exclusive slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The slot was idle.
    Free,
    /// The slot still held an unread payload, which is now lost.
    Reclaimed,
}

/// Result of the reader trying to take an exclusive slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadClaim {
    /// The reader now owns the slot; the payload is `size` bytes.
    Acquired { size: usize },
    NotReady,
    Stale,
}

/// One cache-line aligned storage cell of the ring.
///
/// # Memory Layout
///
/// ```text
/// ┌──────────────┬──────────────┬───────────┬──────────────────┐
/// │ version: u32 │ size: u32    │ state: u8 │ data: [u8; C]    │
/// └──────────────┴──────────────┴───────────┴──────────────────┘
///  padded so that no two slots share a 64 byte line
/// ```
#[repr(C, align(64))]
pub(crate) struct Slot<const C: usize> {
    version: AtomicU32,
    size: AtomicU32,
    state: AtomicU8,
    data: UnsafeCell<[u8; C]>,
}

// SAFETY: `data` is only written by the single producer that currently owns
// the slot (broadcast: the ring's only writer; exclusive: the holder of the
// `Writing` state). Readers validate the version around every copy.
unsafe impl<const C: usize> Sync for Slot<C> {}

impl<const C: usize> Slot<C> {
    pub(crate) fn new() -> Self {
        Self {
            version: AtomicU32::new(0),
            size: AtomicU32::new(0),
            state: AtomicU8::new(ExclusiveState::Idle as u8),
            data: UnsafeCell::new([0u8; C]),
        }
    }

    #[inline(always)]
    pub(crate) fn broadcast_state(&self) -> BroadcastState {
        BroadcastState::decode(self.version.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn exclusive_state(&self) -> ExclusiveState {
        ExclusiveState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Writes lap `lap` into the slot and publishes it.
    ///
    /// On a failed `fill` the slot is left `Writable` at this lap's even
    /// version, so no reader can observe the partial payload.
    ///
    /// # Safety
    /// The caller must be the only thread writing to this slot.
    #[inline(always)]
    pub(crate) unsafe fn broadcast_write<F, E>(&self, lap: u64, size: usize, fill: F) -> Result<(), E>
    where
        F: FnOnce(&mut [u8]) -> Result<(), E>,
    {
        debug_assert!(size <= C);
        let writing = writing_version(lap);
        let current = self.version.load(Ordering::Relaxed);
        if current != writing {
            // Still published from the previous lap: flip to even first.
            self.version.store(writing, Ordering::Relaxed);
        }
        // Orders the even version before any payload byte below.
        fence(Ordering::Release);
        self.size.store(size as u32, Ordering::Release);

        // SAFETY: single writer; concurrent readers re-check the version.
        let buf = unsafe { std::slice::from_raw_parts_mut(self.data.get().cast::<u8>(), size) };
        fill(buf)?;

        self.version.store(published_version(lap), Ordering::Release);
        Ok(())
    }

    /// Copies the payload published for lap `lap` into `out`.
    ///
    /// Returns `Err(needed)` when `out` cannot hold a consistent payload.
    #[inline(always)]
    pub(crate) fn broadcast_read(&self, lap: u64, out: &mut [u8]) -> Result<ReadStatus, usize> {
        let expected = published_version(lap);
        let v1 = self.version.load(Ordering::Acquire);
        match compare_versions(v1, expected) {
            Position::Less => return Ok(ReadStatus::NotReady),
            Position::Greater => return Ok(ReadStatus::Stale),
            Position::Equal => {}
        }

        let size = (self.size.load(Ordering::Acquire) as usize).min(C);
        if size > out.len() {
            // Only an error if the size belongs to the payload we validated.
            fence(Ordering::Acquire);
            if self.version.load(Ordering::Relaxed) != v1 {
                return Ok(ReadStatus::Stale);
            }
            return Err(size);
        }

        // SAFETY: `size <= C` and `size <= out.len()`; the copy may race with
        // the producer, which the version re-check below detects.
        unsafe {
            ptr::copy_nonoverlapping(self.data.get().cast::<u8>(), out.as_mut_ptr(), size);
        }

        fence(Ordering::Acquire);
        let v2 = self.version.load(Ordering::Relaxed);
        if v2 != v1 {
            return Ok(ReadStatus::Stale);
        }
        Ok(ReadStatus::Ready(size))
    }

    /// Producer side: take write access to an exclusive slot.
    ///
    /// Returns the state that blocked the claim on contention.
    #[inline(always)]
    pub(crate) fn claim(&self) -> Result<Claim, ExclusiveState> {
        let published = ExclusiveState::Published as u8;
        let writing = ExclusiveState::Writing as u8;
        match self
            .state
            .compare_exchange(published, writing, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => Ok(Claim::Reclaimed),
            Err(raw) if raw == ExclusiveState::Idle as u8 => self
                .state
                .compare_exchange(raw, writing, Ordering::Acquire, Ordering::Acquire)
                .map(|_| Claim::Free)
                .map_err(ExclusiveState::from_u8),
            Err(raw) => Err(ExclusiveState::from_u8(raw)),
        }
    }

    /// Stores the size and runs `fill` over exactly `size` payload bytes.
    ///
    /// # Safety
    /// The caller must hold the slot in `Writing` through [`Slot::claim`].
    #[inline(always)]
    pub(crate) unsafe fn fill<F, E>(&self, size: usize, fill: F) -> Result<(), E>
    where
        F: FnOnce(&mut [u8]) -> Result<(), E>,
    {
        debug_assert!(size <= C);
        self.size.store(size as u32, Ordering::Relaxed);
        // SAFETY: `Writing` excludes the reader.
        let buf = unsafe { std::slice::from_raw_parts_mut(self.data.get().cast::<u8>(), size) };
        fill(buf)
    }

    /// Makes lap `lap` visible to the reader.
    #[inline(always)]
    pub(crate) fn commit(&self, lap: u64) {
        self.version.store(published_version(lap), Ordering::Relaxed);
        // The version above is visible to whoever acquires `Published`.
        self.state.store(ExclusiveState::Published as u8, Ordering::Release);
    }

    /// Undoes a claim after a failed fill.
    ///
    /// A free slot returns to exactly its previous state. A reclaimed slot
    /// cannot get its overwritten payload back, so it becomes idle at this
    /// lap's even version.
    #[inline(always)]
    pub(crate) fn abort(&self, lap: u64, claim: Claim) {
        if claim == Claim::Reclaimed {
            self.version.store(writing_version(lap), Ordering::Relaxed);
        }
        self.state.store(ExclusiveState::Idle as u8, Ordering::Release);
    }

    /// Reader side: take ownership of lap `lap`.
    ///
    /// The version is judged before the state: an idle slot already at a
    /// newer lap (an aborted reclaim) no longer holds `lap` and is `Stale`.
    ///
    /// `Err` means the producer reclaimed the slot between the state load and
    /// the compare-and-swap.
    #[inline(always)]
    pub(crate) fn acquire(&self, lap: u64) -> Result<ReadClaim, ExclusiveState> {
        let state = self.exclusive_state();
        let expected = published_version(lap);
        match compare_versions(self.version.load(Ordering::Acquire), expected) {
            Position::Less => return Ok(ReadClaim::NotReady),
            Position::Greater => return Ok(ReadClaim::Stale),
            Position::Equal => {}
        }
        if state != ExclusiveState::Published {
            return Ok(ReadClaim::NotReady);
        }

        self.state
            .compare_exchange(
                ExclusiveState::Published as u8,
                ExclusiveState::Reading as u8,
                Ordering::Acquire,
                Ordering::Acquire,
            )
            .map_err(ExclusiveState::from_u8)?;

        // Reclaimed and republished between the check and the CAS.
        if self.version.load(Ordering::Relaxed) != expected {
            self.state.store(ExclusiveState::Published as u8, Ordering::Release);
            return Ok(ReadClaim::Stale);
        }

        let size = (self.size.load(Ordering::Relaxed) as usize).min(C);
        Ok(ReadClaim::Acquired { size })
    }

    /// Payload of an acquired slot.
    ///
    /// # Safety
    /// The caller must hold the slot in `Reading` through [`Slot::acquire`]
    /// and `size` must come from that acquisition.
    #[inline(always)]
    pub(crate) unsafe fn payload(&self, size: usize) -> &[u8] {
        // SAFETY: `Reading` excludes the producer.
        unsafe { std::slice::from_raw_parts(self.data.get().cast::<u8>(), size) }
    }

    /// Completes a read: the slot is idle until the next lap republishes it.
    #[inline(always)]
    pub(crate) fn release_consumed(&self, lap: u64) {
        self.version.store(writing_version(lap + 1), Ordering::Relaxed);
        self.state.store(ExclusiveState::Idle as u8, Ordering::Release);
    }

    /// Abandons a read: the payload stays available.
    #[inline(always)]
    pub(crate) fn release_unread(&self) {
        self.state.store(ExclusiveState::Published as u8, Ordering::Release);
    }
}
