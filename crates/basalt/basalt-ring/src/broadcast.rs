//! Single-producer, multi-consumer (SPMC) broadcast ring.
//!
//! One writer publishes variable-length messages; any number of readers see
//! every message that is still in the ring, each at its own pace.
//!
//! # Design
//! - **Writer**: the only handle that can publish. It never waits for readers.
//! - **Readers**: each keeps its own cursor. Reading never writes to the ring,
//!   so readers cannot disturb each other. A reader that falls more than one
//!   lap behind gets `Stale` instead of old data and can fast-forward.
//!
//! # Thread Safety
//! - `BroadcastWriter` is `Send`; publishing needs `&mut self`, so there is
//!   exactly one producer per ring.
//! - `BroadcastReader` is `Send` and `Clone`; a clone is an independent reader
//!   starting at the same cursor.

use crate::error::{ConsumeError, PublishError};
use crate::ring::{Ring, RingConfig};
use crate::slot::{BroadcastState, DEFAULT_SLOT_SIZE, ReadStatus};
use std::convert::Infallible;
use std::sync::Arc;

/// The producer side of a broadcast ring.
///
/// # Type Parameter
/// - `C`: payload bytes per slot.
pub struct BroadcastWriter<const C: usize = DEFAULT_SLOT_SIZE> {
    ring: Arc<Ring<C>>,
}

/// A consumer of a broadcast ring with its own cursor.
#[derive(Clone)]
pub struct BroadcastReader<const C: usize = DEFAULT_SLOT_SIZE> {
    ring: Arc<Ring<C>>,
    /// Sequence number of the next message to read.
    read_seq: u64,
    /// Messages skipped because the writer lapped this reader.
    overruns: u64,
}

impl<const C: usize> BroadcastWriter<C> {
    /// Allocates a ring of `cfg.capacity` slots of `C` bytes each.
    pub fn new(cfg: RingConfig) -> Self {
        Self {
            ring: Arc::new(Ring::new(cfg)),
        }
    }

    /// A reader starting at sequence 0.
    ///
    /// It sees every message still held by the ring, oldest first.
    pub fn subscribe(&self) -> BroadcastReader<C> {
        BroadcastReader::at(self.ring.clone(), 0)
    }

    /// A reader starting at the current write position (tail-follow).
    ///
    /// It only sees messages published after this call.
    pub fn subscribe_tail(&self) -> BroadcastReader<C> {
        BroadcastReader::at(self.ring.clone(), self.ring.published())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub const fn slot_size(&self) -> usize {
        C
    }

    /// Number of messages published so far.
    #[inline]
    pub fn published(&self) -> u64 {
        self.ring.published()
    }

    /// Current state of the slot at `index`.
    ///
    /// # Panics
    /// Panics if `index >= capacity()`.
    pub fn slot_state(&self, index: usize) -> BroadcastState {
        self.ring.slot_at(index).broadcast_state()
    }

    /// Publishes a `size` byte message written by `fill`.
    ///
    /// `fill` receives exactly `size` bytes of slot storage. Returns the
    /// message's sequence number.
    ///
    /// # Errors
    /// - [`PublishError::Oversize`] if `size > C`; the ring is untouched.
    /// - [`PublishError::Fill`] if `fill` fails; the sequence is given back
    ///   and the slot stays unreadable until the next publish overwrites it.
    #[inline]
    pub fn publish<F, E>(&mut self, size: usize, fill: F) -> Result<u64, PublishError<E>>
    where
        F: FnOnce(&mut [u8]) -> Result<(), E>,
    {
        if size > C {
            return Err(PublishError::Oversize {
                requested: size,
                capacity: C,
            });
        }

        let seq = self.ring.next_sequence();
        let (slot, _, lap) = self.ring.locate(seq);

        // SAFETY: `&mut self` makes this the only writer of the ring.
        match unsafe { slot.broadcast_write(lap, size, fill) } {
            Ok(()) => Ok(seq),
            Err(e) => {
                self.ring.retract(seq);
                Err(PublishError::Fill(e))
            }
        }
    }

    /// Publishes a copy of `payload`.
    #[inline]
    pub fn publish_bytes(&mut self, payload: &[u8]) -> Result<u64, PublishError> {
        self.publish(payload.len(), |buf| {
            buf.copy_from_slice(payload);
            Ok::<(), Infallible>(())
        })
    }
}

impl<const C: usize> BroadcastReader<C> {
    fn at(ring: Arc<Ring<C>>, read_seq: u64) -> Self {
        Self {
            ring,
            read_seq,
            overruns: 0,
        }
    }

    /// Reads the message at an arbitrary cursor without moving this reader.
    ///
    /// # Returns
    /// - `Ready(n)`: `out[..n]` holds exactly the message published as `cursor`
    /// - `NotReady`: `cursor` has not been published yet
    /// - `Stale`: `cursor` was overwritten, before or during the copy
    ///
    /// # Errors
    /// [`ConsumeError::BufferTooSmall`] if `out` cannot hold the message.
    #[inline]
    pub fn read_at(&self, cursor: u64, out: &mut [u8]) -> Result<ReadStatus, ConsumeError> {
        let (slot, _, lap) = self.ring.locate(cursor);
        let available = out.len();
        slot.broadcast_read(lap, out)
            .map_err(|needed| ConsumeError::BufferTooSmall { needed, available })
    }

    /// Attempts to read the next message into `out`.
    ///
    /// This is a non-blocking operation that returns immediately.
    ///
    /// # Returns
    /// - `Some(n)` if a message was read into `out[..n]`; the cursor advances
    /// - `None` if the reader is caught up, or was lapped and had to fast-forward
    ///   to a slot that is being rewritten right now
    ///
    /// # Overrun Handling
    /// If the writer lapped this reader, the cursor jumps to the oldest
    /// message still in the ring. Check `overruns()` to see how many were lost.
    #[inline]
    pub fn try_read(&mut self, out: &mut [u8]) -> Result<Option<usize>, ConsumeError> {
        match self.read_at(self.read_seq, out)? {
            ReadStatus::Ready(n) => {
                self.read_seq += 1;
                return Ok(Some(n));
            }
            ReadStatus::NotReady => return Ok(None),
            ReadStatus::Stale => {}
        }

        self.ring.skip_stale(&mut self.read_seq, &mut self.overruns);

        match self.read_at(self.read_seq, out)? {
            ReadStatus::Ready(n) => {
                self.read_seq += 1;
                Ok(Some(n))
            }
            ReadStatus::NotReady | ReadStatus::Stale => Ok(None),
        }
    }

    /// Sequence number of the next message this reader will read.
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.read_seq
    }

    /// Moves the cursor, e.g. to replay from an older sequence.
    #[inline]
    pub fn seek(&mut self, cursor: u64) {
        self.read_seq = cursor;
    }

    /// Messages skipped since this reader was created because the writer
    /// lapped it.
    #[inline]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Messages published but not yet read by this reader, capped at the
    /// ring capacity.
    #[inline]
    pub fn lag(&self) -> u64 {
        self.ring
            .published()
            .saturating_sub(self.read_seq)
            .min(self.ring.capacity() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_an_independent_reader() {
        let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
        let mut a = writer.subscribe();
        writer.publish_bytes(b"one").unwrap();
        writer.publish_bytes(b"two").unwrap();

        let mut out = [0u8; 64];
        assert_eq!(a.try_read(&mut out), Ok(Some(3)));
        let mut b = a.clone();

        assert_eq!(a.try_read(&mut out), Ok(Some(3)));
        assert_eq!(&out[..3], b"two");
        assert_eq!(a.try_read(&mut out), Ok(None));

        assert_eq!(b.cursor(), 1);
        assert_eq!(b.try_read(&mut out), Ok(Some(3)));
        assert_eq!(&out[..3], b"two");
    }

    #[test]
    fn tail_subscription_skips_history() {
        let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(8));
        writer.publish_bytes(b"old").unwrap();
        let mut tail = writer.subscribe_tail();
        assert_eq!(tail.cursor(), 1);

        let mut out = [0u8; 64];
        assert_eq!(tail.try_read(&mut out), Ok(None));
        writer.publish_bytes(b"new").unwrap();
        assert_eq!(tail.try_read(&mut out), Ok(Some(3)));
        assert_eq!(&out[..3], b"new");
    }

    #[test]
    fn failed_fill_gives_the_sequence_back() {
        let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
        let mut reader = writer.subscribe();

        let res = writer.publish(2, |_| Err("no data"));
        assert_eq!(res, Err(PublishError::Fill("no data")));
        assert_eq!(writer.published(), 0);

        let mut out = [0u8; 64];
        assert_eq!(reader.try_read(&mut out), Ok(None));

        assert_eq!(writer.publish_bytes(b"ok"), Ok(0));
        assert_eq!(reader.try_read(&mut out), Ok(Some(2)));
        assert_eq!(&out[..2], b"ok");
    }

    #[test]
    fn failed_lapping_publish_does_not_stall_the_reader() {
        let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
        let mut reader = writer.subscribe();
        for i in 0u8..4 {
            writer.publish_bytes(&[i]).unwrap();
        }
        // Seq 4 laps slot 0, destroying seq 0, then fails.
        assert_eq!(writer.publish(1, |_| Err(())), Err(PublishError::Fill(())));

        let mut out = [0u8; 64];
        let mut got = Vec::new();
        while let Some(n) = reader.try_read(&mut out).unwrap() {
            got.push(out[..n].to_vec());
        }
        assert_eq!(got, vec![vec![1], vec![2], vec![3]]);
        assert_eq!(reader.overruns(), 1);

        writer.publish_bytes(&[4]).unwrap();
        assert_eq!(reader.try_read(&mut out), Ok(Some(1)));
        assert_eq!(out[0], 4);
    }

    #[test]
    fn lag_is_capped_at_capacity() {
        let mut writer: BroadcastWriter = BroadcastWriter::new(RingConfig::new(4));
        let reader = writer.subscribe();
        for _ in 0..3 {
            writer.publish_bytes(b"x").unwrap();
        }
        assert_eq!(reader.lag(), 3);
        for _ in 0..10 {
            writer.publish_bytes(b"x").unwrap();
        }
        assert_eq!(reader.lag(), 4);
    }
}
