//! Single-producer, single-consumer (SPSC) exclusive ring.
//!
//! Every slot is handed from the producer to the one reader at most once.
//! Instead of silently overwriting a slot the reader is copying out of, the
//! producer gets [`PublishError::Contention`]; a reader that loses the race
//! for a slot to the producer gets [`ConsumeError::Contention`]. Both are
//! transient and safe to retry.
//!
//! When the reader falls a full lap behind, the producer reclaims the unread
//! slot. The writer counts these in [`ExclusiveWriter::overwritten`] and the
//! reader fast-forwards past them, counting them in [`ExclusiveReader::skipped`].

use crate::error::{ConsumeError, PublishError};
use crate::ring::{Ring, RingConfig};
use crate::slot::{Claim, DEFAULT_SLOT_SIZE, ExclusiveState, ReadClaim};
use std::convert::Infallible;
use std::sync::Arc;

/// Creates an exclusive ring and its only two handles.
///
/// ```
/// use basalt_ring::{RingConfig, exclusive};
///
/// let (mut tx, mut rx) = exclusive::channel::<64>(RingConfig::new(4));
/// tx.publish_bytes(b"ping").unwrap();
///
/// let mut buf = [0u8; 64];
/// assert_eq!(rx.try_consume(&mut buf).unwrap(), Some(4));
/// assert_eq!(&buf[..4], b"ping");
/// assert_eq!(rx.try_consume(&mut buf).unwrap(), None);
/// ```
pub fn channel<const C: usize>(cfg: RingConfig) -> (ExclusiveWriter<C>, ExclusiveReader<C>) {
    let ring = Arc::new(Ring::new(cfg));
    (
        ExclusiveWriter {
            ring: ring.clone(),
            overwritten: 0,
        },
        ExclusiveReader {
            ring,
            read_seq: 0,
            skipped: 0,
        },
    )
}

/// The producer side of an exclusive ring.
pub struct ExclusiveWriter<const C: usize = DEFAULT_SLOT_SIZE> {
    ring: Arc<Ring<C>>,
    overwritten: u64,
}

/// The only consumer of an exclusive ring.
pub struct ExclusiveReader<const C: usize = DEFAULT_SLOT_SIZE> {
    ring: Arc<Ring<C>>,
    read_seq: u64,
    skipped: u64,
}

impl<const C: usize> ExclusiveWriter<C> {
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

    /// Unread messages this writer had to reclaim because the reader was a
    /// full lap behind.
    #[inline]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Current state of the slot at `index`.
    ///
    /// # Panics
    /// Panics if `index >= capacity()`.
    pub fn slot_state(&self, index: usize) -> ExclusiveState {
        self.ring.slot_at(index).exclusive_state()
    }

    /// Publishes a `size` byte message written by `fill`.
    ///
    /// Returns the message's sequence number.
    ///
    /// # Errors
    /// - [`PublishError::Oversize`] if `size > C`; the ring is untouched.
    /// - [`PublishError::Contention`] if the reader is copying out of the
    ///   target slot. Nothing was written and the sequence was given back, so
    ///   a retry targets the same slot.
    /// - [`PublishError::Fill`] if `fill` fails. The slot is idle again and
    ///   the sequence was given back.
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
        let (slot, index, lap) = self.ring.locate(seq);

        let claim = match slot.claim() {
            Ok(claim) => claim,
            Err(_) => {
                self.ring.retract(seq);
                return Err(PublishError::Contention { index });
            }
        };
        if claim == Claim::Reclaimed {
            self.overwritten += 1;
        }

        // SAFETY: the claim above put the slot in `Writing`.
        match unsafe { slot.fill(size, fill) } {
            Ok(()) => {
                slot.commit(lap);
                Ok(seq)
            }
            Err(e) => {
                slot.abort(lap, claim);
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

impl<const C: usize> ExclusiveReader<C> {
    /// Consumes the next message into `out`.
    ///
    /// # Returns
    /// - `Some(n)` if the next message was moved into `out[..n]`
    /// - `None` if nothing new is published yet
    ///
    /// # Errors
    /// - [`ConsumeError::Contention`] if the producer reclaimed the slot first
    /// - [`ConsumeError::BufferTooSmall`] if `out` is shorter than the message;
    ///   the message stays available
    #[inline]
    pub fn try_consume(&mut self, out: &mut [u8]) -> Result<Option<usize>, ConsumeError> {
        self.consume(|payload| {
            if payload.len() > out.len() {
                return Err(ConsumeError::BufferTooSmall {
                    needed: payload.len(),
                    available: out.len(),
                });
            }
            out[..payload.len()].copy_from_slice(payload);
            Ok(payload.len())
        })
    }

    /// Consumes the next message by handing it to `f`.
    ///
    /// If `f` fails the message stays available and the error is returned as
    /// [`ConsumeError::Copy`].
    #[inline]
    pub fn try_consume_with<R, E, F>(&mut self, f: F) -> Result<Option<R>, ConsumeError<E>>
    where
        F: FnOnce(&[u8]) -> Result<R, E>,
    {
        self.consume(|payload| f(payload).map_err(ConsumeError::Copy))
    }

    fn consume<R, E, F>(&mut self, f: F) -> Result<Option<R>, ConsumeError<E>>
    where
        F: FnOnce(&[u8]) -> Result<R, ConsumeError<E>>,
    {
        let mut status = self.acquire::<E>()?;
        if status == ReadClaim::Stale {
            self.ring.skip_stale(&mut self.read_seq, &mut self.skipped);
            status = self.acquire::<E>()?;
        }

        let size = match status {
            ReadClaim::Acquired { size } => size,
            ReadClaim::NotReady | ReadClaim::Stale => return Ok(None),
        };

        let (slot, _, lap) = self.ring.locate(self.read_seq);
        // SAFETY: `acquire` put the slot in `Reading` with this size.
        match f(unsafe { slot.payload(size) }) {
            Ok(r) => {
                slot.release_consumed(lap);
                self.read_seq += 1;
                Ok(Some(r))
            }
            Err(e) => {
                slot.release_unread();
                Err(e)
            }
        }
    }

    fn acquire<E>(&self) -> Result<ReadClaim, ConsumeError<E>> {
        let (slot, index, lap) = self.ring.locate(self.read_seq);
        slot.acquire(lap).map_err(|_| ConsumeError::Contention { index })
    }

    /// Sequence number of the next message this reader expects.
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.read_seq
    }

    /// Messages lost because the producer reclaimed them before they were read.
    #[inline]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
