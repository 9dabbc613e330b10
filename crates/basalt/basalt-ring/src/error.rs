use std::convert::Infallible;

/// Why a publish did not happen.
///
/// `E` is the error type of the caller's fill routine. Whatever the variant,
/// slot bookkeeping is back to a reusable state when this is returned.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PublishError<E = Infallible> {
    /// The payload does not fit a slot. Nothing was touched.
    #[error("payload of {requested} bytes exceeds slot capacity of {capacity} bytes")]
    Oversize { requested: usize, capacity: usize },

    /// Exclusive mode: the reader is copying out of the target slot.
    /// Retrying targets the same slot.
    #[error("slot {index} is being read")]
    Contention { index: usize },

    /// The fill routine failed; the attempt was rolled back.
    #[error("fill routine failed: {0}")]
    Fill(E),
}

/// Why a consume did not deliver a payload.
///
/// "Nothing to read yet" is not an error; readers report it as `None` or
/// [`ReadStatus::NotReady`](crate::ReadStatus::NotReady).
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsumeError<E = Infallible> {
    /// The destination buffer is shorter than the payload.
    #[error("payload of {needed} bytes does not fit a {available} byte buffer")]
    BufferTooSmall { needed: usize, available: usize },

    /// Exclusive mode: the producer reclaimed the slot first.
    #[error("slot {index} was reclaimed by the producer")]
    Contention { index: usize },

    /// The copy routine failed; the payload is still available.
    #[error("copy routine failed: {0}")]
    Copy(E),
}
