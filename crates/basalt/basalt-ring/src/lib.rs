//! Lock-free, fixed-capacity ring of versioned slots for passing
//! variable-length messages between threads.
//!
//! Two disciplines share the same slot layout:
//! - [`BroadcastWriter`] / [`BroadcastReader`]: one producer, any number of
//!   independent readers, lossy when a reader falls a lap behind.
//! - [`exclusive::channel`]: one producer, one reader, every message handed
//!   over at most once, contention reported instead of overwritten.
//!
//! No operation blocks, locks or allocates after construction.

mod broadcast;
mod error;
pub mod exclusive;
mod ring;
mod slot;

pub use broadcast::{BroadcastReader, BroadcastWriter};
pub use error::{ConsumeError, PublishError};
pub use exclusive::{ExclusiveReader, ExclusiveWriter};
pub use ring::RingConfig;
pub use slot::{BroadcastState, DEFAULT_SLOT_SIZE, ExclusiveState, ReadStatus, slot_stride};
