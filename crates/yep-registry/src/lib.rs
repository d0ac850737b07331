//! Session registry and broadcaster for YEP.
//!
//! Every authenticated connection owns an [`Outbox`]: a bounded queue
//! drained by a dedicated writer task. The [`Registry`] maps user
//! identifiers to [`SessionHandle`]s and fans frames out by enqueueing into
//! those outboxes, so a slow client can never stall a broadcast.
//!
//! # Key types
//!
//! - [`Registry`] — identifier → session directory, broadcast, online list
//! - [`SessionHandle`] — what the registry knows about one session
//! - [`Outbox`] / [`spawn_writer`] — per-session write path
//! - [`BroadcastReport`] — delivered/dropped counts of one fan-out

mod error;
mod outbox;
mod registry;
#[cfg(test)]
mod testing;

pub use error::DeliveryError;
pub use outbox::{DEFAULT_OUTBOX_CAPACITY, DEFAULT_WRITE_TIMEOUT, Frame, Outbox, spawn_writer};
pub use registry::{BroadcastReport, Registry, SessionHandle};
