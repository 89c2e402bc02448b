//! Typed message links between the coordinator and one slave.
//!
//! A [`Link`] carries [`Message`]s with two delivery disciplines:
//!
//! - [`Delivery::Reliable`] — ordered, must arrive. Used for the rare
//!   control events (WINDOW, RUN, EXIT and their acks). A failed
//!   reliable send or receive is fatal to the owning process; there is
//!   no retry at this layer.
//! - [`Delivery::Fast`] — best effort. May be dropped, duplicated, or
//!   reordered. Used for the high-frequency RENDER/SWAP handshake and
//!   state replication, which is safe because every fast handler is
//!   idempotent under the frame ordering rule.
//!
//! Backends: [`memory`] for in-process links (tests, single-machine
//! clusters) and [`socket`] for TCP + UDP across machines.

pub mod memory;
pub mod socket;

use std::time::Duration;

use thiserror::Error;

use crate::message::{DecodeError, EncodeError, Message};

/// Delivery discipline for a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Ordered, guaranteed delivery; failure is fatal.
    Reliable,
    /// Best effort; loss, duplication, and reordering are expected.
    Fast,
}

/// Timeout specification for blocking receives.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Errors on a link.
///
/// Fast-path loss never surfaces here; backends swallow expected drops.
/// Anything that does surface is a control-plane failure and fatal to
/// the protocol run.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O failure on the underlying socket.
    #[error("link i/o failure: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed its end of the link.
    #[error("peer closed the link")]
    Closed,
    /// A reliable-channel message could not be parsed.
    #[error("malformed message on link: {0}")]
    Decode(#[from] DecodeError),
    /// A message could not be encoded for the wire.
    #[error("message could not be encoded: {0}")]
    Encode(#[from] EncodeError),
}

/// A bidirectional typed-message channel to one peer.
///
/// Links are owned by a single thread at a time; the coordinator
/// serializes access per connection with a mutex.
pub trait Link: Send {
    /// Sends a message with the requested delivery discipline.
    ///
    /// # Errors
    ///
    /// Reliable sends fail on any transport error. Fast sends only fail
    /// on hard local errors; an unreachable or slow peer is silent loss.
    fn send(&mut self, delivery: Delivery, msg: &Message) -> Result<(), LinkError>;

    /// Receives the next message from either channel, if one is ready.
    ///
    /// # Errors
    ///
    /// Fails if the peer has closed the link or the reliable stream is
    /// corrupt.
    fn try_recv(&mut self) -> Result<Option<Message>, LinkError>;

    /// Receives the next message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` only when a bounded timeout elapses.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Link::try_recv`].
    fn recv(&mut self, timeout: Timeout) -> Result<Option<Message>, LinkError>;
}
