//! In-process links over heap channels.
//!
//! [`pair`] returns two connected [`MemoryLink`]s, one per end. Both
//! delivery disciplines share one ordered queue, so a bare memory link
//! behaves like a perfect network. Protocol tests that need fast-path
//! misbehavior wrap an end in [`LossyLink`], which drops every Nth fast
//! send and can duplicate the ones it lets through — deterministic, so
//! retransmission tests don't flake.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::message::Message;
use crate::transport::{Delivery, Link, LinkError, Timeout};

/// One end of an in-process link.
pub struct MemoryLink {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

/// Creates a connected pair of in-process links.
#[must_use]
pub fn pair() -> (MemoryLink, MemoryLink) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (
        MemoryLink { tx: a_tx, rx: a_rx },
        MemoryLink { tx: b_tx, rx: b_rx },
    )
}

impl Link for MemoryLink {
    fn send(&mut self, delivery: Delivery, msg: &Message) -> Result<(), LinkError> {
        match self.tx.send(msg.clone()) {
            Ok(()) => Ok(()),
            // A vanished peer is silent loss on the fast path, fatal on
            // the reliable one.
            Err(_) => match delivery {
                Delivery::Fast => Ok(()),
                Delivery::Reliable => Err(LinkError::Closed),
            },
        }
    }

    fn try_recv(&mut self) -> Result<Option<Message>, LinkError> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(LinkError::Closed),
        }
    }

    fn recv(&mut self, timeout: Timeout) -> Result<Option<Message>, LinkError> {
        match timeout {
            Timeout::Infinite => match self.rx.recv() {
                Ok(msg) => Ok(Some(msg)),
                Err(_) => Err(LinkError::Closed),
            },
            Timeout::Duration(d) => match self.rx.recv_timeout(d) {
                Ok(msg) => Ok(Some(msg)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
            },
        }
    }
}

/// Deterministic fast-path fault injection around any link.
///
/// Reliable traffic passes through untouched.
pub struct LossyLink<L> {
    inner: L,
    /// Drop every Nth fast send (0 = drop nothing).
    drop_every: u32,
    /// Send each surviving fast message twice.
    duplicate: bool,
    fast_sends: u32,
}

impl<L: Link> LossyLink<L> {
    /// Wraps `inner`, dropping every `drop_every`-th fast send.
    ///
    /// `drop_every == 0` disables dropping.
    #[must_use]
    pub fn new(inner: L, drop_every: u32) -> Self {
        Self {
            inner,
            drop_every,
            duplicate: false,
            fast_sends: 0,
        }
    }

    /// Also delivers every surviving fast message twice.
    #[must_use]
    pub fn duplicating(mut self) -> Self {
        self.duplicate = true;
        self
    }

    /// Number of fast sends attempted so far (including dropped ones).
    #[must_use]
    pub fn fast_sends(&self) -> u32 {
        self.fast_sends
    }
}

impl<L: Link> Link for LossyLink<L> {
    fn send(&mut self, delivery: Delivery, msg: &Message) -> Result<(), LinkError> {
        if delivery == Delivery::Reliable {
            return self.inner.send(delivery, msg);
        }

        self.fast_sends += 1;
        if self.drop_every > 0 && self.fast_sends % self.drop_every == 0 {
            return Ok(());
        }
        self.inner.send(Delivery::Fast, msg)?;
        if self.duplicate {
            self.inner.send(Delivery::Fast, msg)?;
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Message>, LinkError> {
        self.inner.try_recv()
    }

    fn recv(&mut self, timeout: Timeout) -> Result<Option<Message>, LinkError> {
        self.inner.recv(timeout)
    }
}
