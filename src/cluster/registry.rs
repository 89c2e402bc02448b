//! Connection bookkeeping for every slave the coordinator drives.
//!
//! One [`SlaveConnection`] per slave process, tracking identity, the
//! link, the synchronization mode, and the last frame/swap state the
//! slave reported. All mutation happens on the coordinator thread; the
//! per-connection mutex only guards the link against concurrent sends.

use std::fmt;
use std::sync::Mutex;

use crate::cluster::{ClusterError, ProtocolStage};
use crate::frame::FrameId;
use crate::launch::Launcher;
use crate::message::Message;
use crate::trace::{debug, trace};
use crate::transport::{Delivery, Link, LinkError};

/// Stable identity of one slave connection, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlaveId(u32);

impl SlaveId {
    /// Raw value, for diagnostics.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinator-side record of one slave process.
pub struct SlaveConnection {
    id: SlaveId,
    node: String,
    process: String,
    /// Serializes sends on the underlying transport.
    link: Mutex<Box<dyn Link>>,
    is_async: bool,
    active_frame: FrameId,
    swapped: bool,
    initialized: bool,
    stopped: bool,
}

impl SlaveConnection {
    fn new(id: SlaveId, node: &str, process: &str, link: Box<dyn Link>, is_async: bool) -> Self {
        Self {
            id,
            node: node.to_owned(),
            process: process.to_owned(),
            link: Mutex::new(link),
            is_async,
            active_frame: FrameId::ZERO,
            swapped: false,
            initialized: false,
            stopped: false,
        }
    }

    /// This connection's identity.
    #[must_use]
    pub fn id(&self) -> SlaveId {
        self.id
    }

    /// Whether the coordinator never waits on this slave.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Highest frame this slave has acknowledged starting.
    #[must_use]
    pub fn active_frame(&self) -> FrameId {
        self.active_frame
    }

    /// Whether `active_frame` has completed its buffer swap.
    #[must_use]
    pub fn swapped(&self) -> bool {
        self.swapped
    }

    /// Whether this slave acknowledged RUN.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Whether this slave acknowledged EXIT.
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Sends on this connection under the send mutex.
    pub(crate) fn send(&self, delivery: Delivery, msg: &Message) -> Result<(), LinkError> {
        self.link
            .lock()
            .expect("connection mutex poisoned")
            .send(delivery, msg)
    }

    /// Drains pending acknowledgments from this slave into the record.
    pub(crate) fn pump(&mut self) -> Result<(), LinkError> {
        loop {
            let msg = {
                let mut link = self.link.lock().expect("connection mutex poisoned");
                link.try_recv()?
            };
            match msg {
                Some(msg) => self.apply_ack(&msg),
                None => return Ok(()),
            }
        }
    }

    /// Applies one acknowledgment from the slave.
    ///
    /// Fast-channel echoes may be duplicated or stale; every arm is
    /// idempotent under the frame ordering rule, and `swapped` is only
    /// ever true for the frame currently in `active_frame`.
    fn apply_ack(&mut self, msg: &Message) {
        match msg {
            Message::Run => {
                debug!(slave = %self.id, "slave initialized");
                self.initialized = true;
            }
            Message::Render(f) => {
                if f.newer_than(self.active_frame) {
                    trace!(slave = %self.id, frame = %f, "render acknowledged");
                    self.active_frame = *f;
                    self.swapped = false;
                }
            }
            Message::Swap(f) => {
                if f.newer_than(self.active_frame) {
                    // A reordered fast channel can deliver the swap echo
                    // first; it implies the render was applied too.
                    self.active_frame = *f;
                    self.swapped = true;
                } else if *f == self.active_frame {
                    trace!(slave = %self.id, frame = %f, "swap acknowledged");
                    self.swapped = true;
                }
            }
            Message::Exit => {
                debug!(slave = %self.id, "slave stopped");
                self.stopped = true;
            }
            // WINDOW and STATE never flow slave → coordinator.
            Message::Window(_) | Message::State { .. } => {}
        }
    }

    /// Whether this slave counts as converged on `(target, swapped)`.
    fn is_ready(&self, target: FrameId, target_swapped: bool) -> bool {
        if self.is_async {
            return true;
        }
        if target.newer_than(self.active_frame) {
            return false;
        }
        !target_swapped || self.swapped
    }
}

/// The coordinator's table of slave connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Vec<SlaveConnection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no slaves are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns the connection for `(node, process)`, launching the slave
    /// if this pair has not been seen before.
    ///
    /// A synchronous request for a pair previously created asynchronous
    /// demotes the connection to synchronous: being waited on correctly
    /// outranks not blocking.
    ///
    /// # Errors
    ///
    /// Propagates launch failure, which is fatal to cluster startup.
    pub fn find_or_create(
        &mut self,
        node: &str,
        process: &str,
        is_async: bool,
        launcher: &mut dyn Launcher,
    ) -> Result<SlaveId, ClusterError> {
        if let Some(conn) = self
            .connections
            .iter_mut()
            .find(|c| c.node == node && c.process == process)
        {
            if !is_async && conn.is_async {
                debug!(slave = %conn.id, "demoting connection to synchronous");
                conn.is_async = false;
            }
            return Ok(conn.id);
        }

        let id = SlaveId(self.connections.len() as u32);
        let link = launcher.spawn(node, process)?;
        debug!(slave = %id, node, process, "slave launched");
        self.connections
            .push(SlaveConnection::new(id, node, process, link, is_async));
        Ok(id)
    }

    /// Returns the connection with the given id.
    #[must_use]
    pub fn get(&self, id: SlaveId) -> Option<&SlaveConnection> {
        self.connections.get(id.0 as usize)
    }

    /// Iterates over all connections.
    pub fn iter(&self) -> impl Iterator<Item = &SlaveConnection> {
        self.connections.iter()
    }

    /// Drains pending acknowledgments from every live connection.
    ///
    /// # Errors
    ///
    /// A link failure is wrapped with the slave id and `stage`.
    pub(crate) fn pump_all(&mut self, stage: ProtocolStage) -> Result<(), ClusterError> {
        for conn in &mut self.connections {
            if conn.stopped {
                continue;
            }
            conn.pump().map_err(|source| ClusterError::Connection {
                slave: conn.id,
                stage,
                source,
            })?;
        }
        Ok(())
    }

    /// Sends `msg` to every connection.
    ///
    /// # Errors
    ///
    /// A link failure is wrapped with the slave id and `stage`.
    pub(crate) fn broadcast(
        &self,
        delivery: Delivery,
        msg: &Message,
        stage: ProtocolStage,
    ) -> Result<(), ClusterError> {
        for conn in &self.connections {
            conn.send(delivery, msg)
                .map_err(|source| ClusterError::Connection {
                    slave: conn.id,
                    stage,
                    source,
                })?;
        }
        Ok(())
    }

    /// Re-sends `msg` to every synchronous slave not yet at the target
    /// state. Deliberately redundant: correctness relies on idempotent
    /// handlers, not on suppressing duplicates.
    pub(crate) fn resend_behind(
        &self,
        target: FrameId,
        target_swapped: bool,
        msg: &Message,
        stage: ProtocolStage,
    ) -> Result<(), ClusterError> {
        for conn in &self.connections {
            if conn.is_ready(target, target_swapped) {
                continue;
            }
            conn.send(Delivery::Fast, msg)
                .map_err(|source| ClusterError::Connection {
                    slave: conn.id,
                    stage,
                    source,
                })?;
        }
        Ok(())
    }

    /// Whether every synchronous slave is at least at `(target,
    /// target_swapped)`. Asynchronous slaves always count as ready.
    #[must_use]
    pub fn all_ready(&self, target: FrameId, target_swapped: bool) -> bool {
        self.connections
            .iter()
            .all(|c| c.is_ready(target, target_swapped))
    }

    /// Whether every slave has acknowledged RUN.
    #[must_use]
    pub fn all_initialized(&self) -> bool {
        self.connections.iter().all(|c| c.initialized)
    }

    /// Whether every slave has acknowledged EXIT.
    #[must_use]
    pub fn all_stopped(&self) -> bool {
        self.connections.iter().all(|c| c.stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::LaunchError;
    use crate::transport::memory::{self, MemoryLink};
    use crate::transport::Timeout;

    /// Launcher whose "slaves" are bare memory links held by the test.
    struct StubLauncher {
        peers: Vec<MemoryLink>,
        spawned: usize,
    }

    impl StubLauncher {
        fn new() -> Self {
            Self {
                peers: Vec::new(),
                spawned: 0,
            }
        }
    }

    impl Launcher for StubLauncher {
        fn spawn(&mut self, _node: &str, _process: &str) -> Result<Box<dyn Link>, LaunchError> {
            let (ours, theirs) = memory::pair();
            self.peers.push(theirs);
            self.spawned += 1;
            Ok(Box::new(ours))
        }
    }

    #[test]
    fn find_or_create_reuses_connections() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();

        let a = reg
            .find_or_create("node-1", "render", false, &mut launcher)
            .unwrap();
        let b = reg
            .find_or_create("node-1", "render", false, &mut launcher)
            .unwrap();
        let c = reg
            .find_or_create("node-2", "render", false, &mut launcher)
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(launcher.spawned, 2);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn synchronous_request_demotes_async_connection() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();

        let id = reg
            .find_or_create("node-1", "render", true, &mut launcher)
            .unwrap();
        assert!(reg.get(id).unwrap().is_async());

        reg.find_or_create("node-1", "render", false, &mut launcher)
            .unwrap();
        assert!(!reg.get(id).unwrap().is_async());

        // An async request never promotes a sync connection.
        reg.find_or_create("node-1", "render", true, &mut launcher)
            .unwrap();
        assert!(!reg.get(id).unwrap().is_async());
    }

    #[test]
    fn acks_advance_frame_state() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();
        let id = reg
            .find_or_create("n", "p", false, &mut launcher)
            .unwrap();
        let peer = &mut launcher.peers[0];

        assert!(!reg.all_ready(FrameId(1), false));

        peer.send(Delivery::Fast, &Message::Render(FrameId(1)))
            .unwrap();
        reg.pump_all(ProtocolStage::Render).unwrap();
        assert!(reg.all_ready(FrameId(1), false));
        assert!(!reg.all_ready(FrameId(1), true));
        assert_eq!(reg.get(id).unwrap().active_frame(), FrameId(1));

        peer.send(Delivery::Fast, &Message::Swap(FrameId(1))).unwrap();
        reg.pump_all(ProtocolStage::Swap).unwrap();
        assert!(reg.all_ready(FrameId(1), true));
    }

    #[test]
    fn stale_render_ack_does_not_regress() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();
        let id = reg
            .find_or_create("n", "p", false, &mut launcher)
            .unwrap();
        let peer = &mut launcher.peers[0];

        peer.send(Delivery::Fast, &Message::Render(FrameId(5)))
            .unwrap();
        peer.send(Delivery::Fast, &Message::Swap(FrameId(5))).unwrap();
        peer.send(Delivery::Fast, &Message::Render(FrameId(3)))
            .unwrap();
        reg.pump_all(ProtocolStage::Render).unwrap();

        let conn = reg.get(id).unwrap();
        assert_eq!(conn.active_frame(), FrameId(5));
        assert!(conn.swapped());
    }

    #[test]
    fn reordered_swap_ack_implies_render() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();
        let id = reg
            .find_or_create("n", "p", false, &mut launcher)
            .unwrap();
        let peer = &mut launcher.peers[0];

        peer.send(Delivery::Fast, &Message::Swap(FrameId(2))).unwrap();
        reg.pump_all(ProtocolStage::Swap).unwrap();

        let conn = reg.get(id).unwrap();
        assert_eq!(conn.active_frame(), FrameId(2));
        assert!(conn.swapped());
    }

    #[test]
    fn wrapped_frame_counts_as_progress() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();
        let id = reg
            .find_or_create("n", "p", false, &mut launcher)
            .unwrap();
        let peer = &mut launcher.peers[0];

        peer.send(Delivery::Fast, &Message::Render(FrameId(u32::MAX)))
            .unwrap();
        peer.send(Delivery::Fast, &Message::Render(FrameId(0)))
            .unwrap();
        reg.pump_all(ProtocolStage::Render).unwrap();

        assert_eq!(reg.get(id).unwrap().active_frame(), FrameId(0));
        assert!(reg.all_ready(FrameId(0), false));
    }

    #[test]
    fn async_slave_is_always_ready() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();
        reg.find_or_create("n", "p", true, &mut launcher).unwrap();

        // Never sent anything, still counts as converged.
        assert!(reg.all_ready(FrameId(100), true));
        // But lifecycle conjunctions still include it.
        assert!(!reg.all_initialized());
    }

    #[test]
    fn resend_targets_only_lagging_slaves() {
        let mut launcher = StubLauncher::new();
        let mut reg = ConnectionRegistry::new();
        reg.find_or_create("a", "p", false, &mut launcher).unwrap();
        reg.find_or_create("b", "p", false, &mut launcher).unwrap();

        // Slave a acks, slave b lags.
        launcher.peers[0]
            .send(Delivery::Fast, &Message::Render(FrameId(1)))
            .unwrap();
        reg.pump_all(ProtocolStage::Render).unwrap();

        reg.resend_behind(
            FrameId(1),
            false,
            &Message::Render(FrameId(1)),
            ProtocolStage::Render,
        )
        .unwrap();

        let short = Timeout::Duration(std::time::Duration::from_millis(10));
        assert!(launcher.peers[0].recv(short).unwrap().is_none());
        assert_eq!(
            launcher.peers[1].recv(short).unwrap(),
            Some(Message::Render(FrameId(1)))
        );
    }
}
