//! The top-level cluster driver.
//!
//! One `RenderCoordinator` per cluster run. The embedding application
//! calls [`RenderCoordinator::render_frame`] once per desired frame; the
//! coordinator replicates application state, broadcasts RENDER, waits
//! for every synchronous slave to acknowledge drawing, broadcasts SWAP,
//! and waits again for the swap acknowledgments. Waiting is a
//! poll-and-resend loop: on each poll tick the RENDER or SWAP message is
//! re-sent to exactly the slaves that have not reported the target
//! state. Retransmission is cheap and deliberately redundant — the
//! handlers are idempotent, so duplicates cost nothing but bandwidth.
//!
//! An unresponsive synchronous slave stalls the cluster forever by
//! default, matching the protocol's design: there is no way to tell a
//! slow slave from a dead one on the fast channel, and a broken slave
//! takes down the run anyway. [`CoordinatorConfig::max_polls`] bounds
//! the wait for callers that prefer an error.

use std::thread;
use std::time::Duration;

use crate::cluster::registry::ConnectionRegistry;
use crate::cluster::{ClusterError, ProtocolStage, WindowAssignment};
use crate::frame::FrameId;
use crate::launch::Launcher;
use crate::message::Message;
use crate::state::StateRegistry;
use crate::trace::{error, info};
use crate::transport::Delivery;

/// Tuning for the coordinator's convergence loop.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Interval between convergence polls (and retransmissions).
    pub poll_interval: Duration,
    /// Maximum polls per convergence wait before giving up with
    /// [`ClusterError::ConvergenceTimeout`]. `None` waits forever, which
    /// is the protocol's native behavior.
    pub max_polls: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            max_polls: None,
        }
    }
}

/// Application hooks bracketing each frame.
///
/// `before_frame` runs before any cluster traffic for the frame (the
/// place to update replicated state); `after_frame` runs once the whole
/// cluster has presented the frame.
pub trait FrameHooks: Send {
    /// Called at the top of [`RenderCoordinator::render_frame`].
    fn before_frame(&mut self, frame: FrameId) {
        let _ = frame;
    }

    /// Called after every synchronous slave has swapped `frame`.
    fn after_frame(&mut self, frame: FrameId) {
        let _ = frame;
    }
}

/// Drives every slave in the cluster through frame lock-step.
pub struct RenderCoordinator {
    config: CoordinatorConfig,
    launcher: Box<dyn Launcher>,
    assignments: Vec<WindowAssignment>,
    registry: ConnectionRegistry,
    state: StateRegistry,
    hooks: Option<Box<dyn FrameHooks>>,
    current_frame: FrameId,
}

impl RenderCoordinator {
    /// Creates a coordinator for the given window assignment table.
    ///
    /// The table is immutable for the run's lifetime.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        launcher: Box<dyn Launcher>,
        assignments: Vec<WindowAssignment>,
    ) -> Self {
        Self {
            config,
            launcher,
            assignments,
            registry: ConnectionRegistry::new(),
            state: StateRegistry::new(),
            hooks: None,
            current_frame: FrameId::ZERO,
        }
    }

    /// Installs frame hooks.
    pub fn set_hooks(&mut self, hooks: Box<dyn FrameHooks>) {
        self.hooks = Some(hooks);
    }

    /// The coordinator-side state registry, for registering replicated
    /// variables before [`RenderCoordinator::run`].
    pub fn state_mut(&mut self) -> &mut StateRegistry {
        &mut self.state
    }

    /// The connection registry (read-only observation).
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The frame most recently driven to completion.
    #[must_use]
    pub fn current_frame(&self) -> FrameId {
        self.current_frame
    }

    /// Resolves every window assignment to a slave, launching processes
    /// as needed, and sends each slave its WINDOW messages.
    ///
    /// Must be called before [`RenderCoordinator::run`].
    ///
    /// # Errors
    ///
    /// Launch failure or a reliable send failure is fatal.
    pub fn assign_windows(&mut self) -> Result<(), ClusterError> {
        for assignment in &self.assignments {
            let id = self.registry.find_or_create(
                assignment.node(),
                assignment.process(),
                assignment.is_async(),
                self.launcher.as_mut(),
            )?;
            let conn = self
                .registry
                .get(id)
                .expect("connection just created or found");
            info!(
                slave = %id,
                surface = assignment.surface(),
                "assigning surface"
            );
            conn.send(
                Delivery::Reliable,
                &Message::Window(assignment.surface().to_owned()),
            )
            .map_err(|source| ClusterError::Connection {
                slave: id,
                stage: ProtocolStage::Window,
                source,
            })?;
        }
        Ok(())
    }

    /// Starts the cluster: broadcasts RUN and blocks until every slave
    /// has opened its surfaces and reported back.
    ///
    /// This is the one-time startup barrier across the whole cluster.
    ///
    /// # Errors
    ///
    /// Fails if no windows were assigned, on any reliable-channel
    /// failure, or if the configured poll bound elapses first.
    pub fn run(&mut self) -> Result<(), ClusterError> {
        if self.registry.is_empty() {
            return Err(ClusterError::NoSlaves);
        }

        info!(slaves = self.registry.len(), "starting cluster");
        self.registry
            .broadcast(Delivery::Reliable, &Message::Run, ProtocolStage::Run)?;

        let mut polls = 0u64;
        loop {
            self.registry.pump_all(ProtocolStage::Run)?;
            if self.registry.all_initialized() {
                info!("cluster initialized");
                return Ok(());
            }
            self.check_poll_bound(&mut polls, FrameId::ZERO, ProtocolStage::Run)?;
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Renders the next frame (one greater than the last, wrapping to 0
    /// on counter overflow).
    ///
    /// # Errors
    ///
    /// See [`RenderCoordinator::render_frame_at`].
    pub fn render_frame(&mut self) -> Result<FrameId, ClusterError> {
        let frame = self.current_frame.next();
        self.render_frame_at(frame)?;
        Ok(frame)
    }

    /// Drives the cluster through one complete frame.
    ///
    /// On return, every synchronous slave has both drawn and presented
    /// exactly `frame`. Asynchronous slaves received the same broadcasts
    /// but may lag arbitrarily.
    ///
    /// # Errors
    ///
    /// A reliable-channel failure or an exhausted poll bound ends the
    /// run. Fast-channel loss is invisible: it only adds retransmission
    /// latency.
    pub fn render_frame_at(&mut self, frame: FrameId) -> Result<(), ClusterError> {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.before_frame(frame);
        }

        // Replicate application state before anything draws.
        for msg in self.state.auto_push_messages() {
            self.registry
                .broadcast(Delivery::Fast, &msg, ProtocolStage::Render)?;
        }

        let render = Message::Render(frame);
        self.registry
            .broadcast(Delivery::Fast, &render, ProtocolStage::Render)?;
        self.converge(frame, false, &render, ProtocolStage::Render)?;

        let swap = Message::Swap(frame);
        self.registry
            .broadcast(Delivery::Fast, &swap, ProtocolStage::Swap)?;
        self.converge(frame, true, &swap, ProtocolStage::Swap)?;

        self.current_frame = frame;

        if let Some(hooks) = self.hooks.as_mut() {
            hooks.after_frame(frame);
        }
        Ok(())
    }

    /// Stops the cluster: broadcasts EXIT, blocks until every slave has
    /// acknowledged, and releases all connections.
    ///
    /// # Errors
    ///
    /// Reliable-channel failures and poll-bound exhaustion, as in
    /// [`RenderCoordinator::run`].
    pub fn shutdown(mut self) -> Result<(), ClusterError> {
        info!("stopping cluster");
        self.registry
            .broadcast(Delivery::Reliable, &Message::Exit, ProtocolStage::Exit)?;

        let mut polls = 0u64;
        loop {
            self.registry.pump_all(ProtocolStage::Exit)?;
            if self.registry.all_stopped() {
                info!("cluster stopped");
                return Ok(());
            }
            self.check_poll_bound(&mut polls, self.current_frame, ProtocolStage::Exit)?;
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Poll-and-resend until every synchronous slave reports at least
    /// `(target, target_swapped)`.
    fn converge(
        &mut self,
        target: FrameId,
        target_swapped: bool,
        resend: &Message,
        stage: ProtocolStage,
    ) -> Result<(), ClusterError> {
        let mut polls = 0u64;
        loop {
            self.registry.pump_all(stage)?;
            if self.registry.all_ready(target, target_swapped) {
                return Ok(());
            }
            self.check_poll_bound(&mut polls, target, stage)?;
            thread::sleep(self.config.poll_interval);
            self.registry
                .resend_behind(target, target_swapped, resend, stage)?;
        }
    }

    /// Counts a poll against the configured bound.
    fn check_poll_bound(
        &self,
        polls: &mut u64,
        frame: FrameId,
        stage: ProtocolStage,
    ) -> Result<(), ClusterError> {
        if let Some(max) = self.config.max_polls {
            if *polls >= max {
                error!(frame = %frame, %stage, polls = *polls, "convergence wait exhausted");
                return Err(ClusterError::ConvergenceTimeout {
                    frame,
                    stage,
                    polls: *polls,
                });
            }
        }
        *polls += 1;
        Ok(())
    }
}
