//! The slave-side protocol agent.
//!
//! One `SlaveAgent` per render slave process. It owns the link back to
//! the coordinator, accumulates WINDOW assignments, spawns the
//! [`RenderThreadGroup`] on RUN, and then answers the per-frame
//! RENDER/SWAP handshake until EXIT.
//!
//! The fast-channel handlers are idempotent under the frame ordering
//! rule: a duplicated or stale RENDER or SWAP changes nothing but is
//! still echoed, so the coordinator's view converges no matter how the
//! fast channel mangles delivery. A RENDER that arrives while the
//! previous frame's SWAP is still pending forces that swap first; the
//! cluster-wide SWAP barrier means every other slave has already drawn
//! the frame, so presenting it early on this one is safe.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cluster::WindowAssignment;
use crate::frame::FrameId;
use crate::message::Message;
use crate::render::Renderer;
use crate::slave::thread_group::{RenderThreadGroup, SurfaceOpenError};
use crate::state::StateRegistry;
use crate::trace::{debug, info, warn};
use crate::transport::{Delivery, Link, LinkError, Timeout};

/// Lifecycle phase of a slave agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// No coordinator traffic handled yet.
    Unstarted,
    /// Accumulating WINDOW assignments, waiting for RUN.
    Initializing,
    /// Workers spawned; answering the per-frame handshake.
    Running,
    /// EXIT handled; workers joined.
    Stopped,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Fatal slave-side errors. Any of these ends the slave process.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The link to the coordinator failed.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// The coordinator closed the link without sending EXIT.
    #[error("coordinator closed the link")]
    LinkClosed,
    /// A WINDOW assignment named a surface missing from the local table.
    #[error("window assignment names unknown surface `{0}`")]
    UnknownSurface(String),
    /// RUN arrived before any WINDOW assignment.
    #[error("RUN received with no surfaces assigned")]
    NoSurfaces,
    /// Display surfaces failed to open during startup.
    #[error(transparent)]
    SurfaceOpen(#[from] SurfaceOpenError),
    /// A control message arrived in a phase that cannot accept it.
    #[error("unexpected {message} message in {phase} phase")]
    UnexpectedMessage {
        /// Wire name of the offending message.
        message: &'static str,
        /// Agent phase at the time.
        phase: AgentPhase,
    },
}

/// Protocol agent for one render slave process.
pub struct SlaveAgent<R: Renderer> {
    link: Box<dyn Link>,
    renderer: Arc<R>,
    assignments: Vec<WindowAssignment>,
    state: StateRegistry,
    phase: AgentPhase,
    surfaces: Vec<String>,
    group: Option<RenderThreadGroup>,
    active_frame: FrameId,
    swapped: bool,
}

impl<R: Renderer> SlaveAgent<R> {
    /// Creates an agent over an established link to the coordinator.
    ///
    /// `assignments` is the same window assignment table the coordinator
    /// was built with; the agent uses it to resolve incoming surface
    /// names to worker thread names.
    #[must_use]
    pub fn new(
        link: Box<dyn Link>,
        renderer: Arc<R>,
        assignments: Vec<WindowAssignment>,
    ) -> Self {
        Self {
            link,
            renderer,
            assignments,
            state: StateRegistry::new(),
            phase: AgentPhase::Unstarted,
            surfaces: Vec::new(),
            group: None,
            active_frame: FrameId::ZERO,
            swapped: true,
        }
    }

    /// The slave-side state registry, for registering replicated
    /// variables before [`SlaveAgent::run_loop`].
    pub fn state_mut(&mut self) -> &mut StateRegistry {
        &mut self.state
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// The newest frame this slave has started drawing.
    #[must_use]
    pub fn active_frame(&self) -> FrameId {
        self.active_frame
    }

    /// Serves the coordinator until EXIT.
    ///
    /// Blocks on the link; this is the slave process's main loop.
    ///
    /// # Errors
    ///
    /// Any [`AgentError`] is fatal; the slave process should exit.
    pub fn run_loop(&mut self) -> Result<(), AgentError> {
        while self.phase != AgentPhase::Stopped {
            match self.link.recv(Timeout::Infinite)? {
                Some(msg) => self.handle(msg)?,
                None => return Err(AgentError::LinkClosed),
            }
        }
        Ok(())
    }

    fn handle(&mut self, msg: Message) -> Result<(), AgentError> {
        match msg {
            Message::Window(surface) => self.handle_window(surface),
            Message::Run => self.handle_run(),
            Message::Render(frame) => self.handle_render(frame),
            Message::Swap(frame) => self.handle_swap(frame),
            Message::State { tag, bytes } => {
                self.state.apply(tag, &bytes);
                Ok(())
            }
            Message::Exit => self.handle_exit(),
        }
    }

    fn handle_window(&mut self, surface: String) -> Result<(), AgentError> {
        match self.phase {
            AgentPhase::Unstarted | AgentPhase::Initializing => {
                debug!(surface = surface.as_str(), "surface assigned");
                self.surfaces.push(surface);
                self.phase = AgentPhase::Initializing;
                Ok(())
            }
            phase => Err(AgentError::UnexpectedMessage {
                message: "WINDOW",
                phase,
            }),
        }
    }

    fn handle_run(&mut self) -> Result<(), AgentError> {
        if matches!(self.phase, AgentPhase::Running | AgentPhase::Stopped) {
            return Err(AgentError::UnexpectedMessage {
                message: "RUN",
                phase: self.phase,
            });
        }
        if self.surfaces.is_empty() {
            return Err(AgentError::NoSurfaces);
        }

        let groups = partition_surfaces(&self.assignments, &self.surfaces)?;
        info!(
            workers = groups.len(),
            surfaces = self.surfaces.len(),
            "starting render workers"
        );
        let group = RenderThreadGroup::spawn(Arc::clone(&self.renderer), groups);
        self.group = Some(group.wait_start()?);

        self.link.send(Delivery::Reliable, &Message::Run)?;
        // Frame 0 is the implicit "nothing rendered yet" state.
        self.link
            .send(Delivery::Fast, &Message::Swap(FrameId::ZERO))?;
        self.active_frame = FrameId::ZERO;
        self.swapped = true;
        self.phase = AgentPhase::Running;
        Ok(())
    }

    fn handle_render(&mut self, frame: FrameId) -> Result<(), AgentError> {
        let Some(group) = &self.group else {
            warn!(%frame, "RENDER before startup, ignoring");
            return Ok(());
        };
        if frame.newer_than(self.active_frame) {
            if !self.swapped {
                group.swap();
            }
            group.render();
            self.active_frame = frame;
            self.swapped = false;
        }
        self.link.send(Delivery::Fast, &Message::Render(frame))?;
        Ok(())
    }

    fn handle_swap(&mut self, frame: FrameId) -> Result<(), AgentError> {
        let Some(group) = &self.group else {
            warn!(%frame, "SWAP before startup, ignoring");
            return Ok(());
        };
        // Acts only when the pending frame is the target or older.
        if !self.swapped && !self.active_frame.newer_than(frame) {
            group.swap();
            if frame.newer_than(self.active_frame) {
                self.active_frame = frame;
            }
            self.swapped = true;
        }
        self.link.send(Delivery::Fast, &Message::Swap(frame))?;
        Ok(())
    }

    fn handle_exit(&mut self) -> Result<(), AgentError> {
        info!("stopping render workers");
        if let Some(group) = self.group.take() {
            if !self.swapped {
                group.swap();
                self.swapped = true;
            }
            group.shutdown();
        }
        self.link.send(Delivery::Reliable, &Message::Exit)?;
        self.phase = AgentPhase::Stopped;
        Ok(())
    }
}

/// Groups the assigned surfaces by worker thread name, preserving
/// assignment order within each group.
fn partition_surfaces(
    assignments: &[WindowAssignment],
    surfaces: &[String],
) -> Result<Vec<(String, Vec<String>)>, AgentError> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for surface in surfaces {
        let assignment = assignments
            .iter()
            .find(|a| a.surface() == surface.as_str())
            .ok_or_else(|| AgentError::UnknownSurface(surface.clone()))?;
        let thread = assignment.thread();
        match groups.iter_mut().find(|(name, _)| name == thread) {
            Some((_, members)) => members.push(surface.clone()),
            None => groups.push((thread.to_owned(), vec![surface.clone()])),
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderError;
    use crate::transport::memory;

    struct NullRenderer;

    impl Renderer for NullRenderer {
        type Surface = ();

        fn open_surface(&self, _name: &str) -> Result<(), RenderError> {
            Ok(())
        }

        fn close_surface(&self, _surface: ()) {}

        fn draw(&self, _surface: &mut ()) {}

        fn swap_buffers(&self, _surface: &mut ()) {}
    }

    fn agent_with(
        assignments: Vec<WindowAssignment>,
    ) -> (SlaveAgent<NullRenderer>, memory::MemoryLink) {
        let (coord, slave) = memory::pair();
        let agent = SlaveAgent::new(Box::new(slave), Arc::new(NullRenderer), assignments);
        (agent, coord)
    }

    #[test]
    fn surfaces_group_by_thread_name() {
        let assignments = vec![
            WindowAssignment::new("a").on_thread("t0"),
            WindowAssignment::new("b").on_thread("t1"),
            WindowAssignment::new("c").on_thread("t0"),
        ];
        let surfaces = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let groups = partition_surfaces(&assignments, &surfaces).unwrap();
        assert_eq!(
            groups,
            vec![
                ("t0".to_owned(), vec!["a".to_owned(), "c".to_owned()]),
                ("t1".to_owned(), vec!["b".to_owned()]),
            ]
        );
    }

    #[test]
    fn unassigned_surface_is_rejected() {
        let assignments = vec![WindowAssignment::new("a")];
        let surfaces = vec!["a".to_owned(), "ghost".to_owned()];
        assert!(matches!(
            partition_surfaces(&assignments, &surfaces),
            Err(AgentError::UnknownSurface(name)) if name == "ghost"
        ));
    }

    #[test]
    fn run_without_windows_is_rejected() {
        let (mut agent, _coord) = agent_with(Vec::new());
        assert!(matches!(
            agent.handle(Message::Run),
            Err(AgentError::NoSurfaces)
        ));
    }

    #[test]
    fn startup_replies_run_and_swap_zero() {
        let (mut agent, mut coord) = agent_with(vec![WindowAssignment::new("a")]);

        agent.handle(Message::Window("a".to_owned())).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Initializing);
        agent.handle(Message::Run).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Running);

        assert_eq!(coord.try_recv().unwrap(), Some(Message::Run));
        assert_eq!(
            coord.try_recv().unwrap(),
            Some(Message::Swap(FrameId::ZERO))
        );

        agent.handle(Message::Exit).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Stopped);
    }

    #[test]
    fn window_after_startup_is_rejected() {
        let (mut agent, _coord) = agent_with(vec![WindowAssignment::new("a")]);
        agent.handle(Message::Window("a".to_owned())).unwrap();
        agent.handle(Message::Run).unwrap();

        assert!(matches!(
            agent.handle(Message::Window("late".to_owned())),
            Err(AgentError::UnexpectedMessage {
                message: "WINDOW",
                phase: AgentPhase::Running,
            })
        ));

        agent.handle(Message::Exit).unwrap();
    }

    #[test]
    fn stale_and_duplicate_frames_are_ignored() {
        let (mut agent, mut coord) = agent_with(vec![WindowAssignment::new("a")]);
        agent.handle(Message::Window("a".to_owned())).unwrap();
        agent.handle(Message::Run).unwrap();
        while coord.try_recv().unwrap().is_some() {}

        agent.handle(Message::Render(FrameId::from(3))).unwrap();
        agent.handle(Message::Swap(FrameId::from(3))).unwrap();
        // Duplicate and stale fast messages change nothing but still echo.
        agent.handle(Message::Render(FrameId::from(3))).unwrap();
        agent.handle(Message::Swap(FrameId::from(2))).unwrap();
        assert_eq!(agent.active_frame(), FrameId::from(3));

        let mut echoes = Vec::new();
        while let Some(msg) = coord.try_recv().unwrap() {
            echoes.push(msg);
        }
        assert_eq!(
            echoes,
            vec![
                Message::Render(FrameId::from(3)),
                Message::Swap(FrameId::from(3)),
                Message::Render(FrameId::from(3)),
                Message::Swap(FrameId::from(2)),
            ]
        );

        agent.handle(Message::Exit).unwrap();
    }

    #[test]
    fn render_forces_pending_swap() {
        let (mut agent, _coord) = agent_with(vec![WindowAssignment::new("a")]);
        agent.handle(Message::Window("a".to_owned())).unwrap();
        agent.handle(Message::Run).unwrap();

        // SWAP(1) lost: RENDER(2) must present frame 1 before drawing 2.
        agent.handle(Message::Render(FrameId::from(1))).unwrap();
        agent.handle(Message::Render(FrameId::from(2))).unwrap();
        assert_eq!(agent.active_frame(), FrameId::from(2));

        // EXIT with the swap for frame 2 still pending.
        agent.handle(Message::Exit).unwrap();
        assert_eq!(agent.phase(), AgentPhase::Stopped);
    }
}
