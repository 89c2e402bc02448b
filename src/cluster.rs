//! Coordinator side of the cluster: window assignment, connection
//! bookkeeping, and the frame-synchronization driver.

pub mod assignment;
pub mod coordinator;
pub mod registry;

pub use assignment::WindowAssignment;
pub use coordinator::{CoordinatorConfig, FrameHooks, RenderCoordinator};
pub use registry::{ConnectionRegistry, SlaveConnection, SlaveId};

use std::fmt;

use thiserror::Error;

use crate::frame::FrameId;
use crate::launch::LaunchError;
use crate::transport::LinkError;

/// The protocol stage at which a connection failed, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStage {
    /// Sending WINDOW assignments.
    Window,
    /// Cluster startup (RUN broadcast and acks).
    Run,
    /// Per-frame RENDER handshake.
    Render,
    /// Per-frame SWAP handshake.
    Swap,
    /// Cluster shutdown (EXIT broadcast and acks).
    Exit,
}

impl fmt::Display for ProtocolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Window => "window assignment",
            Self::Run => "startup",
            Self::Render => "render",
            Self::Swap => "swap",
            Self::Exit => "shutdown",
        };
        f.write_str(name)
    }
}

/// Fatal coordinator-side errors.
///
/// There is no partial-cluster recovery: any of these ends the run. The
/// message always names the slave (where one is involved) and the
/// protocol stage, so the operator knows which node to look at.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A reliable send or receive failed on one slave's connection.
    #[error("slave {slave} failed during {stage}: {source}")]
    Connection {
        /// The slave whose link failed.
        slave: SlaveId,
        /// Protocol stage at the time of failure.
        stage: ProtocolStage,
        /// The underlying link failure.
        source: LinkError,
    },
    /// A slave process could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// `run()` was called with no windows assigned.
    #[error("no windows assigned; assign_windows() must run first")]
    NoSlaves,
    /// The configured poll bound elapsed before the cluster converged.
    #[error("cluster did not converge during {stage} of frame {frame} within {polls} polls")]
    ConvergenceTimeout {
        /// The frame being waited for.
        frame: FrameId,
        /// Stage that timed out.
        stage: ProtocolStage,
        /// Number of polls performed.
        polls: u64,
    },
}
