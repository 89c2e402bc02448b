//! Process Launcher boundary.
//!
//! Spawning a render slave on a remote node (ssh-style launch, argv
//! templating, environment distribution) is outside this crate. The
//! coordinator only needs the result: a connected [`Link`] to the new
//! process. Launch is synchronous and fatal on failure — a cluster with
//! a missing slave cannot run.

use thiserror::Error;

use crate::transport::Link;

/// Error launching a slave process.
#[derive(Debug, Error)]
#[error("failed to launch `{process}` on node `{node}`: {reason}")]
pub struct LaunchError {
    /// Node the launch was attempted on.
    pub node: String,
    /// Process name or argv template that failed.
    pub process: String,
    /// Backend-specific description of the failure.
    pub reason: String,
}

/// Launches slave processes and hands back a link to each.
pub trait Launcher {
    /// Spawns `process` on `node` and returns the connected link.
    ///
    /// Called at most once per distinct `(node, process)` pair; the
    /// connection registry reuses the link for every surface mapped to
    /// that pair.
    ///
    /// # Errors
    ///
    /// Any failure here aborts cluster startup.
    fn spawn(&mut self, node: &str, process: &str) -> Result<Box<dyn Link>, LaunchError>;
}
