//! Slave side of the cluster: the per-process agent that answers the
//! coordinator, and the barrier-coordinated render worker threads it
//! drives.

pub mod agent;
pub mod thread_group;

pub use agent::{AgentError, AgentPhase, SlaveAgent};
pub use thread_group::{RenderThreadGroup, SurfaceOpenError};
