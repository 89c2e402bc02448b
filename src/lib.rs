//! Cluster-rendering frame synchronization.
//!
//! A single [`cluster::RenderCoordinator`] drives any number of render
//! slave processes so that every display surface in the cluster draws and
//! presents the same logical frame at the same logical instant. Control
//! events (window assignment, startup, shutdown) travel over a reliable
//! channel; the high-frequency per-frame RENDER/SWAP handshake travels
//! over a best-effort channel and relies on idempotent handlers plus
//! poll-and-resend retransmission instead of transport reliability.
//!
//! Inside each slave, a [`slave::SlaveAgent`] drives a
//! [`slave::RenderThreadGroup`]: one worker thread per named thread
//! group, each owning a disjoint set of display surfaces, coordinated
//! through four reusable barriers (`start`, `entry`, `exit`, `swap`).
//!
//! The actual drawing, surface creation, and remote process launch are
//! external collaborators behind the [`render::Renderer`] and
//! [`launch::Launcher`] traits.

pub mod cluster;
pub mod frame;
pub mod launch;
pub mod message;
pub mod net;
pub mod render;
pub mod slave;
pub mod state;
pub mod trace;
pub mod transport;

pub use trace::init_tracing;
