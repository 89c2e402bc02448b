//! Renderer boundary.
//!
//! The core never draws; it sequences an external renderer's calls so
//! that every surface in the cluster draws and presents the same frame.
//! Worker threads call these methods for the surfaces they own, so the
//! renderer is shared (`Sync`) while each surface handle stays on the
//! thread that opened it (display contexts are commonly thread-affine).

use thiserror::Error;

/// Error opening a display surface.
#[derive(Debug, Error)]
#[error("failed to open display surface `{surface}`: {reason}")]
pub struct RenderError {
    /// The surface name from the window assignment.
    pub surface: String,
    /// Backend-specific description of the failure.
    pub reason: String,
}

/// External rendering backend.
pub trait Renderer: Send + Sync + 'static {
    /// Handle to one open display surface, owned by one worker thread.
    type Surface: Send + 'static;

    /// Opens the surface named in a window assignment.
    ///
    /// # Errors
    ///
    /// A surface that cannot open is fatal to cluster startup.
    fn open_surface(&self, name: &str) -> Result<Self::Surface, RenderError>;

    /// Closes a surface. Called during slave shutdown, on the worker
    /// thread that opened it.
    fn close_surface(&self, surface: Self::Surface);

    /// Draws the current frame into the surface's back buffer.
    fn draw(&self, surface: &mut Self::Surface);

    /// Exchanges the surface's front and back buffers.
    fn swap_buffers(&self, surface: &mut Self::Surface);
}
