//! Mapping from display surfaces to cluster placement.
//!
//! Each surface is assigned a `(node, process, thread)` triple, every
//! field defaulting to the `"auto"` wildcard. Surfaces sharing a node
//! and process share one slave connection; within a slave, surfaces
//! sharing a thread name share one render worker. The table is built
//! before the coordinator starts and is immutable for the run.

/// Wildcard placement value.
pub const AUTO: &str = "auto";

/// Placement of one display surface in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAssignment {
    surface: String,
    node: String,
    process: String,
    thread: String,
    is_async: bool,
}

impl WindowAssignment {
    /// Creates an assignment for `surface` with all placement fields set
    /// to the `"auto"` wildcard and synchronous progress tracking.
    #[must_use]
    pub fn new(surface: impl Into<String>) -> Self {
        Self {
            surface: surface.into(),
            node: AUTO.to_owned(),
            process: AUTO.to_owned(),
            thread: AUTO.to_owned(),
            is_async: false,
        }
    }

    /// Places the surface on a specific node.
    #[must_use]
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Places the surface in a specific slave process on its node.
    #[must_use]
    pub fn in_process(mut self, process: impl Into<String>) -> Self {
        self.process = process.into();
        self
    }

    /// Places the surface on a named render worker thread.
    #[must_use]
    pub fn on_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = thread.into();
        self
    }

    /// Marks the owning slave as asynchronous: the coordinator never
    /// waits for its per-frame progress.
    ///
    /// If any surface on the same `(node, process)` pair is synchronous,
    /// synchronous wins for the whole connection.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// The surface name, as sent in WINDOW messages.
    #[must_use]
    pub fn surface(&self) -> &str {
        &self.surface
    }

    /// Target node name.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Target process name.
    #[must_use]
    pub fn process(&self) -> &str {
        &self.process
    }

    /// Target render-thread name.
    #[must_use]
    pub fn thread(&self) -> &str {
        &self.thread
    }

    /// Whether the owning slave is requested as asynchronous.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.is_async
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_auto_and_synchronous() {
        let a = WindowAssignment::new("left-eye");
        assert_eq!(a.surface(), "left-eye");
        assert_eq!(a.node(), AUTO);
        assert_eq!(a.process(), AUTO);
        assert_eq!(a.thread(), AUTO);
        assert!(!a.is_async());
    }

    #[test]
    fn builder_sets_placement() {
        let a = WindowAssignment::new("wall-3")
            .on_node("render-node-2")
            .in_process("render-slave")
            .on_thread("gpu-1")
            .asynchronous();
        assert_eq!(a.node(), "render-node-2");
        assert_eq!(a.process(), "render-slave");
        assert_eq!(a.thread(), "gpu-1");
        assert!(a.is_async());
    }
}
