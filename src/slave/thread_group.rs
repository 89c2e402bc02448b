//! Render worker threads, coordinated through four reusable barriers.
//!
//! One worker thread per named thread group, each owning a disjoint set
//! of display surfaces. The control thread (the slave agent) and the N
//! workers meet at barriers sized `N + 1`:
//!
//! - `start` — once, after every worker has tried to open its surfaces.
//! - `entry` — top of each cycle. Workers read the command word after
//!   crossing it, so a draw cycle and the shutdown cycle share the same
//!   rendezvous.
//! - `exit`  — after every worker has finished drawing.
//! - `swap`  — the present point. Workers exchange buffers after
//!   crossing it, and block at `entry` until they have, so the next
//!   draw can never overtake an in-flight present.
//!
//! Surface handles never leave the worker that opened them; display
//! contexts are commonly thread-affine.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::render::Renderer;
use crate::trace::error;

const CMD_DRAW: u8 = 0;
const CMD_EXIT: u8 = 1;

/// One or more display surfaces failed to open during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{failed} display surface(s) failed to open")]
pub struct SurfaceOpenError {
    /// Number of surfaces that failed, cluster-startup fatal.
    pub failed: usize,
}

/// Barriers and flags shared between the control thread and workers.
#[derive(Debug, Clone)]
struct WorkerShared {
    start: Arc<Barrier>,
    entry: Arc<Barrier>,
    exit: Arc<Barrier>,
    swap: Arc<Barrier>,
    command: Arc<AtomicU8>,
    open_failures: Arc<AtomicUsize>,
}

/// The render workers of one slave process.
///
/// Constructed by [`RenderThreadGroup::spawn`], sequenced by the control
/// thread through [`render`](RenderThreadGroup::render) /
/// [`swap`](RenderThreadGroup::swap), and torn down by
/// [`shutdown`](RenderThreadGroup::shutdown), which joins every worker.
#[derive(Debug)]
pub struct RenderThreadGroup {
    workers: Vec<JoinHandle<()>>,
    shared: WorkerShared,
}

impl RenderThreadGroup {
    /// Spawns one worker per `(thread name, surface names)` group.
    ///
    /// Workers open their surfaces immediately; the caller must follow
    /// with [`RenderThreadGroup::wait_start`] before issuing cycles.
    #[must_use]
    pub fn spawn<R: Renderer>(renderer: Arc<R>, groups: Vec<(String, Vec<String>)>) -> Self {
        let n = groups.len();
        let shared = WorkerShared {
            start: Arc::new(Barrier::new(n + 1)),
            entry: Arc::new(Barrier::new(n + 1)),
            exit: Arc::new(Barrier::new(n + 1)),
            swap: Arc::new(Barrier::new(n + 1)),
            command: Arc::new(AtomicU8::new(CMD_DRAW)),
            open_failures: Arc::new(AtomicUsize::new(0)),
        };

        let mut workers = Vec::with_capacity(n);
        for (name, surfaces) in groups {
            let renderer = Arc::clone(&renderer);
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("lockstep-render-{name}"))
                .spawn(move || worker_loop(&*renderer, &surfaces, &shared))
                .expect("failed to spawn render worker thread");
            workers.push(handle);
        }

        Self { workers, shared }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until every worker has attempted to open its surfaces.
    ///
    /// On success returns the group ready for cycles. A worker that
    /// could not open a surface still reaches the barrier, so this never
    /// hangs on open failure.
    ///
    /// # Errors
    ///
    /// If any surface failed to open, the group is shut down (workers
    /// close whatever did open and are joined) and the failure count is
    /// returned.
    pub fn wait_start(self) -> Result<Self, SurfaceOpenError> {
        self.shared.start.wait();
        let failed = self.shared.open_failures.load(Ordering::Acquire);
        if failed > 0 {
            self.shutdown();
            return Err(SurfaceOpenError { failed });
        }
        Ok(self)
    }

    /// Runs one draw cycle: releases the workers into their draw calls
    /// and blocks until the last one has finished drawing.
    pub fn render(&self) {
        self.shared.entry.wait();
        self.shared.exit.wait();
    }

    /// Releases the workers into their buffer swaps.
    ///
    /// Returns as soon as the present point is crossed; the swaps
    /// themselves complete before the workers reach the next cycle's
    /// entry barrier.
    pub fn swap(&self) {
        self.shared.swap.wait();
    }

    /// Stops and joins every worker.
    ///
    /// The caller must have balanced every [`RenderThreadGroup::render`]
    /// with a [`RenderThreadGroup::swap`], so that all workers are
    /// parked at the entry barrier.
    pub fn shutdown(mut self) {
        self.shared.command.store(CMD_EXIT, Ordering::Release);
        self.shared.entry.wait();
        for handle in self.workers.drain(..) {
            handle.join().expect("render worker panicked");
        }
    }
}

fn worker_loop<R: Renderer>(renderer: &R, names: &[String], shared: &WorkerShared) {
    let mut surfaces = Vec::with_capacity(names.len());
    for name in names {
        match renderer.open_surface(name) {
            Ok(surface) => surfaces.push(surface),
            Err(err) => {
                error!(%err, "render worker failed to open surface");
                shared.open_failures.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
    shared.start.wait();

    loop {
        shared.entry.wait();
        if shared.command.load(Ordering::Acquire) == CMD_EXIT {
            break;
        }
        for surface in &mut surfaces {
            renderer.draw(surface);
        }
        shared.exit.wait();
        shared.swap.wait();
        for surface in &mut surfaces {
            renderer.swap_buffers(surface);
        }
    }

    for surface in surfaces {
        renderer.close_surface(surface);
    }
}
