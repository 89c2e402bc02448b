//! State replication: named memory blobs pushed to every slave.
//!
//! The embedding application registers the same tagged buffers on the
//! coordinator and on every slave before the cluster starts. Each frame,
//! the coordinator snapshots its auto-push entries and fans them out
//! over the fast channel just before the RENDER broadcast, so
//! slave-local rendering sees the same application state as the
//! coordinator. The coordinator is the only writer; slaves copy incoming
//! bytes into their local registration and otherwise treat the buffers
//! as read-only during a frame.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::message::Message;
use crate::trace::debug;

/// Unique tag identifying one replicated state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateTag(u32);

impl StateTag {
    /// Creates a new state tag.
    #[must_use]
    pub const fn new(tag: u32) -> Self {
        Self(tag)
    }
}

impl From<u32> for StateTag {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<StateTag> for u32 {
    fn from(tag: StateTag) -> Self {
        tag.0
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error registering a state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// The tag is already registered.
    #[error("state tag {0} is already registered")]
    DuplicateTag(StateTag),
}

struct StateEntry {
    buf: Arc<Mutex<Vec<u8>>>,
    auto_push: bool,
}

/// Registry of replicated state variables for one process.
#[derive(Default)]
pub struct StateRegistry {
    entries: BTreeMap<StateTag, StateEntry>,
}

impl StateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared buffer under `tag`.
    ///
    /// Must be called identically on the coordinator and every slave
    /// before the cluster starts. Entries registered with `auto_push`
    /// are replicated automatically each frame; others only describe a
    /// local receive target.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::DuplicateTag`] if `tag` is taken.
    pub fn register(
        &mut self,
        tag: StateTag,
        buf: Arc<Mutex<Vec<u8>>>,
        auto_push: bool,
    ) -> Result<(), StateError> {
        if self.entries.contains_key(&tag) {
            return Err(StateError::DuplicateTag(tag));
        }
        self.entries.insert(tag, StateEntry { buf, auto_push });
        Ok(())
    }

    /// Returns the buffer registered under `tag`, if any.
    #[must_use]
    pub fn buffer(&self, tag: StateTag) -> Option<Arc<Mutex<Vec<u8>>>> {
        self.entries.get(&tag).map(|e| Arc::clone(&e.buf))
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots every auto-push entry as a STATE message, in tag order.
    ///
    /// Coordinator-side: the caller broadcasts these over the fast
    /// channel before each RENDER.
    #[must_use]
    pub fn auto_push_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|(_, e)| e.auto_push)
            .map(|(tag, e)| Message::State {
                tag: *tag,
                bytes: e.buf.lock().expect("state buffer poisoned").clone(),
            })
            .collect()
    }

    /// Applies a received STATE payload to the local registration.
    ///
    /// Copies `min(local_len, received_len)` bytes; a length mismatch is
    /// a safe truncated copy, never an overrun. An unregistered tag is
    /// ignored — newer coordinators may push variables this process
    /// doesn't know about.
    pub fn apply(&self, tag: StateTag, bytes: &[u8]) {
        let Some(entry) = self.entries.get(&tag) else {
            debug!(tag = %tag, "ignoring state push for unregistered tag");
            return;
        };
        let mut buf = entry.buf.lock().expect("state buffer poisoned");
        let n = buf.len().min(bytes.len());
        buf[..n].copy_from_slice(&bytes[..n]);
    }
}
