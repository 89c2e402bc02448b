//! Frame counters and the ordering rule for per-frame handshake messages.
//!
//! Frame numbers ride the best-effort channel, which may drop, duplicate,
//! or reorder deliveries. Every handler therefore decides "is this real
//! progress or a stale duplicate?" with the same comparison rule:
//! strictly greater wins, equality never does, and 0 is newer than any
//! other value so a wrapped counter reads as an increase.

use std::fmt;

/// A logical frame number.
///
/// Monotonically increasing unsigned counter; wraps to 0 after
/// [`u32::MAX`]. The wire encoding is the raw 4-byte little-endian value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// The frame number every connection starts at.
    pub const ZERO: Self = Self(0);

    /// Next frame number (wraps on overflow).
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Whether this frame number represents progress past `other`.
    ///
    /// Strict comparison: equal frame numbers are duplicates, not
    /// progress. A frame number of 0 is newer than any other value,
    /// which makes counter wraparound read as an increase.
    #[inline]
    #[must_use]
    pub const fn newer_than(self, other: Self) -> bool {
        if self.0 == other.0 {
            return false;
        }
        self.0 == 0 || self.0 > other.0
    }
}

impl From<u32> for FrameId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<FrameId> for u32 {
    fn from(f: FrameId) -> Self {
        f.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
