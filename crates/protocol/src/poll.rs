//! Socket events a session wants the poll loop to wait for.

use std::ops::{BitOr, BitOrAssign};

/// Flags describing the readiness a session is interested in.
///
/// The protocol layer reports these under the session's gate; the poll loop
/// turns them into `POLLIN` / `POLLOUT` interest for the session's socket.
/// Error conditions are always reported, so there is no flag for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PollFlags(u8);

impl PollFlags {
    /// No interest; the session's socket is left out of the wait.
    pub const NONE: PollFlags = PollFlags(0);

    /// The protocol layer expects incoming data.
    pub const READ_PENDING: PollFlags = PollFlags(0b0000_0001);

    /// The protocol layer has outgoing data queued.
    pub const WRITE_PENDING: PollFlags = PollFlags(0b0000_0010);

    /// Both read and write interest.
    pub const BOTH: PollFlags = PollFlags(0b0000_0011);

    /// Create flags from a raw byte value. Unknown bits are dropped.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte & Self::BOTH.0)
    }

    /// Get the raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if no interest is set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if read interest is set.
    #[inline]
    pub fn is_read_pending(self) -> bool {
        self.0 & Self::READ_PENDING.0 != 0
    }

    /// Check if write interest is set.
    #[inline]
    pub fn is_write_pending(self) -> bool {
        self.0 & Self::WRITE_PENDING.0 != 0
    }

    /// Return the union of two flag sets.
    #[inline]
    pub fn union(self, other: PollFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// Return a new flags with write interest set or cleared.
    #[inline]
    pub fn with_write_pending(self, pending: bool) -> Self {
        if pending {
            Self(self.0 | Self::WRITE_PENDING.0)
        } else {
            Self(self.0 & !Self::WRITE_PENDING.0)
        }
    }
}

impl BitOr for PollFlags {
    type Output = PollFlags;

    fn bitor(self, rhs: PollFlags) -> PollFlags {
        self.union(rhs)
    }
}

impl BitOrAssign for PollFlags {
    fn bitor_assign(&mut self, rhs: PollFlags) {
        *self = self.union(rhs);
    }
}
