//! Error types for event queue decoding.

use std::fmt;

/// Raw account bytes do not match the expected event queue layout.
///
/// Decoding never guesses: any mismatch is fatal for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Account length does not fit header, trailer and a whole number of slots.
    InvalidLength { len: usize },

    /// Account does not start with the expected magic bytes.
    InvalidHeaderMagic,

    /// Account does not end with the expected padding bytes.
    InvalidTrailerMagic,

    /// Account flags do not describe an initialized event queue.
    NotAnEventQueue { account_flags: u64 },

    /// Ring head points outside of the slot array.
    HeadOutOfRange { head: u64, capacity: usize },

    /// Live record count exceeds the ring capacity.
    CountOutOfRange { count: u64, capacity: usize },

    /// Requested slot outside of the slot array.
    SlotOutOfRange { index: usize, capacity: usize },

    /// Fewer bytes than the layout requires.
    Truncated,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidLength { len } => {
                write!(f, "invalid event queue account length: {}", len)
            }
            DecodeError::InvalidHeaderMagic => write!(f, "invalid event queue header magic"),
            DecodeError::InvalidTrailerMagic => write!(f, "invalid event queue trailer magic"),
            DecodeError::NotAnEventQueue { account_flags } => {
                write!(f, "account flags {:#x} do not describe an event queue", account_flags)
            }
            DecodeError::HeadOutOfRange { head, capacity } => {
                write!(f, "queue head {} out of range, capacity {}", head, capacity)
            }
            DecodeError::CountOutOfRange { count, capacity } => {
                write!(f, "queue count {} exceeds capacity {}", count, capacity)
            }
            DecodeError::SlotOutOfRange { index, capacity } => {
                write!(f, "slot {} out of range, capacity {}", index, capacity)
            }
            DecodeError::Truncated => write!(f, "unexpected end of event queue data"),
        }
    }
}

impl std::error::Error for DecodeError {}
