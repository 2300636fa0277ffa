use std::{error, fmt};

/// Errors reported by bus operations.
///
/// Every public operation also mirrors its outcome into the bus-local
/// last-error slot, readable through [`Bus::last_error`](super::Bus::last_error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The handle does not name an open channel.
    NoChannel,
    /// The operation cannot make progress without suspending.
    WouldBlock,
    /// Buffer growth failed. Reserved: under Rust's default allocator an
    /// allocation failure aborts the process instead.
    NoMemory,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BusError::NoChannel => "no such channel",
            BusError::WouldBlock => "operation would block",
            BusError::NoMemory => "out of memory",
        };
        f.write_str(msg)
    }
}

impl error::Error for BusError {}
