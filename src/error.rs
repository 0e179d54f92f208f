//! Failures raised by the host side of the bridge protocol.
//!
//! Functions in this crate return `anyhow::Result`; the variants below are
//! carried inside the `anyhow::Error` and can be recovered with
//! `err.downcast_ref::<sioprog::Error>()`.

use crate::serialio::UnlockStatus;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The bridge answered with something other than the expected byte.
    #[error("synchronization error: expected {expected:#04x}, got {got:#04x}")]
    Synchronization { expected: u8, got: u8 },
    /// A reply ended before the expected number of bytes arrived.
    #[error("synchronization error: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    /// Nothing arrived within the transport timeout.
    #[error("timed out waiting for the bridge")]
    Timeout,
    /// The outbound FIFO refused a staged byte.
    #[error("bridge outbound FIFO is full")]
    FifoFull,
    /// The bridge did not recognise the command byte.
    #[error("bridge rejected the command")]
    UnknownCommand,
    #[error("unexpected bridge version: {0:#04x}")]
    AdapterVersion(u8),
    #[error("invalid target version: {}", hex::encode(.0))]
    TargetVersion(Vec<u8>),
    #[error("target did not unlock (status: {0:?})")]
    UnlockFailure(UnlockStatus),
}

impl Error {
    /// Maps an unexpected reply byte to the most specific error.
    pub(crate) fn from_reply(expected: u8, got: u8) -> Self {
        use crate::constants::replies;

        match got {
            replies::FIFO_FULL => Error::FifoFull,
            replies::UNKNOWN => Error::UnknownCommand,
            _ => Error::Synchronization { expected, got },
        }
    }

    /// True for the synchronization-failure class (bad ack or short read).
    pub fn is_synchronization(&self) -> bool {
        matches!(
            self,
            Error::Synchronization { .. }
                | Error::ShortRead { .. }
                | Error::FifoFull
                | Error::UnknownCommand
        )
    }
}
