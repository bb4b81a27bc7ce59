//! Crate-wide error type.

use thiserror::Error;

use crate::byteswap::ByteSwapError;
use crate::protocol::{Opcode, UpgradeStatus};
use crate::rpk::RpkError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum Error {
    /// Bounded busy retries were exhausted on a zero-byte read.
    #[error("64drive seems frozen, please reset it")]
    TransportFrozen,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The transport accepted only part of a frame. Never retried.
    #[error("Torn write: transport accepted {written} of {expected} bytes")]
    TornWrite { written: usize, expected: usize },

    #[error("Protocol corruption on {opcode}: expected completion {expected:02X?}, got {actual:02X?}")]
    ProtocolCorruption {
        opcode: Opcode,
        expected: [u8; 4],
        actual: [u8; 4],
    },

    #[error("Invalid debug FIFO header: {0:02X?}")]
    InvalidFifoHeader([u8; 4]),

    #[error("Invalid debug FIFO trailer: {0:02X?}")]
    InvalidFifoTrailer([u8; 4]),

    #[error(transparent)]
    ByteSwap(#[from] ByteSwapError),

    #[error("Invalid size {0} (must be a multiple of 512)")]
    InvalidSize(u64),

    #[error("Cannot autodetect CIC type")]
    CicUndetected,

    #[error(transparent)]
    Rpk(#[from] RpkError),

    #[error("Firmware transfer failed - 64drive SDRAM failure? (crc 0x{expected:08X}, read back 0x{actual:08X})")]
    VerifyMismatch { expected: u32, actual: u32 },

    #[error("Upgrade module is not ready ({0}) -- try power-cycling")]
    NotReady(UpgradeStatus),

    #[error("Upgrade failed: {0}")]
    UpgradeFailed(UpgradeStatus),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Wrong device: {0}")]
    WrongDevice(String),

    #[error("No 64drive devices found")]
    NoDevices,

    #[error("Multiple 64drive devices found, select one by serial")]
    MultipleDevices,

    #[error("64drive found but its driver is not installed")]
    UnknownDevice,

    #[error("No 64drive with serial {0}")]
    SerialNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether re-running the whole operation might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransportFrozen | Error::VerifyMismatch { .. } | Error::Io(_) => true,
            Error::Rpk(e) => e.is_integrity(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(Error::TransportFrozen.is_retryable());
        assert!(
            Error::VerifyMismatch {
                expected: 1,
                actual: 2
            }
            .is_retryable()
        );
        assert!(
            !Error::TornWrite {
                written: 3,
                expected: 8
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::UpgradeFailed(UpgradeStatus::BadVariant).is_retryable());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::NotReady(UpgradeStatus::Reset).to_string(),
            "Upgrade module is not ready (reset) -- try power-cycling"
        );
        assert_eq!(
            Error::UpgradeFailed(UpgradeStatus::VerifyFail).to_string(),
            "Upgrade failed: firmware verification failure"
        );
    }
}
