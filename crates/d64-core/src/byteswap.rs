//! In-place byte swapping of ROM images and dump format detection.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::constants::{ROM_MAGIC_NATIVE, ROM_MAGIC_SWAP2, ROM_MAGIC_SWAP4};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ByteSwapError {
    #[error("Invalid buffer for byteswap: length {len} is not a multiple of {group}")]
    InvalidLength { len: usize, group: usize },
    #[error("Cannot autodetect byteswap (magic 0x{0:08X})")]
    Undetected(u32),
}

/// Group size used when reordering bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteSwapMode {
    #[default]
    None,
    Swap2,
    Swap4,
}

impl ByteSwapMode {
    pub fn group(self) -> usize {
        match self {
            ByteSwapMode::None => 1,
            ByteSwapMode::Swap2 => 2,
            ByteSwapMode::Swap4 => 4,
        }
    }

    /// Detect the dump format from the first four bytes of a ROM.
    pub fn detect(header: &[u8]) -> Result<Self, ByteSwapError> {
        let word = match header.get(..4) {
            Some(b) => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            None => return Err(ByteSwapError::Undetected(0)),
        };
        match word {
            ROM_MAGIC_NATIVE => Ok(ByteSwapMode::None),
            ROM_MAGIC_SWAP2 => Ok(ByteSwapMode::Swap2),
            ROM_MAGIC_SWAP4 => Ok(ByteSwapMode::Swap4),
            other => Err(ByteSwapError::Undetected(other)),
        }
    }
}

impl fmt::Display for ByteSwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteSwapMode::None => write!(f, "none"),
            ByteSwapMode::Swap2 => write!(f, "16-bit"),
            ByteSwapMode::Swap4 => write!(f, "32-bit"),
        }
    }
}

impl FromStr for ByteSwapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "none" => Ok(ByteSwapMode::None),
            "2" => Ok(ByteSwapMode::Swap2),
            "4" => Ok(ByteSwapMode::Swap4),
            other => Err(format!("invalid byteswap value: {} (use 0, 2 or 4)", other)),
        }
    }
}

/// Reverse every 2- or 4-byte group of `buf` in place.
pub fn swap(buf: &mut [u8], mode: ByteSwapMode) -> Result<(), ByteSwapError> {
    let group = mode.group();
    if group == 1 {
        return Ok(());
    }
    if buf.len() % group != 0 {
        return Err(ByteSwapError::InvalidLength {
            len: buf.len(),
            group,
        });
    }
    for chunk in buf.chunks_exact_mut(group) {
        chunk.reverse();
    }
    Ok(())
}
