//! RPK firmware archives.
//!
//! An archive is a root blob of kind `F` with exactly one metadata child
//! (`M`) and one asset child (`A`), neither of which may have children.

pub mod blob;
pub mod metadata;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument};

pub use blob::{Blob, BlobHeader};
pub use metadata::{AssetKind, Metadata};

const KIND_FIRMWARE: u8 = b'F';
const KIND_METADATA: u8 = b'M';
const KIND_ASSET: u8 = b'A';

#[derive(Error, Debug)]
pub enum RpkError {
    #[error("Invalid RPK: {0}")]
    Format(String),
    #[error("Corrupted blob in RPK (crc 0x{expected:08X}, computed 0x{actual:08X})")]
    Integrity { expected: u32, actual: u32 },
    #[error("Cannot decompress blob: {0}")]
    Decompress(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpkError {
    /// The archive was damaged in storage or transit.
    pub fn is_integrity(&self) -> bool {
        matches!(self, RpkError::Integrity { .. })
    }
}

/// A parsed firmware archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpk {
    pub metadata: Metadata,
    pub asset: Vec<u8>,
}

impl Rpk {
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, RpkError> {
        let root = Blob::read_from(&mut reader)?;
        if root.kind() != KIND_FIRMWARE {
            return Err(RpkError::Format(format!(
                "unexpected root blob with magic {:?}",
                String::from_utf8_lossy(&root.header.magic)
            )));
        }

        let mut metadata = None;
        let mut asset = None;
        for child in root.children {
            let (slot, name) = match child.kind() {
                KIND_METADATA => (&mut metadata, "metadata"),
                KIND_ASSET => (&mut asset, "asset"),
                other => {
                    debug!(kind = %char::from(other), "Ignoring unknown blob");
                    continue;
                }
            };
            if slot.is_some() {
                return Err(RpkError::Format(format!("duplicate {} found", name)));
            }
            if !child.children.is_empty() {
                return Err(RpkError::Format(format!(
                    "unexpected {} children blobs",
                    name
                )));
            }
            *slot = Some(child.payload);
        }

        let metadata = metadata.ok_or_else(|| RpkError::Format("metadata not found".into()))?;
        let asset = asset.ok_or_else(|| RpkError::Format("asset not found".into()))?;
        Ok(Self {
            metadata: Metadata::parse(&metadata)?,
            asset,
        })
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RpkError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Write the raw asset. Returns the number of bytes written.
    pub fn extract_to<P: AsRef<Path>>(&self, path: P) -> Result<usize, RpkError> {
        std::fs::write(path, &self.asset)?;
        Ok(self.asset.len())
    }

    /// CRC32 of the asset.
    pub fn asset_crc(&self) -> u32 {
        crc32fast::hash(&self.asset)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rpk::blob::tests::build;
    use crate::rpk::metadata::tests::sample_record;

    /// Serialized archive around `asset`.
    pub(crate) fn sample_archive(asset: &[u8]) -> Vec<u8> {
        let md = build(KIND_METADATA, true, &[], &sample_record());
        let asset = build(KIND_ASSET, false, &[], asset);
        build(KIND_FIRMWARE, false, &[md, asset], &[])
    }

    #[test]
    fn test_parse_archive() {
        let rpk = Rpk::from_reader(sample_archive(b"FIRMWARE").as_slice()).unwrap();
        assert_eq!(rpk.asset, b"FIRMWARE");
        assert_eq!(rpk.metadata.file, "firmware.bin");
        assert_eq!(rpk.asset_crc(), crc32fast::hash(b"FIRMWARE"));
    }

    #[test]
    fn test_root_must_be_firmware() {
        let raw = build(KIND_ASSET, false, &[], b"x");
        let err = Rpk::from_reader(raw.as_slice()).unwrap_err();
        assert!(err.to_string().contains("unexpected root blob"));
    }

    #[test]
    fn test_duplicate_and_missing_children() {
        let md = build(KIND_METADATA, false, &[], &sample_record());
        let a1 = build(KIND_ASSET, false, &[], b"a");
        let a2 = build(KIND_ASSET, false, &[], b"b");

        let raw = build(KIND_FIRMWARE, false, &[md.clone(), a1.clone(), a2], &[]);
        let err = Rpk::from_reader(raw.as_slice()).unwrap_err();
        assert!(err.to_string().contains("duplicate asset"));

        let raw = build(KIND_FIRMWARE, false, &[a1], &[]);
        let err = Rpk::from_reader(raw.as_slice()).unwrap_err();
        assert!(err.to_string().contains("metadata not found"));

        let raw = build(KIND_FIRMWARE, false, &[md], &[]);
        let err = Rpk::from_reader(raw.as_slice()).unwrap_err();
        assert!(err.to_string().contains("asset not found"));
    }

    #[test]
    fn test_grandchildren_rejected() {
        let inner = build(b'X', false, &[], b"?");
        let asset = build(KIND_ASSET, false, &[inner], b"a");
        let md = build(KIND_METADATA, false, &[], &sample_record());
        let raw = build(KIND_FIRMWARE, false, &[md, asset], &[]);

        let err = Rpk::from_reader(raw.as_slice()).unwrap_err();
        assert!(err.to_string().contains("unexpected asset children"));
    }

    #[test]
    fn test_extract_to_file() {
        let rpk = Rpk::from_reader(sample_archive(b"\x01\x02\x03").as_slice()).unwrap();
        let path = std::env::temp_dir().join(format!("d64-extract-{}.bin", std::process::id()));

        assert_eq!(rpk.extract_to(&path).unwrap(), 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"\x01\x02\x03");
        std::fs::remove_file(&path).unwrap();
    }
}
