//! Nested blob nodes of an RPK archive.
//!
//! Each node is a 20-byte little-endian header, a CRC-checked (optionally
//! LZF-compressed) body holding its children followed by its own payload,
//! and an `EOB\0` terminator.

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::trace;

use super::RpkError;

pub const BLOB_MAGIC: u8 = b'P';
pub const BLOB_VERSION: u8 = b'0';
pub const COMPRESSED: u8 = b'C';
pub const UNCOMPRESSED: u8 = b'U';
pub const END_OF_BLOB: [u8; 4] = *b"EOB\0";

/// Nesting allowed below the root.
pub const MAX_DEPTH: usize = 8;

/// Blob header (20 bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub magic: [u8; 2],
    pub version: u8,
    pub compress: u8,
    pub children: u32,
    /// Stored body length.
    pub length: u32,
    /// Body length after decompression.
    pub ulength: u32,
    /// CRC32 of the stored body.
    pub crc: u32,
}

impl BlobHeader {
    pub const SIZE: usize = 20;

    fn read_from<R: Read>(r: &mut R) -> Result<Self, RpkError> {
        let mut magic = [0u8; 2];
        r.read_exact(&mut magic).map_err(truncated)?;
        Ok(Self {
            magic,
            version: r.read_u8().map_err(truncated)?,
            compress: r.read_u8().map_err(truncated)?,
            children: r.read_u32::<LittleEndian>().map_err(truncated)?,
            length: r.read_u32::<LittleEndian>().map_err(truncated)?,
            ulength: r.read_u32::<LittleEndian>().map_err(truncated)?,
            crc: r.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    fn validate(&self) -> Result<(), RpkError> {
        if self.magic[0] != BLOB_MAGIC
            || self.version != BLOB_VERSION
            || (self.compress != COMPRESSED && self.compress != UNCOMPRESSED)
        {
            return Err(RpkError::Format(format!(
                "invalid blob header (magic {:02X?}, version 0x{:02X}, compression 0x{:02X})",
                self.magic, self.version, self.compress
            )));
        }
        Ok(())
    }
}

/// A parsed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub header: BlobHeader,
    pub children: Vec<Blob>,
    /// Body bytes left over after the children.
    pub payload: Vec<u8>,
}

impl Blob {
    /// Second magic byte, the node kind.
    pub fn kind(&self) -> u8 {
        self.header.magic[1]
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, RpkError> {
        read_node(r, 0)
    }
}

/// A short stream means the archive is cut off or a child count lies.
fn truncated(e: io::Error) -> RpkError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RpkError::Format("truncated blob".into())
    } else {
        RpkError::Io(e)
    }
}

fn read_node<R: Read>(r: &mut R, depth: usize) -> Result<Blob, RpkError> {
    if depth > MAX_DEPTH {
        return Err(RpkError::Format(format!(
            "blobs nested deeper than {}",
            MAX_DEPTH
        )));
    }

    let header = BlobHeader::read_from(r)?;
    header.validate()?;

    // grows with the bytes actually present, not the declared length
    let mut body = Vec::new();
    r.by_ref()
        .take(u64::from(header.length))
        .read_to_end(&mut body)?;
    if body.len() != header.length as usize {
        return Err(RpkError::Format("truncated blob".into()));
    }

    let actual = crc32fast::hash(&body);
    if actual != header.crc {
        return Err(RpkError::Integrity {
            expected: header.crc,
            actual,
        });
    }

    if header.compress == COMPRESSED {
        let ulength = header.ulength as usize;
        body = match lzf::decompress(&body, ulength) {
            Ok(out) => out,
            Err(lzf::LzfError::BufferTooSmall) => {
                return Err(RpkError::Format(format!(
                    "invalid uncompressed size in blob: more than {}",
                    ulength
                )));
            }
            Err(e) => return Err(RpkError::Decompress(format!("{:?}", e))),
        };
        if body.len() != ulength {
            return Err(RpkError::Format(format!(
                "invalid uncompressed size in blob: {} instead of {}",
                body.len(),
                ulength
            )));
        }
    }

    let mut cursor = Cursor::new(body);
    let mut children = Vec::with_capacity(header.children.min(16) as usize);
    for _ in 0..header.children {
        children.push(read_node(&mut cursor, depth + 1)?);
    }
    let consumed = cursor.position() as usize;
    let mut payload = cursor.into_inner();
    payload.drain(..consumed);

    let mut eob = [0u8; 4];
    r.read_exact(&mut eob).map_err(truncated)?;
    if eob != END_OF_BLOB {
        return Err(RpkError::Format(format!(
            "invalid end-of-blob marker {:02X?}",
            eob
        )));
    }

    trace!(
        kind = %char::from(header.magic[1]),
        children = children.len(),
        payload = payload.len(),
        "Blob parsed"
    );
    Ok(Blob {
        header,
        children,
        payload,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Serialize a node. Children must already be serialized.
    pub(crate) fn build(kind: u8, compress: bool, children: &[Vec<u8>], payload: &[u8]) -> Vec<u8> {
        let mut body: Vec<u8> = children.concat();
        body.extend_from_slice(payload);
        let ulength = body.len() as u32;
        let (tag, stored) = match compress.then(|| lzf::compress(&body)) {
            Some(Ok(packed)) => (COMPRESSED, packed),
            Some(Err(lzf::LzfError::NoCompressionPossible)) | None => (UNCOMPRESSED, body),
            Some(Err(e)) => panic!("lzf: {:?}", e),
        };

        let mut out = vec![BLOB_MAGIC, kind, BLOB_VERSION, tag];
        out.extend_from_slice(&(children.len() as u32).to_le_bytes());
        out.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        out.extend_from_slice(&ulength.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&stored).to_le_bytes());
        out.extend_from_slice(&stored);
        out.extend_from_slice(&END_OF_BLOB);
        out
    }

    #[test]
    fn test_parse_nested_uncompressed() {
        let leaf = build(b'A', false, &[], b"asset");
        let raw = build(b'F', false, &[leaf], b"tail");

        let blob = Blob::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(blob.kind(), b'F');
        assert_eq!(blob.payload, b"tail");
        assert_eq!(blob.children.len(), 1);
        assert_eq!(blob.children[0].payload, b"asset");
    }

    #[test]
    fn test_parse_compressed_body() {
        let payload: Vec<u8> = b"0123456789abcdef".repeat(64);
        let tail: Vec<u8> = b"firmware tail ".repeat(64);
        let leaf = build(b'A', true, &[], &payload);
        let raw = build(b'F', true, &[leaf], &tail);

        let blob = Blob::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(blob.header.compress, COMPRESSED);
        assert_eq!(blob.children.len(), 1);
        assert_eq!(blob.children[0].header.compress, COMPRESSED);
        assert_eq!(blob.children[0].payload, payload);
        assert_eq!(blob.payload, tail);
    }

    #[test]
    fn test_incompressible_body_stored_plain() {
        let raw = build(b'A', true, &[], b"xq");
        assert_eq!(raw[3], UNCOMPRESSED);
        let blob = Blob::read_from(&mut raw.as_slice()).unwrap();
        assert_eq!(blob.payload, b"xq");
    }

    #[test]
    fn test_corrupted_body_is_integrity_error() {
        let mut raw = build(b'A', false, &[], b"payload bytes");
        raw[BlobHeader::SIZE + 3] ^= 0x01;

        let err = Blob::read_from(&mut raw.as_slice()).unwrap_err();
        assert!(matches!(err, RpkError::Integrity { .. }));
        assert!(err.is_integrity());
    }

    #[test]
    fn test_missing_child_is_format_error() {
        let leaf = build(b'A', false, &[], b"only child");
        let mut raw = build(b'F', false, &[leaf], &[]);
        // claim two children
        raw[4] = 2;

        let err = Blob::read_from(&mut raw.as_slice()).unwrap_err();
        assert!(matches!(err, RpkError::Format(_)), "{:?}", err);
    }

    #[test]
    fn test_bad_header_and_trailer() {
        let mut raw = build(b'A', false, &[], b"x");
        raw[2] = b'1';
        assert!(matches!(
            Blob::read_from(&mut raw.as_slice()),
            Err(RpkError::Format(_))
        ));

        let mut raw = build(b'A', false, &[], b"x");
        let n = raw.len();
        raw[n - 1] = b'!';
        assert!(matches!(
            Blob::read_from(&mut raw.as_slice()),
            Err(RpkError::Format(_))
        ));
    }

    #[test]
    fn test_uncompressed_size_mismatch() {
        let payload = b"abcabcabcabcabcabcabcabcabcabcabcabc".to_vec();
        let raw = build(b'A', true, &[], &payload);
        assert_eq!(raw[3], COMPRESSED);
        // ULength is bytes 12..16
        let ul = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);

        for wrong in [ul - 1, ul + 1] {
            let mut bad = raw.clone();
            bad[12..16].copy_from_slice(&wrong.to_le_bytes());
            let err = Blob::read_from(&mut bad.as_slice()).unwrap_err();
            assert!(
                matches!(err, RpkError::Format(ref m) if m.contains("uncompressed size")),
                "ulength {}: {:?}",
                wrong,
                err
            );
        }
    }

    #[test]
    fn test_oversized_length_is_truncation() {
        let mut raw = build(b'A', false, &[], b"short body");
        // Length is bytes 8..12; claim far more than the stream holds
        raw[8..12].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = Blob::read_from(&mut raw.as_slice()).unwrap_err();
        assert!(matches!(err, RpkError::Format(ref m) if m == "truncated blob"));
    }

    #[test]
    fn test_depth_cap() {
        let mut node = build(b'A', false, &[], b"deep");
        for _ in 0..=MAX_DEPTH {
            node = build(b'F', false, &[node], &[]);
        }
        let err = Blob::read_from(&mut node.as_slice()).unwrap_err();
        assert!(matches!(err, RpkError::Format(ref m) if m.contains("nested")));
    }
}
