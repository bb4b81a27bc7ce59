//! Bank transfer engine: chunked upload and download of device memory.

pub mod pipe;

use std::io::{self, Read, Write};

use tracing::{debug, info, instrument};

use crate::byteswap::{ByteSwapMode, swap};
use crate::cancel::CancelToken;
use crate::device::DeviceSession;
use crate::error::Result;
use crate::events::{Direction, Event};
use crate::protocol::constants::{ONE28_K, PAD_BYTE, SIXTEEN_MB, TRANSFER_ALIGN, TWO_MB};
use crate::protocol::{Bank, Command, Opcode};
use crate::transport::UsbTransport;

/// Frame overhead of a `LoadFromPc` command (opcode, tag, two args).
const UPLOAD_FRAME_OVERHEAD: usize = 12;

/// Chunk size for a transfer of `total` bytes.
pub fn chunk_size(total: u64) -> usize {
    if total >= SIXTEEN_MB {
        32 * ONE28_K
    } else if total >= TWO_MB {
        16 * ONE28_K
    } else {
        4 * ONE28_K
    }
}

/// Round `len` up to the transfer alignment.
pub fn align_up(len: usize) -> usize {
    len.next_multiple_of(TRANSFER_ALIGN)
}

/// Read until `buf` is full or the source is exhausted.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Parameters of one bank transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub bank: Bank,
    pub offset: u32,
    /// Bytes to move.
    pub size: u64,
    pub swap: ByteSwapMode,
}

impl TransferRequest {
    pub fn new(bank: Bank, offset: u32, size: u64) -> Self {
        Self {
            bank,
            offset,
            size,
            swap: ByteSwapMode::None,
        }
    }

    pub fn with_swap(mut self, swap: ByteSwapMode) -> Self {
        self.swap = swap;
        self
    }

    fn bank_arg(&self, len: usize) -> u32 {
        (u32::from(self.bank.id()) << 24) | len as u32
    }
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Upload `req.size` bytes from `src` into a bank.
    ///
    /// The last chunk is padded with 0xFF to the 512-byte alignment and the
    /// padding counts as transferred. A source that ends early finishes the
    /// upload. Returns the bytes sent including padding.
    pub fn upload<R: Read>(
        &mut self,
        req: &TransferRequest,
        src: R,
        cancel: &CancelToken,
    ) -> Result<u64> {
        self.upload_inspect(req, src, cancel, |_| {})
    }

    /// [`upload`](Self::upload), handing each chunk's source bytes to
    /// `inspect` after byte-swapping and before padding.
    #[instrument(skip_all, fields(bank = %req.bank, offset = req.offset, size = req.size))]
    pub fn upload_inspect<R, F>(
        &mut self,
        req: &TransferRequest,
        mut src: R,
        cancel: &CancelToken,
        mut inspect: F,
    ) -> Result<u64>
    where
        R: Read,
        F: FnMut(&[u8]),
    {
        let chunk = chunk_size(req.size);
        self.channel()
            .transport_mut()
            .set_write_chunk_size(chunk + UPLOAD_FRAME_OVERHEAD);
        self.observer().on_event(&Event::TransferStarted {
            direction: Direction::Upload,
            bank: req.bank,
            offset: req.offset,
            total: req.size,
        });

        let mut buf = vec![0u8; chunk];
        let mut offset = req.offset;
        let mut remaining = req.size;
        let mut sent = 0u64;

        while remaining > 0 {
            cancel.check()?;

            let want = remaining.min(chunk as u64) as usize;
            let read = read_full(&mut src, &mut buf[..want])?;
            if read == 0 {
                debug!(sent, "Source exhausted");
                break;
            }

            let padded = align_up(read);
            buf[read..padded].fill(PAD_BYTE);
            swap(&mut buf[..padded], req.swap)?;
            inspect(&buf[..read]);

            let cmd = Command::new(Opcode::LoadFromPc)
                .arg(offset)
                .arg(req.bank_arg(padded))
                .payload(&buf[..padded]);
            self.channel().send(&cmd, &mut [])?;

            offset = offset.wrapping_add(padded as u32);
            remaining = remaining.saturating_sub(padded as u64);
            sent += padded as u64;
            debug!(offset = %format!("0x{:X}", offset), len = padded, "Chunk uploaded");
            self.observer().on_event(&Event::TransferProgress {
                direction: Direction::Upload,
                current: sent,
                total: req.size,
            });

            if read < want {
                debug!(sent, "Source ended inside a chunk");
                break;
            }
        }

        info!(bytes = sent, "Upload complete");
        self.observer().on_event(&Event::TransferFinished {
            direction: Direction::Upload,
            bytes: sent,
        });
        Ok(sent)
    }

    /// Download `req.size` bytes of a bank into `dst`.
    ///
    /// Each request is rounded up to the 512-byte alignment; only the
    /// requested bytes reach `dst`.
    #[instrument(skip_all, fields(bank = %req.bank, offset = req.offset, size = req.size))]
    pub fn download<W: Write>(
        &mut self,
        req: &TransferRequest,
        mut dst: W,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let chunk = chunk_size(req.size);
        self.channel().transport_mut().set_read_chunk_size(chunk);
        self.observer().on_event(&Event::TransferStarted {
            direction: Direction::Download,
            bank: req.bank,
            offset: req.offset,
            total: req.size,
        });

        let mut buf = vec![0u8; chunk];
        let mut offset = req.offset;
        let mut remaining = req.size;
        let mut received = 0u64;

        while remaining > 0 {
            cancel.check()?;

            let sz = remaining.min(chunk as u64) as usize;
            let padded = align_up(sz);

            let cmd = Command::new(Opcode::DumpToPc)
                .arg(offset)
                .arg(req.bank_arg(padded));
            self.channel().send(&cmd, &mut buf[..padded])?;
            swap(&mut buf[..padded], req.swap)?;
            dst.write_all(&buf[..sz])?;

            offset = offset.wrapping_add(sz as u32);
            remaining -= sz as u64;
            received += sz as u64;
            debug!(offset = %format!("0x{:X}", offset), len = sz, "Chunk downloaded");
            self.observer().on_event(&Event::TransferProgress {
                direction: Direction::Download,
                current: received,
                total: req.size,
            });
        }
        dst.flush()?;

        info!(bytes = received, "Download complete");
        self.observer().on_event(&Event::TransferFinished {
            direction: Direction::Download,
            bytes: received,
        });
        Ok(received)
    }
}
