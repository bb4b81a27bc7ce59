//! Bounded producer/consumer pipe feeding uploads.
//!
//! A reader thread pulls blocks from the source into a `sync_channel`; the
//! transfer loop drains it through [`PipeReader`]. The producer blocks once
//! `depth` blocks are waiting.

use std::io::{self, Read};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use tracing::trace;

use super::read_full;

type Block = io::Result<Vec<u8>>;

/// Consumer end of the pipe.
pub struct PipeReader {
    rx: Receiver<Block>,
    current: Vec<u8>,
    pos: usize,
}

/// Start a producer thread reading `block`-sized pieces of `reader`.
pub fn spawn<R>(reader: R, block: usize, depth: usize) -> PipeReader
where
    R: Read + Send + 'static,
{
    let (tx, rx) = sync_channel(depth.max(1));
    thread::spawn(move || produce(reader, block.max(1), tx));
    PipeReader {
        rx,
        current: Vec::new(),
        pos: 0,
    }
}

fn produce<R: Read>(mut reader: R, block: usize, tx: SyncSender<Block>) {
    loop {
        let mut buf = vec![0u8; block];
        match read_full(&mut reader, &mut buf) {
            Ok(0) => break,
            Ok(n) => {
                buf.truncate(n);
                trace!(len = n, "Pipe block");
                // A closed receiver means the consumer stopped early.
                if tx.send(Ok(buf)).is_err() || n < block {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.current.len() {
            match self.rx.recv() {
                Ok(Ok(block)) => {
                    self.current = block;
                    self.pos = 0;
                }
                Ok(Err(e)) => return Err(e),
                // Producer finished.
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("disk on fire"));
            }
            self.served = true;
            buf[..3].copy_from_slice(b"abc");
            Ok(3)
        }
    }

    #[test]
    fn test_pipe_preserves_stream() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut pipe = spawn(Cursor::new(data.clone()), 1024, 2);
        let mut out = Vec::new();
        pipe.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_pipe_empty_source() {
        let mut pipe = spawn(io::empty(), 512, 1);
        let mut buf = [0u8; 16];
        assert_eq!(pipe.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_pipe_surfaces_producer_error() {
        let mut pipe = spawn(FailingReader { served: false }, 8, 1);
        let mut out = Vec::new();
        let err = pipe.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }
}
