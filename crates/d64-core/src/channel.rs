//! Command channel: the only path from the host to the device.
//!
//! Frames are written in one transfer; completions are read back and
//! checked. Every hardware read goes through the busy-retry policy.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::transport::UsbTransport;

/// Retry policy for zero-byte reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Attempts before the device is declared frozen.
    pub attempts: u32,
    /// Minimum duration of one attempt; shorter attempts sleep the rest.
    pub backoff: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff: Duration::from_millis(5),
        }
    }
}

pub struct CommandChannel<T: UsbTransport> {
    transport: T,
    policy: ReadPolicy,
    closed: bool,
}

impl<T: UsbTransport> CommandChannel<T> {
    pub fn new(transport: T, policy: ReadPolicy) -> Self {
        Self {
            transport,
            policy,
            closed: false,
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read at least one byte, retrying while the device reports busy.
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        for attempt in 0..self.policy.attempts {
            let start = Instant::now();
            let n = self.transport.read(buf)?;
            if n > 0 {
                if attempt > 0 {
                    debug!(attempt, "Recovered from busy read");
                }
                return Ok(n);
            }
            let elapsed = start.elapsed();
            if elapsed < self.policy.backoff {
                thread::sleep(self.policy.backoff - elapsed);
            }
        }
        warn!(attempts = self.policy.attempts, "Device not answering");
        Err(Error::TransportFrozen)
    }

    /// Fill `buf` completely.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_some(&mut buf[filled..])?;
        }
        Ok(())
    }

    /// Send one command and wait for its completion.
    ///
    /// `out` receives exactly `out.len()` response bytes before the
    /// completion tag.
    pub fn send(&mut self, cmd: &Command<'_>, out: &mut [u8]) -> Result<()> {
        let frame = cmd.encode();
        trace!(opcode = %cmd.opcode, args = ?cmd.args, len = frame.len(), "TX frame");

        let written = self.transport.write(&frame)?;
        if written != frame.len() {
            return Err(Error::TornWrite {
                written,
                expected: frame.len(),
            });
        }

        if !out.is_empty() {
            self.read_exact(out)?;
            trace!(opcode = %cmd.opcode, len = out.len(), "RX data");
        }

        let mut tag = [0u8; 4];
        self.read_exact(&mut tag)?;
        let expected = cmd.completion();
        if tag != expected {
            return Err(Error::ProtocolCorruption {
                opcode: cmd.opcode,
                expected,
                actual: tag,
            });
        }
        Ok(())
    }

    /// Release the transport. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
