//! Mock transport for testing.
//!
//! Simulates a 64drive: written frames are decoded and answered the way the
//! device would, with per-bank memory, a version record and a scripted
//! sequence of upgrade statuses. Faults (busy reads, corrupt completions,
//! short writes) can be injected. Clones share state, so a test can keep a
//! handle after a session took ownership of the transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{CMD_TAG, CMP_TAG, FIFO_HEADER, FIFO_TRAILER, Opcode};

/// A decoded request as seen by the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCommand {
    pub opcode: Opcode,
    pub args: Vec<u32>,
    pub payload_len: usize,
}

#[derive(Debug)]
struct MockState {
    banks: HashMap<u8, Vec<u8>>,
    version: [u8; 8],
    statuses: VecDeque<u32>,
    last_status: u32,
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    commands: Vec<MockCommand>,
    busy_reads: usize,
    /// Bytes still delivered before a pause, and the busy reads of the pause.
    rx_gap: Option<(usize, usize)>,
    stall: bool,
    corrupt_completion: bool,
    corrupt_readback: bool,
    short_write: Option<usize>,
    write_hint: Option<usize>,
    read_hint: Option<usize>,
    close_count: usize,
    closed: bool,
}

/// In-memory 64drive simulator.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A HW2 (Rev B) device running firmware 2.06 with magic "UDEV".
    pub fn new() -> Self {
        Self::with_version(0x4200, 206, *b"UDEV")
    }

    pub fn with_version(variant: u16, firmware: u16, magic: [u8; 4]) -> Self {
        let mut version = [0u8; 8];
        version[0..2].copy_from_slice(&variant.to_be_bytes());
        version[2..4].copy_from_slice(&firmware.to_be_bytes());
        version[4..8].copy_from_slice(&magic);
        Self {
            state: Arc::new(Mutex::new(MockState {
                banks: HashMap::new(),
                version,
                statuses: VecDeque::new(),
                last_status: 1,
                rx: VecDeque::new(),
                writes: Vec::new(),
                commands: Vec::new(),
                busy_reads: 0,
                rx_gap: None,
                stall: false,
                corrupt_completion: false,
                corrupt_readback: false,
                short_write: None,
                write_hint: None,
                read_hint: None,
                close_count: 0,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Preload bank memory at `offset`.
    pub fn load_bank(&self, bank: u8, offset: usize, data: &[u8]) {
        let mut st = self.lock();
        let mem = st.banks.entry(bank).or_default();
        if mem.len() < offset + data.len() {
            mem.resize(offset + data.len(), 0);
        }
        mem[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Contents of a bank (empty if never written).
    pub fn bank(&self, bank: u8) -> Vec<u8> {
        self.lock().banks.get(&bank).cloned().unwrap_or_default()
    }

    /// Queue raw report words returned by successive `UpgradeReport` calls.
    /// Once drained, the last word is repeated.
    pub fn queue_statuses(&self, words: &[u32]) {
        self.lock().statuses.extend(words.iter().copied());
    }

    /// Make the next `n` reads return zero bytes.
    pub fn inject_busy_reads(&self, n: usize) {
        self.lock().busy_reads = n;
    }

    /// After `after` more bytes are read, go quiet for `busy` reads.
    pub fn pause_rx(&self, after: usize, busy: usize) {
        self.lock().rx_gap = Some((after, busy));
    }

    /// Stop answering entirely: every read returns zero bytes.
    pub fn set_stalled(&self, stall: bool) {
        self.lock().stall = stall;
    }

    /// Answer every command with a malformed completion tag.
    pub fn corrupt_completions(&self) {
        self.lock().corrupt_completion = true;
    }

    /// Flip the first byte of every bank dump, as failing SDRAM would.
    pub fn corrupt_readback(&self) {
        self.lock().corrupt_readback = true;
    }

    /// Accept only `n` bytes of the next write.
    pub fn short_write_next(&self, n: usize) {
        self.lock().short_write = Some(n);
    }

    /// Queue a debug FIFO packet.
    pub fn queue_fifo_packet(&self, typ: u8, data: &[u8]) {
        let len = data.len() as u32;
        let mut st = self.lock();
        st.rx.extend(FIFO_HEADER);
        st.rx.push_back(typ);
        st.rx.extend(&len.to_be_bytes()[1..]);
        st.rx.extend(data.iter().copied());
        st.rx.extend(FIFO_TRAILER);
    }

    /// Queue raw bytes for the host to read.
    pub fn queue_rx(&self, data: &[u8]) {
        self.lock().rx.extend(data.iter().copied());
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Commands decoded so far.
    pub fn commands(&self) -> Vec<MockCommand> {
        self.lock().commands.clone()
    }

    pub fn chunk_hints(&self) -> (Option<usize>, Option<usize>) {
        let st = self.lock();
        (st.write_hint, st.read_hint)
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn execute(&mut self, frame: &[u8]) {
        if frame.len() < 4 || frame[1..4] != CMD_TAG {
            return;
        }
        let opcode = Opcode::from_code(frame[0]);
        let nargs = match opcode {
            Opcode::LoadFromPc | Opcode::DumpToPc => 2,
            Opcode::SetSaveType | Opcode::SetCicType | Opcode::SetExtended => 1,
            _ => 0,
        };
        let body = &frame[4..];
        let args: Vec<u32> = body
            .chunks_exact(4)
            .take(nargs)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        let payload = body.get(nargs * 4..).unwrap_or(&[]);
        self.commands.push(MockCommand {
            opcode,
            args: args.clone(),
            payload_len: payload.len(),
        });

        match opcode {
            Opcode::LoadFromPc if args.len() == 2 => {
                let offset = args[0] as usize;
                let bank = (args[1] >> 24) as u8;
                let mem = self.banks.entry(bank).or_default();
                if mem.len() < offset + payload.len() {
                    mem.resize(offset + payload.len(), 0);
                }
                mem[offset..offset + payload.len()].copy_from_slice(payload);
            }
            Opcode::DumpToPc if args.len() == 2 => {
                let offset = args[0] as usize;
                let bank = (args[1] >> 24) as u8;
                let len = (args[1] & 0x00FF_FFFF) as usize;
                let mem = self.banks.get(&bank).map(Vec::as_slice).unwrap_or(&[]);
                for i in offset..offset + len {
                    let mut b = mem.get(i).copied().unwrap_or(0);
                    if self.corrupt_readback && i == offset {
                        b ^= 0xFF;
                    }
                    self.rx.push_back(b);
                }
            }
            Opcode::VersionRequest => {
                let version = self.version;
                self.rx.extend(version);
            }
            Opcode::UpgradeReport => {
                if let Some(word) = self.statuses.pop_front() {
                    self.last_status = word;
                }
                let word = self.last_status;
                self.rx.extend(word.to_be_bytes());
            }
            _ => {}
        }

        if self.corrupt_completion {
            self.rx.extend(*b"CMQ");
        } else {
            self.rx.extend(CMP_TAG);
        }
        self.rx.push_back(frame[0]);
    }
}

impl UsbTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut st = self.lock();
        if st.closed {
            return Err(TransportError::Closed);
        }
        st.writes.push(data.to_vec());
        if let Some(n) = st.short_write.take() {
            return Ok(n.min(data.len()));
        }
        st.execute(data);
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut st = self.lock();
        if st.closed {
            return Err(TransportError::Closed);
        }
        if st.stall {
            return Ok(0);
        }
        if st.busy_reads > 0 {
            st.busy_reads -= 1;
            return Ok(0);
        }
        let mut n = buf.len().min(st.rx.len());
        match st.rx_gap {
            Some((0, 0)) => st.rx_gap = None,
            Some((0, busy)) => {
                st.rx_gap = Some((0, busy - 1));
                return Ok(0);
            }
            Some((before, busy)) => {
                n = n.min(before);
                st.rx_gap = Some((before - n, busy));
            }
            None => {}
        }
        for (dst, src) in buf.iter_mut().zip(st.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn set_write_chunk_size(&mut self, size: usize) {
        self.lock().write_hint = Some(size);
    }

    fn set_read_chunk_size(&mut self, size: usize) {
        self.lock().read_hint = Some(size);
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut st = self.lock();
        st.closed = true;
        st.close_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_answers_version_request() {
        let mut mock = MockTransport::new();
        mock.write(b"\x80CMD").unwrap();

        let mut buf = [0u8; 16];
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(n, 12);
        assert_eq!(&buf[..8], &[0x42, 0x00, 0x00, 206, b'U', b'D', b'E', b'V']);
        assert_eq!(&buf[8..12], b"CMP\x80");
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockTransport::new();
        mock.write(b"\x70CMD\x00\x00\x00\x03").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            mock.commands(),
            vec![MockCommand {
                opcode: Opcode::SetSaveType,
                args: vec![3],
                payload_len: 0
            }]
        );
    }

    #[test]
    fn test_mock_bank_memory() {
        let mut mock = MockTransport::new();
        let mut frame = b"\x20CMD".to_vec();
        frame.extend_from_slice(&4u32.to_be_bytes());
        frame.extend_from_slice(&((6u32 << 24) | 2).to_be_bytes());
        frame.extend_from_slice(&[0xAB, 0xCD]);
        mock.write(&frame).unwrap();
        assert_eq!(mock.bank(6), vec![0, 0, 0, 0, 0xAB, 0xCD]);
    }

    #[test]
    fn test_mock_busy_and_close() {
        let mut mock = MockTransport::new();
        mock.queue_rx(b"xy");
        mock.inject_busy_reads(1);

        let mut buf = [0u8; 2];
        assert_eq!(mock.read(&mut buf).unwrap(), 0);
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(mock.read(&mut buf).unwrap(), 0);

        mock.close().unwrap();
        assert!(matches!(mock.write(b"test"), Err(TransportError::Closed)));
        assert_eq!(mock.close_count(), 1);
    }
}
