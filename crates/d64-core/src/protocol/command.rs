//! Command frames.
//!
//! A request is `[opcode]["CMD"][arg0 BE]..[argN BE][payload]`, written in a
//! single transfer. The device answers with the requested output bytes (if
//! any) followed by `"CMP"` and the echoed opcode.

use super::constants::{CMD_TAG, CMP_TAG, Opcode};

/// One request to the device. Lives for a single request/response exchange.
#[derive(Debug, Clone)]
pub struct Command<'a> {
    pub opcode: Opcode,
    pub args: Vec<u32>,
    pub payload: Option<&'a [u8]>,
}

impl<'a> Command<'a> {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
            payload: None,
        }
    }

    pub fn arg(mut self, value: u32) -> Self {
        self.args.push(value);
        self
    }

    pub fn payload(mut self, data: &'a [u8]) -> Self {
        self.payload = Some(data);
        self
    }

    /// Length of the encoded frame in bytes.
    pub fn frame_len(&self) -> usize {
        4 + self.args.len() * 4 + self.payload.map_or(0, <[u8]>::len)
    }

    /// Serialize the request frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.frame_len());
        buf.push(self.opcode.code());
        buf.extend_from_slice(&CMD_TAG);
        for &arg in &self.args {
            buf.extend_from_slice(&arg.to_be_bytes());
        }
        if let Some(data) = self.payload {
            buf.extend_from_slice(data);
        }
        buf
    }

    /// The completion tag the device must answer with.
    pub fn completion(&self) -> [u8; 4] {
        [CMP_TAG[0], CMP_TAG[1], CMP_TAG[2], self.opcode.code()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_with_args() {
        let cmd = Command::new(Opcode::LoadFromPc)
            .arg(0x0010_0000)
            .arg((1 << 24) | 0x200);
        assert_eq!(
            cmd.encode(),
            vec![
                0x20, b'C', b'M', b'D', 0x00, 0x10, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00
            ]
        );
        assert_eq!(cmd.frame_len(), 12);
    }

    #[test]
    fn test_encode_with_payload() {
        let data = [0xAA, 0xBB];
        let cmd = Command::new(Opcode::Raw(0x42)).payload(&data);
        assert_eq!(cmd.encode(), vec![0x42, b'C', b'M', b'D', 0xAA, 0xBB]);
    }

    #[test]
    fn test_encode_args_then_payload() {
        let data = [0x11; 3];
        let cmd = Command::new(Opcode::LoadFromPc)
            .arg(u32::MAX)
            .arg(0x0102_0304)
            .payload(&data);
        let frame = cmd.encode();
        assert_eq!(frame.len(), cmd.frame_len());
        assert_eq!(&frame[4..8], &[0xFF; 4]);
        assert_eq!(&frame[8..12], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&frame[12..], &data);
    }

    #[test]
    fn test_completion_tag() {
        let cmd = Command::new(Opcode::VersionRequest);
        assert_eq!(cmd.completion(), [b'C', b'M', b'P', 0x80]);
        assert_eq!(cmd.encode(), b"\x80CMD".to_vec());
    }
}
