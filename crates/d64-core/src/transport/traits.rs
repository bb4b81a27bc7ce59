//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for the byte stream to the device,
//! allowing different implementations (FTDI over nusb, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Control request 0x{request:02X} failed: {message}")]
    ControlFailed { request: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Transport is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-stream transport to a device.
///
/// Contract:
/// - `write` either sends the whole buffer or fails; a short count is a
///   contract violation the caller treats as fatal.
/// - `read` may return `Ok(0)` when the device is momentarily busy; this is
///   not end-of-stream.
pub trait UsbTransport: Send {
    /// Write raw bytes to the OUT endpoint.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `buf.len()` bytes from the IN endpoint.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Expected size of upcoming writes.
    fn set_write_chunk_size(&mut self, _size: usize) {}

    /// Expected size of upcoming reads.
    fn set_read_chunk_size(&mut self, _size: usize) {}

    /// Release the device. Further I/O fails with `Closed`.
    fn close(&mut self) -> Result<(), TransportError>;
}
