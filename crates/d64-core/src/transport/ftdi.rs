//! FTDI bridge transport over nusb.
//!
//! The 64drive talks through an FTDI FT2232H (HW1) or FT232H (HW2) in FIFO
//! mode. The chip is driven directly with vendor control requests and bulk
//! transfers, no libftdi involved. Every bulk IN packet starts with two modem
//! status bytes which are stripped here.

use std::collections::VecDeque;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{
    FTDI_VENDOR_ID, MANUFACTURER, ONE28_K, PRODUCT_PREFIX, REV_A_PRODUCT_ID, SUPPORTED_PIDS,
    Variant,
};

// FTDI vendor requests
const SIO_RESET: u8 = 0x00;
const SIO_SET_LATENCY_TIMER: u8 = 0x09;
const SIO_SET_BITMODE: u8 = 0x0B;

const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

const BITMODE_RESET: u8 = 0x00;
const BITMODE_SYNCFF: u8 = 0x40;

/// Channel A of the bridge.
const INTERFACE: u8 = 0;
const WRITE_EP: u8 = 0x02;
const READ_EP: u8 = 0x81;

/// Bytes of modem status prepended to each IN packet.
const STATUS_LEN: usize = 2;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// A 64drive found on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDesc {
    /// USB manufacturer string (always "Retroactive")
    pub manufacturer: String,
    /// USB product string, e.g. "64drive USB device"
    pub description: String,
    pub serial: String,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceDesc {
    /// Board revision as far as it can be told from USB descriptors alone.
    pub fn guess_variant(&self) -> Variant {
        if self.product_id == REV_A_PRODUCT_ID {
            Variant::REV_A
        } else {
            Variant::REV_B
        }
    }

    /// Open this device.
    pub fn open(&self) -> Result<FtdiTransport, TransportError> {
        FtdiTransport::open(self)
    }
}

/// Result of a bus scan.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub devices: Vec<DeviceDesc>,
    /// A compatible bridge was seen whose strings could not be read
    /// (usually a missing driver).
    pub unknown: bool,
}

/// List all 64drive devices attached to this system.
#[instrument(level = "debug")]
pub fn enumerate() -> Result<Enumeration, TransportError> {
    let mut result = Enumeration::default();

    let devices = list_devices()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    for info in devices {
        if info.vendor_id() != FTDI_VENDOR_ID || !SUPPORTED_PIDS.contains(&info.product_id()) {
            continue;
        }
        let manufacturer = info.manufacturer_string().unwrap_or_default();
        let description = info.product_string().unwrap_or_default();
        let serial = info.serial_number().unwrap_or_default();

        if manufacturer.is_empty() && description.is_empty() && serial.is_empty() {
            debug!(pid = %format!("{:04X}", info.product_id()), "Compatible device without strings");
            result.unknown = true;
        }
        if manufacturer == MANUFACTURER && description.starts_with(PRODUCT_PREFIX) {
            result.devices.push(DeviceDesc {
                manufacturer: manufacturer.to_string(),
                description: description.to_string(),
                serial: serial.to_string(),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
            });
        }
    }

    debug!(found = result.devices.len(), unknown = result.unknown, "Enumeration done");
    Ok(result)
}

struct Handle {
    interface: Interface,
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
}

/// Transport to one opened 64drive.
pub struct FtdiTransport {
    handle: Option<Handle>,
    desc: DeviceDesc,
    /// Payload bytes received but not yet consumed.
    pending: VecDeque<u8>,
    write_chunk: usize,
    read_chunk: usize,
}

impl FtdiTransport {
    #[instrument(level = "info", skip(desc), fields(serial = %desc.serial, pid = %format!("{:04X}", desc.product_id)))]
    fn open(desc: &DeviceDesc) -> Result<Self, TransportError> {
        let info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| {
                d.vendor_id() == desc.vendor_id
                    && d.product_id() == desc.product_id
                    && d.serial_number().unwrap_or_default() == desc.serial
            })
            .ok_or(TransportError::DeviceNotFound {
                vid: desc.vendor_id,
                pid: desc.product_id,
            })?;

        let device = info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface = device.claim_interface(INTERFACE).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: INTERFACE,
                message: e.to_string(),
            }
        })?;

        let out_ep = interface.endpoint::<Bulk, Out>(WRITE_EP).map_err(|_| {
            TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            }
        })?;
        let in_ep = interface.endpoint::<Bulk, In>(READ_EP).map_err(|_| {
            TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            }
        })?;

        let mut transport = Self {
            handle: Some(Handle {
                interface,
                out_ep,
                in_ep,
            }),
            desc: desc.clone(),
            pending: VecDeque::new(),
            write_chunk: ONE28_K,
            read_chunk: ONE28_K,
        };

        if desc.guess_variant() != Variant::REV_A {
            // HW2 runs the FIFO in synchronous mode
            transport.set_bitmode(0xFF, BITMODE_RESET)?;
            transport.set_bitmode(0xFF, BITMODE_SYNCFF)?;
        }
        transport.control(SIO_SET_LATENCY_TIMER, 2)?;
        transport.purge_buffers()?;

        info!(
            variant = %desc.guess_variant(),
            "Device opened successfully"
        );
        Ok(transport)
    }

    pub fn desc(&self) -> &DeviceDesc {
        &self.desc
    }

    fn handle(&mut self) -> Result<&mut Handle, TransportError> {
        self.handle.as_mut().ok_or(TransportError::Closed)
    }

    fn control(&mut self, request: u8, value: u16) -> Result<(), TransportError> {
        let handle = self.handle()?;
        handle
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: u16::from(INTERFACE) + 1,
                    data: &[],
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| TransportError::ControlFailed {
                request,
                message: e.to_string(),
            })
    }

    fn set_bitmode(&mut self, mask: u8, mode: u8) -> Result<(), TransportError> {
        trace!(mask, mode, "Set bitmode");
        self.control(SIO_SET_BITMODE, (u16::from(mode) << 8) | u16::from(mask))
    }

    fn purge_buffers(&mut self) -> Result<(), TransportError> {
        self.control(SIO_RESET, SIO_RESET_PURGE_RX)?;
        self.control(SIO_RESET, SIO_RESET_PURGE_TX)?;
        self.pending.clear();
        Ok(())
    }

    /// Wait for one IN transfer and move its payload into `pending`.
    ///
    /// Returns without data if nothing arrived within the read timeout; the
    /// transfer stays queued and is picked up by the next call.
    fn fill_pending(&mut self) -> Result<(), TransportError> {
        let read_chunk = self.read_chunk;
        let handle = self.handle()?;
        let mps = handle.in_ep.max_packet_size();
        if mps <= STATUS_LEN {
            return Err(TransportError::ReadFailed(format!(
                "max packet size {} too small",
                mps
            )));
        }

        if handle.in_ep.pending() == 0 {
            let packets = read_chunk.div_ceil(mps - STATUS_LEN).max(1);
            handle.in_ep.submit(Buffer::new(packets * mps));
        }

        let Some(completion) = handle.in_ep.wait_next_complete(READ_TIMEOUT) else {
            return Ok(());
        };
        completion
            .status
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let received = &completion.buffer[..completion.actual_len];
        let mut payload = Vec::with_capacity(received.len());
        for packet in received.chunks(mps) {
            if packet.len() > STATUS_LEN {
                payload.extend_from_slice(&packet[STATUS_LEN..]);
            }
        }
        self.pending.extend(payload);
        Ok(())
    }
}

impl UsbTransport for FtdiTransport {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let chunk = self.write_chunk.max(1);
        let handle = self.handle()?;

        let mut written = 0;
        for piece in data.chunks(chunk) {
            handle.out_ep.submit(Buffer::from(piece.to_vec()));
            let completion = handle
                .out_ep
                .wait_next_complete(WRITE_TIMEOUT)
                .ok_or_else(|| TransportError::WriteFailed("USB write timed out".into()))?;
            completion
                .status
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            written += piece.len();
        }

        trace!(bytes_written = written, "Write complete");
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            self.fill_pending()?;
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn set_write_chunk_size(&mut self, size: usize) {
        self.write_chunk = size;
    }

    fn set_read_chunk_size(&mut self, size: usize) {
        self.read_chunk = size;
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut handle) = self.handle.take() {
            handle.in_ep.cancel_all();
            while handle.in_ep.pending() > 0 {
                if handle.in_ep.wait_next_complete(READ_TIMEOUT).is_none() {
                    warn!("IN transfer did not drain on close");
                    break;
                }
            }
            debug!(serial = %self.desc.serial, "Device closed");
        }
        Ok(())
    }
}

impl Drop for FtdiTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close device");
        }
    }
}
