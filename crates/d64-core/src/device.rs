//! Device session - exclusive owner of one 64drive.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::channel::{CommandChannel, ReadPolicy};
use crate::cic::Cic;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, NullObserver, Observer};
use crate::protocol::constants::{FIFO_HEADER, FIFO_TRAILER};
use crate::protocol::{Command, FirmwareVersion, Opcode, UpgradeStatus, Variant};
use crate::savetype::SaveType;
use crate::transport::ftdi::{self, DeviceDesc, Enumeration, FtdiTransport};
use crate::transport::UsbTransport;

/// Hardware and firmware identification returned by `VersionRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub variant: Variant,
    pub firmware: FirmwareVersion,
    /// Per-product magic, matched against firmware archives.
    pub magic: [u8; 4],
}

impl VersionInfo {
    fn parse(raw: &[u8; 8]) -> Result<Self> {
        let mut cursor = Cursor::new(&raw[..]);
        let variant = Variant(cursor.read_u16::<BigEndian>()?);
        let firmware = FirmwareVersion(cursor.read_u16::<BigEndian>()?);
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[4..8]);
        Ok(Self {
            variant,
            firmware,
            magic,
        })
    }
}

/// One packet from the debug FIFO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPacket {
    pub typ: u8,
    pub data: Vec<u8>,
}

impl FifoPacket {
    pub const TYPE_TEXT: u8 = 1;

    /// Text payload with alignment padding removed, for text packets.
    pub fn text(&self) -> Option<&[u8]> {
        if self.typ != Self::TYPE_TEXT {
            return None;
        }
        let end = self
            .data
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        Some(&self.data[..end])
    }
}

/// An open device. Commands are strictly sequential.
pub struct DeviceSession<T: UsbTransport> {
    channel: CommandChannel<T>,
    version: Option<VersionInfo>,
    observer: Arc<dyn Observer>,
    serial: String,
}

impl<T: UsbTransport> DeviceSession<T> {
    pub fn new(transport: T, policy: ReadPolicy) -> Self {
        Self {
            channel: CommandChannel::new(transport, policy),
            version: None,
            observer: Arc::new(NullObserver),
            serial: String::new(),
        }
    }

    /// Replace the observer receiving transfer and upgrade events.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &dyn Observer {
        self.observer.as_ref()
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub(crate) fn channel(&mut self) -> &mut CommandChannel<T> {
        &mut self.channel
    }

    /// Send a raw command.
    pub fn send(&mut self, cmd: &Command<'_>, out: &mut [u8]) -> Result<()> {
        self.channel.send(cmd, out)
    }

    /// Hardware variant, firmware version and magic; queried once per session.
    pub fn version(&mut self) -> Result<VersionInfo> {
        if let Some(v) = self.version {
            return Ok(v);
        }
        let mut raw = [0u8; 8];
        self.channel
            .send(&Command::new(Opcode::VersionRequest), &mut raw)?;
        let v = VersionInfo::parse(&raw)?;
        debug!(variant = %v.variant, firmware = %v.firmware, "Version request");
        self.version = Some(v);
        Ok(v)
    }

    /// Select the emulated CIC. Needs HW2.
    #[instrument(skip(self, cic), fields(cic = %cic))]
    pub fn set_cic(&mut self, cic: Cic) -> Result<()> {
        if self.version()?.variant < Variant::REV_B {
            return Err(Error::Unsupported(
                "CIC emulation is not available on 64drive HW1".into(),
            ));
        }
        let arg = 0x8000_0000 | u32::from(cic.code());
        self.channel
            .send(&Command::new(Opcode::SetCicType).arg(arg), &mut [])
    }

    #[instrument(skip(self, save_type), fields(save_type = %save_type))]
    pub fn set_save_type(&mut self, save_type: SaveType) -> Result<()> {
        self.channel.send(
            &Command::new(Opcode::SetSaveType).arg(u32::from(save_type.code())),
            &mut [],
        )
    }

    /// Toggle extended addressing (ROMs over 64 MiB). Needs HW2 and firmware 2.06.
    #[instrument(skip(self))]
    pub fn set_extended(&mut self, enable: bool) -> Result<()> {
        let v = self.version()?;
        if v.variant < Variant::REV_B {
            return Err(Error::Unsupported(
                "extended mode not supported on 64drive HW1".into(),
            ));
        }
        if v.firmware < FirmwareVersion::EXTENDED_MODE {
            return Err(Error::Unsupported(format!(
                "extended mode not supported on 64drive firmware < {}",
                FirmwareVersion::EXTENDED_MODE
            )));
        }
        self.channel.send(
            &Command::new(Opcode::SetExtended).arg(u32::from(enable)),
            &mut [],
        )
    }

    /// Start flashing the firmware previously loaded at CartRom offset 0.
    pub fn upgrade_start(&mut self) -> Result<()> {
        info!("Starting firmware upgrade");
        self.channel
            .send(&Command::new(Opcode::UpgradeStart), &mut [])
    }

    pub fn upgrade_report(&mut self) -> Result<UpgradeStatus> {
        let mut buf = [0u8; 4];
        self.channel
            .send(&Command::new(Opcode::UpgradeReport), &mut buf)?;
        Ok(UpgradeStatus::from_report(u32::from_be_bytes(buf)))
    }

    /// Wait for the next debug FIFO packet.
    ///
    /// An idle device looks frozen; that is not an error here, the wait just
    /// continues until a packet starts or `cancel` fires.
    pub fn fifo_read(&mut self, cancel: &CancelToken) -> Result<FifoPacket> {
        let mut head = [0u8; 4];
        let mut filled = 0;
        while filled < head.len() {
            cancel.check()?;
            match self.channel.read_some(&mut head[filled..]) {
                Ok(n) => filled += n,
                // keep what already arrived
                Err(Error::TransportFrozen) => {}
                Err(e) => return Err(e),
            }
        }
        if head != FIFO_HEADER {
            return Err(Error::InvalidFifoHeader(head));
        }

        let mut size = [0u8; 4];
        self.channel.read_exact(&mut size)?;
        let typ = size[0];
        let len = u32::from_be_bytes([0, size[1], size[2], size[3]]) as usize;

        let mut data = vec![0u8; len];
        self.channel.read_exact(&mut data)?;

        let mut tail = [0u8; 4];
        self.channel.read_exact(&mut tail)?;
        if tail != FIFO_TRAILER {
            return Err(Error::InvalidFifoTrailer(tail));
        }
        Ok(FifoPacket { typ, data })
    }

    /// Release the device. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.channel.close()
    }
}

impl<T: UsbTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.close() {
            warn!(error = %e, "Failed to close device");
        }
    }
}

/// Pick the only attached device.
pub fn select_single(found: &Enumeration) -> Result<&DeviceDesc> {
    match found.devices.as_slice() {
        [] if found.unknown => Err(Error::UnknownDevice),
        [] => Err(Error::NoDevices),
        [one] => Ok(one),
        _ => Err(Error::MultipleDevices),
    }
}

/// Pick the device with the given serial.
pub fn select_by_serial<'a>(found: &'a Enumeration, serial: &str) -> Result<&'a DeviceDesc> {
    if let Some(desc) = found.devices.iter().find(|d| d.serial == serial) {
        return Ok(desc);
    }
    if found.unknown {
        Err(Error::UnknownDevice)
    } else if found.devices.is_empty() {
        Err(Error::NoDevices)
    } else {
        Err(Error::SerialNotFound(serial.to_string()))
    }
}

impl DeviceSession<FtdiTransport> {
    /// Open a specific device.
    #[instrument(level = "info", skip(desc, config), fields(serial = %desc.serial))]
    pub fn open(desc: &DeviceDesc, config: &Config) -> Result<Self> {
        let transport = desc.open()?;
        let mut session = Self::new(transport, config.read_policy());
        session.serial = desc.serial.clone();
        Ok(session)
    }

    /// Open the device named in the config, or the only one attached.
    pub fn open_configured(config: &Config, observer: Arc<dyn Observer>) -> Result<Self> {
        let found = ftdi::enumerate()?;
        let desc = match &config.serial {
            Some(serial) => select_by_serial(&found, serial)?,
            None => select_single(&found)?,
        };
        let session = Self::open(desc, config)?.with_observer(observer);
        session.observer.on_event(&Event::DeviceOpened {
            serial: desc.serial.clone(),
            pid: desc.product_id,
        });
        Ok(session)
    }

    /// Open the only attached device.
    pub fn open_single(config: &Config) -> Result<Self> {
        let found = ftdi::enumerate()?;
        Self::open(select_single(&found)?, config)
    }

    /// Open the device with the given serial.
    pub fn open_by_serial(serial: &str, config: &Config) -> Result<Self> {
        let found = ftdi::enumerate()?;
        Self::open(select_by_serial(&found, serial)?, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::REV_A_PRODUCT_ID;
    use crate::transport::MockTransport;
    use crate::transport::mock::MockCommand;

    fn session(mock: &MockTransport) -> DeviceSession<MockTransport> {
        DeviceSession::new(mock.clone(), ReadPolicy::default())
    }

    fn desc(serial: &str) -> DeviceDesc {
        DeviceDesc {
            manufacturer: "Retroactive".into(),
            description: "64drive USB device".into(),
            serial: serial.into(),
            vendor_id: 0x0403,
            product_id: 0x6014,
        }
    }

    #[test]
    fn test_version_is_cached() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        let v = s.version().unwrap();
        assert_eq!(v.variant, Variant::REV_B);
        assert_eq!(v.firmware, FirmwareVersion(206));
        assert_eq!(&v.magic, b"UDEV");
        s.version().unwrap();
        assert_eq!(mock.commands().len(), 1);
    }

    #[test]
    fn test_set_cic_argument() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        s.set_cic(Cic::CicX105).unwrap();
        let last = mock.commands().pop().unwrap();
        assert_eq!(
            last,
            MockCommand {
                opcode: Opcode::SetCicType,
                args: vec![0x8000_0005],
                payload_len: 0
            }
        );
    }

    #[test]
    fn test_set_cic_unsupported_on_rev_a() {
        let mock = MockTransport::with_version(0x4100, 206, *b"UDEV");
        let mut s = session(&mock);
        assert!(matches!(
            s.set_cic(Cic::Cic6102),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(mock.commands().len(), 1);
    }

    #[test]
    fn test_set_save_type_and_extended() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        s.set_save_type(SaveType::Sram768Kbit).unwrap();
        s.set_extended(true).unwrap();
        let cmds = mock.commands();
        assert_eq!(cmds[0].opcode, Opcode::SetSaveType);
        assert_eq!(cmds[0].args, vec![5]);
        assert_eq!(cmds.last().unwrap().opcode, Opcode::SetExtended);
        assert_eq!(cmds.last().unwrap().args, vec![1]);
    }

    #[test]
    fn test_set_extended_needs_firmware_206() {
        let mock = MockTransport::with_version(0x4200, 205, *b"UDEV");
        let mut s = session(&mock);
        let err = s.set_extended(true).unwrap_err();
        assert!(err.to_string().contains("2.06"));
    }

    #[test]
    fn test_upgrade_report() {
        let mock = MockTransport::new();
        mock.queue_statuses(&[0x0000_0107, 0x0C]);
        let mut s = session(&mock);
        assert_eq!(s.upgrade_report().unwrap(), UpgradeStatus::Writing00);
        assert_eq!(s.upgrade_report().unwrap(), UpgradeStatus::Success);
        assert_eq!(s.upgrade_report().unwrap(), UpgradeStatus::Success);
    }

    #[test]
    fn test_fifo_read_text_packet() {
        let mock = MockTransport::new();
        mock.inject_busy_reads(9);
        mock.queue_fifo_packet(1, b"hello\0\0\0");
        let mut s = session(&mock);
        let pkt = s.fifo_read(&CancelToken::new()).unwrap();
        assert_eq!(pkt.typ, 1);
        assert_eq!(pkt.text(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_fifo_read_header_split_by_idle_reads() {
        let mock = MockTransport::new();
        mock.queue_fifo_packet(2, b"split");
        mock.pause_rx(2, 3);
        let mut s = DeviceSession::new(
            mock.clone(),
            ReadPolicy {
                attempts: 1,
                backoff: std::time::Duration::ZERO,
            },
        );
        let pkt = s.fifo_read(&CancelToken::new()).unwrap();
        assert_eq!(pkt.typ, 2);
        assert_eq!(pkt.data, b"split");
    }

    #[test]
    fn test_fifo_read_bad_header() {
        let mock = MockTransport::new();
        mock.queue_rx(b"JUNK");
        let mut s = session(&mock);
        assert!(matches!(
            s.fifo_read(&CancelToken::new()),
            Err(Error::InvalidFifoHeader(h)) if &h == b"JUNK"
        ));
    }

    #[test]
    fn test_fifo_read_cancelled() {
        let mock = MockTransport::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut s = session(&mock);
        assert!(matches!(s.fifo_read(&cancel), Err(Error::Cancelled)));
    }

    #[test]
    fn test_drop_closes_once() {
        let mock = MockTransport::new();
        {
            let mut s = session(&mock);
            s.close().unwrap();
        }
        assert_eq!(mock.close_count(), 1);
        {
            let _s = session(&MockTransport::new());
        }
        let other = MockTransport::new();
        drop(session(&other));
        assert_eq!(other.close_count(), 1);
    }

    #[test]
    fn test_select_single() {
        let mut found = Enumeration::default();
        assert!(matches!(select_single(&found), Err(Error::NoDevices)));
        found.unknown = true;
        assert!(matches!(select_single(&found), Err(Error::UnknownDevice)));
        found.devices.push(desc("A"));
        assert_eq!(select_single(&found).unwrap().serial, "A");
        found.devices.push(desc("B"));
        assert!(matches!(select_single(&found), Err(Error::MultipleDevices)));
    }

    #[test]
    fn test_select_by_serial() {
        let found = Enumeration {
            devices: vec![desc("A"), desc("B")],
            unknown: false,
        };
        assert_eq!(select_by_serial(&found, "B").unwrap().serial, "B");
        assert!(matches!(
            select_by_serial(&found, "C"),
            Err(Error::SerialNotFound(_))
        ));
    }

    #[test]
    fn test_guess_variant() {
        let mut d = desc("A");
        assert_eq!(d.guess_variant(), Variant::REV_B);
        d.product_id = REV_A_PRODUCT_ID;
        assert_eq!(d.guess_variant(), Variant::REV_A);
    }
}
