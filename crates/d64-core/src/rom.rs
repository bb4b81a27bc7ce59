//! ROM upload planning and post-upload autodetection.

use std::io::Read;

use md5::{Digest, Md5};
use tracing::{debug, info, instrument, warn};

use crate::byteswap::ByteSwapMode;
use crate::cancel::CancelToken;
use crate::cic::Cic;
use crate::device::DeviceSession;
use crate::error::{Error, Result};
use crate::protocol::constants::{
    EXTENDED_ROM_THRESHOLD, ROM_HEADER_CIC_LEN, ROM_HEADER_SAVE_LEN, TRANSFER_ALIGN,
};
use crate::protocol::{Bank, FirmwareVersion, Variant};
use crate::savetype::{self, RomDatabase, RomDbGame, SaveType};
use crate::transfer::{TransferRequest, chunk_size, pipe};
use crate::transport::UsbTransport;

/// User choices for an upload. `None` means "use the default".
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub bank: Option<Bank>,
    pub offset: u32,
    pub size: Option<u64>,
    pub swap: Option<ByteSwapMode>,
    pub auto_cic: Option<bool>,
    pub auto_save: Option<bool>,
    pub extended: Option<bool>,
}

/// Fully resolved upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    pub request: TransferRequest,
    pub auto_cic: bool,
    pub auto_save: bool,
    /// Extended mode was asked for explicitly.
    pub extended: Option<bool>,
}

impl UploadPlan {
    /// A full ROM image loaded where the console boots from.
    pub fn is_boot_rom(&self) -> bool {
        self.request.bank == Bank::CartRom && self.request.offset == 0
    }

    /// Whether extended mode is switched on before the upload.
    pub fn wants_extended(&self) -> bool {
        self.extended
            .unwrap_or(self.is_boot_rom() && self.request.size > EXTENDED_ROM_THRESHOLD)
    }
}

/// Validate an explicit size or fall back to the file length.
pub fn resolve_size(explicit: Option<u64>, file_len: u64) -> Result<u64> {
    match explicit {
        Some(0) | None => Ok(file_len),
        Some(size) if size % TRANSFER_ALIGN as u64 != 0 => Err(Error::InvalidSize(size)),
        Some(size) => Ok(size),
    }
}

/// Use the explicit mode, or detect it from the first bytes of the image.
pub fn resolve_swap(explicit: Option<ByteSwapMode>, header: &[u8]) -> Result<ByteSwapMode> {
    match explicit {
        Some(mode) => Ok(mode),
        None => Ok(ByteSwapMode::detect(header)?),
    }
}

impl UploadOptions {
    /// Resolve defaults against the image being uploaded.
    ///
    /// `header` is the start of the image, used for byte-swap detection.
    pub fn plan(&self, file_len: u64, header: &[u8]) -> Result<UploadPlan> {
        let bank = self.bank.unwrap_or(Bank::CartRom);
        let size = resolve_size(self.size, file_len)?;
        let swap = resolve_swap(self.swap, header)?;
        let boot = bank == Bank::CartRom && self.offset == 0;
        Ok(UploadPlan {
            request: TransferRequest::new(bank, self.offset, size).with_swap(swap),
            auto_cic: self.auto_cic.unwrap_or(boot),
            auto_save: self.auto_save.unwrap_or(boot),
            extended: self.extended,
        })
    }
}

/// What an upload ended up configuring.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RomUploadReport {
    pub bytes: u64,
    pub extended: bool,
    pub cic: Option<Cic>,
    pub save_type: Option<SaveType>,
    /// Database name of the uploaded ROM.
    pub game: Option<String>,
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Reject ROMs the hardware cannot address.
    fn check_large_rom(&mut self) -> Result<()> {
        let v = self.version()?;
        if v.variant == Variant::REV_A {
            return Err(Error::Unsupported(
                "ROMs larger than 64 MiB not supported on 64drive HW1".into(),
            ));
        }
        if v.firmware < FirmwareVersion::EXTENDED_MODE {
            return Err(Error::Unsupported(format!(
                "ROMs larger than 64 MiB not supported on 64drive firmware < {}",
                FirmwareVersion::EXTENDED_MODE
            )));
        }
        Ok(())
    }

    /// Identify the CIC of the ROM currently loaded at CartRom offset 0.
    pub fn autodetect_cic(&mut self) -> Result<Cic> {
        let mut header = Vec::with_capacity(ROM_HEADER_CIC_LEN);
        let req = TransferRequest::new(Bank::CartRom, 0, ROM_HEADER_CIC_LEN as u64);
        self.download(&req, &mut header, &CancelToken::new())?;
        Cic::from_header(&header)
    }

    /// Pick the save type for the loaded ROM.
    ///
    /// A database match wins; otherwise the ED64 header of the loaded ROM
    /// is consulted. Failing to read the header back is not fatal.
    pub fn autodetect_save_type(&mut self, game: Option<&RomDbGame>) -> SaveType {
        if let Some(game) = game {
            info!(game = %game.name, "Detected game");
            let variant = self.version().ok().map(|v| v.variant);
            return game.save_type_for(variant);
        }

        let mut header = Vec::with_capacity(ROM_HEADER_SAVE_LEN);
        let req = TransferRequest::new(Bank::CartRom, 0, ROM_HEADER_SAVE_LEN as u64);
        match self.download(&req, &mut header, &CancelToken::new()) {
            Ok(_) => savetype::from_ed64_header(&header).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Error reading back ROM header");
                SaveType::None
            }
        }
    }

    /// Upload a ROM image and apply the autodetected settings.
    ///
    /// The source is read on a separate thread through a bounded pipe of
    /// `pipe_depth` chunks. With save-type autodetection on, the MD5 of the
    /// byte-swapped image is looked up in `db` before falling back to the
    /// ED64 header.
    #[instrument(skip_all, fields(bank = %plan.request.bank, size = plan.request.size))]
    pub fn upload_rom<R>(
        &mut self,
        plan: &UploadPlan,
        src: R,
        db: Option<&dyn RomDatabase>,
        pipe_depth: usize,
        cancel: &CancelToken,
    ) -> Result<RomUploadReport>
    where
        R: Read + Send + 'static,
    {
        let mut report = RomUploadReport::default();

        if plan.extended.is_none() && plan.wants_extended() {
            self.check_large_rom()?;
        }
        if plan.wants_extended() {
            debug!("Set extended mode");
            self.set_extended(true)?;
            report.extended = true;
        }

        let reader = pipe::spawn(src, chunk_size(plan.request.size), pipe_depth);
        let mut hasher = (plan.auto_save && db.is_some()).then(Md5::new);
        report.bytes = self.upload_inspect(&plan.request, reader, cancel, |chunk| {
            if let Some(h) = hasher.as_mut() {
                h.update(chunk);
            }
        })?;

        if plan.auto_cic {
            let cic = self.autodetect_cic()?;
            info!(cic = %cic, "Autoset CIC type");
            match self.set_cic(cic) {
                Ok(()) => {}
                Err(Error::Unsupported(_)) => {
                    info!("Setting CIC not supported on 64drive HW1, skipping")
                }
                Err(e) => return Err(e),
            }
            report.cic = Some(cic);
        }

        if plan.auto_save {
            let game = match (db, hasher) {
                (Some(db), Some(h)) => {
                    let md5 = format!("{:x}", h.finalize());
                    debug!(md5 = %md5, "ROM hash");
                    db.lookup(&md5)
                }
                _ => None,
            };
            let save_type = self.autodetect_save_type(game.as_ref());
            report.game = game.map(|g| g.name);
            info!(save_type = %save_type, "Autoset save type");
            self.set_save_type(save_type)?;
            report.save_type = Some(save_type);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::channel::ReadPolicy;
    use crate::protocol::Opcode;
    use crate::transport::MockTransport;

    fn session(mock: &MockTransport) -> DeviceSession<MockTransport> {
        DeviceSession::new(mock.clone(), ReadPolicy::default())
    }

    fn z64_header() -> Vec<u8> {
        let mut rom = vec![0u8; 1024];
        rom[..4].copy_from_slice(&[0x80, 0x37, 0x12, 0x40]);
        rom
    }

    #[test]
    fn test_resolve_size() {
        assert_eq!(resolve_size(None, 1234).unwrap(), 1234);
        assert_eq!(resolve_size(Some(0), 1234).unwrap(), 1234);
        assert_eq!(resolve_size(Some(4096), 1234).unwrap(), 4096);
        assert!(matches!(
            resolve_size(Some(1000), 1234),
            Err(Error::InvalidSize(1000))
        ));
    }

    #[test]
    fn test_resolve_swap() {
        assert_eq!(
            resolve_swap(None, &[0x37, 0x80, 0x40, 0x12]).unwrap(),
            ByteSwapMode::Swap2
        );
        assert_eq!(
            resolve_swap(Some(ByteSwapMode::Swap4), b"junk").unwrap(),
            ByteSwapMode::Swap4
        );
        assert!(matches!(
            resolve_swap(None, b"junk"),
            Err(Error::ByteSwap(_))
        ));
    }

    #[test]
    fn test_plan_defaults_for_boot_rom() {
        let plan = UploadOptions::default().plan(1024, &z64_header()).unwrap();
        assert!(plan.is_boot_rom());
        assert!(plan.auto_cic && plan.auto_save);
        assert!(!plan.wants_extended());

        let opts = UploadOptions {
            offset: 0x1000,
            ..Default::default()
        };
        let plan = opts.plan(1024, &z64_header()).unwrap();
        assert!(!plan.auto_cic && !plan.auto_save);

        let big = UploadOptions::default()
            .plan(EXTENDED_ROM_THRESHOLD + 512, &z64_header())
            .unwrap();
        assert!(big.wants_extended());
    }

    #[test]
    fn test_large_rom_rejected_on_hw1() {
        let mock = MockTransport::with_version(0x4100, 206, *b"UDEV");
        let mut s = session(&mock);
        let plan = UploadOptions {
            auto_cic: Some(false),
            auto_save: Some(false),
            ..Default::default()
        }
        .plan(EXTENDED_ROM_THRESHOLD + 512, &z64_header())
        .unwrap();

        let err = s
            .upload_rom(&plan, io_empty(), None, 2, &CancelToken::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported: ROMs larger than 64 MiB not supported on 64drive HW1"
        );
        assert!(
            mock.commands()
                .iter()
                .all(|c| c.opcode == Opcode::VersionRequest)
        );
    }

    #[test]
    fn test_large_rom_rejected_on_old_firmware() {
        let mock = MockTransport::with_version(0x4200, 205, *b"UDEV");
        let mut s = session(&mock);
        let plan = UploadOptions::default()
            .plan(EXTENDED_ROM_THRESHOLD + 512, &z64_header())
            .unwrap();

        let err = s
            .upload_rom(&plan, io_empty(), None, 2, &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("firmware < 2.06"));
    }

    fn io_empty() -> Cursor<Vec<u8>> {
        Cursor::new(Vec::new())
    }

    #[test]
    fn test_upload_rom_applies_ed64_save_type() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        let mut rom = z64_header();
        rom[0x3C..0x3E].copy_from_slice(b"ED");
        rom[0x3F] = 0x30;

        let plan = UploadOptions {
            auto_cic: Some(false),
            ..Default::default()
        }
        .plan(rom.len() as u64, &rom)
        .unwrap();
        let report = s
            .upload_rom(&plan, Cursor::new(rom), None, 2, &CancelToken::new())
            .unwrap();

        assert_eq!(report.bytes, 1024);
        assert_eq!(report.save_type, Some(SaveType::Sram256Kbit));
        let last = mock.commands().pop().unwrap();
        assert_eq!(last.opcode, Opcode::SetSaveType);
        assert_eq!(last.args, vec![3]);
    }

    struct OneGameDb {
        md5: String,
        game: RomDbGame,
    }

    impl RomDatabase for OneGameDb {
        fn lookup(&self, md5_hex: &str) -> Option<RomDbGame> {
            (md5_hex == self.md5).then(|| self.game.clone())
        }
    }

    #[test]
    fn test_upload_rom_looks_up_database_by_md5() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        let rom = z64_header();
        let db = OneGameDb {
            md5: format!("{:x}", Md5::digest(&rom)),
            game: RomDbGame {
                name: "Super Mario 64 (U)".into(),
                save_type: "Eeprom 4KB".into(),
            },
        };
        // a .v64 dump hashes the same once swapped
        let mut v64 = rom.clone();
        crate::byteswap::swap(&mut v64, ByteSwapMode::Swap2).unwrap();

        let plan = UploadOptions {
            auto_cic: Some(false),
            ..Default::default()
        }
        .plan(v64.len() as u64, &v64)
        .unwrap();
        assert_eq!(plan.request.swap, ByteSwapMode::Swap2);
        let report = s
            .upload_rom(&plan, Cursor::new(v64), Some(&db), 2, &CancelToken::new())
            .unwrap();

        assert_eq!(report.game.as_deref(), Some("Super Mario 64 (U)"));
        assert_eq!(report.save_type, Some(SaveType::Eeprom4Kbit));
        let cmds = mock.commands();
        assert!(cmds.iter().all(|c| c.opcode != Opcode::DumpToPc));
        let last = cmds.last().unwrap();
        assert_eq!(last.opcode, Opcode::SetSaveType);
        assert_eq!(last.args, vec![1]);
    }

    #[test]
    fn test_upload_rom_database_miss_uses_ed64_header() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        let mut rom = z64_header();
        rom[0x3C..0x3E].copy_from_slice(b"ED");
        rom[0x3F] = 0x20;
        let db = OneGameDb {
            md5: "0".repeat(32),
            game: RomDbGame::default(),
        };

        let plan = UploadOptions {
            auto_cic: Some(false),
            ..Default::default()
        }
        .plan(rom.len() as u64, &rom)
        .unwrap();
        let report = s
            .upload_rom(&plan, Cursor::new(rom), Some(&db), 2, &CancelToken::new())
            .unwrap();
        assert_eq!(report.game, None);
        assert_eq!(report.save_type, Some(SaveType::Eeprom16Kbit));
    }

    #[test]
    fn test_save_type_from_database_wins() {
        let mock = MockTransport::with_version(0x4100, 206, *b"UDEV");
        let mut s = session(&mock);
        let game = RomDbGame {
            name: "Pokemon Stadium 2 (U)".into(),
            save_type: "Flash RAM".into(),
        };
        assert_eq!(
            s.autodetect_save_type(Some(&game)),
            SaveType::FlashRam1MbitPokStad2
        );
        assert!(
            mock.commands()
                .iter()
                .all(|c| c.opcode != Opcode::DumpToPc)
        );
    }

    #[test]
    fn test_save_type_header_readback_failure_is_none() {
        let mock = MockTransport::new();
        mock.set_stalled(true);
        let mut s = DeviceSession::new(
            mock.clone(),
            ReadPolicy {
                attempts: 1,
                backoff: std::time::Duration::ZERO,
            },
        );
        assert_eq!(s.autodetect_save_type(None), SaveType::None);
    }

    #[test]
    fn test_autodetect_cic_reads_header() {
        let mock = MockTransport::new();
        let mut s = session(&mock);
        assert!(matches!(s.autodetect_cic(), Err(Error::CicUndetected)));

        let cmd = &mock.commands()[0];
        assert_eq!(cmd.opcode, Opcode::DumpToPc);
        assert_eq!(cmd.args, vec![0, (1 << 24) | 0x1000]);
    }
}
