//! Firmware upgrade orchestration.
//!
//! The asset is staged in cartridge ROM, read back and checked, then the
//! device is told to flash it. Once started the device cannot be stopped, so
//! the caller gets one chance to back out right before that point.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::device::{DeviceSession, VersionInfo};
use crate::error::{Error, Result};
use crate::events::{Event, UpgradePhase};
use crate::protocol::{Bank, FirmwareVersion, UpgradeStatus, Variant};
use crate::rpk::{AssetKind, Rpk};
use crate::transfer::TransferRequest;
use crate::transport::UsbTransport;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePrompt {
    pub serial: String,
    pub current: FirmwareVersion,
    pub new_version: String,
    pub date: String,
    pub note: String,
}

/// Yes/no gate before the irreversible step.
pub trait Confirm {
    fn confirm(&mut self, prompt: &UpgradePrompt) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&UpgradePrompt) -> bool,
{
    fn confirm(&mut self, prompt: &UpgradePrompt) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Upgraded,
    /// The user said no; the device was left untouched.
    Declined,
}

/// Forward-only position on the progress scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeProgress {
    step: u8,
}

impl UpgradeProgress {
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Record a status report. Returns the new step if it moved forward.
    pub fn advance(&mut self, status: UpgradeStatus) -> Option<u8> {
        match status.progress_step() {
            Some(step) if step > self.step => {
                self.step = step;
                Some(step)
            }
            _ => None,
        }
    }
}

/// Check that an archive holds firmware for this exact device.
pub fn preflight(rpk: &Rpk, version: &VersionInfo) -> Result<()> {
    let md = &rpk.metadata;
    match md.kind() {
        AssetKind::Firmware => {}
        AssetKind::Bootloader => {
            return Err(Error::Unsupported(
                "bootloader upgrade not implemented".into(),
            ));
        }
        AssetKind::Other(code) => {
            return Err(Error::Unsupported(format!(
                "unknown asset type: {} ({:08x})",
                md.type_text, code
            )));
        }
    }

    if md.magic_prefix() != Some(version.magic) {
        return Err(Error::WrongDevice(
            "firmware archive not meant for this device (different product)".into(),
        ));
    }
    if Variant(md.variant_code()) != version.variant {
        return Err(Error::WrongDevice(
            "firmware archive not meant for this device (different hardware variant)".into(),
        ));
    }
    Ok(())
}

/// `io::Write` sink that only keeps a running CRC32.
struct CrcWriter(crc32fast::Hasher);

impl io::Write for CrcWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: UsbTransport> DeviceSession<T> {
    fn set_phase(&self, phase: &mut UpgradePhase, to: UpgradePhase) {
        debug!(from = %phase, to = %to, "Upgrade phase");
        self.observer().on_event(&Event::PhaseChanged { from: *phase, to });
        *phase = to;
    }

    /// Flash the firmware in `rpk`.
    ///
    /// Cancellation is honored until the confirmation prompt; after the
    /// device starts flashing, polling runs to a terminal status.
    #[instrument(skip_all, fields(version = %rpk.metadata.content_version_text))]
    pub fn upgrade_firmware(
        &mut self,
        rpk: &Rpk,
        confirm: &mut dyn Confirm,
        poll: Duration,
        cancel: &CancelToken,
    ) -> Result<UpgradeOutcome> {
        let version = self.version()?;
        preflight(rpk, &version)?;

        let mut phase = UpgradePhase::Idle;
        let size = rpk.asset.len() as u64;
        let req = TransferRequest::new(Bank::CartRom, 0, size);

        self.set_phase(&mut phase, UpgradePhase::Uploading);
        self.upload(&req, rpk.asset.as_slice(), cancel)?;

        self.set_phase(&mut phase, UpgradePhase::Verifying);
        let mut crc = CrcWriter(crc32fast::Hasher::new());
        self.download(&req, &mut crc, cancel)?;
        let actual = crc.0.finalize();
        let expected = rpk.asset_crc();
        if actual != expected {
            return Err(Error::VerifyMismatch { expected, actual });
        }

        self.set_phase(&mut phase, UpgradePhase::AwaitingReady);
        let status = self.upgrade_report()?;
        if status != UpgradeStatus::Ready {
            return Err(Error::NotReady(status));
        }

        self.set_phase(&mut phase, UpgradePhase::ConfirmPrompt);
        cancel.check()?;
        let prompt = UpgradePrompt {
            serial: self.serial().to_string(),
            current: version.firmware,
            new_version: rpk.metadata.content_version_text.clone(),
            date: rpk.metadata.date.clone(),
            note: rpk.metadata.content_note.clone(),
        };
        if !confirm.confirm(&prompt) {
            info!("Upgrade declined");
            self.set_phase(&mut phase, UpgradePhase::Idle);
            return Ok(UpgradeOutcome::Declined);
        }

        self.set_phase(&mut phase, UpgradePhase::InProgress);
        self.upgrade_start()?;
        let status = self.poll_upgrade(poll, cancel)?;
        self.set_phase(&mut phase, UpgradePhase::Terminal);

        match status {
            UpgradeStatus::Success => {
                info!("Firmware upgraded correctly");
                Ok(UpgradeOutcome::Upgraded)
            }
            other => Err(Error::UpgradeFailed(other)),
        }
    }

    /// Poll until the device reports a terminal status.
    ///
    /// Cancellation only stops the host from waiting; the device keeps
    /// flashing and must not be power-cycled until it finishes.
    fn poll_upgrade(&mut self, interval: Duration, cancel: &CancelToken) -> Result<UpgradeStatus> {
        let mut progress = UpgradeProgress::default();
        let mut current = UpgradeStatus::Ready;
        loop {
            match self.upgrade_report() {
                Ok(status) if status != current => {
                    if let Some(step) = progress.advance(status) {
                        self.observer().on_event(&Event::UpgradeStep {
                            status,
                            step,
                            total: UpgradeStatus::PROGRESS_STEPS,
                        });
                    }
                    current = status;
                }
                Ok(_) => {}
                // flashing keeps the device busy; try again next cycle
                Err(Error::TransportFrozen) => warn!("No upgrade report this cycle"),
                Err(e) => return Err(e),
            }
            if current.is_terminal() {
                return Ok(current);
            }
            cancel.check()?;
            thread::sleep(interval);
        }
    }
}
