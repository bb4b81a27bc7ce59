//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow transfers and upgrades
//! without the core knowing how progress is rendered.

use std::fmt;

use crate::protocol::{Bank, UpgradeStatus};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Upload,
    /// Device to host
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Firmware upgrade phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    Idle,
    /// Sending the firmware asset to the cartridge ROM bank.
    Uploading,
    /// Reading the asset back and comparing CRC32.
    Verifying,
    /// Waiting for the upgrade module to report ready.
    AwaitingReady,
    /// Waiting for the user to confirm.
    ConfirmPrompt,
    /// Device is flashing.
    InProgress,
    /// Terminal status reached.
    Terminal,
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradePhase::Idle => write!(f, "Idle"),
            UpgradePhase::Uploading => write!(f, "Uploading"),
            UpgradePhase::Verifying => write!(f, "Verifying"),
            UpgradePhase::AwaitingReady => write!(f, "Awaiting Ready"),
            UpgradePhase::ConfirmPrompt => write!(f, "Confirm"),
            UpgradePhase::InProgress => write!(f, "In Progress"),
            UpgradePhase::Terminal => write!(f, "Terminal"),
        }
    }
}

/// Events emitted by a device session.
#[derive(Debug, Clone)]
pub enum Event {
    /// Device opened.
    DeviceOpened { serial: String, pid: u16 },
    /// Bank transfer starting.
    TransferStarted {
        direction: Direction,
        bank: Bank,
        offset: u32,
        total: u64,
    },
    /// One chunk done.
    TransferProgress {
        direction: Direction,
        current: u64,
        total: u64,
    },
    /// Transfer finished.
    TransferFinished { direction: Direction, bytes: u64 },
    /// Upgrade phase changed.
    PhaseChanged { from: UpgradePhase, to: UpgradePhase },
    /// Upgrade moved forward on the progress scale.
    UpgradeStep {
        status: UpgradeStatus,
        step: u8,
        total: u8,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait Observer: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &Event);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: &Event) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::DeviceOpened { serial, pid } => {
                tracing::info!(serial = %serial, pid = %format!("{:04X}", pid), "Device opened");
            }
            Event::TransferStarted {
                direction,
                bank,
                offset,
                total,
            } => {
                tracing::info!(dir = %direction, bank = %bank, offset = %format!("0x{:X}", offset), total, "Transfer started");
            }
            Event::TransferProgress {
                direction,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(dir = %direction, progress = %format!("{}%", pct), "Progress");
            }
            Event::TransferFinished { direction, bytes } => {
                tracing::info!(dir = %direction, bytes, "Transfer finished");
            }
            Event::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            Event::UpgradeStep {
                status,
                step,
                total,
            } => {
                tracing::info!(status = %status, "Upgrade step {}/{}", step, total);
            }
            Event::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub events: Mutex<Vec<Event>>,
    }

    impl Observer for RecordingObserver {
        fn on_event(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(UpgradePhase::AwaitingReady.to_string(), "Awaiting Ready");
        assert_eq!(Direction::Download.to_string(), "download");
    }

    #[test]
    fn test_recording_observer() {
        let obs = RecordingObserver::default();
        obs.on_event(&Event::TransferFinished {
            direction: Direction::Upload,
            bytes: 512,
        });
        assert_eq!(obs.events.lock().unwrap().len(), 1);
    }
}
