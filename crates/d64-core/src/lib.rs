//! d64-core: host side of the 64drive USB cartridge protocol.
//!
//! Everything needed to talk to a 64drive over its FTDI bridge, move ROMs and
//! saves in and out of its memory banks, and flash firmware from RPK archives.
//!
//! # Architecture
//!
//! - **Protocol**: opcodes, banks, versions, command frames, upgrade statuses
//! - **Transport**: USB byte pipe abstraction (FTDI over nusb, mock)
//! - **Channel**: framed request/completion exchange with busy-read retries
//! - **Device**: session owning one device, typed commands, debug FIFO
//! - **Transfer**: chunked bank upload/download and the upload pipe
//! - **ByteSwap / Checksum / CIC / Save types**: ROM image handling
//! - **RPK**: firmware archive container and metadata
//! - **Upgrade**: firmware flashing state machine
//! - **Events**: observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use d64_core::{CancelToken, Config, DeviceSession};
//! use d64_core::protocol::Bank;
//! use d64_core::transfer::TransferRequest;
//!
//! let config = Config::default();
//! let mut dev = DeviceSession::open_single(&config)?;
//! let mut save = Vec::new();
//! let req = TransferRequest::new(Bank::Eeprom, 0, 2048);
//! dev.download(&req, &mut save, &CancelToken::new())?;
//! # Ok::<(), d64_core::Error>(())
//! ```

pub mod byteswap;
pub mod cancel;
pub mod channel;
pub mod checksum;
pub mod cic;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod protocol;
pub mod rom;
pub mod rpk;
pub mod savetype;
pub mod transfer;
pub mod transport;
pub mod upgrade;

// Re-exports for convenience
pub use byteswap::{ByteSwapError, ByteSwapMode};
pub use cancel::CancelToken;
pub use channel::{CommandChannel, ReadPolicy};
pub use cic::Cic;
pub use config::Config;
pub use device::{DeviceSession, FifoPacket, VersionInfo, select_by_serial, select_single};
pub use error::{Error, Result};
pub use events::{Direction, Event, LogLevel, NullObserver, Observer, TracingObserver, UpgradePhase};
pub use rom::{RomUploadReport, UploadOptions, UploadPlan};
pub use rpk::{Metadata, Rpk, RpkError};
pub use savetype::{RomDatabase, RomDbFile, RomDbGame, SaveType};
pub use transfer::TransferRequest;
pub use transport::{DeviceDesc, Enumeration, FtdiTransport, MockTransport, TransportError, UsbTransport};
pub use upgrade::{Confirm, UpgradeOutcome, UpgradeProgress, UpgradePrompt};
