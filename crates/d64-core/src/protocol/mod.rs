//! Protocol module - 64drive command framing and device status codes.

pub mod command;
pub mod constants;
pub mod status;

pub use command::Command;
pub use constants::*;
pub use status::UpgradeStatus;
