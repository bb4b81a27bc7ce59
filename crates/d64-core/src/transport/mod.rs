//! Transport layer module.

pub mod ftdi;
pub mod mock;
pub mod traits;

pub use ftdi::{DeviceDesc, Enumeration, FtdiTransport};
pub use mock::MockTransport;
pub use traits::{TransportError, UsbTransport};
