//! Protocol constants for the 64drive USB command interface.

use std::fmt;
use std::str::FromStr;

// ============================================================================
// Device Identification
// ============================================================================

/// FTDI Vendor ID (the 64drive uses a stock FTDI bridge)
pub const FTDI_VENDOR_ID: u16 = 0x0403;

/// FTDI Product IDs a 64drive may enumerate with
pub const SUPPORTED_PIDS: &[u16] = &[0x6010, 0x6011, 0x6012, 0x6013, 0x6014];

/// FT2232H product ID, only used by HW1 (Rev A) boards
pub const REV_A_PRODUCT_ID: u16 = 0x6010;

/// USB manufacturer string of genuine units
pub const MANUFACTURER: &str = "Retroactive";

/// USB product string prefix of genuine units
pub const PRODUCT_PREFIX: &str = "64drive";

// ============================================================================
// Framing
// ============================================================================

/// Request tag following the opcode byte
pub const CMD_TAG: [u8; 3] = *b"CMD";

/// Completion tag preceding the echoed opcode
pub const CMP_TAG: [u8; 3] = *b"CMP";

/// Debug FIFO packet header
pub const FIFO_HEADER: [u8; 4] = *b"DMA@";

/// Debug FIFO packet trailer
pub const FIFO_TRAILER: [u8; 4] = *b"CMPH";

// ============================================================================
// Size Constants
// ============================================================================

/// Transfers must be a multiple of this many bytes
pub const TRANSFER_ALIGN: usize = 512;

/// Filler used to pad uploads (mimics blank ROM)
pub const PAD_BYTE: u8 = 0xFF;

pub const ONE28_K: usize = 128 * 1024;
pub const TWO_MB: u64 = 2 * 1024 * 1024;
pub const SIXTEEN_MB: u64 = 16 * 1024 * 1024;

/// ROMs larger than this need extended mode
pub const EXTENDED_ROM_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Bytes of ROM header fetched for CIC detection
pub const ROM_HEADER_CIC_LEN: usize = 0x1000;

/// Bytes of ROM header fetched for save type detection
pub const ROM_HEADER_SAVE_LEN: usize = 512;

/// Big-endian ROM magic in native (z64) order
pub const ROM_MAGIC_NATIVE: u32 = 0x8037_1240;
/// ROM magic as seen in 16-bit swapped (v64) dumps
pub const ROM_MAGIC_SWAP2: u32 = 0x3780_4012;
/// ROM magic as seen in 32-bit swapped (n64) dumps
pub const ROM_MAGIC_SWAP4: u32 = 0x4012_3780;

// ============================================================================
// Commands
// ============================================================================

/// Command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Load a bank of data from the PC
    LoadFromPc,
    /// Dump the contents of a bank to the PC
    DumpToPc,
    SetSaveType,
    SetCicType,
    SetExtended,
    /// Hardware/firmware version and device magic
    VersionRequest,
    UpgradeStart,
    UpgradeReport,
    /// Any other opcode, sent verbatim
    Raw(u8),
}

impl Opcode {
    pub const fn code(self) -> u8 {
        match self {
            Opcode::LoadFromPc => 0x20,
            Opcode::DumpToPc => 0x30,
            Opcode::SetSaveType => 0x70,
            Opcode::SetCicType => 0x72,
            Opcode::SetExtended => 0x74,
            Opcode::VersionRequest => 0x80,
            Opcode::UpgradeStart => 0x84,
            Opcode::UpgradeReport => 0x85,
            Opcode::Raw(c) => c,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0x20 => Opcode::LoadFromPc,
            0x30 => Opcode::DumpToPc,
            0x70 => Opcode::SetSaveType,
            0x72 => Opcode::SetCicType,
            0x74 => Opcode::SetExtended,
            0x80 => Opcode::VersionRequest,
            0x84 => Opcode::UpgradeStart,
            0x85 => Opcode::UpgradeReport,
            c => Opcode::Raw(c),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::LoadFromPc => write!(f, "LoadFromPc"),
            Opcode::DumpToPc => write!(f, "DumpToPc"),
            Opcode::SetSaveType => write!(f, "SetSaveType"),
            Opcode::SetCicType => write!(f, "SetCicType"),
            Opcode::SetExtended => write!(f, "SetExtended"),
            Opcode::VersionRequest => write!(f, "VersionRequest"),
            Opcode::UpgradeStart => write!(f, "UpgradeStart"),
            Opcode::UpgradeReport => write!(f, "UpgradeReport"),
            Opcode::Raw(c) => write!(f, "Opcode(0x{:02X})", c),
        }
    }
}

// ============================================================================
// Banks
// ============================================================================

/// Memory bank addressed by upload/download commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    CartRom,
    Sram256,
    Sram768,
    Flash,
    FlashPokStad2,
    Eeprom,
}

impl Bank {
    pub const fn id(self) -> u8 {
        match self {
            Bank::CartRom => 1,
            Bank::Sram256 => 2,
            Bank::Sram768 => 3,
            Bank::Flash => 4,
            Bank::FlashPokStad2 => 5,
            Bank::Eeprom => 6,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bank::CartRom => "rom",
            Bank::Sram256 => "sram256",
            Bank::Sram768 => "sram768",
            Bank::Flash => "flash",
            Bank::FlashPokStad2 => "flash_pokstad2",
            Bank::Eeprom => "eeprom",
        };
        f.write_str(name)
    }
}

impl FromStr for Bank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rom" => Ok(Bank::CartRom),
            "sram256" => Ok(Bank::Sram256),
            "sram768" => Ok(Bank::Sram768),
            "flash" => Ok(Bank::Flash),
            "flash_pokstad2" => Ok(Bank::FlashPokStad2),
            "eeprom" => Ok(Bank::Eeprom),
            other => Err(format!("invalid bank: {}", other)),
        }
    }
}

// ============================================================================
// Versions
// ============================================================================

/// Hardware variant (board revision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variant(pub u16);

impl Variant {
    /// HW1, Rev A board
    pub const REV_A: Variant = Variant(0x4100);
    /// HW2, Rev B board
    pub const REV_B: Variant = Variant(0x4200);
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Variant::REV_A => write!(f, "HW1 (Rev A)"),
            Variant::REV_B => write!(f, "HW2 (Rev B)"),
            Variant(v) => write!(f, "UNKVAR ({:02x})", v),
        }
    }
}

/// FPGA configuration revision, e.g. 206 is "2.06".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion(pub u16);

impl FirmwareVersion {
    /// First firmware with extended mode
    pub const EXTENDED_MODE: FirmwareVersion = FirmwareVersion(206);
    /// First firmware with the debug FIFO
    pub const DEBUG_FIFO: FirmwareVersion = FirmwareVersion(205);
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
