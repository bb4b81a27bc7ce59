//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use d64_core::ByteSwapMode;
use d64_core::protocol::Bank;

/// Parse a byte size: decimal, `0x` hex, or a `K`/`M`/`G` (binary) suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let t = s.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e));
    }

    let upper = t.to_ascii_uppercase();
    let digits = upper
        .strip_suffix("IB")
        .or_else(|| upper.strip_suffix('B'))
        .unwrap_or(&upper);
    let (num, mult) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1u64 << 10),
        Some('M') => (&digits[..digits.len() - 1], 1 << 20),
        Some('G') => (&digits[..digits.len() - 1], 1 << 30),
        _ => (digits, 1),
    };
    let n: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid size: {}", s))?;
    n.checked_mul(mult).ok_or_else(|| format!("size too large: {}", s))
}

fn parse_offset(s: &str) -> Result<u32, String> {
    let n = parse_size(s)?;
    u32::try_from(n).map_err(|_| format!("offset out of range: {}", s))
}

fn parse_bank(s: &str) -> Result<Bank, String> {
    s.parse()
}

/// Upload byteswap choice; `None` autodetects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapArg(pub Option<ByteSwapMode>);

/// `-w` values: 0, 2 or 4, and -1 for autodetect on upload.
fn parse_byteswap(s: &str) -> Result<SwapArg, String> {
    match s {
        "-1" | "auto" => Ok(SwapArg(None)),
        other => other.parse().map(|m| SwapArg(Some(m))),
    }
}

/// Loose boolean for `extended`: only "t", "true" and "1" enable.
pub fn parse_switch(s: &str) -> bool {
    matches!(s, "t" | "true" | "1")
}

#[derive(Parser, Debug)]
#[command(name = "d64")]
#[command(author, version, about = "64drive USB cartridge tool", long_about = None)]
pub struct Cli {
    /// Do not show any output unless an error occurs
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Be verbose
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial number of the 64drive to use
    #[arg(long, global = true)]
    pub serial: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Offset in memory at which the file will be uploaded
    #[arg(short, long, default_value = "0", value_parser = parse_offset)]
    pub offset: u32,

    /// Size of data to upload (default: file size)
    #[arg(short, long, value_parser = parse_size)]
    pub size: Option<u64>,

    /// Bank where data should be uploaded
    #[arg(short, long, default_value = "rom", value_parser = parse_bank)]
    pub bank: Bank,

    /// Autoset CIC after upload (default: true if uploading a ROM)
    #[arg(short = 'c', long, num_args = 0..=1, default_missing_value = "true")]
    pub autocic: Option<bool>,

    /// Autoset save type after upload (default: true if uploading a ROM)
    #[arg(short = 'S', long, num_args = 0..=1, default_missing_value = "true")]
    pub autosave: Option<bool>,

    /// Set extended mode (default: true if uploading a >64 MiB ROM)
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    pub extended: Option<bool>,

    /// Byteswap format: 0=none, 2=16bit, 4=32bit, -1=autodetect
    #[arg(short = 'w', long, default_value = "-1", allow_hyphen_values = true, value_parser = parse_byteswap)]
    pub byteswap: SwapArg,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DownloadArgs {
    /// File to write
    pub file: PathBuf,

    /// Offset in memory to start from
    #[arg(short, long, default_value = "0", value_parser = parse_offset)]
    pub offset: u32,

    /// Size of data to download
    #[arg(short, long, value_parser = parse_size)]
    pub size: u64,

    /// Bank to read from
    #[arg(short, long, default_value = "rom", value_parser = parse_bank)]
    pub bank: Bank,

    /// Byteswap format: 0=none, 2=16bit, 4=32bit
    #[arg(short = 'w', long, default_value = "0")]
    pub byteswap: ByteSwapMode,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List 64drive devices (with -v, also hardware/firmware versions)
    #[command(alias = "l")]
    List,

    /// Upload data to 64drive
    #[command(alias = "u")]
    Upload(UploadArgs),

    /// Download data from 64drive
    #[command(alias = "d")]
    Download(DownloadArgs),

    /// Change the emulated CIC variant ("auto" detects it from the loaded ROM)
    #[command(alias = "c")]
    Cic {
        /// CIC name such as 6102, or "auto"
        cic: String,
    },

    /// Change the emulated save type
    #[command(alias = "st")]
    Savetype {
        /// none, eeprom4kbit, eeprom16kbit, sram256kbit, flash1mbit, sram768kbit, flash1mbit_pokstad2
        save_type: String,
    },

    /// Enable or disable extended mode (HW2, firmware >= 2.06)
    #[command(alias = "ext")]
    Extended {
        /// true/false
        enable: String,
    },

    /// Manage firmware upgrades
    Firmware {
        #[command(subcommand)]
        command: FirmwareCommands,
    },

    /// Show debug output of a running program
    Debug,
}

#[derive(Subcommand, Debug)]
pub enum FirmwareCommands {
    /// Show information on a firmware file
    Info {
        /// RPK firmware file
        file: PathBuf,
    },

    /// Extract the raw binary firmware
    Extract {
        /// RPK firmware file
        file: PathBuf,

        /// Output file (default: original name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upgrade 64drive firmware
    Upgrade {
        /// RPK firmware file
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Ok(1024));
        assert_eq!(parse_size("0x200"), Ok(512));
        assert_eq!(parse_size("4K"), Ok(4096));
        assert_eq!(parse_size("2MB"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_size("1MiB"), Ok(1024 * 1024));
        assert_eq!(parse_size("64m"), Ok(64 * 1024 * 1024));
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_parse_switch() {
        assert!(parse_switch("t"));
        assert!(parse_switch("1"));
        assert!(!parse_switch("yes"));
        assert!(!parse_switch("false"));
    }

    #[test]
    fn test_upload_defaults() {
        let cli = Cli::try_parse_from(["d64", "upload", "game.z64"]).unwrap();
        let Commands::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.bank, Bank::CartRom);
        assert_eq!(args.offset, 0);
        assert_eq!(args.byteswap, SwapArg(None));
        assert_eq!(args.autocic, None);
        assert_eq!(args.size, None);
    }

    #[test]
    fn test_upload_flags() {
        let cli = Cli::try_parse_from([
            "d64", "-q", "upload", "save.eep", "-b", "eeprom", "-w", "2", "-c", "-o", "0x100",
        ])
        .unwrap();
        assert!(cli.quiet);
        let Commands::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.bank, Bank::Eeprom);
        assert_eq!(args.byteswap, SwapArg(Some(ByteSwapMode::Swap2)));
        assert_eq!(args.autocic, Some(true));
        assert_eq!(args.offset, 0x100);
    }

    #[test]
    fn test_download_requires_size() {
        assert!(Cli::try_parse_from(["d64", "download", "out.bin"]).is_err());
        let cli = Cli::try_parse_from(["d64", "download", "out.bin", "-s", "8M"]).unwrap();
        let Commands::Download(args) = cli.command else {
            panic!("expected download");
        };
        assert_eq!(args.size, 8 * 1024 * 1024);
        assert_eq!(args.byteswap, ByteSwapMode::None);
    }

    #[test]
    fn test_firmware_extract_output() {
        let cli =
            Cli::try_parse_from(["d64", "firmware", "extract", "fw.rpk", "-o", "out.bin"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Firmware {
                command: FirmwareCommands::Extract { output: Some(_), .. }
            }
        ));
    }
}
