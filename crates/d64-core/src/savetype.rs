//! Cartridge save types and their autodetection.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::Variant;

/// Save memory emulated by the device. Discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SaveType {
    #[default]
    None = 0,
    Eeprom4Kbit = 1,
    Eeprom16Kbit = 2,
    Sram256Kbit = 3,
    FlashRam1Mbit = 4,
    Sram768Kbit = 5,
    FlashRam1MbitPokStad2 = 6,
}

impl SaveType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveType::None => "none",
            SaveType::Eeprom4Kbit => "eeprom4kbit",
            SaveType::Eeprom16Kbit => "eeprom16kbit",
            SaveType::Sram256Kbit => "sram256kbit",
            SaveType::FlashRam1Mbit => "flash1mbit",
            SaveType::Sram768Kbit => "sram768kbit",
            SaveType::FlashRam1MbitPokStad2 => "flash1mbit_pokstad2",
        };
        f.write_str(name)
    }
}

impl FromStr for SaveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SaveType::None),
            "eeprom4kbit" => Ok(SaveType::Eeprom4Kbit),
            "eeprom16kbit" => Ok(SaveType::Eeprom16Kbit),
            "sram256kbit" => Ok(SaveType::Sram256Kbit),
            "flash1mbit" => Ok(SaveType::FlashRam1Mbit),
            "sram768kbit" => Ok(SaveType::Sram768Kbit),
            "flash1mbit_pokstad2" => Ok(SaveType::FlashRam1MbitPokStad2),
            other => Err(format!("invalid save type: {}", other)),
        }
    }
}

/// A ROM database entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomDbGame {
    pub name: String,
    /// Free-form label such as "Eeprom 4KB" or "SRAM".
    pub save_type: String,
}

/// Lookup of games by the lowercase hex MD5 of the whole ROM.
pub trait RomDatabase {
    fn lookup(&self, md5_hex: &str) -> Option<RomDbGame>;
}

/// ROM database kept in a TOML file, one `[games.<md5>]` table per ROM.
///
/// ```toml
/// [games.20b854b239203baf6c961b850a4a51a2]
/// name = "Super Mario 64 (U)"
/// save_type = "Eeprom 4KB"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomDbFile {
    #[serde(default)]
    pub games: HashMap<String, RomDbGame>,
}

impl RomDbFile {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl RomDatabase for RomDbFile {
    fn lookup(&self, md5_hex: &str) -> Option<RomDbGame> {
        self.games.get(&md5_hex.to_ascii_lowercase()).cloned()
    }
}

impl RomDbGame {
    /// Map the database label to a save type for the given hardware.
    ///
    /// HW1 boards keep the Pokemon Stadium 2 flash save at a dedicated address.
    pub fn save_type_for(&self, variant: Option<Variant>) -> SaveType {
        match self.save_type.as_str() {
            "Eeprom 4KB" => SaveType::Eeprom4Kbit,
            "Eeprom 16KB" => SaveType::Eeprom16Kbit,
            "Flash RAM" => {
                if self.name.starts_with("Pokemon Stadium 2") && variant == Some(Variant::REV_A) {
                    SaveType::FlashRam1MbitPokStad2
                } else {
                    SaveType::FlashRam1Mbit
                }
            }
            "SRAM" => SaveType::Sram256Kbit,
            _ => SaveType::None,
        }
    }
}

/// Read the save type from an EverDrive-64 extended ROM header.
///
/// Returns `None` if the header carries no ED64 tag or an unknown value.
pub fn from_ed64_header(header: &[u8]) -> Option<SaveType> {
    if header.get(0x3C..0x3E)? != b"ED" {
        return None;
    }
    let cfg = *header.get(0x3F)?;
    debug!(cfg = %format!("0x{:02X}", cfg), "ED64 ROM header detected");
    match cfg >> 4 {
        0 => Some(SaveType::None),
        1 => Some(SaveType::Eeprom4Kbit),
        2 => Some(SaveType::Eeprom16Kbit),
        3 => Some(SaveType::Sram256Kbit),
        4 => Some(SaveType::Sram768Kbit),
        5 => Some(SaveType::FlashRam1Mbit),
        6 => {
            warn!("ROM requested a 1Mbit SRAM save type, which the 64drive does not support");
            Some(SaveType::None)
        }
        _ => {
            warn!(cfg = %format!("0x{:02X}", cfg), "Invalid ED64 ROM config header value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDb(HashMap<&'static str, RomDbGame>);

    impl RomDatabase for FakeDb {
        fn lookup(&self, md5_hex: &str) -> Option<RomDbGame> {
            self.0.get(md5_hex).cloned()
        }
    }

    fn game(name: &str, label: &str) -> RomDbGame {
        RomDbGame {
            name: name.to_string(),
            save_type: label.to_string(),
        }
    }

    fn ed64(cfg: u8) -> Vec<u8> {
        let mut h = vec![0u8; 0x40];
        h[0x3C] = b'E';
        h[0x3D] = b'D';
        h[0x3F] = cfg;
        h
    }

    #[test]
    fn test_names_roundtrip() {
        for st in [
            SaveType::None,
            SaveType::Eeprom4Kbit,
            SaveType::Eeprom16Kbit,
            SaveType::Sram256Kbit,
            SaveType::FlashRam1Mbit,
            SaveType::Sram768Kbit,
            SaveType::FlashRam1MbitPokStad2,
        ] {
            assert_eq!(st.to_string().parse::<SaveType>().unwrap(), st);
        }
        assert_eq!(SaveType::FlashRam1MbitPokStad2.code(), 6);
    }

    #[test]
    fn test_database_labels() {
        let db = FakeDb(HashMap::from([
            ("aa", game("Super Mario 64 (U)", "Eeprom 4KB")),
            ("bb", game("Pokemon Stadium 2 (U)", "Flash RAM")),
            ("cc", game("Zelda (U)", "SRAM")),
            ("dd", game("Something", "Controller Pack")),
        ]));
        let hit = |k| db.lookup(k).unwrap();
        assert_eq!(hit("aa").save_type_for(None), SaveType::Eeprom4Kbit);
        assert_eq!(
            hit("bb").save_type_for(Some(Variant::REV_A)),
            SaveType::FlashRam1MbitPokStad2
        );
        assert_eq!(
            hit("bb").save_type_for(Some(Variant::REV_B)),
            SaveType::FlashRam1Mbit
        );
        assert_eq!(hit("cc").save_type_for(None), SaveType::Sram256Kbit);
        assert_eq!(hit("dd").save_type_for(None), SaveType::None);
        assert!(db.lookup("ee").is_none());
    }

    #[test]
    fn test_toml_database() {
        let db: RomDbFile = toml::from_str(
            "[games.20b854b239203baf6c961b850a4a51a2]\n\
             name = \"Super Mario 64 (U)\"\n\
             save_type = \"Eeprom 4KB\"\n",
        )
        .unwrap();
        let hit = db.lookup("20B854B239203BAF6C961B850A4A51A2").unwrap();
        assert_eq!(hit.name, "Super Mario 64 (U)");
        assert_eq!(hit.save_type_for(None), SaveType::Eeprom4Kbit);
        assert!(db.lookup("00").is_none());
    }

    #[test]
    fn test_ed64_header() {
        assert_eq!(from_ed64_header(&ed64(0x10)), Some(SaveType::Eeprom4Kbit));
        assert_eq!(from_ed64_header(&ed64(0x4F)), Some(SaveType::Sram768Kbit));
        assert_eq!(from_ed64_header(&ed64(0x50)), Some(SaveType::FlashRam1Mbit));
        assert_eq!(from_ed64_header(&ed64(0x60)), Some(SaveType::None));
        assert_eq!(from_ed64_header(&ed64(0x70)), None);
        assert_eq!(from_ed64_header(&[0u8; 0x40]), None);
        assert_eq!(from_ed64_header(&[0u8; 0x10]), None);
    }
}
