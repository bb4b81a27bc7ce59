//! Fixed-layout metadata record of a firmware archive.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use super::RpkError;

/// Size of the encoded record.
pub const METADATA_LEN: usize = 1896;

/// Column width used when printing long values.
const WRAP_WIDTH: usize = 60;

/// Archive content kind, from the numeric type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Bootloader,
    Firmware,
    Other(u32),
}

impl From<u32> for AssetKind {
    fn from(code: u32) -> Self {
        match code {
            1 => AssetKind::Bootloader,
            2 => AssetKind::Firmware,
            n => AssetKind::Other(n),
        }
    }
}

/// Decoded metadata. Text fields have trailing NULs removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub format: u32,
    pub copyright: String,
    pub date: String,
    /// Suggested file name of the asset.
    pub file: String,
    pub asset_type: u32,
    pub type_text: String,
    pub product: String,
    pub product_text: String,
    pub device: String,
    /// Product magic; the first four bytes match the device's.
    pub magic: String,
    /// Two-letter hardware variant code.
    pub variant: String,
    pub content_version: u16,
    pub content_version_special: u8,
    pub content_version_text: String,
    pub prerequisites: u32,
    pub prerequisites_text: String,
    pub content_note: String,
    pub content_changes: String,
    pub content_errata: String,
    pub content_extra: String,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Format,
    Copyright,
    Date,
    File,
    Type,
    TypeText,
    Product,
    ProductText,
    Device,
    Magic,
    Variant,
    ContentVersion,
    ContentVersionSpecial,
    ContentVersionText,
    Prerequisites,
    PrerequisitesText,
    ContentNote,
    ContentChanges,
    ContentErrata,
    ContentExtra,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    U8,
    U16,
    U32,
    Text(usize),
    Skip(usize),
}

/// Record layout in wire order.
const LAYOUT: &[(Option<Field>, Kind)] = &[
    (Some(Field::Format), Kind::U32),
    (Some(Field::Copyright), Kind::Text(64)),
    (Some(Field::Date), Kind::Text(32)),
    (Some(Field::File), Kind::Text(64)),
    (Some(Field::Type), Kind::U32),
    (Some(Field::TypeText), Kind::Text(32)),
    (Some(Field::Product), Kind::Text(16)),
    (Some(Field::ProductText), Kind::Text(64)),
    (Some(Field::Device), Kind::Text(32)),
    (Some(Field::Magic), Kind::Text(16)),
    (Some(Field::Variant), Kind::Text(8)),
    (Some(Field::ContentVersion), Kind::U16),
    (Some(Field::ContentVersionSpecial), Kind::U8),
    (Some(Field::ContentVersionText), Kind::Text(16)),
    (None, Kind::Skip(1)),
    (Some(Field::Prerequisites), Kind::U32),
    (Some(Field::PrerequisitesText), Kind::Text(128)),
    (Some(Field::ContentNote), Kind::Text(128)),
    (Some(Field::ContentChanges), Kind::Text(1024)),
    (Some(Field::ContentErrata), Kind::Text(128)),
    (Some(Field::ContentExtra), Kind::Text(128)),
];

enum Value {
    Int(u32),
    Text(String),
}

fn read_value(cursor: &mut Cursor<&[u8]>, kind: Kind) -> io::Result<Option<Value>> {
    Ok(Some(match kind {
        Kind::U8 => Value::Int(u32::from(cursor.read_u8()?)),
        Kind::U16 => Value::Int(u32::from(cursor.read_u16::<LittleEndian>()?)),
        Kind::U32 => Value::Int(cursor.read_u32::<LittleEndian>()?),
        Kind::Text(width) => {
            let mut raw = vec![0u8; width];
            cursor.read_exact(&mut raw)?;
            Value::Text(trim_nul(&raw))
        }
        Kind::Skip(n) => {
            cursor.set_position(cursor.position() + n as u64);
            return Ok(None);
        }
    }))
}

fn trim_nul(raw: &[u8]) -> String {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl Metadata {
    pub fn parse(data: &[u8]) -> Result<Self, RpkError> {
        if data.len() < METADATA_LEN {
            return Err(RpkError::Format(format!(
                "metadata too short: {} bytes, expected {}",
                data.len(),
                METADATA_LEN
            )));
        }

        let mut md = Metadata::default();
        let mut cursor = Cursor::new(data);
        for &(field, kind) in LAYOUT {
            let value = read_value(&mut cursor, kind)?;
            if let (Some(field), Some(value)) = (field, value) {
                md.assign(field, value);
            }
        }
        Ok(md)
    }

    fn assign(&mut self, field: Field, value: Value) {
        match value {
            Value::Int(n) => match field {
                Field::Format => self.format = n,
                Field::Type => self.asset_type = n,
                Field::ContentVersion => self.content_version = n as u16,
                Field::ContentVersionSpecial => self.content_version_special = n as u8,
                Field::Prerequisites => self.prerequisites = n,
                _ => {}
            },
            Value::Text(s) => {
                let slot = match field {
                    Field::Copyright => &mut self.copyright,
                    Field::Date => &mut self.date,
                    Field::File => &mut self.file,
                    Field::TypeText => &mut self.type_text,
                    Field::Product => &mut self.product,
                    Field::ProductText => &mut self.product_text,
                    Field::Device => &mut self.device,
                    Field::Magic => &mut self.magic,
                    Field::Variant => &mut self.variant,
                    Field::ContentVersionText => &mut self.content_version_text,
                    Field::PrerequisitesText => &mut self.prerequisites_text,
                    Field::ContentNote => &mut self.content_note,
                    Field::ContentChanges => &mut self.content_changes,
                    Field::ContentErrata => &mut self.content_errata,
                    Field::ContentExtra => &mut self.content_extra,
                    _ => return,
                };
                *slot = s;
            }
        }
    }

    pub fn kind(&self) -> AssetKind {
        AssetKind::from(self.asset_type)
    }

    /// First four bytes of the product magic.
    pub fn magic_prefix(&self) -> Option<[u8; 4]> {
        let b = self.magic.as_bytes().get(..4)?;
        Some([b[0], b[1], b[2], b[3]])
    }

    /// Variant code as reported by the device: the first two bytes of the
    /// variant text, NUL-extended, read big-endian.
    pub fn variant_code(&self) -> u16 {
        let b = self.variant.as_bytes();
        let hi = b.first().copied().unwrap_or(0);
        let lo = b.get(1).copied().unwrap_or(0);
        u16::from_be_bytes([hi, lo])
    }

    /// Fields shown to the user, in display order.
    pub fn display_fields(&self) -> [(&'static str, &str); 13] {
        [
            ("Copyright", &self.copyright),
            ("Date", &self.date),
            ("File", &self.file),
            ("Type", &self.type_text),
            ("Product", &self.product_text),
            ("Device", &self.device),
            ("Magic", &self.magic),
            ("Content Version", &self.content_version_text),
            ("Prerequisites", &self.prerequisites_text),
            ("Content Note", &self.content_note),
            ("Content Changes", &self.content_changes),
            ("Content Errata", &self.content_errata),
            ("Content Extra", &self.content_extra),
        ]
    }

    /// Print a key/value table, wrapping long values.
    pub fn write_table<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "{:<18} | Value", "Key")?;
        writeln!(w, "{}", "-".repeat(81))?;
        for (name, value) in self.display_fields() {
            let lines = wrap_text(value, WRAP_WIDTH);
            let mut lines = lines.iter();
            writeln!(w, "{:<18} | {}", name, lines.next().map_or("", String::as_str))?;
            for line in lines {
                writeln!(w, "{:<18} | {}", "", line)?;
            }
        }
        Ok(())
    }
}

/// Greedy word wrap at spaces. Existing line breaks are kept and words longer
/// than `width` are left whole.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    for para in text.split('\n') {
        let mut line = String::new();
        for word in para.split(' ').filter(|w| !w.is_empty()) {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
                out.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        out.push(line);
    }
    out
}
