//! Fixed-size header and entry-list records.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{error::PackError, Result, FORMAT_VERSION, MAGIC_NUMBER};

pub const NAME_LEN: usize = 32;
pub const PARENT_MARKER: &str = "..";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub entry_list_offset: u32,
    pub entry_count: i32,
}

impl Header {
    /// Reads and checks the magic and version; the offset and count are
    /// validated against the file length by the caller.
    pub fn read_from<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC_NUMBER {
            return Err(PackError::format(format!("bad magic {magic:02x?}")));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(PackError::format(format!(
                "unsupported version {version}, expected {FORMAT_VERSION}"
            )));
        }
        Ok(Self {
            entry_list_offset: r.read_u32::<LittleEndian>()?,
            entry_count: r.read_i32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(&MAGIC_NUMBER)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        w.write_u32::<LittleEndian>(self.entry_list_offset)?;
        w.write_i32::<LittleEndian>(self.entry_count)
    }
}

/// One row of the entry list. A zero `size` makes it a directory marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u32,
    pub size: u32,
    pub name: String,
    pub timestamp: i32,
}

impl Record {
    pub fn push(name: &str) -> Self {
        Self {
            offset: 0,
            size: 0,
            name: name.to_string(),
            timestamp: 0,
        }
    }

    pub fn pop() -> Self {
        Self::push(PARENT_MARKER)
    }

    pub fn is_marker(&self) -> bool {
        self.size == 0
    }

    pub fn is_pop(&self) -> bool {
        self.is_marker() && self.name == PARENT_MARKER
    }

    pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        let offset = r.read_u32::<LittleEndian>()?;
        let size = r.read_u32::<LittleEndian>()?;
        let mut name = [0u8; NAME_LEN];
        r.read_exact(&mut name)?;
        let timestamp = r.read_i32::<LittleEndian>()?;
        Ok(Self {
            offset,
            size,
            name: decode_name(&name),
            timestamp,
        })
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.offset)?;
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_all(&encode_name(&self.name))?;
        w.write_i32::<LittleEndian>(self.timestamp)
    }
}

/// Names are ISO-8859-1, so every byte maps to exactly one char.
pub fn decode_name(raw: &[u8; NAME_LEN]) -> String {
    raw.iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect()
}

/// Encodes at most 31 bytes; the last byte is always NUL. Chars outside
/// ISO-8859-1 become `?`.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut raw = [0u8; NAME_LEN];
    for (slot, c) in raw[..NAME_LEN - 1].iter_mut().zip(name.chars()) {
        *slot = u8::try_from(u32::from(c)).unwrap_or(b'?');
    }
    raw
}

/// Whether `name` survives `encode_name` unchanged.
pub fn fits_name(name: &str) -> bool {
    name.chars().count() < NAME_LEN && name.chars().all(|c| u32::from(c) <= 0xff && c != '\0')
}
