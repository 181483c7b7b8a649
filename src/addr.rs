//! `.debug_addr`: the indirection table DWARF 5 uses for `addrx` forms and
//! indexed location list entries.

use crate::cursor::{Cursor, Endian, Format};
use crate::error::{Error, Result};
use crate::units::read_length_version;

#[derive(Debug, Clone)]
pub struct AddressTable {
    data: Vec<u8>,
    endian: Endian,
    width: usize,
}

impl AddressTable {
    /// Parses the header of the first table in the section. Returns `None`
    /// for an empty section.
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.is_empty() {
            return Ok(None);
        }

        let lv = read_length_version(data).ok_or(Error::Truncated {
            context: "debug_addr",
            offset: 0,
        })?;

        // initial length + 2-byte version
        let mut header = 6;
        if lv.format == Format::Dwarf64 {
            header += 8;
        }

        let mut cur = Cursor::new(data, lv.endian).context("debug_addr");
        cur.seek(header);
        let address_size = cur.read_u8()? as usize;
        let segment_selector_size = cur.read_u8()? as usize;
        let width = address_size + segment_selector_size;

        if !matches!(width, 2 | 4 | 8) {
            return Err(Error::UnsupportedWidth(width));
        }

        Ok(Some(Self {
            data: data.to_vec(),
            endian: lv.endian,
            width,
        }))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Binds the table to one compile unit's `DW_AT_addr_base`.
    pub fn subsection(&self, base: u64) -> AddressSubsection<'_> {
        AddressSubsection {
            table: Some(self),
            base,
        }
    }
}

/// One compile unit's view of `.debug_addr`. A view over an absent table
/// fails every lookup.
#[derive(Debug, Clone, Copy)]
pub struct AddressSubsection<'a> {
    table: Option<&'a AddressTable>,
    base: u64,
}

impl<'a> AddressSubsection<'a> {
    pub fn missing() -> Self {
        Self {
            table: None,
            base: 0,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn get(&self, index: u64) -> Result<u64> {
        let table = self.table.ok_or(Error::MissingSection("debug_addr"))?;
        let out_of_range = Error::AddressIndexOutOfRange {
            index,
            base: self.base,
        };

        let offset = index
            .checked_mul(table.width as u64)
            .and_then(|off| off.checked_add(self.base))
            .ok_or_else(|| out_of_range.clone())?;
        let end = offset
            .checked_add(table.width as u64)
            .ok_or_else(|| out_of_range.clone())?;
        if end > table.data.len() as u64 {
            return Err(out_of_range);
        }

        let mut cur = Cursor::new(&table.data, table.endian).context("debug_addr");
        cur.seek(offset as usize);
        cur.read_uint(table.width)
    }
}

