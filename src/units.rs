//! Compile unit version detection straight from the `.debug_info` header
//! stream, ahead of any structured parsing.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::constants::*;
use crate::cursor::{Endian, Format};
use crate::dwarf::DieOffset;
use crate::error::{Error, Result};

/// Length, format, version and byte order of a unit, as sniffed from its
/// first bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthVersion {
    pub length: u64,
    pub format: Format,
    pub version: u8,
    pub endian: Endian,
}

/// Reads the initial length and version of the unit at the front of `data`.
///
/// Versions are small and zero-extended, so whichever of the two version
/// bytes is zero tells us the byte order. When both are zero the version is
/// reported as 0 and little endian is assumed.
pub fn read_length_version(data: &[u8]) -> Option<LengthVersion> {
    if data.len() < 4 {
        return None;
    }

    let length_field = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let (format, voff) = if length_field == u32::MAX {
        (Format::Dwarf64, 12)
    } else {
        (Format::Dwarf32, 4)
    };

    if voff + 1 >= data.len() {
        return None;
    }

    let (x, y) = (data[voff], data[voff + 1]);
    let (version, endian) = if x == 0 && y == 0 {
        (0, Endian::Little)
    } else if x == 0 {
        (y, Endian::Big)
    } else if y == 0 {
        (x, Endian::Little)
    } else {
        (0, Endian::Little)
    };

    let length = match (format, endian) {
        (Format::Dwarf64, Endian::Little) => {
            u64::from_le_bytes(data[4..12].try_into().ok()?)
        }
        (Format::Dwarf64, Endian::Big) => u64::from_be_bytes(data[4..12].try_into().ok()?),
        (Format::Dwarf32, Endian::Little) => length_field as u64,
        (Format::Dwarf32, Endian::Big) => {
            u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64
        }
    };

    Some(LengthVersion {
        length,
        format,
        version,
        endian,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitHeaderInfo {
    pub length: u64,
    pub format: Format,
    pub version: u8,
    pub endian: Endian,
    pub unit_type: Option<u8>,
    /// Bytes between the end of the initial length field and the first DIE.
    pub header_size: usize,
}

impl UnitHeaderInfo {
    /// Offset of the first DIE relative to the start of the unit.
    pub fn first_die_offset(&self) -> u64 {
        (self.format.initial_length_size() + self.header_size) as u64
    }

    /// Total size of the unit including its initial length field.
    pub fn total_size(&self) -> u64 {
        self.format.initial_length_size() as u64 + self.length
    }
}

/// Computes the header layout of the unit starting at `data[0]`.
pub fn unit_header_size(data: &[u8]) -> Result<UnitHeaderInfo> {
    let lv = read_length_version(data).ok_or(Error::Truncated {
        context: "debug_info",
        offset: 0,
    })?;
    let offset_size = lv.format.offset_size();
    let after_length = lv.format.initial_length_size();

    let (unit_type, header_size) = match lv.version {
        2..=4 => (None, 3 + offset_size),
        _ => {
            let unit_type = *data.get(after_length + 2).ok_or(Error::Truncated {
                context: "debug_info",
                offset: after_length + 2,
            })?;
            let size = match unit_type {
                DW_UT_compile | DW_UT_partial => 4 + offset_size,
                DW_UT_skeleton | DW_UT_split_compile => 4 + offset_size + 8,
                DW_UT_type | DW_UT_split_type => 4 + offset_size + 8 + offset_size,
                _ => 0,
            };
            (Some(unit_type), size)
        }
    };

    Ok(UnitHeaderInfo {
        length: lv.length,
        format: lv.format,
        version: lv.version,
        endian: lv.endian,
        unit_type,
        header_size,
    })
}

/// First-DIE offset of every unit mapped to its DWARF version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitVersions {
    versions: BTreeMap<DieOffset, u8>,
}

impl UnitVersions {
    /// Version of the unit whose first DIE is at `offset`.
    pub fn get(&self, offset: DieOffset) -> Option<u8> {
        self.versions.get(&offset).copied()
    }

    /// Version of the closest unit starting at or before `offset`.
    pub fn containing(&self, offset: DieOffset) -> Option<u8> {
        self.versions
            .range(..=offset)
            .next_back()
            .map(|(_, &version)| version)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DieOffset, u8)> + '_ {
        self.versions.iter().map(|(&off, &ver)| (off, ver))
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn max_version(&self) -> Option<u8> {
        self.versions.values().copied().max()
    }
}

/// Walks `.debug_info` unit by unit. A truncated trailing unit ends the scan;
/// the units read before it are kept.
pub fn scan_unit_versions(info: &[u8]) -> UnitVersions {
    let mut versions = BTreeMap::new();
    let mut offset = 0usize;

    while offset < info.len() {
        let header = match unit_header_size(&info[offset..]) {
            Ok(header) => header,
            Err(err) => {
                warn!(offset, %err, "stopping unit version scan");
                break;
            }
        };

        let first_die = offset as u64 + header.first_die_offset();
        debug!(
            unit = offset,
            first_die,
            version = header.version,
            "found unit header"
        );
        versions.insert(first_die, header.version);

        let next = (offset as u64).saturating_add(header.total_size());
        if next > info.len() as u64 {
            warn!(
                unit = offset,
                length = header.length,
                "unit extends past end of .debug_info"
            );
            break;
        }
        offset = next as usize;
    }

    UnitVersions { versions }
}
