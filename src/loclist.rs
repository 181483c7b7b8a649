//! Location list decoding for both encodings: the raw address pairs of
//! `.debug_loc` (DWARF 2-4) and the opcode-tagged `.debug_loclists`
//! (DWARF 5).

use crate::addr::AddressSubsection;
use crate::constants::*;
use crate::cursor::{Cursor, Endian};
use crate::error::{Error, Result};

/// One decoded location list record.
///
/// A DWARF 2-4 base address selection is kept in its sentinel form:
/// `low_pc == u64::MAX` and `high_pc` holds the new base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoclistEntry<'a> {
    /// Section offset of the record.
    pub offset: usize,
    pub low_pc: u64,
    pub high_pc: u64,
    pub expr: &'a [u8],
    /// The `DW_LLE_*` opcode that produced the entry; `None` for DWARF 2-4.
    pub encoding: Option<DwarfLle>,
}

impl<'a> LoclistEntry<'a> {
    pub fn is_base_address_selection(&self) -> bool {
        self.low_pc == u64::MAX
    }

    pub fn contains(&self, pc: u64) -> bool {
        !self.is_base_address_selection() && self.low_pc <= pc && pc < self.high_pc
    }
}

/// The cursor contract shared by both encodings: position with `seek`, then
/// call `next_entry` until it yields `Ok(None)`.
pub trait LoclistReader<'a> {
    fn seek(&mut self, offset: usize);
    fn next_entry(&mut self) -> Result<Option<LoclistEntry<'a>>>;
}

/// Entries read before the list ended, and the fault that ended it early, if
/// any.
#[derive(Debug, Clone, Default)]
pub struct LoclistListing<'a> {
    pub entries: Vec<LoclistEntry<'a>>,
    pub fault: Option<Error>,
}

pub fn drain<'a, R: LoclistReader<'a> + ?Sized>(reader: &mut R) -> LoclistListing<'a> {
    let mut listing = LoclistListing::default();
    loop {
        match reader.next_entry() {
            Ok(Some(entry)) => listing.entries.push(entry),
            Ok(None) => break,
            Err(err) => {
                listing.fault = Some(err);
                break;
            }
        }
    }
    listing
}

/// Relocates DWARF 2-4 ranges against `base`, switching base at every
/// selection entry. Selection entries are kept so they can be shown.
pub fn apply_base_selection(entries: &mut [LoclistEntry<'_>], mut base: u64) {
    for entry in entries.iter_mut() {
        if entry.is_base_address_selection() {
            base = entry.high_pc;
        } else {
            entry.low_pc = entry.low_pc.wrapping_add(base);
            entry.high_pc = entry.high_pc.wrapping_add(base);
        }
    }
}

fn check_pointer_size(address_size: usize) -> Result<()> {
    match address_size {
        4 | 8 => Ok(()),
        other => Err(Error::UnsupportedWidth(other)),
    }
}

/// `.debug_loc` contents.
#[derive(Debug, Clone)]
pub struct LoclistSection2 {
    data: Vec<u8>,
    address_size: usize,
    endian: Endian,
}

impl LoclistSection2 {
    pub fn new(data: Vec<u8>, address_size: usize, endian: Endian) -> Result<Self> {
        check_pointer_size(address_size)?;
        Ok(Self {
            data,
            address_size,
            endian,
        })
    }

    pub fn reader(&self) -> LoclistReaderV2<'_> {
        LoclistReaderV2 {
            cursor: Cursor::new(&self.data, self.endian).context("debug_loc"),
            address_size: self.address_size,
            done: false,
        }
    }
}

pub struct LoclistReaderV2<'a> {
    cursor: Cursor<'a>,
    address_size: usize,
    done: bool,
}

impl<'a> LoclistReaderV2<'a> {
    fn one_addr(&mut self) -> Result<u64> {
        if self.address_size == 4 {
            let addr = self.cursor.read_u32()?;
            if addr == u32::MAX {
                return Ok(u64::MAX);
            }
            Ok(addr as u64)
        } else {
            self.cursor.read_u64()
        }
    }

    fn read_entry(&mut self) -> Result<Option<LoclistEntry<'a>>> {
        let offset = self.cursor.position();
        let low_pc = self.one_addr()?;
        let high_pc = self.one_addr()?;

        if low_pc == 0 && high_pc == 0 {
            return Ok(None);
        }

        if low_pc == u64::MAX {
            return Ok(Some(LoclistEntry {
                offset,
                low_pc,
                high_pc,
                expr: &[],
                encoding: None,
            }));
        }

        let len = self.cursor.read_u16()? as usize;
        let expr = self.cursor.read_bytes(len)?;
        Ok(Some(LoclistEntry {
            offset,
            low_pc,
            high_pc,
            expr,
            encoding: None,
        }))
    }
}

impl<'a> LoclistReader<'a> for LoclistReaderV2<'a> {
    fn seek(&mut self, offset: usize) {
        self.cursor.seek(offset);
        self.done = false;
    }

    fn next_entry(&mut self) -> Result<Option<LoclistEntry<'a>>> {
        if self.done {
            return Ok(None);
        }
        let result = self.read_entry();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }
}

/// `.debug_loclists` contents.
#[derive(Debug, Clone)]
pub struct LoclistSection5 {
    data: Vec<u8>,
    address_size: usize,
    endian: Endian,
}

impl LoclistSection5 {
    pub fn new(data: Vec<u8>, address_size: usize, endian: Endian) -> Result<Self> {
        check_pointer_size(address_size)?;
        Ok(Self {
            data,
            address_size,
            endian,
        })
    }

    /// A reader for one compile unit: `base` is the unit's base address and
    /// `addr` its slice of `.debug_addr`.
    pub fn reader_for<'a>(&'a self, base: u64, addr: AddressSubsection<'a>) -> LoclistReaderV5<'a> {
        LoclistReaderV5 {
            cursor: Cursor::new(&self.data, self.endian).context("debug_loclists"),
            address_size: self.address_size,
            addr,
            initial_base: base,
            base,
            default_location: None,
            state: ReaderState::Reading,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReaderState {
    Reading,
    AtEnd,
}

enum Step<'a> {
    Emit(LoclistEntry<'a>),
    Silent,
    End,
}

pub struct LoclistReaderV5<'a> {
    cursor: Cursor<'a>,
    address_size: usize,
    addr: AddressSubsection<'a>,
    initial_base: u64,
    base: u64,
    default_location: Option<&'a [u8]>,
    state: ReaderState,
}

impl<'a> LoclistReaderV5<'a> {
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The `DW_LLE_default_location` expression seen so far, if any.
    pub fn default_location(&self) -> Option<&'a [u8]> {
        self.default_location
    }

    fn read_expr(&mut self) -> Result<&'a [u8]> {
        let len = self.cursor.read_uleb128()? as usize;
        self.cursor.read_bytes(len)
    }

    fn step(&mut self) -> Result<Step<'a>> {
        let offset = self.cursor.position();
        let opcode = self.cursor.read_u8()?;

        let range = |low_pc: u64, high_pc: u64, expr: &'a [u8]| {
            Step::Emit(LoclistEntry {
                offset,
                low_pc,
                high_pc,
                expr,
                encoding: Some(opcode),
            })
        };

        match opcode {
            DW_LLE_end_of_list => Ok(Step::End),
            DW_LLE_base_addressx => {
                let index = self.cursor.read_uleb128()?;
                self.base = self.addr.get(index)?;
                Ok(Step::Silent)
            }
            DW_LLE_startx_endx => {
                let start = self.cursor.read_uleb128()?;
                let end = self.cursor.read_uleb128()?;
                let expr = self.read_expr()?;
                let low_pc = self.addr.get(start)?;
                let high_pc = self.addr.get(end)?;
                Ok(range(low_pc, high_pc, expr))
            }
            DW_LLE_startx_length => {
                let start = self.cursor.read_uleb128()?;
                let length = self.cursor.read_uleb128()?;
                let expr = self.read_expr()?;
                let low_pc = self.addr.get(start)?;
                Ok(range(low_pc, low_pc.wrapping_add(length), expr))
            }
            DW_LLE_offset_pair => {
                let low = self.cursor.read_uleb128()?;
                let high = self.cursor.read_uleb128()?;
                let expr = self.read_expr()?;
                Ok(range(
                    self.base.wrapping_add(low),
                    self.base.wrapping_add(high),
                    expr,
                ))
            }
            DW_LLE_default_location => {
                self.default_location = Some(self.read_expr()?);
                Ok(Step::Silent)
            }
            DW_LLE_base_address => {
                self.base = self.cursor.read_uint(self.address_size)?;
                Ok(Step::Silent)
            }
            DW_LLE_start_end => {
                let low_pc = self.cursor.read_uint(self.address_size)?;
                let high_pc = self.cursor.read_uint(self.address_size)?;
                let expr = self.read_expr()?;
                Ok(range(low_pc, high_pc, expr))
            }
            DW_LLE_start_length => {
                let low_pc = self.cursor.read_uint(self.address_size)?;
                let length = self.cursor.read_uleb128()?;
                let expr = self.read_expr()?;
                Ok(range(low_pc, low_pc.wrapping_add(length), expr))
            }
            _ => Err(Error::UnknownLoclistOpcode { opcode, offset }),
        }
    }
}

impl<'a> LoclistReader<'a> for LoclistReaderV5<'a> {
    fn seek(&mut self, offset: usize) {
        self.cursor.seek(offset);
        self.base = self.initial_base;
        self.default_location = None;
        self.state = ReaderState::Reading;
    }

    fn next_entry(&mut self) -> Result<Option<LoclistEntry<'a>>> {
        while self.state == ReaderState::Reading {
            match self.step() {
                Ok(Step::Emit(entry)) => return Ok(Some(entry)),
                Ok(Step::Silent) => continue,
                Ok(Step::End) => self.state = ReaderState::AtEnd,
                Err(err) => {
                    self.state = ReaderState::AtEnd;
                    return Err(err);
                }
            }
        }
        Ok(None)
    }
}
