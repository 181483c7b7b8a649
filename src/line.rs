use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::*;
use crate::cursor::{Cursor, Format};
use crate::dwarf::{AttrValue, Dwarf, Unit};
use crate::error::{Error, Result};

// Line table opcodes
const DW_LNS_COPY: u8 = 0x01;
const DW_LNS_ADVANCE_PC: u8 = 0x02;
const DW_LNS_ADVANCE_LINE: u8 = 0x03;
const DW_LNS_SET_FILE: u8 = 0x04;
const DW_LNS_SET_COLUMN: u8 = 0x05;
const DW_LNS_NEGATE_STMT: u8 = 0x06;
const DW_LNS_SET_BASIC_BLOCK: u8 = 0x07;
const DW_LNS_CONST_ADD_PC: u8 = 0x08;
const DW_LNS_FIXED_ADVANCE_PC: u8 = 0x09;
const DW_LNS_SET_PROLOGUE_END: u8 = 0x0a;
const DW_LNS_SET_EPILOGUE_BEGIN: u8 = 0x0b;
const DW_LNS_SET_ISA: u8 = 0x0c;

const DW_LNE_END_SEQUENCE: u8 = 0x01;
const DW_LNE_SET_ADDRESS: u8 = 0x02;
const DW_LNE_DEFINE_FILE: u8 = 0x03;
const DW_LNE_SET_DISCRIMINATOR: u8 = 0x04;

// v5 entry format content types
const DW_LNCT_PATH: u64 = 0x1;
const DW_LNCT_DIRECTORY_INDEX: u64 = 0x2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineFile {
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub file_index: u64,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub basic_block_start: bool,
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub discriminator: u64,
}

impl LineRow {
    fn new(default_is_stmt: bool) -> Self {
        Self {
            address: 0,
            file_index: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block_start: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            discriminator: 0,
        }
    }
}

/// A parsed line-number program header plus the bytes of its opcode stream.
#[derive(Clone, Debug)]
pub struct LineProgram<'a> {
    version: u16,
    min_inst_length: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    standard_opcode_lengths: Vec<u8>,
    include_directories: Vec<PathBuf>,
    files: Vec<LineFile>,
    program: Cursor<'a>,
}

impl<'a> LineProgram<'a> {
    /// The program named by the root entry's `DW_AT_stmt_list`, if any.
    pub fn for_unit(dwarf: &'a Dwarf, unit: &Unit) -> Result<Option<Self>> {
        let root = dwarf.entry_at(unit.first_die)?;
        let offset = match root.val(DW_AT_stmt_list) {
            Some(AttrValue::LinePtr(off)) => *off,
            _ => return Ok(None),
        };
        let comp_dir = root.string(DW_AT_comp_dir).map(PathBuf::from);
        Self::parse(dwarf, offset as usize, comp_dir).map(Some)
    }

    pub fn parse(dwarf: &'a Dwarf, offset: usize, comp_dir: Option<PathBuf>) -> Result<Self> {
        let data = &dwarf.sections().line;
        if data.is_empty() {
            return Err(Error::MissingSection("debug_line"));
        }

        let mut cursor = Cursor::new(data, dwarf.endian()).context("debug_line");
        cursor.seek(offset);
        let (unit_length, format) = cursor.read_initial_length()?;
        let unit_end = cursor
            .position()
            .checked_add(unit_length as usize)
            .filter(|&end| end <= data.len())
            .ok_or(Error::Truncated {
                context: "debug_line",
                offset,
            })?;

        let version = cursor.read_u16()?;
        if !(2..=5).contains(&version) {
            return Err(Error::BadUnitHeader {
                offset: offset as u64,
                reason: format!("line table version {version}"),
            });
        }
        if version >= 5 {
            let _address_size = cursor.read_u8()?;
            let _segment_selector_size = cursor.read_u8()?;
        }

        let header_length = cursor.read_offset(format)? as usize;
        let header_end = cursor
            .position()
            .checked_add(header_length)
            .filter(|&end| end <= unit_end)
            .ok_or(Error::Truncated {
                context: "debug_line",
                offset,
            })?;

        let min_inst_length = cursor.read_u8()?;
        if version >= 4 {
            let _maximum_operations_per_instruction = cursor.read_u8()?;
        }
        let default_is_stmt = cursor.read_u8()? != 0;
        let line_base = cursor.read_i8()?;
        let line_range = cursor.read_u8()?;
        let opcode_base = cursor.read_u8()?;
        if line_range == 0 {
            return Err(Error::BadUnitHeader {
                offset: offset as u64,
                reason: "line_range of zero".into(),
            });
        }

        let standard_opcode_lengths = cursor
            .read_bytes(opcode_base.saturating_sub(1) as usize)?
            .to_vec();

        let comp_dir = comp_dir.unwrap_or_default();
        let (include_directories, files) = if version >= 5 {
            read_v5_tables(dwarf, &mut cursor, format)?
        } else {
            read_legacy_tables(&mut cursor, header_end, &comp_dir)?
        };

        let mut program = Cursor::new(&data[..unit_end], dwarf.endian()).context("debug_line");
        program.seek(header_end);

        debug!(
            offset,
            version,
            files = files.len(),
            "parsed line program header"
        );

        Ok(Self {
            version,
            min_inst_length,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            standard_opcode_lengths,
            include_directories,
            files,
            program,
        })
    }

    pub fn files(&self) -> &[LineFile] {
        &self.files
    }

    /// Resolves a row's file register; version 5 numbers files from zero.
    pub fn file(&self, index: u64) -> Option<&LineFile> {
        let index = if self.version >= 5 {
            index as usize
        } else {
            (index as usize).checked_sub(1)?
        };
        self.files.get(index)
    }

    pub fn rows(&self) -> LineRows<'_, 'a> {
        LineRows {
            table: self,
            cursor: self.program,
            registers: LineRow::new(self.default_is_stmt),
            defined_files: Vec::new(),
            finished: false,
        }
    }
}

fn join_dir(dir: &Path, name: &str) -> PathBuf {
    if name.starts_with('/') {
        PathBuf::from(name)
    } else {
        dir.join(name)
    }
}

fn read_legacy_tables(
    cursor: &mut Cursor<'_>,
    header_end: usize,
    comp_dir: &Path,
) -> Result<(Vec<PathBuf>, Vec<LineFile>)> {
    let mut include_directories = Vec::new();
    while cursor.position() < header_end {
        let dir_bytes = cursor.read_cstr()?;
        if dir_bytes.is_empty() {
            break;
        }
        let dir = String::from_utf8_lossy(dir_bytes);
        include_directories.push(join_dir(comp_dir, &dir));
    }

    let mut files = Vec::new();
    while cursor.position() < header_end {
        if cursor.remaining().first() == Some(&0) {
            cursor.advance(1)?;
            break;
        }
        files.push(read_legacy_file(cursor, &include_directories, comp_dir)?);
    }
    Ok((include_directories, files))
}

fn read_legacy_file(
    cursor: &mut Cursor<'_>,
    include_dirs: &[PathBuf],
    comp_dir: &Path,
) -> Result<LineFile> {
    let name = String::from_utf8_lossy(cursor.read_cstr()?).into_owned();
    let dir_index = cursor.read_uleb128()? as usize;
    let _modification_time = cursor.read_uleb128()?;
    let _file_length = cursor.read_uleb128()?;

    let path = if dir_index == 0 {
        join_dir(comp_dir, &name)
    } else if let Some(dir) = include_dirs.get(dir_index - 1) {
        join_dir(dir, &name)
    } else {
        PathBuf::from(name)
    };

    Ok(LineFile { path })
}

enum LnctValue {
    Text(String),
    Number(u64),
    Other,
}

fn read_lnct_value(
    dwarf: &Dwarf,
    cursor: &mut Cursor<'_>,
    form: DwarfForm,
    format: Format,
) -> Result<LnctValue> {
    let string_at = |section: &[u8], off: u64| -> Result<LnctValue> {
        let mut cur = Cursor::new(section, dwarf.endian()).context("debug_line_str");
        cur.seek(off as usize);
        Ok(LnctValue::Text(
            String::from_utf8_lossy(cur.read_cstr()?).into_owned(),
        ))
    };

    Ok(match form {
        DW_FORM_string => {
            LnctValue::Text(String::from_utf8_lossy(cursor.read_cstr()?).into_owned())
        }
        DW_FORM_line_strp => string_at(&dwarf.sections().line_str, cursor.read_offset(format)?)?,
        DW_FORM_strp => string_at(&dwarf.sections().str, cursor.read_offset(format)?)?,
        DW_FORM_udata => LnctValue::Number(cursor.read_uleb128()?),
        DW_FORM_data1 => LnctValue::Number(cursor.read_u8()? as u64),
        DW_FORM_data2 => LnctValue::Number(cursor.read_u16()? as u64),
        DW_FORM_data4 => LnctValue::Number(cursor.read_u32()? as u64),
        DW_FORM_data8 => LnctValue::Number(cursor.read_u64()?),
        DW_FORM_data16 => {
            cursor.advance(16)?;
            LnctValue::Other
        }
        DW_FORM_block => {
            let len = cursor.read_uleb128()? as usize;
            cursor.advance(len)?;
            LnctValue::Other
        }
        _ => return Err(Error::UnknownForm { form }),
    })
}

type EntryFormat = Vec<(u64, DwarfForm)>;

fn read_entry_format(cursor: &mut Cursor<'_>) -> Result<EntryFormat> {
    let count = cursor.read_u8()?;
    (0..count)
        .map(|_| Ok((cursor.read_uleb128()?, cursor.read_uleb128()?)))
        .collect()
}

fn read_v5_tables(
    dwarf: &Dwarf,
    cursor: &mut Cursor<'_>,
    format: Format,
) -> Result<(Vec<PathBuf>, Vec<LineFile>)> {
    let dir_format = read_entry_format(cursor)?;
    let dir_count = cursor.read_uleb128()?;
    let mut include_directories: Vec<PathBuf> = Vec::new();
    for _ in 0..dir_count {
        let mut path = PathBuf::new();
        for &(content, form) in &dir_format {
            if let (DW_LNCT_PATH, LnctValue::Text(text)) =
                (content, read_lnct_value(dwarf, cursor, form, format)?)
            {
                // Entry 0 is the compilation directory; the rest are
                // relative to it.
                path = match include_directories.first() {
                    Some(comp_dir) => join_dir(comp_dir, &text),
                    None => PathBuf::from(text),
                };
            }
        }
        include_directories.push(path);
    }

    let file_format = read_entry_format(cursor)?;
    let file_count = cursor.read_uleb128()?;
    let mut files = Vec::new();
    for _ in 0..file_count {
        let mut name = String::new();
        let mut dir_index = 0u64;
        for &(content, form) in &file_format {
            match (content, read_lnct_value(dwarf, cursor, form, format)?) {
                (DW_LNCT_PATH, LnctValue::Text(text)) => name = text,
                (DW_LNCT_DIRECTORY_INDEX, LnctValue::Number(n)) => dir_index = n,
                _ => {}
            }
        }
        let path = match include_directories.get(dir_index as usize) {
            Some(dir) => join_dir(dir, &name),
            None => PathBuf::from(name),
        };
        files.push(LineFile { path });
    }

    Ok((include_directories, files))
}

pub struct LineRows<'t, 'a> {
    table: &'t LineProgram<'a>,
    cursor: Cursor<'a>,
    registers: LineRow,
    defined_files: Vec<LineFile>,
    finished: bool,
}

impl LineRows<'_, '_> {
    fn emit(&mut self) -> LineRow {
        let row = self.registers.clone();
        self.registers.basic_block_start = false;
        self.registers.prologue_end = false;
        self.registers.epilogue_begin = false;
        self.registers.discriminator = 0;
        row
    }

    fn advance_address(&mut self, operation_advance: u64) {
        let delta = operation_advance.wrapping_mul(self.table.min_inst_length as u64);
        self.registers.address = self.registers.address.wrapping_add(delta);
    }

    fn execute_standard_opcode(&mut self, opcode: u8) -> Result<bool> {
        match opcode {
            DW_LNS_COPY => return Ok(true),
            DW_LNS_ADVANCE_PC => {
                let advance = self.cursor.read_uleb128()?;
                self.advance_address(advance);
            }
            DW_LNS_ADVANCE_LINE => {
                let advance = self.cursor.read_sleb128()?;
                self.registers.line = (self.registers.line as i64).wrapping_add(advance) as u64;
            }
            DW_LNS_SET_FILE => self.registers.file_index = self.cursor.read_uleb128()?,
            DW_LNS_SET_COLUMN => self.registers.column = self.cursor.read_uleb128()?,
            DW_LNS_NEGATE_STMT => self.registers.is_stmt = !self.registers.is_stmt,
            DW_LNS_SET_BASIC_BLOCK => self.registers.basic_block_start = true,
            DW_LNS_CONST_ADD_PC => {
                let adjust = ((255 - self.table.opcode_base) / self.table.line_range) as u64;
                self.advance_address(adjust);
            }
            DW_LNS_FIXED_ADVANCE_PC => {
                let advance = self.cursor.read_u16()? as u64;
                self.registers.address = self.registers.address.wrapping_add(advance);
            }
            DW_LNS_SET_PROLOGUE_END => self.registers.prologue_end = true,
            DW_LNS_SET_EPILOGUE_BEGIN => self.registers.epilogue_begin = true,
            DW_LNS_SET_ISA => {
                let _ = self.cursor.read_uleb128()?;
            }
            _ => {
                // Opcodes this reader predates: skip their ULEB128 operands.
                let nargs = self
                    .table
                    .standard_opcode_lengths
                    .get(opcode as usize - 1)
                    .copied()
                    .unwrap_or(0);
                for _ in 0..nargs {
                    self.cursor.read_uleb128()?;
                }
            }
        }
        Ok(false)
    }

    fn execute_extended_opcode(&mut self) -> Result<bool> {
        let len = self.cursor.read_uleb128()? as usize;
        let before = self.cursor.position();
        if len == 0 {
            return Ok(false);
        }
        let opcode = self.cursor.read_u8()?;
        let mut emitted = false;
        match opcode {
            DW_LNE_END_SEQUENCE => {
                self.registers.end_sequence = true;
                emitted = true;
            }
            DW_LNE_SET_ADDRESS => {
                self.registers.address = self.cursor.read_uint(len - 1)?;
            }
            DW_LNE_DEFINE_FILE => {
                let file = read_legacy_file(
                    &mut self.cursor,
                    &self.table.include_directories,
                    Path::new(""),
                )?;
                self.defined_files.push(file);
            }
            DW_LNE_SET_DISCRIMINATOR => {
                self.registers.discriminator = self.cursor.read_uleb128()?;
            }
            _ => {}
        }

        let consumed = self.cursor.position() - before;
        if consumed < len {
            self.cursor.advance(len - consumed)?;
        }
        Ok(emitted)
    }

    fn step(&mut self) -> Result<Option<LineRow>> {
        while !self.cursor.is_finished() {
            let opcode = self.cursor.read_u8()?;

            let emitted = if opcode == 0 {
                self.execute_extended_opcode()?
            } else if opcode < self.table.opcode_base {
                self.execute_standard_opcode(opcode)?
            } else {
                let adjusted = opcode - self.table.opcode_base;
                let address_increment = adjusted / self.table.line_range;
                let line_increment = adjusted % self.table.line_range;
                self.advance_address(address_increment as u64);
                self.registers.line = (self.registers.line as i64)
                    .wrapping_add(self.table.line_base as i64 + line_increment as i64)
                    as u64;
                true
            };

            if emitted {
                let row = self.emit();
                if row.end_sequence {
                    self.registers = LineRow::new(self.table.default_is_stmt);
                }
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

impl Iterator for LineRows<'_, '_> {
    type Item = LineRow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(row)) => Some(row),
            Ok(None) | Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}

/// Where a pc falls relative to the rows of a line table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePosition<'r> {
    /// A row starts exactly at the pc.
    Exact { index: usize, row: &'r LineRow },
    /// The pc is inside the current row's range.
    Inside,
    /// The table has no row covering the pc.
    Lost,
}

/// Forward-only walk of the rows of one sequence, used to annotate
/// consecutive instructions.
pub struct LineCursor<'r> {
    rows: &'r [LineRow],
    idx: Option<usize>,
}

impl<'r> LineCursor<'r> {
    pub fn new(rows: &'r [LineRow]) -> Self {
        Self { rows, idx: None }
    }

    /// Positions at the row covering `pc`. Returns false when no sequence
    /// contains it.
    pub fn seek_pc(&mut self, pc: u64) -> bool {
        self.idx = None;
        for (i, pair) in self.rows.windows(2).enumerate() {
            let (row, next) = (&pair[0], &pair[1]);
            if !row.end_sequence && row.address <= pc && pc < next.address {
                self.idx = Some(i);
                return true;
            }
        }
        false
    }

    /// Advances past rows below `pc` and reports how `pc` relates to the
    /// row reached.
    pub fn advance_to(&mut self, pc: u64) -> LinePosition<'r> {
        let Some(mut idx) = self.idx else {
            return LinePosition::Lost;
        };
        while idx < self.rows.len() && self.rows[idx].address < pc {
            idx += 1;
        }
        if idx >= self.rows.len() {
            self.idx = None;
            return LinePosition::Lost;
        }
        self.idx = Some(idx);
        let row = &self.rows[idx];
        if row.address == pc {
            LinePosition::Exact { index: idx, row }
        } else {
            LinePosition::Inside
        }
    }
}
