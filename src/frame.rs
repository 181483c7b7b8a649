//! Call frame information: the CFA opcode stream decoder and the
//! `.debug_frame` CIE/FDE parser that feeds it.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::cursor::{Cursor, Endian, Format};
use crate::error::{Error, Result};
use crate::expr::{self, signed_hex};

/// Names of the three opcodes encoded in the top two bits.
const PRIMARY: [(u8, &str); 3] = [
    (0x1, "DW_CFA_advance_loc"),
    (0x2, "DW_CFA_offset"),
    (0x3, "DW_CFA_restore"),
];

/// Extended opcodes selected by the low six bits when the top two are zero,
/// with their operand signature:
/// `u` ULEB128, `r` ULEB128 register, `s` SLEB128, `1`/`2`/`4` fixed width,
/// `a` address sized, `B` ULEB128-prefixed expression.
const EXTENDED: &[(u8, &str, &str)] = &[
    (0x00, "DW_CFA_nop", ""),
    (0x01, "DW_CFA_set_loc", "a"),
    (0x02, "DW_CFA_advance_loc1", "1"),
    (0x03, "DW_CFA_advance_loc2", "2"),
    (0x04, "DW_CFA_advance_loc4", "4"),
    (0x05, "DW_CFA_offset_extended", "ru"),
    (0x06, "DW_CFA_restore_extended", "r"),
    (0x07, "DW_CFA_undefined", "r"),
    (0x08, "DW_CFA_same_value", "r"),
    (0x09, "DW_CFA_register", "rr"),
    (0x0a, "DW_CFA_remember_state", ""),
    (0x0b, "DW_CFA_restore_state", ""),
    (0x0c, "DW_CFA_def_cfa", "ru"),
    (0x0d, "DW_CFA_def_cfa_register", "r"),
    (0x0e, "DW_CFA_def_cfa_offset", "u"),
    (0x0f, "DW_CFA_def_cfa_expression", "B"),
    (0x10, "DW_CFA_expression", "rB"),
    (0x11, "DW_CFA_offset_extended_sf", "rs"),
    (0x12, "DW_CFA_def_cfa_sf", "rs"),
    (0x13, "DW_CFA_def_cfa_offset_sf", "s"),
    (0x14, "DW_CFA_val_offset", "ru"),
    (0x15, "DW_CFA_val_offset_sf", "rs"),
    (0x16, "DW_CFA_val_expression", "rB"),
    (0x1c, "DW_CFA_lo_user", ""),
    (0x2d, "DW_CFA_GNU_window_save", ""),
    (0x2e, "DW_CFA_GNU_args_size", "u"),
    (0x2f, "DW_CFA_GNU_negative_offset_extended", "ru"),
    (0x3f, "DW_CFA_hi_user", ""),
];

const SET_LOC: u8 = 0x01;
const ADVANCE_LOC1: u8 = 0x02;
const ADVANCE_LOC2: u8 = 0x03;
const ADVANCE_LOC4: u8 = 0x04;

fn extended(low6: u8) -> Option<(&'static str, &'static str)> {
    EXTENDED
        .iter()
        .find(|(code, _, _)| *code == low6)
        .map(|&(_, name, args)| (name, args))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Unsigned(u64),
    Signed(i64),
    Register(u64),
    Expression(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInstruction {
    pub offset: usize,
    pub name: &'static str,
    pub operands: Vec<Operand>,
    /// Running pc after an `advance_loc*` or `set_loc`.
    pub pc: Option<u64>,
    /// An operand ran off the end of the buffer.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStep {
    Instruction(FrameInstruction),
    Unknown { offset: usize, byte: u8 },
}

/// Decoder over one CFA instruction stream.
pub struct FrameInstructions<'a> {
    cursor: Cursor<'a>,
    pc: u64,
    code_alignment: u64,
    address_size: usize,
    done: bool,
}

impl<'a> FrameInstructions<'a> {
    pub fn new(bytes: &'a [u8], start_pc: u64) -> Self {
        Self {
            cursor: Cursor::new(bytes, Endian::Little).context("debug_frame"),
            pc: start_pc,
            code_alignment: 1,
            address_size: 8,
            done: false,
        }
    }

    pub fn code_alignment(mut self, factor: u64) -> Self {
        self.code_alignment = factor;
        self
    }

    pub fn address_size(mut self, size: usize) -> Self {
        self.address_size = size;
        self
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        let pos = self.cursor.position();
        self.cursor = Cursor::new(self.cursor.data(), endian).context("debug_frame");
        self.cursor.seek(pos);
        self
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    fn advance(&mut self, delta: u64) -> u64 {
        self.pc = self
            .pc
            .wrapping_add(delta.wrapping_mul(self.code_alignment));
        self.pc
    }

    pub fn step(&mut self) -> Option<FrameStep> {
        if self.done || self.cursor.is_finished() {
            self.done = true;
            return None;
        }

        let offset = self.cursor.position();
        let opcode = self.cursor.read_u8().ok()?;
        let high2 = opcode >> 6;
        let low6 = opcode & 0x3f;

        if high2 != 0 {
            let name = PRIMARY
                .iter()
                .find(|(code, _)| *code == high2)
                .map(|&(_, name)| name)?;
            let mut insn = FrameInstruction {
                offset,
                name,
                operands: Vec::new(),
                pc: None,
                truncated: false,
            };
            match high2 {
                0x1 => {
                    insn.operands.push(Operand::Unsigned(low6 as u64));
                    insn.pc = Some(self.advance(low6 as u64));
                }
                0x2 => {
                    insn.operands.push(Operand::Register(low6 as u64));
                    match self.cursor.read_uleb128() {
                        Ok(value) => insn.operands.push(Operand::Unsigned(value)),
                        Err(_) => self.truncate(&mut insn),
                    }
                }
                _ => insn.operands.push(Operand::Register(low6 as u64)),
            }
            return Some(FrameStep::Instruction(insn));
        }

        let Some((name, args)) = extended(low6) else {
            return Some(FrameStep::Unknown {
                offset,
                byte: opcode,
            });
        };

        let mut insn = FrameInstruction {
            offset,
            name,
            operands: Vec::new(),
            pc: None,
            truncated: false,
        };

        for arg in args.chars() {
            match self.operand(arg) {
                Ok(operand) => insn.operands.push(operand),
                Err(_) => {
                    self.truncate(&mut insn);
                    return Some(FrameStep::Instruction(insn));
                }
            }
        }

        match (low6, insn.operands.first()) {
            (SET_LOC, Some(&Operand::Unsigned(addr))) => {
                self.pc = addr;
                insn.pc = Some(addr);
            }
            (
                ADVANCE_LOC1 | ADVANCE_LOC2 | ADVANCE_LOC4,
                Some(&Operand::Unsigned(delta)),
            ) => {
                insn.pc = Some(self.advance(delta));
            }
            _ => {}
        }

        Some(FrameStep::Instruction(insn))
    }

    fn truncate(&mut self, insn: &mut FrameInstruction) {
        insn.truncated = true;
        self.done = true;
    }

    fn operand(&mut self, arg: char) -> Result<Operand> {
        Ok(match arg {
            'u' => Operand::Unsigned(self.cursor.read_uleb128()?),
            'r' => Operand::Register(self.cursor.read_uleb128()?),
            's' => Operand::Signed(self.cursor.read_sleb128()?),
            '1' => Operand::Unsigned(self.cursor.read_u8()? as u64),
            '2' => Operand::Unsigned(self.cursor.read_u16()? as u64),
            '4' => Operand::Unsigned(self.cursor.read_u32()? as u64),
            'a' => Operand::Unsigned(self.cursor.read_uint(self.address_size)?),
            'B' => {
                let len = self.cursor.read_uleb128()? as usize;
                Operand::Expression(self.cursor.read_bytes(len)?.to_vec())
            }
            other => unreachable!("bad operand signature {other:?}"),
        })
    }
}

impl Iterator for FrameInstructions<'_> {
    type Item = FrameStep;

    fn next(&mut self) -> Option<FrameStep> {
        self.step()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameOptions {
    pub code_alignment: u64,
    pub address_size: usize,
    pub endian: Endian,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            code_alignment: 1,
            address_size: 8,
            endian: Endian::Little,
        }
    }
}

/// Renders a CFA stream, one tab-indented instruction per line.
pub fn pretty_print(
    bytes: &[u8],
    start_pc: u64,
    options: FrameOptions,
    regname: &dyn Fn(u64) -> String,
) -> String {
    let decoder = FrameInstructions::new(bytes, start_pc)
        .code_alignment(options.code_alignment)
        .address_size(options.address_size)
        .endian(options.endian);

    let mut out = String::from("\t");
    for step in decoder {
        let insn = match step {
            FrameStep::Instruction(insn) => insn,
            FrameStep::Unknown { .. } => {
                out.push_str("\n\t");
                continue;
            }
        };

        out.push_str(insn.name);
        for operand in &insn.operands {
            out.push(' ');
            match operand {
                Operand::Unsigned(v) => out.push_str(&format!("{v:#x}")),
                Operand::Signed(v) => out.push_str(&signed_hex(*v)),
                Operand::Register(r) => out.push_str(&regname(*r)),
                Operand::Expression(block) => {
                    expr::pretty_print(
                        &mut out,
                        block,
                        options.address_size,
                        options.endian,
                        regname,
                    );
                }
            }
        }
        if let Some(pc) = insn.pc {
            out.push_str(&format!(" to {pc:#x}"));
        }
        if insn.truncated {
            out.push_str(" <truncated>");
        }
        out.push_str("\n\t");
    }
    out
}

#[derive(Debug, Clone)]
pub struct CommonInformationEntry {
    pub offset: u64,
    pub version: u8,
    pub augmentation: String,
    pub address_size: u8,
    pub code_alignment: u64,
    pub data_alignment: i64,
    pub return_address_register: u64,
    pub initial_instructions: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FrameDescriptionEntry {
    pub offset: u64,
    pub cie: u64,
    pub begin: u64,
    pub end: u64,
    pub instructions: Vec<u8>,
}

impl FrameDescriptionEntry {
    pub fn range(&self) -> [u64; 2] {
        [self.begin, self.end]
    }
}

/// A CIE followed by the FDEs that share it, in section order.
#[derive(Debug, Clone, Copy)]
pub enum FrameItem<'a> {
    Cie(&'a CommonInformationEntry),
    Fde(&'a FrameDescriptionEntry),
}

pub fn ranges_overlap(a: [u64; 2], b: [u64; 2]) -> bool {
    a[0] <= b[1] && b[0] <= a[1]
}

#[derive(Debug, Clone, Default)]
pub struct DebugFrame {
    cies: BTreeMap<u64, CommonInformationEntry>,
    fdes: Vec<FrameDescriptionEntry>,
    endian: Endian,
    address_size: usize,
}

impl DebugFrame {
    /// Parses every entry of `.debug_frame`. A malformed entry ends the
    /// parse; entries before it are kept.
    pub fn parse(data: &[u8], endian: Endian, address_size: usize) -> Self {
        let mut frame = DebugFrame {
            endian,
            address_size,
            ..Default::default()
        };

        let mut offset = 0usize;
        while offset < data.len() {
            match frame.parse_entry(data, offset) {
                Ok(next) => offset = next,
                Err(err) => {
                    warn!(offset, %err, "stopping .debug_frame parse");
                    break;
                }
            }
        }

        debug!(
            cies = frame.cies.len(),
            fdes = frame.fdes.len(),
            "parsed .debug_frame"
        );
        frame
    }

    fn parse_entry(&mut self, data: &[u8], offset: usize) -> Result<usize> {
        let mut cur = Cursor::new(data, self.endian).context("debug_frame");
        cur.seek(offset);

        let (length, format) = cur.read_initial_length()?;
        let start = cur.position();
        let end = start
            .checked_add(length as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| bad_entry(offset, "entry extends past end of section"))?;

        if length == 0 {
            return Ok(end);
        }

        let mut body = Cursor::new(&data[..end], self.endian).context("debug_frame");
        body.seek(start);

        let id = body.read_offset(format)?;
        let is_cie = match format {
            Format::Dwarf32 => id == u32::MAX as u64,
            Format::Dwarf64 => id == u64::MAX,
        };

        if is_cie {
            let cie = self.parse_cie(&mut body, offset as u64)?;
            self.cies.insert(cie.offset, cie);
        } else {
            let cie_offset = id;
            let cie = self
                .cies
                .get(&cie_offset)
                .ok_or_else(|| bad_entry(offset, "FDE refers to an unknown CIE"))?;
            let address_size = cie.address_size as usize;
            let augmented = cie.augmentation.starts_with('z');

            let begin = body.read_uint(address_size)?;
            let size = body.read_uint(address_size)?;
            if augmented {
                let len = body.read_uleb128()? as usize;
                body.advance(len)?;
            }
            let instructions = body.remaining().to_vec();

            self.fdes.push(FrameDescriptionEntry {
                offset: offset as u64,
                cie: cie_offset,
                begin,
                end: begin.wrapping_add(size),
                instructions,
            });
        }

        Ok(end)
    }

    fn parse_cie(&self, body: &mut Cursor<'_>, offset: u64) -> Result<CommonInformationEntry> {
        let version = body.read_u8()?;
        if !matches!(version, 1 | 3 | 4) {
            return Err(bad_entry(offset as usize, &format!("CIE version {version}")));
        }

        let augmentation = String::from_utf8_lossy(body.read_cstr()?).into_owned();

        let mut address_size = self.address_size as u8;
        if version == 4 {
            address_size = body.read_u8()?;
            let _segment_size = body.read_u8()?;
        }

        let code_alignment = body.read_uleb128()?;
        let data_alignment = body.read_sleb128()?;
        let return_address_register = if version == 1 {
            body.read_u8()? as u64
        } else {
            body.read_uleb128()?
        };

        if augmentation.starts_with('z') {
            let len = body.read_uleb128()? as usize;
            body.advance(len)?;
        }

        Ok(CommonInformationEntry {
            offset,
            version,
            augmentation,
            address_size,
            code_alignment,
            data_alignment,
            return_address_register,
            initial_instructions: body.remaining().to_vec(),
        })
    }

    pub fn cies(&self) -> impl Iterator<Item = &CommonInformationEntry> {
        self.cies.values()
    }

    pub fn fdes(&self) -> &[FrameDescriptionEntry] {
        &self.fdes
    }

    pub fn cie_for(&self, fde: &FrameDescriptionEntry) -> Option<&CommonInformationEntry> {
        self.cies.get(&fde.cie)
    }

    pub fn options_for(&self, cie: &CommonInformationEntry) -> FrameOptions {
        FrameOptions {
            code_alignment: cie.code_alignment,
            address_size: cie.address_size as usize,
            endian: self.endian,
        }
    }

    /// FDEs overlapping any of `ranges`, each run preceded by its CIE.
    pub fn frames_for(&self, ranges: &[[u64; 2]]) -> Vec<FrameItem<'_>> {
        let mut items = Vec::new();
        let mut current_cie = None;

        for fde in &self.fdes {
            if !ranges.iter().any(|&rng| ranges_overlap(rng, fde.range())) {
                continue;
            }
            if current_cie != Some(fde.cie) {
                if let Some(cie) = self.cies.get(&fde.cie) {
                    items.push(FrameItem::Cie(cie));
                }
                current_cie = Some(fde.cie);
            }
            items.push(FrameItem::Fde(fde));
        }

        items
    }
}

fn bad_entry(offset: usize, reason: &str) -> Error {
    Error::BadFrameEntry {
        offset: offset as u64,
        reason: reason.to_string(),
    }
}
