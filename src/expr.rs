//! Textual rendering of DWARF expressions. Expressions are printed, never
//! evaluated.

use std::fmt::Write;

use crate::constants::*;
use crate::cursor::{Cursor, Endian};
use crate::error::Result;

/// Operand layout of a `DW_OP_*` opcode.
#[derive(Clone, Copy)]
enum Operands {
    None,
    Addr,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Uleb,
    Sleb,
    UlebUleb,
    Reg,
    RegSleb,
    Block,
    Expr,
    U32Sleb,
    U8Uleb,
    UlebTyped,
}

fn operands(op: DwarfOp) -> Operands {
    match op {
        DW_OP_addr => Operands::Addr,
        DW_OP_const1u | DW_OP_pick | DW_OP_deref_size | DW_OP_xderef_size => Operands::U8,
        DW_OP_const1s => Operands::I8,
        DW_OP_const2u | DW_OP_call2 => Operands::U16,
        DW_OP_const2s | DW_OP_bra | DW_OP_skip => Operands::I16,
        DW_OP_const4u | DW_OP_call4 | DW_OP_call_ref | DW_OP_GNU_parameter_ref
        | DW_OP_GNU_variable_value => Operands::U32,
        DW_OP_const4s => Operands::I32,
        DW_OP_const8u => Operands::U64,
        DW_OP_const8s => Operands::I64,
        DW_OP_constu | DW_OP_plus_uconst | DW_OP_piece | DW_OP_addrx | DW_OP_constx
        | DW_OP_convert | DW_OP_reinterpret | DW_OP_GNU_convert | DW_OP_GNU_reinterpret
        | DW_OP_GNU_addr_index | DW_OP_GNU_const_index => Operands::Uleb,
        DW_OP_consts | DW_OP_fbreg => Operands::Sleb,
        DW_OP_bit_piece => Operands::UlebUleb,
        DW_OP_regx => Operands::Reg,
        DW_OP_bregx => Operands::RegSleb,
        DW_OP_implicit_value => Operands::Block,
        DW_OP_entry_value | DW_OP_GNU_entry_value => Operands::Expr,
        DW_OP_implicit_pointer | DW_OP_GNU_implicit_pointer => Operands::U32Sleb,
        DW_OP_deref_type | DW_OP_xderef_type | DW_OP_GNU_deref_type => Operands::U8Uleb,
        DW_OP_regval_type | DW_OP_GNU_regval_type => Operands::UlebUleb,
        DW_OP_const_type | DW_OP_GNU_const_type => Operands::UlebTyped,
        _ => Operands::None,
    }
}

pub(crate) fn signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{value:#x}")
    }
}

/// Appends the printed form of `bytes` to `out`, one `DW_OP_*` per
/// space-separated group. A truncated expression ends with `<truncated>`.
pub fn pretty_print(
    out: &mut String,
    bytes: &[u8],
    address_size: usize,
    endian: Endian,
    regname: &dyn Fn(u64) -> String,
) {
    let mut cur = Cursor::new(bytes, endian).context("expression");
    while !cur.is_finished() {
        if print_one(out, &mut cur, address_size, endian, regname).is_err() {
            out.push_str("<truncated>");
            return;
        }
        if !cur.is_finished() {
            out.push(' ');
        }
    }
}

/// Convenience wrapper returning a fresh string.
pub fn to_string(
    bytes: &[u8],
    address_size: usize,
    endian: Endian,
    regname: &dyn Fn(u64) -> String,
) -> String {
    let mut out = String::new();
    pretty_print(&mut out, bytes, address_size, endian, regname);
    out
}

fn print_one(
    out: &mut String,
    cur: &mut Cursor<'_>,
    address_size: usize,
    endian: Endian,
    regname: &dyn Fn(u64) -> String,
) -> Result<()> {
    let op = cur.read_u8()?;

    match op {
        DW_OP_lit0..=DW_OP_lit31 => {
            let _ = write!(out, "DW_OP_lit{}", op - DW_OP_lit0);
            return Ok(());
        }
        DW_OP_reg0..=DW_OP_reg31 => {
            let reg = (op - DW_OP_reg0) as u64;
            let _ = write!(out, "DW_OP_reg{reg}({})", regname(reg));
            return Ok(());
        }
        DW_OP_breg0..=DW_OP_breg31 => {
            let reg = (op - DW_OP_breg0) as u64;
            let offset = cur.read_sleb128()?;
            let _ = write!(out, "DW_OP_breg{reg}({}) {}", regname(reg), signed_hex(offset));
            return Ok(());
        }
        _ => {}
    }

    match op_name(op) {
        Some(name) => out.push_str(name),
        None => {
            // Operand layout unknown, nothing after this can be trusted.
            let _ = write!(out, "DW_OP_{op:#x}");
            cur.seek(cur.data().len());
            return Ok(());
        }
    }

    match operands(op) {
        Operands::None => {}
        Operands::Addr => {
            let _ = write!(out, " {:#x}", cur.read_uint(address_size)?);
        }
        Operands::U8 => {
            let _ = write!(out, " {:#x}", cur.read_u8()?);
        }
        Operands::I8 => {
            let _ = write!(out, " {}", signed_hex(cur.read_i8()? as i64));
        }
        Operands::U16 => {
            let _ = write!(out, " {:#x}", cur.read_u16()?);
        }
        Operands::I16 => {
            let _ = write!(out, " {}", signed_hex(cur.read_u16()? as i16 as i64));
        }
        Operands::U32 => {
            let _ = write!(out, " {:#x}", cur.read_u32()?);
        }
        Operands::I32 => {
            let _ = write!(out, " {}", signed_hex(cur.read_u32()? as i32 as i64));
        }
        Operands::U64 => {
            let _ = write!(out, " {:#x}", cur.read_u64()?);
        }
        Operands::I64 => {
            let _ = write!(out, " {}", signed_hex(cur.read_u64()? as i64));
        }
        Operands::Uleb => {
            let _ = write!(out, " {:#x}", cur.read_uleb128()?);
        }
        Operands::Sleb => {
            let _ = write!(out, " {}", signed_hex(cur.read_sleb128()?));
        }
        Operands::UlebUleb => {
            let a = cur.read_uleb128()?;
            let b = cur.read_uleb128()?;
            let _ = write!(out, " {a:#x} {b:#x}");
        }
        Operands::Reg => {
            let reg = cur.read_uleb128()?;
            let _ = write!(out, " {reg:#x}({})", regname(reg));
        }
        Operands::RegSleb => {
            let reg = cur.read_uleb128()?;
            let offset = cur.read_sleb128()?;
            let _ = write!(out, " {reg:#x}({}) {}", regname(reg), signed_hex(offset));
        }
        Operands::Block => {
            let len = cur.read_uleb128()? as usize;
            let block = cur.read_bytes(len)?;
            let _ = write!(out, " {block:02x?}");
        }
        Operands::Expr => {
            let len = cur.read_uleb128()? as usize;
            let inner = cur.read_bytes(len)?;
            out.push_str(" [");
            pretty_print(out, inner, address_size, endian, regname);
            out.push(']');
        }
        Operands::U32Sleb => {
            let die = cur.read_u32()?;
            let offset = cur.read_sleb128()?;
            let _ = write!(out, " {die:#x} {}", signed_hex(offset));
        }
        Operands::U8Uleb => {
            let size = cur.read_u8()?;
            let die = cur.read_uleb128()?;
            let _ = write!(out, " {size:#x} {die:#x}");
        }
        Operands::UlebTyped => {
            let die = cur.read_uleb128()?;
            let len = cur.read_u8()? as usize;
            let value = cur.read_bytes(len)?;
            let _ = write!(out, " {die:#x} {value:02x?}");
        }
    }

    Ok(())
}
