use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter, OpKind};

use crate::regnames::Architecture;

/// Maps an address to the symbol containing it and that symbol's address.
pub type SymbolLookup<'a> = dyn Fn(u64) -> Option<(String, u64)> + 'a;

pub trait InstructionDecoder {
    /// Decodes the instruction at the start of `bytes`. The returned length
    /// is at least 1, even when nothing could be decoded.
    fn decode(&self, bytes: &[u8], pc: u64, lookup: &SymbolLookup<'_>) -> (String, u64);
}

pub struct X86Decoder {
    bitness: u32,
}

impl X86Decoder {
    pub fn new(bitness: u32) -> Self {
        Self { bitness }
    }
}

fn branch_target(instruction: &Instruction) -> Option<u64> {
    match instruction.op0_kind() {
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
            Some(instruction.near_branch_target())
        }
        _ if instruction.is_ip_rel_memory_operand() => Some(instruction.ip_rel_memory_address()),
        _ => None,
    }
}

impl InstructionDecoder for X86Decoder {
    fn decode(&self, bytes: &[u8], pc: u64, lookup: &SymbolLookup<'_>) -> (String, u64) {
        let mut decoder = Decoder::with_ip(self.bitness, bytes, pc, DecoderOptions::NONE);
        if !decoder.can_decode() {
            return ("?".to_string(), 1);
        }
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return ("?".to_string(), 1);
        }

        let mut text = String::new();
        let mut formatter = NasmFormatter::new();
        formatter.format(&instruction, &mut text);

        if let Some(target) = branch_target(&instruction) {
            if let Some((name, base)) = lookup(target) {
                let name = rustc_demangle::demangle(&name).to_string();
                if target == base {
                    text.push_str(&format!(" <{name}>"));
                } else {
                    text.push_str(&format!(" <{name}+{:#x}>", target - base));
                }
            }
        }

        (text, instruction.len().max(1) as u64)
    }
}

/// Stand-in for architectures without a decoder: every instruction is
/// assumed to be one fixed-size word.
pub struct FixedWidthPlaceholder;

impl InstructionDecoder for FixedWidthPlaceholder {
    fn decode(&self, _bytes: &[u8], _pc: u64, _lookup: &SymbolLookup<'_>) -> (String, u64) {
        ("?".to_string(), 4)
    }
}

pub fn decoder_for(arch: Architecture) -> Box<dyn InstructionDecoder + Send + Sync> {
    match arch {
        Architecture::Amd64 => Box::new(X86Decoder::new(64)),
        Architecture::I386 => Box::new(X86Decoder::new(32)),
        _ => Box::new(FixedWidthPlaceholder),
    }
}
