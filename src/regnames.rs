//! DWARF register numbering per architecture.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    I386,
    Amd64,
    Arm64,
    Ppc64,
    Riscv64,
    /// Any other `e_machine` value.
    Other(u16),
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::I386 => write!(f, "i386"),
            Architecture::Amd64 => write!(f, "x86_64"),
            Architecture::Arm64 => write!(f, "aarch64"),
            Architecture::Ppc64 => write!(f, "ppc64"),
            Architecture::Riscv64 => write!(f, "riscv64"),
            Architecture::Other(machine) => write!(f, "machine {machine:#x}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RegisterName {
    dwarf_id: u64,
    name: &'static str,
}

macro_rules! define_registers {
    ($($dwarf:expr => $name:expr),* $(,)?) => {
        &[$(RegisterName { dwarf_id: $dwarf, name: $name }),*]
    };
}

const AMD64: &[RegisterName] = define_registers![
    0 => "rax", 1 => "rdx", 2 => "rcx", 3 => "rbx",
    4 => "rsi", 5 => "rdi", 6 => "rbp", 7 => "rsp",
    8 => "r8", 9 => "r9", 10 => "r10", 11 => "r11",
    12 => "r12", 13 => "r13", 14 => "r14", 15 => "r15",
    16 => "rip",
    49 => "rflags", 50 => "es", 51 => "cs", 52 => "ss",
    53 => "ds", 54 => "fs", 55 => "gs",
    58 => "fs.base", 59 => "gs.base",
];

const I386: &[RegisterName] = define_registers![
    0 => "eax", 1 => "ecx", 2 => "edx", 3 => "ebx",
    4 => "esp", 5 => "ebp", 6 => "esi", 7 => "edi",
    8 => "eip", 9 => "eflags",
];

const ARM64: &[RegisterName] = define_registers![
    29 => "fp", 30 => "lr", 31 => "sp", 32 => "pc",
];

const PPC64: &[RegisterName] = define_registers![
    1 => "sp", 65 => "lr", 66 => "ctr", 67 => "ap", 76 => "xer",
];

const RISCV64: &[RegisterName] = define_registers![
    0 => "zero", 1 => "ra", 2 => "sp", 3 => "gp", 4 => "tp",
    5 => "t0", 6 => "t1", 7 => "t2", 8 => "s0", 9 => "s1",
    10 => "a0", 11 => "a1", 12 => "a2", 13 => "a3",
    14 => "a4", 15 => "a5", 16 => "a6", 17 => "a7",
    18 => "s2", 19 => "s3", 20 => "s4", 21 => "s5",
    22 => "s6", 23 => "s7", 24 => "s8", 25 => "s9",
    26 => "s10", 27 => "s11",
    28 => "t3", 29 => "t4", 30 => "t5", 31 => "t6",
];

/// Numbered register banks, `(first dwarf id, count, prefix)`.
fn banks(arch: Architecture) -> &'static [(u64, u64, &'static str)] {
    match arch {
        Architecture::Amd64 => &[(17, 16, "xmm"), (33, 8, "st"), (41, 8, "mm")],
        Architecture::I386 => &[(11, 8, "st"), (21, 8, "xmm"), (29, 8, "mm")],
        Architecture::Arm64 => &[(0, 29, "x"), (64, 32, "v")],
        Architecture::Ppc64 => &[(0, 32, "r"), (32, 32, "f"), (68, 8, "cr"), (77, 32, "vr")],
        Architecture::Riscv64 => &[(32, 32, "f")],
        Architecture::Other(_) => &[],
    }
}

impl Architecture {
    pub fn from_elf_machine(machine: u16) -> Self {
        match machine {
            3 => Architecture::I386,
            62 => Architecture::Amd64,
            183 => Architecture::Arm64,
            21 => Architecture::Ppc64,
            243 => Architecture::Riscv64,
            other => Architecture::Other(other),
        }
    }

    pub fn pointer_size(self) -> usize {
        match self {
            Architecture::I386 => 4,
            _ => 8,
        }
    }

    fn named(self) -> &'static [RegisterName] {
        match self {
            Architecture::Amd64 => AMD64,
            Architecture::I386 => I386,
            Architecture::Arm64 => ARM64,
            Architecture::Ppc64 => PPC64,
            Architecture::Riscv64 => RISCV64,
            Architecture::Other(_) => &[],
        }
    }

    /// Printable name of DWARF register `regnum`, `r<n>` when unknown.
    pub fn register_name(self, regnum: u64) -> String {
        if let Some(reg) = self.named().iter().find(|r| r.dwarf_id == regnum) {
            return reg.name.to_string();
        }
        for &(first, count, prefix) in banks(self) {
            if (first..first + count).contains(&regnum) {
                return format!("{prefix}{}", regnum - first);
            }
        }
        format!("r{regnum}")
    }
}
