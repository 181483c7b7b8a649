//! Fault taxonomy for the decoding core.
//!
//! Structural faults end the list or stream being decoded, lookup misses
//! report an unavailable result, and invariant violations mean the loader
//! handed us data no decoder here was built for.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of {context} data at offset {offset:#x}")]
    Truncated { context: &'static str, offset: usize },

    #[error("unsupported DWARF form {form:#x}")]
    UnknownForm { form: u64 },

    #[error("missing abbreviation code {code} in table at {table:#x}")]
    UnknownAbbrev { code: u64, table: u64 },

    #[error("unknown opcode {opcode:#x} at {offset:#x}")]
    UnknownLoclistOpcode { opcode: u8, offset: usize },

    #[error("unknown range list opcode {opcode:#x} at {offset:#x}")]
    UnknownRangeListOpcode { opcode: u8, offset: usize },

    #[error("malformed unit header at {offset:#x}: {reason}")]
    BadUnitHeader { offset: u64, reason: String },

    #[error("offset {offset:#x} from base {base:#x} does not fit in 64 bits")]
    OffsetOverflow { base: u64, offset: u64 },

    #[error("malformed frame entry at {offset:#x}: {reason}")]
    BadFrameEntry { offset: u64, reason: String },

    #[error("{0} section not present")]
    MissingSection(&'static str),

    #[error("address index {index} (base {base:#x}) out of range")]
    AddressIndexOutOfRange { index: u64, base: u64 },

    #[error("no entry at offset {0:#x}")]
    OffsetNotFound(u64),

    #[error("entry at {0:#x} has no code range")]
    NotAFunction(u64),

    #[error("no compile unit owns entry at {0:#x}")]
    NoCompileUnit(u64),

    #[error("pointer size {0} not supported")]
    UnsupportedWidth(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    LookupMiss,
    Invariant,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Truncated { .. }
            | Error::UnknownForm { .. }
            | Error::UnknownAbbrev { .. }
            | Error::UnknownLoclistOpcode { .. }
            | Error::UnknownRangeListOpcode { .. }
            | Error::BadUnitHeader { .. }
            | Error::OffsetOverflow { .. }
            | Error::BadFrameEntry { .. } => ErrorKind::Structural,
            Error::MissingSection(_)
            | Error::AddressIndexOutOfRange { .. }
            | Error::OffsetNotFound(_)
            | Error::NotAFunction(_)
            | Error::NoCompileUnit(_) => ErrorKind::LookupMiss,
            Error::UnsupportedWidth(_) => ErrorKind::Invariant,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Invariant
    }
}
