// DWARF constants keep their standard spelling (`DW_AT_low_pc`).
#![allow(non_upper_case_globals)]

pub mod addr;
pub mod commands;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod disasm;
pub mod dwarf;
pub mod elf;
pub mod error;
pub mod expr;
pub mod frame;
pub mod inline;
pub mod line;
pub mod logging;
pub mod loclist;
pub mod regnames;
pub mod render;
pub mod scope;
pub mod session;
pub mod symbols;
pub mod tree;
pub mod units;
pub mod utils;

pub use error::{Error, ErrorKind, Result};
pub use session::DebugSession;
