#![allow(dead_code)]

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

/// Little-endian byte buffer for hand-assembling debug sections.
#[derive(Default, Clone)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn uleb(&mut self, mut v: u64) -> &mut Self {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.0.push(byte);
                return self;
            }
            self.0.push(byte | 0x80);
        }
    }

    pub fn sleb(&mut self, mut v: i64) -> &mut Self {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
            if done {
                self.0.push(byte);
                return self;
            }
            self.0.push(byte | 0x80);
        }
    }

    pub fn cstr(&mut self, s: &str) -> &mut Self {
        self.0.extend_from_slice(s.as_bytes());
        self.0.push(0);
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.0.extend_from_slice(b);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.0.clone()
    }
}

/// Prefixes `body` with a 32-bit initial length.
pub fn with_length(body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

/// Size of a DWARF32 version 4 unit header.
pub const V4_HEADER: usize = 11;
/// Size of a DWARF32 version 5 compile unit header.
pub const V5_HEADER: usize = 12;

/// A DWARF32 version 4 unit around `dies`, using the abbreviation table at 0.
pub fn unit_v4(dies: &[u8]) -> Vec<u8> {
    let mut body = Bytes::new();
    body.u16(4).u32(0).u8(8).bytes(dies);
    with_length(&body.0)
}

/// A DWARF32 version 5 compile unit around `dies`.
pub fn unit_v5(abbrev_offset: u32, dies: &[u8]) -> Vec<u8> {
    let mut body = Bytes::new();
    body.u16(5).u8(0x01).u8(8).u32(abbrev_offset).bytes(dies);
    with_length(&body.0)
}

pub struct AbbrevDecl<'a> {
    pub code: u64,
    pub tag: u64,
    pub children: bool,
    pub attrs: &'a [(u64, u64)],
}

pub fn abbrev_table(decls: &[AbbrevDecl<'_>]) -> Vec<u8> {
    let mut b = Bytes::new();
    for decl in decls {
        b.uleb(decl.code).uleb(decl.tag).u8(decl.children as u8);
        for &(attr, form) in decl.attrs {
            b.uleb(attr).uleb(form);
        }
        b.u8(0).u8(0);
    }
    b.u8(0);
    b.0
}

/// Compiles a Rust source file from test_programs/ with debug info.
pub fn compile_test_program(source: &str, output_name: &str) -> Result<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let source_path = manifest_dir.join("test_programs").join(source);
    let out_dir = manifest_dir.join("target").join("test_bins");
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let output_path = out_dir.join(output_name);

    let status = Command::new("rustc")
        .current_dir(&manifest_dir)
        .args([
            OsStr::new("-g"),
            OsStr::new("-C"),
            OsStr::new("opt-level=0"),
            source_path.as_os_str(),
            OsStr::new("-o"),
            output_path.as_os_str(),
        ])
        .status()
        .with_context(|| "Failed to spawn rustc")?;

    if !status.success() {
        anyhow::bail!("rustc returned status {status}");
    }

    Ok(output_path)
}
