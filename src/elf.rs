use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use memmap2::Mmap;
use nix::libc::{Elf32_Ehdr, Elf32_Shdr, Elf64_Ehdr, Elf64_Shdr};
use tracing::{debug, info, warn};

use crate::cursor::{Cursor, Endian};
use crate::dwarf::DebugSections;
use crate::regnames::Architecture;
use crate::utils::FromBytes;

const ELFMAG: &[u8; 4] = b"\x7fELF";
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2MSB: u8 = 2;
const SHF_COMPRESSED: u64 = 0x800;
const ELFCOMPRESS_ZLIB: u32 = 1;
const SHT_NOBITS: u32 = 8;

/// `.text` contents and where they are loaded.
#[derive(Debug, Clone, Default)]
pub struct TextSection {
    pub address: u64,
    pub data: Vec<u8>,
}

/// Everything the decoders need from an executable.
#[derive(Debug, Clone)]
pub struct LoadedBinary {
    pub path: PathBuf,
    pub sections: DebugSections,
    pub text: TextSection,
    pub pointer_size: usize,
    pub architecture: Architecture,
    pub endian: Endian,
}

/// Section header fields, already converted to host byte order.
#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    name: u32,
    kind: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
}

struct ElfHeader {
    machine: u16,
    shoff: u64,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

pub struct Elf {
    pub path: PathBuf,
    pub mmap: Mmap,
    pub is_64: bool,
    pub endian: Endian,
    pub machine: u16,
    section_headers: Vec<SectionHeader>,
    section_map: HashMap<String, usize>,
}

/// Header fields are copied raw; this puts them in host order.
trait FromFileOrder: Sized {
    fn to_host(self, endian: Endian) -> Self;
}

macro_rules! impl_from_file_order {
    ($($ty:ty),*) => {
        $(
            impl FromFileOrder for $ty {
                fn to_host(self, endian: Endian) -> Self {
                    match endian {
                        Endian::Little => <$ty>::from_le(self),
                        Endian::Big => <$ty>::from_be(self),
                    }
                }
            }
        )*
    };
}

impl_from_file_order!(u16, u32, u64);

macro_rules! from_file {
    ($endian:expr, $value:expr) => {
        FromFileOrder::to_host($value, $endian)
    };
}

impl Elf {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(&path_buf)
            .with_context(|| format!("Could not open {}", path_buf.display()))?;

        // SAFETY: the file is mapped read-only and not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        check_magic(&mmap)?;

        let is_64 = match mmap.get(4) {
            Some(&ELFCLASS32) => false,
            Some(&ELFCLASS64) => true,
            other => bail!("Unknown ELF class {:?}", other),
        };
        let endian = if mmap.get(5) == Some(&ELFDATA2MSB) {
            Endian::Big
        } else {
            Endian::Little
        };

        let mut elf = Self {
            path: path_buf,
            mmap,
            is_64,
            endian,
            machine: 0,
            section_headers: Vec::new(),
            section_map: HashMap::new(),
        };
        let header = elf.read_header()?;
        elf.machine = header.machine;
        elf.parse_section_headers(&header)?;
        elf.build_section_map(&header);
        Ok(elf)
    }

    fn read_header(&self) -> Result<ElfHeader> {
        let e = self.endian;
        if self.is_64 {
            let hdr = Elf64_Ehdr::from_bytes(&self.mmap).context("File too small for ELF header")?;
            Ok(ElfHeader {
                machine: from_file!(e, hdr.e_machine),
                shoff: from_file!(e, hdr.e_shoff),
                shentsize: from_file!(e, hdr.e_shentsize),
                shnum: from_file!(e, hdr.e_shnum),
                shstrndx: from_file!(e, hdr.e_shstrndx),
            })
        } else {
            let hdr = Elf32_Ehdr::from_bytes(&self.mmap).context("File too small for ELF header")?;
            Ok(ElfHeader {
                machine: from_file!(e, hdr.e_machine),
                shoff: from_file!(e, hdr.e_shoff) as u64,
                shentsize: from_file!(e, hdr.e_shentsize),
                shnum: from_file!(e, hdr.e_shnum),
                shstrndx: from_file!(e, hdr.e_shstrndx),
            })
        }
    }

    fn section_header_at(&self, pos: usize) -> Result<SectionHeader> {
        let bytes = self
            .mmap
            .get(pos..)
            .context("Section header outside of file")?;
        let e = self.endian;
        if self.is_64 {
            let sh = Elf64_Shdr::from_bytes(bytes)?;
            Ok(SectionHeader {
                name: from_file!(e, sh.sh_name),
                kind: from_file!(e, sh.sh_type),
                flags: from_file!(e, sh.sh_flags),
                addr: from_file!(e, sh.sh_addr),
                offset: from_file!(e, sh.sh_offset),
                size: from_file!(e, sh.sh_size),
            })
        } else {
            let sh = Elf32_Shdr::from_bytes(bytes)?;
            Ok(SectionHeader {
                name: from_file!(e, sh.sh_name),
                kind: from_file!(e, sh.sh_type),
                flags: from_file!(e, sh.sh_flags) as u64,
                addr: from_file!(e, sh.sh_addr) as u64,
                offset: from_file!(e, sh.sh_offset) as u64,
                size: from_file!(e, sh.sh_size) as u64,
            })
        }
    }

    fn parse_section_headers(&mut self, header: &ElfHeader) -> Result<()> {
        let shoff = header.shoff as usize;
        let entsize = header.shentsize as usize;
        let mut count = header.shnum as usize;

        let expected = if self.is_64 {
            std::mem::size_of::<Elf64_Shdr>()
        } else {
            std::mem::size_of::<Elf32_Shdr>()
        };

        if count == 0 && entsize != 0 && shoff != 0 {
            // ELF extension: section header count stored in sh_size of first header
            count = self.section_header_at(shoff)?.size as usize;
        }

        if count == 0 || entsize != expected {
            bail!("Invalid section header count or size");
        }

        self.section_headers = (0..count)
            .map(|i| self.section_header_at(shoff + i * entsize))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn section_name(&self, shstrndx: usize, section: &SectionHeader) -> Option<&str> {
        let strtab = self.section_headers.get(shstrndx)?;
        let start = strtab.offset as usize + section.name as usize;
        let bytes = self.mmap.get(start..)?;
        let end = bytes.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&bytes[..end]).ok()
    }

    fn build_section_map(&mut self, header: &ElfHeader) {
        let shstrndx = header.shstrndx as usize;
        let names: Vec<(String, usize)> = self
            .section_headers
            .iter()
            .enumerate()
            .filter_map(|(i, section)| {
                self.section_name(shstrndx, section)
                    .map(|name| (name.to_string(), i))
            })
            .collect();
        self.section_map.extend(names);
    }

    fn get_section(&self, name: &str) -> Option<&SectionHeader> {
        self.section_map
            .get(name)
            .and_then(|&i| self.section_headers.get(i))
    }

    pub fn section_address(&self, name: &str) -> Option<u64> {
        self.get_section(name).map(|sect| sect.addr)
    }

    pub fn get_section_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let section = self.get_section(name)?;
        if section.kind == SHT_NOBITS {
            return Some(Vec::new());
        }
        let offset = section.offset as usize;
        let size = section.size as usize;
        let raw = self.mmap.get(offset..offset.checked_add(size)?)?;
        if section.flags & SHF_COMPRESSED == 0 {
            return Some(raw.to_vec());
        }
        match decompress_section(raw, self.is_64, self.endian) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(section = name, "{:#}", err);
                None
            }
        }
    }

    pub fn architecture(&self) -> Architecture {
        Architecture::from_elf_machine(self.machine)
    }

    /// Copies out the debug sections and `.text`.
    pub fn load(&self) -> Result<LoadedBinary> {
        let mut sections = DebugSections::default();
        for name in DebugSections::NAMES {
            let full = format!(".debug_{name}");
            if let (Some(bytes), Some(slot)) = (self.get_section_bytes(&full), sections.slot_mut(name)) {
                debug!(section = %full, size = bytes.len(), "loaded section");
                *slot = bytes;
            }
        }

        let text = match (self.section_address(".text"), self.get_section_bytes(".text")) {
            (Some(address), Some(data)) => TextSection { address, data },
            _ => bail!("text section not found"),
        };

        let architecture = self.architecture();
        if let Architecture::Other(machine) = architecture {
            warn!(machine, "unknown machine");
        }
        let pointer_size = if self.is_64 { 8 } else { 4 };

        info!(
            path = %self.path.display(),
            arch = %architecture,
            info_size = sections.info.len(),
            "loaded ELF executable"
        );

        Ok(LoadedBinary {
            path: self.path.clone(),
            sections,
            text,
            pointer_size,
            architecture,
            endian: self.endian,
        })
    }
}

/// Inflates an `SHF_COMPRESSED` section: an `Elf32_Chdr`/`Elf64_Chdr`
/// followed by a zlib stream.
pub fn decompress_section(data: &[u8], is_64: bool, endian: Endian) -> Result<Vec<u8>> {
    let mut cur = Cursor::new(data, endian).context("compression header");
    let kind = cur.read_u32()?;
    let size = if is_64 {
        let _reserved = cur.read_u32()?;
        let size = cur.read_u64()?;
        let _align = cur.read_u64()?;
        size
    } else {
        let size = cur.read_u32()? as u64;
        let _align = cur.read_u32()?;
        size
    };
    if kind != ELFCOMPRESS_ZLIB {
        bail!("unsupported compression type {}", kind);
    }

    let mut out = Vec::with_capacity(size.min(data.len() as u64 * 16) as usize);
    ZlibDecoder::new(cur.remaining())
        .read_to_end(&mut out)
        .with_context(|| "Failed to inflate section")?;
    if out.len() as u64 != size {
        bail!("inflated {} bytes, header says {}", out.len(), size);
    }
    Ok(out)
}

fn check_magic(data: &[u8]) -> Result<()> {
    if data.starts_with(ELFMAG) {
        return Ok(());
    }
    if data.starts_with(b"MZ") {
        bail!("PE executables are not supported");
    }
    let macho = [
        [0xfe, 0xed, 0xfa, 0xce],
        [0xfe, 0xed, 0xfa, 0xcf],
        [0xce, 0xfa, 0xed, 0xfe],
        [0xcf, 0xfa, 0xed, 0xfe],
    ];
    if macho.iter().any(|magic| data.starts_with(magic)) {
        bail!("Mach-O executables are not supported");
    }
    bail!("Not an ELF file")
}

pub fn load_binary(path: impl AsRef<Path>) -> Result<LoadedBinary> {
    Elf::new(path)?.load()
}
