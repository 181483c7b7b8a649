use std::cell::Cell;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::constants::*;
use crate::cursor::Endian;
use crate::disasm::{decoder_for, InstructionDecoder};
use crate::dwarf::{AttrValue, DebugSections, DieOffset, Dwarf};
use crate::elf::{LoadedBinary, TextSection};
use crate::error::{Error, Result};
use crate::frame::{self, DebugFrame, FrameItem, FrameOptions};
use crate::inline::{collect_inlined_calls, InlinedCall};
use crate::line::{LinePosition, LineCursor, LineProgram, LineRow};
use crate::loclist::{
    apply_base_selection, drain, LoclistEntry, LoclistListing, LoclistReader, LoclistSection2,
    LoclistSection5,
};
use crate::regnames::Architecture;
use crate::scope::{find_scopes_and_loclists, ScopeId};
use crate::symbols::{Sym, SymbolTable};
use crate::tree::{all_compile_units, build_entry_node, count_nodes, EntryNode};
use crate::units::{scan_unit_versions, UnitVersions};

pub const DEFAULT_MAX_TREE_NODES: usize = 10_000;

/// One row of a function's disassembly.
#[derive(Debug, Clone)]
pub struct DisassemblyRow {
    pub file: String,
    pub line: u64,
    pub is_stmt: bool,
    pub prologue_end: bool,
    pub pc: u64,
    pub bytes: Vec<u8>,
    pub text: String,
    /// Another function the instruction refers to.
    pub link: Option<DieOffset>,
    pub scopes: Vec<ScopeId>,
}

impl DisassemblyRow {
    pub fn flags(&self) -> String {
        let mut flags = String::new();
        if self.is_stmt {
            flags.push('S');
        }
        if self.prologue_end {
            flags.push('P');
        }
        flags
    }
}

#[derive(Debug, Clone)]
pub struct Disassembly {
    pub name: Option<String>,
    pub offset: DieOffset,
    pub range: [u64; 2],
    pub rows: Vec<DisassemblyRow>,
}

/// Loaded sections plus the tables built from them once. Every query takes
/// the session lock for its whole duration.
pub struct DebugSession {
    dwarf: Dwarf,
    versions: UnitVersions,
    loc2: Option<LoclistSection2>,
    loc5: Option<LoclistSection5>,
    frame: DebugFrame,
    symbols: SymbolTable,
    text: TextSection,
    architecture: Architecture,
    pointer_size: usize,
    decoder: Box<dyn InstructionDecoder + Send + Sync>,
    max_tree_nodes: usize,
    lock: Mutex<()>,
}

impl DebugSession {
    pub fn new(binary: LoadedBinary) -> Result<Self> {
        let LoadedBinary {
            sections,
            text,
            pointer_size,
            architecture,
            endian,
            ..
        } = binary;
        Self::from_parts(sections, endian, pointer_size, architecture, text)
    }

    /// Builds a session straight from section bytes, with no text to
    /// disassemble.
    pub fn from_sections(sections: DebugSections, endian: Endian, pointer_size: usize) -> Result<Self> {
        Self::from_parts(
            sections,
            endian,
            pointer_size,
            Architecture::Other(0),
            TextSection::default(),
        )
    }

    fn from_parts(
        sections: DebugSections,
        endian: Endian,
        pointer_size: usize,
        architecture: Architecture,
        text: TextSection,
    ) -> Result<Self> {
        let versions = scan_unit_versions(&sections.info);

        let loc2 = if sections.loc.is_empty() {
            None
        } else {
            Some(LoclistSection2::new(sections.loc.clone(), pointer_size, endian)?)
        };
        let loc5 = if sections.loclists.is_empty() {
            None
        } else {
            Some(LoclistSection5::new(sections.loclists.clone(), pointer_size, endian)?)
        };
        let frame = DebugFrame::parse(&sections.frame, endian, pointer_size);

        let dwarf = Dwarf::new(sections, endian)?;
        let symbols = SymbolTable::build(&dwarf);

        info!(
            units = dwarf.units().len(),
            max_version = versions.max_version().unwrap_or(0),
            symbols = symbols.symbols().len(),
            fdes = frame.fdes().len(),
            "debug session ready"
        );

        Ok(Self {
            dwarf,
            versions,
            loc2,
            loc5,
            frame,
            symbols,
            text,
            architecture,
            pointer_size,
            decoder: decoder_for(architecture),
            max_tree_nodes: DEFAULT_MAX_TREE_NODES,
            lock: Mutex::new(()),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let binary = crate::elf::load_binary(path)?;
        Ok(Self::new(binary)?)
    }

    pub fn max_tree_nodes(mut self, limit: usize) -> Self {
        self.max_tree_nodes = limit;
        self
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dwarf(&self) -> &Dwarf {
        &self.dwarf
    }

    pub fn unit_versions(&self) -> &UnitVersions {
        &self.versions
    }

    pub fn debug_frame(&self) -> &DebugFrame {
        &self.frame
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    pub fn text(&self) -> &TextSection {
        &self.text
    }

    pub fn register_name(&self, regnum: u64) -> String {
        self.architecture.register_name(regnum)
    }

    pub fn symbols(&self) -> &[Sym] {
        let _guard = self.guard();
        self.symbols.symbols()
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbols
    }

    /// The entry at `offset` with everything it references, each
    /// referenced entry materialized once. Offset 0 lists every compile
    /// unit.
    pub fn materialize(&self, offset: DieOffset) -> Result<Vec<EntryNode>> {
        let _guard = self.guard();
        let root = offset == 0;
        let mut rdr = self.dwarf.reader();

        let mut nodes = Vec::new();
        let mut stack = vec![offset];
        let mut seen = HashSet::new();

        while let Some(off) = stack.pop() {
            if !seen.insert(off) {
                continue;
            }

            rdr.seek(off);
            let (node, pending) = match build_entry_node(&self.dwarf, &mut rdr) {
                Ok(built) => built,
                Err(err) if nodes.is_empty() => return Err(err),
                Err(err) => {
                    warn!(offset = off, %err, "skipping unreadable reference");
                    continue;
                }
            };
            stack.extend(pending);

            // The top-level listing walks from one unit to the next.
            if root && node.is_compile_unit() {
                match rdr.next() {
                    Ok(Some(next)) if !next.is_null() => stack.push(next.offset),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "unit listing stopped early"),
                }
            }
            nodes.push(node);
        }

        let oversized = count_nodes(&nodes) > self.max_tree_nodes;
        if nodes.len() > 1 && all_compile_units(&nodes) && oversized {
            debug!(nodes = nodes.len(), "dropping compile unit children");
            for node in &mut nodes {
                node.children.clear();
            }
        }

        Ok(nodes)
    }

    /// The single entry at `offset` with its subtree.
    pub fn node_at(&self, offset: DieOffset) -> Result<EntryNode> {
        let _guard = self.guard();
        self.build_node(offset)
    }

    fn build_node(&self, offset: DieOffset) -> Result<EntryNode> {
        let mut rdr = self.dwarf.reader();
        rdr.seek(offset);
        let (node, _) = build_entry_node(&self.dwarf, &mut rdr)?;
        if node.entry.offset != offset || node.entry.is_null() {
            return Err(Error::OffsetNotFound(offset));
        }
        Ok(node)
    }

    /// The location list at `offset`, read in the encoding of the compile
    /// unit `node` belongs to. Every returned range is absolute.
    pub fn loclist(&self, offset: u64, node: &EntryNode) -> Result<LoclistListing<'_>> {
        let _guard = self.guard();
        self.read_loclist(offset, node)
    }

    fn read_loclist(&self, offset: u64, node: &EntryNode) -> Result<LoclistListing<'_>> {
        let cu = self
            .symbols
            .find_compile_unit(node)
            .ok_or(Error::NoCompileUnit(node.entry.offset))?;
        let base = self.symbols.compile_unit_base(cu);
        let unit = self
            .dwarf
            .unit(cu.unit)
            .ok_or(Error::NoCompileUnit(node.entry.offset))?;
        let version = self.versions.get(cu.offset).unwrap_or(unit.version);

        if version >= 5 {
            let section = self
                .loc5
                .as_ref()
                .ok_or(Error::MissingSection("debug_loclists"))?;
            let mut rdr = section.reader_for(base, self.dwarf.address_subsection(unit));
            rdr.seek(offset as usize);
            Ok(drain(&mut rdr))
        } else {
            let section = self
                .loc2
                .as_ref()
                .ok_or(Error::MissingSection("debug_loc"))?;
            let mut rdr = section.reader();
            rdr.seek(offset as usize);
            let mut listing = drain(&mut rdr);
            apply_base_selection(&mut listing.entries, base);
            Ok(listing)
        }
    }

    /// Absolute location list entries of every variable and parameter
    /// inside `node`.
    pub fn loclist_entries(&self, node: &EntryNode) -> Vec<LoclistEntry<'_>> {
        let _guard = self.guard();
        let mut entries = Vec::new();
        self.collect_loclist_entries(node, node, &mut entries);
        entries
    }

    fn collect_loclist_entries<'s>(
        &'s self,
        root: &EntryNode,
        node: &EntryNode,
        out: &mut Vec<LoclistEntry<'s>>,
    ) {
        for child in &node.children {
            if !matches!(
                child.entry.tag,
                DW_TAG_formal_parameter | DW_TAG_variable | DW_TAG_null
            ) {
                self.collect_loclist_entries(root, child, out);
            }

            for field in &child.entry.fields {
                let AttrValue::LocListPtr(offset) = field.value else {
                    continue;
                };
                match self.read_loclist(offset, root) {
                    Ok(listing) => {
                        if let Some(err) = &listing.fault {
                            warn!(offset, %err, "location list ended early");
                        }
                        out.extend(
                            listing
                                .entries
                                .into_iter()
                                .filter(|e| !e.is_base_address_selection()),
                        );
                    }
                    Err(err) => warn!(offset, %err, "could not read location list"),
                }
            }
        }
    }

    /// Renders a CFA instruction stream with this binary's register names.
    pub fn frame_instructions(&self, bytes: &[u8], pc: u64, options: FrameOptions) -> String {
        let _guard = self.guard();
        frame::pretty_print(bytes, pc, options, &|r| self.register_name(r))
    }

    pub fn frames_for(&self, node: &EntryNode) -> Vec<FrameItem<'_>> {
        let _guard = self.guard();
        self.frame.frames_for(&node.ranges)
    }

    pub fn scopes_at(&self, node: &EntryNode, pc: u64, entries: &[LoclistEntry<'_>]) -> Vec<ScopeId> {
        let _guard = self.guard();
        find_scopes_and_loclists(node, pc, entries)
    }

    pub fn inlined_calls(&self, offset: DieOffset) -> Result<Vec<InlinedCall>> {
        let _guard = self.guard();
        collect_inlined_calls(&self.dwarf, offset)
    }

    fn line_rows(&self, node: &EntryNode) -> Vec<(LineRow, String)> {
        let Some(unit) = self.dwarf.unit(node.entry.unit) else {
            return Vec::new();
        };
        let program = match LineProgram::for_unit(&self.dwarf, unit) {
            Ok(Some(program)) => program,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(unit = unit.offset, %err, "could not read line program");
                return Vec::new();
            }
        };
        program
            .rows()
            .map(|row| {
                let file = program
                    .file(row.file_index)
                    .and_then(|f| f.path.file_name())
                    .map_or_else(|| "?".to_string(), |n| n.to_string_lossy().into_owned());
                (row, file)
            })
            .collect()
    }

    /// Disassembles the first range of the function at `offset`.
    pub fn disassemble(&self, offset: DieOffset) -> Result<Disassembly> {
        let _guard = self.guard();
        let node = self.build_node(offset)?;
        let range = *node.ranges.first().ok_or(Error::NotAFunction(offset))?;

        let mut loclist_entries = Vec::new();
        self.collect_loclist_entries(&node, &node, &mut loclist_entries);

        let annotated = self.line_rows(&node);
        let (rows, files): (Vec<LineRow>, Vec<String>) = annotated.into_iter().unzip();
        let mut lines = LineCursor::new(&rows);
        let mut line_valid = lines.seek_pc(range[0]);

        let mut file = "???".to_string();
        let mut line = 0;
        let mut is_stmt = false;
        let mut prologue_end = false;

        let mut out = Vec::new();
        let mut pc = range[0];
        while pc < range[1] {
            let Some(start) = pc
                .checked_sub(self.text.address)
                .map(|i| i as usize)
                .filter(|&i| i < self.text.data.len())
            else {
                warn!(pc, "pc outside of .text");
                break;
            };
            let data = &self.text.data[start..];

            let last_sym: Cell<Option<&Sym>> = Cell::new(None);
            let lookup = |addr: u64| {
                let sym = self.symbols.lookup(addr)?;
                last_sym.set(Some(sym));
                Some((sym.name.clone(), sym.addr))
            };
            let (text, size) = self.decoder.decode(data, pc, &lookup);
            let size = size.max(1);

            if line_valid {
                match lines.advance_to(pc) {
                    LinePosition::Exact { index, row } => {
                        file = files.get(index).cloned().unwrap_or_else(|| "?".into());
                        line = row.line;
                        is_stmt = row.is_stmt;
                        prologue_end = row.prologue_end;
                    }
                    LinePosition::Inside => {
                        is_stmt = false;
                        prologue_end = false;
                    }
                    LinePosition::Lost => line_valid = false,
                }
            }
            if !line_valid {
                file = "?".into();
                line = 0;
                is_stmt = false;
                prologue_end = false;
            }

            let end = (start + size as usize).min(self.text.data.len());
            let link = last_sym
                .get()
                .filter(|sym| sym.offset != node.entry.offset)
                .map(|sym| sym.offset);

            out.push(DisassemblyRow {
                file: file.clone(),
                line,
                is_stmt,
                prologue_end,
                pc,
                bytes: self.text.data[start..end].to_vec(),
                text,
                link,
                scopes: find_scopes_and_loclists(&node, pc, &loclist_entries),
            });
            pc += size;
        }

        Ok(Disassembly {
            name: node.entry.name().map(str::to_string),
            offset,
            range,
            rows: out,
        })
    }
}
