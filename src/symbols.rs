use tracing::{debug, warn};

use crate::constants::*;
use crate::cursor::Cursor;
use crate::dwarf::{AttrValue, DieOffset, Dwarf, Entry};
use crate::error::Result;
use crate::tree::EntryNode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sym {
    pub name: String,
    pub addr: u64,
    /// Offset of the entry the symbol came from.
    pub offset: DieOffset,
}

/// Address-sorted functions and statically placed variables, plus every
/// compile unit entry seen on the way.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Sym>,
    compile_units: Vec<(Entry, Vec<[u64; 2]>)>,
}

impl SymbolTable {
    /// One pass over the top level of every unit, looking inside namespaces.
    /// A decode fault ends the pass; symbols found before it are kept.
    pub fn build(dwarf: &Dwarf) -> Self {
        let mut table = Self::default();
        if let Err(err) = table.collect(dwarf) {
            warn!(%err, "symbol scan stopped early");
        }

        table.symbols.sort_by_key(|sym| sym.addr);
        debug!(
            symbols = table.symbols.len(),
            units = table.compile_units.len(),
            "built symbol table"
        );
        table
    }

    fn collect(&mut self, dwarf: &Dwarf) -> Result<()> {
        let mut rdr = dwarf.reader();

        while let Some(entry) = rdr.next()? {
            match entry.tag {
                DW_TAG_compile_unit => {
                    let ranges = dwarf.ranges(&entry).unwrap_or_default();
                    self.compile_units.push((entry.clone(), ranges));
                }
                DW_TAG_subprogram => {
                    if let (Some(addr), Some(name)) = (entry.address(DW_AT_low_pc), entry.name())
                    {
                        self.symbols.push(Sym {
                            name: name.to_string(),
                            addr,
                            offset: entry.offset,
                        });
                    }
                }
                DW_TAG_variable => {
                    if let Some(sym) = static_variable(dwarf, &entry) {
                        self.symbols.push(sym);
                    }
                }
                _ => {}
            }
            if !matches!(entry.tag, DW_TAG_compile_unit | DW_TAG_namespace) {
                rdr.skip_children()?;
            }
        }
        Ok(())
    }

    pub fn from_symbols(mut symbols: Vec<Sym>) -> Self {
        symbols.sort_by_key(|sym| sym.addr);
        Self {
            symbols,
            compile_units: Vec::new(),
        }
    }

    pub fn symbols(&self) -> &[Sym] {
        &self.symbols
    }

    pub fn compile_units(&self) -> impl Iterator<Item = &Entry> {
        self.compile_units.iter().map(|(entry, _)| entry)
    }

    /// The symbol with the greatest address not above `addr`. Address 0 is
    /// never a match.
    pub fn lookup(&self, addr: u64) -> Option<&Sym> {
        let idx = self.symbols.partition_point(|sym| sym.addr <= addr);
        let sym = self.symbols.get(idx.checked_sub(1)?)?;
        (sym.addr != 0).then_some(sym)
    }

    /// The compile unit a node belongs to: by its first pc when it has
    /// ranges, otherwise the last unit starting before it.
    pub fn find_compile_unit(&self, node: &EntryNode) -> Option<&Entry> {
        if let Some(range) = node.ranges.first() {
            let pc = range[0];
            return self
                .compile_units
                .iter()
                .find(|(_, ranges)| ranges.iter().any(|r| r[0] <= pc && pc < r[1]))
                .map(|(entry, _)| entry);
        }

        self.compile_units
            .iter()
            .take_while(|(entry, _)| entry.offset <= node.entry.offset)
            .last()
            .map(|(entry, _)| entry)
    }

    /// First pc of the compile unit, the base for its relative addresses.
    pub fn compile_unit_base(&self, cu: &Entry) -> u64 {
        self.compile_units
            .iter()
            .find(|(entry, _)| entry.offset == cu.offset)
            .and_then(|(_, ranges)| ranges.first())
            .map_or(0, |r| r[0])
    }
}

/// A variable whose location is exactly `DW_OP_addr <addr>` with an
/// address as wide as the unit's pointers. Anything longer is left out.
fn static_variable(dwarf: &Dwarf, entry: &Entry) -> Option<Sym> {
    let name = entry.name()?;
    let loc = match entry.val(DW_AT_location)? {
        AttrValue::ExprLoc(bytes) | AttrValue::Block(bytes) => bytes,
        _ => return None,
    };
    let (&op, literal) = loc.split_first()?;
    if op != DW_OP_addr {
        return None;
    }

    let width = dwarf.unit(entry.unit)?.address_size as usize;
    if !matches!(literal.len(), 4 | 8) || literal.len() != width {
        return None;
    }
    let addr = Cursor::new(literal, dwarf.endian()).read_uint(width).ok()?;
    Some(Sym {
        name: name.to_string(),
        addr,
        offset: entry.offset,
    })
}
