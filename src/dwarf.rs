use std::collections::HashMap;

use tracing::{debug, warn};

use crate::addr::{AddressSubsection, AddressTable};
use crate::constants::*;
use crate::cursor::{Cursor, Endian, Format};
use crate::error::{Error, Result};

/// Absolute offset of an entry within `.debug_info`.
pub type DieOffset = u64;

/// Raw bytes of every section the decoders read. Absent sections are empty.
#[derive(Clone, Debug, Default)]
pub struct DebugSections {
    pub info: Vec<u8>,
    pub abbrev: Vec<u8>,
    pub str: Vec<u8>,
    pub line_str: Vec<u8>,
    pub str_offsets: Vec<u8>,
    pub line: Vec<u8>,
    pub addr: Vec<u8>,
    pub ranges: Vec<u8>,
    pub rnglists: Vec<u8>,
    pub loc: Vec<u8>,
    pub loclists: Vec<u8>,
    pub frame: Vec<u8>,
}

impl DebugSections {
    /// Section names without their `.debug_` prefix.
    pub const NAMES: [&'static str; 12] = [
        "info",
        "abbrev",
        "str",
        "line_str",
        "str_offsets",
        "line",
        "addr",
        "ranges",
        "rnglists",
        "loc",
        "loclists",
        "frame",
    ];

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        Some(match name {
            "info" => &mut self.info,
            "abbrev" => &mut self.abbrev,
            "str" => &mut self.str,
            "line_str" => &mut self.line_str,
            "str_offsets" => &mut self.str_offsets,
            "line" => &mut self.line,
            "addr" => &mut self.addr,
            "ranges" => &mut self.ranges,
            "rnglists" => &mut self.rnglists,
            "loc" => &mut self.loc,
            "loclists" => &mut self.loclists,
            "frame" => &mut self.frame,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AttrSpec {
    pub attr: DwarfAttr,
    pub form: DwarfForm,
    pub implicit_const: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct Abbrev {
    pub code: u64,
    pub tag: DwarfTag,
    pub has_children: bool,
    pub attr_specs: Vec<AttrSpec>,
}

/// A decoded attribute value, one arm per attribute class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    Address(u64),
    Unsigned(u64),
    Signed(i64),
    Flag(bool),
    String(String),
    Block(Vec<u8>),
    ExprLoc(Vec<u8>),
    LocListPtr(u64),
    RangeListPtr(u64),
    LinePtr(u64),
    SectionOffset(u64),
    Reference(DieOffset),
    TypeSignature(u64),
    /// A form that can be skipped but whose value lives elsewhere
    /// (supplementary object files).
    Unrecognized { form: DwarfForm, raw: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub attr: DwarfAttr,
    pub form: DwarfForm,
    pub value: AttrValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub offset: DieOffset,
    pub tag: DwarfTag,
    pub has_children: bool,
    /// Index of the owning unit in `Dwarf::units`.
    pub unit: usize,
    pub fields: Vec<Field>,
}

impl Entry {
    fn null(offset: DieOffset, unit: usize) -> Self {
        Self {
            offset,
            tag: DW_TAG_null,
            has_children: false,
            unit,
            fields: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.tag == DW_TAG_null
    }

    pub fn val(&self, attr: DwarfAttr) -> Option<&AttrValue> {
        self.fields
            .iter()
            .find(|field| field.attr == attr)
            .map(|field| &field.value)
    }

    pub fn contains(&self, attr: DwarfAttr) -> bool {
        self.val(attr).is_some()
    }

    pub fn string(&self, attr: DwarfAttr) -> Option<&str> {
        match self.val(attr)? {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.string(DW_AT_name)
    }

    pub fn address(&self, attr: DwarfAttr) -> Option<u64> {
        match self.val(attr)? {
            AttrValue::Address(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn reference(&self, attr: DwarfAttr) -> Option<DieOffset> {
        match self.val(attr)? {
            AttrValue::Reference(off) => Some(*off),
            _ => None,
        }
    }

    /// Every reference-class value in field order.
    pub fn references(&self) -> impl Iterator<Item = DieOffset> + '_ {
        self.fields.iter().filter_map(|field| match field.value {
            AttrValue::Reference(off) => Some(off),
            _ => None,
        })
    }

    pub fn has_range_attrs(&self) -> bool {
        self.fields
            .iter()
            .any(|f| matches!(f.attr, DW_AT_ranges | DW_AT_low_pc | DW_AT_high_pc))
    }
}

#[derive(Clone, Debug)]
pub struct Unit {
    pub index: usize,
    /// Offset of the unit header.
    pub offset: u64,
    /// One past the last byte of the unit.
    pub end: u64,
    pub format: Format,
    pub version: u8,
    pub unit_type: Option<DwarfUnitType>,
    pub address_size: u8,
    pub abbrev_offset: u64,
    pub first_die: DieOffset,
    pub addr_base: u64,
    pub str_offsets_base: u64,
    pub loclists_base: u64,
    pub rnglists_base: u64,
    /// `DW_AT_low_pc` of the root entry, the base for `.debug_ranges`.
    pub base_address: u64,
}

impl Unit {
    pub fn contains(&self, offset: DieOffset) -> bool {
        self.offset <= offset && offset < self.end
    }
}

/// A form's value straight off the wire, before unit bases are applied.
#[derive(Clone, Copy, Debug)]
enum FormValue<'a> {
    Addr(u64),
    AddrIndex(u64),
    Const(u64),
    Signed(i64),
    Flag(bool),
    Inline(&'a [u8]),
    Strp(u64),
    LineStrp(u64),
    StrIndex(u64),
    Block(&'a [u8]),
    Exprloc(&'a [u8]),
    SecOffset(u64),
    UnitRef(u64),
    InfoRef(u64),
    Signature(u64),
    LoclistIndex(u64),
    RnglistIndex(u64),
    Skipped(u64),
}

pub struct Dwarf {
    sections: DebugSections,
    endian: Endian,
    units: Vec<Unit>,
    abbrev_tables: HashMap<u64, HashMap<u64, Abbrev>>,
    addr: Option<AddressTable>,
}

impl Dwarf {
    /// Parses every unit header and abbreviation table. A malformed unit ends
    /// the walk; the units before it stay usable. Unsupported address widths
    /// are rejected outright.
    pub fn new(sections: DebugSections, endian: Endian) -> Result<Self> {
        let addr = match AddressTable::parse(&sections.addr) {
            Ok(table) => table,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(%err, "ignoring malformed .debug_addr");
                None
            }
        };
        let mut dwarf = Self {
            sections,
            endian,
            units: Vec::new(),
            abbrev_tables: HashMap::new(),
            addr,
        };
        dwarf.parse_units()?;
        debug!(units = dwarf.units.len(), "parsed unit headers");
        Ok(dwarf)
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn sections(&self) -> &DebugSections {
        &self.sections
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Option<&Unit> {
        self.units.get(index)
    }

    pub fn address_table(&self) -> Option<&AddressTable> {
        self.addr.as_ref()
    }

    pub fn address_subsection(&self, unit: &Unit) -> AddressSubsection<'_> {
        match &self.addr {
            Some(table) => table.subsection(unit.addr_base),
            None => AddressSubsection::missing(),
        }
    }

    pub fn unit_for_offset(&self, offset: DieOffset) -> Option<&Unit> {
        let idx = self.units.partition_point(|unit| unit.end <= offset);
        self.units.get(idx).filter(|unit| unit.contains(offset))
    }

    pub fn reader(&self) -> EntryReader<'_> {
        EntryReader::new(self)
    }

    pub fn entry_at(&self, offset: DieOffset) -> Result<Entry> {
        let mut rdr = self.reader();
        rdr.seek(offset);
        match rdr.next()? {
            Some(entry) if entry.offset == offset => Ok(entry),
            _ => Err(Error::OffsetNotFound(offset)),
        }
    }

    fn parse_units(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.sections.info.len() {
            let unit = match self.parse_unit_header(offset) {
                Ok(unit) => unit,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(offset, %err, "stopping unit walk");
                    break;
                }
            };

            if !self.abbrev_tables.contains_key(&unit.abbrev_offset) {
                match parse_abbrev_table(&self.sections.abbrev, unit.abbrev_offset as usize) {
                    Ok(table) => {
                        self.abbrev_tables.insert(unit.abbrev_offset, table);
                    }
                    Err(err) => {
                        warn!(offset, abbrev = unit.abbrev_offset, %err, "bad abbreviation table");
                        break;
                    }
                }
            }

            offset = unit.end as usize;
            let index = self.units.len();
            self.units.push(unit);

            if let Err(err) = self.read_unit_bases(index) {
                warn!(unit = index, %err, "could not read unit root entry");
            }
        }
        Ok(())
    }

    fn parse_unit_header(&self, offset: usize) -> Result<Unit> {
        let info = &self.sections.info;
        let mut cur = Cursor::new(info, self.endian).context("debug_info");
        cur.seek(offset);

        let (length, format) = cur.read_initial_length()?;
        let end = (cur.position() as u64)
            .checked_add(length)
            .filter(|&end| end <= info.len() as u64)
            .ok_or_else(|| bad_header(offset, "unit extends past end of section".into()))?;

        let version = cur.read_u16()?;
        let (unit_type, address_size, abbrev_offset) = match version {
            2..=4 => {
                let abbrev_offset = cur.read_offset(format)?;
                (None, cur.read_u8()?, abbrev_offset)
            }
            5 => {
                let unit_type = cur.read_u8()?;
                let address_size = cur.read_u8()?;
                let abbrev_offset = cur.read_offset(format)?;
                match unit_type {
                    DW_UT_skeleton | DW_UT_split_compile => cur.advance(8)?,
                    DW_UT_type | DW_UT_split_type => {
                        cur.advance(8 + format.offset_size())?
                    }
                    _ => {}
                }
                (Some(unit_type), address_size, abbrev_offset)
            }
            other => return Err(bad_header(offset, format!("unsupported version {other}"))),
        };

        if !matches!(address_size, 2 | 4 | 8) {
            return Err(Error::UnsupportedWidth(address_size as usize));
        }

        Ok(Unit {
            index: self.units.len(),
            offset: offset as u64,
            end,
            format,
            version: version as u8,
            unit_type,
            address_size,
            abbrev_offset,
            first_die: cur.position() as u64,
            addr_base: 0,
            str_offsets_base: 0,
            loclists_base: 0,
            rnglists_base: 0,
            base_address: 0,
        })
    }

    /// The `*_base` attributes of the root entry must be known before any
    /// indexed form in the unit can be resolved, the root itself included.
    fn read_unit_bases(&mut self, index: usize) -> Result<()> {
        let unit = &self.units[index];
        let (fields, _, _) = self.read_raw(unit, unit.first_die)?;

        let mut bases = [0u64; 4];
        let mut low_pc = None;
        let mut low_pc_index = None;

        for (spec, value) in &fields {
            match (spec.attr, *value) {
                (DW_AT_addr_base | DW_AT_GNU_addr_base, FormValue::SecOffset(v)) => bases[0] = v,
                (DW_AT_str_offsets_base, FormValue::SecOffset(v)) => bases[1] = v,
                (DW_AT_loclists_base, FormValue::SecOffset(v)) => bases[2] = v,
                (DW_AT_rnglists_base | DW_AT_GNU_ranges_base, FormValue::SecOffset(v)) => {
                    bases[3] = v
                }
                (DW_AT_low_pc, FormValue::Addr(addr)) => low_pc = Some(addr),
                (DW_AT_low_pc, FormValue::AddrIndex(idx)) => low_pc_index = Some(idx),
                _ => {}
            }
        }

        let [addr_base, str_offsets_base, loclists_base, rnglists_base] = bases;
        let unit = &mut self.units[index];
        unit.addr_base = addr_base;
        unit.str_offsets_base = str_offsets_base;
        unit.loclists_base = loclists_base;
        unit.rnglists_base = rnglists_base;

        let base_address = match (low_pc, low_pc_index) {
            (Some(addr), _) => addr,
            (None, Some(idx)) => self.address_subsection(&self.units[index]).get(idx)?,
            (None, None) => 0,
        };
        self.units[index].base_address = base_address;
        Ok(())
    }

    /// Decodes the entry at `offset`, returning it and the offset just past it.
    fn decode_entry(&self, unit: &Unit, offset: DieOffset) -> Result<(Entry, DieOffset)> {
        let (raw, abbrev, next) = self.read_raw(unit, offset)?;
        let Some(abbrev) = abbrev else {
            return Ok((Entry::null(offset, unit.index), next));
        };

        let mut fields = Vec::with_capacity(raw.len());
        for (spec, value) in raw {
            fields.push(Field {
                attr: spec.attr,
                form: spec.form,
                value: self.classify(unit, spec.attr, spec.form, value)?,
            });
        }

        Ok((
            Entry {
                offset,
                tag: abbrev.tag,
                has_children: abbrev.has_children,
                unit: unit.index,
                fields,
            },
            next,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn read_raw<'s>(
        &'s self,
        unit: &Unit,
        offset: DieOffset,
    ) -> Result<(Vec<(&'s AttrSpec, FormValue<'s>)>, Option<&'s Abbrev>, DieOffset)> {
        let data = &self.sections.info[..unit.end as usize];
        let mut cur = Cursor::new(data, self.endian).context("debug_info");
        cur.seek(offset as usize);

        let code = cur.read_uleb128()?;
        if code == 0 {
            return Ok((Vec::new(), None, cur.position() as u64));
        }

        let abbrev = self
            .abbrev_tables
            .get(&unit.abbrev_offset)
            .and_then(|table| table.get(&code))
            .ok_or(Error::UnknownAbbrev {
                code,
                table: unit.abbrev_offset,
            })?;

        let mut fields = Vec::with_capacity(abbrev.attr_specs.len());
        for spec in &abbrev.attr_specs {
            let value = read_form(&mut cur, unit, spec.form, spec.implicit_const)?;
            fields.push((spec, value));
        }

        Ok((fields, Some(abbrev), cur.position() as u64))
    }

    fn classify(
        &self,
        unit: &Unit,
        attr: DwarfAttr,
        form: DwarfForm,
        value: FormValue<'_>,
    ) -> Result<AttrValue> {
        Ok(match value {
            FormValue::Addr(addr) => AttrValue::Address(addr),
            FormValue::AddrIndex(idx) => {
                AttrValue::Address(self.address_subsection(unit).get(idx)?)
            }
            FormValue::Const(v) => {
                let is_ptr = unit.version < 4 && matches!(form, DW_FORM_data4 | DW_FORM_data8);
                match attr {
                    _ if is_ptr && is_location_attr(attr) => AttrValue::LocListPtr(v),
                    DW_AT_ranges if is_ptr => AttrValue::RangeListPtr(v),
                    DW_AT_stmt_list => AttrValue::LinePtr(v),
                    _ => AttrValue::Unsigned(v),
                }
            }
            FormValue::Signed(v) => AttrValue::Signed(v),
            FormValue::Flag(b) => AttrValue::Flag(b),
            FormValue::Inline(bytes) => AttrValue::String(lossy(bytes)),
            FormValue::Strp(off) => AttrValue::String(self.string_at(&self.sections.str, off)?),
            FormValue::LineStrp(off) => {
                AttrValue::String(self.string_at(&self.sections.line_str, off)?)
            }
            FormValue::StrIndex(idx) => {
                let off = self.offset_entry(
                    &self.sections.str_offsets,
                    "debug_str_offsets",
                    unit,
                    unit.str_offsets_base,
                    idx,
                )?;
                AttrValue::String(self.string_at(&self.sections.str, off)?)
            }
            FormValue::Block(bytes) if is_location_attr(attr) && unit.version < 4 => {
                AttrValue::ExprLoc(bytes.to_vec())
            }
            FormValue::Block(bytes) => AttrValue::Block(bytes.to_vec()),
            FormValue::Exprloc(bytes) => AttrValue::ExprLoc(bytes.to_vec()),
            FormValue::SecOffset(off) => match attr {
                _ if is_location_attr(attr) => AttrValue::LocListPtr(off),
                DW_AT_ranges => AttrValue::RangeListPtr(off),
                DW_AT_stmt_list => AttrValue::LinePtr(off),
                _ => AttrValue::SectionOffset(off),
            },
            FormValue::UnitRef(off) => AttrValue::Reference(relative(unit.offset, off)?),
            FormValue::InfoRef(off) => AttrValue::Reference(off),
            FormValue::Signature(sig) => AttrValue::TypeSignature(sig),
            FormValue::LoclistIndex(idx) => {
                let base = unit.loclists_base;
                let rel = self.offset_entry(
                    &self.sections.loclists,
                    "debug_loclists",
                    unit,
                    base,
                    idx,
                )?;
                AttrValue::LocListPtr(relative(base, rel)?)
            }
            FormValue::RnglistIndex(idx) => {
                let base = unit.rnglists_base;
                let rel = self.offset_entry(
                    &self.sections.rnglists,
                    "debug_rnglists",
                    unit,
                    base,
                    idx,
                )?;
                AttrValue::RangeListPtr(relative(base, rel)?)
            }
            FormValue::Skipped(raw) => AttrValue::Unrecognized { form, raw },
        })
    }

    /// Reads entry `index` of an offsets table that starts at `base`.
    fn offset_entry(
        &self,
        section: &[u8],
        name: &'static str,
        unit: &Unit,
        base: u64,
        index: u64,
    ) -> Result<u64> {
        if section.is_empty() {
            return Err(Error::MissingSection(name));
        }
        let size = unit.format.offset_size() as u64;
        let pos = index
            .checked_mul(size)
            .and_then(|off| off.checked_add(base))
            .ok_or(Error::Truncated {
                context: name,
                offset: section.len(),
            })?;
        let mut cur = Cursor::new(section, self.endian).context(name);
        cur.seek(pos as usize);
        cur.read_offset(unit.format)
    }

    fn string_at(&self, section: &[u8], offset: u64) -> Result<String> {
        let mut cur = Cursor::new(section, self.endian).context("debug_str");
        cur.seek(offset as usize);
        Ok(lossy(cur.read_cstr()?))
    }

    /// The `[low, high)` pc ranges of `entry`, from `low_pc`/`high_pc` and
    /// from `DW_AT_ranges`.
    pub fn ranges(&self, entry: &Entry) -> Result<Vec<[u64; 2]>> {
        let mut ranges = Vec::new();
        let unit = self
            .unit(entry.unit)
            .ok_or(Error::NoCompileUnit(entry.offset))?;

        let low = match entry.val(DW_AT_low_pc) {
            Some(AttrValue::Address(addr)) => Some(*addr),
            _ => None,
        };
        if let Some(low) = low {
            let high = match entry.val(DW_AT_high_pc) {
                Some(AttrValue::Address(addr)) => Some(*addr),
                Some(AttrValue::Unsigned(len)) => Some(low.wrapping_add(*len)),
                Some(AttrValue::Signed(len)) => Some(low.wrapping_add(*len as u64)),
                _ => None,
            };
            if let Some(high) = high {
                ranges.push([low, high]);
            }
        }

        if let Some(AttrValue::RangeListPtr(off)) = entry.val(DW_AT_ranges) {
            let base = if entry.tag == DW_TAG_compile_unit {
                low.unwrap_or(unit.base_address)
            } else {
                unit.base_address
            };
            if unit.version < 5 {
                self.debug_ranges(unit, *off, base, &mut ranges)?;
            } else {
                self.debug_rnglists(unit, *off, base, &mut ranges)?;
            }
        }

        Ok(ranges)
    }

    fn debug_ranges(
        &self,
        unit: &Unit,
        offset: u64,
        mut base: u64,
        out: &mut Vec<[u64; 2]>,
    ) -> Result<()> {
        if self.sections.ranges.is_empty() {
            return Err(Error::MissingSection("debug_ranges"));
        }
        let size = unit.address_size as usize;
        let all_ones = if size == 8 { u64::MAX } else { (1u64 << (size * 8)) - 1 };
        let mut cur = Cursor::new(&self.sections.ranges, self.endian).context("debug_ranges");
        cur.seek(offset as usize);

        loop {
            let low = cur.read_uint(size)?;
            let high = cur.read_uint(size)?;
            if low == 0 && high == 0 {
                return Ok(());
            }
            if low == all_ones {
                base = high;
                continue;
            }
            out.push([base.wrapping_add(low), base.wrapping_add(high)]);
        }
    }

    fn debug_rnglists(
        &self,
        unit: &Unit,
        offset: u64,
        mut base: u64,
        out: &mut Vec<[u64; 2]>,
    ) -> Result<()> {
        if self.sections.rnglists.is_empty() {
            return Err(Error::MissingSection("debug_rnglists"));
        }
        let size = unit.address_size as usize;
        let addrs = self.address_subsection(unit);
        let mut cur =
            Cursor::new(&self.sections.rnglists, self.endian).context("debug_rnglists");
        cur.seek(offset as usize);

        loop {
            let at = cur.position();
            let opcode = cur.read_u8()?;
            match opcode {
                DW_RLE_end_of_list => return Ok(()),
                DW_RLE_base_addressx => base = addrs.get(cur.read_uleb128()?)?,
                DW_RLE_startx_endx => {
                    let start = addrs.get(cur.read_uleb128()?)?;
                    let end = addrs.get(cur.read_uleb128()?)?;
                    out.push([start, end]);
                }
                DW_RLE_startx_length => {
                    let start = addrs.get(cur.read_uleb128()?)?;
                    let len = cur.read_uleb128()?;
                    out.push([start, start.wrapping_add(len)]);
                }
                DW_RLE_offset_pair => {
                    let low = cur.read_uleb128()?;
                    let high = cur.read_uleb128()?;
                    out.push([base.wrapping_add(low), base.wrapping_add(high)]);
                }
                DW_RLE_base_address => base = cur.read_uint(size)?,
                DW_RLE_start_end => {
                    let start = cur.read_uint(size)?;
                    let end = cur.read_uint(size)?;
                    out.push([start, end]);
                }
                DW_RLE_start_length => {
                    let start = cur.read_uint(size)?;
                    let len = cur.read_uleb128()?;
                    out.push([start, start.wrapping_add(len)]);
                }
                _ => return Err(Error::UnknownRangeListOpcode { opcode, offset: at }),
            }
        }
    }
}

/// Depth-first cursor over `.debug_info`, crossing unit boundaries and
/// yielding the null entries that close each child list.
pub struct EntryReader<'a> {
    dwarf: &'a Dwarf,
    unit: usize,
    pos: DieOffset,
    last_children: bool,
    last_sibling: Option<DieOffset>,
}

impl<'a> EntryReader<'a> {
    fn new(dwarf: &'a Dwarf) -> Self {
        let pos = dwarf.units.first().map_or(0, |unit| unit.first_die);
        Self {
            dwarf,
            unit: 0,
            pos,
            last_children: false,
            last_sibling: None,
        }
    }

    pub fn dwarf(&self) -> &'a Dwarf {
        self.dwarf
    }

    /// Positions the reader at `offset`. Offset 0 means the start of the
    /// section; any other offset must be the start of an entry.
    pub fn seek(&mut self, offset: DieOffset) {
        self.last_children = false;
        self.last_sibling = None;

        if offset == 0 {
            self.unit = 0;
            self.pos = self.dwarf.units.first().map_or(0, |unit| unit.first_die);
            return;
        }

        match self.dwarf.unit_for_offset(offset) {
            Some(unit) => {
                self.unit = unit.index;
                self.pos = offset.max(unit.first_die);
            }
            None => {
                self.unit = self.dwarf.units.len();
                self.pos = offset;
            }
        }
    }

    pub fn next(&mut self) -> Result<Option<Entry>> {
        loop {
            let Some(unit) = self.dwarf.units.get(self.unit) else {
                return Ok(None);
            };
            if self.pos >= unit.end {
                self.unit += 1;
                if let Some(next) = self.dwarf.units.get(self.unit) {
                    self.pos = next.first_die;
                }
                continue;
            }

            let (entry, next) = self.dwarf.decode_entry(unit, self.pos)?;
            self.pos = next;
            self.last_children = entry.has_children;
            self.last_sibling = entry.reference(DW_AT_sibling);
            return Ok(Some(entry));
        }
    }

    /// Skips the children of the entry most recently returned by `next`.
    pub fn skip_children(&mut self) -> Result<()> {
        if !self.last_children {
            return Ok(());
        }

        if let Some(sibling) = self.last_sibling {
            if sibling >= self.pos {
                self.seek(sibling);
                return Ok(());
            }
        }

        while let Some(entry) = self.next()? {
            if entry.is_null() {
                break;
            }
            if entry.has_children {
                self.skip_children()?;
            }
        }
        self.last_children = false;
        Ok(())
    }
}

fn read_form<'a>(
    cur: &mut Cursor<'a>,
    unit: &Unit,
    form: DwarfForm,
    implicit_const: Option<i64>,
) -> Result<FormValue<'a>> {
    let address_size = unit.address_size as usize;
    let format = unit.format;

    Ok(match form {
        DW_FORM_addr => FormValue::Addr(cur.read_uint(address_size)?),
        DW_FORM_addrx | DW_FORM_GNU_addr_index => FormValue::AddrIndex(cur.read_uleb128()?),
        DW_FORM_addrx1 => FormValue::AddrIndex(cur.read_u8()? as u64),
        DW_FORM_addrx2 => FormValue::AddrIndex(cur.read_u16()? as u64),
        DW_FORM_addrx3 => FormValue::AddrIndex(read_u24(cur)?),
        DW_FORM_addrx4 => FormValue::AddrIndex(cur.read_u32()? as u64),

        DW_FORM_data1 => FormValue::Const(cur.read_u8()? as u64),
        DW_FORM_data2 => FormValue::Const(cur.read_u16()? as u64),
        DW_FORM_data4 => FormValue::Const(cur.read_u32()? as u64),
        DW_FORM_data8 => FormValue::Const(cur.read_u64()?),
        DW_FORM_data16 => FormValue::Block(cur.read_bytes(16)?),
        DW_FORM_udata => FormValue::Const(cur.read_uleb128()?),
        DW_FORM_sdata => FormValue::Signed(cur.read_sleb128()?),
        DW_FORM_implicit_const => FormValue::Signed(implicit_const.unwrap_or_default()),

        DW_FORM_flag => FormValue::Flag(cur.read_u8()? != 0),
        DW_FORM_flag_present => FormValue::Flag(true),

        DW_FORM_string => FormValue::Inline(cur.read_cstr()?),
        DW_FORM_strp => FormValue::Strp(cur.read_offset(format)?),
        DW_FORM_line_strp => FormValue::LineStrp(cur.read_offset(format)?),
        DW_FORM_strx | DW_FORM_GNU_str_index => FormValue::StrIndex(cur.read_uleb128()?),
        DW_FORM_strx1 => FormValue::StrIndex(cur.read_u8()? as u64),
        DW_FORM_strx2 => FormValue::StrIndex(cur.read_u16()? as u64),
        DW_FORM_strx3 => FormValue::StrIndex(read_u24(cur)?),
        DW_FORM_strx4 => FormValue::StrIndex(cur.read_u32()? as u64),

        DW_FORM_block1 => {
            let len = cur.read_u8()? as usize;
            FormValue::Block(cur.read_bytes(len)?)
        }
        DW_FORM_block2 => {
            let len = cur.read_u16()? as usize;
            FormValue::Block(cur.read_bytes(len)?)
        }
        DW_FORM_block4 => {
            let len = cur.read_u32()? as usize;
            FormValue::Block(cur.read_bytes(len)?)
        }
        DW_FORM_block => {
            let len = cur.read_uleb128()? as usize;
            FormValue::Block(cur.read_bytes(len)?)
        }
        DW_FORM_exprloc => {
            let len = cur.read_uleb128()? as usize;
            FormValue::Exprloc(cur.read_bytes(len)?)
        }

        DW_FORM_sec_offset => FormValue::SecOffset(cur.read_offset(format)?),
        DW_FORM_loclistx => FormValue::LoclistIndex(cur.read_uleb128()?),
        DW_FORM_rnglistx => FormValue::RnglistIndex(cur.read_uleb128()?),

        DW_FORM_ref1 => FormValue::UnitRef(cur.read_u8()? as u64),
        DW_FORM_ref2 => FormValue::UnitRef(cur.read_u16()? as u64),
        DW_FORM_ref4 => FormValue::UnitRef(cur.read_u32()? as u64),
        DW_FORM_ref8 => FormValue::UnitRef(cur.read_u64()?),
        DW_FORM_ref_udata => FormValue::UnitRef(cur.read_uleb128()?),
        DW_FORM_ref_addr => {
            // DWARF 2 sized these like addresses.
            if unit.version <= 2 {
                FormValue::InfoRef(cur.read_uint(address_size)?)
            } else {
                FormValue::InfoRef(cur.read_offset(format)?)
            }
        }
        DW_FORM_ref_sig8 => FormValue::Signature(cur.read_u64()?),

        DW_FORM_ref_sup4 => FormValue::Skipped(cur.read_u32()? as u64),
        DW_FORM_ref_sup8 => FormValue::Skipped(cur.read_u64()?),
        DW_FORM_strp_sup | DW_FORM_GNU_ref_alt | DW_FORM_GNU_strp_alt => {
            FormValue::Skipped(cur.read_offset(format)?)
        }

        DW_FORM_indirect => {
            let actual = cur.read_uleb128()?;
            // one level only; a chain of indirect forms is malformed
            if actual == DW_FORM_indirect {
                return Err(Error::UnknownForm { form: actual });
            }
            return read_form(cur, unit, actual, implicit_const);
        }

        _ => return Err(Error::UnknownForm { form }),
    })
}

fn relative(base: u64, offset: u64) -> Result<u64> {
    base.checked_add(offset)
        .ok_or(Error::OffsetOverflow { base, offset })
}

fn read_u24(cur: &mut Cursor<'_>) -> Result<u64> {
    let b = cur.read_bytes(3)?;
    Ok(match cur.endian() {
        Endian::Little => b[0] as u64 | (b[1] as u64) << 8 | (b[2] as u64) << 16,
        Endian::Big => (b[0] as u64) << 16 | (b[1] as u64) << 8 | b[2] as u64,
    })
}

fn parse_abbrev_table(data: &[u8], offset: usize) -> Result<HashMap<u64, Abbrev>> {
    let mut table = HashMap::new();
    let mut cur = Cursor::new(data, Endian::Little).context("debug_abbrev");
    cur.seek(offset);

    loop {
        let code = cur.read_uleb128()?;
        if code == 0 {
            break;
        }
        let tag = cur.read_uleb128()?;
        let has_children = cur.read_u8()? != 0;
        let mut attr_specs = Vec::new();
        loop {
            let attr = cur.read_uleb128()?;
            let form = cur.read_uleb128()?;
            if attr == 0 && form == 0 {
                break;
            }
            let implicit_const = if form == DW_FORM_implicit_const {
                Some(cur.read_sleb128()?)
            } else {
                None
            };
            attr_specs.push(AttrSpec {
                attr,
                form,
                implicit_const,
            });
        }
        table.insert(
            code,
            Abbrev {
                code,
                tag,
                has_children,
                attr_specs,
            },
        );
    }
    Ok(table)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn bad_header(offset: usize, reason: String) -> Error {
    Error::BadUnitHeader {
        offset: offset as u64,
        reason,
    }
}
