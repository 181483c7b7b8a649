mod common;

use anyhow::Result;

use common::{abbrev_table, unit_v4, unit_v5, with_length, AbbrevDecl, Bytes, V4_HEADER, V5_HEADER};
use diex::constants::*;
use diex::cursor::Endian;
use diex::dwarf::{AttrValue, DebugSections, DieOffset, Dwarf};
use diex::scope::ScopeId;
use diex::{DebugSession, Error};

/// Offsets of the interesting entries in the version 4 fixture.
struct V4Unit {
    sections: DebugSections,
    cu: DieOffset,
    base_type: DieOffset,
    struct_a: DieOffset,
    struct_b: DieOffset,
    helper: DieOffset,
    main: DieOffset,
    block: DieOffset,
    ranged_block: DieOffset,
    var: DieOffset,
    loc_var: DieOffset,
}

/// One version 4 unit:
///
/// ```text
/// compile_unit "demo" [0x1000, 0x1100)
///   base_type "i32"
///   structure_type "A" -> B
///   structure_type "B" -> A
///   subprogram "helper" (abstract)
///   subprogram "main" [0x1000, 0x1020)
///     lexical_block [0x1008, 0x1010)
///     lexical_block ranges -> .debug_ranges
///     inlined_subroutine helper [0x1010, 0x1018)
///     variable "x" fbreg -16
///     variable "y" loclist -> .debug_loc
/// ```
fn v4_unit() -> V4Unit {
    let abbrev = abbrev_table(&[
        AbbrevDecl {
            code: 1,
            tag: DW_TAG_compile_unit,
            children: true,
            attrs: &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data8),
            ],
        },
        AbbrevDecl {
            code: 2,
            tag: DW_TAG_base_type,
            children: false,
            attrs: &[(DW_AT_name, DW_FORM_string)],
        },
        AbbrevDecl {
            code: 3,
            tag: DW_TAG_subprogram,
            children: true,
            attrs: &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        },
        AbbrevDecl {
            code: 4,
            tag: DW_TAG_lexical_block,
            children: false,
            attrs: &[(DW_AT_low_pc, DW_FORM_addr), (DW_AT_high_pc, DW_FORM_data4)],
        },
        AbbrevDecl {
            code: 5,
            tag: DW_TAG_variable,
            children: false,
            attrs: &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_type, DW_FORM_ref4),
                (DW_AT_location, DW_FORM_exprloc),
            ],
        },
        AbbrevDecl {
            code: 6,
            tag: DW_TAG_structure_type,
            children: false,
            attrs: &[(DW_AT_name, DW_FORM_string), (DW_AT_type, DW_FORM_ref4)],
        },
        AbbrevDecl {
            code: 7,
            tag: DW_TAG_lexical_block,
            children: false,
            attrs: &[(DW_AT_ranges, DW_FORM_sec_offset)],
        },
        AbbrevDecl {
            code: 8,
            tag: DW_TAG_subprogram,
            children: false,
            attrs: &[(DW_AT_name, DW_FORM_string)],
        },
        AbbrevDecl {
            code: 9,
            tag: DW_TAG_inlined_subroutine,
            children: false,
            attrs: &[
                (DW_AT_abstract_origin, DW_FORM_ref4),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        },
        AbbrevDecl {
            code: 10,
            tag: DW_TAG_variable,
            children: false,
            attrs: &[(DW_AT_name, DW_FORM_string), (DW_AT_location, DW_FORM_sec_offset)],
        },
    ]);

    let mut dies = Bytes::new();
    let at = |dies: &Bytes| (V4_HEADER + dies.len()) as DieOffset;

    let cu = at(&dies);
    dies.uleb(1).cstr("demo").u64(0x1000).u64(0x100);

    let base_type = at(&dies);
    dies.uleb(2).cstr("i32");

    let struct_a = at(&dies);
    let struct_b = struct_a + 7;
    dies.uleb(6).cstr("A").u32(struct_b as u32);
    dies.uleb(6).cstr("B").u32(struct_a as u32);

    let helper = at(&dies);
    dies.uleb(8).cstr("helper");

    let main = at(&dies);
    dies.uleb(3).cstr("main").u64(0x1000).u32(0x20);

    let block = at(&dies);
    dies.uleb(4).u64(0x1008).u32(0x8);

    let ranged_block = at(&dies);
    dies.uleb(7).u32(0);

    dies.uleb(9).u32(helper as u32).u64(0x1010).u32(0x8);

    let var = at(&dies);
    dies.uleb(5).cstr("x").u32(base_type as u32).uleb(2).u8(DW_OP_fbreg).sleb(-16);

    let loc_var = at(&dies);
    dies.uleb(10).cstr("y").u32(0);

    // end of main's children, then of the unit's
    dies.u8(0).u8(0);

    let mut ranges = Bytes::new();
    ranges.u64(u64::MAX).u64(0x3000);
    ranges.u64(0x10).u64(0x20);
    ranges.u64(0).u64(0);

    let mut loc = Bytes::new();
    loc.u64(0x0).u64(0x8).u16(1).u8(DW_OP_reg0);
    loc.u64(0).u64(0);

    let sections = DebugSections {
        info: unit_v4(&dies.0),
        abbrev,
        ranges: ranges.build(),
        loc: loc.build(),
        ..Default::default()
    };

    V4Unit {
        sections,
        cu,
        base_type,
        struct_a,
        struct_b,
        helper,
        main,
        block,
        ranged_block,
        var,
        loc_var,
    }
}

#[test]
fn test_v4_entries_and_attribute_classes() -> Result<()> {
    let fx = v4_unit();
    let dwarf = Dwarf::new(fx.sections, Endian::Little)?;

    assert_eq!(dwarf.units().len(), 1);
    assert_eq!(dwarf.units()[0].version, 4);
    assert_eq!(dwarf.units()[0].first_die, fx.cu);

    let cu = dwarf.entry_at(fx.cu)?;
    assert_eq!(cu.tag, DW_TAG_compile_unit);
    assert_eq!(cu.name(), Some("demo"));

    let var = dwarf.entry_at(fx.var)?;
    assert_eq!(var.name(), Some("x"));
    assert_eq!(
        var.val(DW_AT_type),
        Some(&AttrValue::Reference(fx.base_type))
    );
    assert_eq!(
        var.val(DW_AT_location),
        Some(&AttrValue::ExprLoc(vec![DW_OP_fbreg, 0x70]))
    );

    let loc_var = dwarf.entry_at(fx.loc_var)?;
    assert_eq!(loc_var.val(DW_AT_location), Some(&AttrValue::LocListPtr(0)));

    // mid-entry offsets decode as garbage abbreviation codes
    assert!(dwarf.entry_at(fx.var + 1).is_err());
    Ok(())
}

#[test]
fn test_v4_pc_ranges() -> Result<()> {
    let fx = v4_unit();
    let dwarf = Dwarf::new(fx.sections, Endian::Little)?;

    assert_eq!(dwarf.ranges(&dwarf.entry_at(fx.cu)?)?, vec![[0x1000, 0x1100]]);
    assert_eq!(dwarf.ranges(&dwarf.entry_at(fx.main)?)?, vec![[0x1000, 0x1020]]);
    assert_eq!(dwarf.ranges(&dwarf.entry_at(fx.block)?)?, vec![[0x1008, 0x1010]]);
    // base selection in .debug_ranges replaces the unit base
    assert_eq!(
        dwarf.ranges(&dwarf.entry_at(fx.ranged_block)?)?,
        vec![[0x3010, 0x3020]]
    );
    assert!(dwarf.ranges(&dwarf.entry_at(fx.base_type)?)?.is_empty());
    Ok(())
}

#[test]
fn test_symbols_are_sorted_functions() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    let symbols = session.symbols();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "main");
    assert_eq!(symbols[0].addr, 0x1000);
    assert_eq!(symbols[0].offset, fx.main);

    let table = session.symbol_table();
    assert_eq!(table.lookup(0x1010).map(|s| s.name.as_str()), Some("main"));
    assert!(table.lookup(0xfff).is_none());
    assert_eq!(table.compile_units().count(), 1);

    assert_eq!(session.unit_versions().get(fx.cu), Some(4));
    Ok(())
}

#[test]
fn test_materialize_follows_references() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    let nodes = session.materialize(fx.var)?;
    let offsets: Vec<_> = nodes.iter().map(|n| n.offset()).collect();
    assert_eq!(offsets, vec![fx.var, fx.base_type]);
    Ok(())
}

#[test]
fn test_materialize_terminates_on_cycles() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    let nodes = session.materialize(fx.struct_a)?;
    let mut offsets: Vec<_> = nodes.iter().map(|n| n.offset()).collect();
    offsets.sort();
    assert_eq!(offsets, vec![fx.struct_a, fx.struct_b]);
    Ok(())
}

#[test]
fn test_materialize_root_lists_units_shallowly() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    let nodes = session.materialize(0)?;
    assert_eq!(nodes.len(), 1);
    let cu = &nodes[0];
    assert!(cu.is_compile_unit());
    assert_eq!(cu.ranges, vec![[0x1000, 0x1100]]);

    let children: Vec<_> = cu.children.iter().map(|c| c.offset()).collect();
    assert_eq!(
        &children[..5],
        &[fx.base_type, fx.struct_a, fx.struct_b, fx.helper, fx.main]
    );
    // closing null entry
    assert!(cu.children[5].entry.is_null());
    assert!(cu.children.iter().all(|c| c.children.is_empty()));
    Ok(())
}

#[test]
fn test_node_at_rejects_missing_offsets() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    assert!(session.node_at(0x5000).is_err());
    assert!(matches!(
        session.disassemble(fx.base_type),
        Err(Error::NotAFunction(_))
    ));
    Ok(())
}

#[test]
fn test_scopes_at_pc() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;
    let main = session.node_at(fx.main)?;

    assert_eq!(
        session.scopes_at(&main, 0x1009, &[]),
        vec![ScopeId::Block(fx.main), ScopeId::Block(fx.block)]
    );
    assert_eq!(session.scopes_at(&main, 0x1020, &[]), vec![]);
    assert_eq!(
        ScopeId::Block(fx.block).to_string(),
        format!("lb{:x}", fx.block)
    );
    Ok(())
}

#[test]
fn test_v4_loclist_is_rebased_on_unit() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;
    let main = session.node_at(fx.main)?;

    let listing = session.loclist(0, &main)?;
    assert!(listing.fault.is_none());
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(
        (listing.entries[0].low_pc, listing.entries[0].high_pc),
        (0x1000, 0x1008)
    );

    let entries = session.loclist_entries(&main);
    assert_eq!(entries.len(), 1);
    assert_eq!(
        session.scopes_at(&main, 0x1004, &entries),
        vec![ScopeId::Block(fx.main), ScopeId::Loclist(0)]
    );
    Ok(())
}

#[test]
fn test_inlined_calls_name_the_caller() -> Result<()> {
    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    let calls = session.inlined_calls(fx.helper)?;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].fn_name, "main");
    assert_eq!(calls[0].offset, fx.main);

    assert!(session.inlined_calls(fx.main)?.is_empty());
    Ok(())
}

/// A version 5 unit using string and address indices, range lists and
/// location lists.
struct V5Unit {
    sections: DebugSections,
    cu: DieOffset,
    func: DieOffset,
    block: DieOffset,
    var: DieOffset,
}

fn v5_unit() -> V5Unit {
    let abbrev = abbrev_table(&[
        AbbrevDecl {
            code: 1,
            tag: DW_TAG_compile_unit,
            children: true,
            attrs: &[
                (DW_AT_str_offsets_base, DW_FORM_sec_offset),
                (DW_AT_addr_base, DW_FORM_sec_offset),
                (DW_AT_name, DW_FORM_strx1),
                (DW_AT_low_pc, DW_FORM_addrx),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        },
        AbbrevDecl {
            code: 2,
            tag: DW_TAG_subprogram,
            children: true,
            attrs: &[
                (DW_AT_name, DW_FORM_strx1),
                (DW_AT_low_pc, DW_FORM_addrx1),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        },
        AbbrevDecl {
            code: 3,
            tag: DW_TAG_lexical_block,
            children: false,
            attrs: &[(DW_AT_ranges, DW_FORM_sec_offset)],
        },
        AbbrevDecl {
            code: 4,
            tag: DW_TAG_variable,
            children: false,
            attrs: &[(DW_AT_location, DW_FORM_sec_offset)],
        },
    ]);

    let mut dies = Bytes::new();
    let at = |dies: &Bytes| (V5_HEADER + dies.len()) as DieOffset;

    let cu = at(&dies);
    dies.uleb(1).u32(8).u32(8).u8(0).uleb(0).u32(0x40);
    let func = at(&dies);
    dies.uleb(2).u8(1).u8(0).u32(0x10);
    let block = at(&dies);
    dies.uleb(3).u32(12);
    let var = at(&dies);
    dies.uleb(4).u32(12);
    dies.u8(0).u8(0);

    let mut str = Bytes::new();
    str.u8(0).cstr("unit5").cstr("f");

    let mut str_offsets = Bytes::new();
    str_offsets.u16(5).u16(0).u32(1).u32(7);

    let mut addr = Bytes::new();
    addr.u16(5).u8(8).u8(0).u64(0x2000).u64(0x2040);

    let mut rnglists = Bytes::new();
    rnglists.u16(5).u8(8).u8(0).u32(0);
    rnglists.u8(DW_RLE_base_addressx).uleb(0);
    rnglists.u8(DW_RLE_offset_pair).uleb(0x10).uleb(0x20);
    rnglists.u8(DW_RLE_startx_length).uleb(1).uleb(0x8);
    rnglists.u8(DW_RLE_end_of_list);

    let mut loclists = Bytes::new();
    loclists.u16(5).u8(8).u8(0).u32(0);
    loclists.u8(DW_LLE_offset_pair).uleb(0).uleb(0x8).uleb(1).u8(DW_OP_reg0);
    loclists.u8(DW_LLE_base_addressx).uleb(1);
    loclists.u8(DW_LLE_offset_pair).uleb(0).uleb(0x4).uleb(1).u8(DW_OP_reg0 + 1);
    loclists.u8(DW_LLE_end_of_list);

    let sections = DebugSections {
        info: unit_v5(0, &dies.0),
        abbrev,
        str: str.build(),
        str_offsets: with_length(&str_offsets.0),
        addr: with_length(&addr.0),
        rnglists: with_length(&rnglists.0),
        loclists: with_length(&loclists.0),
        ..Default::default()
    };

    V5Unit {
        sections,
        cu,
        func,
        block,
        var,
    }
}

#[test]
fn test_v5_indexed_forms() -> Result<()> {
    let fx = v5_unit();
    let dwarf = Dwarf::new(fx.sections, Endian::Little)?;

    assert_eq!(dwarf.units()[0].version, 5);
    assert_eq!(dwarf.units()[0].first_die, fx.cu);

    let cu = dwarf.entry_at(fx.cu)?;
    assert_eq!(cu.name(), Some("unit5"));
    assert_eq!(cu.address(DW_AT_low_pc), Some(0x2000));
    assert_eq!(dwarf.ranges(&cu)?, vec![[0x2000, 0x2040]]);

    let func = dwarf.entry_at(fx.func)?;
    assert_eq!(func.name(), Some("f"));
    assert_eq!(func.address(DW_AT_low_pc), Some(0x2000));
    Ok(())
}

#[test]
fn test_v5_range_list() -> Result<()> {
    let fx = v5_unit();
    let dwarf = Dwarf::new(fx.sections, Endian::Little)?;

    let block = dwarf.entry_at(fx.block)?;
    assert_eq!(block.val(DW_AT_ranges), Some(&AttrValue::RangeListPtr(12)));
    assert_eq!(
        dwarf.ranges(&block)?,
        vec![[0x2010, 0x2020], [0x2040, 0x2048]]
    );
    Ok(())
}

#[test]
fn test_v5_loclist_through_session() -> Result<()> {
    let fx = v5_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;
    assert_eq!(session.unit_versions().get(fx.cu), Some(5));

    let func = session.node_at(fx.func)?;
    let listing = session.loclist(12, &func)?;
    assert!(listing.fault.is_none());
    let ranges: Vec<_> = listing
        .entries
        .iter()
        .map(|e| (e.low_pc, e.high_pc))
        .collect();
    assert_eq!(ranges, vec![(0x2000, 0x2008), (0x2040, 0x2044)]);

    let entries = session.loclist_entries(&func);
    assert_eq!(entries.len(), 2);

    let var = session.node_at(fx.var)?;
    assert!(session.symbol_table().find_compile_unit(&var).is_some());
    Ok(())
}

#[test]
fn test_truncated_unit_keeps_earlier_units() -> Result<()> {
    let fx = v4_unit();
    let mut sections = fx.sections;
    // a second unit whose length runs past the end of the section
    sections.info.extend_from_slice(&[0xff, 0x00, 0x00, 0x00, 0x04, 0x00]);

    let dwarf = Dwarf::new(sections, Endian::Little)?;
    assert_eq!(dwarf.units().len(), 1);
    assert_eq!(dwarf.entry_at(fx.main)?.name(), Some("main"));
    Ok(())
}

#[test]
fn test_shell_commands_render() -> Result<()> {
    use diex::commands::{execute, Command};

    let fx = v4_unit();
    let session = DebugSession::from_sections(fx.sections, Endian::Little, 8)?;

    let symbols = execute(&session, &Command::Symbols(Some("mai".into())))?;
    assert_eq!(symbols.lines().count(), 1);
    assert!(symbols.contains("0x0000000000001000"));

    let units = execute(&session, &Command::Units)?;
    assert_eq!(units.trim(), format!("<{:x}> v4 demo", fx.cu));

    let entry = execute(&session, &Command::Entry(fx.var))?;
    assert!(entry.contains("DW_TAG_variable"));
    assert!(entry.contains("DW_OP_fbreg -0x10"));
    assert!(entry.contains(&format!("<{:x}> (i32)", fx.base_type)));

    let loclist = execute(&session, &Command::Loclist(fx.loc_var))?;
    assert!(loclist.contains("[ll0] 0x1000 0x1008 DW_OP_reg0"));
    assert!(execute(&session, &Command::Loclist(fx.var)).is_err());

    let scopes = execute(
        &session,
        &Command::Scopes {
            function: fx.main,
            pc: 0x1004,
        },
    )?;
    assert_eq!(scopes, format!("lb{:x} ll0", fx.main));

    let inlined = execute(&session, &Command::Inlined(fx.helper))?;
    assert_eq!(inlined.trim(), format!("<{:x}> main", fx.main));
    Ok(())
}

/// Statics and functions inside a namespace, plus variables whose locations
/// are not a plain pointer-sized address.
///
/// ```text
/// compile_unit "syms"
///   namespace "demo"
///     variable "COUNTER"  DW_OP_addr 0x4000
///     subprogram "run"    [0x1200, 0x1210)
///     variable "complex"  DW_OP_addr 0x2000; DW_OP_plus_uconst 4
///     variable "narrow"   DW_OP_addr (4 bytes) 0x3000
///   variable "TOP"        DW_OP_addr 0x5000
///   subprogram "outer"    [0x1300, 0x1310)
///     variable "local"    DW_OP_addr 0x6000
/// ```
fn symbols_abbrev() -> Vec<u8> {
    abbrev_table(&[
        AbbrevDecl {
            code: 1,
            tag: DW_TAG_compile_unit,
            children: true,
            attrs: &[(DW_AT_name, DW_FORM_string)],
        },
        AbbrevDecl {
            code: 2,
            tag: DW_TAG_namespace,
            children: true,
            attrs: &[(DW_AT_name, DW_FORM_string)],
        },
        AbbrevDecl {
            code: 3,
            tag: DW_TAG_variable,
            children: false,
            attrs: &[(DW_AT_name, DW_FORM_string), (DW_AT_location, DW_FORM_exprloc)],
        },
        AbbrevDecl {
            code: 4,
            tag: DW_TAG_subprogram,
            children: false,
            attrs: &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        },
        AbbrevDecl {
            code: 5,
            tag: DW_TAG_subprogram,
            children: true,
            attrs: &[
                (DW_AT_name, DW_FORM_string),
                (DW_AT_low_pc, DW_FORM_addr),
                (DW_AT_high_pc, DW_FORM_data4),
            ],
        },
        AbbrevDecl {
            code: 6,
            tag: DW_TAG_variable,
            children: false,
            attrs: &[(DW_AT_name, DW_FORM_string), (DW_AT_type, DW_FORM_ref8)],
        },
    ])
}

fn addr_var(dies: &mut Bytes, name: &str, expr: &[u8]) {
    dies.uleb(3).cstr(name).uleb(expr.len() as u64).bytes(expr);
}

fn symbols_unit() -> Vec<u8> {
    let mut counter = vec![DW_OP_addr];
    counter.extend_from_slice(&0x4000u64.to_le_bytes());
    let mut complex = vec![DW_OP_addr];
    complex.extend_from_slice(&0x2000u64.to_le_bytes());
    complex.extend_from_slice(&[0x23, 0x04]);
    let mut narrow = vec![DW_OP_addr];
    narrow.extend_from_slice(&0x3000u32.to_le_bytes());
    let mut top = vec![DW_OP_addr];
    top.extend_from_slice(&0x5000u64.to_le_bytes());
    let mut local = vec![DW_OP_addr];
    local.extend_from_slice(&0x6000u64.to_le_bytes());

    let mut dies = Bytes::new();
    dies.uleb(1).cstr("syms");
    dies.uleb(2).cstr("demo");
    addr_var(&mut dies, "COUNTER", &counter);
    dies.uleb(4).cstr("run").u64(0x1200).u32(0x10);
    addr_var(&mut dies, "complex", &complex);
    addr_var(&mut dies, "narrow", &narrow);
    dies.u8(0);
    addr_var(&mut dies, "TOP", &top);
    dies.uleb(5).cstr("outer").u64(0x1300).u32(0x10);
    addr_var(&mut dies, "local", &local);
    dies.u8(0);
    dies.u8(0);
    unit_v4(&dies.0)
}

#[test]
fn test_symbols_include_statics_inside_namespaces() -> Result<()> {
    let sections = DebugSections {
        info: symbols_unit(),
        abbrev: symbols_abbrev(),
        ..Default::default()
    };
    let session = DebugSession::from_sections(sections, Endian::Little, 8)?;

    let found: Vec<_> = session
        .symbols()
        .iter()
        .map(|sym| (sym.name.as_str(), sym.addr))
        .collect();
    // "complex" and "narrow" are not plain addresses, "local" is not top level
    assert_eq!(
        found,
        vec![("run", 0x1200), ("outer", 0x1300), ("COUNTER", 0x4000), ("TOP", 0x5000)]
    );
    assert_eq!(
        session.symbol_table().lookup(0x4008).map(|s| s.name.as_str()),
        Some("COUNTER")
    );
    Ok(())
}

#[test]
fn test_overflowing_reference_faults_only_its_unit() -> Result<()> {
    let good = symbols_unit();
    let second = good.len() as u64;

    let mut dies = Bytes::new();
    dies.uleb(1).cstr("bad");
    dies.uleb(6).cstr("broken").u64(u64::MAX);
    dies.u8(0);
    let mut info = good;
    info.extend_from_slice(&unit_v4(&dies.0));

    let sections = DebugSections {
        info,
        abbrev: symbols_abbrev(),
        ..Default::default()
    };
    let session = DebugSession::from_sections(sections, Endian::Little, 8)?;
    assert_eq!(session.dwarf().units().len(), 2);
    assert_eq!(session.symbols().len(), 4);

    let bad_cu = second + V4_HEADER as u64;
    let broken = bad_cu + 1 + "bad".len() as u64 + 1;
    assert_eq!(session.dwarf().entry_at(bad_cu)?.name(), Some("bad"));
    assert!(matches!(
        session.dwarf().entry_at(broken),
        Err(Error::OffsetOverflow { offset: u64::MAX, .. })
    ));
    assert!(session.node_at(broken).is_err());
    Ok(())
}

#[test]
fn test_chained_indirect_form_is_rejected() -> Result<()> {
    let abbrev = abbrev_table(&[AbbrevDecl {
        code: 1,
        tag: DW_TAG_compile_unit,
        children: false,
        attrs: &[(DW_AT_name, DW_FORM_indirect)],
    }]);

    let mut once = Bytes::new();
    once.uleb(1).uleb(DW_FORM_string).cstr("ok");
    let dwarf = Dwarf::new(
        DebugSections {
            info: unit_v4(&once.0),
            abbrev: abbrev.clone(),
            ..Default::default()
        },
        Endian::Little,
    )?;
    assert_eq!(dwarf.entry_at(V4_HEADER as u64)?.name(), Some("ok"));

    let mut chained = Bytes::new();
    chained.uleb(1).uleb(DW_FORM_indirect).uleb(DW_FORM_indirect);
    chained.uleb(DW_FORM_string).cstr("no");
    let dwarf = Dwarf::new(
        DebugSections {
            info: unit_v4(&chained.0),
            abbrev,
            ..Default::default()
        },
        Endian::Little,
    )?;
    assert!(matches!(
        dwarf.entry_at(V4_HEADER as u64),
        Err(Error::UnknownForm { form }) if form == DW_FORM_indirect
    ));
    Ok(())
}
