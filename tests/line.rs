mod common;

use std::path::PathBuf;

use anyhow::Result;

use common::{with_length, Bytes};
use diex::constants::*;
use diex::cursor::Endian;
use diex::dwarf::{DebugSections, Dwarf};
use diex::line::{LineCursor, LinePosition, LineProgram, LineRow};

const STANDARD_OPCODE_LENGTHS: [u8; 12] = [0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1];

/// Version 4 program: rows at 0x1000 (line 1), 0x1004 (line 5, prologue
/// end), 0x1006 via a special opcode, then the end of the sequence at 0x1010.
fn v4_program() -> Vec<u8> {
    let mut header = Bytes::new();
    header.u8(1).u8(1).u8(1).u8(-5i8 as u8).u8(14).u8(13);
    header.bytes(&STANDARD_OPCODE_LENGTHS);
    header.cstr("src").u8(0);
    header.cstr("main.rs").uleb(1).uleb(0).uleb(0);
    header.cstr("lib.rs").uleb(0).uleb(0).uleb(0);
    header.u8(0);

    let mut program = Bytes::new();
    program.u8(0).uleb(9).u8(0x02).u64(0x1000);
    program.u8(0x01);
    program.u8(0x03).sleb(4);
    program.u8(0x02).uleb(4);
    program.u8(0x0a);
    program.u8(0x01);
    // special opcode: address += 2, line += 1
    program.u8(13 + 2 * 14 + (1 + 5));
    program.u8(0x04).uleb(2);
    program.u8(0x02).uleb(10);
    program.u8(0).uleb(1).u8(0x01);

    let mut body = Bytes::new();
    body.u16(4).u32(header.len() as u32).bytes(&header.0).bytes(&program.0);
    with_length(&body.0)
}

/// Version 5 program whose directories come from `.debug_line_str` and whose
/// file names are inline strings with a directory index.
fn v5_program() -> Vec<u8> {
    let mut header = Bytes::new();
    header.u8(1).u8(1).u8(1).u8(-5i8 as u8).u8(14).u8(13);
    header.bytes(&STANDARD_OPCODE_LENGTHS);
    // directories: DW_LNCT_path as line_strp
    header.u8(1).uleb(1).uleb(DW_FORM_line_strp);
    header.uleb(2).u32(0).u32(6);
    // files: DW_LNCT_path as string, DW_LNCT_directory_index as udata
    header.u8(2).uleb(1).uleb(DW_FORM_string).uleb(2).uleb(DW_FORM_udata);
    header.uleb(2);
    header.cstr("main.rs").uleb(1);
    header.cstr("lib.rs").uleb(0);

    let mut program = Bytes::new();
    program.u8(0).uleb(9).u8(0x02).u64(0x2000);
    program.u8(0x01);
    program.u8(0x02).uleb(8);
    program.u8(0).uleb(1).u8(0x01);

    let mut body = Bytes::new();
    body.u16(5).u8(8).u8(0);
    body.u32(header.len() as u32).bytes(&header.0).bytes(&program.0);
    with_length(&body.0)
}

fn dwarf_with_line(line: Vec<u8>) -> Result<Dwarf> {
    Ok(Dwarf::new(
        DebugSections {
            line,
            ..Default::default()
        },
        Endian::Little,
    )?)
}

#[test]
fn test_v4_header_files() -> Result<()> {
    let dwarf = dwarf_with_line(v4_program())?;
    let program = LineProgram::parse(&dwarf, 0, Some(PathBuf::from("/work")))?;

    let files: Vec<_> = program.files().iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        files,
        vec![PathBuf::from("/work/src/main.rs"), PathBuf::from("/work/lib.rs")]
    );
    // version 4 numbers files from one
    assert_eq!(program.file(1).map(|f| f.path.clone()), Some(files[0].clone()));
    assert!(program.file(0).is_none());
    Ok(())
}

#[test]
fn test_v4_rows() -> Result<()> {
    let dwarf = dwarf_with_line(v4_program())?;
    let program = LineProgram::parse(&dwarf, 0, None)?;
    let rows: Vec<LineRow> = program.rows().collect();

    let summary: Vec<_> = rows
        .iter()
        .map(|r| (r.address, r.line, r.file_index, r.end_sequence))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0x1000, 1, 1, false),
            (0x1004, 5, 1, false),
            (0x1006, 6, 1, false),
            (0x1010, 6, 2, true),
        ]
    );
    assert!(rows[1].prologue_end);
    assert!(!rows[2].prologue_end);
    assert!(rows.iter().all(|r| r.is_stmt));
    Ok(())
}

#[test]
fn test_missing_or_bad_program() -> Result<()> {
    let dwarf = dwarf_with_line(Vec::new())?;
    assert!(LineProgram::parse(&dwarf, 0, None).is_err());

    let mut bad = v4_program();
    bad[4] = 9;
    let dwarf = dwarf_with_line(bad)?;
    assert!(LineProgram::parse(&dwarf, 0, None).is_err());
    Ok(())
}

fn row(address: u64, line: u64, end_sequence: bool) -> LineRow {
    LineRow {
        address,
        file_index: 1,
        line,
        column: 0,
        is_stmt: true,
        basic_block_start: false,
        end_sequence,
        prologue_end: false,
        epilogue_begin: false,
        discriminator: 0,
    }
}

#[test]
fn test_line_cursor_walk() {
    let rows = vec![
        row(0x1000, 1, false),
        row(0x1004, 2, false),
        row(0x1010, 2, true),
        row(0x2000, 7, false),
        row(0x2008, 7, true),
    ];

    let mut cursor = LineCursor::new(&rows);
    assert!(cursor.seek_pc(0x1000));
    assert!(matches!(
        cursor.advance_to(0x1000),
        LinePosition::Exact { index: 0, row } if row.line == 1
    ));
    assert_eq!(cursor.advance_to(0x1002), LinePosition::Inside);
    assert!(matches!(
        cursor.advance_to(0x1004),
        LinePosition::Exact { index: 1, .. }
    ));

    // the gap between sequences belongs to no row
    assert!(!cursor.seek_pc(0x1800));
    assert_eq!(cursor.advance_to(0x1800), LinePosition::Lost);

    assert!(cursor.seek_pc(0x2004));
    assert_eq!(cursor.advance_to(0x2004), LinePosition::Inside);
    assert_eq!(cursor.advance_to(0x3000), LinePosition::Lost);
}

#[test]
fn test_line_program_for_unit() -> Result<()> {
    use common::{abbrev_table, unit_v4, AbbrevDecl};

    let abbrev = abbrev_table(&[AbbrevDecl {
        code: 1,
        tag: DW_TAG_compile_unit,
        children: false,
        attrs: &[
            (DW_AT_comp_dir, DW_FORM_string),
            (DW_AT_stmt_list, DW_FORM_sec_offset),
        ],
    }]);
    let mut dies = Bytes::new();
    dies.uleb(1).cstr("/build").u32(0);

    let dwarf = Dwarf::new(
        DebugSections {
            info: unit_v4(&dies.0),
            abbrev,
            line: v4_program(),
            ..Default::default()
        },
        Endian::Little,
    )?;

    let program = LineProgram::for_unit(&dwarf, &dwarf.units()[0])?.unwrap();
    assert_eq!(
        program.files()[0].path,
        PathBuf::from("/build/src/main.rs")
    );
    assert_eq!(program.rows().count(), 4);
    Ok(())
}

#[test]
fn test_v5_directory_and_file_tables() -> Result<()> {
    let mut line_str = Bytes::new();
    line_str.cstr("/work").cstr("src");
    let dwarf = Dwarf::new(
        DebugSections {
            line: v5_program(),
            line_str: line_str.build(),
            ..Default::default()
        },
        Endian::Little,
    )?;
    let program = LineProgram::parse(&dwarf, 0, None)?;

    let files: Vec<_> = program.files().iter().map(|f| f.path.clone()).collect();
    // directory 1 is relative to directory 0, the compilation directory
    assert_eq!(
        files,
        vec![PathBuf::from("/work/src/main.rs"), PathBuf::from("/work/lib.rs")]
    );
    // version 5 numbers files from zero
    assert_eq!(program.file(0).map(|f| f.path.clone()), Some(files[0].clone()));
    assert!(program.file(2).is_none());

    let rows: Vec<_> = program
        .rows()
        .map(|r| (r.address, r.line, r.file_index, r.end_sequence))
        .collect();
    assert_eq!(rows, vec![(0x2000, 1, 1, false), (0x2008, 1, 1, true)]);
    Ok(())
}

#[test]
fn test_v5_line_strp_without_section() -> Result<()> {
    let dwarf = dwarf_with_line(v5_program())?;
    assert!(LineProgram::parse(&dwarf, 0, None).is_err());
    Ok(())
}
