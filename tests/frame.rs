mod common;

use common::{with_length, Bytes};
use diex::cursor::Endian;
use diex::frame::{
    pretty_print, DebugFrame, FrameInstructions, FrameItem, FrameOptions, FrameStep,
};

fn regname(r: u64) -> String {
    format!("r{r}")
}

#[test]
fn test_advance_loc_updates_pc() {
    let out = pretty_print(&[0x41], 0x1000, FrameOptions::default(), &regname);
    assert_eq!(out, "\tDW_CFA_advance_loc 0x1 to 0x1001\n\t");

    let options = FrameOptions {
        code_alignment: 4,
        ..FrameOptions::default()
    };
    let out = pretty_print(&[0x41], 0x1000, options, &regname);
    assert_eq!(out, "\tDW_CFA_advance_loc 0x1 to 0x1004\n\t");
}

#[test]
fn test_register_operands_and_truncation() {
    let out = pretty_print(&[0x0c, 0x07, 0x08], 0, FrameOptions::default(), &regname);
    assert_eq!(out, "\tDW_CFA_def_cfa r7 0x8\n\t");

    let out = pretty_print(&[0x0c, 0x07], 0, FrameOptions::default(), &regname);
    assert_eq!(out, "\tDW_CFA_def_cfa r7 <truncated>\n\t");

    // DW_CFA_offset_extended_sf with a negative factored offset
    let out = pretty_print(&[0x11, 0x10, 0x7e], 0, FrameOptions::default(), &regname);
    assert_eq!(out, "\tDW_CFA_offset_extended_sf r16 -0x2\n\t");
}

#[test]
fn test_set_loc_and_advance_loc1() {
    let mut bytes = Bytes::new();
    bytes.u8(0x01).u64(0x2000);
    bytes.u8(0x02).u8(0x10);

    let mut decoder = FrameInstructions::new(&bytes.0, 0);
    let Some(FrameStep::Instruction(set_loc)) = decoder.next() else {
        panic!("expected DW_CFA_set_loc");
    };
    assert_eq!(set_loc.name, "DW_CFA_set_loc");
    assert_eq!(set_loc.pc, Some(0x2000));

    let Some(FrameStep::Instruction(advance)) = decoder.next() else {
        panic!("expected DW_CFA_advance_loc1");
    };
    assert_eq!(advance.pc, Some(0x2010));
    assert_eq!(decoder.pc(), 0x2010);
    assert!(decoder.next().is_none());
}

#[test]
fn test_unknown_opcode_is_reported() {
    let mut decoder = FrameInstructions::new(&[0x17, 0x0a], 0);
    assert_eq!(
        decoder.next(),
        Some(FrameStep::Unknown {
            offset: 0,
            byte: 0x17
        })
    );
    let Some(FrameStep::Instruction(insn)) = decoder.next() else {
        panic!("decoding should resume after an unknown byte");
    };
    assert_eq!(insn.name, "DW_CFA_remember_state");
}

fn debug_frame() -> Vec<u8> {
    let mut cie = Bytes::new();
    cie.u32(u32::MAX).u8(1).cstr("").uleb(1).sleb(-8).u8(16);
    cie.bytes(&[0x0c, 0x07, 0x08, 0x90, 0x01]);
    let mut section = with_length(&cie.0);

    let mut fde = Bytes::new();
    fde.u32(0).u64(0x1000).u64(0x20);
    fde.bytes(&[0x41, 0x0e, 0x10]);
    section.extend(with_length(&fde.0));

    let mut other = Bytes::new();
    other.u32(0).u64(0x4000).u64(0x10);
    section.extend(with_length(&other.0));
    section
}

#[test]
fn test_debug_frame_parse() {
    let frame = DebugFrame::parse(&debug_frame(), Endian::Little, 8);

    let cies: Vec<_> = frame.cies().collect();
    assert_eq!(cies.len(), 1);
    let cie = cies[0];
    assert_eq!(cie.version, 1);
    assert_eq!(cie.code_alignment, 1);
    assert_eq!(cie.data_alignment, -8);
    assert_eq!(cie.return_address_register, 16);
    assert_eq!(cie.address_size, 8);

    let initial = pretty_print(
        &cie.initial_instructions,
        0,
        frame.options_for(cie),
        &regname,
    );
    assert_eq!(initial, "\tDW_CFA_def_cfa r7 0x8\n\tDW_CFA_offset r16 0x1\n\t");

    assert_eq!(frame.fdes().len(), 2);
    let fde = &frame.fdes()[0];
    assert_eq!(fde.range(), [0x1000, 0x1020]);
    assert_eq!(fde.instructions, vec![0x41, 0x0e, 0x10]);
    assert!(frame.cie_for(fde).is_some());
}

#[test]
fn test_frames_for_ranges() {
    let frame = DebugFrame::parse(&debug_frame(), Endian::Little, 8);

    let items = frame.frames_for(&[[0x1010, 0x1011]]);
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], FrameItem::Cie(cie) if cie.offset == 0));
    assert!(matches!(items[1], FrameItem::Fde(fde) if fde.begin == 0x1000));

    // both FDEs share one CIE, which is listed once
    let items = frame.frames_for(&[[0x1000, 0x1001], [0x4000, 0x4001]]);
    assert_eq!(items.len(), 3);

    assert!(frame.frames_for(&[[0x2000, 0x2001]]).is_empty());
}

#[test]
fn test_fde_with_unknown_cie_stops_parse() {
    let mut fde = Bytes::new();
    fde.u32(0x40).u64(0x1000).u64(0x20);
    let frame = DebugFrame::parse(&with_length(&fde.0), Endian::Little, 8);
    assert!(frame.fdes().is_empty());
}
