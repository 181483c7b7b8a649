mod common;

use common::Bytes;
use diex::constants::*;
use diex::cursor::Endian;
use diex::expr::to_string;
use diex::regnames::Architecture;

fn amd64(r: u64) -> String {
    Architecture::Amd64.register_name(r)
}

fn print(bytes: &[u8]) -> String {
    to_string(bytes, 8, Endian::Little, &amd64)
}

#[test]
fn test_addr_operand_uses_pointer_size() {
    let mut b = Bytes::new();
    b.u8(DW_OP_addr).u64(0x4010);
    assert_eq!(print(&b.0), "DW_OP_addr 0x4010");

    let mut b = Bytes::new();
    b.u8(DW_OP_addr).u32(0x8048);
    assert_eq!(to_string(&b.0, 4, Endian::Little, &amd64), "DW_OP_addr 0x8048");
}

#[test]
fn test_frame_base_and_registers() {
    let mut b = Bytes::new();
    b.u8(DW_OP_fbreg).sleb(-16);
    assert_eq!(print(&b.0), "DW_OP_fbreg -0x10");

    assert_eq!(print(&[DW_OP_reg0 + 6]), "DW_OP_reg6(rbp)");

    let mut b = Bytes::new();
    b.u8(DW_OP_breg0 + 7).sleb(8);
    assert_eq!(print(&b.0), "DW_OP_breg7(rsp) 0x8");

    let mut b = Bytes::new();
    b.u8(DW_OP_regx).uleb(17);
    assert_eq!(print(&b.0), "DW_OP_regx 0x11(xmm0)");
}

#[test]
fn test_sequences_and_nested_expressions() {
    let mut b = Bytes::new();
    b.u8(DW_OP_lit0 + 3).u8(DW_OP_stack_value);
    assert_eq!(print(&b.0), "DW_OP_lit3 DW_OP_stack_value");

    let mut b = Bytes::new();
    b.u8(DW_OP_entry_value).uleb(1).u8(DW_OP_reg0 + 5);
    b.u8(DW_OP_stack_value);
    assert_eq!(
        print(&b.0),
        "DW_OP_entry_value [DW_OP_reg5(rdi)] DW_OP_stack_value"
    );

    let mut b = Bytes::new();
    b.u8(DW_OP_call_frame_cfa).u8(DW_OP_plus_uconst).uleb(0x18);
    assert_eq!(print(&b.0), "DW_OP_call_frame_cfa DW_OP_plus_uconst 0x18");
}

#[test]
fn test_truncated_and_unknown_opcodes() {
    assert!(print(&[DW_OP_addr, 0x10, 0x40]).ends_with("<truncated>"));

    // nothing after an opcode with unknown operands is decoded
    assert_eq!(print(&[0xe5, DW_OP_stack_value]), "DW_OP_0xe5");
}

#[test]
fn test_register_names_per_architecture() {
    assert_eq!(Architecture::from_elf_machine(62), Architecture::Amd64);
    assert_eq!(Architecture::from_elf_machine(183), Architecture::Arm64);
    assert_eq!(Architecture::from_elf_machine(9999), Architecture::Other(9999));

    assert_eq!(Architecture::Amd64.register_name(16), "rip");
    assert_eq!(Architecture::I386.register_name(4), "esp");
    assert_eq!(Architecture::Arm64.register_name(3), "x3");
    assert_eq!(Architecture::Arm64.register_name(31), "sp");
    assert_eq!(Architecture::Riscv64.register_name(10), "a0");
    assert_eq!(Architecture::Other(0).register_name(5), "r5");
    assert_eq!(Architecture::Amd64.register_name(200), "r200");

    assert_eq!(Architecture::I386.pointer_size(), 4);
    assert_eq!(Architecture::Amd64.to_string(), "x86_64");
}
