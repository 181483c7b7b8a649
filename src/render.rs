//! Plain-text views of query results.

use std::fmt::Write;

use rustc_demangle::demangle;

use crate::constants::*;
use crate::dwarf::{AttrValue, DieOffset, Field};
use crate::expr;
use crate::frame::{CommonInformationEntry, FrameDescriptionEntry, FrameItem};
use crate::inline::InlinedCall;
use crate::loclist::LoclistListing;
use crate::scope::ScopeId;
use crate::session::{DebugSession, Disassembly};
use crate::symbols::Sym;
use crate::tree::EntryNode;
use crate::utils::hex_dump;

fn demangled(name: &str) -> String {
    demangle(name).to_string()
}

pub fn info(session: &DebugSession) -> String {
    let dwarf = session.dwarf();
    let mut out = String::new();
    let _ = writeln!(out, "architecture: {}", session.architecture());
    let _ = writeln!(out, "pointer size: {}", session.pointer_size());
    let _ = writeln!(out, "byte order:   {:?}", dwarf.endian());
    let _ = writeln!(
        out,
        ".text:        {:#x} ({} bytes)",
        session.text().address,
        session.text().data.len()
    );
    let _ = writeln!(out, "units:        {}", dwarf.units().len());
    if let Some(max) = session.unit_versions().max_version() {
        let _ = writeln!(out, "max version:  {max}");
    }
    let _ = writeln!(out, "symbols:      {}", session.symbols().len());
    let _ = writeln!(out, "FDEs:         {}", session.debug_frame().fdes().len());
    out
}

pub fn units(session: &DebugSession) -> String {
    let mut out = String::new();
    for (first_die, version) in session.unit_versions().iter() {
        let name = session
            .dwarf()
            .entry_at(first_die)
            .ok()
            .and_then(|e| e.name().map(str::to_string))
            .unwrap_or_default();
        let _ = writeln!(out, "<{first_die:x}> v{version} {name}");
    }
    out
}

pub fn symbols(symbols: &[Sym], filter: Option<&str>) -> String {
    let mut out = String::new();
    for sym in symbols {
        let name = demangled(&sym.name);
        if let Some(filter) = filter {
            if !name.contains(filter) && !sym.name.contains(filter) {
                continue;
            }
        }
        let _ = writeln!(out, "{:#018x} <{:x}> {}", sym.addr, sym.offset, name);
    }
    out
}

fn reference_name(offset: DieOffset, nodes: &[EntryNode]) -> String {
    nodes
        .iter()
        .find(|node| node.entry.offset == offset)
        .and_then(|node| node.entry.name())
        .unwrap_or_default()
        .to_string()
}

fn field_value(session: &DebugSession, field: &Field, nodes: &[EntryNode]) -> String {
    let regname = |r| session.register_name(r);
    let address_size = session.pointer_size();
    match &field.value {
        AttrValue::Reference(off) => format!("<{off:x}> ({})", reference_name(*off, nodes)),
        AttrValue::Address(addr) => format!("{addr:#x}"),
        AttrValue::String(s) => format!("{s:?}"),
        AttrValue::ExprLoc(block) => {
            expr::to_string(block, address_size, session.dwarf().endian(), &regname)
        }
        AttrValue::LocListPtr(off) => {
            let mut text = format!("loclistptr = {off:#x}");
            if let Some(first) = nodes.first() {
                match session.loclist(*off, first) {
                    Ok(listing) => {
                        for line in loclist(session, &listing).lines() {
                            let _ = write!(text, "\n        {line}");
                        }
                    }
                    Err(err) => {
                        let _ = write!(text, " ({err})");
                    }
                }
            }
            text
        }
        AttrValue::RangeListPtr(off) => format!("rangelistptr = {off:#x}"),
        AttrValue::LinePtr(off) => format!("lineptr = {off:#x}"),
        AttrValue::SectionOffset(off) => format!("{off:#x}"),
        AttrValue::Unsigned(v) => format!("{v}"),
        AttrValue::Signed(v) => format!("{v}"),
        AttrValue::Flag(v) => format!("{v}"),
        AttrValue::Block(bytes) => format!("[{}]", hex_dump(bytes)),
        AttrValue::TypeSignature(sig) => format!("signature {sig:#018x}"),
        AttrValue::Unrecognized { form, raw } => {
            let form = form_name(*form).unwrap_or("unknown form");
            format!("{form} {raw:#x}")
        }
    }
}

fn entry_node(
    out: &mut String,
    session: &DebugSession,
    node: &EntryNode,
    nodes: &[EntryNode],
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}<{:x}> {}", node.entry.offset, tag_display(node.entry.tag));
    for field in &node.entry.fields {
        let _ = writeln!(
            out,
            "{indent}    {:<24} {}",
            attr_display(field.attr),
            field_value(session, field, nodes)
        );
    }
    if !node.ranges.is_empty() {
        let _ = writeln!(out, "{indent}    Ranges:");
        for range in &node.ranges {
            let _ = writeln!(out, "{indent}      {:x}..{:x}", range[0], range[1]);
        }
    }
    for child in &node.children {
        entry_node(out, session, child, nodes, depth + 1);
    }
}

pub fn entry_nodes(session: &DebugSession, nodes: &[EntryNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        entry_node(&mut out, session, node, nodes, 0);
        out.push('\n');
    }
    out
}

/// One line per entry; base address selections are shown as such.
pub fn loclist(session: &DebugSession, listing: &LoclistListing<'_>) -> String {
    let regname = |r| session.register_name(r);
    let mut out = String::new();
    for entry in &listing.entries {
        if entry.is_base_address_selection() {
            let _ = writeln!(out, "Base address: {:#x}", entry.high_pc);
            continue;
        }
        let _ = write!(out, "[ll{:x}] {:#x} {:#x} ", entry.offset, entry.low_pc, entry.high_pc);
        expr::pretty_print(
            &mut out,
            entry.expr,
            session.pointer_size(),
            session.dwarf().endian(),
            &regname,
        );
        out.push('\n');
    }
    if let Some(err) = &listing.fault {
        let _ = writeln!(out, "error: {err}");
    }
    out
}

fn cie(out: &mut String, session: &DebugSession, cie: &CommonInformationEntry) {
    let _ = writeln!(out, "CIE <{:x}>", cie.offset);
    let _ = writeln!(out, "  Version                  {}", cie.version);
    let _ = writeln!(out, "  Augmentation             {:?}", cie.augmentation);
    let _ = writeln!(out, "  Code Alignment Factor    {}", cie.code_alignment);
    let _ = writeln!(out, "  Data Alignment Factor    {}", cie.data_alignment);
    let _ = writeln!(out, "  Return Address Register  {}", cie.return_address_register);
    let options = session.debug_frame().options_for(cie);
    out.push_str(&session.frame_instructions(&cie.initial_instructions, 0, options));
    out.push('\n');
}

fn fde(out: &mut String, session: &DebugSession, fde: &FrameDescriptionEntry) {
    let _ = writeln!(out, "FDE <{:x}>", fde.offset);
    let _ = writeln!(out, "  CIE    {:#x}", fde.cie);
    let _ = writeln!(out, "  Begin  {:#x}", fde.begin);
    let _ = writeln!(out, "  End    {:#x}", fde.end);
    let frame = session.debug_frame();
    let options = frame
        .cie_for(fde)
        .map(|c| frame.options_for(c))
        .unwrap_or_default();
    out.push_str(&session.frame_instructions(&fde.instructions, fde.begin, options));
    out.push('\n');
}

pub fn frames(session: &DebugSession, node: &EntryNode, items: &[FrameItem<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", node.entry.name().unwrap_or_default());
    let _ = write!(out, "Ranges:");
    for range in &node.ranges {
        let _ = write!(out, " {:x}..{:x}", range[0], range[1]);
    }
    out.push_str("\n\n");
    for item in items {
        match item {
            FrameItem::Cie(c) => cie(&mut out, session, c),
            FrameItem::Fde(f) => fde(&mut out, session, f),
        }
    }
    out
}

pub fn disassembly(disassembly: &Disassembly) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Function {:?}",
        disassembly.name.as_deref().map(demangled).unwrap_or_default()
    );
    let _ = writeln!(
        out,
        "{:<24} {:<5} {:<18} {:<30} Instruction",
        "Pos", "Flags", "PC", "Bytes"
    );
    for row in &disassembly.rows {
        let pos = format!("{}:{}", row.file, row.line);
        let mut text = row.text.clone();
        if let Some(link) = row.link {
            let _ = write!(text, "  >>> <{link:x}>");
        }
        let _ = write!(
            out,
            "{:<24} {:<5} {:#018x} {:<30} {}",
            pos,
            row.flags(),
            row.pc,
            hex_dump(&row.bytes),
            text
        );
        if !row.scopes.is_empty() {
            let _ = write!(out, "  [{}]", scopes(&row.scopes));
        }
        out.push('\n');
    }
    out.push_str("\nFlags: S - statement, P - end of prologue\n");
    out
}

pub fn scopes(scopes: &[ScopeId]) -> String {
    scopes
        .iter()
        .map(ScopeId::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn inlined_calls(calls: &[InlinedCall]) -> String {
    let mut out = String::new();
    for call in calls {
        let _ = writeln!(out, "<{:x}> {}", call.offset, demangled(&call.fn_name));
    }
    out
}
