use anyhow::{bail, Context, Result};

use crate::constants::*;
use crate::dwarf::{AttrValue, DieOffset};
use crate::render;
use crate::session::DebugSession;
use crate::utils::parse_hex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    Units,
    Symbols(Option<String>),
    Entry(DieOffset),
    Loclist(DieOffset),
    Frames(DieOffset),
    Disasm(DieOffset),
    Scopes { function: DieOffset, pc: u64 },
    Inlined(DieOffset),
    Help,
    Quit,
}

pub const HELP: &str = "\
info                     summary of the loaded executable
units                    compile units and their DWARF versions
symbols [filter]         functions and static variables by address
entry <hex>              entry at offset with everything it references (0 = all units)
loclist <hex>            location lists of the entry at offset
frames <hex>             debug_frame entries overlapping the entry's ranges
disasm <hex>             disassemble the function at offset
scopes <hex-fn> <hex-pc> blocks and location list entries active at pc
inlined <hex>            functions the subprogram at offset was inlined into
help                     this text
quit                     leave the shell";

fn offset_arg(args: &[&str], command: &str) -> Result<DieOffset> {
    let arg = args
        .first()
        .with_context(|| format!("'{}' needs an offset", command))?;
    parse_hex(arg)
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            bail!("Empty command");
        };
        let args: Vec<&str> = words.collect();

        Ok(match name {
            "info" => Command::Info,
            "units" => Command::Units,
            "symbols" | "syms" => Command::Symbols(args.first().map(|s| s.to_string())),
            "entry" | "e" => Command::Entry(match args.first() {
                Some(arg) => parse_hex(arg)?,
                None => 0,
            }),
            "loclist" | "ll" => Command::Loclist(offset_arg(&args, name)?),
            "frames" | "frame" => Command::Frames(offset_arg(&args, name)?),
            "disasm" | "disassemble" => Command::Disasm(offset_arg(&args, name)?),
            "scopes" => {
                if args.len() != 2 {
                    bail!("Usage: scopes <hex-fn> <hex-pc>");
                }
                Command::Scopes {
                    function: parse_hex(args[0])?,
                    pc: parse_hex(args[1])?,
                }
            }
            "inlined" => Command::Inlined(offset_arg(&args, name)?),
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("Unknown command: {}", other),
        })
    }
}

/// Runs one command and returns its output.
pub fn execute(session: &DebugSession, command: &Command) -> Result<String> {
    Ok(match command {
        Command::Info => render::info(session),
        Command::Units => render::units(session),
        Command::Symbols(filter) => render::symbols(session.symbols(), filter.as_deref()),
        Command::Entry(offset) => {
            let nodes = session.materialize(*offset)?;
            render::entry_nodes(session, &nodes)
        }
        Command::Loclist(offset) => {
            let node = session.node_at(*offset)?;
            let mut out = String::new();
            for field in &node.entry.fields {
                if let AttrValue::LocListPtr(list) = field.value {
                    let listing = session.loclist(list, &node)?;
                    out.push_str(&format!("{} {list:#x}\n", attr_display(field.attr)));
                    out.push_str(&render::loclist(session, &listing));
                }
            }
            if out.is_empty() {
                bail!("Entry {:#x} has no location lists", offset);
            }
            out
        }
        Command::Frames(offset) => {
            let node = session.node_at(*offset)?;
            let items = session.frames_for(&node);
            render::frames(session, &node, &items)
        }
        Command::Disasm(offset) => render::disassembly(&session.disassemble(*offset)?),
        Command::Scopes { function, pc } => {
            let node = session.node_at(*function)?;
            let entries = session.loclist_entries(&node);
            render::scopes(&session.scopes_at(&node, *pc, &entries))
        }
        Command::Inlined(offset) => render::inlined_calls(&session.inlined_calls(*offset)?),
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    })
}
