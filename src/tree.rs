use tracing::warn;

use crate::constants::*;
use crate::dwarf::{DieOffset, Dwarf, Entry, EntryReader};
use crate::error::{Error, Result};

/// A materialized entry with its children and resolved pc ranges.
#[derive(Debug, Clone)]
pub struct EntryNode {
    pub entry: Entry,
    pub children: Vec<EntryNode>,
    pub ranges: Vec<[u64; 2]>,
}

impl EntryNode {
    fn leaf(entry: Entry) -> Self {
        Self {
            entry,
            children: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn offset(&self) -> DieOffset {
        self.entry.offset
    }

    pub fn is_function(&self) -> bool {
        self.entry.tag == DW_TAG_subprogram
    }

    pub fn is_compile_unit(&self) -> bool {
        self.entry.tag == DW_TAG_compile_unit
    }

    pub fn contains_pc(&self, pc: u64) -> bool {
        self.ranges.iter().any(|r| r[0] <= pc && pc < r[1])
    }
}

/// Reads the entry at the reader's position into a node.
///
/// Compile units get their top-level children only, each one read with its
/// own children skipped. Every other entry is built recursively down to its
/// null terminator. Reference-class values are returned for the caller to
/// expand instead of being followed here.
pub fn build_entry_node(
    dwarf: &Dwarf,
    rdr: &mut EntryReader<'_>,
) -> Result<(EntryNode, Vec<DieOffset>)> {
    let entry = rdr.next()?.ok_or(Error::Truncated {
        context: "debug_info",
        offset: dwarf.sections().info.len(),
    })?;

    if entry.is_null() {
        return Ok((EntryNode::leaf(entry), Vec::new()));
    }

    let mut pending: Vec<DieOffset> = entry.references().collect();
    let mut node = EntryNode::leaf(entry);

    if node.entry.has_range_attrs() {
        match dwarf.ranges(&node.entry) {
            Ok(ranges) => node.ranges = ranges,
            Err(err) => warn!(offset = node.entry.offset, %err, "could not resolve ranges"),
        }
    }

    if !node.entry.has_children {
        return Ok((node, pending));
    }

    if node.is_compile_unit() {
        while let Some(child) = rdr.next()? {
            rdr.skip_children()?;
            let done = child.is_null();
            node.children.push(EntryNode::leaf(child));
            if done {
                break;
            }
        }
        return Ok((node, pending));
    }

    loop {
        let (child, refs) = build_entry_node(dwarf, rdr)?;
        pending.extend(refs);
        let done = child.entry.is_null();
        node.children.push(child);
        if done {
            break;
        }
    }

    Ok((node, pending))
}

/// Total number of nodes in `nodes` and their descendants, plus one.
pub fn count_nodes(nodes: &[EntryNode]) -> usize {
    1 + nodes.iter().map(|n| count_nodes(&n.children)).sum::<usize>()
}

pub fn all_compile_units(nodes: &[EntryNode]) -> bool {
    nodes.iter().all(EntryNode::is_compile_unit)
}
