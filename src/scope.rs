use std::fmt;

use crate::dwarf::DieOffset;
use crate::loclist::LoclistEntry;
use crate::tree::EntryNode;

/// Identifier of something active at a pc: a block-like entry or one
/// location list record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    Block(DieOffset),
    Loclist(usize),
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::Block(off) => write!(f, "lb{off:x}"),
            ScopeId::Loclist(off) => write!(f, "ll{off:x}"),
        }
    }
}

/// Chain of nodes whose ranges contain `pc`, outermost first. Empty when
/// `node` itself does not contain it.
pub fn find_scopes(node: &EntryNode, pc: u64) -> Vec<ScopeId> {
    if !node.contains_pc(pc) {
        return Vec::new();
    }

    let mut scopes = vec![ScopeId::Block(node.entry.offset)];
    for child in &node.children {
        scopes.extend(find_scopes(child, pc));
    }
    scopes
}

/// `find_scopes` plus every location list entry covering `pc`.
pub fn find_scopes_and_loclists(
    node: &EntryNode,
    pc: u64,
    entries: &[LoclistEntry<'_>],
) -> Vec<ScopeId> {
    let mut scopes = find_scopes(node, pc);
    scopes.extend(
        entries
            .iter()
            .filter(|entry| entry.contains(pc))
            .map(|entry| ScopeId::Loclist(entry.offset)),
    );
    scopes
}
