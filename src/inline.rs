use crate::constants::*;
use crate::dwarf::{DieOffset, Dwarf, Entry};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedCall {
    /// Name of the subprogram the call was inlined into.
    pub fn_name: String,
    pub offset: DieOffset,
}

/// Every inlined subroutine whose abstract origin is `target`, reported
/// by its enclosing subprogram.
pub fn collect_inlined_calls(dwarf: &Dwarf, target: DieOffset) -> Result<Vec<InlinedCall>> {
    let mut rdr = dwarf.reader();
    rdr.seek(0);

    let mut calls = Vec::new();
    let mut current: Option<Entry> = None;

    while let Some(entry) = rdr.next()? {
        match entry.tag {
            DW_TAG_subprogram => current = Some(entry),
            DW_TAG_inlined_subroutine => {
                if entry.reference(DW_AT_abstract_origin) != Some(target) {
                    continue;
                }
                let Some(func) = &current else {
                    continue;
                };
                let fn_name = match func.name() {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => format!("function at {:x}", func.offset),
                };
                calls.push(InlinedCall {
                    fn_name,
                    offset: func.offset,
                });
            }
            _ => {}
        }
    }

    Ok(calls)
}
