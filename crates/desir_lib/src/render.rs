use crate::Decompiled;
use crate::DecodedUnit;
use crate::ast::{Anchored, Stmt};
use crate::cfg::BasicBlock;
use crate::error::DesirError;

const EOF_TRAILER: &str = "// There should be an \"EOF\" comment immediately before this comment";

fn push_stmt(out: &mut String, d: &Decompiled, s: &Anchored<Stmt>, mark_guesses: bool) {
    if let Some(name) = d.entrypoints.get(s.offset) {
        out.push_str(&format!("function {name}:\n"));
    }
    out.push_str(&format!("\t/* 0x{:04X} */ {}\n", s.offset, s.node.display(mark_guesses)));
}

fn push_trailer(out: &mut String, d: &Decompiled) {
    let ends_in_eof = d
        .units
        .last()
        .and_then(|u| u.statements.last())
        .is_some_and(|s| matches!(s.node, Stmt::EndOfFile));
    if ends_in_eof {
        out.push_str(EOF_TRAILER);
    }
}

fn index_or_dash(i: Option<usize>) -> String {
    i.map_or_else(|| "-".to_owned(), |i| i.to_string())
}

fn push_block_header(out: &mut String, index: usize, b: &BasicBlock) {
    out.push_str(&format!(
        "block {index} @ 0x{:04X} -> fallthrough: {}, branch: {}\n",
        b.leader,
        index_or_dash(b.fallthrough),
        index_or_dash(b.branch)
    ));
}

/// Flat statement listing with function headers.
pub fn listing(d: &Decompiled, mark_guesses: bool) -> String {
    let mut out = String::new();
    for unit in &d.units {
        for s in &unit.statements {
            push_stmt(&mut out, d, s, mark_guesses);
        }
    }
    push_trailer(&mut out, d);
    out
}

fn push_unit_blocks(out: &mut String, d: &Decompiled, unit: &DecodedUnit, mark_guesses: bool) {
    let mut blocks = unit.cfg.blocks.iter().enumerate().peekable();
    for (i, s) in unit.statements.iter().enumerate() {
        if let Some((bi, b)) = blocks.next_if(|(_, b)| b.start == i) {
            push_block_header(out, bi, b);
        }
        push_stmt(out, d, s, mark_guesses);
    }
}

/// Statement listing grouped by basic block.
pub fn cfg_listing(d: &Decompiled, mark_guesses: bool) -> String {
    let mut out = String::new();
    for unit in &d.units {
        if let Some(name) = &unit.name {
            out.push_str(&format!("// {name} @ 0x{:04X}\n", unit.start));
        }
        push_unit_blocks(&mut out, d, unit, mark_guesses);
    }
    push_trailer(&mut out, d);
    out
}

pub fn yaml(d: &Decompiled) -> Result<String, DesirError> {
    Ok(serde_yaml::to_string(d)?)
}
