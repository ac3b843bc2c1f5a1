//! Disassembly annotation.
//!
//! Peer instruction records omit fields to mean "same as previous", so one
//! forward pass threads an explicit carry-over state through the sequence:
//! source location adoption starts a new annotated group, a matching
//! (start, end) line pair continues the previous group, and symbol changes
//! reset the base address used for symbol+offset labels. Unique groups with
//! a location get an inline comment from the source text collaborator.

use std::sync::OnceLock;

use regex::Regex;

use crate::protocol::{DisassembledInstruction, Source};
use crate::types::parse_memory_reference;

/// Source text seam for inline comments. Unavailable files or lines just
/// produce no comment.
pub trait SourceLookup: Send + Sync {
    fn line_text(&self, path: &str, line: u32) -> Option<String>;
}

/// Default collaborator that never finds source text.
pub struct NoSourceLookup;

impl SourceLookup for NoSourceLookup {
    fn line_text(&self, _path: &str, _line: u32) -> Option<String> {
        None
    }
}

/// Reads source lines from the filesystem (1-based line numbers).
pub struct FileSourceLookup;

impl SourceLookup for FileSourceLookup {
    fn line_text(&self, path: &str, line: u32) -> Option<String> {
        let text = std::fs::read_to_string(path).ok()?;
        text.lines()
            .nth(line.checked_sub(1)? as usize)
            .map(|l| l.trim().to_string())
    }
}

/// One annotated instruction row for the host's disassembly view.
#[derive(Debug, Clone)]
pub struct AnnotatedInstruction {
    pub address: Option<u64>,
    pub address_reference: String,
    pub instruction: String,
    /// True when this instruction starts a new group; continuation rows
    /// share the group's location and comment.
    pub unique: bool,
    pub location: Option<Source>,
    pub line_range: Option<(u32, u32)>,
    /// `symbol+0x{offset}` once any symbol has been seen.
    pub symbol: Option<String>,
    pub comment: Option<String>,
}

/// Carry-over state for the single annotation pass. Never re-derived from
/// shared mutable fields; this struct is the only place omitted wire fields
/// are reconstructed from.
#[derive(Default)]
struct CarryState {
    location: Option<Source>,
    line_range: Option<(u32, u32)>,
    symbol: Option<String>,
    symbol_base: u64,
}

struct GroupMeta {
    location: Option<Source>,
    end_line: Option<u32>,
    located: bool,
}

/// Annotate a peer-returned instruction sequence.
pub fn annotate(
    instructions: &[DisassembledInstruction],
    lookup: &dyn SourceLookup,
) -> Vec<AnnotatedInstruction> {
    let mut carry = CarryState::default();
    let mut rows = Vec::with_capacity(instructions.len());
    let mut row_groups = Vec::with_capacity(instructions.len());
    let mut groups: Vec<GroupMeta> = Vec::new();

    for instr in instructions {
        let address = parse_memory_reference(&instr.address);
        let pair = instr.line.map(|l| (l, instr.end_line.unwrap_or(l)));

        let unique = if instr.location.is_some() {
            carry.location = instr.location.clone();
            carry.line_range = pair;
            groups.push(GroupMeta {
                location: carry.location.clone(),
                end_line: pair.map(|p| p.1),
                located: true,
            });
            true
        } else if !groups.is_empty() && pair == carry.line_range {
            false
        } else {
            carry.line_range = pair;
            groups.push(GroupMeta {
                location: None,
                end_line: pair.map(|p| p.1),
                located: false,
            });
            true
        };

        if let Some(symbol) = &instr.symbol {
            if carry.symbol.as_ref() != Some(symbol) {
                carry.symbol = Some(symbol.clone());
                carry.symbol_base = address.unwrap_or(0);
            }
        }
        let symbol = match (&carry.symbol, address) {
            (Some(name), Some(addr)) => {
                Some(format!("{name}+0x{:x}", addr.wrapping_sub(carry.symbol_base)))
            }
            (Some(name), None) => Some(name.clone()),
            _ => None,
        };

        let group = groups.len() - 1;
        row_groups.push(group);
        rows.push(AnnotatedInstruction {
            address,
            address_reference: instr.address.clone(),
            instruction: rewrite_hex_literals(&instr.instruction),
            unique,
            location: groups[group].location.clone(),
            line_range: carry.line_range,
            symbol,
            comment: None,
        });
    }

    // Comment pass: unique located groups read the source text at their end
    // line; every row of the group shares it.
    let comments: Vec<Option<String>> = groups
        .iter()
        .map(|meta| {
            if !meta.located {
                return None;
            }
            let path = meta.location.as_ref()?.path.as_deref()?;
            lookup.line_text(path, meta.end_line?)
        })
        .collect();
    for (row, group) in rows.iter_mut().zip(row_groups) {
        row.comment = comments[group].clone();
    }

    rows
}

/// Rewrite `h`-suffixed hex literals into canonical `0x` form in one
/// left-to-right scan. The suffix must not be followed by a word character:
/// `1Ah` becomes `0x1a`, `FFhx` stays as it is.
pub fn rewrite_hex_literals(text: &str) -> String {
    static HEX_SUFFIX: OnceLock<Regex> = OnceLock::new();
    let re = HEX_SUFFIX
        .get_or_init(|| Regex::new(r"\b([0-9A-Fa-f]+)h\b").expect("hex literal pattern"));
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        format!("0x{}", caps[1].to_lowercase())
    })
    .into_owned()
}
