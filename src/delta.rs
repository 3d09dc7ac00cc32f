//! Binary delta payloads.
//!
//! A payload is a flat sequence of instructions, each one saying "replace
//! bytes `[start, end)` of the previous text with these literal bytes":
//!
//! ```text
//! +--------+--------+--------+----------------+
//! | start  |  end   |  len   | len data bytes |  (u32 big-endian each)
//! +--------+--------+--------+----------------+
//! ```
//!
//! Instructions are ordered by increasing `start` and never overlap. There's
//! deliberately no framing beyond this - the chunk length recorded in the
//! index bounds the payload.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::matcher::{matching_blocks, split_lines};

/// One replace instruction, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub start: usize,
    pub end: usize,
    pub data: Vec<u8>,
}

/// What went wrong while decoding or applying a delta payload. All of these
/// mean the payload is corrupt; none are recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatchError {
    /// Payload ended in the middle of a 12-byte instruction header.
    TruncatedInstruction,
    /// An instruction has `start > end`.
    BackwardsRange,
    /// Instructions overlap or aren't sorted by start.
    UnorderedInstructions,
    /// A literal run claims more bytes than the payload holds.
    LiteralOverrun,
    /// An instruction replaces a range beyond the end of the text.
    RangeOutOfBounds,
}

impl Display for PatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchError::TruncatedInstruction => write!(f, "truncated delta instruction"),
            PatchError::BackwardsRange => write!(f, "delta range runs backwards"),
            PatchError::UnorderedInstructions => write!(f, "delta instructions out of order"),
            PatchError::LiteralOverrun => write!(f, "delta literal overruns payload"),
            PatchError::RangeOutOfBounds => write!(f, "delta range outside the source text"),
        }
    }
}

impl Error for PatchError {}

/// Decode a payload into instructions, validating the framing. The whole
/// payload must be consumed exactly - trailing garbage is corruption.
pub fn unpack_deltas(payload: &[u8]) -> Result<Vec<Delta>, PatchError> {
    let mut out = Vec::new();
    let mut pos = 0;
    let mut last_end = 0;

    while pos < payload.len() {
        if payload.len() - pos < 12 {
            return Err(PatchError::TruncatedInstruction);
        }
        let start = u32::from_be_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
        let end = u32::from_be_bytes(payload[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let len = u32::from_be_bytes(payload[pos + 8..pos + 12].try_into().unwrap()) as usize;
        pos += 12;

        if start > end {
            return Err(PatchError::BackwardsRange);
        }
        if start < last_end {
            return Err(PatchError::UnorderedInstructions);
        }
        if payload.len() - pos < len {
            return Err(PatchError::LiteralOverrun);
        }

        out.push(Delta { start, end, data: payload[pos..pos + len].to_vec() });
        pos += len;
        last_end = end;
    }

    Ok(out)
}

/// Encode instructions back into wire form.
pub fn pack_deltas(deltas: &[Delta]) -> Vec<u8> {
    let total: usize = deltas.iter().map(|d| 12 + d.data.len()).sum();
    let mut out = Vec::with_capacity(total);
    for d in deltas {
        push_instruction(&mut out, d.start, d.end, &d.data);
    }
    out
}

fn push_instruction(out: &mut Vec<u8>, start: usize, end: usize, data: &[u8]) {
    out.extend_from_slice(&(start as u32).to_be_bytes());
    out.extend_from_slice(&(end as u32).to_be_bytes());
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

/// Build a delta payload transforming `a` into `b`.
///
/// Works at line granularity: find the matching line blocks, then emit one
/// instruction per gap between them. Byte offsets come from a prefix-sum of
/// the line lengths.
pub fn diff_texts(a: &[u8], b: &[u8]) -> Vec<u8> {
    if a.is_empty() {
        if b.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(12 + b.len());
        push_instruction(&mut out, 0, 0, b);
        return out;
    }

    let a_lines = split_lines(a);
    let b_lines = split_lines(b);

    let a_off = line_offsets(&a_lines);
    let b_off = line_offsets(&b_lines);

    let mut out = Vec::new();
    let (mut la, mut lb) = (0, 0);
    for m in matching_blocks(&a_lines, &b_lines) {
        // a[la..m.a_start] and b[lb..m.b_start] is the mismatched gap in
        // front of this block (possibly empty on either side).
        let replacement = &b[b_off[lb]..b_off[m.b_start]];
        if m.a_start > la || !replacement.is_empty() {
            push_instruction(&mut out, a_off[la], a_off[m.a_start], replacement);
        }
        la = m.a_start + m.len;
        lb = m.b_start + m.len;
    }
    out
}

fn line_offsets(lines: &[&[u8]]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(lines.len() + 1);
    let mut pos = 0;
    offsets.push(0);
    for line in lines {
        pos += line.len();
        offsets.push(pos);
    }
    offsets
}
