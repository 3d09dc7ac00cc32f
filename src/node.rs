//! Node ids: the content hash which names a revision forever.
//!
//! The id is a sha1 over `parent1 || parent2 || text`, with the parents
//! sorted first so the hash doesn't depend on which parent happened to be
//! "first" in a merge. Hashing the parents in means two revisions with
//! identical text but different history still get distinct ids.

use std::fmt::{Debug, Display, Formatter};

use sha1::{Digest, Sha1};

pub const NODE_BYTES: usize = 20;

/// A 160-bit content hash identifying one revision. Stable forever once
/// computed - nothing ever rewrites an id in place.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_BYTES]);

/// The well-known "no revision" id. Used as the parent of root revisions.
pub const NULL_ID: NodeId = NodeId([0; NODE_BYTES]);

impl NodeId {
    pub const fn from_array(bytes: [u8; NODE_BYTES]) -> Self {
        NodeId(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; NODE_BYTES] = bytes.try_into().ok()?;
        Some(NodeId(arr))
    }

    pub const fn as_bytes(&self) -> &[u8; NODE_BYTES] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_ID
    }

    pub fn hex(&self) -> String {
        let mut s = String::with_capacity(NODE_BYTES * 2);
        for b in self.0 {
            s.push(char::from_digit((b >> 4) as u32, 16).unwrap());
            s.push(char::from_digit((b & 0xf) as u32, 16).unwrap());
        }
        s
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != NODE_BYTES * 2 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; NODE_BYTES];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            out[i] = ((hi << 4) | lo) as u8;
        }
        Some(NodeId(out))
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hex())
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // The short form is plenty to identify a node while debugging.
        write!(f, "NodeId({})", &self.hex()[..12])
    }
}

/// Hash a revision's text together with its history.
pub fn history_hash(text: &[u8], p1: NodeId, p2: NodeId) -> NodeId {
    let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
    let mut hasher = Sha1::new();
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    hasher.update(text);
    NodeId(hasher.finalize().into())
}
