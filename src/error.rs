use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

use crate::delta::PatchError;
use crate::node::NodeId;
use crate::Rev;

/// Ways the stored bytes can be structurally broken. These are always fatal:
/// the log never guesses at what corrupt data meant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CorruptionDetail {
    BadMagic,
    VersionTooNew(u32),
    HeaderChecksum,
    /// The index stream length isn't header + a whole number of records.
    TruncatedIndex,
    /// A record's fields violate the append-only ordering invariants
    /// (chain base after the entry, parent at or after the entry, ...).
    BadRecord,
    /// A record points at bytes outside the data stream.
    ChunkOutOfBounds,
    UnknownCompression(u8),
    /// The chunk is lz4-compressed but this build has the `lz4` feature off.
    Lz4DecoderNeeded,
    Lz4DecompressionError,
    Patch(PatchError),
    /// The reconstructed text doesn't hash back to the stored node id.
    HashMismatch,
}

impl Display for CorruptionDetail {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CorruptionDetail::BadMagic => write!(f, "bad magic bytes"),
            CorruptionDetail::VersionTooNew(v) => write!(f, "unknown format version {v}"),
            CorruptionDetail::HeaderChecksum => write!(f, "header checksum mismatch"),
            CorruptionDetail::TruncatedIndex => write!(f, "truncated index stream"),
            CorruptionDetail::BadRecord => write!(f, "index record violates ordering invariants"),
            CorruptionDetail::ChunkOutOfBounds => write!(f, "chunk lies outside the data stream"),
            CorruptionDetail::UnknownCompression(tag) => {
                write!(f, "unknown compression tag {tag:#04x}")
            }
            CorruptionDetail::Lz4DecoderNeeded => {
                write!(f, "chunk is lz4 compressed, but lz4 support is compiled out")
            }
            CorruptionDetail::Lz4DecompressionError => write!(f, "lz4 decompression failed"),
            CorruptionDetail::Patch(e) => write!(f, "bad delta payload: {e}"),
            CorruptionDetail::HashMismatch => write!(f, "node id does not match content"),
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum RevlogError {
    /// The on-disk state is broken. Never auto-repaired; carries enough
    /// context (revision, node id) for recovery tooling to locate the damage.
    Corruption {
        rev: Option<Rev>,
        node: Option<NodeId>,
        detail: CorruptionDetail,
    },
    /// The request itself was invalid - unknown parent, ambiguous lookup,
    /// contradictory merge options. Rejected before any state changes.
    Validation(String),
    Io(io::Error),
}

impl RevlogError {
    pub(crate) fn corrupt(detail: CorruptionDetail) -> Self {
        RevlogError::Corruption { rev: None, node: None, detail }
    }

    pub(crate) fn corrupt_at(rev: Rev, node: Option<NodeId>, detail: CorruptionDetail) -> Self {
        RevlogError::Corruption { rev: Some(rev), node, detail }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        RevlogError::Validation(msg.into())
    }
}

impl Display for RevlogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RevlogError::Corruption { rev, node, detail } => {
                write!(f, "revlog corruption: {detail}")?;
                if let Some(rev) = rev {
                    write!(f, " (rev {rev}")?;
                    if let Some(node) = node {
                        write!(f, ", node {node:?}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            RevlogError::Validation(msg) => write!(f, "{msg}"),
            RevlogError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for RevlogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RevlogError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RevlogError {
    fn from(e: io::Error) -> Self {
        RevlogError::Io(e)
    }
}
