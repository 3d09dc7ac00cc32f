//! The storage and merge core of a distributed version-control client.
//!
//! Three pieces, stacked:
//!
//! 1. **[`Revlog`]** - an append-only log of revisions. Each revision is
//!    named by a content hash ([`NodeId`]) over its parents and text, and
//!    stored either whole (a snapshot) or as a binary delta against the
//!    revision before it. Reading walks the delta chain back to a snapshot
//!    and replays it through the fragment patcher; writes keep chains short
//!    enough that reads stay cheap.
//! 2. **Graph algorithms** - ancestors, descendants, heads, reachability,
//!    and closest-common-ancestor search over the parent-pointer DAG the log
//!    records. These live in [`graph`] and [`ancestor`] and only ever look
//!    at parent pointers, never at how revisions are stored.
//! 3. **[`merge`]** - a diff3-style three-way text merge, built on the
//!    longest-matching-block [`matcher`]. Conflicts come back as marked
//!    spans in the output plus an explicit flag; a conflict is a normal
//!    outcome here, not an error.
//!
//! ## Example
//!
//! ```
//! use deltalog::{Revlog, NULL_ID};
//! use deltalog::merge::{three_way_merge, MergeOptions};
//!
//! let mut log = Revlog::in_memory();
//! let base = log.add_revision(b"a\nb\nc\nd\ne\n", NULL_ID, NULL_ID, 0).unwrap();
//! let ours = log.add_revision(b"a\nB\nc\nd\ne\n", base, NULL_ID, 1).unwrap();
//! let theirs = log.add_revision(b"a\nb\nc\nD\ne\n", base, NULL_ID, 2).unwrap();
//!
//! // Find the merge base, then merge the texts.
//! let ancestor = log.common_ancestor_node(ours, theirs).unwrap().unwrap();
//! assert_eq!(ancestor, base);
//!
//! let base_text = log.read_node(ancestor).unwrap().unwrap();
//! let local = log.read_node(ours).unwrap().unwrap();
//! let remote = log.read_node(theirs).unwrap().unwrap();
//!
//! let merged = three_way_merge(&base_text, &local, &remote, &MergeOptions::default()).unwrap();
//! assert!(!merged.conflicts);
//! assert_eq!(merged.text, b"a\nB\nc\nD\ne\n");
//! ```
//!
//! ## Concurrency
//!
//! Everything runs synchronously on the calling thread. The format is
//! append-only, so the discipline is simple: serialize writers externally
//! (one [`Revlog::add_revision`] at a time), and readers of already-written
//! revisions never see bytes change underneath them.

pub mod ancestor;
pub mod delta;
pub mod error;
pub mod file;
pub mod graph;
pub mod index;
pub mod matcher;
pub mod merge;
pub mod node;
pub mod patch;
pub mod revlog;

pub use error::{CorruptionDetail, RevlogError};
pub use file::{LogFile, MemFile};
pub use node::{history_hash, NodeId, NULL_ID};
pub use revlog::Revlog;

/// A revision's position in storage order. Dense, 0-based, append-only.
pub type Rev = usize;

/// In-memory "no revision" sentinel, used where a parent slot is empty.
/// (On disk this is a `u32::MAX` field; see [`index`].)
pub const NULL_REV: Rev = usize::MAX;
