//! The revision log: an ordered, append-only sequence of revisions, each
//! stored either as a full snapshot or as a delta against the revision before
//! it.
//!
//! Reconstructing revision `r` means finding its chain base (the most recent
//! snapshot at or before `r`), then replaying every delta from the base up to
//! `r` through the fragment patcher. Writes keep chains short: once the bytes
//! you'd have to read to reconstruct a revision grow past a multiple of the
//! text itself, the next revision is stored as a fresh snapshot.
//!
//! Everything already written is immutable. The only mutation is appending,
//! which must be externally serialized; readers of committed revisions never
//! see bytes change under them.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::io;

use smallvec::SmallVec;
use tracing::debug;

use crate::delta::diff_texts;
use crate::error::{CorruptionDetail, RevlogError};
use crate::file::{LogFile, MemFile};
use crate::index::{
    check_header, encode_header, IndexEntry, DATA_MAGIC, HEADER_LEN, INDEX_MAGIC, NO_REV,
    RECORD_LEN,
};
use crate::node::{history_hash, NodeId, NULL_ID};
use crate::patch::apply_patches;
use crate::{Rev, NULL_REV};

pub struct Revlog<F> {
    index_file: F,
    data_file: F,
    pub(crate) entries: Vec<IndexEntry>,

    /// node id -> rev, built on the first lookup and extended on append.
    node_map: OnceCell<HashMap<NodeId, Rev>>,
    /// rev -> child revs, derived from the parent pointers on first use.
    /// Reset by appends.
    pub(crate) children_cache: OnceCell<Vec<SmallVec<[Rev; 2]>>>,
    /// The last reconstructed text. One deep, which is exactly what chain
    /// replay and appending want.
    text_cache: Option<(Rev, Vec<u8>)>,

    /// Store a snapshot once reading a revision would touch more than this
    /// many times its own size in stored chain bytes.
    pub snapshot_ratio: u64,
}

impl Revlog<MemFile> {
    /// A log that lives entirely in memory.
    pub fn in_memory() -> Self {
        Self::open(MemFile::new(), MemFile::new()).expect("in-memory open cannot fail")
    }
}

impl<F: LogFile> Revlog<F> {
    /// Open a log from its index and data streams. Empty streams are
    /// initialized with fresh headers; anything else is validated record by
    /// record before the log is usable.
    pub fn open(mut index_file: F, mut data_file: F) -> Result<Self, RevlogError> {
        let index_len = index_file.len()?;
        let data_len = data_file.len()?;

        if index_len == 0 && data_len == 0 {
            index_file.append(&encode_header(&INDEX_MAGIC))?;
            data_file.append(&encode_header(&DATA_MAGIC))?;
            return Ok(Self::from_parts(index_file, data_file, Vec::new()));
        }

        let mut header = [0u8; HEADER_LEN];
        index_file
            .read_exact_at(&mut header, 0)
            .map_err(|e| map_eof(e, CorruptionDetail::TruncatedIndex))?;
        check_header(&header, &INDEX_MAGIC).map_err(RevlogError::corrupt)?;

        data_file
            .read_exact_at(&mut header, 0)
            .map_err(|e| map_eof(e, CorruptionDetail::ChunkOutOfBounds))?;
        check_header(&header, &DATA_MAGIC).map_err(RevlogError::corrupt)?;

        let body = index_len - HEADER_LEN as u64;
        if body % RECORD_LEN as u64 != 0 {
            return Err(RevlogError::corrupt(CorruptionDetail::TruncatedIndex));
        }

        let count = (body / RECORD_LEN as u64) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut record = [0u8; RECORD_LEN];
        for rev in 0..count {
            index_file
                .read_exact_at(&mut record, (HEADER_LEN + rev * RECORD_LEN) as u64)
                .map_err(|e| map_eof(e, CorruptionDetail::TruncatedIndex))?;
            let entry = IndexEntry::decode(&record);

            // The log is topologically ordered: chains and parents only ever
            // point backwards.
            let parents_ok = [entry.parent1, entry.parent2]
                .iter()
                .all(|&p| p == NO_REV || (p as usize) < rev);
            if entry.base_rev as usize > rev || !parents_ok {
                return Err(RevlogError::corrupt_at(rev, Some(entry.node), CorruptionDetail::BadRecord));
            }
            let chunk_end = entry.data_offset + u64::from(entry.compressed_len);
            if entry.data_offset < HEADER_LEN as u64 || chunk_end > data_len {
                return Err(RevlogError::corrupt_at(
                    rev,
                    Some(entry.node),
                    CorruptionDetail::ChunkOutOfBounds,
                ));
            }
            entries.push(entry);
        }

        debug!(revisions = count, "opened revision log");
        Ok(Self::from_parts(index_file, data_file, entries))
    }

    fn from_parts(index_file: F, data_file: F, entries: Vec<IndexEntry>) -> Self {
        Revlog {
            index_file,
            data_file,
            entries,
            node_map: OnceCell::new(),
            children_cache: OnceCell::new(),
            text_cache: None,
            snapshot_ratio: 2,
        }
    }

    pub fn revision_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently added revision.
    pub fn tip(&self) -> Option<Rev> {
        self.revision_count().checked_sub(1)
    }

    pub fn entry(&self, rev: Rev) -> Option<&IndexEntry> {
        self.entries.get(rev)
    }

    pub fn node_id(&self, rev: Rev) -> Option<NodeId> {
        self.entries.get(rev).map(|e| e.node)
    }

    /// Reverse lookup. The node map is only built when somebody asks.
    pub fn index_of(&self, node: NodeId) -> Option<Rev> {
        if node.is_null() {
            return None;
        }
        let map = self.node_map.get_or_init(|| {
            self.entries.iter().enumerate().map(|(rev, e)| (e.node, rev)).collect()
        });
        map.get(&node).copied()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.index_of(node).is_some()
    }

    /// Parent revisions, with [`NULL_REV`] for absent parents.
    pub fn parents_of(&self, rev: Rev) -> Option<(Rev, Rev)> {
        let e = self.entries.get(rev)?;
        Some((rev_or_null(e.parent1), rev_or_null(e.parent2)))
    }

    /// Parent node ids, with the null id for absent parents.
    pub fn parents_of_node(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        if node.is_null() {
            return Some((NULL_ID, NULL_ID));
        }
        let rev = self.index_of(node)?;
        let e = &self.entries[rev];
        Some((self.node_or_null(e.parent1), self.node_or_null(e.parent2)))
    }

    /// Non-null parents only. The shape the graph walks want.
    pub(crate) fn parent_revs(&self, rev: Rev) -> SmallVec<[Rev; 2]> {
        let mut out = SmallVec::new();
        if let Some(e) = self.entries.get(rev) {
            for p in [e.parent1, e.parent2] {
                if p != NO_REV {
                    out.push(p as Rev);
                }
            }
        }
        out
    }

    pub fn link_rev(&self, rev: Rev) -> Option<Rev> {
        self.entries.get(rev).map(|e| e.link_rev as Rev)
    }

    pub fn base_rev(&self, rev: Rev) -> Option<Rev> {
        self.entries.get(rev).map(|e| e.base_rev as Rev)
    }

    pub fn compressed_len(&self, rev: Rev) -> Option<usize> {
        self.entries.get(rev).map(|e| e.compressed_len as usize)
    }

    pub fn uncompressed_len(&self, rev: Rev) -> Option<usize> {
        self.entries.get(rev).map(|e| e.uncompressed_len as usize)
    }

    /// The stored form of one revision - the full text for snapshots, the
    /// delta payload for everything else - with the compression layer peeled
    /// off.
    pub fn chunk(&mut self, rev: Rev) -> Result<Vec<u8>, RevlogError> {
        let e = *self
            .entry(rev)
            .ok_or_else(|| RevlogError::validation(format!("unknown revision {rev}")))?;

        let mut raw = vec![0u8; e.compressed_len as usize];
        self.data_file.read_exact_at(&mut raw, e.data_offset).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                RevlogError::corrupt_at(rev, Some(e.node), CorruptionDetail::ChunkOutOfBounds)
            } else {
                err.into()
            }
        })?;
        decode_chunk(&raw).map_err(|detail| RevlogError::corrupt_at(rev, Some(e.node), detail))
    }

    /// Reconstruct the full text of a revision, verifying it against the
    /// stored node id. A hash mismatch is corruption, never silently
    /// returned.
    pub fn read(&mut self, rev: Rev) -> Result<Vec<u8>, RevlogError> {
        let entry = *self
            .entry(rev)
            .ok_or_else(|| RevlogError::validation(format!("unknown revision {rev}")))?;

        if let Some((cached_rev, text)) = &self.text_cache {
            if *cached_rev == rev {
                return Ok(text.clone());
            }
        }

        let base = entry.base_rev as usize;

        // If the cache holds an intermediate version of this chain, start
        // the replay from there instead of the snapshot.
        let cached = match &self.text_cache {
            Some((cached_rev, text)) if *cached_rev > base && *cached_rev < rev => {
                Some((*cached_rev, text.clone()))
            }
            _ => None,
        };
        let (start_text, first_delta) = match cached {
            Some((cached_rev, text)) => (text, cached_rev + 1),
            None => (self.chunk(base)?, base + 1),
        };

        let mut patches = Vec::with_capacity(rev + 1 - first_delta);
        for r in first_delta..=rev {
            patches.push(self.chunk(r)?);
        }
        let text = apply_patches(&start_text, &patches).map_err(|pe| {
            RevlogError::corrupt_at(rev, Some(entry.node), CorruptionDetail::Patch(pe))
        })?;

        let p1 = self.node_or_null(entry.parent1);
        let p2 = self.node_or_null(entry.parent2);
        if history_hash(&text, p1, p2) != entry.node {
            return Err(RevlogError::corrupt_at(rev, Some(entry.node), CorruptionDetail::HashMismatch));
        }

        self.text_cache = Some((rev, text.clone()));
        Ok(text)
    }

    /// Like [`read`](Self::read), addressed by node id. Unknown ids are a
    /// normal not-found, and the null id reads as empty.
    pub fn read_node(&mut self, node: NodeId) -> Result<Option<Vec<u8>>, RevlogError> {
        if node.is_null() {
            return Ok(Some(Vec::new()));
        }
        match self.index_of(node) {
            Some(rev) => self.read(rev).map(Some),
            None => Ok(None),
        }
    }

    /// Append a revision. Returns its node id - or the existing id, if this
    /// exact revision (same text, same parents) is already stored.
    pub fn add_revision(
        &mut self,
        text: &[u8],
        p1: NodeId,
        p2: NodeId,
        link: Rev,
    ) -> Result<NodeId, RevlogError> {
        let node = history_hash(text, p1, p2);
        if self.index_of(node).is_some() {
            return Ok(node);
        }

        let p1r = self.resolve_parent(p1)?;
        let p2r = self.resolve_parent(p2)?;
        if text.len() >= u32::MAX as usize {
            return Err(RevlogError::validation("revision text too large"));
        }
        if link >= NO_REV as usize {
            return Err(RevlogError::validation(format!("link revision {link} out of range")));
        }
        let curr = self.entries.len();
        if curr >= NO_REV as usize {
            return Err(RevlogError::validation("revision log is full"));
        }

        // Prefer a delta against the tip; fall back to a snapshot when the
        // chain would cost too much to read back.
        let (base, encoded) = 'choose: {
            if curr > 0 {
                let prev = curr - 1;
                let prev_text = self.read(prev)?;
                let payload = diff_texts(&prev_text, text);
                let prev_entry = self.entries[prev];
                let chain_base = prev_entry.base_rev;
                let chain_start = self.entries[chain_base as usize].data_offset;
                let chain_end = prev_entry.data_offset + u64::from(prev_entry.compressed_len);
                let encoded = encode_chunk(&payload);
                let span = chain_end - chain_start + encoded.len() as u64;
                if span <= text.len() as u64 * self.snapshot_ratio {
                    break 'choose (chain_base, encoded);
                }
            }
            (curr as u32, encode_chunk(text))
        };

        let offset = self.data_file.len()?;
        let entry = IndexEntry {
            data_offset: offset,
            compressed_len: encoded.len() as u32,
            uncompressed_len: text.len() as u32,
            base_rev: base,
            link_rev: link as u32,
            parent1: p1r,
            parent2: p2r,
            node,
        };

        self.data_file.append(&encoded)?;
        self.index_file.append(&entry.encode())?;
        self.data_file.sync()?;
        self.index_file.sync()?;

        debug!(
            rev = curr,
            snapshot = (base as usize == curr),
            stored_bytes = encoded.len(),
            "appended revision"
        );

        self.entries.push(entry);
        if let Some(map) = self.node_map.get_mut() {
            map.insert(node, curr);
        }
        self.children_cache.take();
        self.text_cache = Some((curr, text.to_vec()));
        Ok(node)
    }

    fn resolve_parent(&self, p: NodeId) -> Result<u32, RevlogError> {
        if p.is_null() {
            return Ok(NO_REV);
        }
        self.index_of(p)
            .map(|rev| rev as u32)
            .ok_or_else(|| RevlogError::validation(format!("unknown parent {p:?}")))
    }

    /// A delta payload turning `rev_a`'s text into `rev_b`'s. When `rev_b`
    /// is stored as a delta directly on top of `rev_a`, the stored chunk is
    /// returned as-is.
    pub fn diff(&mut self, rev_a: Rev, rev_b: Rev) -> Result<Vec<u8>, RevlogError> {
        let ea = *self
            .entry(rev_a)
            .ok_or_else(|| RevlogError::validation(format!("unknown revision {rev_a}")))?;
        let eb = *self
            .entry(rev_b)
            .ok_or_else(|| RevlogError::validation(format!("unknown revision {rev_b}")))?;

        if rev_a + 1 == rev_b && ea.base_rev == eb.base_rev {
            return self.chunk(rev_b);
        }
        let a = self.read(rev_a)?;
        let b = self.read(rev_b)?;
        Ok(diff_texts(&a, &b))
    }

    /// Resolve a user-supplied identifier: a decimal revision (negative
    /// counts back from the tip), a full 40-character hex id, or an
    /// unambiguous hex prefix. Ambiguity is an error; no match is `None`.
    pub fn lookup(&self, id: &str) -> Result<Option<NodeId>, RevlogError> {
        if let Ok(rev) = id.parse::<i64>() {
            let count = self.revision_count() as i64;
            let rev = if rev < 0 { count + rev } else { rev };
            if (0..count).contains(&rev) {
                return Ok(self.node_id(rev as usize));
            }
            return Ok(None);
        }

        if id.len() == 40 {
            if let Some(node) = NodeId::from_hex(id) {
                if self.contains_node(node) {
                    return Ok(Some(node));
                }
            }
            return Ok(None);
        }

        if !id.is_empty() && id.len() < 40 && id.chars().all(|c| c.is_ascii_hexdigit()) {
            let want = id.to_ascii_lowercase();
            let mut found = None;
            for e in &self.entries {
                if e.node.hex().starts_with(&want) {
                    if found.is_some() {
                        return Err(RevlogError::validation(format!("ambiguous revision id {id}")));
                    }
                    found = Some(e.node);
                }
            }
            return Ok(found);
        }

        Ok(None)
    }

    /// Would `text` (under `node`'s recorded parents) hash to `node`? A
    /// cheap consistency probe that doesn't touch the data stream.
    pub fn matches_text(&self, node: NodeId, text: &[u8]) -> bool {
        match self.parents_of_node(node) {
            Some((p1, p2)) => history_hash(text, p1, p2) == node,
            None => false,
        }
    }

    /// Give the underlying streams back, e.g. to hand in-memory logs around.
    pub fn into_files(self) -> (F, F) {
        (self.index_file, self.data_file)
    }

    pub(crate) fn node_or_null(&self, p: u32) -> NodeId {
        if p == NO_REV {
            NULL_ID
        } else {
            self.entries[p as usize].node
        }
    }
}

fn rev_or_null(p: u32) -> Rev {
    if p == NO_REV {
        NULL_REV
    } else {
        p as Rev
    }
}

fn map_eof(e: io::Error, detail: CorruptionDetail) -> RevlogError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RevlogError::corrupt(detail)
    } else {
        e.into()
    }
}

/// Chunk codec. A stored chunk is either empty, or one tag byte plus the
/// body: `u` for raw bytes, `4` for an lz4 block.
fn encode_chunk(body: &[u8]) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }

    #[cfg(feature = "lz4")]
    {
        let compressed = lz4_flex::compress_prepend_size(body);
        if compressed.len() < body.len() {
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(b'4');
            out.extend_from_slice(&compressed);
            return out;
        }
    }

    let mut out = Vec::with_capacity(1 + body.len());
    out.push(b'u');
    out.extend_from_slice(body);
    out
}

fn decode_chunk(raw: &[u8]) -> Result<Vec<u8>, CorruptionDetail> {
    let Some((&tag, body)) = raw.split_first() else {
        return Ok(Vec::new());
    };
    match tag {
        b'u' => Ok(body.to_vec()),
        #[cfg(feature = "lz4")]
        b'4' => lz4_flex::decompress_size_prepended(body)
            .map_err(|_| CorruptionDetail::Lz4DecompressionError),
        #[cfg(not(feature = "lz4"))]
        b'4' => Err(CorruptionDetail::Lz4DecoderNeeded),
        other => Err(CorruptionDetail::UnknownCompression(other)),
    }
}
