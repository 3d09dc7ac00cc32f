//! On-disk index records.
//!
//! The revision log is a pair of streams. The index stream is fixed-width so
//! any record can be found by seeking `HEADER_LEN + rev * RECORD_LEN`; the
//! data stream holds the (possibly compressed) chunk bytes each record points
//! at. Everything multi-byte is big-endian.
//!
//! Both streams open with the same 16-byte header: 8 magic bytes, a u32
//! format version, and a crc32 (Castagnoli) of those first 12 bytes. The crc
//! exists to tell "old format" apart from "truncated/garbage file" with
//! confidence.
//!
//! Record layout (64 bytes):
//!
//! | bytes  | field            |                                          |
//! |--------|------------------|------------------------------------------|
//! | 0..8   | data_offset      | absolute offset of chunk in data stream  |
//! | 8..12  | compressed_len   | stored chunk length, incl. the tag byte  |
//! | 12..16 | uncompressed_len | reconstructed text length                |
//! | 16..20 | base_rev         | chain base; equals own rev for snapshots |
//! | 20..24 | link_rev         | position in the external changeset log   |
//! | 24..28 | parent1          | `0xffffffff` when absent                 |
//! | 28..32 | parent2          | `0xffffffff` when absent                 |
//! | 32..52 | node_id          | 20-byte content hash                     |
//! | 52..64 | padding          | zero                                     |

use crc::{Crc, CRC_32_ISCSI};

use crate::error::CorruptionDetail;
use crate::node::NodeId;

pub const INDEX_MAGIC: [u8; 8] = *b"DLOGIDX1";
pub const DATA_MAGIC: [u8; 8] = *b"DLOGDAT1";
pub const FORMAT_VERSION: u32 = 1;

pub const HEADER_LEN: usize = 16;
pub const RECORD_LEN: usize = 64;

/// On-disk "no revision" marker for parent fields.
pub(crate) const NO_REV: u32 = u32::MAX;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub(crate) fn calc_checksum(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

/// One revision's metadata, exactly as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub data_offset: u64,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
    pub base_rev: u32,
    pub link_rev: u32,
    pub parent1: u32,
    pub parent2: u32,
    pub node: NodeId,
}

impl IndexEntry {
    pub(crate) fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..8].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[8..12].copy_from_slice(&self.compressed_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.uncompressed_len.to_be_bytes());
        buf[16..20].copy_from_slice(&self.base_rev.to_be_bytes());
        buf[20..24].copy_from_slice(&self.link_rev.to_be_bytes());
        buf[24..28].copy_from_slice(&self.parent1.to_be_bytes());
        buf[28..32].copy_from_slice(&self.parent2.to_be_bytes());
        buf[32..52].copy_from_slice(self.node.as_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8; RECORD_LEN]) -> Self {
        IndexEntry {
            data_offset: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            compressed_len: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            uncompressed_len: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            base_rev: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            link_rev: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            parent1: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
            parent2: u32::from_be_bytes(buf[28..32].try_into().unwrap()),
            node: NodeId::from_bytes(&buf[32..52]).unwrap(),
        }
    }

    /// A snapshot stores the full text; its chain base is itself.
    pub fn is_snapshot(&self, rev: usize) -> bool {
        self.base_rev as usize == rev
    }
}

pub(crate) fn encode_header(magic: &[u8; 8]) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..8].copy_from_slice(magic);
    buf[8..12].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
    let crc = calc_checksum(&buf[0..12]);
    buf[12..16].copy_from_slice(&crc.to_be_bytes());
    buf
}

pub(crate) fn check_header(buf: &[u8; HEADER_LEN], magic: &[u8; 8]) -> Result<(), CorruptionDetail> {
    if buf[0..8] != *magic {
        return Err(CorruptionDetail::BadMagic);
    }
    let expected = u32::from_be_bytes(buf[12..16].try_into().unwrap());
    if calc_checksum(&buf[0..12]) != expected {
        return Err(CorruptionDetail::HeaderChecksum);
    }
    let version = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(CorruptionDetail::VersionTooNew(version));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{history_hash, NULL_ID};

    #[test]
    fn record_round_trip() {
        let entry = IndexEntry {
            data_offset: 0x1122334455,
            compressed_len: 812,
            uncompressed_len: 1600,
            base_rev: 3,
            link_rev: 17,
            parent1: 6,
            parent2: NO_REV,
            node: history_hash(b"some text", NULL_ID, NULL_ID),
        };
        let buf = entry.encode();
        assert_eq!(IndexEntry::decode(&buf), entry);
        // Padding stays zero.
        assert!(buf[52..].iter().all(|&b| b == 0));
    }

    #[test]
    fn header_round_trip() {
        let buf = encode_header(&INDEX_MAGIC);
        assert!(check_header(&buf, &INDEX_MAGIC).is_ok());
        assert_eq!(check_header(&buf, &DATA_MAGIC), Err(CorruptionDetail::BadMagic));
    }

    #[test]
    fn header_rejects_tampering() {
        let mut buf = encode_header(&DATA_MAGIC);
        buf[9] ^= 1; // flip a version bit, leave the crc alone
        assert_eq!(check_header(&buf, &DATA_MAGIC), Err(CorruptionDetail::HeaderChecksum));

        // A consistent header with an unknown version is a version error,
        // not a checksum error.
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&DATA_MAGIC);
        buf[8..12].copy_from_slice(&99u32.to_be_bytes());
        let crc = calc_checksum(&buf[0..12]);
        buf[12..16].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(check_header(&buf, &DATA_MAGIC), Err(CorruptionDetail::VersionTooNew(99)));
    }
}
