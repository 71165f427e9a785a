//! Resume-data: a minimal bencoded boundary format capturing enough state
//! to resume a paused download without re-verifying every piece (§6 names
//! this only as "a boundary format"; the encode/decode pair itself is a
//! supplemented feature, grounded in the same bencode dict shape `.torrent`
//! files and KRPC messages already use throughout this crate).

use crate::bencode::{self, BencodeValue};
use crate::bitfield::Bitfield;

use super::{TorrentError, TorrentResult};

/// Everything needed to resume a torrent without a fresh piece-verification
/// pass: which pieces are already verified, and basic transfer counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeData {
    pub info_hash: [u8; 20],
    pub piece_count: usize,
    pub verified_pieces: Bitfield,
    pub uploaded: u64,
    pub downloaded: u64,
}

impl ResumeData {
    pub fn new(info_hash: [u8; 20], verified_pieces: Bitfield) -> Self {
        ResumeData { info_hash, piece_count: verified_pieces.len(), verified_pieces, uploaded: 0, downloaded: 0 }
    }

    pub fn encode(&self) -> Vec<u8> {
        let value = BencodeValue::dict(vec![
            (b"info_hash".to_vec(), BencodeValue::bytes(self.info_hash.to_vec())),
            (b"piece_count".to_vec(), BencodeValue::integer(self.piece_count as i64)),
            (b"bitfield".to_vec(), BencodeValue::bytes(self.verified_pieces.to_bytes())),
            (b"uploaded".to_vec(), BencodeValue::integer(self.uploaded as i64)),
            (b"downloaded".to_vec(), BencodeValue::integer(self.downloaded as i64)),
        ]);
        bencode::encode(&value)
    }

    pub fn decode(data: &[u8]) -> TorrentResult<Self> {
        let value = bencode::decode(data)?;
        let info_hash: [u8; 20] = value
            .get(b"info_hash")
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| TorrentError::MissingField("info_hash".into()))?
            .try_into()
            .map_err(|_| TorrentError::InvalidFormat("info_hash is not 20 bytes".into()))?;
        let piece_count = value
            .get(b"piece_count")
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| TorrentError::MissingField("piece_count".into()))? as usize;
        let bitfield_bytes = value
            .get(b"bitfield")
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| TorrentError::MissingField("bitfield".into()))?;
        let uploaded = value.get(b"uploaded").and_then(BencodeValue::as_integer).unwrap_or(0) as u64;
        let downloaded = value.get(b"downloaded").and_then(BencodeValue::as_integer).unwrap_or(0) as u64;

        Ok(ResumeData {
            info_hash,
            piece_count,
            verified_pieces: Bitfield::from_bytes(bitfield_bytes, piece_count),
            uploaded,
            downloaded,
        })
    }
}
