//! The immutable, fully-resolved description of a torrent's content: piece
//! layout, file list, and info-hash. Produced either by parsing a `.torrent`
//! metainfo file or by a completed BEP-9 metadata exchange; generalized from
//! the teacher's `torrent::file::{TorrentFile, InfoDict, FileDict}` into the
//! single `info` dictionary both paths decode identically.

use crate::bencode::BencodeValue;

use super::{TorrentError, TorrentResult};

/// One file within the torrent's logical content, in declaration order.
/// `offset` is the cumulative byte offset of this file's first byte within
/// the concatenated content (piece indices are computed against that
/// concatenation, not per-file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    pub info_hash: [u8; 20],
    pub name: String,
    pub piece_length: u64,
    /// Concatenated 20-byte SHA-1 hashes, one per piece.
    pub pieces: Vec<u8>,
    pub total_size: u64,
    pub files: Vec<FileEntry>,
    pub is_private: bool,
    pub announce: Option<String>,
    pub announce_list: Option<Vec<Vec<String>>>,
}

impl TorrentInfo {
    pub fn piece_count(&self) -> usize {
        self.pieces.len() / 20
    }

    pub fn piece_hash(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(20)?;
        self.pieces.get(start..start + 20)
    }

    /// Builds a `TorrentInfo` from an already-decoded `info` dictionary
    /// value and its info-hash, leaving `announce`/`announce_list` unset
    /// (the metainfo parser fills those in from the outer dictionary; a
    /// metadata exchange has no tracker fields to offer).
    pub fn from_info_value(info_hash: [u8; 20], info: &BencodeValue) -> TorrentResult<Self> {
        let dict = info
            .as_dict()
            .ok_or_else(|| TorrentError::InvalidFormat("info is not a dict".into()))?;
        let get = |key: &[u8]| dict.iter().find(|(k, _)| k == key).map(|(_, v)| v);

        let piece_length = match get(b"piece length") {
            Some(BencodeValue::Integer(i)) if *i >= 0 => *i as u64,
            _ => return Err(TorrentError::MissingField("piece length".into())),
        };
        let pieces = match get(b"pieces") {
            Some(BencodeValue::Bytes(b)) => b.clone(),
            _ => return Err(TorrentError::MissingField("pieces".into())),
        };
        if pieces.len() % 20 != 0 {
            return Err(TorrentError::InvalidPiecesHashLength);
        }
        let name = match get(b"name") {
            Some(BencodeValue::Bytes(b)) => String::from_utf8(b.clone())
                .map_err(|e| TorrentError::InvalidFormat(format!("name not UTF-8: {e}")))?,
            _ => return Err(TorrentError::MissingField("name".into())),
        };
        let is_private = matches!(get(b"private"), Some(BencodeValue::Integer(1)));

        let (files, total_size) = match get(b"files") {
            Some(BencodeValue::List(entries)) => {
                let mut files = Vec::with_capacity(entries.len());
                let mut offset = 0u64;
                for entry in entries {
                    let entry_dict = entry
                        .as_dict()
                        .ok_or_else(|| TorrentError::InvalidFormat("file entry not a dict".into()))?;
                    let get_entry = |key: &[u8]| entry_dict.iter().find(|(k, _)| k == key).map(|(_, v)| v);
                    let length = match get_entry(b"length") {
                        Some(BencodeValue::Integer(i)) if *i >= 0 => *i as u64,
                        _ => return Err(TorrentError::MissingField("file length".into())),
                    };
                    let path = match get_entry(b"path") {
                        Some(BencodeValue::List(parts)) => parts
                            .iter()
                            .map(|p| match p {
                                BencodeValue::Bytes(b) => String::from_utf8(b.clone())
                                    .map_err(|e| TorrentError::InvalidFormat(format!("path component not UTF-8: {e}"))),
                                _ => Err(TorrentError::InvalidFormat("path component not a string".into())),
                            })
                            .collect::<TorrentResult<Vec<_>>>()?,
                        _ => return Err(TorrentError::MissingField("file path".into())),
                    };
                    files.push(FileEntry { path, length, offset });
                    offset += length;
                }
                let total = offset;
                (files, total)
            }
            _ => {
                let length = match get(b"length") {
                    Some(BencodeValue::Integer(i)) if *i >= 0 => *i as u64,
                    _ => return Err(TorrentError::MissingField("length".into())),
                };
                (Vec::new(), length)
            }
        };

        Ok(TorrentInfo {
            info_hash,
            name,
            piece_length,
            pieces,
            total_size,
            files,
            is_private,
            announce: None,
            announce_list: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::BencodeValue;

    fn single_file_info() -> BencodeValue {
        BencodeValue::dict(vec![
            (b"length".to_vec(), BencodeValue::integer(11)),
            (b"name".to_vec(), BencodeValue::bytes(b"hello.txt".to_vec())),
            (b"piece length".to_vec(), BencodeValue::integer(11)),
            (b"pieces".to_vec(), BencodeValue::bytes(vec![0u8; 20])),
        ])
    }

    #[test]
    fn parses_single_file_layout() {
        let info = TorrentInfo::from_info_value([1u8; 20], &single_file_info()).unwrap();
        assert_eq!(info.name, "hello.txt");
        assert_eq!(info.total_size, 11);
        assert_eq!(info.piece_count(), 1);
        assert!(info.files.is_empty());
        assert!(!info.is_private);
    }

    #[test]
    fn parses_multi_file_layout_with_cumulative_offsets() {
        let info_value = BencodeValue::dict(vec![
            (b"name".to_vec(), BencodeValue::bytes(b"pack".to_vec())),
            (b"piece length".to_vec(), BencodeValue::integer(16384)),
            (b"pieces".to_vec(), BencodeValue::bytes(vec![0u8; 40])),
            (
                b"files".to_vec(),
                BencodeValue::List(vec![
                    BencodeValue::dict(vec![
                        (b"length".to_vec(), BencodeValue::integer(10)),
                        (b"path".to_vec(), BencodeValue::List(vec![BencodeValue::bytes(b"a.txt".to_vec())])),
                    ]),
                    BencodeValue::dict(vec![
                        (b"length".to_vec(), BencodeValue::integer(20)),
                        (b"path".to_vec(), BencodeValue::List(vec![BencodeValue::bytes(b"b.txt".to_vec())])),
                    ]),
                ]),
            ),
        ]);
        let info = TorrentInfo::from_info_value([2u8; 20], &info_value).unwrap();
        assert_eq!(info.total_size, 30);
        assert_eq!(info.files[0].offset, 0);
        assert_eq!(info.files[1].offset, 10);
    }

    #[test]
    fn rejects_pieces_length_not_a_multiple_of_twenty() {
        let mut info_value = single_file_info();
        if let BencodeValue::Dict(pairs) = &mut info_value {
            for (k, v) in pairs.iter_mut() {
                if k == b"pieces" {
                    *v = BencodeValue::bytes(vec![0u8; 19]);
                }
            }
        }
        assert!(matches!(
            TorrentInfo::from_info_value([0u8; 20], &info_value),
            Err(TorrentError::InvalidPiecesHashLength)
        ));
    }

    #[test]
    fn private_flag_defaults_to_false_unless_exactly_one() {
        let info = TorrentInfo::from_info_value([0u8; 20], &single_file_info()).unwrap();
        assert!(!info.is_private);
    }
}
