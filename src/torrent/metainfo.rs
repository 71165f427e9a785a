//! Parses on-disk `.torrent` metainfo files into [`TorrentInfo`], generalized
//! from the teacher's `torrent::file::TorrentFile::parse`. The info-hash is
//! computed from the raw byte range of the `info` value (via
//! [`crate::bencode::find_info_range`]) rather than by re-encoding it, so a
//! non-canonically-encoded source file still hashes the way peers expect.

use sha1::{Digest, Sha1};
use tracing::instrument;

use crate::bencode::{self, BencodeValue};

use super::{TorrentError, TorrentInfo, TorrentResult};

fn parse_announce_list(value: &BencodeValue) -> TorrentResult<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidFormat("announce-list is not a list".into()))?;
    tiers
        .iter()
        .map(|tier| {
            tier.as_list()
                .ok_or_else(|| TorrentError::InvalidFormat("announce-list tier is not a list".into()))?
                .iter()
                .map(|tracker| match tracker {
                    BencodeValue::Bytes(b) => String::from_utf8(b.clone())
                        .map_err(|e| TorrentError::InvalidFormat(format!("tracker URL not UTF-8: {e}"))),
                    _ => Err(TorrentError::InvalidFormat("tracker URL is not a string".into())),
                })
                .collect()
        })
        .collect()
}

/// Parses the raw bytes of a `.torrent` file.
#[instrument(level = "debug", skip(data))]
pub fn parse(data: &[u8]) -> TorrentResult<TorrentInfo> {
    let root = bencode::decode(data)?;
    let dict = root
        .as_dict()
        .ok_or_else(|| TorrentError::InvalidFormat("root is not a dict".into()))?;

    let info_value = dict
        .iter()
        .find(|(k, _)| k == b"info")
        .map(|(_, v)| v)
        .ok_or_else(|| TorrentError::MissingField("info".into()))?;

    let info_range = bencode::find_info_range(data)?;
    let info_hash: [u8; 20] = Sha1::digest(&data[info_range]).into();

    let mut info = TorrentInfo::from_info_value(info_hash, info_value)?;

    info.announce = dict
        .iter()
        .find(|(k, _)| k == b"announce")
        .and_then(|(_, v)| v.as_bytes())
        .map(|b| String::from_utf8_lossy(b).into_owned());

    if let Some((_, list)) = dict.iter().find(|(k, _)| k == b"announce-list") {
        info.announce_list = Some(parse_announce_list(list)?);
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_torrent_bytes() -> Vec<u8> {
        let info = BencodeValue::dict(vec![
            (b"length".to_vec(), BencodeValue::integer(5)),
            (b"name".to_vec(), BencodeValue::bytes(b"a.bin".to_vec())),
            (b"piece length".to_vec(), BencodeValue::integer(5)),
            (b"pieces".to_vec(), BencodeValue::bytes(vec![0u8; 20])),
        ]);
        let root = BencodeValue::dict(vec![
            (b"announce".to_vec(), BencodeValue::bytes(b"udp://tracker.example:80".to_vec())),
            (
                b"announce-list".to_vec(),
                BencodeValue::List(vec![BencodeValue::List(vec![BencodeValue::bytes(
                    b"udp://tracker.example:80".to_vec(),
                )])]),
            ),
            (b"info".to_vec(), info),
        ]);
        bencode::encode(&root)
    }

    #[test]
    fn parses_announce_and_info_hash_from_raw_bytes() {
        let bytes = sample_torrent_bytes();
        let info = parse(&bytes).unwrap();
        assert_eq!(info.name, "a.bin");
        assert_eq!(info.total_size, 5);
        assert_eq!(info.announce.as_deref(), Some("udp://tracker.example:80"));
        assert_eq!(info.announce_list.unwrap(), vec![vec!["udp://tracker.example:80".to_string()]]);

        let info_range = bencode::find_info_range(&bytes).unwrap();
        let expected_hash: [u8; 20] = Sha1::digest(&bytes[info_range]).into();
        assert_eq!(info.info_hash, expected_hash);
    }

    #[test]
    fn info_hash_matches_even_with_noncanonical_surrounding_bytes() {
        // Prepend an extra (unused) top-level key before "info" so the whole
        // file is no longer what `encode` would itself produce; the info
        // byte range is still exact, so the hash is unaffected.
        let info = BencodeValue::dict(vec![
            (b"length".to_vec(), BencodeValue::integer(5)),
            (b"name".to_vec(), BencodeValue::bytes(b"a.bin".to_vec())),
            (b"piece length".to_vec(), BencodeValue::integer(5)),
            (b"pieces".to_vec(), BencodeValue::bytes(vec![0u8; 20])),
        ]);
        let info_bytes = bencode::encode(&info);
        let root = BencodeValue::dict(vec![
            (b"aaa-extra".to_vec(), BencodeValue::integer(1)),
            (b"info".to_vec(), info.clone()),
        ]);
        let bytes = bencode::encode(&root);
        let parsed = parse(&bytes).unwrap();
        let expected_hash: [u8; 20] = Sha1::digest(&info_bytes).into();
        assert_eq!(parsed.info_hash, expected_hash);
    }

    #[test]
    fn missing_info_is_an_error() {
        let root = BencodeValue::dict(vec![(b"announce".to_vec(), BencodeValue::bytes(b"x".to_vec()))]);
        let bytes = bencode::encode(&root);
        assert!(matches!(parse(&bytes), Err(TorrentError::MissingField(_))));
    }
}
