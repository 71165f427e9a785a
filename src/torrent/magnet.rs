//! Parses `magnet:` URIs (§6): `xt=urn:btih:<40 hex | 32 base32>`, plus
//! optional `dn` (display name) and repeated `tr` (tracker) parameters. The
//! teacher has no magnet support; grounded in the `url` crate's query-string
//! parsing, the same crate the teacher already depends on for tracker URLs.

use base32::Alphabet;
use url::Url;

use super::{TorrentError, TorrentResult};

/// A parsed magnet link: enough to bootstrap a BEP-9 metadata exchange, but
/// not a full [`super::TorrentInfo`] — the piece layout is still unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: [u8; 20],
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// Parses a magnet URI string into its info-hash, display name, and tracker list.
pub fn parse(uri: &str) -> TorrentResult<MagnetLink> {
    let url = Url::parse(uri)?;
    if url.scheme() != "magnet" {
        return Err(TorrentError::InvalidMagnet("not a magnet: URI".into()));
    }

    let mut info_hash = None;
    let mut display_name = None;
    let mut trackers = Vec::new();

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                let hash = value
                    .strip_prefix("urn:btih:")
                    .ok_or_else(|| TorrentError::InvalidMagnet("xt is not a btih urn".into()))?;
                info_hash = Some(decode_info_hash(hash)?);
            }
            "dn" => display_name = Some(value.into_owned()),
            "tr" => trackers.push(value.into_owned()),
            _ => {}
        }
    }

    let info_hash = info_hash.ok_or_else(|| TorrentError::InvalidMagnet("missing xt=urn:btih: parameter".into()))?;
    Ok(MagnetLink { info_hash, display_name, trackers })
}

fn decode_info_hash(hash: &str) -> TorrentResult<[u8; 20]> {
    let bytes = match hash.len() {
        40 => hex::decode(hash).map_err(|e| TorrentError::InvalidMagnet(format!("invalid hex info-hash: {e}")))?,
        32 => base32::decode(Alphabet::Rfc4648 { padding: false }, hash)
            .ok_or_else(|| TorrentError::InvalidMagnet("invalid base32 info-hash".into()))?,
        other => return Err(TorrentError::InvalidMagnet(format!("info-hash has unexpected length {other}"))),
    };
    bytes
        .try_into()
        .map_err(|_| TorrentError::InvalidMagnet("info-hash is not 20 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_info_hash_name_and_tracker() {
        let uri = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=MyT&tr=http://ex/ann";
        let magnet = parse(uri).unwrap();
        assert_eq!(hex::encode(magnet.info_hash), "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(magnet.display_name.as_deref(), Some("MyT"));
        assert_eq!(magnet.trackers, vec!["http://ex/ann".to_string()]);
    }

    #[test]
    fn parses_multiple_trackers() {
        let uri = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&tr=http://a&tr=http://b";
        let magnet = parse(uri).unwrap();
        assert_eq!(magnet.trackers, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn hex_and_base32_forms_agree_on_the_same_hash() {
        let hex_uri = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567";
        let hash = parse(hex_uri).unwrap().info_hash;
        let b32 = base32::encode(Alphabet::Rfc4648 { padding: false }, &hash);
        let b32_uri = format!("magnet:?xt=urn:btih:{b32}");
        assert_eq!(parse(&b32_uri).unwrap().info_hash, hash);
    }

    #[test]
    fn rejects_non_magnet_scheme() {
        assert!(parse("http://example.com").is_err());
    }

    #[test]
    fn rejects_missing_xt() {
        assert!(parse("magnet:?dn=no-hash-here").is_err());
    }
}
