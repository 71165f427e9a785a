//! BEP-9 `ut_metadata` exchange: bootstraps a full [`TorrentInfo`] from a
//! bare info-hash by requesting the `info` dictionary, piece by piece, over
//! the BEP-10 extension channel. The teacher has no equivalent (it only
//! parses on-disk `.torrent` files); grounded instead in the sum-typed
//! `Result` design note in the expanded spec, matching this crate's other
//! agents (`PieceAssembler`, `PeerState`) that model "what happened" as an
//! enum rather than callbacks or exceptions.

use std::collections::HashMap;

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode::{self, BencodeError, BencodeValue};
use crate::torrent::{TorrentError, TorrentInfo};
use crate::wire::message::BLOCK_SIZE;
use crate::wire::Message;

/// Local `ut_metadata` extension id this crate advertises in its extended
/// handshake. Peers address their replies to this id.
pub const LOCAL_UT_METADATA_ID: u8 = 1;
const METADATA_PIECE_SIZE: usize = BLOCK_SIZE as usize;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error(transparent)]
    Torrent(#[from] TorrentError),

    #[error("malformed ut_metadata message: {0}")]
    Malformed(&'static str),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// What a caller should do after feeding an inbound extended message to
/// [`MetadataExchange::on_extended`].
#[derive(Debug)]
pub enum Output {
    /// Nothing to send, exchange still waiting.
    None,
    /// Send a single extended message (our handshake).
    SendMessage(Message),
    /// Send this batch of metadata-piece requests.
    RequestMore(Vec<Message>),
    /// All pieces arrived and verified against the info-hash.
    MetadataComplete(TorrentInfo),
}

/// One exchange per peer connection that might supply metadata; the
/// controller owns one of these while `TorrentInfo` is unknown and discards
/// it (or all of them, across peers) once any one completes.
#[derive(Debug)]
pub struct MetadataExchange {
    info_hash: [u8; 20],
    peer_metadata_id: Option<u8>,
    metadata_size: Option<usize>,
    total_pieces: usize,
    pieces: HashMap<usize, Vec<u8>>,
}

impl MetadataExchange {
    pub fn new(info_hash: [u8; 20]) -> Self {
        MetadataExchange {
            info_hash,
            peer_metadata_id: None,
            metadata_size: None,
            total_pieces: 0,
            pieces: HashMap::new(),
        }
    }

    /// Our half of the BEP-10 extended handshake: `{"m": {"ut_metadata": 1}}`,
    /// sent on extended id 0.
    pub fn handshake_message() -> Message {
        let payload = bencode::encode(&BencodeValue::dict(vec![(
            b"m".to_vec(),
            BencodeValue::dict(vec![(
                b"ut_metadata".to_vec(),
                BencodeValue::integer(LOCAL_UT_METADATA_ID as i64),
            )]),
        )]));
        Message::Extended { ext_id: 0, payload }
    }

    /// Feeds one inbound `extended(ext_id, payload)` message into the
    /// exchange. `ext_id == 0` is the peer's own extended handshake;
    /// `ext_id == LOCAL_UT_METADATA_ID` is a reply addressed to us.
    pub fn on_extended(&mut self, ext_id: u8, payload: &[u8]) -> MetadataResult<Output> {
        if ext_id == 0 {
            return self.on_peer_handshake(payload);
        }
        if ext_id == LOCAL_UT_METADATA_ID {
            return self.on_reply(payload);
        }
        Ok(Output::None)
    }

    fn on_peer_handshake(&mut self, payload: &[u8]) -> MetadataResult<Output> {
        let value = bencode::decode(payload)?;
        let peer_id = value
            .get(b"m")
            .and_then(|m| m.get(b"ut_metadata"))
            .and_then(|v| v.as_integer());
        let size = value.get(b"metadata_size").and_then(|v| v.as_integer());

        if let Some(id) = peer_id {
            self.peer_metadata_id = Some(id as u8);
        }
        if let Some(size) = size {
            if size >= 0 {
                self.metadata_size = Some(size as usize);
            }
        }

        let (Some(peer_id), Some(size)) = (self.peer_metadata_id, self.metadata_size) else {
            return Ok(Output::None);
        };
        if self.total_pieces != 0 {
            // Already requested once (e.g. a duplicate handshake); don't re-send.
            return Ok(Output::None);
        }
        self.total_pieces = size.div_ceil(METADATA_PIECE_SIZE).max(1);

        let requests = (0..self.total_pieces)
            .map(|piece| {
                let payload = bencode::encode(&BencodeValue::dict(vec![
                    (b"msg_type".to_vec(), BencodeValue::integer(0)),
                    (b"piece".to_vec(), BencodeValue::integer(piece as i64)),
                ]));
                Message::Extended { ext_id: peer_id, payload }
            })
            .collect();
        Ok(Output::RequestMore(requests))
    }

    fn on_reply(&mut self, payload: &[u8]) -> MetadataResult<Output> {
        let (value, range) = bencode::decode_with_range(payload)?;
        let trailing = &payload[range.end..];

        let msg_type = value
            .get(b"msg_type")
            .and_then(|v| v.as_integer())
            .ok_or(MetadataError::Malformed("missing msg_type"))?;

        if msg_type != 1 {
            return Ok(Output::None);
        }

        let piece = value
            .get(b"piece")
            .and_then(|v| v.as_integer())
            .ok_or(MetadataError::Malformed("missing piece index"))? as usize;

        self.pieces.insert(piece, trailing.to_vec());

        if self.total_pieces == 0 || self.pieces.len() < self.total_pieces {
            return Ok(Output::None);
        }

        let mut full = Vec::with_capacity(self.metadata_size.unwrap_or(0));
        for i in 0..self.total_pieces {
            match self.pieces.get(&i) {
                Some(bytes) => full.extend_from_slice(bytes),
                None => return Ok(Output::None),
            }
        }

        let digest = Sha1::digest(&full);
        if digest.as_slice() != self.info_hash.as_slice() {
            self.pieces.clear();
            self.total_pieces = 0;
            self.metadata_size = None;
            return Ok(Output::None);
        }

        let info_value = bencode::decode(&full)?;
        let info = TorrentInfo::from_info_value(self.info_hash, &info_value)?;
        Ok(Output::MetadataComplete(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info_bytes() -> Vec<u8> {
        let info = BencodeValue::dict(vec![
            (b"length".to_vec(), BencodeValue::integer(20000)),
            (b"name".to_vec(), BencodeValue::bytes(b"file.bin".to_vec())),
            (b"piece length".to_vec(), BencodeValue::integer(16384)),
            (b"pieces".to_vec(), BencodeValue::bytes(vec![0u8; 40])),
        ]);
        bencode::encode(&info)
    }

    fn info_hash_of(bytes: &[u8]) -> [u8; 20] {
        Sha1::digest(bytes).into()
    }

    #[test]
    fn handshake_message_advertises_local_id() {
        let msg = MetadataExchange::handshake_message();
        match msg {
            Message::Extended { ext_id, payload } => {
                assert_eq!(ext_id, 0);
                let value = bencode::decode(&payload).unwrap();
                assert_eq!(value.get(b"m").unwrap().get(b"ut_metadata").unwrap().as_integer(), Some(1));
            }
            _ => panic!("expected extended message"),
        }
    }

    #[test]
    fn peer_handshake_with_size_emits_request_batch() {
        let info_bytes = sample_info_bytes();
        let mut exchange = MetadataExchange::new(info_hash_of(&info_bytes));

        let handshake_payload = bencode::encode(&BencodeValue::dict(vec![
            (b"m".to_vec(), BencodeValue::dict(vec![(b"ut_metadata".to_vec(), BencodeValue::integer(2))])),
            (b"metadata_size".to_vec(), BencodeValue::integer(info_bytes.len() as i64)),
        ]));

        let out = exchange.on_extended(0, &handshake_payload).unwrap();
        let expected_pieces = info_bytes.len().div_ceil(METADATA_PIECE_SIZE);
        match out {
            Output::RequestMore(msgs) => {
                assert_eq!(msgs.len(), expected_pieces);
                for (i, msg) in msgs.iter().enumerate() {
                    match msg {
                        Message::Extended { ext_id, payload } => {
                            assert_eq!(*ext_id, 2);
                            let v = bencode::decode(payload).unwrap();
                            assert_eq!(v.get(b"msg_type").unwrap().as_integer(), Some(0));
                            assert_eq!(v.get(b"piece").unwrap().as_integer(), Some(i as i64));
                        }
                        _ => panic!("expected extended message"),
                    }
                }
            }
            other => panic!("expected RequestMore, got {other:?}"),
        }
    }

    #[test]
    fn full_exchange_assembles_and_verifies_metadata() {
        let info_bytes = sample_info_bytes();
        let info_hash = info_hash_of(&info_bytes);
        let mut exchange = MetadataExchange::new(info_hash);

        let handshake_payload = bencode::encode(&BencodeValue::dict(vec![
            (b"m".to_vec(), BencodeValue::dict(vec![(b"ut_metadata".to_vec(), BencodeValue::integer(3))])),
            (b"metadata_size".to_vec(), BencodeValue::integer(info_bytes.len() as i64)),
        ]));
        exchange.on_extended(0, &handshake_payload).unwrap();

        let mut last = Output::None;
        for (i, chunk) in info_bytes.chunks(METADATA_PIECE_SIZE).enumerate() {
            let mut reply = bencode::encode(&BencodeValue::dict(vec![
                (b"msg_type".to_vec(), BencodeValue::integer(1)),
                (b"piece".to_vec(), BencodeValue::integer(i as i64)),
                (b"total_size".to_vec(), BencodeValue::integer(info_bytes.len() as i64)),
            ]));
            reply.extend_from_slice(chunk);
            last = exchange.on_extended(LOCAL_UT_METADATA_ID, &reply).unwrap();
        }

        match last {
            Output::MetadataComplete(info) => {
                assert_eq!(info.name, "file.bin");
                assert_eq!(info.total_size, 20000);
                assert_eq!(info.info_hash, info_hash);
            }
            other => panic!("expected MetadataComplete, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_final_piece_resets_instead_of_completing() {
        let info_bytes = sample_info_bytes();
        let info_hash = info_hash_of(&info_bytes);
        let mut exchange = MetadataExchange::new(info_hash);

        let handshake_payload = bencode::encode(&BencodeValue::dict(vec![
            (b"m".to_vec(), BencodeValue::dict(vec![(b"ut_metadata".to_vec(), BencodeValue::integer(3))])),
            (b"metadata_size".to_vec(), BencodeValue::integer(info_bytes.len() as i64)),
        ]));
        exchange.on_extended(0, &handshake_payload).unwrap();

        let mut corrupted = info_bytes.clone();
        let last_byte = corrupted.len() - 1;
        corrupted[last_byte] ^= 0xFF;

        let mut last = Output::None;
        for (i, chunk) in corrupted.chunks(METADATA_PIECE_SIZE).enumerate() {
            let mut reply = bencode::encode(&BencodeValue::dict(vec![
                (b"msg_type".to_vec(), BencodeValue::integer(1)),
                (b"piece".to_vec(), BencodeValue::integer(i as i64)),
            ]));
            reply.extend_from_slice(chunk);
            last = exchange.on_extended(LOCAL_UT_METADATA_ID, &reply).unwrap();
        }

        assert!(matches!(last, Output::None));
        assert_eq!(exchange.total_pieces, 0);
    }

    #[test]
    fn reject_message_is_ignored() {
        let mut exchange = MetadataExchange::new([0u8; 20]);
        let reply = bencode::encode(&BencodeValue::dict(vec![(b"msg_type".to_vec(), BencodeValue::integer(2))]));
        let out = exchange.on_extended(LOCAL_UT_METADATA_ID, &reply).unwrap();
        assert!(matches!(out, Output::None));
    }
}
