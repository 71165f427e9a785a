//! KRPC: the bencoded query/response/error envelope DHT nodes exchange over
//! UDP (§4.9). Reuses this crate's own `bencode` module rather than a serde
//! derive, matching the teacher's choice of a hand-rolled bencode codec over
//! `serde_bencode` for the same reason: torrent-protocol bencode needs
//! byte-exact, order-preserving round trips that a serde mapping obscures.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;

use crate::bencode::{self, BencodeError, BencodeValue};

use super::node_id::NodeId;

#[derive(Debug, Error)]
pub enum KrpcError {
    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error("malformed KRPC message: {0}")]
    Malformed(&'static str),

    #[error("unknown query method: {0}")]
    UnknownQuery(String),

    #[error("unknown KRPC message type: {0}")]
    UnknownMessageType(String),
}

pub type KrpcResult<T> = Result<T, KrpcError>;

/// A compact node entry: 20-byte id + 4-byte IPv4 + 2-byte port, as packed
/// in a `find_node`/`get_peers` response's `nodes` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactNode {
    pub id: NodeId,
    pub addr: SocketAddrV4,
}

pub fn encode_compact_nodes(nodes: &[CompactNode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * 26);
    for n in nodes {
        out.extend_from_slice(n.id.as_bytes());
        out.extend_from_slice(&n.addr.ip().octets());
        out.extend_from_slice(&n.addr.port().to_be_bytes());
    }
    out
}

pub fn decode_compact_nodes(bytes: &[u8]) -> KrpcResult<Vec<CompactNode>> {
    if bytes.len() % 26 != 0 {
        return Err(KrpcError::Malformed("compact nodes string is not a multiple of 26 bytes"));
    }
    Ok(bytes
        .chunks_exact(26)
        .map(|chunk| {
            let id = NodeId::from_bytes(&chunk[0..20]).expect("chunk is exactly 20 bytes");
            let ip = Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
            let port = u16::from_be_bytes([chunk[24], chunk[25]]);
            CompactNode { id, addr: SocketAddrV4::new(ip, port) }
        })
        .collect())
}

pub fn encode_compact_peer(addr: &SocketAddrV4) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&addr.ip().octets());
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

pub fn decode_compact_peer(bytes: &[u8]) -> KrpcResult<SocketAddr> {
    if bytes.len() != 6 {
        return Err(KrpcError::Malformed("compact peer string is not 6 bytes"));
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Ok(SocketAddr::from((ip, port)))
}

/// The arguments of an outbound or inbound query, keyed by method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ping { id: NodeId },
    FindNode { id: NodeId, target: NodeId },
    GetPeers { id: NodeId, info_hash: NodeId },
    AnnouncePeer { id: NodeId, info_hash: NodeId, port: u16, token: Vec<u8>, implied_port: bool },
}

impl Query {
    fn method_name(&self) -> &'static [u8] {
        match self {
            Query::Ping { .. } => b"ping",
            Query::FindNode { .. } => b"find_node",
            Query::GetPeers { .. } => b"get_peers",
            Query::AnnouncePeer { .. } => b"announce_peer",
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => *id,
        }
    }

    fn args(&self) -> BencodeValue {
        let mut pairs: Vec<(Vec<u8>, BencodeValue)> = vec![(b"id".to_vec(), BencodeValue::bytes(self.id().0.to_vec()))];
        match self {
            Query::Ping { .. } => {}
            Query::FindNode { target, .. } => pairs.push((b"target".to_vec(), BencodeValue::bytes(target.0.to_vec()))),
            Query::GetPeers { info_hash, .. } => {
                pairs.push((b"info_hash".to_vec(), BencodeValue::bytes(info_hash.0.to_vec())))
            }
            Query::AnnouncePeer { info_hash, port, token, implied_port, .. } => {
                pairs.push((b"info_hash".to_vec(), BencodeValue::bytes(info_hash.0.to_vec())));
                pairs.push((b"port".to_vec(), BencodeValue::integer(*port as i64)));
                pairs.push((b"token".to_vec(), BencodeValue::bytes(token.clone())));
                pairs.push((b"implied_port".to_vec(), BencodeValue::integer(*implied_port as i64)));
            }
        }
        BencodeValue::dict(pairs)
    }

    fn from_parts(method: &[u8], args: &BencodeValue) -> KrpcResult<Self> {
        let id = required_id(args, b"id")?;
        match method {
            b"ping" => Ok(Query::Ping { id }),
            b"find_node" => Ok(Query::FindNode { id, target: required_id(args, b"target")? }),
            b"get_peers" => Ok(Query::GetPeers { id, info_hash: required_id(args, b"info_hash")? }),
            b"announce_peer" => {
                let info_hash = required_id(args, b"info_hash")?;
                let port = args
                    .get(b"port")
                    .and_then(BencodeValue::as_integer)
                    .ok_or(KrpcError::Malformed("announce_peer missing port"))? as u16;
                let token = args
                    .get(b"token")
                    .and_then(BencodeValue::as_bytes)
                    .ok_or(KrpcError::Malformed("announce_peer missing token"))?
                    .to_vec();
                let implied_port =
                    args.get(b"implied_port").and_then(BencodeValue::as_integer).unwrap_or(0) != 0;
                Ok(Query::AnnouncePeer { id, info_hash, port, token, implied_port })
            }
            other => Err(KrpcError::UnknownQuery(String::from_utf8_lossy(other).into_owned())),
        }
    }
}

/// A response's results dict. Fields are optional because their presence
/// depends on which query is being answered; the caller, which knows the
/// outstanding transaction's query kind, interprets them accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseFields {
    pub id: NodeId,
    pub nodes: Option<Vec<CompactNode>>,
    pub values: Option<Vec<SocketAddr>>,
    pub token: Option<Vec<u8>>,
}

impl ResponseFields {
    fn to_bencode(&self) -> BencodeValue {
        let mut pairs: Vec<(Vec<u8>, BencodeValue)> = vec![(b"id".to_vec(), BencodeValue::bytes(self.id.0.to_vec()))];
        if let Some(nodes) = &self.nodes {
            pairs.push((b"nodes".to_vec(), BencodeValue::bytes(encode_compact_nodes(nodes))));
        }
        if let Some(values) = &self.values {
            let list = values
                .iter()
                .map(|addr| match addr {
                    SocketAddr::V4(v4) => BencodeValue::bytes(encode_compact_peer(v4)),
                    SocketAddr::V6(_) => BencodeValue::bytes(Vec::new()),
                })
                .collect();
            pairs.push((b"values".to_vec(), BencodeValue::List(list)));
        }
        if let Some(token) = &self.token {
            pairs.push((b"token".to_vec(), BencodeValue::bytes(token.clone())));
        }
        BencodeValue::dict(pairs)
    }

    fn from_bencode(value: &BencodeValue) -> KrpcResult<Self> {
        let id = required_id(value, b"id")?;
        let nodes = match value.get(b"nodes") {
            Some(v) => Some(decode_compact_nodes(v.as_bytes().ok_or(KrpcError::Malformed("nodes is not a bytestring"))?)?),
            None => None,
        };
        let values = match value.get(b"values") {
            Some(v) => {
                let list = v.as_list().ok_or(KrpcError::Malformed("values is not a list"))?;
                let mut peers = Vec::with_capacity(list.len());
                for entry in list {
                    let bytes = entry.as_bytes().ok_or(KrpcError::Malformed("values entry is not a bytestring"))?;
                    peers.push(decode_compact_peer(bytes)?);
                }
                Some(peers)
            }
            None => None,
        };
        let token = value.get(b"token").and_then(BencodeValue::as_bytes).map(|b| b.to_vec());
        Ok(ResponseFields { id, nodes, values, token })
    }
}

fn required_id(value: &BencodeValue, key: &[u8]) -> KrpcResult<NodeId> {
    let bytes = value
        .get(key)
        .and_then(BencodeValue::as_bytes)
        .ok_or(KrpcError::Malformed("missing required 160-bit id field"))?;
    NodeId::from_bytes(bytes).ok_or(KrpcError::Malformed("id field is not 20 bytes"))
}

/// A fully-formed KRPC message, the unit exchanged over the DHT's UDP
/// socket. `t` is the transaction id, short opaque bytes per BEP-5 (this
/// crate always sends 2 bytes but accepts any length on decode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Query { t: Vec<u8>, query: Query },
    Response { t: Vec<u8>, fields: ResponseFields },
    Error { t: Vec<u8>, code: i64, message: String },
}

impl Message {
    pub fn transaction_id(&self) -> &[u8] {
        match self {
            Message::Query { t, .. } | Message::Response { t, .. } | Message::Error { t, .. } => t,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let value = match self {
            Message::Query { t, query } => BencodeValue::dict(vec![
                (b"t".to_vec(), BencodeValue::bytes(t.clone())),
                (b"y".to_vec(), BencodeValue::bytes(b"q".to_vec())),
                (b"q".to_vec(), BencodeValue::bytes(query.method_name().to_vec())),
                (b"a".to_vec(), query.args()),
            ]),
            Message::Response { t, fields } => BencodeValue::dict(vec![
                (b"t".to_vec(), BencodeValue::bytes(t.clone())),
                (b"y".to_vec(), BencodeValue::bytes(b"r".to_vec())),
                (b"r".to_vec(), fields.to_bencode()),
            ]),
            Message::Error { t, code, message } => BencodeValue::dict(vec![
                (b"t".to_vec(), BencodeValue::bytes(t.clone())),
                (b"y".to_vec(), BencodeValue::bytes(b"e".to_vec())),
                (
                    b"e".to_vec(),
                    BencodeValue::List(vec![BencodeValue::integer(*code), BencodeValue::bytes(message.clone().into_bytes())]),
                ),
            ]),
        };
        bencode::encode(&value)
    }

    pub fn decode(bytes: &[u8]) -> KrpcResult<Self> {
        let value = bencode::decode(bytes)?;
        let t = value
            .get(b"t")
            .and_then(BencodeValue::as_bytes)
            .ok_or(KrpcError::Malformed("missing transaction id"))?
            .to_vec();
        let y = value.get(b"y").and_then(BencodeValue::as_bytes).ok_or(KrpcError::Malformed("missing message type"))?;
        match y {
            b"q" => {
                let method = value.get(b"q").and_then(BencodeValue::as_bytes).ok_or(KrpcError::Malformed("missing query method"))?;
                let args = value.get(b"a").ok_or(KrpcError::Malformed("missing query arguments"))?;
                Ok(Message::Query { t, query: Query::from_parts(method, args)? })
            }
            b"r" => {
                let r = value.get(b"r").ok_or(KrpcError::Malformed("missing response results"))?;
                Ok(Message::Response { t, fields: ResponseFields::from_bencode(r)? })
            }
            b"e" => {
                let e = value.get(b"e").and_then(BencodeValue::as_list).ok_or(KrpcError::Malformed("missing error list"))?;
                let code = e.first().and_then(BencodeValue::as_integer).ok_or(KrpcError::Malformed("error missing code"))?;
                let message = e
                    .get(1)
                    .and_then(BencodeValue::as_bytes)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Ok(Message::Error { t, code, message })
            }
            other => Err(KrpcError::UnknownMessageType(String::from_utf8_lossy(other).into_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        NodeId([byte; 20])
    }

    #[test]
    fn ping_query_round_trips() {
        let msg = Message::Query { t: vec![1, 2], query: Query::Ping { id: id(7) } };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn find_node_query_round_trips() {
        let msg = Message::Query { t: vec![9, 9], query: Query::FindNode { id: id(1), target: id(2) } };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn announce_peer_query_round_trips() {
        let msg = Message::Query {
            t: vec![0, 1],
            query: Query::AnnouncePeer { id: id(3), info_hash: id(4), port: 6881, token: vec![5, 6], implied_port: true },
        };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn response_with_nodes_round_trips() {
        let node = CompactNode { id: id(5), addr: "127.0.0.1:6881".parse().unwrap() };
        let msg = Message::Response {
            t: vec![1, 1],
            fields: ResponseFields { id: id(6), nodes: Some(vec![node]), values: None, token: None },
        };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn response_with_values_and_token_round_trips() {
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let msg = Message::Response {
            t: vec![2, 2],
            fields: ResponseFields { id: id(8), nodes: None, values: Some(vec![addr]), token: Some(vec![0xab]) },
        };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn error_message_round_trips() {
        let msg = Message::Error { t: vec![3, 3], code: 201, message: "Generic Error".to_string() };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let value = BencodeValue::dict(vec![
            (b"t".to_vec(), BencodeValue::bytes(vec![1])),
            (b"y".to_vec(), BencodeValue::bytes(b"q".to_vec())),
            (b"q".to_vec(), BencodeValue::bytes(b"bogus".to_vec())),
            (b"a".to_vec(), BencodeValue::dict(vec![(b"id".to_vec(), BencodeValue::bytes(id(1).0.to_vec()))])),
        ]);
        let bytes = bencode::encode(&value);
        assert!(matches!(Message::decode(&bytes), Err(KrpcError::UnknownQuery(_))));
    }
}
