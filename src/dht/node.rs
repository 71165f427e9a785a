//! A single DHT node: owns the UDP socket, the routing table and peer
//! storage, transaction correlation, and inbound query handling (§4.9).
//! Shared state is behind `Mutex`es rather than routed through a single
//! actor loop the way `PeerManager` is, because queries and inbound
//! handling both need concurrent access to the same routing table while an
//! iterative lookup (`lookup.rs`) has several requests in flight at once —
//! the mailbox-per-connection shape that fits one peer per TCP stream
//! doesn't fit one shared UDP socket serving arbitrarily many correspondents.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{instrument, trace, warn};

use super::krpc::{CompactNode, KrpcError, Message, Query, ResponseFields};
use super::node_id::NodeId;
use super::routing::{Contact, RoutingTable, K};
use super::storage::PeerStorage;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Width of a token-validity window; a token is accepted if it matches
/// either the current or the immediately preceding window.
const TOKEN_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Krpc(#[from] KrpcError),

    #[error("query timed out")]
    Timeout,

    #[error("remote returned error {code}: {message}")]
    RemoteError { code: i64, message: String },
}

pub type DhtResult<T> = Result<T, DhtError>;

/// Outcome of a `get_peers` query: either peers directly, or closer nodes
/// to continue an iterative lookup with, plus the responder's token (only
/// meaningful if a subsequent `announce_peer` targets the same node).
#[derive(Debug, Clone)]
pub enum GetPeersOutcome {
    Peers(Vec<SocketAddr>),
    Nodes(Vec<Contact>),
}

#[derive(Debug, Clone)]
pub struct GetPeersResponse {
    pub responder_id: NodeId,
    pub token: Option<Vec<u8>>,
    pub outcome: GetPeersOutcome,
}

pub struct DhtNode {
    own_id: NodeId,
    socket: UdpSocket,
    routing_table: Mutex<RoutingTable>,
    storage: Mutex<PeerStorage>,
    pending: Mutex<HashMap<Vec<u8>, oneshot::Sender<Message>>>,
    token_secret: [u8; 20],
}

impl DhtNode {
    pub async fn bind(own_id: NodeId, bind_addr: SocketAddr) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let mut token_secret = [0u8; 20];
        rand::rng().fill_bytes(&mut token_secret);
        Ok(Arc::new(DhtNode {
            own_id,
            socket,
            routing_table: Mutex::new(RoutingTable::new(own_id)),
            storage: Mutex::new(PeerStorage::new()),
            pending: Mutex::new(HashMap::new()),
            token_secret,
        }))
    }

    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    pub async fn routing_table_len(&self) -> usize {
        self.routing_table.lock().await.len()
    }

    pub async fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        self.routing_table.lock().await.closest(target, k)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Records a contact directly, e.g. one learned from a tracker's peer
    /// list rather than from a KRPC exchange. A full bucket returns its
    /// least-recently-seen contact as a ping candidate; this node doesn't
    /// verify it before evicting, since that would require a synchronous
    /// round-trip inside the receive path, so the candidate is simply
    /// dropped in favor of the newly-seen contact.
    pub async fn insert_contact(&self, id: NodeId, addr: SocketAddr) {
        let contact = Contact { id, addr, last_seen: std::time::Instant::now() };
        self.routing_table.lock().await.insert(contact);
    }

    /// Runs the receive loop until the socket errors. Intended to be spawned
    /// once per node: `tokio::spawn(node.clone().run())`.
    #[instrument(level = "debug", skip(self))]
    pub async fn run(self: Arc<Self>) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "DHT socket recv failed, stopping node");
                    return;
                }
            };
            let node = Arc::clone(&self);
            let datagram = buf[..len].to_vec();
            tokio::spawn(async move {
                node.handle_datagram(&datagram, from).await;
            });
        }
    }

    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let message = match Message::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                trace!(error = %e, %from, "dropping malformed KRPC datagram");
                return;
            }
        };
        match message {
            Message::Query { t, query } => self.handle_query(t, query, from).await,
            Message::Response { .. } | Message::Error { .. } => self.resolve_pending(message, from).await,
        }
    }

    async fn resolve_pending(&self, message: Message, from: SocketAddr) {
        let t = message.transaction_id().to_vec();
        if let Message::Response { fields, .. } = &message {
            self.insert_contact(fields.id, from).await;
        }
        let sender = self.pending.lock().await.remove(&t);
        if let Some(sender) = sender {
            let _ = sender.send(message);
        }
    }

    #[instrument(level = "trace", skip(self, t))]
    async fn handle_query(&self, t: Vec<u8>, query: Query, from: SocketAddr) {
        self.insert_contact(query.id(), from).await;
        let response = match &query {
            Query::Ping { .. } => Message::Response { t: t.clone(), fields: ResponseFields { id: self.own_id, ..Default::default() } },
            Query::FindNode { target, .. } => {
                let nodes = self.closest_as_compact(target).await;
                Message::Response { t: t.clone(), fields: ResponseFields { id: self.own_id, nodes: Some(nodes), ..Default::default() } }
            }
            Query::GetPeers { info_hash, .. } => {
                let token = self.make_token(from);
                let peers = self.storage.lock().await.get_peers(info_hash);
                if peers.is_empty() {
                    let target = *info_hash;
                    let nodes = self.closest_as_compact(&target).await;
                    Message::Response {
                        t: t.clone(),
                        fields: ResponseFields { id: self.own_id, nodes: Some(nodes), token: Some(token), ..Default::default() },
                    }
                } else {
                    Message::Response {
                        t: t.clone(),
                        fields: ResponseFields { id: self.own_id, values: Some(peers), token: Some(token), ..Default::default() },
                    }
                }
            }
            Query::AnnouncePeer { info_hash, port, token, implied_port, .. } => {
                if !self.verify_token(from, token) {
                    Message::Error { t: t.clone(), code: 203, message: "Invalid token".to_string() }
                } else {
                    let actual_port = if *implied_port { from.port() } else { *port };
                    let addr = SocketAddr::new(from.ip(), actual_port);
                    self.storage.lock().await.announce(*info_hash, addr);
                    Message::Response { t: t.clone(), fields: ResponseFields { id: self.own_id, ..Default::default() } }
                }
            }
        };
        let bytes = response.encode();
        let _ = self.socket.send_to(&bytes, from).await;
    }

    async fn closest_as_compact(&self, target: &NodeId) -> Vec<CompactNode> {
        self.routing_table
            .lock()
            .await
            .closest(target, K)
            .into_iter()
            .filter_map(|c| match c.addr {
                SocketAddr::V4(v4) => Some(CompactNode { id: c.id, addr: v4 }),
                SocketAddr::V6(_) => None,
            })
            .collect()
    }

    fn token_window(&self, when: SystemTime) -> u64 {
        let secs = when.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        secs / TOKEN_WINDOW.as_secs()
    }

    fn token_for_window(&self, addr: SocketAddr, window: u64) -> Vec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(self.token_secret);
        hasher.update(addr.ip().to_string().as_bytes());
        hasher.update(window.to_be_bytes());
        hasher.finalize()[..8].to_vec()
    }

    fn make_token(&self, addr: SocketAddr) -> Vec<u8> {
        self.token_for_window(addr, self.token_window(SystemTime::now()))
    }

    fn verify_token(&self, addr: SocketAddr, token: &[u8]) -> bool {
        let now = SystemTime::now();
        let current = self.token_window(now);
        token == self.token_for_window(addr, current) || token == self.token_for_window(addr, current.saturating_sub(1))
    }

    async fn next_transaction_id(&self) -> Vec<u8> {
        let pending = self.pending.lock().await;
        loop {
            let mut t = [0u8; 2];
            rand::rng().fill_bytes(&mut t);
            if !pending.contains_key(t.as_slice()) {
                return t.to_vec();
            }
        }
    }

    /// Sends a query and awaits its matching response, correlated by
    /// transaction id, within [`DEFAULT_QUERY_TIMEOUT`].
    #[instrument(level = "trace", skip(self, query))]
    pub async fn query(&self, addr: SocketAddr, query: Query) -> DhtResult<ResponseFields> {
        let t = self.next_transaction_id().await;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(t.clone(), tx);

        let message = Message::Query { t: t.clone(), query };
        let bytes = message.encode();
        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            self.pending.lock().await.remove(&t);
            return Err(e.into());
        }

        match timeout(DEFAULT_QUERY_TIMEOUT, rx).await {
            Ok(Ok(Message::Response { fields, .. })) => Ok(fields),
            Ok(Ok(Message::Error { code, message, .. })) => Err(DhtError::RemoteError { code, message }),
            Ok(Ok(Message::Query { .. })) => Err(DhtError::Krpc(KrpcError::Malformed("received a query in reply to our own query"))),
            Ok(Err(_)) => Err(DhtError::Timeout),
            Err(_) => {
                self.pending.lock().await.remove(&t);
                Err(DhtError::Timeout)
            }
        }
    }

    pub async fn ping(&self, addr: SocketAddr) -> DhtResult<NodeId> {
        let fields = self.query(addr, Query::Ping { id: self.own_id }).await?;
        Ok(fields.id)
    }

    pub async fn find_node(&self, addr: SocketAddr, target: NodeId) -> DhtResult<(NodeId, Vec<Contact>)> {
        let fields = self.query(addr, Query::FindNode { id: self.own_id, target }).await?;
        Ok((fields.id, compact_nodes_to_contacts(fields.nodes.unwrap_or_default())))
    }

    pub async fn get_peers(&self, addr: SocketAddr, info_hash: NodeId) -> DhtResult<GetPeersResponse> {
        let fields = self.query(addr, Query::GetPeers { id: self.own_id, info_hash }).await?;
        let outcome = if let Some(values) = fields.values {
            GetPeersOutcome::Peers(values)
        } else {
            GetPeersOutcome::Nodes(compact_nodes_to_contacts(fields.nodes.unwrap_or_default()))
        };
        Ok(GetPeersResponse { responder_id: fields.id, token: fields.token, outcome })
    }

    pub async fn announce_peer(
        &self,
        addr: SocketAddr,
        info_hash: NodeId,
        port: u16,
        token: Vec<u8>,
    ) -> DhtResult<()> {
        self.query(addr, Query::AnnouncePeer { id: self.own_id, info_hash, port, token, implied_port: false }).await?;
        Ok(())
    }
}

fn compact_nodes_to_contacts(nodes: Vec<CompactNode>) -> Vec<Contact> {
    nodes
        .into_iter()
        .map(|n| Contact { id: n.id, addr: SocketAddr::V4(n.addr), last_seen: std::time::Instant::now() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_round_trip_between_two_nodes() {
        let a = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        tokio::spawn(Arc::clone(&b).run());

        let responder_id = a.ping(b_addr).await.unwrap();
        assert_eq!(responder_id, b.own_id());
    }

    #[tokio::test]
    async fn find_node_returns_closer_contacts() {
        let a = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let c_id = NodeId::random();
        b.insert_contact(c_id, "127.0.0.1:6999".parse().unwrap()).await;
        let b_addr = b.socket.local_addr().unwrap();
        tokio::spawn(Arc::clone(&b).run());

        let (responder_id, contacts) = a.find_node(b_addr, NodeId::random()).await.unwrap();
        assert_eq!(responder_id, b.own_id());
        assert!(contacts.iter().any(|c| c.id == c_id));
    }

    #[tokio::test]
    async fn announce_then_get_peers_round_trips_through_the_wire() {
        let a = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        tokio::spawn(Arc::clone(&b).run());

        let info_hash = NodeId::random();
        let first = a.get_peers(b_addr, info_hash).await.unwrap();
        let token = first.token.expect("get_peers always returns a token");
        assert!(matches!(first.outcome, GetPeersOutcome::Nodes(_)));

        a.announce_peer(b_addr, info_hash, 6881, token).await.unwrap();

        let second = a.get_peers(b_addr, info_hash).await.unwrap();
        match second.outcome {
            GetPeersOutcome::Peers(peers) => assert_eq!(peers.len(), 1),
            GetPeersOutcome::Nodes(_) => panic!("expected stored peer to be returned"),
        }
    }

    #[tokio::test]
    async fn announce_with_bad_token_is_rejected() {
        let a = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = DhtNode::bind(NodeId::random(), "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        tokio::spawn(Arc::clone(&b).run());

        let err = a.announce_peer(b_addr, NodeId::random(), 6881, vec![0u8; 8]).await.unwrap_err();
        assert!(matches!(err, DhtError::RemoteError { code: 203, .. }));
    }
}
