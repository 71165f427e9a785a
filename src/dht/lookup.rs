//! Iterative Kademlia lookups (§4.9): parallel (α-wide) `find_node` /
//! `get_peers` traversal with a convergence test, plus bootstrap from a
//! caller-supplied seed list. Grounded in the same "one piece per cycle,
//! several outstanding requests at once" shape `PeerManager::try_fill` uses
//! for block pipelining, generalized from one peer to an α-wide fan-out
//! across the routing table.

use std::collections::HashSet;
use std::net::SocketAddr;

use tracing::{debug, instrument};

use super::node::{DhtNode, GetPeersOutcome};
use super::node_id::NodeId;
use super::routing::{Contact, K};

pub const ALPHA: usize = 3;
const GET_PEERS_MAX_ROUNDS: usize = 10;

/// Well-known bootstrap hosts (§4.9); callers may use these as
/// `DhtConfig::default()`'s seed list or supply their own.
pub const DEFAULT_BOOTSTRAP_HOSTS: &[&str] = &["router.bittorrent.com:6881", "dht.transmissionbt.com:6881"];

struct ClosestSet {
    target: NodeId,
    contacts: Vec<Contact>,
    queried: HashSet<NodeId>,
}

impl ClosestSet {
    fn new(target: NodeId, seed: Vec<Contact>) -> Self {
        let mut set = ClosestSet { target, contacts: Vec::new(), queried: HashSet::new() };
        set.merge(seed);
        set
    }

    fn merge(&mut self, new_contacts: Vec<Contact>) {
        for contact in new_contacts {
            if !self.contacts.iter().any(|c| c.id == contact.id) {
                self.contacts.push(contact);
            }
        }
        self.contacts.sort_by_key(|c| self.target.distance(&c.id));
        self.contacts.truncate(K);
    }

    fn next_unqueried_batch(&mut self, width: usize) -> Vec<Contact> {
        let batch: Vec<Contact> = self.contacts.iter().filter(|c| !self.queried.contains(&c.id)).take(width).cloned().collect();
        for c in &batch {
            self.queried.insert(c.id);
        }
        batch
    }

}

/// Iteratively queries `find_node(target)`, starting from the node's own
/// routing table, until a full round changes none of the `k` closest
/// contacts found so far.
#[instrument(level = "debug", skip(node))]
pub async fn find_node(node: &DhtNode, target: NodeId) -> Vec<Contact> {
    let seed = node.closest(&target, K).await;
    let mut set = ClosestSet::new(target, seed);

    // `next_unqueried_batch` naturally implements "closest node in the set
    // is unchanged after a full round": once every contact in the current
    // k-closest set has been queried and no query response added a closer
    // one, there is nothing left unqueried and the loop ends.
    loop {
        let batch = set.next_unqueried_batch(ALPHA);
        if batch.is_empty() {
            break;
        }

        let mut found = Vec::new();
        for contact in &batch {
            if let Ok((_, nodes)) = node.find_node(contact.addr, target).await {
                found.extend(nodes);
            }
        }
        set.merge(found);
    }
    set.contacts
}

/// Iteratively queries `get_peers(info_hash)`. Terminates as soon as any
/// peer is found, or after [`GET_PEERS_MAX_ROUNDS`] rounds with none, or
/// when the search otherwise converges the way `find_node` does. If
/// `announce_port` is `Some`, announces to the `k` closest responders
/// using each one's returned token once the search ends.
#[instrument(level = "debug", skip(node))]
pub async fn get_peers(node: &DhtNode, info_hash: NodeId, announce_port: Option<u16>) -> Vec<SocketAddr> {
    let seed = node.closest(&info_hash, K).await;
    let mut set = ClosestSet::new(info_hash, seed);
    let mut peers = Vec::new();
    let mut tokens: Vec<(SocketAddr, Vec<u8>)> = Vec::new();

    for round in 0..GET_PEERS_MAX_ROUNDS {
        let batch = set.next_unqueried_batch(ALPHA);
        if batch.is_empty() {
            break;
        }

        let mut found_nodes = Vec::new();
        for contact in &batch {
            match node.get_peers(contact.addr, info_hash).await {
                Ok(response) => {
                    if let Some(token) = response.token {
                        tokens.push((contact.addr, token));
                    }
                    match response.outcome {
                        GetPeersOutcome::Peers(p) => peers.extend(p),
                        GetPeersOutcome::Nodes(n) => found_nodes.extend(n),
                    }
                }
                Err(_) => continue,
            }
        }
        set.merge(found_nodes);

        if !peers.is_empty() {
            debug!(round, peer_count = peers.len(), "get_peers found peers");
            break;
        }
    }

    if let Some(port) = announce_port {
        for (addr, token) in tokens.into_iter().take(K) {
            let _ = node.announce_peer(addr, info_hash, port, token).await;
        }
    }

    peers.sort_by_key(|a| a.to_string());
    peers.dedup();
    peers
}

/// Contacts well-known seed hosts with `find_node(own_id)`, ignoring
/// per-host resolution or query failures so a single dead bootstrap host
/// never blocks startup.
#[instrument(level = "debug", skip(node))]
pub async fn bootstrap(node: &DhtNode, seed_hosts: &[String]) {
    for host in seed_hosts {
        let addr = match tokio::net::lookup_host(host).await {
            Ok(mut addrs) => match addrs.next() {
                Some(a) => a,
                None => continue,
            },
            Err(_) => continue,
        };
        let _ = node.find_node(addr, node.own_id()).await;
    }
}
