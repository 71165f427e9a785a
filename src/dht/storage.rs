//! Transient `info_hash -> announced peers` storage backing `get_peers` /
//! `announce_peer` (§4.9), with a fixed TTL per entry and a per-info-hash
//! capacity (default 100, oldest dropped first). Grounded in the same
//! `updated: Instant` + prune-on-read pattern the `torrust-torrust-tracker`
//! pack example uses for its in-memory peer lists.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::node_id::NodeId;

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_CAPACITY: usize = 100;

struct Announced {
    addr: SocketAddr,
    seen_at: Instant,
}

pub struct PeerStorage {
    by_info_hash: HashMap<NodeId, Vec<Announced>>,
    ttl: Duration,
    capacity: usize,
}

impl PeerStorage {
    pub fn new() -> Self {
        PeerStorage { by_info_hash: HashMap::new(), ttl: DEFAULT_TTL, capacity: DEFAULT_CAPACITY }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        PeerStorage { by_info_hash: HashMap::new(), ttl, capacity: DEFAULT_CAPACITY }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        PeerStorage { by_info_hash: HashMap::new(), ttl: DEFAULT_TTL, capacity }
    }

    /// Records a peer announcing itself for `info_hash`, replacing any
    /// existing entry for the same address (refreshing its TTL) and capping
    /// the per-info-hash list at `capacity`, keeping the newest entries.
    pub fn announce(&mut self, info_hash: NodeId, addr: SocketAddr) {
        let entries = self.by_info_hash.entry(info_hash).or_default();
        entries.retain(|a| a.addr != addr);
        entries.push(Announced { addr, seen_at: Instant::now() });
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(0..excess);
        }
    }

    /// Returns the non-expired peers announced for `info_hash`, pruning
    /// expired entries as a side effect.
    pub fn get_peers(&mut self, info_hash: &NodeId) -> Vec<SocketAddr> {
        let ttl = self.ttl;
        let Some(entries) = self.by_info_hash.get_mut(info_hash) else {
            return Vec::new();
        };
        let now = Instant::now();
        entries.retain(|a| now.duration_since(a.seen_at) < ttl);
        let peers = entries.iter().map(|a| a.addr).collect();
        if entries.is_empty() {
            self.by_info_hash.remove(info_hash);
        }
        peers
    }

    /// Drops all expired entries across every info-hash; callers may run
    /// this periodically instead of relying solely on prune-on-read.
    pub fn sweep_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.by_info_hash.retain(|_, entries| {
            entries.retain(|a| now.duration_since(a.seen_at) < ttl);
            !entries.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_then_get_peers_round_trips() {
        let mut storage = PeerStorage::new();
        let info_hash = NodeId([1u8; 20]);
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        storage.announce(info_hash, addr);
        assert_eq!(storage.get_peers(&info_hash), vec![addr]);
    }

    #[test]
    fn expired_entries_are_pruned_on_read() {
        let mut storage = PeerStorage::with_ttl(Duration::from_millis(1));
        let info_hash = NodeId([2u8; 20]);
        storage.announce(info_hash, "127.0.0.1:6881".parse().unwrap());
        std::thread::sleep(Duration::from_millis(5));
        assert!(storage.get_peers(&info_hash).is_empty());
    }

    #[test]
    fn re_announcing_the_same_address_refreshes_ttl() {
        let mut storage = PeerStorage::new();
        let info_hash = NodeId([3u8; 20]);
        let addr: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        storage.announce(info_hash, addr);
        storage.announce(info_hash, addr);
        assert_eq!(storage.get_peers(&info_hash).len(), 1);
    }

    #[test]
    fn unknown_info_hash_yields_no_peers() {
        let mut storage = PeerStorage::new();
        assert!(storage.get_peers(&NodeId([9u8; 20])).is_empty());
    }

    #[test]
    fn announce_caps_per_info_hash_and_keeps_newest() {
        let mut storage = PeerStorage::with_capacity(3);
        let info_hash = NodeId([4u8; 20]);
        let addrs: Vec<SocketAddr> = (0..5).map(|i| format!("127.0.0.1:{}", 6881 + i).parse().unwrap()).collect();
        for addr in &addrs {
            storage.announce(info_hash, *addr);
        }
        let peers = storage.get_peers(&info_hash);
        assert_eq!(peers.len(), 3);
        assert_eq!(peers, &addrs[2..]);
    }
}
