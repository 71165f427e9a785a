//! Kademlia routing table: 160 k-buckets keyed by XOR-distance bucket index
//! (§4.9), each holding up to `k` contacts. Grounded in the same
//! fixed-capacity-bucket-with-eviction shape the teacher uses for its
//! `piece::PiecePicker`'s rarest-first bookkeeping, adapted to Kademlia's
//! own eviction rule (least-recently-seen stays unless it goes unresponsive).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::node_id::{NodeId, ID_BITS};

pub const K: usize = 8;

/// A known DHT peer: its id, address, and last-seen time for LRU eviction.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
}

#[derive(Debug, Default)]
struct Bucket {
    contacts: Vec<Contact>,
}

impl Bucket {
    /// Inserts or refreshes a contact. Returns the contact that should be
    /// pinged to decide whether it may be evicted, if the bucket is full and
    /// `contact` is new.
    fn insert(&mut self, contact: Contact) -> Option<Contact> {
        if let Some(existing) = self.contacts.iter_mut().find(|c| c.id == contact.id) {
            existing.addr = contact.addr;
            existing.last_seen = contact.last_seen;
            // Move to the back: Kademlia buckets are ordered least- to
            // most-recently-seen.
            let id = existing.id;
            self.contacts.retain(|c| c.id != id);
            self.contacts.push(contact);
            return None;
        }
        if self.contacts.len() < K {
            self.contacts.push(contact);
            return None;
        }
        self.contacts.first().cloned()
    }

    fn remove(&mut self, id: &NodeId) {
        self.contacts.retain(|c| c.id != *id);
    }

    fn remove_stale(&mut self, now: Instant, max_age: Duration) {
        self.contacts.retain(|c| now.duration_since(c.last_seen) < max_age);
    }
}

/// A Kademlia routing table rooted at `own_id`. This implementation uses
/// the simple "one bucket per bit index" layout rather than the dynamically
/// splitting tree some implementations use; §4.9 only requires a k-bucket
/// per bucket index, not a specific splitting strategy.
pub struct RoutingTable {
    own_id: NodeId,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(own_id: NodeId) -> Self {
        RoutingTable { own_id, buckets: (0..ID_BITS).map(|_| Bucket::default()).collect() }
    }

    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    /// Records a contact was just seen. If its bucket is full of contacts
    /// other than `contact` itself, returns the least-recently-seen contact
    /// that a caller should ping before evicting (Kademlia's eviction rule:
    /// a responsive old contact is kept over a new, unverified one).
    pub fn insert(&mut self, contact: Contact) -> Option<Contact> {
        if contact.id == self.own_id {
            return None;
        }
        let index = self.own_id.distance(&contact.id).bucket_index()?;
        self.buckets[index as usize].insert(contact)
    }

    pub fn remove(&mut self, id: &NodeId) {
        if let Some(index) = self.own_id.distance(id).bucket_index() {
            self.buckets[index as usize].remove(id);
        }
    }

    /// Drops every contact last seen more than `max_age` ago, across all
    /// buckets. `remove_stale(Duration::ZERO)` empties the table entirely.
    pub fn remove_stale(&mut self, max_age: Duration) {
        let now = Instant::now();
        for bucket in &mut self.buckets {
            bucket.remove_stale(now, max_age);
        }
    }

    /// Returns up to `k` contacts closest to `target`, across all buckets.
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        let mut all: Vec<&Contact> = self.buckets.iter().flat_map(|b| b.contacts.iter()).collect();
        all.sort_by_key(|c| target.distance(&c.id));
        all.into_iter().take(k).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: NodeId) -> Contact {
        Contact { id, addr: "127.0.0.1:6881".parse().unwrap(), last_seen: Instant::now() }
    }

    #[test]
    fn inserts_and_reports_len() {
        let mut table = RoutingTable::new(NodeId([0u8; 20]));
        for i in 0..5u8 {
            let mut id = [0u8; 20];
            id[19] = i + 1;
            assert!(table.insert(contact(NodeId(id))).is_none());
        }
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn own_id_is_never_inserted() {
        let own = NodeId([3u8; 20]);
        let mut table = RoutingTable::new(own);
        assert!(table.insert(contact(own)).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn bucket_eviction_candidate_is_oldest_when_full() {
        let mut table = RoutingTable::new(NodeId([0u8; 20]));
        // All these ids share the same top bit pattern that maps to bucket 159
        // (distance has only the lowest bit set), filling one bucket to K.
        let mut ids = Vec::new();
        for i in 0..K as u8 {
            let mut id = [0u8; 20];
            id[19] = i + 1;
            ids.push(NodeId(id));
            assert!(table.insert(contact(ids[i as usize])).is_none());
        }
        let mut overflow_id = [0u8; 20];
        overflow_id[19] = K as u8 + 1;
        let evict_candidate = table.insert(contact(NodeId(overflow_id)));
        assert!(evict_candidate.is_some());
        assert_eq!(evict_candidate.unwrap().id, ids[0]);
    }

    #[test]
    fn closest_orders_by_xor_distance() {
        let mut table = RoutingTable::new(NodeId([0u8; 20]));
        let mut near = [0u8; 20];
        near[19] = 0b0000_0001;
        let mut far = [0u8; 20];
        far[0] = 0b1000_0000;
        table.insert(contact(NodeId(far)));
        table.insert(contact(NodeId(near)));

        let closest = table.closest(&NodeId([0u8; 20]), 1);
        assert_eq!(closest[0].id, NodeId(near));
    }

    #[test]
    fn remove_stale_with_zero_age_empties_the_table() {
        let mut table = RoutingTable::new(NodeId([0u8; 20]));
        for i in 0..5u8 {
            let mut id = [0u8; 20];
            id[19] = i + 1;
            table.insert(contact(NodeId(id)));
        }
        assert_eq!(table.len(), 5);
        table.remove_stale(Duration::ZERO);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_stale_keeps_recently_seen_contacts() {
        let mut table = RoutingTable::new(NodeId([0u8; 20]));
        table.insert(contact(NodeId([1u8; 20])));
        table.remove_stale(Duration::from_secs(3600));
        assert_eq!(table.len(), 1);
    }
}
