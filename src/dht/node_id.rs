//! 160-bit node/info-hash identifiers and XOR-distance arithmetic (§4.9),
//! the same fixed-width big-endian id shape the rest of this crate already
//! uses for info-hashes and peer ids (`[u8; 20]` throughout `torrent`/`wire`).

use rand::RngCore;

pub const ID_LEN: usize = 20;
pub const ID_BITS: u32 = (ID_LEN * 8) as u32;

/// A 160-bit identifier: a DHT node id or a torrent info-hash, both drawn
/// from the same address space per BEP-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub [u8; ID_LEN]);

impl NodeId {
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LEN];
        rand::rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; ID_LEN]>::try_from(bytes).ok().map(NodeId)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// XOR distance to `other`, per BEP-5's metric.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }
}

/// An XOR distance between two [`NodeId`]s. Ordering matches numeric
/// distance since both operands are fixed-width big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; ID_LEN]);

impl Distance {
    /// Index (0..160) of the highest set bit, i.e. which k-bucket this
    /// distance falls into. `None` for a zero distance (self).
    pub fn bucket_index(&self) -> Option<u32> {
        for (byte_index, &byte) in self.0.iter().enumerate() {
            if byte != 0 {
                let leading = byte.leading_zeros();
                return Some(ID_BITS - (byte_index as u32 * 8) - leading - 1);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let id = NodeId::random();
        assert_eq!(id.distance(&id).bucket_index(), None);
    }

    #[test]
    fn bucket_index_is_highest_differing_bit() {
        let mut a = [0u8; ID_LEN];
        let mut b = [0u8; ID_LEN];
        a[19] = 0b0000_0001;
        b[19] = 0b0000_0000;
        let d = NodeId(a).distance(&NodeId(b));
        assert_eq!(d.bucket_index(), Some(0));

        let mut a2 = [0u8; ID_LEN];
        a2[0] = 0b1000_0000;
        let d2 = NodeId(a2).distance(&NodeId([0u8; ID_LEN]));
        assert_eq!(d2.bucket_index(), Some(159));
    }

    #[test]
    fn distance_ordering_matches_bucket_index() {
        let origin = NodeId([0u8; ID_LEN]);
        let mut near = [0u8; ID_LEN];
        near[19] = 1;
        let mut far = [0u8; ID_LEN];
        far[0] = 1;
        assert!(origin.distance(&NodeId(near)) < origin.distance(&NodeId(far)));
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(NodeId::random(), NodeId::random());
    }
}
