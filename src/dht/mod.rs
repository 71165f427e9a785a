//! Kademlia DHT (BEP-5, §4.9): 160-bit node identifiers and XOR distance,
//! a k-bucket routing table, and transient per-info-hash peer storage. The
//! teacher has no DHT of its own; this is grounded in BEP-5 directly plus
//! the pack's `torrust-torrust-tracker` example for the storage-with-TTL
//! shape, built in the idiom the rest of this crate already establishes
//! (plain structs, `thiserror` error enums, colocated `#[cfg(test)]`).

pub mod krpc;
pub mod lookup;
pub mod node;
pub mod node_id;
pub mod routing;
pub mod storage;

pub use lookup::{bootstrap, find_node, get_peers, ALPHA, DEFAULT_BOOTSTRAP_HOSTS};
pub use node::{DhtError, DhtNode, DhtResult, GetPeersOutcome, GetPeersResponse};
pub use node_id::{Distance, NodeId};
pub use routing::{Contact, RoutingTable, K};
pub use storage::PeerStorage;
