//! Library root for the torrent engine.
//!
//! Re-exports the core modules: bencode, bitfield, wire protocol, piece
//! selection/assembly, peer state/transport/manager, metadata exchange,
//! torrent descriptors, the UDP tracker client, and the Kademlia DHT node.
pub mod bencode;
pub mod bitfield;
pub mod config;
pub mod dht;
pub mod error;
pub mod metadata;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod wire;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
