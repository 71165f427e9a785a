//! Tracker client logic for the BitTorrent protocol: BEP-15 UDP announce
//! only (§4.8). The teacher's HTTP-only client is replaced rather than kept
//! alongside, since an HTTP tracker client is an explicit Non-goal of the
//! core this crate implements.

pub mod udp;

pub use udp::{
    generate_peer_id, AnnounceEvent, AnnounceRequest, AnnounceResponse, Client, Peer, UdpTrackerError, UdpTrackerResult,
};
