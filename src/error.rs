//! Crate-wide error currency: one `thiserror`-derived enum aggregating the
//! typed errors each module already returns (`BencodeError`, `WireError`,
//! `TorrentError`, `MetadataError`, `UdpTrackerError`, `DhtError`,
//! `KrpcError`), mirroring the teacher's one-enum-per-concern pattern one
//! level up. Library-internal APIs keep returning their own narrower error
//! type; `EngineError` exists for call sites (the CLI, a caller's top-level
//! `run`) that aggregate several subsystems and want one `?`-able type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bencode parse error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("wire protocol error: {0}")]
    Wire(#[from] crate::wire::WireError),

    #[error("KRPC parse error: {0}")]
    Krpc(#[from] crate::dht::krpc::KrpcError),

    #[error("torrent descriptor error: {0}")]
    Torrent(#[from] crate::torrent::TorrentError),

    #[error("metadata exchange error: {0}")]
    Metadata(#[from] crate::metadata::MetadataError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::UdpTrackerError),

    #[error("DHT error: {0}")]
    Dht(#[from] crate::dht::DhtError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("not connected to any peers")]
    NotConnected,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
