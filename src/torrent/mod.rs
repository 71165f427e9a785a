//! Torrent descriptor parsing: the `info` dictionary shared by `.torrent`
//! metainfo files and completed metadata exchanges, plus the metainfo and
//! magnet-URI entry points and the per-torrent controller.
//!
//! Generalizes the teacher's `torrent::file`/`torrent::info_hash` pair,
//! which parsed only on-disk `.torrent` files, into a single `TorrentInfo`
//! both bootstrapping paths in this crate produce.
use thiserror::Error;

pub mod controller;
pub mod info;
pub mod magnet;
pub mod metainfo;
pub mod resume;

pub use controller::{TorrentController, TorrentStatus};
pub use info::{FileEntry, TorrentInfo};
pub use magnet::MagnetLink;
pub use resume::ResumeData;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("Invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("Missing or invalid field: {0}")]
    MissingField(String),

    #[error("Invalid pieces hash length")]
    InvalidPiecesHashLength,

    #[error("Url parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("unsupported or malformed magnet URI: {0}")]
    InvalidMagnet(String),
}

/// Result type for torrent operations derived from `std::result`
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
