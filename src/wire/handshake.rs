//! The fixed 68-byte BEP-3 handshake, exchanged once before any framed
//! message. This mirrors the teacher's `peer::handshake` module: a plain
//! struct with a `serialize`/async `read`, generalized to carry the BEP-10
//! extension-support bit the rest of this crate needs.

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::instrument;

use super::{WireError, WireResult};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
const HANDSHAKE_LEN: usize = 68;

/// Bit 0x10 of reserved byte 5 advertises BEP-10 extension support.
const EXTENSION_BIT: u8 = 0x10;
const EXTENSION_BYTE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds an outbound handshake with the BEP-10 extension bit set.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[EXTENSION_BYTE] |= EXTENSION_BIT;
        Handshake {
            reserved,
            info_hash,
            peer_id,
        }
    }

    pub fn supports_extensions(&self) -> bool {
        self.reserved[EXTENSION_BYTE] & EXTENSION_BIT != 0
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn deserialize(buf: &[u8; HANDSHAKE_LEN]) -> WireResult<Self> {
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL.as_slice() {
            return Err(WireError::InvalidProtocol);
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Reads exactly one handshake off `stream`, without validating its
    /// info_hash (the caller compares against the torrent it expects).
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> WireResult<Self> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        Self::deserialize(&buf)
    }

    #[instrument(level = "trace", skip(self, stream))]
    pub async fn write(&self, stream: &mut TcpStream) -> WireResult<()> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> WireResult<()> {
        if &self.info_hash != expected_info_hash {
            return Err(WireError::InfoHashMismatch);
        }
        Ok(())
    }
}

/// Connects to `addr`, performs the outbound handshake, reads the peer's
/// reply, and validates its info_hash. Returns the connected stream and the
/// peer's handshake.
#[instrument(level = "debug", skip(info_hash, peer_id))]
pub async fn connect_and_handshake(
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    connect_timeout: Duration,
) -> WireResult<(TcpStream, Handshake)> {
    let mut stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| WireError::Timeout)??;

    let ours = Handshake::new(info_hash, peer_id);
    ours.write(&mut stream).await?;

    let theirs = timeout(connect_timeout, Handshake::read(&mut stream))
        .await
        .map_err(|_| WireError::Timeout)??;
    theirs.validate(&info_hash)?;

    Ok((stream, theirs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_info_hash_and_peer_id() {
        let info_hash = [7u8; 20];
        let peer_id = [9u8; 20];
        let hs = Handshake::new(info_hash, peer_id);
        let bytes = hs.serialize();
        let decoded = Handshake::deserialize(&bytes).unwrap();
        assert_eq!(decoded.info_hash, info_hash);
        assert_eq!(decoded.peer_id, peer_id);
        assert!(decoded.supports_extensions());
    }

    #[test]
    fn default_reserved_advertises_extensions() {
        let hs = Handshake::new([0u8; 20], [0u8; 20]);
        assert_ne!(hs.reserved[5] & 0x10, 0);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut buf = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        buf[1] = b'X';
        assert!(matches!(
            Handshake::deserialize(&buf),
            Err(WireError::InvalidProtocol)
        ));
    }

    #[test]
    fn validate_rejects_mismatched_hash() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(hs.validate(&[2u8; 20]).is_err());
        assert!(hs.validate(&[1u8; 20]).is_ok());
    }
}
