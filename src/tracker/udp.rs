//! BEP-15 UDP tracker client: a two-step connect/announce handshake over a
//! single `UdpSocket`, replacing the teacher's HTTP-only `tracker::Client`.
//! Grounded in the same module's shape (a `Client` holding `peer_id`/`port`,
//! an `announce` entry point, a generated peer id) but the wire format is
//! the BEP-15 binary datagram rather than a bencoded HTTP response.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, instrument};

const PROTOCOL_MAGIC: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum UdpTrackerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker at {0} did not resolve to any address")]
    NoResolvedAddress(String),

    #[error("tracker response did not arrive within the timeout")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
}

pub type UdpTrackerResult<T> = std::result::Result<T, UdpTrackerError>;

/// Why the client is announcing, per BEP-15's `event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    None,
    Completed,
    Started,
    Stopped,
}

impl AnnounceEvent {
    fn as_u32(self) -> u32 {
        match self {
            AnnounceEvent::None => 0,
            AnnounceEvent::Completed => 1,
            AnnounceEvent::Started => 2,
            AnnounceEvent::Stopped => 3,
        }
    }
}

/// Parameters for a single announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: AnnounceEvent,
    pub port: u16,
    pub num_want: i32,
}

/// A peer address returned by the tracker's compact peer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<Peer>,
}

/// A UDP tracker client bound to a single tracker host. One `connect`
/// round-trip is performed per `announce` call; BEP-15 allows a
/// `connection_id` to be reused for a minute, but a fresh connect keeps this
/// client's state trivial and matches the one-shot usage pattern of the
/// teacher's `tracker::Client::announce`.
#[derive(Debug)]
pub struct Client {
    socket: UdpSocket,
}

impl Client {
    /// Resolves `tracker_addr` (a `host:port` string) and connects a UDP
    /// socket to the first resolved address.
    #[instrument(level = "debug")]
    pub async fn new(tracker_addr: &str) -> UdpTrackerResult<Self> {
        let addr = lookup_host(tracker_addr)
            .await?
            .next()
            .ok_or_else(|| UdpTrackerError::NoResolvedAddress(tracker_addr.to_string()))?;
        let local_bind: SocketAddr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }.parse().unwrap();
        let socket = UdpSocket::bind(local_bind).await?;
        socket.connect(addr).await?;
        Ok(Self { socket })
    }

    /// Performs the connect handshake, then sends one announce request and
    /// parses its response.
    #[instrument(level = "debug", skip(self, request))]
    pub async fn announce(&self, request: &AnnounceRequest) -> UdpTrackerResult<AnnounceResponse> {
        let connection_id = self.connect().await?;
        self.send_announce(connection_id, request).await
    }

    async fn connect(&self) -> UdpTrackerResult<u64> {
        let txid: u32 = rand::rng().random();
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
        buf.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        buf.extend_from_slice(&txid.to_be_bytes());

        let response = self.send_and_recv(&buf).await?;
        if response.len() < 16 {
            return Err(UdpTrackerError::InvalidResponse("connect response too short"));
        }
        let action = u32::from_be_bytes(response[0..4].try_into().unwrap());
        let resp_txid = u32::from_be_bytes(response[4..8].try_into().unwrap());
        if action != ACTION_CONNECT || resp_txid != txid {
            return Err(UdpTrackerError::InvalidResponse("connect action/txid mismatch"));
        }
        let connection_id = u64::from_be_bytes(response[8..16].try_into().unwrap());
        debug!(connection_id, "tracker connect succeeded");
        Ok(connection_id)
    }

    async fn send_announce(&self, connection_id: u64, request: &AnnounceRequest) -> UdpTrackerResult<AnnounceResponse> {
        let txid: u32 = rand::rng().random();
        let key: u32 = rand::rng().random();

        let mut buf = Vec::with_capacity(98);
        buf.extend_from_slice(&connection_id.to_be_bytes());
        buf.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
        buf.extend_from_slice(&txid.to_be_bytes());
        buf.extend_from_slice(&request.info_hash);
        buf.extend_from_slice(&request.peer_id);
        buf.extend_from_slice(&request.downloaded.to_be_bytes());
        buf.extend_from_slice(&request.left.to_be_bytes());
        buf.extend_from_slice(&request.uploaded.to_be_bytes());
        buf.extend_from_slice(&request.event.as_u32().to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // ip = 0 means "use sender's source address"
        buf.extend_from_slice(&key.to_be_bytes());
        buf.extend_from_slice(&request.num_want.to_be_bytes());
        buf.extend_from_slice(&request.port.to_be_bytes());

        let response = self.send_and_recv(&buf).await?;
        if response.len() < 20 {
            return Err(UdpTrackerError::InvalidResponse("announce response too short"));
        }
        let action = u32::from_be_bytes(response[0..4].try_into().unwrap());
        let resp_txid = u32::from_be_bytes(response[4..8].try_into().unwrap());
        if action != ACTION_ANNOUNCE || resp_txid != txid {
            return Err(UdpTrackerError::InvalidResponse("announce action/txid mismatch"));
        }
        let interval = u32::from_be_bytes(response[8..12].try_into().unwrap());
        let leechers = u32::from_be_bytes(response[12..16].try_into().unwrap());
        let seeders = u32::from_be_bytes(response[16..20].try_into().unwrap());

        let peers = response[20..]
            .chunks_exact(6)
            .map(|chunk| Peer {
                ip: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                port: u16::from_be_bytes([chunk[4], chunk[5]]),
            })
            .collect();

        Ok(AnnounceResponse { interval, leechers, seeders, peers })
    }

    async fn send_and_recv(&self, request: &[u8]) -> UdpTrackerResult<Vec<u8>> {
        self.socket.send(request).await?;
        let mut buf = [0u8; 1024];
        let len = timeout(STEP_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .map_err(|_| UdpTrackerError::Timeout)??;
        Ok(buf[..len].to_vec())
    }
}

/// Generates a unique peer ID for this client: a 9-byte client prefix
/// followed by 11 random bytes.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-RT0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    rand::rng().fill(&mut peer_id[prefix.len()..]);
    peer_id
}
