//! Per-connection peer bookkeeping and the TCP transport task, owned in
//! aggregate by [`manager::PeerManager`].

pub mod manager;
pub mod state;
pub mod transport;

pub use manager::PeerManager;
pub use state::{BlockRequest, PeerState};
pub use transport::PeerTransport;

/// Key under which a peer is tracked by the manager: `"addr:port"`.
pub type PeerKey = std::net::SocketAddr;
