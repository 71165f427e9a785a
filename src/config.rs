//! Per-subsystem configuration structs, each a plain struct with a
//! `Default` impl carrying this specification's named defaults — the same
//! shape the teacher uses for its `tracker::Client`/`AnnounceRequest`
//! structs, rather than a config-file format (the engine is a library;
//! callers own their own configuration surface).

use std::net::SocketAddr;
use std::time::Duration;

use crate::dht::{ALPHA, DEFAULT_BOOTSTRAP_HOSTS, K};
use crate::peer::manager::PeerManagerConfig;

/// DHT node defaults (§4.9, §10.3). The bootstrap list stays caller-supplied
/// data rather than a crate-embedded constant, though `default()` pre-fills
/// it with the well-known hosts for convenience.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    pub bind_addr: SocketAddr,
    pub bootstrap_hosts: Vec<String>,
    pub query_timeout: Duration,
    pub storage_ttl: Duration,
    pub k: usize,
    pub alpha: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        DhtConfig {
            bind_addr: "0.0.0.0:6881".parse().unwrap(),
            bootstrap_hosts: DEFAULT_BOOTSTRAP_HOSTS.iter().map(|s| s.to_string()).collect(),
            query_timeout: Duration::from_secs(5),
            storage_ttl: Duration::from_secs(30 * 60),
            k: K,
            alpha: ALPHA,
        }
    }
}

/// UDP tracker defaults (§4.8).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub connect_timeout: Duration,
    pub num_want: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig { connect_timeout: Duration::from_secs(5), num_want: 50 }
    }
}

/// The engine-wide configuration a caller assembles before starting a
/// torrent: one struct per subsystem, each independently overridable.
/// `peer` re-exports [`PeerManagerConfig`] rather than duplicating its
/// fields, since that type already carries the per-torrent wire-protocol
/// defaults from §4.5/§4.6.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub peer: PeerManagerConfig,
    pub dht: DhtConfig,
    pub tracker: TrackerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dht_config_defaults_match_the_spec() {
        let config = DhtConfig::default();
        assert_eq!(config.k, 8);
        assert_eq!(config.alpha, 3);
        assert_eq!(config.storage_ttl, Duration::from_secs(1800));
        assert!(!config.bootstrap_hosts.is_empty());
    }

    #[test]
    fn tracker_config_defaults_match_the_spec() {
        let config = TrackerConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn engine_config_default_composes_subsystem_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.peer.max_connections_per_torrent, 50);
        assert_eq!(config.dht.k, 8);
    }
}
