//! Per-torrent lifecycle: owns a [`PeerManager`], bootstraps from either a
//! parsed metainfo or a magnet link, and exposes status/wait-for-X
//! semantics to a caller (a session, or the demonstration CLI). The teacher
//! has no equivalent orchestrator — it drives a single hardcoded download
//! from `main`; this generalizes that into a reusable, repeatable type.

use tokio::sync::mpsc;
use tracing::instrument;

use crate::peer::manager::{ManagerEvent, PeerManagerConfig};
use crate::peer::{PeerKey, PeerManager};

use super::{magnet, metainfo, TorrentInfo, TorrentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentStatus {
    /// Metadata (the `info` dictionary) is not yet known; bootstrapping via
    /// BEP-9 from connected peers.
    FetchingMetadata,
    Downloading,
    Complete,
}

pub struct TorrentController {
    info_hash: [u8; 20],
    manager: PeerManager,
    manager_events_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    info: Option<TorrentInfo>,
    status: TorrentStatus,
}

impl TorrentController {
    fn new(info_hash: [u8; 20], peer_id: [u8; 20], info: Option<TorrentInfo>, config: PeerManagerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = if info.is_some() { TorrentStatus::Downloading } else { TorrentStatus::FetchingMetadata };
        let manager = PeerManager::new(info_hash, peer_id, info.clone(), config, tx);
        TorrentController {
            info_hash,
            manager,
            manager_events_rx: rx,
            info,
            status,
        }
    }

    /// Parses a `.torrent` file's bytes; metadata is known immediately.
    pub fn from_metainfo_bytes(data: &[u8], peer_id: [u8; 20], config: PeerManagerConfig) -> TorrentResult<Self> {
        let info = metainfo::parse(data)?;
        Ok(Self::new(info.info_hash, peer_id, Some(info), config))
    }

    /// Parses a magnet URI; metadata is unknown until a peer supplies it.
    pub fn from_magnet_uri(uri: &str, peer_id: [u8; 20], config: PeerManagerConfig) -> TorrentResult<Self> {
        let magnet = magnet::parse(uri)?;
        Ok(Self::new(magnet.info_hash, peer_id, None, config))
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn status(&self) -> TorrentStatus {
        self.status
    }

    pub fn info(&self) -> Option<&TorrentInfo> {
        self.info.as_ref()
    }

    /// Fraction of pieces verified so far, `0.0` while metadata is unknown.
    pub fn progress(&self) -> f64 {
        self.manager.progress()
    }

    #[instrument(level = "debug", skip(self), fields(peer = %addr))]
    pub async fn add_peer(&mut self, addr: PeerKey) {
        self.manager.add_peer(addr).await;
    }

    /// Drives the manager and this controller's own state machine until the
    /// download completes (or the caller drops every connection, ending the
    /// manager's loop).
    #[instrument(level = "debug", skip(self))]
    pub async fn run_until_complete(&mut self) {
        let (mut choke_tick, mut sweep_tick) = self.manager.new_ticks();
        loop {
            tokio::select! {
                alive = self.manager.step(&mut choke_tick, &mut sweep_tick) => {
                    if !alive {
                        break;
                    }
                }
                Some(event) = self.manager_events_rx.recv() => {
                    if self.handle_manager_event(event) {
                        break;
                    }
                }
            }
        }
    }

    /// Applies one manager event to controller state; returns `true` once
    /// the torrent is fully downloaded.
    fn handle_manager_event(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::MetadataComplete(info) => {
                self.info = Some(info);
                self.status = TorrentStatus::Downloading;
                false
            }
            ManagerEvent::TorrentComplete => {
                self.status = TorrentStatus::Complete;
                true
            }
            ManagerEvent::PieceVerified { .. }
            | ManagerEvent::PieceCorrupt { .. }
            | ManagerEvent::PeerConnected(_)
            | ManagerEvent::PeerDisconnected(_) => false,
        }
    }
}
