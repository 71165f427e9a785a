//! Owns every peer connection for one torrent, translates wire messages into
//! piece-picker/assembler calls, and drives pipelining, choking, and HAVE
//! broadcast. Generalizes the teacher's single-peer `peer::handshake` +
//! ad hoc loop into the spec's "serialized agent" orchestrator: all mutation
//! of `connections`/`peer_states`/`peer_infos` happens from the single
//! `run` loop, so there is never a concurrent write to those maps.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::bitfield::Bitfield;
use crate::metadata::{MetadataExchange, Output as MetadataOutput};
use crate::piece::{CompleteOutcome, PieceAssembler, PiecePicker};
use crate::torrent::TorrentInfo;
use crate::wire::{Handshake, Message};

use super::state::BlockRequest;
use super::transport::{PeerTransport, TransportEvent};
use super::{PeerKey, PeerState};

/// Named defaults from spec §4.5/§4.6/§10.3, overridable per torrent.
#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    pub max_connections_per_torrent: usize,
    pub max_pipeline_depth: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub choke_tick: Duration,
    pub timeout_sweep_interval: Duration,
    pub unchoke_slots: usize,
    pub optimistic_unchoke_interval: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        PeerManagerConfig {
            max_connections_per_torrent: 50,
            max_pipeline_depth: 5,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            choke_tick: Duration::from_secs(10),
            timeout_sweep_interval: Duration::from_secs(5),
            unchoke_slots: 4,
            optimistic_unchoke_interval: Duration::from_secs(30),
        }
    }
}

/// What the manager reports to the torrent controller. The manager never
/// calls back into the controller directly; it only ever queues these.
#[derive(Debug)]
pub enum ManagerEvent {
    MetadataComplete(TorrentInfo),
    PieceVerified { index: usize, data: Vec<u8> },
    PieceCorrupt { index: usize },
    PeerConnected(PeerKey),
    PeerDisconnected(PeerKey),
    TorrentComplete,
}

struct PeerInfo {
    peer_id: [u8; 20],
    supports_extensions: bool,
}

pub struct PeerManager {
    info_hash: [u8; 20],
    my_peer_id: [u8; 20],
    config: PeerManagerConfig,

    connections: HashMap<PeerKey, PeerTransport>,
    peer_states: HashMap<PeerKey, PeerState>,
    peer_infos: HashMap<PeerKey, PeerInfo>,
    metadata_exchanges: HashMap<PeerKey, MetadataExchange>,
    downloaded_since_tick: HashMap<PeerKey, u64>,
    /// Raw `bitfield` bytes received from a peer while metadata is still
    /// unknown (BEP-3 allows a peer to send its bitfield before the
    /// extended handshake/metadata exchange completes). Replayed into
    /// `peer_states`/`picker` once `install_info` learns the piece count;
    /// without this, a seed that announced its bitfield early is never
    /// recorded and `try_fill` can never select a piece for it.
    pending_bitfields: HashMap<PeerKey, Vec<u8>>,
    optimistic_cursor: usize,

    info: Option<TorrentInfo>,
    picker: Option<PiecePicker>,
    assembler: Option<PieceAssembler>,
    my_have: Bitfield,

    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    manager_events_tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl PeerManager {
    pub fn new(
        info_hash: [u8; 20],
        my_peer_id: [u8; 20],
        info: Option<TorrentInfo>,
        config: PeerManagerConfig,
        manager_events_tx: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (picker, assembler, my_have) = match &info {
            Some(info) => (
                Some(PiecePicker::new(info.piece_count())),
                Some(PieceAssembler::new(info.piece_length, info.total_size, info.pieces.clone())),
                Bitfield::new(info.piece_count()),
            ),
            None => (None, None, Bitfield::new(0)),
        };

        PeerManager {
            info_hash,
            my_peer_id,
            config,
            connections: HashMap::new(),
            peer_states: HashMap::new(),
            peer_infos: HashMap::new(),
            metadata_exchanges: HashMap::new(),
            downloaded_since_tick: HashMap::new(),
            pending_bitfields: HashMap::new(),
            optimistic_cursor: 0,
            info,
            picker,
            assembler,
            my_have,
            events_tx,
            events_rx,
            manager_events_tx,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_peer(&self, key: &PeerKey) -> bool {
        self.connections.contains_key(key)
    }

    pub fn is_complete(&self) -> bool {
        self.assembler.as_ref().is_some_and(|a| a.is_complete())
    }

    pub fn progress(&self) -> f64 {
        self.assembler.as_ref().map_or(0.0, |a| a.progress())
    }

    /// Builds the two periodic tickers `step`/`run` expect, sized from this
    /// manager's config, for a caller driving `step` directly.
    pub fn new_ticks(&self) -> (tokio::time::Interval, tokio::time::Interval) {
        (tokio::time::interval(self.config.choke_tick), tokio::time::interval(self.config.timeout_sweep_interval))
    }

    /// Connects to a new peer and registers it. De-dupes by key and refuses
    /// past `max_connections_per_torrent`; both are silent no-ops (not
    /// errors), matching §4.6 "refuse if at max".
    #[instrument(level = "debug", skip(self), fields(peer = %addr))]
    pub async fn add_peer(&mut self, addr: PeerKey) {
        if self.has_peer(&addr) || self.connections.len() >= self.config.max_connections_per_torrent {
            return;
        }
        let events_tx = self.events_tx.clone();
        match PeerTransport::connect(addr, self.info_hash, self.my_peer_id, self.config.connect_timeout, events_tx).await {
            Ok(transport) => {
                self.connections.insert(addr, transport);
            }
            Err(err) => {
                warn!(%err, "peer connect failed");
            }
        }
    }

    /// Drains and handles exactly one queued transport event, if any is
    /// immediately available. Returns `false` if the channel is empty.
    pub fn poll_event(&mut self) -> bool {
        match self.events_rx.try_recv() {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(_) => false,
        }
    }

    /// Runs the manager's event loop: dispatches transport events as they
    /// arrive and drives the choking/timeout ticks. Returns when every
    /// transport sender has been dropped (no peers left and none pending).
    pub async fn run(&mut self) {
        let mut choke_tick = tokio::time::interval(self.config.choke_tick);
        let mut sweep_tick = tokio::time::interval(self.config.timeout_sweep_interval);
        while self.step(&mut choke_tick, &mut sweep_tick).await {}
    }

    /// One iteration of the event loop body, factored out so a caller that
    /// needs to interleave its own work (the torrent controller, reacting to
    /// `ManagerEvent`s) can drive the manager one step at a time instead of
    /// handing it the whole task. Returns `false` once every transport
    /// sender has been dropped.
    pub async fn step(&mut self, choke_tick: &mut tokio::time::Interval, sweep_tick: &mut tokio::time::Interval) -> bool {
        tokio::select! {
            event = self.events_rx.recv() => {
                match event {
                    Some(event) => {
                        self.handle_event(event);
                        true
                    }
                    None => false,
                }
            }
            _ = choke_tick.tick() => { self.choking_tick(); true }
            _ = sweep_tick.tick() => { self.timeout_sweep(Instant::now()); true }
        }
    }

    #[instrument(level = "debug", skip(self, event))]
    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(key, handshake) => self.on_connected(key, handshake),
            TransportEvent::Message(key, msg) => self.on_message(key, msg),
            TransportEvent::Disconnected(key) => self.on_disconnected(key),
        }
    }

    fn on_connected(&mut self, key: PeerKey, handshake: Handshake) {
        let piece_count = self.info.as_ref().map_or(0, |i| i.piece_count());
        let mut state = PeerState::with_max_pipeline_depth(piece_count, self.config.max_pipeline_depth);
        state.am_interested = true;
        self.peer_states.insert(key, state);

        self.peer_infos.insert(
            key,
            PeerInfo {
                peer_id: handshake.peer_id,
                supports_extensions: handshake.supports_extensions(),
            },
        );

        if let Some(transport) = self.connections.get(&key) {
            transport.send(Message::Interested);
            if self.info.is_none() && handshake.supports_extensions() {
                self.metadata_exchanges.insert(key, MetadataExchange::new(self.info_hash));
                transport.send(MetadataExchange::handshake_message());
            }
        }

        let _ = self.manager_events_tx.send(ManagerEvent::PeerConnected(key));
        debug!(peer = %key, "peer connected");
    }

    fn on_disconnected(&mut self, key: PeerKey) {
        if let (Some(state), Some(picker)) = (self.peer_states.remove(&key), self.picker.as_mut()) {
            picker.remove_peer_bitfield(&state.peer_bitfield);
        }
        self.peer_infos.remove(&key);
        self.metadata_exchanges.remove(&key);
        self.connections.remove(&key);
        self.downloaded_since_tick.remove(&key);
        self.pending_bitfields.remove(&key);
        let _ = self.manager_events_tx.send(ManagerEvent::PeerDisconnected(key));
        debug!(peer = %key, "peer disconnected");
    }

    #[instrument(level = "trace", skip(self, msg), fields(peer = %key))]
    fn on_message(&mut self, key: PeerKey, msg: Message) {
        match msg {
            Message::KeepAlive => {}
            Message::Choke => {
                if let Some(state) = self.peer_states.get_mut(&key) {
                    state.on_choke();
                }
            }
            Message::Unchoke => {
                if let Some(state) = self.peer_states.get_mut(&key) {
                    state.on_unchoke();
                }
                self.try_fill(key);
            }
            Message::Interested => {
                if let Some(state) = self.peer_states.get_mut(&key) {
                    state.peer_interested = true;
                }
            }
            Message::NotInterested => {
                if let Some(state) = self.peer_states.get_mut(&key) {
                    state.peer_interested = false;
                }
            }
            Message::Have(index) => {
                if let Some(state) = self.peer_states.get_mut(&key) {
                    state.peer_bitfield.set(index as usize);
                }
                if let Some(picker) = self.picker.as_mut() {
                    picker.add_have(index as usize);
                }
                self.try_fill(key);
            }
            Message::Bitfield(bits) => {
                let piece_count = self.info.as_ref().map_or(0, |i| i.piece_count());
                if piece_count > 0 {
                    let bitfield = Bitfield::from_bytes(&bits, piece_count);
                    if let (Some(state), Some(picker)) = (self.peer_states.get_mut(&key), self.picker.as_mut()) {
                        state.peer_bitfield = bitfield.clone();
                        picker.add_peer_bitfield(&bitfield);
                    }
                } else {
                    // Metadata isn't known yet; a peer is allowed to send
                    // its bitfield before that completes. Keep the raw
                    // bytes and replay them once `install_info` learns the
                    // piece count, instead of discarding them.
                    self.pending_bitfields.insert(key, bits);
                }
                self.try_fill(key);
            }
            Message::Request { index, begin, length } => {
                trace!(index, begin, length, "ignoring inbound request (seeding not implemented)");
            }
            Message::Piece { index, begin, block } => self.on_piece(key, index, begin, block),
            Message::Cancel { .. } => {}
            Message::Port(_) => {}
            Message::Extended { ext_id, payload } => self.on_extended(key, ext_id, &payload),
        }
    }

    fn on_extended(&mut self, key: PeerKey, ext_id: u8, payload: &[u8]) {
        let Some(exchange) = self.metadata_exchanges.get_mut(&key) else {
            return;
        };
        let output = match exchange.on_extended(ext_id, payload) {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, peer = %key, "malformed ut_metadata message");
                return;
            }
        };
        let Some(transport) = self.connections.get(&key) else { return };
        match output {
            MetadataOutput::None => {}
            MetadataOutput::SendMessage(msg) => {
                transport.send(msg);
            }
            MetadataOutput::RequestMore(msgs) => {
                for msg in msgs {
                    transport.send(msg);
                }
            }
            MetadataOutput::MetadataComplete(info) => {
                self.install_info(info);
            }
        }
    }

    /// Installs the torrent's metadata once a BEP-9 exchange completes,
    /// creating the picker/assembler and handing every connected peer a
    /// fresh `PeerState` sized to the now-known piece count. Replays any
    /// bitfield a peer sent while metadata was still pending, so a peer
    /// that announced its bitfield early (BEP-3 permits this) is still
    /// known to the picker afterward.
    fn install_info(&mut self, info: TorrentInfo) {
        let piece_count = info.piece_count();
        let mut picker = PiecePicker::new(piece_count);
        self.assembler = Some(PieceAssembler::new(info.piece_length, info.total_size, info.pieces.clone()));
        self.my_have = Bitfield::new(piece_count);
        self.metadata_exchanges.clear();

        for (key, state) in self.peer_states.iter_mut() {
            *state = PeerState::with_max_pipeline_depth(piece_count, self.config.max_pipeline_depth);
            state.am_interested = true;
            if let Some(bits) = self.pending_bitfields.get(key) {
                let bitfield = Bitfield::from_bytes(bits, piece_count);
                state.peer_bitfield = bitfield.clone();
                picker.add_peer_bitfield(&bitfield);
            }
        }
        self.pending_bitfields.clear();
        self.picker = Some(picker);

        let _ = self.manager_events_tx.send(ManagerEvent::MetadataComplete(info.clone()));
        self.info = Some(info);

        let keys: Vec<PeerKey> = self.connections.keys().copied().collect();
        for key in keys {
            self.try_fill(key);
        }
    }

    fn on_piece(&mut self, key: PeerKey, index: u32, begin: u32, block: Vec<u8>) {
        let Some(assembler) = self.assembler.as_mut() else {
            return;
        };
        let idx = index as usize;
        let expected = assembler.expected_piece_size(idx);
        let length = (expected.saturating_sub(begin as u64)).min(crate::piece::BLOCK_SIZE as u64) as u32;
        if let Some(state) = self.peer_states.get_mut(&key) {
            state.remove_request(&BlockRequest { piece_index: index, offset: begin, length });
        }
        *self.downloaded_since_tick.entry(key).or_insert(0) += block.len() as u64;

        assembler.add_block(idx, begin as usize, &block);
        if (assembler.buffer_len(idx) as u64) >= expected {
            let data = assembler.buffer(idx).map(|b| b.to_vec());
            let outcome = assembler.complete_piece(idx);
            match outcome {
                CompleteOutcome::Verified => {
                    self.my_have.set(idx);
                    self.broadcast_have(idx as u32);
                    let _ = self.manager_events_tx.send(ManagerEvent::PieceVerified {
                        index: idx,
                        data: data.unwrap_or_default(),
                    });
                    if assembler.is_complete() {
                        let _ = self.manager_events_tx.send(ManagerEvent::TorrentComplete);
                    }
                }
                CompleteOutcome::Corrupt => {
                    warn!(piece = idx, "piece failed hash verification, re-requesting");
                    let _ = self.manager_events_tx.send(ManagerEvent::PieceCorrupt { index: idx });
                }
                CompleteOutcome::NotReady => {}
            }
        }
        self.try_fill(key);
    }

    fn broadcast_have(&self, index: u32) {
        for transport in self.connections.values() {
            transport.send(Message::Have(index));
        }
    }

    /// One picker/fill cycle for a single peer: pick at most one new piece
    /// to work on, then pipeline every block of that piece the cap allows.
    fn try_fill(&mut self, key: PeerKey) {
        let (Some(picker), Some(_assembler)) = (self.picker.as_ref(), self.assembler.as_ref()) else {
            return;
        };
        let Some(state) = self.peer_states.get(&key) else { return };
        if state.peer_choking || !state.can_request() {
            return;
        }
        let Some(index) = picker.pick(&self.my_have, &state.peer_bitfield) else {
            return;
        };

        let assembler = self.assembler.as_mut().unwrap();
        if !assembler.has_piece(index) && !assembler.is_in_progress(index) {
            assembler.start_piece(index);
        }
        let expected = assembler.expected_piece_size(index);
        let already = assembler.buffer_len(index) as u64;

        let Some(state) = self.peer_states.get_mut(&key) else { return };
        let Some(transport) = self.connections.get(&key) else { return };
        let now = Instant::now();
        let mut offset = already;
        while offset < expected && state.can_request() {
            let length = (expected - offset).min(crate::piece::BLOCK_SIZE as u64) as u32;
            let req = BlockRequest { piece_index: index as u32, offset: offset as u32, length };
            if !state.is_pending(&req) && state.add_request(req, now) {
                transport.send(Message::Request { index: index as u32, begin: offset as u32, length });
            }
            offset += length as u64;
        }
    }

    /// Evicts requests past `request_timeout` and retries fill for any peer
    /// affected, so the freed pipeline slot is used immediately.
    fn timeout_sweep(&mut self, now: Instant) {
        let mut affected = Vec::new();
        for (key, state) in self.peer_states.iter_mut() {
            let evicted = state.evict_timed_out(now, self.config.request_timeout);
            if !evicted.is_empty() {
                affected.push(*key);
            }
        }
        for key in affected {
            self.try_fill(key);
        }
    }

    /// Top `unchoke_slots` peers by bytes downloaded this tick are
    /// unchoked; one additional rotating slot is an optimistic unchoke,
    /// deliberately a distinct slot from the rate-ranked ones (§9 open
    /// question (a)). Everyone else is (re-)choked.
    fn choking_tick(&mut self) {
        let mut by_rate: Vec<(PeerKey, u64)> = self
            .downloaded_since_tick
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        by_rate.sort_by(|a, b| b.1.cmp(&a.1));
        let mut unchoked: Vec<PeerKey> = by_rate.iter().take(self.config.unchoke_slots).map(|(k, _)| *k).collect();

        let all_keys: Vec<PeerKey> = self.connections.keys().copied().collect();
        if !all_keys.is_empty() {
            let optimistic = all_keys[self.optimistic_cursor % all_keys.len()];
            self.optimistic_cursor = self.optimistic_cursor.wrapping_add(1);
            if !unchoked.contains(&optimistic) {
                unchoked.push(optimistic);
            }
        }

        for key in &all_keys {
            let should_unchoke = unchoked.contains(key);
            if let (Some(state), Some(transport)) = (self.peer_states.get_mut(key), self.connections.get(key)) {
                if should_unchoke && state.am_choking {
                    state.am_choking = false;
                    transport.send(Message::Unchoke);
                } else if !should_unchoke && !state.am_choking {
                    state.am_choking = true;
                    transport.send(Message::Choke);
                }
            }
        }

        self.downloaded_since_tick.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> TorrentInfo {
        TorrentInfo {
            info_hash: [1u8; 20],
            name: "x".into(),
            piece_length: 16384,
            pieces: vec![0u8; 40],
            total_size: 32768,
            files: Vec::new(),
            is_private: false,
            announce: None,
            announce_list: None,
        }
    }

    fn manager_with_info() -> (PeerManager, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = PeerManager::new([1u8; 20], [2u8; 20], Some(sample_info()), PeerManagerConfig::default(), tx);
        (manager, rx)
    }

    #[test]
    fn starts_with_no_connections_and_known_piece_count() {
        let (manager, _rx) = manager_with_info();
        assert_eq!(manager.connection_count(), 0);
        assert!(!manager.is_complete());
    }

    #[test]
    fn try_fill_is_a_noop_without_a_registered_peer() {
        let (mut manager, _rx) = manager_with_info();
        manager.try_fill("127.0.0.1:6881".parse().unwrap());
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn choking_tick_with_no_peers_does_not_panic() {
        let (mut manager, _rx) = manager_with_info();
        manager.choking_tick();
    }

    #[test]
    fn timeout_sweep_with_no_peers_does_not_panic() {
        let (mut manager, _rx) = manager_with_info();
        manager.timeout_sweep(Instant::now());
    }

    #[test]
    fn bitfield_received_before_metadata_is_replayed_on_install_info() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = PeerManager::new([1u8; 20], [2u8; 20], None, PeerManagerConfig::default(), tx);
        let key: PeerKey = "127.0.0.1:6881".parse().unwrap();
        manager.peer_states.insert(key, PeerState::new(0));

        // A seed sends its full bitfield before metadata is known.
        let full_bitfield = {
            let mut b = Bitfield::new(2);
            b.set(0);
            b.set(1);
            b.to_bytes()
        };
        manager.on_message(key, Message::Bitfield(full_bitfield));
        assert!(manager.peer_states[&key].peer_bitfield.is_empty());
        assert_eq!(manager.pending_bitfields.get(&key).map(Vec::len), Some(1));

        manager.install_info(sample_info());

        let state = &manager.peer_states[&key];
        assert!(state.peer_bitfield.get(0));
        assert!(state.peer_bitfield.get(1));
        assert!(manager.pending_bitfields.is_empty());
        assert_eq!(manager.picker.unwrap().pick(&manager.my_have, &state.peer_bitfield), Some(0));
    }
}
