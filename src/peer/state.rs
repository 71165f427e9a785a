//! Per-connection choke/interest flags and the outstanding-request
//! pipeline, kept as one `PeerState` per connected peer inside the manager.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::bitfield::Bitfield;

pub const DEFAULT_MAX_PIPELINE_DEPTH: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug)]
pub struct PeerState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub peer_bitfield: Bitfield,
    pending_requests: HashMap<BlockRequest, Instant>,
    max_pipeline_depth: usize,
}

impl PeerState {
    pub fn new(piece_count: usize) -> Self {
        Self::with_max_pipeline_depth(piece_count, DEFAULT_MAX_PIPELINE_DEPTH)
    }

    pub fn with_max_pipeline_depth(piece_count: usize, max_pipeline_depth: usize) -> Self {
        PeerState {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            peer_bitfield: Bitfield::new(piece_count),
            pending_requests: HashMap::new(),
            max_pipeline_depth,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn is_pending(&self, req: &BlockRequest) -> bool {
        self.pending_requests.contains_key(req)
    }

    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.pending_requests.len() < self.max_pipeline_depth
    }

    /// Records a new outstanding request. Returns `false` (and does
    /// nothing) if the peer is choking us, the pipeline is already at cap,
    /// or this exact request is already pending.
    pub fn add_request(&mut self, req: BlockRequest, now: Instant) -> bool {
        if !self.can_request() || self.pending_requests.contains_key(&req) {
            return false;
        }
        self.pending_requests.insert(req, now);
        true
    }

    /// Removes a request once its matching `piece` arrives. Returns whether
    /// it had actually been pending.
    pub fn remove_request(&mut self, req: &BlockRequest) -> bool {
        self.pending_requests.remove(req).is_some()
    }

    /// BEP-3: an incoming `choke` voids every outstanding request.
    pub fn on_choke(&mut self) {
        self.peer_choking = true;
        self.pending_requests.clear();
    }

    pub fn on_unchoke(&mut self) {
        self.peer_choking = false;
    }

    /// Requests whose enqueue time is older than `timeout`, without
    /// removing them.
    pub fn timed_out_requests(&self, now: Instant, timeout: Duration) -> Vec<BlockRequest> {
        self.pending_requests
            .iter()
            .filter(|(_, &sent_at)| now.saturating_duration_since(sent_at) >= timeout)
            .map(|(req, _)| *req)
            .collect()
    }

    /// Removes and returns timed-out requests so the picker can re-offer
    /// the underlying pieces.
    pub fn evict_timed_out(&mut self, now: Instant, timeout: Duration) -> Vec<BlockRequest> {
        let stale = self.timed_out_requests(now, timeout);
        for req in &stale {
            self.pending_requests.remove(req);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_choked_and_uninterested_both_ways() {
        let ps = PeerState::new(10);
        assert!(ps.am_choking);
        assert!(!ps.am_interested);
        assert!(ps.peer_choking);
        assert!(!ps.peer_interested);
    }

    #[test]
    fn cannot_request_while_peer_choking() {
        let mut ps = PeerState::new(1);
        assert!(!ps.can_request());
        assert!(!ps.add_request(BlockRequest { piece_index: 0, offset: 0, length: 1 }, Instant::now()));
    }

    #[test]
    fn pipeline_cap_is_enforced() {
        let mut ps = PeerState::with_max_pipeline_depth(1, 2);
        ps.on_unchoke();
        let now = Instant::now();
        assert!(ps.add_request(BlockRequest { piece_index: 0, offset: 0, length: 1 }, now));
        assert!(ps.add_request(BlockRequest { piece_index: 0, offset: 16384, length: 1 }, now));
        assert!(!ps.add_request(BlockRequest { piece_index: 0, offset: 32768, length: 1 }, now));
        assert_eq!(ps.pending_count(), 2);
    }

    #[test]
    fn choke_clears_all_pending_requests() {
        let mut ps = PeerState::with_max_pipeline_depth(1, 5);
        ps.on_unchoke();
        ps.add_request(BlockRequest { piece_index: 0, offset: 0, length: 1 }, Instant::now());
        ps.on_choke();
        assert_eq!(ps.pending_count(), 0);
    }

    #[test]
    fn timed_out_requests_is_subset_of_pending() {
        let mut ps = PeerState::with_max_pipeline_depth(1, 5);
        ps.on_unchoke();
        let req = BlockRequest { piece_index: 0, offset: 0, length: 1 };
        ps.add_request(req, Instant::now());
        let out = ps.timed_out_requests(Instant::now(), Duration::from_secs(0));
        assert!(out.iter().all(|r| ps.is_pending(r)));
        assert_eq!(out, vec![req]);
    }

    #[test]
    fn evict_timed_out_removes_from_pending() {
        let mut ps = PeerState::with_max_pipeline_depth(1, 5);
        ps.on_unchoke();
        let req = BlockRequest { piece_index: 0, offset: 0, length: 1 };
        ps.add_request(req, Instant::now());
        let evicted = ps.evict_timed_out(Instant::now(), Duration::from_secs(0));
        assert_eq!(evicted, vec![req]);
        assert_eq!(ps.pending_count(), 0);
    }
}
