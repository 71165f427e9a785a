//! Holds in-progress piece buffers and verifies completed pieces against
//! their SHA-1. Per-piece state is a single sum type (absent / in-progress /
//! complete) so the "in progress xor complete" invariant is representable
//! by construction, per the design note on the teacher's scattered
//! `inProgress` + `buffer` + `completed` bookkeeping.

use sha1::{Digest, Sha1};

use crate::bitfield::Bitfield;
use crate::piece::expected_piece_size;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PieceState {
    Absent,
    InProgress(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// SHA-1 matched; the piece is now marked complete and its buffer freed.
    Verified,
    /// SHA-1 mismatched; the buffer is discarded and the piece returns to
    /// absent, eligible for re-selection.
    Corrupt,
    /// Fewer bytes than `expected_piece_size` have arrived so far.
    NotReady,
}

pub struct PieceAssembler {
    piece_length: u64,
    total_size: u64,
    pieces_hash: Vec<u8>,
    states: Vec<PieceState>,
    completed: Bitfield,
}

impl PieceAssembler {
    pub fn new(piece_length: u64, total_size: u64, pieces_hash: Vec<u8>) -> Self {
        assert_eq!(pieces_hash.len() % 20, 0, "pieces hash must be a multiple of 20 bytes");
        let piece_count = pieces_hash.len() / 20;
        PieceAssembler {
            piece_length,
            total_size,
            pieces_hash,
            states: vec![PieceState::Absent; piece_count],
            completed: Bitfield::new(piece_count),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.states.len()
    }

    pub fn expected_piece_size(&self, index: usize) -> u64 {
        expected_piece_size(index, self.piece_length, self.total_size)
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.completed.get(index)
    }

    pub fn is_in_progress(&self, index: usize) -> bool {
        matches!(self.states.get(index), Some(PieceState::InProgress(_)))
    }

    pub fn is_complete(&self) -> bool {
        self.completed.all_set()
    }

    pub fn progress(&self) -> f64 {
        self.completed.progress()
    }

    pub fn completed_bitfield(&self) -> &Bitfield {
        &self.completed
    }

    pub fn buffer_len(&self, index: usize) -> usize {
        match self.states.get(index) {
            Some(PieceState::InProgress(buf)) => buf.len(),
            _ => 0,
        }
    }

    /// The in-progress buffer's bytes so far, for a caller that wants to
    /// persist a piece's content once `complete_piece` reports `Verified`
    /// (the assembler itself discards the buffer on completion either way).
    pub fn buffer(&self, index: usize) -> Option<&[u8]> {
        match self.states.get(index) {
            Some(PieceState::InProgress(buf)) => Some(buf),
            _ => None,
        }
    }

    /// Creates an empty buffer for `index`. Idempotent; a no-op if the
    /// piece is already in progress or complete.
    pub fn start_piece(&mut self, index: usize) {
        if self.has_piece(index) {
            return;
        }
        if let Some(state @ PieceState::Absent) = self.states.get_mut(index) {
            *state = PieceState::InProgress(Vec::new());
        }
    }

    /// Grows the piece's buffer to at least `offset + data.len()`,
    /// zero-padding, and overwrites that range with `data`.
    pub fn add_block(&mut self, index: usize, offset: usize, data: &[u8]) {
        if self.has_piece(index) {
            return;
        }
        let Some(state) = self.states.get_mut(index) else {
            return;
        };
        let buf = match state {
            PieceState::InProgress(buf) => buf,
            PieceState::Absent => {
                *state = PieceState::InProgress(Vec::new());
                match state {
                    PieceState::InProgress(buf) => buf,
                    PieceState::Absent => unreachable!(),
                }
            }
        };
        let end = offset + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset..end].copy_from_slice(data);
    }

    /// Attempts to verify and finalize a piece. The caller is expected to
    /// poll this once `buffer_len(index) >= expected_piece_size(index)`.
    pub fn complete_piece(&mut self, index: usize) -> CompleteOutcome {
        let expected = self.expected_piece_size(index) as usize;
        let Some(PieceState::InProgress(buf)) = self.states.get(index) else {
            return CompleteOutcome::NotReady;
        };
        if buf.len() < expected {
            return CompleteOutcome::NotReady;
        }

        let digest = Sha1::digest(&buf[..expected]);
        let expected_hash = &self.pieces_hash[index * 20..(index + 1) * 20];
        if digest.as_slice() == expected_hash {
            self.states[index] = PieceState::Absent;
            self.completed.set(index);
            CompleteOutcome::Verified
        } else {
            self.states[index] = PieceState::Absent;
            CompleteOutcome::Corrupt
        }
    }
}
