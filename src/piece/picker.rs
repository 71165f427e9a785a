//! Rarest-first piece selection, generalized from the teacher's empty
//! `picker.rs` stub into the spec's pure-predicate component: the picker
//! only tracks swarm availability, leaving in-progress/complete/pipelined
//! filtering to its caller (the peer manager).

use crate::bitfield::Bitfield;

#[derive(Debug)]
pub struct PiecePicker {
    availability: Vec<u32>,
}

impl PiecePicker {
    pub fn new(piece_count: usize) -> Self {
        PiecePicker {
            availability: vec![0; piece_count],
        }
    }

    pub fn piece_count(&self) -> usize {
        self.availability.len()
    }

    pub fn availability(&self, index: usize) -> u32 {
        self.availability.get(index).copied().unwrap_or(0)
    }

    /// Adds one peer's bitfield to the availability count. Call once when
    /// the peer's `bitfield` message arrives.
    pub fn add_peer_bitfield(&mut self, bitfield: &Bitfield) {
        for i in 0..self.availability.len() {
            if bitfield.get(i) {
                self.availability[i] += 1;
            }
        }
    }

    /// Reverses `add_peer_bitfield`, e.g. on peer disconnect. Saturating:
    /// availability never drops below zero even if called without a prior
    /// matching add (the caller is expected to pair these, but this
    /// component only trusts its own invariant, not the caller's).
    pub fn remove_peer_bitfield(&mut self, bitfield: &Bitfield) {
        for i in 0..self.availability.len() {
            if bitfield.get(i) {
                self.availability[i] = self.availability[i].saturating_sub(1);
            }
        }
    }

    pub fn add_have(&mut self, index: usize) {
        if let Some(slot) = self.availability.get_mut(index) {
            *slot += 1;
        }
    }

    pub fn remove_have(&mut self, index: usize) {
        if let Some(slot) = self.availability.get_mut(index) {
            *slot = slot.saturating_sub(1);
        }
    }

    /// Returns the lowest-availability piece that `my_have` lacks and
    /// `peer_has` offers, breaking ties by smallest index.
    pub fn pick(&self, my_have: &Bitfield, peer_has: &Bitfield) -> Option<usize> {
        (0..self.availability.len())
            .filter(|&i| !my_have.get(i) && peer_has.get(i))
            .min_by_key(|&i| (self.availability[i], i))
    }

    /// Stable-sorts eligible pieces by availability and returns up to `n`.
    pub fn pick_multiple(&self, my_have: &Bitfield, peer_has: &Bitfield, n: usize) -> Vec<usize> {
        let mut candidates: Vec<usize> = (0..self.availability.len())
            .filter(|&i| !my_have.get(i) && peer_has.get(i))
            .collect();
        candidates.sort_by_key(|&i| self.availability[i]);
        candidates.truncate(n);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitfield_with(count: usize, pieces: &[usize]) -> Bitfield {
        let mut bf = Bitfield::new(count);
        for &p in pieces {
            bf.set(p);
        }
        bf
    }

    #[test]
    fn rarest_first_picks_lowest_availability_among_offered() {
        let mut picker = PiecePicker::new(3);
        picker.add_peer_bitfield(&bitfield_with(3, &[0, 1, 2])); // A
        picker.add_peer_bitfield(&bitfield_with(3, &[0, 1])); // B
        picker.add_peer_bitfield(&bitfield_with(3, &[0])); // C

        let my_have = Bitfield::new(3);
        let peer_offers = bitfield_with(3, &[0, 1, 2]);
        assert_eq!(picker.pick(&my_have, &peer_offers), Some(2));

        let mut my_have = my_have;
        my_have.set(2);
        assert_eq!(picker.pick(&my_have, &peer_offers), Some(1));
    }

    #[test]
    fn never_picks_owned_or_unoffered_pieces() {
        let mut picker = PiecePicker::new(4);
        picker.add_peer_bitfield(&bitfield_with(4, &[0, 1, 2, 3]));

        let mut my_have = Bitfield::new(4);
        my_have.set(1);
        let peer_has = bitfield_with(4, &[0, 2]);

        for _ in 0..10 {
            let pick = picker.pick(&my_have, &peer_has);
            assert!(pick == Some(0) || pick == Some(2));
        }
    }

    #[test]
    fn tie_break_is_smallest_index() {
        let picker = PiecePicker::new(3);
        let my_have = Bitfield::new(3);
        let peer_has = bitfield_with(3, &[0, 1, 2]);
        assert_eq!(picker.pick(&my_have, &peer_has), Some(0));
    }

    #[test]
    fn availability_never_goes_negative() {
        let mut picker = PiecePicker::new(2);
        picker.remove_peer_bitfield(&bitfield_with(2, &[0]));
        assert_eq!(picker.availability(0), 0);
    }

    #[test]
    fn pick_multiple_is_stable_sorted_by_availability() {
        let mut picker = PiecePicker::new(3);
        picker.add_peer_bitfield(&bitfield_with(3, &[0, 1, 2]));
        picker.add_peer_bitfield(&bitfield_with(3, &[0]));
        let my_have = Bitfield::new(3);
        let peer_has = bitfield_with(3, &[0, 1, 2]);
        assert_eq!(picker.pick_multiple(&my_have, &peer_has, 2), vec![1, 2]);
    }
}
