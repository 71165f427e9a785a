//! Piece selection and assembly: the rarest-first picker and the
//! hash-verified per-piece buffer.

pub mod assembler;
pub mod picker;

pub use assembler::{CompleteOutcome, PieceAssembler};
pub use picker::PiecePicker;

/// Block requests are 16 KiB, except the last block of the last piece.
pub const BLOCK_SIZE: u32 = crate::wire::message::BLOCK_SIZE;

pub fn expected_piece_size(piece_index: usize, piece_length: u64, total_size: u64) -> u64 {
    let start = piece_index as u64 * piece_length;
    if start >= total_size {
        return 0;
    }
    piece_length.min(total_size - start)
}
