//! Board: the complete position state.
//!
//! A `Board` is a plain value. Applying a move produces a new `Board`; the
//! previous one is left untouched.

use crate::types::{CastlingRights, Color, Piece, PieceKind, Square};

/// Back-rank piece order, a-file to h-file.
const BACK_RANK: [PieceKind; 8] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

/// 8×8 grid of optional pieces plus the side-to-move, castling rights,
/// en-passant target and move counters.
///
/// Invariants for boards produced by this crate (FEN decode or move
/// application): exactly one king per color, no pawn on rank 1 or 8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Board {
    pub(crate) cells: [Option<Piece>; 64],
    pub(crate) side_to_move: Color,
    pub(crate) castling: CastlingRights,
    pub(crate) en_passant: Option<Square>,
    pub(crate) halfmove_clock: u32,
    pub(crate) fullmove_number: u32,
}

impl Board {
    /// A board with no pieces, white to move, no rights.
    ///
    /// Not a valid position on its own; used as a starting point for FEN
    /// decoding and test setups.
    pub(crate) fn empty() -> Self {
        Self {
            cells: [None; 64],
            side_to_move: Color::White,
            castling: CastlingRights::NONE,
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    /// The standard initial position.
    pub fn starting() -> Self {
        let mut board = Self::empty();
        for (file, &kind) in BACK_RANK.iter().enumerate() {
            board.cells[file] = Some(Piece::new(kind, Color::White));
            board.cells[8 + file] = Some(Piece::new(PieceKind::Pawn, Color::White));
            board.cells[48 + file] = Some(Piece::new(PieceKind::Pawn, Color::Black));
            board.cells[56 + file] = Some(Piece::new(kind, Color::Black));
        }
        board.castling = CastlingRights::ALL;
        board
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.cells[square.index()]
    }

    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    pub fn castling_rights(&self) -> CastlingRights {
        self.castling
    }

    pub fn en_passant_target(&self) -> Option<Square> {
        self.en_passant
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Square of `color`'s king.
    ///
    /// Boards built by this crate always have one; `None` only for
    /// hand-assembled test boards.
    pub fn king_square(&self, color: Color) -> Option<Square> {
        Square::all().find(|&sq| {
            self.cells[sq.index()] == Some(Piece::new(PieceKind::King, color))
        })
    }

    /// All occupied squares with their pieces, a1 first.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(|sq| self.cells[sq.index()].map(|p| (sq, p)))
    }

    pub(crate) fn set(&mut self, square: Square, piece: Option<Piece>) {
        self.cells[square.index()] = piece;
    }

    pub(crate) fn take(&mut self, square: Square) -> Option<Piece> {
        self.cells[square.index()].take()
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::starting()
    }
}
