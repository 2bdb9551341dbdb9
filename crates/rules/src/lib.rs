//! Gambit Rules Engine
//!
//! This crate is the authoritative chess rules core. It validates and
//! applies moves, detects terminal conditions, and converts positions to
//! and from FEN. Clients may run their own move previews, but nothing a
//! client says about legality is trusted: every proposal is re-validated
//! here.
//!
//! # Architecture Constraints
//!
//! The rules engine MUST NOT:
//! - Perform I/O operations (file, network, logging)
//! - Read wall-clock time
//! - Use randomness
//! - Retain state between calls (all functions are pure over `Board`)
//!
//! `Game` is the only stateful type: a value owned by exactly one session
//! that appends to its history under that session's serialized stream.

#![deny(unsafe_code)]

mod board;
mod error;
mod fen;
mod movegen;
mod types;

pub use board::Board;
pub use error::{FenError, RulesError, RulesResult};
pub use fen::{STARTING_FEN, decode_fen, encode_fen};
pub use movegen::{
    PromotionPolicy, apply_move, apply_move_with_policy, has_legal_move, is_in_check,
    is_square_attacked, legal_moves,
};
pub use types::{
    CastlingRights, Color, Move, ParseMoveError, ParseSquareError, Piece, PieceKind, Square,
};

// ============================================================================
// Game Status
// ============================================================================

/// Halfmove clock value at which the fifty-move rule applies.
pub const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// Number of occurrences of a position that draws the game.
pub const REPETITION_LIMIT: usize = 3;

/// Outcome classification of a position within a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    Active,
    Checkmate { winner: Color },
    Stalemate,
    InsufficientMaterial,
    FiftyMoveDraw,
    ThreefoldRepetition,
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Winning side, for decisive outcomes.
    pub fn winner(&self) -> Option<Color> {
        match self {
            Self::Checkmate { winner } => Some(*winner),
            _ => None,
        }
    }
}

/// Repetition identity of a position.
///
/// Two positions are the same for repetition purposes when placement, side
/// to move and castling rights match, and the same en-passant capture (if
/// any) is available. An en-passant target that no pawn can use is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    cells: [Option<Piece>; 64],
    side_to_move: Color,
    castling: CastlingRights,
    en_passant: Option<Square>,
}

impl PositionKey {
    pub fn of(board: &Board) -> Self {
        let en_passant = board.en_passant_target().filter(|_| {
            legal_moves(board)
                .into_iter()
                .any(|mv| movegen::is_en_passant(board, mv))
        });
        Self {
            cells: board.cells,
            side_to_move: board.side_to_move(),
            castling: board.castling_rights(),
            en_passant,
        }
    }
}

/// Evaluate the status of `board`, given the keys of every position the
/// game has reached so far (including `board` itself).
///
/// Repetition is a property of the game, not of a single position, which
/// is why the history has to be supplied.
///
/// Precedence: checkmate/stalemate, insufficient material, fifty-move
/// rule, threefold repetition.
pub fn evaluate(board: &Board, history: &[PositionKey]) -> GameStatus {
    if !has_legal_move(board) {
        return if is_in_check(board) {
            GameStatus::Checkmate {
                winner: board.side_to_move().opposite(),
            }
        } else {
            GameStatus::Stalemate
        };
    }

    if is_insufficient_material(board) {
        return GameStatus::InsufficientMaterial;
    }

    if board.halfmove_clock() >= FIFTY_MOVE_HALFMOVES {
        return GameStatus::FiftyMoveDraw;
    }

    let current = PositionKey::of(board);
    if history.iter().filter(|key| **key == current).count() >= REPETITION_LIMIT {
        return GameStatus::ThreefoldRepetition;
    }

    GameStatus::Active
}

/// True when neither side can possibly deliver mate: K v K, K+minor v K,
/// or K+B v K+B with both bishops on the same square color.
pub fn is_insufficient_material(board: &Board) -> bool {
    let mut minors: Vec<(Piece, Square)> = Vec::new();
    for (square, piece) in board.pieces() {
        match piece.kind {
            PieceKind::King => {}
            PieceKind::Knight | PieceKind::Bishop => minors.push((piece, square)),
            PieceKind::Pawn | PieceKind::Rook | PieceKind::Queen => return false,
        }
    }

    match minors.as_slice() {
        [] | [_] => true,
        [(a, sq_a), (b, sq_b)] => {
            a.kind == PieceKind::Bishop
                && b.kind == PieceKind::Bishop
                && a.color != b.color
                && sq_a.is_dark() == sq_b.is_dark()
        }
        _ => false,
    }
}

// ============================================================================
// Game
// ============================================================================

/// A game in progress: the current board, every applied move, and the
/// repetition keys of every position reached.
///
/// `Game` is owned by exactly one session. `play` either applies the move
/// and appends to the history, or fails and changes nothing.
#[derive(Debug, Clone)]
pub struct Game {
    initial: Board,
    board: Board,
    moves: Vec<Move>,
    positions: Vec<PositionKey>,
    policy: PromotionPolicy,
}

impl Game {
    /// A new game from the standard starting position.
    pub fn new(policy: PromotionPolicy) -> Self {
        Self::from_board(Board::starting(), policy)
    }

    /// A new game from an arbitrary position.
    pub fn from_board(board: Board, policy: PromotionPolicy) -> Self {
        let positions = vec![PositionKey::of(&board)];
        Self {
            initial: board.clone(),
            board,
            moves: Vec::new(),
            positions,
            policy,
        }
    }

    /// A new game from a FEN string.
    pub fn from_fen(fen: &str, policy: PromotionPolicy) -> RulesResult<Self> {
        Ok(Self::from_board(decode_fen(fen)?, policy))
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn initial_board(&self) -> &Board {
        &self.initial
    }

    /// Applied moves in order, with promotion kinds filled in.
    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Number of half-moves applied.
    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    pub fn fen(&self) -> String {
        encode_fen(&self.board)
    }

    pub fn promotion_policy(&self) -> PromotionPolicy {
        self.policy
    }

    /// Validate and apply `mv`. Returns the move as applied (promotion
    /// resolved per policy).
    pub fn play(&mut self, mv: Move) -> RulesResult<Move> {
        let applied = self.policy.normalize(&self.board, mv);
        let next = apply_move_with_policy(&self.board, applied, self.policy)?;
        self.positions.push(PositionKey::of(&next));
        self.moves.push(applied);
        self.board = next;
        Ok(applied)
    }

    /// Status of the current position against the full game history.
    pub fn status(&self) -> GameStatus {
        evaluate(&self.board, &self.positions)
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        legal_moves(&self.board)
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new(PromotionPolicy::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
