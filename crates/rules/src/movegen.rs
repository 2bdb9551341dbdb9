//! Legal move generation and move application.
//!
//! Generation is pseudo-legal followed by a make-and-test filter: a move is
//! legal when the resulting board does not leave the mover's king attacked.
//! This covers pins, check evasion and en-passant discovered checks without
//! special cases. Castling is checked explicitly (rights, empty path, king
//! not in check, transit and destination squares unattacked).

use crate::board::Board;
use crate::error::{RulesError, RulesResult};
use crate::types::{CastlingRights, Color, Move, Piece, PieceKind, Square};

const KNIGHT_STEPS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

const KING_STEPS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const ROOK_DIRS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

// ============================================================================
// Promotion Policy
// ============================================================================

/// How a pawn move to the last rank without an explicit promotion kind is
/// treated.
///
/// The drag-and-drop client always sends a queen; that is a client
/// limitation, not a protocol rule, so the engine accepts any of the four
/// kinds and only fills in a default when the proposer omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionPolicy {
    /// Omitted promotion kind means queen.
    #[default]
    DefaultToQueen,
    /// Omitted promotion kind makes the move illegal.
    Require,
}

impl PromotionPolicy {
    /// Resolve the promotion kind of `mv` on `board` per this policy.
    ///
    /// A kind supplied on a move that is not a pawn reaching the last rank
    /// is dropped, since clients with a fixed promotion choice send it on
    /// every move. An omitted kind on a promoting move becomes a queen
    /// under `DefaultToQueen` and stays omitted (illegal) under `Require`.
    pub fn normalize(self, board: &Board, mv: Move) -> Move {
        let promotes = matches!(
            board.piece_at(mv.from),
            Some(Piece { kind: PieceKind::Pawn, color }) if mv.to.rank() == color.promotion_rank()
        );
        match (promotes, mv.promotion) {
            (false, Some(_)) => Move {
                promotion: None,
                ..mv
            },
            (true, None) if self == Self::DefaultToQueen => Move {
                promotion: Some(PieceKind::Queen),
                ..mv
            },
            _ => mv,
        }
    }
}

// ============================================================================
// Attacks
// ============================================================================

/// True when any piece of color `by` attacks `square`.
pub fn is_square_attacked(board: &Board, square: Square, by: Color) -> bool {
    // Pawns attack diagonally forward, so look one rank "behind" the target
    // from the attacker's point of view.
    let back = -by.forward();
    for df in [-1, 1] {
        if let Some(from) = square.offset(df, back)
            && board.piece_at(from) == Some(Piece::new(PieceKind::Pawn, by))
        {
            return true;
        }
    }

    for (df, dr) in KNIGHT_STEPS {
        if let Some(from) = square.offset(df, dr)
            && board.piece_at(from) == Some(Piece::new(PieceKind::Knight, by))
        {
            return true;
        }
    }

    for (df, dr) in KING_STEPS {
        if let Some(from) = square.offset(df, dr)
            && board.piece_at(from) == Some(Piece::new(PieceKind::King, by))
        {
            return true;
        }
    }

    let slides = |dirs: [(i8, i8); 4], kind: PieceKind| {
        dirs.iter().any(|&(df, dr)| {
            let mut cursor = square;
            while let Some(next) = cursor.offset(df, dr) {
                match board.piece_at(next) {
                    None => cursor = next,
                    Some(piece) => {
                        return piece.color == by
                            && (piece.kind == kind || piece.kind == PieceKind::Queen);
                    }
                }
            }
            false
        })
    };

    slides(ROOK_DIRS, PieceKind::Rook) || slides(BISHOP_DIRS, PieceKind::Bishop)
}

/// True when the side to move has its king attacked.
pub fn is_in_check(board: &Board) -> bool {
    king_attacked(board, board.side_to_move())
}

fn king_attacked(board: &Board, color: Color) -> bool {
    match board.king_square(color) {
        Some(king) => is_square_attacked(board, king, color.opposite()),
        None => false,
    }
}

// ============================================================================
// Generation
// ============================================================================

/// All legal moves for the side to move.
///
/// Pawn moves to the last rank appear once per promotion kind.
pub fn legal_moves(board: &Board) -> Vec<Move> {
    let us = board.side_to_move();
    pseudo_legal_moves(board)
        .into_iter()
        .filter(|&mv| !king_attacked(&make_move(board, mv), us))
        .collect()
}

/// True when the side to move has at least one legal move.
pub fn has_legal_move(board: &Board) -> bool {
    let us = board.side_to_move();
    pseudo_legal_moves(board)
        .into_iter()
        .any(|mv| !king_attacked(&make_move(board, mv), us))
}

fn pseudo_legal_moves(board: &Board) -> Vec<Move> {
    let us = board.side_to_move();
    let mut moves = Vec::with_capacity(64);

    for (from, piece) in board.pieces() {
        if piece.color != us {
            continue;
        }
        match piece.kind {
            PieceKind::Pawn => pawn_moves(board, from, us, &mut moves),
            PieceKind::Knight => step_moves(board, from, us, &KNIGHT_STEPS, &mut moves),
            PieceKind::Bishop => slide_moves(board, from, us, &BISHOP_DIRS, &mut moves),
            PieceKind::Rook => slide_moves(board, from, us, &ROOK_DIRS, &mut moves),
            PieceKind::Queen => {
                slide_moves(board, from, us, &ROOK_DIRS, &mut moves);
                slide_moves(board, from, us, &BISHOP_DIRS, &mut moves);
            }
            PieceKind::King => {
                step_moves(board, from, us, &KING_STEPS, &mut moves);
                castling_moves(board, from, us, &mut moves);
            }
        }
    }

    moves
}

fn push_pawn_move(from: Square, to: Square, us: Color, moves: &mut Vec<Move>) {
    if to.rank() == us.promotion_rank() {
        for kind in PieceKind::PROMOTIONS {
            moves.push(Move::with_promotion(from, to, kind));
        }
    } else {
        moves.push(Move::new(from, to));
    }
}

fn pawn_moves(board: &Board, from: Square, us: Color, moves: &mut Vec<Move>) {
    let fwd = us.forward();

    if let Some(one) = from.offset(0, fwd)
        && board.piece_at(one).is_none()
    {
        push_pawn_move(from, one, us, moves);

        let start_rank = match us {
            Color::White => 1,
            Color::Black => 6,
        };
        if from.rank() == start_rank
            && let Some(two) = from.offset(0, 2 * fwd)
            && board.piece_at(two).is_none()
        {
            moves.push(Move::new(from, two));
        }
    }

    for df in [-1, 1] {
        let Some(to) = from.offset(df, fwd) else {
            continue;
        };
        match board.piece_at(to) {
            Some(target) if target.color != us => push_pawn_move(from, to, us, moves),
            None if board.en_passant_target() == Some(to) => moves.push(Move::new(from, to)),
            _ => {}
        }
    }
}

fn step_moves(
    board: &Board,
    from: Square,
    us: Color,
    steps: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in steps {
        if let Some(to) = from.offset(df, dr) {
            match board.piece_at(to) {
                Some(target) if target.color == us => {}
                _ => moves.push(Move::new(from, to)),
            }
        }
    }
}

fn slide_moves(
    board: &Board,
    from: Square,
    us: Color,
    dirs: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in dirs {
        let mut cursor = from;
        while let Some(to) = cursor.offset(df, dr) {
            match board.piece_at(to) {
                None => {
                    moves.push(Move::new(from, to));
                    cursor = to;
                }
                Some(target) => {
                    if target.color != us {
                        moves.push(Move::new(from, to));
                    }
                    break;
                }
            }
        }
    }
}

fn castling_moves(board: &Board, from: Square, us: Color, moves: &mut Vec<Move>) {
    let home = match us {
        Color::White => 4,
        Color::Black => 60,
    };
    if from.index() != home {
        return;
    }
    let rights = board.castling_rights();
    let them = us.opposite();
    let rook = Some(Piece::new(PieceKind::Rook, us));

    let can_castle = |flag: u8, rook_df: i8, empty_dfs: &[i8], safe_dfs: &[i8]| {
        if !rights.has(flag) {
            return false;
        }
        if from.offset(rook_df, 0).map(|sq| board.piece_at(sq)) != Some(rook) {
            return false;
        }
        let path_empty = empty_dfs.iter().all(|&df| {
            from.offset(df, 0)
                .is_some_and(|sq| board.piece_at(sq).is_none())
        });
        if !path_empty {
            return false;
        }
        // King may not castle out of, through, or into check.
        !is_square_attacked(board, from, them)
            && safe_dfs.iter().all(|&df| {
                from.offset(df, 0)
                    .is_some_and(|sq| !is_square_attacked(board, sq, them))
            })
    };

    if can_castle(CastlingRights::kingside(us), 3, &[1, 2], &[1, 2])
        && let Some(to) = from.offset(2, 0)
    {
        moves.push(Move::new(from, to));
    }
    if can_castle(CastlingRights::queenside(us), -4, &[-1, -2, -3], &[-1, -2])
        && let Some(to) = from.offset(-2, 0)
    {
        moves.push(Move::new(from, to));
    }
}

// ============================================================================
// Application
// ============================================================================

/// Apply `mv` to `board`, producing the successor board.
///
/// Fails with `IllegalMove` when `mv` is not in `legal_moves(board)`. The
/// input board is never modified, so a failed call has no effect.
///
/// A pawn move to the last rank without a promotion kind is resolved with
/// [`PromotionPolicy::DefaultToQueen`]; use [`apply_move_with_policy`] to
/// choose otherwise.
pub fn apply_move(board: &Board, mv: Move) -> RulesResult<Board> {
    apply_move_with_policy(board, mv, PromotionPolicy::default())
}

/// Apply `mv` under an explicit promotion policy.
pub fn apply_move_with_policy(
    board: &Board,
    mv: Move,
    policy: PromotionPolicy,
) -> RulesResult<Board> {
    let mv = policy.normalize(board, mv);
    if !legal_moves(board).contains(&mv) {
        return Err(RulesError::IllegalMove { mv });
    }
    Ok(make_move(board, mv))
}

/// Play a pseudo-legal move without legality checks.
///
/// Updates castling rights, en-passant target, halfmove clock, fullmove
/// number and side to move.
fn make_move(board: &Board, mv: Move) -> Board {
    let mut next = board.clone();
    let us = board.side_to_move();
    let Some(piece) = next.take(mv.from) else {
        return next;
    };
    let mut captured = next.take(mv.to);

    if piece.kind == PieceKind::Pawn && board.en_passant_target() == Some(mv.to) && captured.is_none()
    {
        // En passant: the captured pawn sits beside the mover, behind the target.
        if let Some(victim) = mv.to.offset(0, -us.forward()) {
            captured = next.take(victim);
        }
    }

    if piece.kind == PieceKind::King && mv.from.file().abs_diff(mv.to.file()) == 2 {
        let (rook_from, rook_to) = if mv.to.file() > mv.from.file() {
            (mv.from.offset(3, 0), mv.from.offset(1, 0))
        } else {
            (mv.from.offset(-4, 0), mv.from.offset(-1, 0))
        };
        if let (Some(rook_from), Some(rook_to)) = (rook_from, rook_to) {
            let rook = next.take(rook_from);
            next.set(rook_to, rook);
        }
    }

    let placed = match mv.promotion {
        Some(kind) if piece.kind == PieceKind::Pawn => Piece::new(kind, us),
        _ => piece,
    };
    next.set(mv.to, Some(placed));

    next.castling.revoke(
        CastlingRights::revoked_by_square(mv.from) | CastlingRights::revoked_by_square(mv.to),
    );

    next.en_passant = None;
    if piece.kind == PieceKind::Pawn && mv.from.rank().abs_diff(mv.to.rank()) == 2 {
        next.en_passant = mv.from.offset(0, us.forward());
    }

    if piece.kind == PieceKind::Pawn || captured.is_some() {
        next.halfmove_clock = 0;
    } else {
        next.halfmove_clock = next.halfmove_clock.saturating_add(1);
    }

    if us == Color::Black {
        next.fullmove_number = next.fullmove_number.saturating_add(1);
    }
    next.side_to_move = us.opposite();

    next
}

/// True when `mv` (legal on `board`) captures en passant.
pub(crate) fn is_en_passant(board: &Board, mv: Move) -> bool {
    board.en_passant_target() == Some(mv.to)
        && board.piece_at(mv.from).map(|p| p.kind) == Some(PieceKind::Pawn)
        && board.piece_at(mv.to).is_none()
        && mv.from.file() != mv.to.file()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::{STARTING_FEN, decode_fen, encode_fen};

    fn board(fen: &str) -> Board {
        decode_fen(fen).unwrap()
    }

    fn mv(uci: &str) -> Move {
        uci.parse().unwrap()
    }

    fn perft(board: &Board, depth: u32) -> u64 {
        if depth == 0 {
            return 1;
        }
        let moves = legal_moves(board);
        if depth == 1 {
            return moves.len() as u64;
        }
        moves
            .into_iter()
            .map(|m| perft(&make_move(board, m), depth - 1))
            .sum()
    }

    #[test]
    fn test_perft_starting_position() {
        let start = board(STARTING_FEN);
        assert_eq!(perft(&start, 1), 20);
        assert_eq!(perft(&start, 2), 400);
        assert_eq!(perft(&start, 3), 8902);
    }

    /// "Kiwipete": castling, pins, en passant and promotions all at once.
    #[test]
    fn test_perft_kiwipete() {
        let kiwipete =
            board("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1");
        assert_eq!(perft(&kiwipete, 1), 48);
        assert_eq!(perft(&kiwipete, 2), 2039);
    }

    /// Endgame with en-passant discovered-check edge cases.
    #[test]
    fn test_perft_rook_endgame() {
        let endgame = board("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1");
        assert_eq!(perft(&endgame, 1), 14);
        assert_eq!(perft(&endgame, 2), 191);
        assert_eq!(perft(&endgame, 3), 2812);
    }

    #[test]
    fn test_apply_updates_counters_and_side() {
        let start = board(STARTING_FEN);
        let after = apply_move(&start, mv("e2e4")).unwrap();
        assert_eq!(after.side_to_move(), Color::Black);
        assert_eq!(after.en_passant_target(), Some("e3".parse().unwrap()));
        assert_eq!(after.halfmove_clock(), 0);
        assert_eq!(after.fullmove_number(), 1);

        let after = apply_move(&after, mv("g8f6")).unwrap();
        assert_eq!(after.en_passant_target(), None);
        assert_eq!(after.halfmove_clock(), 1);
        assert_eq!(after.fullmove_number(), 2);
    }

    #[test]
    fn test_illegal_move_leaves_board_untouched() {
        let start = board(STARTING_FEN);
        let snapshot = start.clone();
        let err = apply_move(&start, mv("e2e5")).unwrap_err();
        assert_eq!(err, RulesError::IllegalMove { mv: mv("e2e5") });
        assert_eq!(start, snapshot);
    }

    #[test]
    fn test_moving_opponent_piece_is_illegal() {
        let start = board(STARTING_FEN);
        assert!(apply_move(&start, mv("e7e5")).is_err());
    }

    #[test]
    fn test_pinned_piece_cannot_move() {
        // Knight on d2 pinned by the bishop on b4.
        let pinned = board("4k3/8/8/8/1b6/8/3N4/4K3 w - - 0 1");
        let moves = legal_moves(&pinned);
        assert!(moves.iter().all(|m| m.from != "d2".parse().unwrap()));
    }

    #[test]
    fn test_check_must_be_answered() {
        // Rook on e8 gives check along the e-file; only king moves or blocks.
        let checked = board("4r1k1/8/8/8/8/8/3B4/4K3 w - - 0 1");
        assert!(is_in_check(&checked));
        for m in legal_moves(&checked) {
            let next = make_move(&checked, m);
            assert!(!king_attacked(&next, Color::White), "{m} leaves king in check");
        }
        assert!(legal_moves(&checked).contains(&mv("d2e3")));
        assert!(!legal_moves(&checked).contains(&mv("d2c3")));
    }

    #[test]
    fn test_castling_both_sides() {
        let open = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        let moves = legal_moves(&open);
        assert!(moves.contains(&mv("e1g1")));
        assert!(moves.contains(&mv("e1c1")));

        let castled = apply_move(&open, mv("e1g1")).unwrap();
        assert_eq!(
            encode_fen(&castled),
            "r3k2r/8/8/8/8/8/8/R4RK1 b kq - 1 1"
        );

        let long = apply_move(&castled, mv("e8c8")).unwrap();
        assert_eq!(encode_fen(&long), "2kr3r/8/8/8/8/8/8/R4RK1 w - - 2 2");
    }

    #[test]
    fn test_castling_blocked_by_attacked_transit_square() {
        // Black rook on f8 covers f1: no kingside castling; queenside is fine.
        let b = board("4kr2/8/8/8/8/8/8/R3K2R w KQ - 0 1");
        let moves = legal_moves(&b);
        assert!(!moves.contains(&mv("e1g1")));
        assert!(moves.contains(&mv("e1c1")));
    }

    #[test]
    fn test_castling_forbidden_while_in_check() {
        let b = board("4r1k1/8/8/8/8/8/8/R3K2R w KQ - 0 1");
        let moves = legal_moves(&b);
        assert!(!moves.contains(&mv("e1g1")));
        assert!(!moves.contains(&mv("e1c1")));
    }

    #[test]
    fn test_queenside_castling_allows_attacked_b_file() {
        // b1 is attacked but the king never crosses it.
        let b = board("1r2k3/8/8/8/8/8/8/R3K3 w Q - 0 1");
        assert!(legal_moves(&b).contains(&mv("e1c1")));
    }

    #[test]
    fn test_rook_capture_revokes_castling() {
        let b = board("r3k2r/8/8/8/8/8/6B1/R3K2R w KQkq - 0 1");
        let after = apply_move(&b, mv("g2a8")).unwrap();
        assert_eq!(after.castling_rights().to_string(), "KQk");
    }

    #[test]
    fn test_king_move_revokes_both_rights() {
        let b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        let after = apply_move(&b, mv("e1e2")).unwrap();
        assert_eq!(after.castling_rights().to_string(), "kq");
    }

    #[test]
    fn test_en_passant_capture() {
        let b = board("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 2");
        assert!(is_en_passant(&b, mv("e5d6")));
        let after = apply_move(&b, mv("e5d6")).unwrap();
        assert_eq!(after.piece_at("d5".parse().unwrap()), None);
        assert_eq!(
            after.piece_at("d6".parse().unwrap()),
            Some(Piece::new(PieceKind::Pawn, Color::White))
        );
        assert_eq!(after.halfmove_clock(), 0);
    }

    #[test]
    fn test_en_passant_expires_after_one_move() {
        let start = board(STARTING_FEN);
        let b = apply_move(&start, mv("e2e4")).unwrap();
        let b = apply_move(&b, mv("a7a6")).unwrap();
        let b = apply_move(&b, mv("e4e5")).unwrap();
        let b = apply_move(&b, mv("d7d5")).unwrap();
        assert!(legal_moves(&b).contains(&mv("e5d6")));
        let b = apply_move(&b, mv("h2h3")).unwrap();
        let b = apply_move(&b, mv("h7h6")).unwrap();
        assert!(!legal_moves(&b).contains(&mv("e5d6")));
    }

    #[test]
    fn test_en_passant_exposing_king_is_illegal() {
        // Capturing d6 would clear the 5th rank between the rook and king.
        let b = board("8/8/8/K2pP2r/8/8/8/7k w - d6 0 2");
        assert!(!legal_moves(&b).contains(&mv("e5d6")));
    }

    #[test]
    fn test_promotion_enumerates_all_kinds() {
        let b = board("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        let promos: Vec<_> = legal_moves(&b)
            .into_iter()
            .filter(|m| m.from == "e7".parse().unwrap())
            .collect();
        assert_eq!(promos.len(), 4);
        assert!(promos.iter().all(|m| m.promotion.is_some()));
    }

    #[test]
    fn test_promotion_policy_default_to_queen() {
        let b = board("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        let after = apply_move(&b, mv("e7e8")).unwrap();
        assert_eq!(
            after.piece_at("e8".parse().unwrap()),
            Some(Piece::new(PieceKind::Queen, Color::White))
        );

        let under = apply_move(&b, mv("e7e8n")).unwrap();
        assert_eq!(
            under.piece_at("e8".parse().unwrap()),
            Some(Piece::new(PieceKind::Knight, Color::White))
        );
    }

    #[test]
    fn test_promotion_policy_require() {
        let b = board("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        assert!(apply_move_with_policy(&b, mv("e7e8"), PromotionPolicy::Require).is_err());
        assert!(apply_move_with_policy(&b, mv("e7e8r"), PromotionPolicy::Require).is_ok());
    }

    #[test]
    fn test_promotion_kind_on_ordinary_move_is_dropped() {
        let start = board(STARTING_FEN);
        let after = apply_move(&start, mv("e2e4q")).unwrap();
        assert_eq!(after, apply_move(&start, mv("e2e4")).unwrap());
        assert_eq!(
            PromotionPolicy::Require.normalize(&start, mv("g1f3q")),
            mv("g1f3")
        );
        // Still illegal when the underlying move is.
        assert!(apply_move(&start, mv("e2e5q")).is_err());
    }

    #[test]
    fn test_counters_saturate_instead_of_overflowing() {
        let max = board("4k3/8/8/8/8/8/8/R3K3 b - - 4294967295 4294967295");
        let after = apply_move(&max, mv("e8d8")).unwrap();
        assert_eq!(after.halfmove_clock(), u32::MAX);
        assert_eq!(after.fullmove_number(), u32::MAX);
        assert!(!legal_moves(&after).is_empty());
    }
}
