//! FEN encoding and decoding.
//!
//! Six space-separated fields: piece placement, side to move, castling
//! rights, en-passant target, halfmove clock, fullmove number. FEN is the
//! only board representation that crosses a process boundary.

use crate::board::Board;
use crate::error::FenError;
use crate::types::{CastlingRights, Color, Piece, PieceKind, Square};

/// FEN of the standard initial position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Encode a board as a FEN string.
///
/// The en-passant field is written whenever the board carries a target
/// (i.e. right after any two-square pawn advance), so that
/// `decode_fen(&encode_fen(b)) == b` holds for every reachable board.
pub fn encode_fen(board: &Board) -> String {
    let mut fen = String::with_capacity(90);

    for rank in (0..8i8).rev() {
        let mut empty = 0u8;
        for file in 0..8i8 {
            let Some(square) = Square::from_coords(file, rank) else {
                continue;
            };
            match board.piece_at(square) {
                Some(piece) => {
                    if empty > 0 {
                        fen.push((b'0' + empty) as char);
                        empty = 0;
                    }
                    fen.push(piece.to_fen_char());
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            fen.push((b'0' + empty) as char);
        }
        if rank > 0 {
            fen.push('/');
        }
    }

    fen.push(' ');
    fen.push(board.side_to_move().as_char());
    fen.push(' ');
    fen.push_str(&board.castling_rights().to_string());
    fen.push(' ');
    match board.en_passant_target() {
        Some(square) => fen.push_str(&square.to_string()),
        None => fen.push('-'),
    }
    fen.push(' ');
    fen.push_str(&board.halfmove_clock().to_string());
    fen.push(' ');
    fen.push_str(&board.fullmove_number().to_string());

    fen
}

/// Decode a FEN string into a board.
///
/// Fails when the six fields are missing, counts are inconsistent, a pawn
/// sits on rank 1 or 8, or a side does not have exactly one king.
pub fn decode_fen(fen: &str) -> Result<Board, FenError> {
    let fields: Vec<&str> = fen.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(FenError::new(format!(
            "expected 6 fields, got {}",
            fields.len()
        )));
    }

    let mut board = Board::empty();
    decode_placement(fields[0], &mut board)?;

    board.side_to_move = match fields[1] {
        "w" => Color::White,
        "b" => Color::Black,
        other => return Err(FenError::new(format!("invalid side to move '{other}'"))),
    };

    board.castling = decode_castling(fields[2])?;
    board.en_passant = decode_en_passant(fields[3], board.side_to_move)?;

    board.halfmove_clock = fields[4]
        .parse::<u32>()
        .map_err(|_| FenError::new(format!("invalid halfmove clock '{}'", fields[4])))?;
    board.fullmove_number = fields[5]
        .parse::<u32>()
        .map_err(|_| FenError::new(format!("invalid fullmove number '{}'", fields[5])))?;
    if board.fullmove_number == 0 {
        return Err(FenError::new("fullmove number must be >= 1"));
    }

    Ok(board)
}

fn decode_placement(field: &str, board: &mut Board) -> Result<(), FenError> {
    let ranks: Vec<&str> = field.split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::new(format!(
            "expected 8 ranks, got {}",
            ranks.len()
        )));
    }

    for (i, rank_str) in ranks.iter().enumerate() {
        let rank = 7 - i as i8;
        let mut file: i8 = 0;
        for c in rank_str.chars() {
            if let Some(run) = c.to_digit(10) {
                if !(1..=8).contains(&run) {
                    return Err(FenError::new(format!(
                        "invalid empty run '{c}' on rank {}",
                        rank + 1
                    )));
                }
                file += run as i8;
            } else {
                let piece = Piece::from_fen_char(c)
                    .ok_or_else(|| FenError::new(format!("invalid piece letter '{c}'")))?;
                let square = Square::from_coords(file, rank).ok_or_else(|| {
                    FenError::new(format!("rank {} has more than 8 squares", rank + 1))
                })?;
                if piece.kind == PieceKind::Pawn && (rank == 0 || rank == 7) {
                    return Err(FenError::new(format!("pawn on back rank at {square}")));
                }
                board.set(square, Some(piece));
                file += 1;
            }
            if file > 8 {
                return Err(FenError::new(format!(
                    "rank {} has more than 8 squares",
                    rank + 1
                )));
            }
        }
        if file != 8 {
            return Err(FenError::new(format!(
                "rank {} has {file} squares instead of 8",
                rank + 1
            )));
        }
    }

    for color in [Color::White, Color::Black] {
        let kings = board
            .pieces()
            .filter(|(_, p)| *p == Piece::new(PieceKind::King, color))
            .count();
        if kings != 1 {
            return Err(FenError::new(format!(
                "{color} has {kings} kings (expected 1)"
            )));
        }
    }

    Ok(())
}

fn decode_castling(field: &str) -> Result<CastlingRights, FenError> {
    let mut rights = CastlingRights::NONE;
    if field == "-" {
        return Ok(rights);
    }
    if field.is_empty() {
        return Err(FenError::new("empty castling field"));
    }
    for c in field.chars() {
        let flag = match c {
            'K' => CastlingRights::WHITE_KINGSIDE,
            'Q' => CastlingRights::WHITE_QUEENSIDE,
            'k' => CastlingRights::BLACK_KINGSIDE,
            'q' => CastlingRights::BLACK_QUEENSIDE,
            _ => return Err(FenError::new(format!("invalid castling field '{field}'"))),
        };
        if rights.has(flag) {
            return Err(FenError::new(format!("duplicate castling right '{c}'")));
        }
        rights.grant(flag);
    }
    Ok(rights)
}

fn decode_en_passant(field: &str, side_to_move: Color) -> Result<Option<Square>, FenError> {
    if field == "-" {
        return Ok(None);
    }
    let square: Square = field
        .parse()
        .map_err(|_| FenError::new(format!("invalid en passant square '{field}'")))?;
    // Target sits behind a pawn that just advanced two squares.
    let expected_rank = match side_to_move {
        Color::White => 5,
        Color::Black => 2,
    };
    if square.rank() != expected_rank {
        return Err(FenError::new(format!(
            "en passant square {square} is not on rank {}",
            expected_rank + 1
        )));
    }
    Ok(Some(square))
}
