//! Inbound message validation.
//!
//! Rules:
//! - Squares: exactly `[a-h][1-8]`, lowercase
//! - Promotion: one of `n b r q`, case-insensitive; omitted is allowed
//! - Origin and destination must differ
//! - Hello: non-empty session and client ids, bounded length
//!
//! Validation is purely syntactic. Legality is decided by the rules engine
//! inside the session.

use gambit_rules::{Move, PieceKind, Square};
use gambit_wire::{ClientHello, MoveProposal};

use crate::error::SessionError;

/// Longest accepted session or client id, in bytes.
pub const MAX_ID_LEN: usize = 64;

/// Parse a wire proposal into a move.
pub fn parse_proposal(proposal: &MoveProposal) -> Result<Move, SessionError> {
    let from = parse_square(&proposal.from)?;
    let to = parse_square(&proposal.to)?;
    if from == to {
        return Err(malformed(format!("{from} to itself")));
    }

    match proposal.promotion.as_deref() {
        None | Some("") => Ok(Move::new(from, to)),
        Some(text) => {
            let kind = parse_promotion(text)?;
            Ok(Move::with_promotion(from, to, kind))
        }
    }
}

fn parse_square(text: &str) -> Result<Square, SessionError> {
    text.parse()
        .map_err(|_| malformed(format!("invalid square '{text}'")))
}

fn parse_promotion(text: &str) -> Result<PieceKind, SessionError> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => PieceKind::from_char(c)
            .filter(|kind| kind.is_promotion_target())
            .ok_or_else(|| malformed(format!("invalid promotion '{text}'"))),
        _ => Err(malformed(format!("invalid promotion '{text}'"))),
    }
}

fn malformed(reason: String) -> SessionError {
    SessionError::MalformedMove { reason }
}

/// Check a hello's ids before any session is touched.
pub fn validate_hello(hello: &ClientHello) -> Result<(), SessionError> {
    for (field, value) in [("session_id", &hello.session_id), ("client_id", &hello.client_id)] {
        if value.trim().is_empty() {
            return Err(SessionError::InvalidHello {
                reason: format!("{field} is empty"),
            });
        }
        if value.len() > MAX_ID_LEN {
            return Err(SessionError::InvalidHello {
                reason: format!("{field} exceeds {MAX_ID_LEN} bytes"),
            });
        }
    }
    Ok(())
}
