//! Typed outbound events and their wire encoding.

use std::fmt;

use gambit_rules::{Color, GameStatus, Move};
use gambit_wire::{
    BoardState, GameEnded, MoveMade, PlayerRole, ProposalRejected, REASON_ABANDONED,
    REASON_CHECKMATE, REASON_FIFTY_MOVE_DRAW, REASON_INSUFFICIENT_MATERIAL, REASON_STALEMATE,
    REASON_THREEFOLD_REPETITION, ServerMessage, SpectatorRole, role_code, server_message::Body,
};
use prost::Message;

use crate::error::SessionError;

/// Why a session concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveDraw,
    ThreefoldRepetition,
    /// A seat's grace period elapsed while the game was active.
    Abandoned,
}

impl EndReason {
    /// End reason for a terminal rules status. `None` while active.
    pub fn from_status(status: GameStatus) -> Option<Self> {
        match status {
            GameStatus::Active => None,
            GameStatus::Checkmate { .. } => Some(Self::Checkmate),
            GameStatus::Stalemate => Some(Self::Stalemate),
            GameStatus::InsufficientMaterial => Some(Self::InsufficientMaterial),
            GameStatus::FiftyMoveDraw => Some(Self::FiftyMoveDraw),
            GameStatus::ThreefoldRepetition => Some(Self::ThreefoldRepetition),
        }
    }

    /// Wire vocabulary (`GameEnded.reason`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abandoned => REASON_ABANDONED,
            Self::Checkmate => REASON_CHECKMATE,
            Self::Stalemate => REASON_STALEMATE,
            Self::InsufficientMaterial => REASON_INSUFFICIENT_MATERIAL,
            Self::FiftyMoveDraw => REASON_FIFTY_MOVE_DRAW,
            Self::ThreefoldRepetition => REASON_THREEFOLD_REPETITION,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to a connection's outlet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The connection now holds this seat.
    PlayerRole { color: Color },
    /// The connection joined as a spectator.
    SpectatorRole,
    /// Full resync from the authoritative board.
    BoardState { fen: String },
    /// Another participant's accepted move.
    MoveMade { mv: Move },
    GameEnded {
        reason: EndReason,
        winner: Option<Color>,
    },
    /// A request from this connection failed.
    Rejected(SessionError),
}

impl From<ServerEvent> for ServerMessage {
    fn from(event: ServerEvent) -> Self {
        let body = match event {
            ServerEvent::PlayerRole { color } => Body::PlayerRole(PlayerRole {
                role: role_code(color).to_string(),
            }),
            ServerEvent::SpectatorRole => Body::SpectatorRole(SpectatorRole {}),
            ServerEvent::BoardState { fen } => Body::BoardState(BoardState { fen }),
            ServerEvent::MoveMade { mv } => Body::MoveMade(MoveMade::from(mv)),
            ServerEvent::GameEnded { reason, winner } => Body::GameEnded(GameEnded {
                reason: reason.as_str().to_string(),
                winner: winner.map(|c| role_code(c).to_string()),
            }),
            ServerEvent::Rejected(err) => Body::ProposalRejected(ProposalRejected {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        };
        ServerMessage::from(body)
    }
}

/// Protobuf bytes of `event` for the transport.
pub fn encode_event(event: &ServerEvent) -> Vec<u8> {
    ServerMessage::from(event.clone()).encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gambit_wire::status_reason;

    #[test]
    fn test_reason_vocabulary_matches_wire() {
        for status in [
            GameStatus::Active,
            GameStatus::Checkmate {
                winner: Color::Black,
            },
            GameStatus::Stalemate,
            GameStatus::InsufficientMaterial,
            GameStatus::FiftyMoveDraw,
            GameStatus::ThreefoldRepetition,
        ] {
            assert_eq!(
                EndReason::from_status(status).map(|r| r.as_str()),
                status_reason(status),
                "{status:?}"
            );
        }
        assert_eq!(EndReason::Abandoned.as_str(), "abandoned");
    }

    #[test]
    fn test_game_ended_encoding() {
        let event = ServerEvent::GameEnded {
            reason: EndReason::Checkmate,
            winner: Some(Color::Black),
        };
        let decoded = ServerMessage::decode(encode_event(&event).as_slice()).unwrap();
        assert_eq!(
            decoded.body,
            Some(Body::GameEnded(GameEnded {
                reason: "checkmate".to_string(),
                winner: Some("b".to_string()),
            }))
        );
    }

    #[test]
    fn test_rejection_carries_code_and_message() {
        let event = ServerEvent::Rejected(SessionError::NotYourTurn {
            to_move: Color::White,
        });
        let Some(Body::ProposalRejected(rejected)) = ServerMessage::from(event).body else {
            panic!("expected ProposalRejected");
        };
        assert_eq!(rejected.code, "notYourTurn");
        assert_eq!(rejected.message, "not your turn: white to move");
    }

    #[test]
    fn test_player_role_encoding() {
        let msg = ServerMessage::from(ServerEvent::PlayerRole {
            color: Color::White,
        });
        assert_eq!(
            msg.body,
            Some(Body::PlayerRole(PlayerRole {
                role: "w".to_string()
            }))
        );
    }
}
