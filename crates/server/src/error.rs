//! Error types for the session server.

use gambit_rules::{Color, FenError, Move, RulesError};
use thiserror::Error;

use crate::event::EndReason;

/// Errors reported by session and registry operations.
///
/// Per-proposal errors (`IllegalMove`, `NotYourTurn`, `NotAParticipant`,
/// `GameConcluded`, `WaitingForOpponent`, `MalformedMove`) are local to the
/// proposer and never change session state. `Clone` so they can travel
/// back to the connection as an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The move is not legal on the current board.
    #[error("illegal move {mv}")]
    IllegalMove { mv: Move },

    /// The proposer's seat is not the side to move.
    #[error("not your turn: {to_move} to move")]
    NotYourTurn { to_move: Color },

    /// The connection holds no seat (spectator, stranger, or a seat that
    /// was released after its grace period).
    #[error("not a participant")]
    NotAParticipant,

    /// The game has ended; no further moves are accepted.
    #[error("game concluded: {reason}")]
    GameConcluded { reason: EndReason },

    /// Both seats have not been filled yet.
    #[error("waiting for an opponent")]
    WaitingForOpponent,

    /// The proposal could not be parsed into a move.
    #[error("malformed move: {reason}")]
    MalformedMove { reason: String },

    /// The hello's ids are empty or too long.
    #[error("invalid hello: {reason}")]
    InvalidHello { reason: String },

    /// A session could not be created from the given position.
    #[error(transparent)]
    MalformedFen(#[from] FenError),

    /// The connection or identity is already seated in this session.
    #[error("already joined")]
    AlreadyJoined,

    /// A session with this id already exists.
    #[error("session {session_id} already exists")]
    SessionExists { session_id: String },

    /// The session actor has retired; the registry recreates it on demand.
    #[error("session retired")]
    Retired,

    /// The operation was dropped because its connection went away first.
    #[error("operation cancelled")]
    Cancelled,

    /// The registry is draining and accepts no new work.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl SessionError {
    /// Stable code carried by `ProposalRejected`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalMove { .. } => "illegalMove",
            Self::NotYourTurn { .. } => "notYourTurn",
            Self::NotAParticipant => "notAParticipant",
            Self::GameConcluded { .. } => "gameConcluded",
            Self::WaitingForOpponent => "waitingForOpponent",
            Self::MalformedMove { .. } => "malformedMove",
            Self::InvalidHello { .. } => "invalidHello",
            Self::MalformedFen(_) => "malformedFen",
            Self::AlreadyJoined => "alreadyJoined",
            Self::SessionExists { .. } => "sessionExists",
            Self::Retired => "retired",
            Self::Cancelled => "cancelled",
            Self::ShuttingDown => "shuttingDown",
        }
    }
}

impl From<RulesError> for SessionError {
    fn from(err: RulesError) -> Self {
        match err {
            RulesError::IllegalMove { mv } => Self::IllegalMove { mv },
            RulesError::MalformedFen(e) => Self::MalformedFen(e),
        }
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Invalid `ServerConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroCapacity { field: &'static str },

    #[error("{field} must be a non-zero duration")]
    ZeroDuration { field: &'static str },
}
