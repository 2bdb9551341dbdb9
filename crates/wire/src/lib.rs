//! Gambit Wire Protocol Types
//!
//! This crate defines the shared Protobuf message types exchanged between
//! connections and the session server, plus the game record format used
//! by the archive. Both the server and any client MUST depend on this
//! crate so the schema has a single definition.
//!
//! # Message Categories
//!
//! - **Inbound** (`ClientMessage`): hello (join/rejoin), move proposal
//! - **Outbound** (`ServerMessage`): role grants, board resync, move
//!   broadcast, game end, per-proposal rejection
//! - **Archive** (`GameRecordProto`): a concluded game
//!
//! Boards cross the wire only as FEN strings; squares and promotion kinds
//! travel in the same textual notation the rules crate parses.

#![deny(unsafe_code)]

use gambit_rules::{Color, GameStatus, Move};
use prost::Message;

// ============================================================================
// Vocabulary
// ============================================================================

// `GameEnded.reason` values.
pub const REASON_CHECKMATE: &str = "checkmate";
pub const REASON_STALEMATE: &str = "stalemate";
pub const REASON_INSUFFICIENT_MATERIAL: &str = "insufficientMaterial";
pub const REASON_FIFTY_MOVE_DRAW: &str = "fiftyMoveDraw";
pub const REASON_THREEFOLD_REPETITION: &str = "threefoldRepetition";
/// A seat's grace period elapsed mid-game.
pub const REASON_ABANDONED: &str = "abandoned";

/// Role string for a seat color (`"w"` or `"b"`).
pub fn role_code(color: Color) -> &'static str {
    match color {
        Color::White => "w",
        Color::Black => "b",
    }
}

/// Inverse of [`role_code`].
pub fn parse_role(code: &str) -> Option<Color> {
    match code {
        "w" => Some(Color::White),
        "b" => Some(Color::Black),
        _ => None,
    }
}

/// `GameEnded.reason` for a terminal rules status. `None` while active.
pub fn status_reason(status: GameStatus) -> Option<&'static str> {
    match status {
        GameStatus::Active => None,
        GameStatus::Checkmate { .. } => Some(REASON_CHECKMATE),
        GameStatus::Stalemate => Some(REASON_STALEMATE),
        GameStatus::InsufficientMaterial => Some(REASON_INSUFFICIENT_MATERIAL),
        GameStatus::FiftyMoveDraw => Some(REASON_FIFTY_MOVE_DRAW),
        GameStatus::ThreefoldRepetition => Some(REASON_THREEFOLD_REPETITION),
    }
}

// ============================================================================
// Inbound Messages
// ============================================================================

/// Client joins (or rejoins) a session.
#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(string, tag = "1")]
    pub session_id: String,

    /// Stable identity used to reclaim a seat after a disconnect.
    #[prost(string, tag = "2")]
    pub client_id: String,

    /// Request the seat reserved for `client_id` instead of a fresh join.
    #[prost(bool, tag = "3")]
    pub resume: bool,
}

/// Proposed move in algebraic square notation.
///
/// Note: the proposer's identity is NOT included - it is bound from the
/// connection by the server.
#[derive(Clone, PartialEq, Message)]
pub struct MoveProposal {
    /// Origin square, `[a-h][1-8]`.
    #[prost(string, tag = "1")]
    pub from: String,

    /// Destination square, `[a-h][1-8]`.
    #[prost(string, tag = "2")]
    pub to: String,

    /// One of `n b r q` (case-insensitive). Omitted means "engine policy".
    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,
}

/// Inbound envelope.
#[derive(Clone, PartialEq, Message)]
pub struct ClientMessage {
    #[prost(oneof = "client_message::Body", tags = "1, 2")]
    pub body: Option<client_message::Body>,
}

pub mod client_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Hello(super::ClientHello),
        #[prost(message, tag = "2")]
        Move(super::MoveProposal),
    }
}

// ============================================================================
// Outbound Messages
// ============================================================================

/// Sent once to a newly seated connection.
#[derive(Clone, PartialEq, Message)]
pub struct PlayerRole {
    /// `"w"` or `"b"`.
    #[prost(string, tag = "1")]
    pub role: String,
}

/// Sent once to a newly joined spectator.
#[derive(Clone, PartialEq, Message)]
pub struct SpectatorRole {}

/// Full board resync.
#[derive(Clone, PartialEq, Message)]
pub struct BoardState {
    #[prost(string, tag = "1")]
    pub fen: String,
}

/// Accepted move, broadcast to every participant except the proposer.
#[derive(Clone, PartialEq, Message)]
pub struct MoveMade {
    #[prost(string, tag = "1")]
    pub from: String,

    #[prost(string, tag = "2")]
    pub to: String,

    /// Lowercase promotion letter when the move promoted.
    #[prost(string, optional, tag = "3")]
    pub promotion: Option<String>,
}

/// Game reached a terminal state.
#[derive(Clone, PartialEq, Message)]
pub struct GameEnded {
    /// One of `checkmate`, `stalemate`, `insufficientMaterial`,
    /// `fiftyMoveDraw`, `threefoldRepetition`, `abandoned`.
    #[prost(string, tag = "1")]
    pub reason: String,

    /// `"w"` or `"b"` for decisive results.
    #[prost(string, optional, tag = "2")]
    pub winner: Option<String>,
}

/// A request from this connection was refused. Never broadcast.
#[derive(Clone, PartialEq, Message)]
pub struct ProposalRejected {
    /// Stable error code, e.g. `illegalMove`, `notYourTurn`.
    #[prost(string, tag = "1")]
    pub code: String,

    /// Human-readable detail.
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Outbound envelope.
#[derive(Clone, PartialEq, Message)]
pub struct ServerMessage {
    #[prost(oneof = "server_message::Body", tags = "1, 2, 3, 4, 5, 6")]
    pub body: Option<server_message::Body>,
}

pub mod server_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        PlayerRole(super::PlayerRole),
        #[prost(message, tag = "2")]
        SpectatorRole(super::SpectatorRole),
        #[prost(message, tag = "3")]
        BoardState(super::BoardState),
        #[prost(message, tag = "4")]
        MoveMade(super::MoveMade),
        #[prost(message, tag = "5")]
        GameEnded(super::GameEnded),
        #[prost(message, tag = "6")]
        ProposalRejected(super::ProposalRejected),
    }
}

// ============================================================================
// Game Record Types
// ============================================================================

/// One applied move in a game record.
#[derive(Clone, PartialEq, Message)]
pub struct RecordedMoveProto {
    /// Move in UCI notation (`e2e4`, `e7e8q`), promotion resolved.
    #[prost(string, tag = "1")]
    pub uci: String,

    /// FEN of the position after the move.
    #[prost(string, tag = "2")]
    pub fen_after: String,
}

/// Archived record of a concluded game.
#[derive(Clone, PartialEq, Message)]
pub struct GameRecordProto {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub record_format_version: u32,

    #[prost(string, tag = "2")]
    pub session_id: String,

    #[prost(string, tag = "3")]
    pub initial_fen: String,

    /// Applied moves in order.
    #[prost(message, repeated, tag = "4")]
    pub moves: Vec<RecordedMoveProto>,

    #[prost(string, tag = "5")]
    pub final_fen: String,

    /// Same vocabulary as `GameEnded.reason`.
    #[prost(string, tag = "6")]
    pub end_reason: String,

    #[prost(string, optional, tag = "7")]
    pub winner: Option<String>,

    /// SHA-256 over the UCI move strings joined by `\n`, lowercase hex.
    #[prost(string, tag = "8")]
    pub moves_sha256: String,
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<Move> for MoveMade {
    fn from(mv: Move) -> Self {
        Self {
            from: mv.from.to_string(),
            to: mv.to.to_string(),
            promotion: mv.promotion.map(|kind| kind.as_char().to_string()),
        }
    }
}

impl From<Move> for MoveProposal {
    fn from(mv: Move) -> Self {
        let made = MoveMade::from(mv);
        Self {
            from: made.from,
            to: made.to,
            promotion: made.promotion,
        }
    }
}

impl From<server_message::Body> for ServerMessage {
    fn from(body: server_message::Body) -> Self {
        Self { body: Some(body) }
    }
}

impl From<client_message::Body> for ClientMessage {
    fn from(body: client_message::Body) -> Self {
        Self { body: Some(body) }
    }
}

// ============================================================================
// Tests
// ============================================================================
