//! Gambit Game Records
//!
//! This crate provides game record generation and verification.
//!
//! # Architecture
//!
//! The record system consists of:
//! - `GameRecorder`: Collects applied moves during a session
//! - `verify_record`: Re-plays a record through the rules engine and checks
//!   that it produces the recorded positions and outcome
//! - `write_record` / `read_record`: Protobuf file export
//!
//! A record is an export of a concluded game. Sessions are never restored
//! from records.

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use gambit_rules::{
    Board, Color, FenError, Game, Move, PromotionPolicy, decode_fen, encode_fen,
};
use gambit_wire::{
    GameRecordProto, REASON_ABANDONED, RecordedMoveProto, parse_role, role_code, status_reason,
};
use prost::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Current record schema version.
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// File extension for exported records.
pub const RECORD_EXTENSION: &str = "gamerec";

// ============================================================================
// Move Digest
// ============================================================================

/// SHA-256 over UCI move strings joined by `\n`, as lowercase hex.
pub fn moves_digest<'a>(ucis: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (i, uci) in ucis.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(uci.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Game Recorder
// ============================================================================

/// Records a session's game for archiving.
#[derive(Debug, Clone)]
pub struct GameRecorder {
    session_id: String,
    initial_fen: String,
    moves: Vec<RecordedMoveProto>,
}

impl GameRecorder {
    /// Create a recorder for a game starting at `initial`.
    pub fn new(session_id: impl Into<String>, initial: &Board) -> Self {
        Self {
            session_id: session_id.into(),
            initial_fen: encode_fen(initial),
            moves: Vec::new(),
        }
    }

    /// Record an applied move and the position it produced.
    pub fn record_move(&mut self, mv: Move, after: &Board) {
        self.moves.push(RecordedMoveProto {
            uci: mv.to_string(),
            fen_after: encode_fen(after),
        });
    }

    /// Number of moves recorded so far.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Finalize the game record.
    pub fn finalize(
        self,
        final_board: &Board,
        end_reason: &str,
        winner: Option<Color>,
    ) -> GameRecordProto {
        let moves_sha256 = moves_digest(self.moves.iter().map(|m| m.uci.as_str()));
        GameRecordProto {
            record_format_version: RECORD_FORMAT_VERSION,
            session_id: self.session_id,
            initial_fen: self.initial_fen,
            moves: self.moves,
            final_fen: encode_fen(final_board),
            end_reason: end_reason.to_string(),
            winner: winner.map(|c| role_code(c).to_string()),
            moves_sha256,
        }
    }
}

// ============================================================================
// Record Verification
// ============================================================================

/// Record verification error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("unsupported record format version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("invalid initial position: {0}")]
    InitialPosition(#[source] FenError),

    #[error("move digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("ply {ply}: '{uci}' is not a move")]
    UnparsableMove { ply: usize, uci: String },

    #[error("ply {ply}: {uci} is illegal")]
    IllegalMove { ply: usize, uci: String },

    #[error("ply {ply}: move recorded after the game ended")]
    MoveAfterConclusion { ply: usize },

    #[error("ply {ply}: position mismatch: expected {expected}, got {actual}")]
    PositionMismatch {
        ply: usize,
        expected: String,
        actual: String,
    },

    #[error("final position mismatch: expected {expected}, got {actual}")]
    FinalPositionMismatch { expected: String, actual: String },

    #[error("end reason mismatch: recorded {recorded}, engine reports {actual}")]
    EndReasonMismatch { recorded: String, actual: String },

    #[error("winner mismatch: recorded {recorded:?}, engine reports {actual:?}")]
    WinnerMismatch {
        recorded: Option<String>,
        actual: Option<String>,
    },
}

/// Verify a game record reproduces its recorded positions and outcome.
///
/// # Verification Steps
/// 1. Check the record format version
/// 2. Decode the initial position
/// 3. Check the move digest
/// 4. Replay each move through the rules engine, comparing the position
///    after every move
/// 5. Compare the final position
/// 6. Check the end reason and winner against the engine's status
///    (`abandoned` requires a game that had not ended over the board)
pub fn verify_record(record: &GameRecordProto) -> Result<(), VerifyError> {
    // Step 1: Version
    if record.record_format_version != RECORD_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion {
            version: record.record_format_version,
        });
    }

    // Step 2: Initial position
    let initial = decode_fen(&record.initial_fen).map_err(VerifyError::InitialPosition)?;

    // Step 3: Digest
    let actual_digest = moves_digest(record.moves.iter().map(|m| m.uci.as_str()));
    if actual_digest != record.moves_sha256 {
        return Err(VerifyError::DigestMismatch {
            expected: record.moves_sha256.clone(),
            actual: actual_digest,
        });
    }

    // Step 4: Replay. Recorded moves carry resolved promotions, so nothing
    // is defaulted here.
    let mut game = Game::from_board(initial, PromotionPolicy::Require);
    for (i, recorded) in record.moves.iter().enumerate() {
        let ply = i + 1;
        if game.status().is_terminal() {
            return Err(VerifyError::MoveAfterConclusion { ply });
        }
        let mv: Move = recorded
            .uci
            .parse()
            .map_err(|_| VerifyError::UnparsableMove {
                ply,
                uci: recorded.uci.clone(),
            })?;
        game.play(mv).map_err(|_| VerifyError::IllegalMove {
            ply,
            uci: recorded.uci.clone(),
        })?;
        let actual = game.fen();
        if actual != recorded.fen_after {
            return Err(VerifyError::PositionMismatch {
                ply,
                expected: recorded.fen_after.clone(),
                actual,
            });
        }
    }

    // Step 5: Final position
    let final_fen = game.fen();
    if final_fen != record.final_fen {
        return Err(VerifyError::FinalPositionMismatch {
            expected: record.final_fen.clone(),
            actual: final_fen,
        });
    }

    // Step 6: Outcome
    let status = game.status();
    if record.end_reason == REASON_ABANDONED {
        if let Some(reason) = status_reason(status) {
            return Err(VerifyError::EndReasonMismatch {
                recorded: record.end_reason.clone(),
                actual: reason.to_string(),
            });
        }
        if let Some(winner) = &record.winner
            && parse_role(winner).is_none()
        {
            return Err(VerifyError::WinnerMismatch {
                recorded: record.winner.clone(),
                actual: None,
            });
        }
        return Ok(());
    }

    let actual_reason = status_reason(status).unwrap_or("active");
    if actual_reason != record.end_reason {
        return Err(VerifyError::EndReasonMismatch {
            recorded: record.end_reason.clone(),
            actual: actual_reason.to_string(),
        });
    }
    let actual_winner = status.winner().map(|c| role_code(c).to_string());
    if actual_winner != record.winner {
        return Err(VerifyError::WinnerMismatch {
            recorded: record.winner.clone(),
            actual: actual_winner,
        });
    }

    Ok(())
}

// ============================================================================
// Record I/O
// ============================================================================

/// Archive path for `record` under `dir`.
///
/// The session id is reduced to `[A-Za-z0-9_-]` and suffixed with the
/// leading digest characters, so a reused session id does not collide.
pub fn record_path(dir: &Path, record: &GameRecordProto) -> PathBuf {
    let stem: String = record
        .session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest_prefix: String = record.moves_sha256.chars().take(12).collect();
    dir.join(format!("{stem}-{digest_prefix}.{RECORD_EXTENSION}"))
}

/// Write a game record to a file.
pub fn write_record(record: &GameRecordProto, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("game record already exists at {}", path.display()),
        ));
    }

    let encoded = record.encode_to_vec();
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;

    debug!(
        session_id = %record.session_id,
        path = %path.display(),
        moves = record.moves.len(),
        "game record written"
    );
    Ok(())
}

/// Read a game record from a file.
pub fn read_record(path: &Path) -> io::Result<GameRecordProto> {
    let data = fs::read(path)?;
    GameRecordProto::decode(data.as_slice()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to decode game record: {e}"),
        )
    })
}

// ============================================================================
// Tests
// ============================================================================
