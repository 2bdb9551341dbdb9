//! Error types for the rules engine.

use thiserror::Error;

use crate::types::Move;

/// Rejection reason for a FEN string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed FEN: {reason}")]
pub struct FenError {
    pub reason: String,
}

impl FenError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors produced by rules engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// The move is not in the legal move set of the board it was applied to.
    #[error("illegal move {mv}")]
    IllegalMove { mv: Move },

    /// A FEN string could not be decoded into a valid position.
    #[error(transparent)]
    MalformedFen(#[from] FenError),
}

/// Result type alias for rules engine operations.
pub type RulesResult<T> = Result<T, RulesError>;
