//! Gambit Session Server
//!
//! The authoritative side of a chess match. It owns:
//! - One serialized actor per game session
//! - Seat assignment, reconnection and grace timers
//! - Role-scoped event delivery to connections
//! - Archiving of concluded games
//!
//! # Architecture
//!
//! Every session is a single-writer task. Connections never touch a board:
//! they enqueue commands on the session's mailbox and receive replies and
//! events. Legality is decided only by `gambit_rules`, so a client can
//! never move for the other side or apply an illegal move.
//!
//! ```text
//! Participant ──► SessionRegistry ──► SessionHandle ══► session actor
//!      ▲                                                   │
//!      └──────────── Outlet ◄──── BroadcastChannel ◄───────┘
//! ```
//!
//! The transport (sockets, framing) is not part of this crate. A transport
//! creates a `Participant` per connection, feeds it decoded `ClientMessage`s
//! and writes every `ServerEvent` from its outlet with `encode_event`.

#![deny(unsafe_code)]

pub mod actor;
pub mod archive;
pub mod broadcast;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod registry;
pub mod session;
pub mod validation;

use std::path::PathBuf;
use std::time::Duration;

use gambit_rules::PromotionPolicy;

pub use actor::SessionHandle;
pub use archive::Archive;
pub use broadcast::{BroadcastChannel, Outlet};
pub use dispatch::Participant;
pub use error::{ConfigError, SessionError, SessionResult};
pub use event::{EndReason, ServerEvent, encode_event};
pub use registry::SessionRegistry;
pub use session::{Connection, GameSession, Phase, Role, SessionSnapshot};

/// Unique per transport connection; allocated by the registry.
pub type ConnectionId = u64;

/// Stable client identity presented in the hello. Seats are bound to it.
pub type ClientId = String;

pub type SessionId = String;

// ============================================================================
// Default Parameters
// ============================================================================

/// How long a disconnected player's seat stays reserved.
pub const SEAT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// How long an idle session lingers before it is released.
pub const RELEASE_DELAY: Duration = Duration::from_secs(5);

/// Commands a session mailbox holds before senders wait.
pub const MAILBOX_CAPACITY: usize = 64;

/// Events buffered per connection before new ones are dropped.
pub const OUTLET_CAPACITY: usize = 32;

/// Concluded-game records kept in memory; the oldest is evicted first.
pub const ARCHIVE_CAPACITY: usize = 256;

// ============================================================================
// Configuration
// ============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub seat_grace_period: Duration,
    pub release_delay: Duration,
    pub mailbox_capacity: usize,
    /// Capacity a transport should use for each connection's outlet.
    pub outlet_capacity: usize,
    /// Applied to every new game. `DefaultToQueen` accepts a bare pawn push
    /// to the last rank as a queen promotion.
    pub promotion_policy: PromotionPolicy,
    /// Broadcast `BoardState` after every accepted move.
    pub resync_after_move: bool,
    /// Records of concluded games kept in memory.
    pub archive_capacity: usize,
    /// When set, concluded games are also exported here as protobuf files.
    pub archive_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            seat_grace_period: SEAT_GRACE_PERIOD,
            release_delay: RELEASE_DELAY,
            mailbox_capacity: MAILBOX_CAPACITY,
            outlet_capacity: OUTLET_CAPACITY,
            promotion_policy: PromotionPolicy::DefaultToQueen,
            resync_after_move: true,
            archive_capacity: ARCHIVE_CAPACITY,
            archive_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "mailbox_capacity",
            });
        }
        if self.outlet_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "outlet_capacity",
            });
        }
        if self.archive_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "archive_capacity",
            });
        }
        if self.seat_grace_period.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "seat_grace_period",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.seat_grace_period, Duration::from_secs(30));
        assert_eq!(config.promotion_policy, PromotionPolicy::DefaultToQueen);
        assert!(config.resync_after_move);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ServerConfig {
            mailbox_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity {
                field: "mailbox_capacity"
            })
        );

        let config = ServerConfig {
            outlet_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            archive_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity {
                field: "archive_capacity"
            })
        );
    }

    #[test]
    fn test_zero_grace_rejected() {
        let config = ServerConfig {
            seat_grace_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "seat_grace_period"
            })
        );
    }

    #[test]
    fn test_zero_release_delay_allowed() {
        let config = ServerConfig {
            release_delay: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
