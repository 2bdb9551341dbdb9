//! Game session state machine.
//!
//! `GameSession` is synchronous and owned by exactly one actor task, which
//! is what serializes its operations. It never sleeps: grace timers live
//! outside and report back with `expire_seat`.

use gambit_replay::GameRecorder;
use gambit_rules::{Color, Game, Move};
use gambit_wire::GameRecordProto;
use tracing::{debug, info};

use crate::broadcast::BroadcastChannel;
use crate::error::{SessionError, SessionResult};
use crate::event::{EndReason, ServerEvent};
use crate::{ClientId, ConnectionId, SessionId};

// ============================================================================
// Types
// ============================================================================

/// A transport connection and the identity it presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub client_id: ClientId,
}

impl Connection {
    pub fn new(id: ConnectionId, client_id: impl Into<ClientId>) -> Self {
        Self {
            id,
            client_id: client_id.into(),
        }
    }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForPlayers,
    Active,
    Concluded {
        reason: EndReason,
        winner: Option<Color>,
    },
}

/// Role granted by a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player(Color),
    Spectator,
}

/// A seat left by a disconnect, reserved until its grace timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacatedSeat {
    pub color: Color,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
struct Seat {
    client_id: ClientId,
    /// `None` while reserved during the grace window.
    connection: Option<ConnectionId>,
    /// Identifies the current reservation; a grace timer carrying an older
    /// epoch is stale.
    epoch: u64,
}

/// Read-only view of a session for callers outside the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: Phase,
    pub fen: String,
    pub ply: usize,
    pub white: Option<ClientId>,
    pub black: Option<ClientId>,
    pub spectators: usize,
}

// ============================================================================
// Game Session
// ============================================================================

/// One chess game and the connections attached to it.
pub struct GameSession {
    id: SessionId,
    game: Game,
    phase: Phase,
    /// Indexed by `seat_index`.
    seats: [Option<Seat>; 2],
    spectators: Vec<ConnectionId>,
    channel: BroadcastChannel,
    recorder: Option<GameRecorder>,
    archived: Option<GameRecordProto>,
    resync_after_move: bool,
    next_epoch: u64,
}

fn seat_index(color: Color) -> usize {
    match color {
        Color::White => 0,
        Color::Black => 1,
    }
}

impl GameSession {
    /// Create a session around `game`.
    pub fn new(
        id: impl Into<SessionId>,
        game: Game,
        channel: BroadcastChannel,
        resync_after_move: bool,
    ) -> Self {
        let id = id.into();
        let recorder = GameRecorder::new(id.clone(), game.board());
        let status = game.status();
        let mut session = Self {
            id,
            game,
            phase: Phase::WaitingForPlayers,
            seats: [None, None],
            spectators: Vec::new(),
            channel,
            recorder: Some(recorder),
            archived: None,
            resync_after_move,
            next_epoch: 0,
        };
        // A position that is already over never accepts a move.
        if let Some(reason) = EndReason::from_status(status) {
            session.conclude(reason, status.winner());
        }
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn fen(&self) -> String {
        self.game.fen()
    }

    /// Identity holding `color`'s seat, connected or reserved.
    pub fn seat_holder(&self, color: Color) -> Option<&ClientId> {
        self.seats[seat_index(color)].as_ref().map(|s| &s.client_id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            phase: self.phase,
            fen: self.fen(),
            ply: self.game.ply(),
            white: self.seat_holder(Color::White).cloned(),
            black: self.seat_holder(Color::Black).cloned(),
            spectators: self.spectators.len(),
        }
    }

    /// No live connections and no reserved seats.
    pub fn is_idle(&self) -> bool {
        self.spectators.is_empty() && self.seats.iter().all(Option::is_none)
    }

    /// Finalized record of the concluded game, once.
    pub fn take_archive(&mut self) -> Option<GameRecordProto> {
        self.archived.take()
    }

    fn seat_of_connection(&self, conn: ConnectionId) -> Option<Color> {
        [Color::White, Color::Black].into_iter().find(|&color| {
            self.seats[seat_index(color)]
                .as_ref()
                .is_some_and(|s| s.connection == Some(conn))
        })
    }

    fn seat_of_client(&self, client_id: &str) -> Option<Color> {
        [Color::White, Color::Black].into_iter().find(|&color| {
            self.seats[seat_index(color)]
                .as_ref()
                .is_some_and(|s| s.client_id == client_id)
        })
    }

    fn is_present(&self, conn: ConnectionId) -> bool {
        self.spectators.contains(&conn) || self.seat_of_connection(conn).is_some()
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn board_state(&self) -> ServerEvent {
        ServerEvent::BoardState { fen: self.fen() }
    }

    fn game_ended(&self) -> Option<ServerEvent> {
        match self.phase {
            Phase::Concluded { reason, winner } => Some(ServerEvent::GameEnded { reason, winner }),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Joining
    // ------------------------------------------------------------------------

    /// Join the session.
    ///
    /// An identity whose seat is reserved reclaims it. Otherwise white is
    /// assigned if free, then black, then spectator. Joiners of a
    /// concluded session also receive `GameEnded`.
    pub fn join(&mut self, conn: &Connection) -> SessionResult<Role> {
        if self.is_present(conn.id) {
            return Err(SessionError::AlreadyJoined);
        }
        if self.seat_of_client(&conn.client_id).is_some() {
            return self.rejoin(conn).map(Role::Player);
        }

        let free = [Color::White, Color::Black]
            .into_iter()
            .find(|&color| self.seats[seat_index(color)].is_none());

        let Some(color) = free else {
            return Ok(self.join_as_spectator(conn));
        };

        let epoch = self.bump_epoch();
        self.seats[seat_index(color)] = Some(Seat {
            client_id: conn.client_id.clone(),
            connection: Some(conn.id),
            epoch,
        });
        self.channel.add_to_audience(&self.id, conn.id);
        info!(
            session_id = %self.id,
            connection_id = conn.id,
            client_id = %conn.client_id,
            %color,
            "seat assigned"
        );

        self.channel
            .emit_to_one(conn.id, ServerEvent::PlayerRole { color });
        self.channel.emit_to_all(&self.id, &self.board_state());
        if let Some(ended) = self.game_ended() {
            self.channel.emit_to_one(conn.id, ended);
        }

        if self.phase == Phase::WaitingForPlayers && self.seats.iter().all(Option::is_some) {
            self.phase = Phase::Active;
            info!(session_id = %self.id, "game started");
        }

        Ok(Role::Player(color))
    }

    fn join_as_spectator(&mut self, conn: &Connection) -> Role {
        self.spectators.push(conn.id);
        self.channel.add_to_audience(&self.id, conn.id);
        debug!(session_id = %self.id, connection_id = conn.id, "spectator joined");

        // Exactly one resync, to the spectator only.
        self.channel.emit_to_one(conn.id, ServerEvent::SpectatorRole);
        self.channel.emit_to_one(conn.id, self.board_state());
        if let Some(ended) = self.game_ended() {
            self.channel.emit_to_one(conn.id, ended);
        }
        Role::Spectator
    }

    /// Reclaim the seat reserved for `conn.client_id`.
    ///
    /// Only the rejoining connection is told; other participants see no
    /// interruption.
    pub fn rejoin(&mut self, conn: &Connection) -> SessionResult<Color> {
        if self.is_present(conn.id) {
            return Err(SessionError::AlreadyJoined);
        }
        let color = self
            .seat_of_client(&conn.client_id)
            .ok_or(SessionError::NotAParticipant)?;

        let epoch = self.bump_epoch();
        let Some(seat) = self.seats[seat_index(color)].as_mut() else {
            return Err(SessionError::NotAParticipant);
        };
        if seat.connection.is_some() {
            return Err(SessionError::AlreadyJoined);
        }
        seat.connection = Some(conn.id);
        seat.epoch = epoch;

        self.channel.add_to_audience(&self.id, conn.id);
        info!(
            session_id = %self.id,
            connection_id = conn.id,
            client_id = %conn.client_id,
            %color,
            "seat reclaimed"
        );

        self.channel
            .emit_to_one(conn.id, ServerEvent::PlayerRole { color });
        self.channel.emit_to_one(conn.id, self.board_state());
        if let Some(ended) = self.game_ended() {
            self.channel.emit_to_one(conn.id, ended);
        }
        Ok(color)
    }

    // ------------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------------

    /// Validate and apply a move proposed by `conn`.
    ///
    /// Check order: seat, conclusion, opponent present, turn, legality. A
    /// failed proposal leaves the session untouched. On success the move
    /// goes to everyone but the proposer, followed by a resync to everyone
    /// (when enabled) and `GameEnded` if the move ended the game.
    pub fn propose_move(&mut self, conn: ConnectionId, mv: Move) -> SessionResult<Move> {
        let color = self
            .seat_of_connection(conn)
            .ok_or(SessionError::NotAParticipant)?;

        match self.phase {
            Phase::Concluded { reason, .. } => return Err(SessionError::GameConcluded { reason }),
            Phase::WaitingForPlayers => return Err(SessionError::WaitingForOpponent),
            Phase::Active => {}
        }

        let to_move = self.game.board().side_to_move();
        if color != to_move {
            return Err(SessionError::NotYourTurn { to_move });
        }

        let applied = self.game.play(mv)?;
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_move(applied, self.game.board());
        }
        debug!(
            session_id = %self.id,
            connection_id = conn,
            %color,
            mv = %applied,
            ply = self.game.ply(),
            "move applied"
        );

        self.channel
            .emit_to_all_except(&self.id, conn, &ServerEvent::MoveMade { mv: applied });
        if self.resync_after_move {
            self.channel.emit_to_all(&self.id, &self.board_state());
        }

        let status = self.game.status();
        if let Some(reason) = EndReason::from_status(status) {
            self.conclude(reason, status.winner());
        }

        Ok(applied)
    }

    // ------------------------------------------------------------------------
    // Leaving
    // ------------------------------------------------------------------------

    /// Remove `conn` from the session.
    ///
    /// Spectators are simply removed. A seated connection is detached and
    /// its seat reserved; the returned `VacatedSeat` is what a grace timer
    /// must present to `expire_seat`.
    pub fn leave(&mut self, conn: ConnectionId) -> Option<VacatedSeat> {
        self.channel.remove_from_audience(&self.id, conn);

        if let Some(pos) = self.spectators.iter().position(|&c| c == conn) {
            self.spectators.remove(pos);
            debug!(session_id = %self.id, connection_id = conn, "spectator left");
            return None;
        }

        let color = self.seat_of_connection(conn)?;
        let epoch = self.bump_epoch();
        let seat = self.seats[seat_index(color)].as_mut()?;
        seat.connection = None;
        seat.epoch = epoch;
        info!(
            session_id = %self.id,
            connection_id = conn,
            %color,
            epoch,
            "seat reserved for reconnection"
        );
        Some(VacatedSeat { color, epoch })
    }

    /// Release a reserved seat whose grace period elapsed.
    ///
    /// Returns `false` for a stale timer (the seat was reclaimed or
    /// re-reserved since). Releasing a seat of an active game abandons it,
    /// with the remaining seated color as winner.
    pub fn expire_seat(&mut self, color: Color, epoch: u64) -> bool {
        let idx = seat_index(color);
        let is_current = self.seats[idx]
            .as_ref()
            .is_some_and(|s| s.connection.is_none() && s.epoch == epoch);
        if !is_current {
            debug!(session_id = %self.id, %color, epoch, "stale grace timer ignored");
            return false;
        }

        self.seats[idx] = None;
        info!(session_id = %self.id, %color, "seat released after grace period");

        if self.phase == Phase::Active {
            let winner = self.seats[seat_index(color.opposite())]
                .as_ref()
                .map(|_| color.opposite());
            self.conclude(EndReason::Abandoned, winner);
        }
        true
    }

    fn conclude(&mut self, reason: EndReason, winner: Option<Color>) {
        self.phase = Phase::Concluded { reason, winner };
        info!(
            session_id = %self.id,
            %reason,
            winner = ?winner,
            ply = self.game.ply(),
            "game concluded"
        );
        self.channel
            .emit_to_all(&self.id, &ServerEvent::GameEnded { reason, winner });

        if let Some(recorder) = self.recorder.take() {
            self.archived = Some(recorder.finalize(self.game.board(), reason.as_str(), winner));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gambit_rules::{PromotionPolicy, STARTING_FEN};
    use tokio::sync::mpsc;

    struct Harness {
        session: GameSession,
        channel: BroadcastChannel,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_game(Game::default())
        }

        fn with_game(game: Game) -> Self {
            let channel = BroadcastChannel::new();
            Self {
                session: GameSession::new("s1", game, channel.clone(), true),
                channel,
            }
        }

        fn connect(&self, id: ConnectionId, client: &str) -> (Connection, mpsc::Receiver<ServerEvent>) {
            let (tx, rx) = mpsc::channel(64);
            self.channel.register(id, tx);
            (Connection::new(id, client), rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn mv(uci: &str) -> Move {
        uci.parse().unwrap()
    }

    fn board_states(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::BoardState { .. }))
            .count()
    }

    /// Two seated players with their receivers drained.
    fn seated() -> (
        Harness,
        (Connection, mpsc::Receiver<ServerEvent>),
        (Connection, mpsc::Receiver<ServerEvent>),
    ) {
        let mut h = Harness::new();
        let (white, mut white_rx) = h.connect(1, "alice");
        let (black, mut black_rx) = h.connect(2, "bob");
        h.session.join(&white).unwrap();
        h.session.join(&black).unwrap();
        drain(&mut white_rx);
        drain(&mut black_rx);
        (h, (white, white_rx), (black, black_rx))
    }

    #[test]
    fn test_seats_assigned_by_arrival() {
        let mut h = Harness::new();
        let (white, mut white_rx) = h.connect(1, "alice");
        let (black, mut black_rx) = h.connect(2, "bob");

        assert_eq!(h.session.join(&white), Ok(Role::Player(Color::White)));
        assert_eq!(h.session.phase(), Phase::WaitingForPlayers);
        assert_eq!(h.session.join(&black), Ok(Role::Player(Color::Black)));
        assert_eq!(h.session.phase(), Phase::Active);

        let white_events = drain(&mut white_rx);
        assert_eq!(
            white_events[0],
            ServerEvent::PlayerRole {
                color: Color::White
            }
        );
        // Own join resync plus the broadcast when black joined.
        assert_eq!(board_states(&white_events), 2);

        let black_events = drain(&mut black_rx);
        assert_eq!(
            black_events,
            vec![
                ServerEvent::PlayerRole {
                    color: Color::Black
                },
                ServerEvent::BoardState {
                    fen: STARTING_FEN.to_string()
                },
            ]
        );
    }

    #[test]
    fn test_spectator_gets_exactly_one_board_state() {
        let (mut h, (white, mut white_rx), (_black, mut black_rx)) = seated();
        h.session.propose_move(white.id, mv("e2e4")).unwrap();
        drain(&mut white_rx);
        drain(&mut black_rx);

        let (spectator, mut spectator_rx) = h.connect(3, "carol");
        assert_eq!(h.session.join(&spectator), Ok(Role::Spectator));

        let events = drain(&mut spectator_rx);
        assert_eq!(
            events,
            vec![
                ServerEvent::SpectatorRole,
                ServerEvent::BoardState { fen: h.session.fen() },
            ]
        );
        // Not rebroadcast to the players.
        assert!(drain(&mut white_rx).is_empty());
        assert!(drain(&mut black_rx).is_empty());
    }

    #[test]
    fn test_move_broadcast_order() {
        let (mut h, (white, mut white_rx), (_black, mut black_rx)) = seated();
        let (spectator, mut spectator_rx) = h.connect(3, "carol");
        h.session.join(&spectator).unwrap();
        drain(&mut spectator_rx);

        h.session.propose_move(white.id, mv("e2e4")).unwrap();
        let fen = h.session.fen();

        assert_eq!(
            drain(&mut white_rx),
            vec![ServerEvent::BoardState { fen: fen.clone() }]
        );
        let expected = vec![
            ServerEvent::MoveMade { mv: mv("e2e4") },
            ServerEvent::BoardState { fen },
        ];
        assert_eq!(drain(&mut black_rx), expected);
        assert_eq!(drain(&mut spectator_rx), expected);
    }

    #[test]
    fn test_black_rejected_on_white_turn() {
        let (mut h, _white, (black, mut black_rx)) = seated();
        let fen = h.session.fen();

        assert_eq!(
            h.session.propose_move(black.id, mv("e7e5")),
            Err(SessionError::NotYourTurn {
                to_move: Color::White
            })
        );
        assert_eq!(h.session.fen(), fen);
        assert!(drain(&mut black_rx).is_empty());
    }

    #[test]
    fn test_proposal_check_order() {
        let mut h = Harness::new();
        let (white, _white_rx) = h.connect(1, "alice");
        let (stranger, _stranger_rx) = h.connect(9, "mallory");
        h.session.join(&white).unwrap();

        assert_eq!(
            h.session.propose_move(stranger.id, mv("e2e4")),
            Err(SessionError::NotAParticipant)
        );
        assert_eq!(
            h.session.propose_move(white.id, mv("e2e4")),
            Err(SessionError::WaitingForOpponent)
        );

        let (black, _black_rx) = h.connect(2, "bob");
        h.session.join(&black).unwrap();
        assert_eq!(
            h.session.propose_move(white.id, mv("e2e5")),
            Err(SessionError::IllegalMove { mv: mv("e2e5") })
        );
        assert_eq!(h.session.propose_move(white.id, mv("e2e4")), Ok(mv("e2e4")));
    }

    #[test]
    fn test_spectator_cannot_move() {
        let (mut h, _white, _black) = seated();
        let (spectator, _rx) = h.connect(3, "carol");
        h.session.join(&spectator).unwrap();
        assert_eq!(
            h.session.propose_move(spectator.id, mv("e2e4")),
            Err(SessionError::NotAParticipant)
        );
    }

    #[test]
    fn test_checkmate_concludes_and_freezes() {
        let (mut h, (white, mut white_rx), (black, mut black_rx)) = seated();
        for (conn, uci) in [
            (white.id, "f2f3"),
            (black.id, "e7e5"),
            (white.id, "g2g4"),
            (black.id, "d8h4"),
        ] {
            h.session.propose_move(conn, mv(uci)).unwrap();
        }

        let ended = ServerEvent::GameEnded {
            reason: EndReason::Checkmate,
            winner: Some(Color::Black),
        };
        assert_eq!(drain(&mut white_rx).last(), Some(&ended));
        assert_eq!(drain(&mut black_rx).last(), Some(&ended));
        assert_eq!(
            h.session.phase(),
            Phase::Concluded {
                reason: EndReason::Checkmate,
                winner: Some(Color::Black)
            }
        );
        assert_eq!(
            h.session.propose_move(white.id, mv("a2a3")),
            Err(SessionError::GameConcluded {
                reason: EndReason::Checkmate
            })
        );

        let record = h.session.take_archive().unwrap();
        assert_eq!(record.moves.len(), 4);
        assert_eq!(record.end_reason, "checkmate");
        assert_eq!(gambit_replay::verify_record(&record), Ok(()));
        assert!(h.session.take_archive().is_none());
    }

    #[test]
    fn test_reconnect_within_grace_reclaims_seat() {
        let (mut h, (white, _white_rx), (_black, mut black_rx)) = seated();
        h.session.propose_move(white.id, mv("e2e4")).unwrap();
        drain(&mut black_rx);

        let vacated = h.session.leave(white.id).unwrap();
        assert_eq!(vacated.color, Color::White);

        let (again, mut again_rx) = h.connect(11, "alice");
        assert_eq!(h.session.rejoin(&again), Ok(Color::White));
        assert_eq!(
            drain(&mut again_rx),
            vec![
                ServerEvent::PlayerRole {
                    color: Color::White
                },
                ServerEvent::BoardState { fen: h.session.fen() },
            ]
        );
        // No visible interruption for the opponent.
        assert!(drain(&mut black_rx).is_empty());

        // The old timer is stale now.
        assert!(!h.session.expire_seat(Color::White, vacated.epoch));
        assert_eq!(h.session.phase(), Phase::Active);
    }

    #[test]
    fn test_plain_join_with_same_identity_reclaims_seat() {
        let (mut h, (_white, _white_rx), (black, _black_rx)) = seated();
        h.session.leave(black.id).unwrap();

        let (again, _rx) = h.connect(12, "bob");
        assert_eq!(h.session.join(&again), Ok(Role::Player(Color::Black)));
    }

    #[test]
    fn test_grace_expiry_abandons_active_game() {
        let (mut h, (white, _white_rx), (_black, mut black_rx)) = seated();
        let vacated = h.session.leave(white.id).unwrap();

        assert!(h.session.expire_seat(vacated.color, vacated.epoch));
        assert_eq!(
            drain(&mut black_rx),
            vec![ServerEvent::GameEnded {
                reason: EndReason::Abandoned,
                winner: Some(Color::Black),
            }]
        );
        assert_eq!(h.session.seat_holder(Color::White), None);

        // The original identity no longer holds a seat.
        let (late, _late_rx) = h.connect(21, "alice");
        assert_eq!(h.session.rejoin(&late), Err(SessionError::NotAParticipant));

        // A newcomer may take the freed seat of the concluded game.
        let (newcomer, mut newcomer_rx) = h.connect(22, "dave");
        assert_eq!(h.session.join(&newcomer), Ok(Role::Player(Color::White)));
        assert_eq!(
            drain(&mut newcomer_rx).last(),
            Some(&ServerEvent::GameEnded {
                reason: EndReason::Abandoned,
                winner: Some(Color::Black),
            })
        );

        let record = h.session.take_archive().unwrap();
        assert_eq!(record.end_reason, "abandoned");
        assert_eq!(record.winner.as_deref(), Some("b"));
    }

    #[test]
    fn test_reserved_seat_still_wins_abandonment() {
        let (mut h, (white, _w), (black, _b)) = seated();
        let white_seat = h.session.leave(white.id).unwrap();
        let black_seat = h.session.leave(black.id).unwrap();

        assert!(h.session.expire_seat(black_seat.color, black_seat.epoch));
        assert_eq!(
            h.session.phase(),
            Phase::Concluded {
                reason: EndReason::Abandoned,
                winner: Some(Color::White)
            }
        );
        assert!(!h.session.is_idle());
        assert!(h.session.expire_seat(white_seat.color, white_seat.epoch));
        assert!(h.session.is_idle());
    }

    #[test]
    fn test_grace_expiry_while_waiting_frees_seat() {
        let mut h = Harness::new();
        let (white, _rx) = h.connect(1, "alice");
        h.session.join(&white).unwrap();
        let vacated = h.session.leave(white.id).unwrap();
        assert!(!h.session.is_idle());

        assert!(h.session.expire_seat(vacated.color, vacated.epoch));
        assert_eq!(h.session.phase(), Phase::WaitingForPlayers);
        assert!(h.session.is_idle());
        assert!(h.session.take_archive().is_none());
    }

    #[test]
    fn test_duplicate_joins_rejected() {
        let (mut h, (white, _w), _black) = seated();
        assert_eq!(h.session.join(&white), Err(SessionError::AlreadyJoined));

        // Same identity on a second live connection.
        let (twin, _rx) = h.connect(5, "alice");
        assert_eq!(h.session.join(&twin), Err(SessionError::AlreadyJoined));
        assert_eq!(h.session.rejoin(&twin), Err(SessionError::AlreadyJoined));
    }

    #[test]
    fn test_rejoin_without_seat() {
        let mut h = Harness::new();
        let (conn, _rx) = h.connect(1, "alice");
        assert_eq!(h.session.rejoin(&conn), Err(SessionError::NotAParticipant));
    }

    #[test]
    fn test_spectator_leave_keeps_session_state() {
        let (mut h, _w, _b) = seated();
        let (spectator, _rx) = h.connect(3, "carol");
        h.session.join(&spectator).unwrap();
        assert_eq!(h.session.snapshot().spectators, 1);

        assert_eq!(h.session.leave(spectator.id), None);
        assert_eq!(h.session.snapshot().spectators, 0);
        assert_eq!(h.channel.audience("s1"), vec![1, 2]);
    }

    #[test]
    fn test_resync_can_be_disabled() {
        let channel = BroadcastChannel::new();
        let mut session = GameSession::new("s2", Game::default(), channel.clone(), false);
        let (tx1, mut rx1) = mpsc::channel(16);
        let (tx2, mut rx2) = mpsc::channel(16);
        channel.register(1, tx1);
        channel.register(2, tx2);
        session.join(&Connection::new(1, "a")).unwrap();
        session.join(&Connection::new(2, "b")).unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        session.propose_move(1, mv("d2d4")).unwrap();
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2), vec![ServerEvent::MoveMade { mv: mv("d2d4") }]);
    }

    #[test]
    fn test_promotion_policy_applies_in_session() {
        let game =
            Game::from_fen("k7/4P3/8/8/8/8/8/4K3 w - - 0 1", PromotionPolicy::Require).unwrap();
        let mut h = Harness::with_game(game);
        let (white, _w) = h.connect(1, "alice");
        let (black, _b) = h.connect(2, "bob");
        h.session.join(&white).unwrap();
        h.session.join(&black).unwrap();

        assert!(matches!(
            h.session.propose_move(white.id, mv("e7e8")),
            Err(SessionError::IllegalMove { .. })
        ));
        assert_eq!(h.session.propose_move(white.id, mv("e7e8n")), Ok(mv("e7e8n")));
    }

    #[test]
    fn test_finished_starting_position_concludes_at_once() {
        let game =
            Game::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", PromotionPolicy::default()).unwrap();
        let mut h = Harness::with_game(game);
        let stalemate = Phase::Concluded {
            reason: EndReason::Stalemate,
            winner: None,
        };
        assert_eq!(h.session.phase(), stalemate);

        let (white, mut white_rx) = h.connect(1, "alice");
        let (black, _b) = h.connect(2, "bob");
        h.session.join(&white).unwrap();
        h.session.join(&black).unwrap();
        assert_eq!(h.session.phase(), stalemate);
        assert!(drain(&mut white_rx).contains(&ServerEvent::GameEnded {
            reason: EndReason::Stalemate,
            winner: None
        }));

        assert_eq!(
            h.session.propose_move(black.id, mv("h8g8")),
            Err(SessionError::GameConcluded {
                reason: EndReason::Stalemate
            })
        );
        let record = h.session.take_archive().unwrap();
        assert!(record.moves.is_empty());
        assert_eq!(gambit_replay::verify_record(&record), Ok(()));
    }

    #[test]
    fn test_checkmated_starting_position_names_winner() {
        let game = Game::from_fen(
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
            PromotionPolicy::default(),
        )
        .unwrap();
        let h = Harness::with_game(game);
        assert_eq!(
            h.session.phase(),
            Phase::Concluded {
                reason: EndReason::Checkmate,
                winner: Some(Color::Black)
            }
        );
    }

    #[test]
    fn test_fixed_queen_client_plays_ordinary_moves() {
        let (mut h, (white, _w), (black, mut black_rx)) = seated();
        let proposal = gambit_wire::MoveProposal {
            from: "e2".to_string(),
            to: "e4".to_string(),
            promotion: Some("q".to_string()),
        };
        let parsed = crate::validation::parse_proposal(&proposal).unwrap();

        assert_eq!(h.session.propose_move(white.id, parsed), Ok(mv("e2e4")));
        assert_eq!(
            drain(&mut black_rx)[0],
            ServerEvent::MoveMade { mv: mv("e2e4") }
        );
    }
}
