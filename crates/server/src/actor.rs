//! Session actor.
//!
//! One task per session owns the `GameSession` and processes commands from
//! a bounded mailbox one at a time, so every operation on a session is
//! linearizable. Callers talk to it through a cloneable `SessionHandle`
//! and receive replies over oneshot channels.
//!
//! Grace timers are separate tasks holding only a weak sender: they sleep
//! outside the session and enqueue `SeatExpired` when they fire.

use std::time::Duration;

use gambit_rules::{Color, Move};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::archive::Archive;
use crate::error::{SessionError, SessionResult};
use crate::session::{Connection, GameSession, Role, SessionSnapshot, VacatedSeat};
use crate::{ConnectionId, ServerConfig, SessionId};

// ============================================================================
// Commands
// ============================================================================

pub(crate) enum Command {
    Join {
        conn: Connection,
        resume: bool,
        cancel: CancellationToken,
        reply: oneshot::Sender<SessionResult<Role>>,
    },
    Propose {
        conn: ConnectionId,
        mv: Move,
        cancel: CancellationToken,
        reply: oneshot::Sender<SessionResult<Move>>,
    },
    /// Never cancelled: a disconnect must always vacate.
    Leave {
        conn: ConnectionId,
        reply: oneshot::Sender<()>,
    },
    SeatExpired {
        color: Color,
        epoch: u64,
    },
    Inspect {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// Stop if idle; otherwise keep running.
    Retire {
        reply: oneshot::Sender<RetireOutcome>,
    },
    /// Close the mailbox, finish everything already queued, then stop.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetireOutcome {
    Retired,
    Busy,
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable address of a running session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Join (or, with `resume`, rejoin) the session.
    pub async fn join(
        &self,
        conn: Connection,
        resume: bool,
        cancel: CancellationToken,
    ) -> SessionResult<Role> {
        self.request(|reply| Command::Join {
            conn,
            resume,
            cancel,
            reply,
        })
        .await?
    }

    /// Propose a move on behalf of `conn`.
    pub async fn propose_move(
        &self,
        conn: ConnectionId,
        mv: Move,
        cancel: CancellationToken,
    ) -> SessionResult<Move> {
        self.request(|reply| Command::Propose {
            conn,
            mv,
            cancel,
            reply,
        })
        .await?
    }

    /// Remove `conn`; a vacated seat starts its grace timer.
    pub async fn leave(&self, conn: ConnectionId) -> SessionResult<()> {
        self.request(|reply| Command::Leave { conn, reply }).await
    }

    /// Current state, as seen from inside the serialized stream.
    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.request(|reply| Command::Inspect { reply }).await
    }

    pub(crate) async fn retire(&self) -> SessionResult<RetireOutcome> {
        self.request(|reply| Command::Retire { reply }).await
    }

    pub(crate) async fn shutdown(&self) {
        // Already stopped is fine.
        let _ = self.tx.send(Command::Shutdown).await;
    }

    pub(crate) fn same_actor(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SessionResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Retired)?;
        // A dropped reply means the actor stopped with this command queued.
        rx.await.map_err(|_| SessionError::Retired)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Spawn the actor for `session` on `tracker`.
pub(crate) fn spawn_session(
    session: GameSession,
    config: &ServerConfig,
    idle_tx: mpsc::UnboundedSender<SessionId>,
    archive: Archive,
    tracker: &TaskTracker,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let handle = SessionHandle {
        session_id: session.id().to_string(),
        tx: tx.clone(),
    };
    let actor = SessionActor {
        session,
        rx,
        timer_tx: tx.downgrade(),
        grace_period: config.seat_grace_period,
        idle_tx,
        idle_reported: false,
        archive,
    };
    tracker.spawn(actor.run());
    handle
}

struct SessionActor {
    session: GameSession,
    rx: mpsc::Receiver<Command>,
    timer_tx: mpsc::WeakSender<Command>,
    grace_period: Duration,
    idle_tx: mpsc::UnboundedSender<SessionId>,
    idle_reported: bool,
    archive: Archive,
}

impl SessionActor {
    async fn run(mut self) {
        info!(session_id = %self.session.id(), "session created");
        // A session set up from a finished position is archived at once.
        self.flush_archive();
        self.report_idle();

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Retire { reply } => {
                    if self.session.is_idle() {
                        // Closing first makes queued and future sends fail
                        // instead of being silently lost.
                        self.rx.close();
                        let _ = reply.send(RetireOutcome::Retired);
                        break;
                    }
                    let _ = reply.send(RetireOutcome::Busy);
                }
                Command::Shutdown => {
                    debug!(session_id = %self.session.id(), "draining mailbox");
                    self.rx.close();
                }
                other => self.handle(other),
            }
            self.flush_archive();
            self.report_idle();
        }

        self.flush_archive();
        info!(session_id = %self.session.id(), "session stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Join {
                conn,
                resume,
                cancel,
                reply,
            } => {
                let result = if cancel.is_cancelled() {
                    debug!(
                        session_id = %self.session.id(),
                        connection_id = conn.id,
                        "cancelled join dropped"
                    );
                    Err(SessionError::Cancelled)
                } else if resume {
                    self.session.rejoin(&conn).map(Role::Player)
                } else {
                    self.session.join(&conn)
                };
                let _ = reply.send(result);
            }
            Command::Propose {
                conn,
                mv,
                cancel,
                reply,
            } => {
                let result = if cancel.is_cancelled() {
                    debug!(
                        session_id = %self.session.id(),
                        connection_id = conn,
                        %mv,
                        "cancelled proposal dropped"
                    );
                    Err(SessionError::Cancelled)
                } else {
                    self.session.propose_move(conn, mv)
                };
                // A finishing move is archived before its reply.
                self.flush_archive();
                let _ = reply.send(result);
            }
            Command::Leave { conn, reply } => {
                if let Some(vacated) = self.session.leave(conn) {
                    self.arm_grace_timer(vacated);
                }
                let _ = reply.send(());
            }
            Command::SeatExpired { color, epoch } => {
                self.session.expire_seat(color, epoch);
            }
            Command::Inspect { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Retire { .. } | Command::Shutdown => {}
        }
    }

    fn arm_grace_timer(&self, vacated: VacatedSeat) {
        let timer_tx = self.timer_tx.clone();
        let grace = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tx) = timer_tx.upgrade() {
                let _ = tx
                    .send(Command::SeatExpired {
                        color: vacated.color,
                        epoch: vacated.epoch,
                    })
                    .await;
            }
        });
    }

    fn flush_archive(&mut self) {
        if let Some(record) = self.session.take_archive() {
            self.archive.store(record);
        }
    }

    fn report_idle(&mut self) {
        let idle = self.session.is_idle();
        if idle && !self.idle_reported {
            let _ = self.idle_tx.send(self.session.id().to_string());
        }
        self.idle_reported = idle;
    }
}

// ============================================================================
// Tests
// ============================================================================
