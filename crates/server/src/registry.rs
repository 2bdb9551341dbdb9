//! Session registry.
//!
//! Process-wide map from session id to the handle of its actor. The
//! registry is the only place sessions are created or released. It hands
//! out handles, never sessions, so all access goes through the owning
//! actor's mailbox.
//!
//! Release is cooperative: an actor reports when it becomes idle, the
//! reaper waits `release_delay` and then asks the actor to retire. The
//! actor itself decides whether it is still idle, so a connection that
//! arrives in between is never lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gambit_rules::{Game, Move};
use gambit_wire::GameRecordProto;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::actor::{RetireOutcome, SessionHandle, spawn_session};
use crate::archive::Archive;
use crate::broadcast::{BroadcastChannel, Outlet};
use crate::error::{ConfigError, SessionError, SessionResult};
use crate::session::{Connection, GameSession, Role, SessionSnapshot};
use crate::{ConnectionId, ServerConfig, SessionId};

/// Cloneable entry point to all sessions of a process.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: ServerConfig,
    sessions: DashMap<SessionId, SessionHandle>,
    channel: BroadcastChannel,
    archive: Archive,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    idle_tx: mpsc::UnboundedSender<SessionId>,
    next_connection: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry and start its reaper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let archive = Archive::new(config.archive_capacity, config.archive_dir.clone());
        let inner = Arc::new(RegistryInner {
            config,
            sessions: DashMap::new(),
            channel: BroadcastChannel::new(),
            archive,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            idle_tx,
            next_connection: AtomicU64::new(1),
        });

        let reaper = Reaper {
            registry: Arc::downgrade(&inner),
            idle_rx,
            shutdown: inner.shutdown.clone(),
            delay: inner.config.release_delay,
            tracker: inner.tracker.clone(),
        };
        inner.tracker.spawn(reaper.run());

        Ok(Self { inner })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn channel(&self) -> &BroadcastChannel {
        &self.inner.channel
    }

    pub fn allocate_connection_id(&self) -> ConnectionId {
        self.inner.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Return the session's handle, creating it from the starting position
    /// if absent.
    pub fn get_or_create(&self, session_id: &str) -> SessionResult<SessionHandle> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        let handle = self
            .inner
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                self.spawn(session_id, Game::new(self.inner.config.promotion_policy))
            })
            .clone();
        Ok(handle)
    }

    /// Create a session starting from `fen`.
    pub fn create_from_fen(&self, session_id: &str, fen: &str) -> SessionResult<SessionHandle> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        let game = Game::from_fen(fen, self.inner.config.promotion_policy)?;
        match self.inner.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::SessionExists {
                session_id: session_id.to_string(),
            }),
            Entry::Vacant(slot) => Ok(slot.insert(self.spawn(session_id, game)).clone()),
        }
    }

    fn spawn(&self, session_id: &str, game: Game) -> SessionHandle {
        let session = GameSession::new(
            session_id,
            game,
            self.inner.channel.clone(),
            self.inner.config.resync_after_move,
        );
        spawn_session(
            session,
            &self.inner.config,
            self.inner.idle_tx.clone(),
            self.inner.archive.clone(),
            &self.inner.tracker,
        )
    }

    /// Attach `conn` to a session and assign its role.
    ///
    /// The outlet is registered first so the role and board events sent
    /// during the join reach it.
    pub async fn connect(
        &self,
        session_id: &str,
        conn: Connection,
        outlet: Outlet,
        resume: bool,
        cancel: CancellationToken,
    ) -> SessionResult<Role> {
        self.inner.channel.register(conn.id, outlet);

        let handle = self.get_or_create(session_id)?;
        match handle.join(conn.clone(), resume, cancel.clone()).await {
            Err(SessionError::Retired) => {
                // Lost the race with the reaper; start over on a fresh actor.
                debug!(session_id, "joined a retiring session, retrying");
                self.forget(&handle);
                let handle = self.get_or_create(session_id)?;
                handle
                    .join(conn, resume, cancel)
                    .await
                    .map_err(|e| self.settle(e))
            }
            other => other.map_err(|e| self.settle(e)),
        }
    }

    pub async fn propose_move(
        &self,
        session_id: &str,
        conn: ConnectionId,
        mv: Move,
        cancel: CancellationToken,
    ) -> SessionResult<Move> {
        let Some(handle) = self.handle(session_id) else {
            return Err(self.settle(SessionError::NotAParticipant));
        };
        handle
            .propose_move(conn, mv, cancel)
            .await
            .map_err(|e| match e {
                SessionError::Retired => self.settle(SessionError::NotAParticipant),
                other => other,
            })
    }

    /// Detach `conn`. Its pending operations are cancelled first; a seat it
    /// held stays reserved for the grace period.
    pub async fn disconnect(
        &self,
        session_id: Option<&str>,
        conn: ConnectionId,
        cancel: &CancellationToken,
    ) {
        cancel.cancel();
        if let Some(session_id) = session_id
            && let Some(handle) = self.handle(session_id)
        {
            // A stopped actor has nothing left to vacate.
            let _ = handle.leave(conn).await;
        }
        self.inner.channel.unregister(conn);
        debug!(connection_id = conn, "connection detached");
    }

    /// Remove the session if it has no connections and no reserved seats.
    /// Returns whether it was removed.
    pub async fn release(&self, session_id: &str) -> bool {
        let Some(handle) = self.handle(session_id) else {
            return false;
        };
        match handle.retire().await {
            Ok(RetireOutcome::Retired) | Err(SessionError::Retired) => {
                self.forget(&handle);
                info!(session_id, "session released");
                true
            }
            Ok(RetireOutcome::Busy) => false,
            Err(_) => false,
        }
    }

    /// The record of the session's concluded game, if any.
    pub fn archived(&self, session_id: &str) -> Option<GameRecordProto> {
        self.inner.archive.get(session_id)
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.handle(session_id)?.snapshot().await.ok()
    }

    /// Stop accepting work, let every actor finish what is already queued,
    /// and wait for all of them to exit.
    pub async fn shutdown(&self) {
        info!(sessions = self.session_count(), "registry draining");
        self.inner.shutdown.cancel();

        // Sessions created concurrently with the cancel are caught by a later pass.
        loop {
            let mut handles = Vec::new();
            self.inner.sessions.retain(|_, handle| {
                handles.push(handle.clone());
                false
            });
            if handles.is_empty() {
                break;
            }
            for handle in &handles {
                handle.shutdown().await;
            }
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("registry drained");
    }

    fn handle(&self, session_id: &str) -> Option<SessionHandle> {
        self.inner.sessions.get(session_id).map(|h| h.clone())
    }

    /// Drop the map entry only if it still points at `handle`'s actor.
    fn forget(&self, handle: &SessionHandle) {
        self.inner
            .sessions
            .remove_if(handle.session_id(), |_, current| current.same_actor(handle));
    }

    fn settle(&self, err: SessionError) -> SessionError {
        match err {
            SessionError::Retired | SessionError::NotAParticipant if self.is_shutting_down() => {
                SessionError::ShuttingDown
            }
            other => other,
        }
    }
}

// ============================================================================
// Reaper
// ============================================================================

struct Reaper {
    registry: Weak<RegistryInner>,
    idle_rx: mpsc::UnboundedReceiver<SessionId>,
    shutdown: CancellationToken,
    delay: Duration,
    tracker: TaskTracker,
}

impl Reaper {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                notice = self.idle_rx.recv() => {
                    let Some(session_id) = notice else { break };
                    self.schedule_release(session_id);
                }
            }
        }
        debug!("reaper stopped");
    }

    fn schedule_release(&self, session_id: SessionId) {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let delay = self.delay;
        self.tracker.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(inner) = registry.upgrade() {
                        SessionRegistry { inner }.release(&session_id).await;
                    }
                }
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
