//! Per-connection dispatch.
//!
//! A `Participant` is what a transport holds for one connection. It turns
//! decoded client messages into registry calls and reports every failure
//! back to this connection only, as `ProposalRejected`.

use gambit_wire::client_message::Body;
use gambit_wire::{ClientHello, ClientMessage, MoveProposal};
use prost::Message;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcast::Outlet;
use crate::error::{SessionError, SessionResult};
use crate::event::ServerEvent;
use crate::registry::SessionRegistry;
use crate::session::Connection;
use crate::validation::{parse_proposal, validate_hello};
use crate::{ConnectionId, SessionId};

pub struct Participant {
    registry: SessionRegistry,
    connection_id: ConnectionId,
    outlet: Outlet,
    cancel: CancellationToken,
    joined: Option<SessionId>,
}

impl Participant {
    /// Bind a new connection. `outlet` receives every event for it.
    pub fn new(registry: SessionRegistry, outlet: Outlet) -> Self {
        let connection_id = registry.allocate_connection_id();
        debug!(connection_id, "connection opened");
        Self {
            registry,
            connection_id,
            outlet,
            cancel: CancellationToken::new(),
            joined: None,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The session this connection joined, once its hello succeeded.
    pub fn session_id(&self) -> Option<&str> {
        self.joined.as_deref()
    }

    /// Cancelled when the connection goes away. A transport that runs
    /// `handle` in its own task can cancel it early through this token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process one decoded client message.
    ///
    /// Errors are also delivered to this connection's outlet.
    pub async fn handle(&mut self, message: ClientMessage) -> SessionResult<()> {
        let result = match message.body {
            Some(Body::Hello(hello)) => self.hello(hello).await,
            Some(Body::Move(proposal)) => self.propose(proposal).await,
            None => {
                debug!(connection_id = self.connection_id, "empty client message ignored");
                return Ok(());
            }
        };
        if let Err(err) = &result {
            self.reject(err.clone());
        }
        result
    }

    /// Decode and process one frame from the transport.
    ///
    /// Undecodable frames are dropped.
    pub async fn handle_bytes(&mut self, bytes: &[u8]) -> SessionResult<()> {
        match ClientMessage::decode(bytes) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!(connection_id = self.connection_id, error = %e, "undecodable frame dropped");
                Ok(())
            }
        }
    }

    /// Leave the session and release the outlet.
    pub async fn disconnect(self) {
        self.registry
            .disconnect(self.joined.as_deref(), self.connection_id, &self.cancel)
            .await;
    }

    async fn hello(&mut self, hello: ClientHello) -> SessionResult<()> {
        if self.joined.is_some() {
            return Err(SessionError::AlreadyJoined);
        }
        validate_hello(&hello)?;

        let conn = Connection::new(self.connection_id, hello.client_id);
        self.registry
            .connect(
                &hello.session_id,
                conn,
                self.outlet.clone(),
                hello.resume,
                self.cancel.clone(),
            )
            .await?;
        self.joined = Some(hello.session_id);
        Ok(())
    }

    async fn propose(&mut self, proposal: MoveProposal) -> SessionResult<()> {
        let Some(session_id) = self.joined.as_deref() else {
            return Err(SessionError::NotAParticipant);
        };
        let mv = parse_proposal(&proposal)?;
        self.registry
            .propose_move(session_id, self.connection_id, mv, self.cancel.clone())
            .await?;
        Ok(())
    }

    fn reject(&self, err: SessionError) {
        debug!(connection_id = self.connection_id, code = err.code(), %err, "request rejected");
        match self.outlet.try_send(ServerEvent::Rejected(err)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = self.connection_id, "outlet full, rejection dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
