//! Fire-and-forget event delivery.
//!
//! Each connection registers one bounded outlet. Each session has an
//! audience: the connections currently present in it. Delivery is
//! at-most-once per call with no persistent queue. A full or closed outlet
//! drops the event instead of blocking the emitting session, and a
//! connection that missed events is brought current by the `BoardState`
//! resync it receives on (re)join.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::event::ServerEvent;
use crate::{ConnectionId, SessionId};

/// Sending half of a connection's event stream.
pub type Outlet = mpsc::Sender<ServerEvent>;

/// Connection outlets and per-session audiences, shared by all sessions.
#[derive(Debug, Clone, Default)]
pub struct BroadcastChannel {
    outlets: Arc<DashMap<ConnectionId, Outlet>>,
    audiences: Arc<DashMap<SessionId, Vec<ConnectionId>>>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the outlet for `conn`.
    pub fn register(&self, conn: ConnectionId, outlet: Outlet) {
        self.outlets.insert(conn, outlet);
    }

    /// Drop the outlet for `conn`. Later emits to it are no-ops.
    pub fn unregister(&self, conn: ConnectionId) {
        self.outlets.remove(&conn);
    }

    pub fn is_registered(&self, conn: ConnectionId) -> bool {
        self.outlets.contains_key(&conn)
    }

    pub(crate) fn add_to_audience(&self, session_id: &str, conn: ConnectionId) {
        let mut audience = self.audiences.entry(session_id.to_string()).or_default();
        if !audience.contains(&conn) {
            audience.push(conn);
        }
    }

    pub(crate) fn remove_from_audience(&self, session_id: &str, conn: ConnectionId) {
        if let Some(mut audience) = self.audiences.get_mut(session_id) {
            audience.retain(|&c| c != conn);
        }
        self.audiences.remove_if(session_id, |_, audience| audience.is_empty());
    }

    /// Connections currently present in `session_id`, in join order.
    pub fn audience(&self, session_id: &str) -> Vec<ConnectionId> {
        self.audiences
            .get(session_id)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Deliver `event` to every connection in the session.
    pub fn emit_to_all(&self, session_id: &str, event: &ServerEvent) {
        for conn in self.audience(session_id) {
            self.emit_to_one(conn, event.clone());
        }
    }

    /// Deliver `event` to every connection in the session except `skip`.
    pub fn emit_to_all_except(&self, session_id: &str, skip: ConnectionId, event: &ServerEvent) {
        for conn in self.audience(session_id) {
            if conn != skip {
                self.emit_to_one(conn, event.clone());
            }
        }
    }

    /// Deliver `event` to one connection. Never blocks.
    pub fn emit_to_one(&self, conn: ConnectionId, event: ServerEvent) {
        // Clone the sender so no map shard lock is held while sending.
        let Some(outlet) = self.outlets.get(&conn).map(|o| o.clone()) else {
            debug!(connection_id = conn, "no outlet, event dropped");
            return;
        };
        match outlet.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = conn, "outlet full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = conn, "outlet closed, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(fen: &str) -> ServerEvent {
        ServerEvent::BoardState {
            fen: fen.to_string(),
        }
    }

    #[test]
    fn test_emit_to_all_reaches_only_the_session() {
        let channel = BroadcastChannel::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let (tx3, mut rx3) = mpsc::channel(4);
        channel.register(1, tx1);
        channel.register(2, tx2);
        channel.register(3, tx3);
        channel.add_to_audience("a", 1);
        channel.add_to_audience("a", 2);
        channel.add_to_audience("b", 3);

        channel.emit_to_all("a", &board("x"));

        assert_eq!(rx1.try_recv().unwrap(), board("x"));
        assert_eq!(rx2.try_recv().unwrap(), board("x"));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_emit_to_all_except_skips_one() {
        let channel = BroadcastChannel::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        channel.register(1, tx1);
        channel.register(2, tx2);
        channel.add_to_audience("a", 1);
        channel.add_to_audience("a", 2);

        channel.emit_to_all_except("a", 1, &ServerEvent::SpectatorRole);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), ServerEvent::SpectatorRole);
    }

    #[test]
    fn test_full_outlet_drops_without_blocking_others() {
        let channel = BroadcastChannel::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        channel.register(1, slow_tx);
        channel.register(2, fast_tx);
        channel.add_to_audience("a", 1);
        channel.add_to_audience("a", 2);

        channel.emit_to_all("a", &board("1"));
        channel.emit_to_all("a", &board("2"));

        assert_eq!(slow_rx.try_recv().unwrap(), board("1"));
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap(), board("1"));
        assert_eq!(fast_rx.try_recv().unwrap(), board("2"));
    }

    #[test]
    fn test_closed_or_missing_outlet_is_ignored() {
        let channel = BroadcastChannel::new();
        let (tx, rx) = mpsc::channel(1);
        channel.register(1, tx);
        drop(rx);

        channel.emit_to_one(1, ServerEvent::SpectatorRole);
        channel.emit_to_one(99, ServerEvent::SpectatorRole);
    }

    #[test]
    fn test_audience_membership() {
        let channel = BroadcastChannel::new();
        channel.add_to_audience("a", 1);
        channel.add_to_audience("a", 1);
        channel.add_to_audience("a", 2);
        assert_eq!(channel.audience("a"), vec![1, 2]);

        channel.remove_from_audience("a", 1);
        assert_eq!(channel.audience("a"), vec![2]);

        channel.remove_from_audience("a", 2);
        assert!(channel.audience("a").is_empty());
        assert!(channel.audience("missing").is_empty());
    }
}
