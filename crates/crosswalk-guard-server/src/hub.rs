//! Connected-session registry and push channel.
//!
//! One entry per live WebSocket connection: the session's role (set on its
//! first enter command) and the sender side of its outbound queue. The hub
//! is the server's [`EventSink`]; the engine stays unaware of transports.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crosswalk_guard_core::{DispatchError, EventSink, OutboundEvent, Role, SessionId};

use crate::dto::ServerMessage;

struct Session {
    role: Option<Role>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Registry of connected sessions, shared across handlers.
#[derive(Clone, Default)]
pub struct SessionHub {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl SessionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected session with no role yet.
    pub fn register(&self, sid: SessionId, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.inner.write().insert(sid, Session { role: None, tx });
    }

    /// Remove a session, returning the role it held, if any.
    pub fn remove(&self, sid: &SessionId) -> Option<Role> {
        self.inner.write().remove(sid).and_then(|s| s.role)
    }

    /// Record the role a session plays. Re-entering under a different role
    /// simply overwrites the previous one.
    pub fn set_role(&self, sid: &SessionId, role: Role) {
        if let Some(session) = self.inner.write().get_mut(sid) {
            session.role = Some(role);
        }
    }

    /// The role a session currently plays.
    pub fn role(&self, sid: &SessionId) -> Option<Role> {
        self.inner.read().get(sid).and_then(|s| s.role)
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// `true` when no session is connected.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Queue a message for one session.
    pub fn send(&self, sid: &SessionId, message: ServerMessage) -> Result<(), DispatchError> {
        let sessions = self.inner.read();
        let session = sessions.get(sid).ok_or_else(|| DispatchError::UnknownSession {
            sid: sid.to_string(),
        })?;
        session.tx.send(message).map_err(|_| DispatchError::SessionClosed {
            sid: sid.to_string(),
        })
    }
}

#[async_trait]
impl EventSink for SessionHub {
    async fn deliver(&self, sid: &SessionId, event: &OutboundEvent) -> Result<(), DispatchError> {
        self.send(sid, ServerMessage::from(event.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[test]
    fn test_register_role_remove() {
        let hub = SessionHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register(sid("a"), tx);

        assert_eq!(hub.role(&sid("a")), None);
        hub.set_role(&sid("a"), Role::Ped);
        assert_eq!(hub.role(&sid("a")), Some(Role::Ped));

        assert_eq!(hub.remove(&sid("a")), Some(Role::Ped));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_send_to_unknown_session() {
        let hub = SessionHub::new();
        let result = hub.send(
            &sid("ghost"),
            ServerMessage::Error {
                message: "x".into(),
            },
        );
        assert!(matches!(result, Err(DispatchError::UnknownSession { .. })));
    }

    #[tokio::test]
    async fn test_deliver_reaches_queue() {
        let hub = SessionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(sid("a"), tx);

        hub.deliver(
            &sid("a"),
            &OutboundEvent::AlertEnd {
                crosswalk_id: crosswalk_guard_core::CrosswalkId::new(1),
                ts: 0,
            },
        )
        .await
        .unwrap();

        assert!(matches!(rx.recv().await, Some(ServerMessage::AlertEnd { .. })));
    }

    #[test]
    fn test_send_to_closed_session() {
        let hub = SessionHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(sid("a"), tx);
        drop(rx);

        let result = hub.send(
            &sid("a"),
            ServerMessage::Error {
                message: "x".into(),
            },
        );
        assert!(matches!(result, Err(DispatchError::SessionClosed { .. })));
    }
}
