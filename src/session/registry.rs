//! Process-wide session registry.
//!
//! The registry maps session ids to [`SessionHandle`]s. A handle is the
//! command sender of a session task plus a watch on its summary, so listing
//! sessions never waits on a busy session.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::actor::{self, SessionCommand};
use super::member::{Role, User};
use super::{Accessibility, Session, SessionConfig, SessionDeps, SessionSummary};
use crate::error::RequestError;
use crate::mission::Mission;
use crate::observability::{Event, metrics};
use crate::transport::connection::ClientConnection;
use crate::transport::protocol::ClientMessage;

/// Capacity of each session's command channel.
const COMMAND_BUFFER: usize = 256;

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<SessionCommand>,
    summary: watch::Receiver<SessionSummary>,
}

impl SessionHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published summary.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        self.summary.borrow().clone()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), RequestError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RequestError::SessionNotFound(self.id.clone()))
    }

    /// Joins `user` as `role` and waits for the session's answer.
    ///
    /// # Errors
    ///
    /// Returns the session's rejection, or [`RequestError::SessionNotFound`]
    /// if the session went away.
    pub async fn join(
        &self,
        user: User,
        role: Role,
        connection: ClientConnection,
        request_id: Option<String>,
    ) -> Result<(), RequestError> {
        let (reply, answer) = oneshot::channel();
        self.send(SessionCommand::Join {
            user,
            role,
            connection,
            request_id,
            reply,
        })
        .await?;
        answer
            .await
            .map_err(|_| RequestError::SessionNotFound(self.id.clone()))?
    }

    /// Forwards a request. Rejections are answered by the session itself.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::SessionNotFound`] if the session went away.
    pub async fn request(
        &self,
        user_id: &str,
        request_id: Option<String>,
        message: ClientMessage,
    ) -> Result<(), RequestError> {
        self.send(SessionCommand::Request {
            user_id: user_id.to_string(),
            request_id,
            message,
        })
        .await
    }

    /// Tells the session a member's connection closed.
    pub async fn disconnect(&self, user_id: &str, connection_id: &str) {
        let _ = self
            .send(SessionCommand::Disconnect {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
            })
            .await;
    }

    /// Removes a user whose login or connection was taken over.
    pub async fn evict(&self, user_id: &str) {
        let _ = self
            .send(SessionCommand::Evict {
                user_id: user_id.to_string(),
            })
            .await;
    }

    /// Asks the session to tear itself down.
    pub async fn shutdown(&self, reason: &str) {
        let _ = self
            .send(SessionCommand::Shutdown {
                reason: reason.to_string(),
            })
            .await;
    }

    /// Whether the session task has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// All running sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    deps: SessionDeps,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions share `deps`.
    #[must_use]
    pub fn new(deps: SessionDeps) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            deps,
        })
    }

    /// Shared collaborators.
    #[must_use]
    pub const fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    /// Launches a session over `mission` and starts its task.
    pub fn launch(self: &Arc<Self>, mission: Mission, owner_id: &str, config: SessionConfig) -> SessionHandle {
        let session = Session::new(mission, owner_id, config, self.deps.clone());
        let id = session.id().to_string();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (summary_tx, summary_rx) = watch::channel(session.summary());
        let handle = SessionHandle {
            id: id.clone(),
            commands: commands_tx,
            summary: summary_rx,
        };

        info!(session_id = %id, mission = %session.mission().name, owner_id, "session launched");
        self.deps.events.emit(Event::SessionLaunched {
            timestamp: Utc::now(),
            session_id: id.clone(),
            mission: session.mission().name.clone(),
            owner_id: owner_id.to_string(),
        });

        self.sessions.insert(id, handle.clone());
        metrics::set_sessions_active(self.sessions.len());
        actor::spawn(session, commands_rx, summary_tx, Arc::downgrade(self));
        handle
    }

    /// Handle of a running session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|h| h.clone())
    }

    /// Summaries visible to `viewer`: public sessions, plus private
    /// sessions the viewer owns.
    #[must_use]
    pub fn list(&self, viewer: Option<&str>) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|h| h.summary())
            .filter(|s| {
                s.accessibility == Accessibility::Public || viewer.is_some_and(|v| v == s.owner_id)
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Drops a session from the registry.
    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.remove(session_id).map(|(_, h)| h);
        if removed.is_some() {
            debug!(session_id, "session removed from registry");
            metrics::set_sessions_active(self.sessions.len());
        }
        removed
    }

    /// Number of running sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Shuts every session down.
    pub async fn shutdown_all(&self, reason: &str) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|h| h.clone()).collect();
        for handle in handles {
            handle.shutdown(reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mission::tests::mission;
    use crate::session::tests::deps;
    use crate::session::tests::{drain, methods};
    use crate::session::{AccessLevel, SessionState};
    use crate::transport::connection::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn login(registry: &SessionRegistry, id: &str) -> (User, ClientConnection, UnboundedReceiver<Outbound>) {
        let user = User::new(id, id, AccessLevel::Admin);
        registry.deps().logins.login(user.clone(), true).unwrap();
        let (conn, rx) = ClientConnection::new(id);
        registry.deps().logins.attach(conn.clone(), true).unwrap();
        (user, conn, rx)
    }

    #[tokio::test]
    async fn private_sessions_are_listed_only_to_owner() {
        let registry = SessionRegistry::new(deps());
        registry.launch(mission(), "alice", SessionConfig::default());
        registry.launch(
            mission(),
            "bob",
            SessionConfig {
                accessibility: Accessibility::Private,
                ..SessionConfig::default()
            },
        );
        assert_eq!(registry.list(None).len(), 1);
        assert_eq!(registry.list(Some("alice")).len(), 1);
        assert_eq!(registry.list(Some("bob")).len(), 2);
    }

    #[tokio::test]
    async fn join_goes_through_the_task() {
        let registry = SessionRegistry::new(deps());
        let handle = registry.launch(mission(), "owner", SessionConfig::default());
        let (user, conn, _rx) = login(&registry, "u1");
        handle.join(user.clone(), Role::Manager, conn.clone(), None).await.unwrap();
        settle().await;
        assert_eq!(handle.summary().member_count, 1);
        assert_eq!(
            handle.join(user, Role::Manager, conn, None).await,
            Err(RequestError::AlreadyJoined(handle.id().to_string()))
        );
    }

    #[tokio::test]
    async fn shutdown_removes_session() {
        let registry = SessionRegistry::new(deps());
        let handle = registry.launch(mission(), "owner", SessionConfig::default());
        assert_eq!(registry.len(), 1);
        registry.shutdown_all("test").await;
        settle().await;
        assert!(registry.is_empty());
        assert!(handle.is_closed());
        assert_eq!(
            handle.request("u1", None, ClientMessage::RequestCurrentSession).await,
            Err(RequestError::SessionNotFound(handle.id().to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_inside_the_task() {
        let registry = SessionRegistry::new(deps());
        let handle = registry.launch(mission(), "owner", SessionConfig::default());
        let (user, conn, mut rx) = login(&registry, "m1");
        handle.join(user, Role::Manager, conn, None).await.unwrap();
        for message in [
            serde_json::json!({"method": "request-start-session"}),
            serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}}),
            serde_json::json!({"method": "request-execute-action", "data": {"nodeId": "red-side", "actionId": "red-side-a"}}),
        ] {
            handle
                .request("m1", None, serde_json::from_value(message).unwrap())
                .await
                .unwrap();
        }
        settle().await;
        assert_eq!(handle.summary().state, SessionState::Started);
        let before = methods(&drain(&mut rx));
        assert!(before.contains(&"action-execution-initiated".to_string()));
        assert!(!before.contains(&"action-execution-completed".to_string()));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;
        assert_eq!(methods(&drain(&mut rx)), ["action-execution-completed"]);
    }
}
