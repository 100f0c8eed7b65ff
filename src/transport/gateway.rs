//! Connection gateway.
//!
//! The gateway sits between client sockets and sessions. It logs users in,
//! attaches their connections, applies the per-user rate limit and frame
//! size limit, parses frames, and routes each request to the session the
//! user joined. It never touches session state directly.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use super::connection::{CLOSE_DUPLICATE, ClientConnection};
use super::login::LoginRegistry;
use super::protocol::{ClientMessage, ErrorCode, Inbound, OutboundFrame, RequestContext, ServerMessage, parse_client_message};
use super::rate_limit::{RateDecision, RateLimiter};
use crate::error::{LoginError, RequestError};
use crate::observability::metrics;
use crate::session::member::User;
use crate::session::registry::SessionRegistry;

/// Routes client traffic into sessions.
pub struct Gateway {
    sessions: Arc<SessionRegistry>,
    logins: Arc<LoginRegistry>,
    limiter: RateLimiter,
    max_message_size: usize,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("sessions", &self.sessions.len())
            .field("logins", &self.logins.len())
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Creates a gateway over `sessions`, sharing its login registry.
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>, limiter: RateLimiter, max_message_size: usize) -> Self {
        let logins = Arc::clone(&sessions.deps().logins);
        Self {
            sessions,
            logins,
            limiter,
            max_message_size,
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    #[must_use]
    pub const fn logins(&self) -> &Arc<LoginRegistry> {
        &self.logins
    }

    /// Logs `user` in. With `evict`, an existing login is switched out and
    /// removed from its session.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::DuplicateLogin`] if the user is logged in and
    /// `evict` is not set.
    pub async fn login(&self, user: User, evict: bool) -> Result<(), LoginError> {
        let user_id = user.id.clone();
        if let Some(evicted) = self.logins.login(user, evict)? {
            info!(user_id = %user_id, "login replaced");
            self.evict_from_session(&user_id, evicted.session_id.as_deref()).await;
        }
        Ok(())
    }

    /// Attaches `connection` for `user`, logging them in first if needed.
    ///
    /// On failure the error is sent on `connection` and the connection is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns the login failure: a duplicate connection without
    /// `takeover`, or a concurrent login race.
    pub async fn connect(&self, user: User, takeover: bool, connection: &ClientConnection) -> Result<(), LoginError> {
        let result = self.attach(user, takeover, connection).await;
        if let Err(err) = &result {
            debug!(user_id = %connection.user_id(), error = %err, "connection refused");
            connection.send_error(err.code(), err.to_string(), None);
            connection.close(CLOSE_DUPLICATE, "duplicate client");
        }
        result
    }

    async fn attach(&self, user: User, takeover: bool, connection: &ClientConnection) -> Result<(), LoginError> {
        let user_id = user.id.clone();
        if self.logins.user(&user_id).is_none() {
            self.logins.login(user, false)?;
        }
        if self.logins.attach(connection.clone(), takeover)?.is_some() {
            let session_id = self.logins.session_of(&user_id);
            self.evict_from_session(&user_id, session_id.as_deref()).await;
        }
        debug!(user_id = %user_id, connection_id = %connection.id(), "connection attached");
        Ok(())
    }

    async fn evict_from_session(&self, user_id: &str, session_id: Option<&str>) {
        if let Some(handle) = session_id.and_then(|id| self.sessions.get(id)) {
            handle.evict(user_id).await;
        }
    }

    /// Handles one text frame from `connection`.
    pub async fn handle_text(&self, connection: &ClientConnection, text: &str) {
        let user_id = connection.user_id();
        if self.logins.connection(user_id).as_ref() != Some(connection) {
            debug!(user_id, connection_id = %connection.id(), "frame from replaced connection dropped");
            return;
        }
        if let RateDecision::Throttled { .. } = self.limiter.check(user_id, Instant::now()) {
            metrics::record_rate_limited();
            connection.send_error(
                ErrorCode::RateLimitExceeded,
                "too many messages, slow down",
                None,
            );
            return;
        }
        if text.len() > self.max_message_size {
            connection.send_error(
                ErrorCode::MessageTooLarge,
                format!("message too large: {} bytes (limit: {})", text.len(), self.max_message_size),
                None,
            );
            return;
        }
        let inbound = match parse_client_message(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                connection.send_error(ErrorCode::InvalidMessage, e.to_string(), None);
                return;
            }
        };
        metrics::record_message(inbound.message.method());
        self.dispatch(connection, inbound).await;
    }

    async fn dispatch(&self, connection: &ClientConnection, inbound: Inbound) {
        let Inbound {
            request_id,
            message,
        } = inbound;
        let user_id = connection.user_id();
        let bound = self
            .logins
            .session_of(user_id)
            .and_then(|id| self.sessions.get(&id));

        let result = match (message, bound) {
            (ClientMessage::RequestJoinSession { session_id, role }, _) => {
                match (self.sessions.get(&session_id), self.logins.user(user_id)) {
                    (Some(handle), Some(user)) => {
                        handle
                            .join(user, role, connection.clone(), request_id.clone())
                            .await
                    }
                    (None, _) => Err(RequestError::SessionNotFound(session_id)),
                    (_, None) => Err(RequestError::NotJoined),
                }
            }
            (ClientMessage::RequestCurrentSession, None) => {
                let message = ServerMessage::CurrentSession { session: None };
                connection.send(&OutboundFrame {
                    message: &message,
                    request: request_id
                        .as_deref()
                        .map(|r| RequestContext::fulfilled(r, user_id)),
                });
                Ok(())
            }
            (message, Some(handle)) => {
                handle
                    .request(user_id, request_id.clone(), message)
                    .await
            }
            (_, None) => Err(RequestError::NotJoined),
        };

        if let Err(err) = result {
            metrics::record_rejection(err.code());
            connection.send_error(
                err.code(),
                err.to_string(),
                request_id
                    .as_deref()
                    .map(|r| RequestContext::rejected(r, user_id)),
            );
        }
    }

    /// Releases everything held for a closed connection.
    pub async fn disconnect(&self, connection: &ClientConnection) {
        let user_id = connection.user_id();
        if let Some(login) = self.logins.logout(user_id, connection.id())
            && let Some(handle) = login.session_id.and_then(|id| self.sessions.get(&id))
        {
            handle.disconnect(user_id, connection.id()).await;
        }
        self.limiter.release(user_id, Instant::now());
        debug!(user_id, connection_id = %connection.id(), "connection closed");
    }
}
