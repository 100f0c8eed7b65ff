//! Process-wide login registry.
//!
//! A [`Login`] binds one user to at most one live connection and at most one
//! joined session. Duplicate logins and duplicate connections are either
//! evicted or refused, at the caller's choice.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::connection::{CLOSE_SWITCHED, ClientConnection};
use super::protocol::ServerMessage;
use crate::error::{LoginError, RequestError};
use crate::observability::metrics;
use crate::session::member::User;

/// One user's presence in the process.
#[derive(Debug, Clone)]
pub struct Login {
    pub user: User,
    /// Live connection, if one is attached.
    pub connection: Option<ClientConnection>,
    /// Joined session, if any.
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Login {
    fn new(user: User) -> Self {
        Self {
            user,
            connection: None,
            session_id: None,
            created_at: Utc::now(),
        }
    }

    fn switch_out(&self) {
        if let Some(conn) = &self.connection {
            conn.send_message(&ServerMessage::ConnectionSwitched);
            conn.close(CLOSE_SWITCHED, "connection switched");
        }
    }
}

/// Registry of logins keyed by user id.
#[derive(Debug, Default)]
pub struct LoginRegistry {
    logins: DashMap<String, Login>,
}

impl LoginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a login for `user`.
    ///
    /// If the user already holds one and `evict` is set, the old login's
    /// connection is told it was switched and closed, and the old login is
    /// returned so the caller can quit its session.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::DuplicateLogin`] if the user holds a login and
    /// `evict` is not set.
    pub fn login(&self, user: User, evict: bool) -> Result<Option<Login>, LoginError> {
        let user_id = user.id.clone();
        let evicted = match self.logins.entry(user_id.clone()) {
            Entry::Occupied(mut entry) => {
                if !evict {
                    return Err(LoginError::DuplicateLogin(user_id));
                }
                let old = entry.insert(Login::new(user));
                old.switch_out();
                info!(user_id = %user_id, "previous login evicted");
                Some(old)
            }
            Entry::Vacant(entry) => {
                entry.insert(Login::new(user));
                None
            }
        };
        self.update_gauge();
        Ok(evicted)
    }

    /// Attaches `connection` to the user's login.
    ///
    /// A live connection already attached is switched out when `takeover`
    /// is set and returned.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::NotLoggedIn`] without a login and
    /// [`LoginError::DuplicateConnection`] if a live connection is attached
    /// and `takeover` is not set.
    pub fn attach(
        &self,
        connection: ClientConnection,
        takeover: bool,
    ) -> Result<Option<ClientConnection>, LoginError> {
        let user_id = connection.user_id().to_string();
        let replaced = {
            let mut login = self
                .logins
                .get_mut(&user_id)
                .ok_or_else(|| LoginError::NotLoggedIn(user_id.clone()))?;
            let live = login.connection.as_ref().filter(|c| !c.is_closed()).is_some();
            if live && !takeover {
                return Err(LoginError::DuplicateConnection(user_id));
            }
            if live {
                login.switch_out();
                debug!(user_id = %user_id, "connection taken over");
            }
            login.connection.replace(connection).filter(|_| live)
        };
        self.update_gauge();
        Ok(replaced)
    }

    /// Removes the login if `connection_id` is still its connection.
    pub fn logout(&self, user_id: &str, connection_id: &str) -> Option<Login> {
        let removed = self
            .logins
            .remove_if(user_id, |_, login| {
                login
                    .connection
                    .as_ref()
                    .is_some_and(|c| c.id() == connection_id)
            })
            .map(|(_, login)| login);
        if removed.is_some() {
            self.update_gauge();
        }
        removed
    }

    /// Records that the user joined `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::AlreadyJoined`] if the user is in another
    /// session, or [`RequestError::NotJoined`] without a login.
    pub fn bind_session(&self, user_id: &str, session_id: &str) -> Result<(), RequestError> {
        let mut login = self.logins.get_mut(user_id).ok_or(RequestError::NotJoined)?;
        match login.session_id.as_deref() {
            Some(current) if current != session_id => {
                Err(RequestError::AlreadyJoined(current.to_string()))
            }
            _ => {
                login.session_id = Some(session_id.to_string());
                Ok(())
            }
        }
    }

    /// Clears the user's session if it is `session_id`.
    pub fn unbind_session(&self, user_id: &str, session_id: &str) {
        if let Some(mut login) = self.logins.get_mut(user_id)
            && login.session_id.as_deref() == Some(session_id)
        {
            login.session_id = None;
        }
    }

    /// Session the user has joined.
    #[must_use]
    pub fn session_of(&self, user_id: &str) -> Option<String> {
        self.logins.get(user_id)?.session_id.clone()
    }

    /// Live connection of the user.
    #[must_use]
    pub fn connection(&self, user_id: &str) -> Option<ClientConnection> {
        self.logins
            .get(user_id)?
            .connection
            .clone()
            .filter(|c| !c.is_closed())
    }

    /// The logged-in user.
    #[must_use]
    pub fn user(&self, user_id: &str) -> Option<User> {
        self.logins.get(user_id).map(|l| l.user.clone())
    }

    /// Number of logins holding a live connection.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.logins
            .iter()
            .filter(|l| l.connection.as_ref().is_some_and(|c| !c.is_closed()))
            .count()
    }

    /// Number of logins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logins.len()
    }

    /// Whether no user is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }

    fn update_gauge(&self) {
        metrics::set_connections_active(self.connected());
    }
}
