//! Roles, permissions and session members.
//!
//! A [`Role`] is a fixed bundle of [`Permission`]s. Handlers ask for the
//! permission they need, never for a role, so the role table below is the
//! only place that decides who may do what.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::mission::VisibilityScope;
use crate::transport::connection::ClientConnection;

// ============================================================================
// Permissions and Roles
// ============================================================================

/// A named capability checked by request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    /// Start, end and reset the session.
    StartEndSessions,
    /// Open, block and write output on any node.
    ManipulateNodes,
    /// Kick, ban and assign members.
    ManageSessionMembers,
    /// See every force and node.
    CompleteVisibility,
    /// Change session configuration.
    ConfigureSessions,
    /// May be assigned to a force and act on it.
    ForceAssignable,
    /// May use execution cheats.
    Cheats,
}

impl Permission {
    /// Wire name of the permission.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartEndSessions => "startEndSessions",
            Self::ManipulateNodes => "manipulateNodes",
            Self::ManageSessionMembers => "manageSessionMembers",
            Self::CompleteVisibility => "completeVisibility",
            Self::ConfigureSessions => "configureSessions",
            Self::ForceAssignable => "forceAssignable",
            Self::Cheats => "cheats",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member's role within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs the session.
    Manager,
    /// Watches everything, acts on nothing.
    Observer,
    /// Plays one force.
    Participant,
}

impl Role {
    /// Permissions granted by the role.
    #[must_use]
    pub const fn permissions(self) -> &'static [Permission] {
        match self {
            Self::Manager => &[
                Permission::StartEndSessions,
                Permission::ManipulateNodes,
                Permission::ManageSessionMembers,
                Permission::CompleteVisibility,
                Permission::ConfigureSessions,
                Permission::Cheats,
            ],
            Self::Observer => &[Permission::CompleteVisibility],
            Self::Participant => &[Permission::ForceAssignable],
        }
    }

    /// Whether the role grants `permission`.
    #[must_use]
    pub fn has(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Observer => "observer",
            Self::Participant => "participant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Users
// ============================================================================

/// Site-wide access level of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Student,
    Instructor,
    Admin,
}

impl AccessLevel {
    /// Whether a user with this access may join as `role`.
    #[must_use]
    pub const fn permits(self, role: Role) -> bool {
        match self {
            Self::Student => matches!(role, Role::Participant),
            Self::Instructor | Self::Admin => true,
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "instructor" => Ok(Self::Instructor),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

/// An authenticated user, as handed over by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub access: AccessLevel,
}

impl User {
    /// Creates a user.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>, access: AccessLevel) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            access,
        }
    }
}

// ============================================================================
// Members
// ============================================================================

/// A user's participation in one session.
#[derive(Debug, Clone)]
pub struct Member {
    /// Member id, distinct from the user id.
    pub id: String,
    pub user: User,
    pub role: Role,
    /// Assigned force, for force-assignable roles.
    pub force_id: Option<String>,
    /// Connection events are delivered to.
    pub connection: ClientConnection,
}

impl Member {
    /// Creates a member with a fresh id and no force.
    #[must_use]
    pub fn new(user: User, role: Role, connection: ClientConnection) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user,
            role,
            force_id: None,
            connection,
        }
    }

    /// Whether the member's role grants `permission`.
    #[must_use]
    pub fn has(&self, permission: Permission) -> bool {
        self.role.has(permission)
    }

    /// Fails with [`RequestError::Unauthorized`] unless the role grants `permission`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Unauthorized`] naming the missing permission.
    pub fn require(&self, permission: Permission) -> Result<(), RequestError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(RequestError::Unauthorized(permission))
        }
    }

    /// Fails unless the member may act on nodes of `force_id`: either the
    /// role manipulates any node, or the member plays that force.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Unauthorized`] for `manipulateNodes`.
    pub fn require_act_on(&self, force_id: &str) -> Result<(), RequestError> {
        let plays_force =
            self.has(Permission::ForceAssignable) && self.force_id.as_deref() == Some(force_id);
        if plays_force || self.has(Permission::ManipulateNodes) {
            Ok(())
        } else {
            Err(RequestError::Unauthorized(Permission::ManipulateNodes))
        }
    }

    /// What the member may see of the mission.
    #[must_use]
    pub fn visibility_scope(&self) -> VisibilityScope {
        if self.has(Permission::CompleteVisibility) {
            VisibilityScope::Complete
        } else if let Some(force_id) = self
            .force_id
            .as_ref()
            .filter(|_| self.has(Permission::ForceAssignable))
        {
            VisibilityScope::Force(force_id.clone())
        } else {
            VisibilityScope::None
        }
    }

    /// Serializable roster entry.
    #[must_use]
    pub fn view(&self) -> MemberView {
        MemberView {
            id: self.id.clone(),
            user_id: self.user.id.clone(),
            username: self.user.username.clone(),
            role: self.role,
            force_id: self.force_id.clone(),
        }
    }
}

/// Roster entry sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub force_id: Option<String>,
}
