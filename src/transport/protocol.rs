//! Wire protocol.
//!
//! Every frame is a JSON object `{"method": ..., "data": ...}`. Client
//! frames may add a `requestId`; server frames answering a request echo it
//! back under `request`, together with the requester and whether the
//! request was fulfilled.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::effects::Modifier;
use crate::error::TransportError;
use crate::execution::{Execution, ExecutionCheats};
use crate::mission::Output;
use crate::mission::outcome::RealizedOutcome;
use crate::mission::view::{MissionView, NodeView};
use crate::session::config::{SessionConfig, SessionConfigUpdate};
use crate::session::member::{MemberView, Role};
use crate::session::SessionView;

// ============================================================================
// Error Codes
// ============================================================================

/// Stable error-channel codes.
///
/// 1xxx are connection errors, 2xxx session errors, 3xxx mission errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    DuplicateClient,
    SwitchedClient,
    RateLimitExceeded,
    InvalidMessage,
    MessageTooLarge,
    SessionNotFound,
    SessionConflictingState,
    SessionUnauthorized,
    SessionNotJoined,
    SessionAlreadyJoined,
    SessionBanned,
    SessionFull,
    MemberNotFound,
    MemberNotKickable,
    RoleNotPermitted,
    ForceNotFound,
    NodeNotFound,
    NodeNotOpenable,
    NodeNotRevealed,
    NodeBlocked,
    NodeNotExecutable,
    NodeAlreadyExecuting,
    ActionNotFound,
    ActionInsufficientResources,
    ActionOutcomesExhausted,
    ServerError,
}

impl ErrorCode {
    /// Numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Unauthenticated => 1001,
            Self::DuplicateClient => 1002,
            Self::SwitchedClient => 1003,
            Self::RateLimitExceeded => 1004,
            Self::InvalidMessage => 1005,
            Self::MessageTooLarge => 1006,
            Self::SessionNotFound => 2001,
            Self::SessionConflictingState => 2002,
            Self::SessionUnauthorized => 2003,
            Self::SessionNotJoined => 2004,
            Self::SessionAlreadyJoined => 2005,
            Self::SessionBanned => 2006,
            Self::SessionFull => 2007,
            Self::MemberNotFound => 2008,
            Self::MemberNotKickable => 2009,
            Self::RoleNotPermitted => 2010,
            Self::ForceNotFound => 3001,
            Self::NodeNotFound => 3002,
            Self::NodeNotOpenable => 3003,
            Self::NodeNotRevealed => 3004,
            Self::NodeBlocked => 3005,
            Self::NodeNotExecutable => 3006,
            Self::NodeAlreadyExecuting => 3007,
            Self::ActionNotFound => 3008,
            Self::ActionInsufficientResources => 3009,
            Self::ActionOutcomesExhausted => 3010,
            Self::ServerError => 5000,
        }
    }

    /// Kebab-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::DuplicateClient => "duplicate-client",
            Self::SwitchedClient => "switched-client",
            Self::RateLimitExceeded => "rate-limit-exceeded",
            Self::InvalidMessage => "invalid-message",
            Self::MessageTooLarge => "message-too-large",
            Self::SessionNotFound => "session-not-found",
            Self::SessionConflictingState => "session-conflicting-state",
            Self::SessionUnauthorized => "session-unauthorized",
            Self::SessionNotJoined => "session-not-joined",
            Self::SessionAlreadyJoined => "session-already-joined",
            Self::SessionBanned => "session-banned",
            Self::SessionFull => "session-full",
            Self::MemberNotFound => "member-not-found",
            Self::MemberNotKickable => "member-not-kickable",
            Self::RoleNotPermitted => "role-not-permitted",
            Self::ForceNotFound => "force-not-found",
            Self::NodeNotFound => "node-not-found",
            Self::NodeNotOpenable => "node-not-openable",
            Self::NodeNotRevealed => "node-not-revealed",
            Self::NodeBlocked => "node-blocked",
            Self::NodeNotExecutable => "node-not-executable",
            Self::NodeAlreadyExecuting => "node-already-executing",
            Self::ActionNotFound => "action-not-found",
            Self::ActionInsufficientResources => "action-insufficient-resources",
            Self::ActionOutcomesExhausted => "action-outcomes-exhausted",
            Self::ServerError => "server-error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Body of an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub name: ErrorCode,
    pub message: String,
}

impl ErrorPayload {
    /// Builds a payload for `code`.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            name: code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Client Messages
// ============================================================================

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientMessage {
    RequestJoinSession { session_id: String, role: Role },
    RequestQuitSession,
    RequestStartSession,
    RequestEndSession,
    RequestResetSession,
    RequestOpenNode { node_id: String },
    RequestExecuteAction {
        node_id: String,
        action_id: String,
        #[serde(default)]
        cheats: ExecutionCheats,
    },
    RequestSendOutput {
        force_id: String,
        #[serde(default)]
        prefix: Option<String>,
        message: String,
    },
    RequestBlockNode { node_id: String, blocked: bool },
    RequestKick { member_id: String },
    RequestBan { member_id: String },
    RequestAssignForce {
        member_id: String,
        #[serde(default)]
        force_id: Option<String>,
    },
    RequestAssignRole { member_id: String, role: Role },
    RequestUpdateSessionConfig(SessionConfigUpdate),
    RequestCurrentSession,
}

impl ClientMessage {
    /// Wire method name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::RequestJoinSession { .. } => "request-join-session",
            Self::RequestQuitSession => "request-quit-session",
            Self::RequestStartSession => "request-start-session",
            Self::RequestEndSession => "request-end-session",
            Self::RequestResetSession => "request-reset-session",
            Self::RequestOpenNode { .. } => "request-open-node",
            Self::RequestExecuteAction { .. } => "request-execute-action",
            Self::RequestSendOutput { .. } => "request-send-output",
            Self::RequestBlockNode { .. } => "request-block-node",
            Self::RequestKick { .. } => "request-kick",
            Self::RequestBan { .. } => "request-ban",
            Self::RequestAssignForce { .. } => "request-assign-force",
            Self::RequestAssignRole { .. } => "request-assign-role",
            Self::RequestUpdateSessionConfig(_) => "request-update-session-config",
            Self::RequestCurrentSession => "request-current-session",
        }
    }
}

/// A parsed client frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub request_id: Option<String>,
    pub message: ClientMessage,
}

/// Parses one client text frame.
///
/// # Errors
///
/// Returns [`TransportError::Json`] for invalid JSON or an unknown method or
/// payload, and [`TransportError::Protocol`] when the frame is not an object
/// or `requestId` is not a string.
pub fn parse_client_message(text: &str) -> Result<Inbound, TransportError> {
    let mut value: Value = serde_json::from_str(text)?;
    let Some(object) = value.as_object_mut() else {
        return Err(TransportError::Protocol("frame must be a JSON object".into()));
    };
    let request_id = match object.remove("requestId") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(_) => return Err(TransportError::Protocol("requestId must be a string".into())),
    };
    let message = serde_json::from_value(value)?;
    Ok(Inbound {
        request_id,
        message,
    })
}

// ============================================================================
// Server Messages
// ============================================================================

/// A mutation applied by an effect or an operator, as broadcast in
/// `modifier-enacted`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum Enactment {
    BlockStatus {
        force_id: String,
        node_id: String,
        blocked: bool,
        /// Every node whose flag changed, as the receiver may see it.
        nodes: Vec<NodeView>,
    },
    OpenStatus {
        force_id: String,
        node_id: String,
        opened: bool,
        nodes: Vec<NodeView>,
    },
    Modifier {
        #[serde(flatten)]
        modifier: Modifier,
        nodes: Vec<NodeView>,
        resources_remaining: u64,
    },
    FileAccess {
        file_id: String,
        force_id: String,
        granted: bool,
    },
}

/// An event sent by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The connection was replaced by a newer one for the same user.
    ConnectionSwitched,
    SessionJoined {
        member_id: String,
        session: Box<SessionView>,
    },
    SessionQuit,
    CurrentSession { session: Option<Box<SessionView>> },
    SessionStarting,
    SessionStarted { mission: Box<MissionView> },
    SessionEnding,
    SessionEnded,
    SessionResetting,
    SessionReset { mission: Box<MissionView> },
    SessionMembersUpdated { members: Vec<MemberView> },
    SessionDestroyed,
    SessionConfigUpdated { config: SessionConfig },
    Kicked,
    Banned,
    /// Removed at start for lacking any force visibility.
    Dismissed,
    NodeOpened {
        node: NodeView,
        /// Children revealed by the opening.
        revealed_nodes: Vec<NodeView>,
    },
    ActionExecutionInitiated { execution: Execution },
    ActionExecutionCompleted {
        outcome: RealizedOutcome,
        node: NodeView,
        revealed_nodes: Vec<NodeView>,
        resources_remaining: u64,
    },
    SendOutput { output: Output },
    ModifierEnacted(Enactment),
    Error(ErrorPayload),
}

/// Correlation attached to frames sent to a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub request_id: String,
    pub requester_id: String,
    pub fulfilled: bool,
}

impl RequestContext {
    /// Context for a request that succeeded.
    #[must_use]
    pub fn fulfilled(request_id: &str, requester_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            requester_id: requester_id.to_string(),
            fulfilled: true,
        }
    }

    /// Context for a request that was rejected.
    #[must_use]
    pub fn rejected(request_id: &str, requester_id: &str) -> Self {
        Self {
            fulfilled: false,
            ..Self::fulfilled(request_id, requester_id)
        }
    }
}

/// A server message plus its optional request correlation.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    #[serde(flatten)]
    pub message: &'a ServerMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestContext>,
}

impl<'a> OutboundFrame<'a> {
    /// Frame without correlation.
    #[must_use]
    pub const fn new(message: &'a ServerMessage) -> Self {
        Self {
            message,
            request: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_id() {
        let inbound = parse_client_message(
            r#"{"method":"request-open-node","data":{"nodeId":"n1"},"requestId":"r1"}"#,
        )
        .unwrap();
        assert_eq!(inbound.request_id.as_deref(), Some("r1"));
        assert_eq!(
            inbound.message,
            ClientMessage::RequestOpenNode {
                node_id: "n1".into()
            }
        );
        assert_eq!(inbound.message.method(), "request-open-node");
    }

    #[test]
    fn parses_unit_request_without_data() {
        let inbound = parse_client_message(r#"{"method":"request-start-session"}"#).unwrap();
        assert_eq!(inbound.message, ClientMessage::RequestStartSession);
        assert_eq!(inbound.request_id, None);
    }

    #[test]
    fn execute_cheats_default_off() {
        let inbound = parse_client_message(
            r#"{"method":"request-execute-action","data":{"nodeId":"n","actionId":"a"}}"#,
        )
        .unwrap();
        let ClientMessage::RequestExecuteAction { cheats, .. } = inbound.message else {
            panic!("wrong variant");
        };
        assert!(!cheats.any());
    }

    #[test]
    fn config_update_is_newtype_payload() {
        let inbound = parse_client_message(
            r#"{"method":"request-update-session-config","data":{"effectsEnabled":false}}"#,
        )
        .unwrap();
        let ClientMessage::RequestUpdateSessionConfig(update) = inbound.message else {
            panic!("wrong variant");
        };
        assert_eq!(update.effects_enabled, Some(false));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            parse_client_message("[1,2]"),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            parse_client_message(r#"{"method":"request-open-node","requestId":7}"#),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            parse_client_message(r#"{"method":"drop-tables"}"#),
            Err(TransportError::Json(_))
        ));
        assert!(parse_client_message("not json").is_err());
    }

    #[test]
    fn frame_flattens_message_and_request() {
        let message = ServerMessage::SessionConfigUpdated {
            config: SessionConfig::default(),
        };
        let frame = OutboundFrame {
            message: &message,
            request: Some(RequestContext::fulfilled("r9", "u1")),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["method"], "session-config-updated");
        assert_eq!(json["data"]["config"]["effectsEnabled"], true);
        assert_eq!(
            json["request"],
            json!({"requestId": "r9", "requesterId": "u1", "fulfilled": true})
        );
    }

    #[test]
    fn unit_server_message_has_no_request_key() {
        let json = serde_json::to_value(OutboundFrame::new(&ServerMessage::Kicked)).unwrap();
        assert_eq!(json["method"], "kicked");
        assert!(json.get("request").is_none());
    }

    #[test]
    fn modifier_enactment_is_flat() {
        let message = ServerMessage::ModifierEnacted(Enactment::Modifier {
            modifier: Modifier {
                kind: "success-chance",
                force_id: "red".into(),
                node_id: Some("n".into()),
                action_id: None,
                delta: 0.25,
            },
            nodes: vec![],
            resources_remaining: 4,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["method"], "modifier-enacted");
        assert_eq!(json["data"]["type"], "modifier");
        assert_eq!(json["data"]["kind"], "success-chance");
        assert_eq!(json["data"]["forceId"], "red");
        assert_eq!(json["data"]["resourcesRemaining"], 4);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ErrorCode::Unauthenticated.code(), 1001);
        assert_eq!(ErrorCode::RateLimitExceeded.code(), 1004);
        assert_eq!(ErrorCode::SessionConflictingState.code(), 2002);
        assert_eq!(ErrorCode::ActionOutcomesExhausted.code(), 3010);
        assert_eq!(
            serde_json::to_value(ErrorCode::ActionInsufficientResources).unwrap(),
            ErrorCode::ActionInsufficientResources.name()
        );
    }
}
