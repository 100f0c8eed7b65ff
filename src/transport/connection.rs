//! Client connection handle.
//!
//! A [`ClientConnection`] is the sending half of one client's socket. The
//! socket task owns the receiving half and writes each [`Outbound`] frame
//! to the wire, so sessions and registries never touch the socket itself.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::{ErrorCode, ErrorPayload, OutboundFrame, RequestContext, ServerMessage};

/// Close code sent to a connection replaced by a newer one.
pub const CLOSE_SWITCHED: u16 = 4001;
/// Close code sent when a duplicate connection or login is refused.
pub const CLOSE_DUPLICATE: u16 = 4002;
/// Close code sent when no identity was supplied.
pub const CLOSE_UNAUTHENTICATED: u16 = 4003;
/// Close code sent after a malformed frame.
pub const CLOSE_INVALID: u16 = 4004;

/// A frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON message.
    Text(String),
    /// Close the socket with a code and reason. Nothing is written after it.
    Close { code: u16, reason: String },
}

/// Cloneable sender bound to one client socket.
#[derive(Clone)]
pub struct ClientConnection {
    id: String,
    user_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    /// Creates a connection for `user_id` and the receiver its writer drains.
    #[must_use]
    pub fn new(user_id: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tx,
        };
        (conn, rx)
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// User the connection was opened for.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether the socket side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues a frame. Returns `false` if the socket is gone.
    pub fn send(&self, frame: &OutboundFrame<'_>) -> bool {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "failed to serialize frame");
                return false;
            }
        };
        if self.tx.send(Outbound::Text(text)).is_err() {
            debug!(connection_id = %self.id, "dropping frame for closed connection");
            return false;
        }
        true
    }

    /// Queues a message without request correlation.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        self.send(&OutboundFrame::new(message))
    }

    /// Queues an error reply.
    pub fn send_error(
        &self,
        code: ErrorCode,
        message: impl Into<String>,
        request: Option<RequestContext>,
    ) -> bool {
        let error = ServerMessage::Error(ErrorPayload::new(code, message));
        self.send(&OutboundFrame {
            message: &error,
            request,
        })
    }

    /// Queues a close frame.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }
}

impl PartialEq for ClientConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientConnection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_serializes_frames() {
        let (conn, mut rx) = ClientConnection::new("u1");
        assert!(conn.send_message(&ServerMessage::SessionStarting));
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["method"], "session-starting");
    }

    #[test]
    fn error_carries_request_context() {
        let (conn, mut rx) = ClientConnection::new("u1");
        conn.send_error(
            ErrorCode::NodeNotOpenable,
            "nope",
            Some(RequestContext::rejected("r-1", "u1")),
        );
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["method"], "error");
        assert_eq!(json["data"]["code"], 3003);
        assert_eq!(json["data"]["name"], "node-not-openable");
        assert_eq!(json["request"]["requestId"], "r-1");
        assert_eq!(json["request"]["fulfilled"], false);
    }

    #[test]
    fn closed_connection_reports_failure() {
        let (conn, rx) = ClientConnection::new("u1");
        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send_message(&ServerMessage::SessionStarting));
    }

    #[test]
    fn close_queues_close_frame() {
        let (conn, mut rx) = ClientConnection::new("u1");
        conn.close(CLOSE_SWITCHED, "switched");
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_SWITCHED,
                reason: "switched".into()
            }
        );
    }
}
