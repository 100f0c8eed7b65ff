//! HTTP and WebSocket surface.
//!
//! `GET /connect` upgrades to the client protocol socket. The identity of
//! the caller is handed over by the upstream auth proxy as query parameters.
//! A small JSON API sits next to it for logins, mission listing and session
//! launch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::{CLOSE_INVALID, CLOSE_UNAUTHENTICATED, ClientConnection, Outbound};
use super::protocol::{ErrorCode, ErrorPayload};
use crate::error::TransportError;
use crate::server::AppState;
use crate::session::SessionConfig;
use crate::session::member::{AccessLevel, User};

/// Normal closure code.
const CLOSE_NORMAL: u16 = 1000;

// ============================================================================
// Binding
// ============================================================================

/// Normalizes a bind address: `":8080"` and `"8080"` bind all interfaces.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the result is not a valid
/// socket address.
pub fn parse_bind_addr(input: &str) -> Result<String, TransportError> {
    let addr = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else if input.parse::<u16>().is_ok() {
        format!("0.0.0.0:{input}")
    } else {
        input.to_string()
    };
    addr.parse::<SocketAddr>().map_err(|e| {
        TransportError::ConnectionFailed(format!("invalid bind address \"{input}\": {e}"))
    })?;
    Ok(addr)
}

/// Binds the listener for [`serve`].
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the address is invalid
/// or cannot be bound.
pub async fn bind(input: &str) -> Result<(TcpListener, SocketAddr), TransportError> {
    let addr = parse_bind_addr(input)?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("bind failed: {e}")))?;
    let bound = listener
        .local_addr()
        .map_err(|e| TransportError::ConnectionFailed(format!("local_addr failed: {e}")))?;
    Ok((listener, bound))
}

/// Serves the router until `cancel` fires.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, cancel: CancellationToken) -> Result<(), TransportError> {
    let service = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    debug!("HTTP listener shut down");
    Ok(())
}

// ============================================================================
// Router
// ============================================================================

/// Builds the router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_message_size);
    Router::new()
        .route("/health", get(handle_health))
        .route("/connect", get(handle_connect))
        .route("/api/login", post(handle_login))
        .route("/api/missions", get(handle_list_missions))
        .route(
            "/api/sessions",
            get(handle_list_sessions).post(handle_launch_session),
        )
        .layer(body_limit)
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "connections": state.gateway.logins().connected(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(flatten)]
    user: User,
    #[serde(default)]
    evict: bool,
}

async fn handle_login(State(state): State<Arc<AppState>>, Json(request): Json<LoginRequest>) -> Response {
    match state.gateway.login(request.user, request.evict).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(ErrorPayload::new(e.code(), e.to_string())),
        )
            .into_response(),
    }
}

async fn handle_list_missions(State(state): State<Arc<AppState>>) -> Response {
    Json(state.missions.summaries()).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    user_id: Option<String>,
}

async fn handle_list_sessions(State(state): State<Arc<AppState>>, Query(query): Query<ListQuery>) -> Response {
    Json(state.sessions.list(query.user_id.as_deref())).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchRequest {
    mission_id: String,
    owner_id: String,
    #[serde(default)]
    config: Option<SessionConfig>,
}

async fn handle_launch_session(State(state): State<Arc<AppState>>, Json(request): Json<LaunchRequest>) -> Response {
    let mission = match state.missions.instantiate(&request.mission_id) {
        Ok(mission) => mission,
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };
    let config = request
        .config
        .unwrap_or_else(|| state.session_defaults.clone());
    let handle = state.sessions.launch(mission, &request.owner_id, config);
    (StatusCode::CREATED, Json(handle.summary())).into_response()
}

// ============================================================================
// WebSocket
// ============================================================================

const fn default_takeover() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectQuery {
    user_id: Option<String>,
    username: Option<String>,
    #[serde(default)]
    access: AccessLevel,
    #[serde(default = "default_takeover")]
    takeover: bool,
}

impl ConnectQuery {
    fn user(&self) -> Option<User> {
        let id = self.user_id.as_deref().filter(|id| !id.is_empty())?;
        let username = self.username.as_deref().unwrap_or(id);
        Some(User::new(id, username, self.access))
    }
}

async fn handle_connect(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(%addr, user_id = ?query.user_id, "websocket upgrade requested");
    ws.on_upgrade(move |socket| serve_socket(state, query, socket))
}

async fn serve_socket(state: Arc<AppState>, query: ConnectQuery, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let user = query.user();
    let (connection, outbound) = ClientConnection::new(user.as_ref().map_or("", |u| u.id.as_str()));
    let writer = tokio::spawn(write_frames(sink, outbound));

    let Some(user) = user else {
        connection.send_error(ErrorCode::Unauthenticated, "missing user identity", None);
        connection.close(CLOSE_UNAUTHENTICATED, "unauthenticated");
        let _ = writer.await;
        return;
    };
    if state
        .gateway
        .connect(user, query.takeover, &connection)
        .await
        .is_err()
    {
        let _ = writer.await;
        return;
    }
    info!(user_id = %connection.user_id(), connection_id = %connection.id(), "client connected");

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => state.gateway.handle_text(&connection, text.as_str()).await,
            Message::Binary(_) => {
                connection.send_error(ErrorCode::InvalidMessage, "binary frames are not supported", None);
                connection.close(CLOSE_INVALID, "invalid message");
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.gateway.disconnect(&connection).await;
    connection.close(CLOSE_NORMAL, "bye");
    let _ = writer.await;
    info!(user_id = %connection.user_id(), connection_id = %connection.id(), "client disconnected");
}

/// Drains queued frames onto the socket until a close frame or failure.
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut outbound: UnboundedReceiver<Outbound>) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
