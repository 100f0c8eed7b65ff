//! Connection layer.
//!
//! Clients speak JSON over a WebSocket: every frame is an object with a
//! `method` discriminator, a typed `data` payload and an optional
//! `requestId` echoed back for correlation.
//!
//! - [`protocol`]: wire messages and error codes
//! - [`connection`]: the per-socket sending handle
//! - [`login`]: one login, one connection and one session per user
//! - [`rate_limit`]: per-user sliding-window throttle
//! - [`gateway`]: routes frames from connections into sessions
//! - [`http`]: axum router, socket loop and the small JSON API

pub mod connection;
pub mod gateway;
pub mod http;
pub mod login;
pub mod protocol;
pub mod rate_limit;

pub use connection::{ClientConnection, Outbound};
pub use gateway::Gateway;
pub use login::{Login, LoginRegistry};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use rate_limit::{RateLimitConfig, RateLimiter};

/// Default maximum inbound frame size in bytes (1 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
