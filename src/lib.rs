//! `sortie` - live multi-party exercise runtime.
//!
//! Missions define forces of nodes and actions. Sessions run a mission for
//! a group of members over WebSocket: executions complete on timers with
//! seeded outcomes, and scripted effects act on target environments.

pub mod cli;
pub mod config;
pub mod effects;
pub mod error;
pub mod execution;
pub mod mission;
pub mod observability;
pub mod server;
pub mod session;
pub mod transport;
