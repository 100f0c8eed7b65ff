//! Session actor.
//!
//! Each session runs on its own task. The task owns the [`Session`] and
//! multiplexes two sources: commands from the command channel and the
//! earliest pending completion timer. Handling one to completion before the
//! next keeps every session-level invariant free of locks.

use std::sync::Weak;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span};

use super::member::{Role, User};
use super::registry::SessionRegistry;
use super::{Session, SessionSummary};
use crate::error::RequestError;
use crate::transport::connection::ClientConnection;
use crate::transport::protocol::ClientMessage;

/// Commands accepted by a session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Join the session; the result is sent back on `reply`.
    Join {
        user: User,
        role: Role,
        connection: ClientConnection,
        request_id: Option<String>,
        reply: oneshot::Sender<Result<(), RequestError>>,
    },
    /// A request from a joined user.
    Request {
        user_id: String,
        request_id: Option<String>,
        message: ClientMessage,
    },
    /// The user's connection closed.
    Disconnect {
        user_id: String,
        connection_id: String,
    },
    /// The user's login or connection was taken over.
    Evict { user_id: String },
    /// Tear the session down.
    Shutdown { reason: String },
}

/// Spawns the task driving `session`.
pub(crate) fn spawn(
    session: Session,
    commands: mpsc::Receiver<SessionCommand>,
    summary: watch::Sender<SessionSummary>,
    registry: Weak<SessionRegistry>,
) -> JoinHandle<()> {
    let span = info_span!("session", session_id = %session.id());
    tokio::spawn(run(session, commands, summary, registry).instrument(span))
}

async fn run(
    mut session: Session,
    mut commands: mpsc::Receiver<SessionCommand>,
    summary: watch::Sender<SessionSummary>,
    registry: Weak<SessionRegistry>,
) {
    loop {
        let due = session.next_due();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handle(&mut session, command).await,
                None => session.shutdown("command channel closed").await,
            },
            () = sleep_until(due) => session.fire_due(Instant::now()).await,
        }
        summary.send_replace(session.summary());
        if session.is_destroyed() {
            break;
        }
    }

    debug!("session task exiting");
    if let Some(registry) = registry.upgrade() {
        registry.remove(session.id());
    }
}

async fn handle(session: &mut Session, command: SessionCommand) {
    match command {
        SessionCommand::Join {
            user,
            role,
            connection,
            request_id,
            reply,
        } => {
            let result = session.handle_join(user, role, connection, request_id);
            let _ = reply.send(result);
        }
        SessionCommand::Request {
            user_id,
            request_id,
            message,
        } => session.handle_request(&user_id, request_id, message).await,
        SessionCommand::Disconnect {
            user_id,
            connection_id,
        } => session.disconnect(&user_id, &connection_id),
        SessionCommand::Evict { user_id } => session.evict(&user_id),
        SessionCommand::Shutdown { reason } => session.shutdown(&reason).await,
    }
}

/// Sleeps until `due`, or forever without a pending timer.
async fn sleep_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
