//! Server runtime.
//!
//! [`AppState`] wires the effect environments, login registry, session
//! registry and gateway together. [`Server`] binds the listener, serves
//! until cancelled, then shuts every session down.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SortieConfig;
use crate::effects::webhook::WebhookEnvironment;
use crate::effects::{EffectEngine, EnvironmentRegistry};
use crate::error::SortieError;
use crate::mission::MissionLibrary;
use crate::observability::events::{Event, EventEmitter};
use crate::session::{SessionConfig, SessionDeps, SessionRegistry};
use crate::transport::http;
use crate::transport::{Gateway, LoginRegistry, RateLimiter};

/// Shared state behind every HTTP handler and socket.
#[derive(Debug)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionRegistry>,
    pub missions: Arc<MissionLibrary>,
    /// Config for sessions launched without one.
    pub session_defaults: SessionConfig,
    pub max_message_size: usize,
}

impl AppState {
    /// Builds the runtime from a loaded configuration.
    ///
    /// Every configured webhook environment is registered next to the
    /// built-in `internal` environment.
    ///
    /// # Errors
    ///
    /// Returns an effect error if a webhook environment cannot be built.
    pub fn new(
        config: &SortieConfig,
        missions: MissionLibrary,
        events: Arc<EventEmitter>,
    ) -> Result<Arc<Self>, SortieError> {
        let environments = EnvironmentRegistry::with_builtin();
        for env in &config.environments {
            environments.register(Arc::new(WebhookEnvironment::new(env.clone())?));
        }

        let deps = SessionDeps {
            effects: EffectEngine::new(Arc::new(environments)),
            logins: Arc::new(LoginRegistry::new()),
            events,
        };
        let sessions = SessionRegistry::new(deps);
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&sessions),
            RateLimiter::new(config.rate_limit),
            config.server.max_message_size,
        ));

        Ok(Arc::new(Self {
            gateway,
            sessions,
            missions: Arc::new(missions),
            session_defaults: config.sessions.clone(),
            max_message_size: config.server.max_message_size,
        }))
    }
}

/// A bound server, ready to [`run`](Server::run).
#[derive(Debug)]
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
    events: Arc<EventEmitter>,
    cancel: CancellationToken,
}

impl Server {
    /// Binds `bind` for `state`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the address is invalid or taken.
    pub async fn bind(
        state: Arc<AppState>,
        bind: &str,
        events: Arc<EventEmitter>,
        cancel: CancellationToken,
    ) -> Result<Self, SortieError> {
        let (listener, local_addr) = http::bind(bind).await?;
        Ok(Self {
            state,
            listener,
            local_addr,
            events,
            cancel,
        })
    }

    /// Address actually bound; differs from the request for port 0.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until the cancellation token fires, then ends every session.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the accept loop fails.
    pub async fn run(self) -> Result<(), SortieError> {
        let Self {
            state,
            listener,
            local_addr,
            events,
            cancel,
        } = self;

        info!(addr = %local_addr, missions = state.missions.len(), "server listening");
        events.emit(Event::ServerStarted {
            timestamp: Utc::now(),
            bind: local_addr.to_string(),
            missions: state.missions.len(),
        });

        let result = http::serve(listener, Arc::clone(&state), cancel).await;
        if let Err(e) = &result {
            warn!(error = %e, "accept loop failed");
        }

        state.sessions.shutdown_all("server shutting down").await;

        events.emit(Event::ServerStopped {
            timestamp: Utc::now(),
            reason: match &result {
                Ok(()) => "shutdown".to_string(),
                Err(e) => format!("error: {e}"),
            },
        });
        info!("server stopped");

        result.map_err(Into::into)
    }
}
