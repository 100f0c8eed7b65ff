//! Session state machine.
//!
//! A [`Session`] ties one live [`Mission`] to a roster of members and a
//! lifecycle state. It is owned by a single actor task (see [`actor`]), so
//! every handler runs to completion without interleaving: inbound requests
//! and execution-completion timers are serialized on the same loop.
//!
//! # Architecture
//!
//! - [`state`]: lifecycle states and allowed transitions
//! - [`member`]: roles, permissions, users and members
//! - [`config`]: per-session settings
//! - [`handlers`]: request handlers, one per client method
//! - [`actor`]: the task driving a session
//! - [`registry`]: process-wide lookup of running sessions

pub mod actor;
pub mod config;
pub mod handlers;
pub mod member;
pub mod registry;
pub mod state;

pub use actor::SessionCommand;
pub use config::{Accessibility, SessionConfig, SessionConfigUpdate};
pub use member::{AccessLevel, Member, MemberView, Permission, Role, User};
pub use registry::{SessionHandle, SessionRegistry};
pub use state::SessionState;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::effects::{EffectBatch, EffectEngine, EffectSource, Enacted, ScopedStores};
use crate::error::RequestError;
use crate::execution::{Execution, Scheduler, TimerId};
use crate::mission::outcome::RealizedOutcome;
use crate::mission::view::NodeView;
use crate::mission::{Effect, EffectTrigger, Mission, MissionDocument, MissionView, VisibilityScope};
use crate::observability::{Event, EventEmitter, metrics};
use crate::transport::login::LoginRegistry;
use crate::transport::protocol::{Enactment, OutboundFrame, RequestContext, ServerMessage};

// ============================================================================
// Shared collaborators and views
// ============================================================================

/// Collaborators every session borrows from the process.
#[derive(Debug, Clone)]
pub struct SessionDeps {
    pub effects: EffectEngine,
    pub logins: Arc<LoginRegistry>,
    pub events: Arc<EventEmitter>,
}

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub mission_id: String,
    pub mission_name: String,
    pub state: SessionState,
    pub accessibility: Accessibility,
    pub owner_id: String,
    pub member_count: usize,
}

/// A session as seen by one member.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub state: SessionState,
    pub config: SessionConfig,
    pub members: Vec<MemberView>,
    pub mission: MissionView,
}

/// Timer key of a pending execution completion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Completion {
    pub force_id: String,
    pub node_id: String,
    pub execution_id: String,
}

/// Requester of the message being handled.
#[derive(Debug, Clone)]
struct Origin {
    user_id: String,
    request_id: Option<String>,
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Session
// ============================================================================

/// One live run of a mission.
pub struct Session {
    id: String,
    owner_id: String,
    config: SessionConfig,
    state: SessionState,
    mission: Mission,
    /// The mission as launched; reset rebuilds from it.
    document: MissionDocument,
    /// Members keyed by user id, in join order.
    members: IndexMap<String, Member>,
    banned: HashSet<String>,
    stores: ScopedStores,
    scheduler: Scheduler<Completion>,
    /// Pending timers keyed by execution id.
    timers: HashMap<String, TimerId>,
    deps: SessionDeps,
    origin: Option<Origin>,
    destroyed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mission", &self.mission.name)
            .field("members", &self.members.len())
            .field("pending_timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates an unstarted session over `mission`.
    #[must_use]
    pub fn new(mission: Mission, owner_id: &str, config: SessionConfig, deps: SessionDeps) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            config,
            state: SessionState::Unstarted,
            document: mission.to_document(),
            mission,
            members: IndexMap::new(),
            banned: HashSet::new(),
            stores: ScopedStores::new(),
            scheduler: Scheduler::new(),
            timers: HashMap::new(),
            deps,
            origin: None,
            destroyed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn mission(&self) -> &Mission {
        &self.mission
    }

    /// Member joined as `user_id`.
    #[must_use]
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.get(user_id)
    }

    /// Members in join order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Whether `user_id` is on the ban list.
    #[must_use]
    pub fn is_banned(&self, user_id: &str) -> bool {
        self.banned.contains(user_id)
    }

    /// Whether the session has been torn down.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Number of pending completion timers.
    #[must_use]
    pub fn pending_completions(&self) -> usize {
        self.timers.len()
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.config.name.is_empty() {
            &self.mission.name
        } else {
            &self.config.name
        }
    }

    /// Listing entry.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name().to_string(),
            mission_id: self.mission.id.clone(),
            mission_name: self.mission.name.clone(),
            state: self.state,
            accessibility: self.config.accessibility,
            owner_id: self.owner_id.clone(),
            member_count: self.members.len(),
        }
    }

    /// The session as `member` may see it.
    #[must_use]
    pub fn view_for(&self, member: &Member) -> SessionView {
        SessionView {
            id: self.id.clone(),
            name: self.name().to_string(),
            owner_id: self.owner_id.clone(),
            state: self.state,
            config: self.config.clone(),
            members: self.member_views(),
            mission: self.mission.view(&member.visibility_scope()),
        }
    }

    fn member_views(&self) -> Vec<MemberView> {
        self.members.values().map(Member::view).collect()
    }

    fn set_state(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(session_id = %self.id, from = %self.state, to = %next, "unexpected state transition");
        }
        info!(session_id = %self.id, from = %self.state, to = %next, "session state changed");
        self.deps.events.emit(Event::SessionStateChanged {
            timestamp: Utc::now(),
            session_id: self.id.clone(),
            from: self.state.to_string(),
            to: next.to_string(),
        });
        self.state = next;
    }

    fn require_state(&self, allowed: &[SessionState]) -> Result<(), RequestError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RequestError::ConflictingState(self.state))
        }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    fn request_context(&self, user_id: &str) -> Option<RequestContext> {
        let origin = self.origin.as_ref().filter(|o| o.user_id == user_id)?;
        let request_id = origin.request_id.as_deref()?;
        Some(RequestContext::fulfilled(request_id, user_id))
    }

    fn send_to(&self, member: &Member, message: &ServerMessage) {
        member.connection.send(&OutboundFrame {
            message,
            request: self.request_context(&member.user.id),
        });
    }

    fn broadcast(&self, message: &ServerMessage) {
        for member in self.members.values() {
            self.send_to(member, message);
        }
    }

    /// Sends each member the message `build` returns for its scope, if any.
    fn broadcast_scoped(&self, build: impl Fn(&VisibilityScope) -> Option<ServerMessage>) {
        for member in self.members.values() {
            if let Some(message) = build(&member.visibility_scope()) {
                self.send_to(member, &message);
            }
        }
    }

    fn broadcast_members(&self) {
        self.broadcast(&ServerMessage::SessionMembersUpdated {
            members: self.member_views(),
        });
    }

    /// Sends each member its own mission view.
    fn broadcast_mission(&self, wrap: impl Fn(Box<MissionView>) -> ServerMessage) {
        self.broadcast_scoped(|scope| Some(wrap(Box::new(self.mission.view(scope)))));
    }

    /// Views of `node_ids` in `force_id` that `scope` may see.
    fn visible_nodes<'a>(
        &self,
        scope: &VisibilityScope,
        force_id: &str,
        node_ids: impl IntoIterator<Item = &'a String>,
    ) -> Vec<NodeView> {
        let Some(force) = self.mission.force(force_id) else {
            return Vec::new();
        };
        node_ids
            .into_iter()
            .filter(|id| scope.can_see_node(&self.mission, force_id, id))
            .filter_map(|id| force.node(id))
            .map(|node| NodeView::build(force, node))
            .collect()
    }

    /// Children of an open node, which its opening revealed.
    fn revealed_children(&self, force_id: &str, node_id: &str) -> Vec<String> {
        self.mission
            .force(force_id)
            .and_then(|f| f.node(node_id))
            .filter(|n| n.is_opened())
            .map(|n| n.child_ids().to_vec())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    /// Removes a member and releases its login binding.
    fn remove_member(&mut self, user_id: &str) -> Option<Member> {
        let member = self.members.shift_remove(user_id)?;
        self.deps.logins.unbind_session(user_id, &self.id);
        Some(member)
    }

    /// Drops a member whose connection went away. A newer connection of the
    /// same user is left alone.
    pub fn disconnect(&mut self, user_id: &str, connection_id: &str) {
        let current = self
            .members
            .get(user_id)
            .is_some_and(|m| m.connection.id() == connection_id);
        if current && self.remove_member(user_id).is_some() {
            debug!(session_id = %self.id, user_id, "member disconnected");
            self.broadcast_members();
        }
    }

    /// Drops a member whose login was taken over elsewhere.
    pub fn evict(&mut self, user_id: &str) {
        if self.remove_member(user_id).is_some() {
            debug!(session_id = %self.id, user_id, "member evicted");
            self.broadcast_members();
        }
    }

    // ------------------------------------------------------------------
    // Timers and executions
    // ------------------------------------------------------------------

    /// Earliest pending completion.
    pub fn next_due(&mut self) -> Option<Instant> {
        self.scheduler.next_due()
    }

    fn schedule_completion(&mut self, execution: &Execution, now_ms: i64) {
        let due = Instant::now() + Duration::from_millis(execution.remaining_ms(now_ms));
        let timer = self.scheduler.schedule(
            due,
            Completion {
                force_id: execution.force_id.clone(),
                node_id: execution.node_id.clone(),
                execution_id: execution.id.clone(),
            },
        );
        self.timers.insert(execution.id.clone(), timer);
    }

    fn cancel_completion(&mut self, execution_id: &str) {
        if let Some(timer) = self.timers.remove(execution_id) {
            self.scheduler.cancel(timer);
        }
    }

    /// Completes every execution due at or before `now`.
    pub async fn fire_due(&mut self, now: Instant) {
        for completion in self.scheduler.pop_due(now) {
            self.timers.remove(&completion.execution_id);
            self.complete_execution(completion).await;
        }
    }

    async fn complete_execution(&mut self, completion: Completion) {
        let Completion {
            force_id,
            node_id,
            execution_id,
        } = completion;
        let now = now_ms();
        let Some(outcome) = self
            .mission
            .force_mut(&force_id)
            .and_then(|f| f.complete_execution(&node_id, &execution_id, now))
        else {
            debug!(session_id = %self.id, execution_id, "stale completion ignored");
            return;
        };
        self.record_outcome(&outcome);
        self.announce_completion(&force_id, &outcome);

        let trigger = if outcome.successful {
            EffectTrigger::ExecutionSuccess
        } else {
            EffectTrigger::ExecutionFailure
        };
        let effects = self.action_effects(&force_id, &node_id, &outcome.action_id);
        let source = EffectSource::execution(&force_id, &node_id, &outcome.action_id);
        self.run_effects(&effects, trigger, &source).await;
    }

    fn action_effects(&self, force_id: &str, node_id: &str, action_id: &str) -> Vec<Effect> {
        self.mission
            .force(force_id)
            .and_then(|f| f.node(node_id))
            .and_then(|n| n.actions.get(action_id))
            .map(|a| a.effects.clone())
            .unwrap_or_default()
    }

    fn record_outcome(&self, outcome: &RealizedOutcome) {
        metrics::record_execution(outcome.successful, outcome.aborted);
        self.deps.events.emit(Event::ExecutionCompleted {
            timestamp: Utc::now(),
            session_id: self.id.clone(),
            node_id: outcome.node_id.clone(),
            action_id: outcome.action_id.clone(),
            successful: outcome.successful,
            aborted: outcome.aborted,
        });
    }

    fn announce_completion(&self, force_id: &str, outcome: &RealizedOutcome) {
        let Some(force) = self.mission.force(force_id) else {
            return;
        };
        let Some(node) = force.node(&outcome.node_id) else {
            return;
        };
        let children = self.revealed_children(force_id, &outcome.node_id);
        self.broadcast_scoped(|scope| {
            scope
                .can_see_node(&self.mission, force_id, &node.id)
                .then(|| ServerMessage::ActionExecutionCompleted {
                    outcome: outcome.clone(),
                    node: NodeView::build(force, node),
                    revealed_nodes: self.visible_nodes(scope, force_id, &children),
                    resources_remaining: force.resources_remaining,
                })
        });
    }

    /// Cancels the timers of aborted executions and tells their audience.
    fn announce_aborted(&mut self, aborted: Vec<(Execution, RealizedOutcome)>) {
        for (execution, outcome) in aborted {
            self.cancel_completion(&execution.id);
            self.record_outcome(&outcome);
            self.announce_completion(&execution.force_id, &outcome);
        }
    }

    /// Aborts every in-flight execution and drops every timer.
    fn abort_all(&mut self) {
        let aborted = self.mission.abort_all(now_ms());
        if !aborted.is_empty() {
            info!(session_id = %self.id, count = aborted.len(), "aborting in-flight executions");
        }
        self.announce_aborted(aborted);
        self.scheduler.clear();
        self.timers.clear();
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Runs matching effects and announces whatever they changed.
    async fn run_effects(&mut self, effects: &[Effect], trigger: EffectTrigger, source: &EffectSource) {
        if effects.is_empty() {
            return;
        }
        let report = self
            .deps
            .effects
            .apply(
                &mut self.mission,
                EffectBatch {
                    session_id: &self.id,
                    effects,
                    trigger,
                    source,
                    session_stores: &self.stores,
                    enabled: self.config.effects_enabled,
                    now_ms: now_ms(),
                },
            )
            .await;
        if report.failed > 0 {
            self.deps.events.emit(Event::EffectFailed {
                timestamp: Utc::now(),
                session_id: self.id.clone(),
                trigger: trigger.to_string(),
                count: report.failed,
            });
        }
        self.announce_enacted(report.enacted);
    }

    async fn run_session_effects(&mut self, trigger: EffectTrigger) {
        let effects = self.mission.effects.clone();
        self.run_effects(&effects, trigger, &EffectSource::session())
            .await;
    }

    /// Broadcasts applied mutations to the members who can see them.
    fn announce_enacted(&mut self, enacted: Vec<Enacted>) {
        for change in enacted {
            match change {
                Enacted::Output(output) => {
                    let message = ServerMessage::SendOutput {
                        output: output.clone(),
                    };
                    self.broadcast_scoped(|scope| {
                        scope
                            .can_see_force(&output.force_id)
                            .then(|| message.clone())
                    });
                }
                Enacted::Block {
                    force_id,
                    node_id,
                    blocked,
                    changed,
                    aborted,
                } => {
                    self.announce_aborted(aborted);
                    self.broadcast_scoped(|scope| {
                        scope.can_see_force(&force_id).then(|| {
                            ServerMessage::ModifierEnacted(Enactment::BlockStatus {
                                force_id: force_id.clone(),
                                node_id: node_id.clone(),
                                blocked,
                                nodes: self.visible_nodes(scope, &force_id, &changed),
                            })
                        })
                    });
                }
                Enacted::Open {
                    force_id,
                    node_id,
                    opened,
                } => {
                    let mut affected = vec![node_id.clone()];
                    affected.extend(
                        self.mission
                            .force(&force_id)
                            .and_then(|f| f.node(&node_id))
                            .map(|n| n.child_ids().to_vec())
                            .unwrap_or_default(),
                    );
                    self.broadcast_scoped(|scope| {
                        scope.can_see_force(&force_id).then(|| {
                            ServerMessage::ModifierEnacted(Enactment::OpenStatus {
                                force_id: force_id.clone(),
                                node_id: node_id.clone(),
                                opened,
                                nodes: self.visible_nodes(scope, &force_id, &affected),
                            })
                        })
                    });
                }
                Enacted::Modifier(modifier) => {
                    let resources_remaining = self
                        .mission
                        .force(&modifier.force_id)
                        .map_or(0, |f| f.resources_remaining);
                    let node_ids: Vec<String> = modifier.node_id.iter().cloned().collect();
                    self.broadcast_scoped(|scope| {
                        scope.can_see_force(&modifier.force_id).then(|| {
                            ServerMessage::ModifierEnacted(Enactment::Modifier {
                                modifier: modifier.clone(),
                                nodes: self.visible_nodes(scope, &modifier.force_id, &node_ids),
                                resources_remaining,
                            })
                        })
                    });
                }
                Enacted::FileAccess {
                    file_id,
                    force_id,
                    granted,
                } => {
                    let message = ServerMessage::ModifierEnacted(Enactment::FileAccess {
                        file_id,
                        force_id: force_id.clone(),
                        granted,
                    });
                    self.broadcast_scoped(|scope| {
                        scope.can_see_force(&force_id).then(|| message.clone())
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Tells every member the session is gone and releases their logins.
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.broadcast(&ServerMessage::SessionDestroyed);
        for user_id in self.members.keys() {
            self.deps.logins.unbind_session(user_id, &self.id);
        }
        self.members.clear();
        self.scheduler.clear();
        self.timers.clear();
        self.destroyed = true;
        info!(session_id = %self.id, "session destroyed");
        self.deps.events.emit(Event::SessionDestroyed {
            timestamp: Utc::now(),
            session_id: self.id.clone(),
        });
    }

    /// Aborts everything and destroys the session without running effects.
    pub async fn shutdown(&mut self, reason: &str) {
        info!(session_id = %self.id, reason, "shutting session down");
        self.abort_all();
        if matches!(self.state, SessionState::Started | SessionState::Starting) {
            for err in self.deps.effects.environments().teardown_all().await {
                warn!(session_id = %self.id, error = %err, "environment teardown failed");
            }
        }
        self.destroy();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::effects::EnvironmentRegistry;
    use crate::mission::tests::mission;
    use crate::transport::connection::{ClientConnection, Outbound};
    use tokio::sync::mpsc::UnboundedReceiver;

    pub(crate) fn deps() -> SessionDeps {
        SessionDeps {
            effects: EffectEngine::new(Arc::new(EnvironmentRegistry::with_builtin())),
            logins: Arc::new(LoginRegistry::new()),
            events: Arc::new(EventEmitter::noop()),
        }
    }

    pub(crate) fn session() -> Session {
        Session::new(mission(), "owner", SessionConfig::default(), deps())
    }

    /// Logs `user_id` in and joins them with `role`.
    pub(crate) fn join(
        session: &mut Session,
        user_id: &str,
        role: Role,
        force_id: Option<&str>,
    ) -> UnboundedReceiver<Outbound> {
        let user = User::new(user_id, user_id, AccessLevel::Admin);
        session.deps.logins.login(user.clone(), true).unwrap();
        let (conn, rx) = ClientConnection::new(user_id);
        session.deps.logins.attach(conn.clone(), true).unwrap();
        session.join(user, role, conn).unwrap();
        if let Some(force_id) = force_id {
            session.members.get_mut(user_id).unwrap().force_id = Some(force_id.to_string());
        }
        rx
    }

    /// Drains text frames as JSON.
    pub(crate) fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(out) = rx.try_recv() {
            if let Outbound::Text(text) = out {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    pub(crate) fn methods(frames: &[serde_json::Value]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn summary_uses_mission_name_by_default() {
        let session = session();
        let summary = session.summary();
        assert_eq!(summary.name, "Operation Test");
        assert_eq!(summary.state, SessionState::Unstarted);
        assert_eq!(summary.member_count, 0);
    }

    #[test]
    fn view_is_scoped_to_member() {
        let mut session = session();
        let _rx = join(&mut session, "p1", Role::Participant, Some("red"));
        let view = session.view_for(session.member("p1").unwrap());
        assert_eq!(view.mission.forces.len(), 1);
        assert_eq!(view.mission.forces[0].id, "red");
        assert_eq!(view.members.len(), 1);
    }

    #[test]
    fn disconnect_ignores_stale_connection() {
        let mut session = session();
        let _rx = join(&mut session, "p1", Role::Participant, None);
        session.disconnect("p1", "not-the-connection");
        assert!(session.member("p1").is_some());
        let conn_id = session.member("p1").unwrap().connection.id().to_string();
        session.disconnect("p1", &conn_id);
        assert!(session.member("p1").is_none());
        assert_eq!(session.deps.logins.session_of("p1"), None);
    }

    #[tokio::test]
    async fn shutdown_destroys_and_notifies() {
        let mut session = session();
        let mut rx = join(&mut session, "m1", Role::Manager, None);
        drain(&mut rx);
        session.shutdown("test").await;
        assert!(session.is_destroyed());
        assert_eq!(methods(&drain(&mut rx)), ["session-destroyed"]);
        assert_eq!(session.deps.logins.session_of("m1"), None);
    }
}
