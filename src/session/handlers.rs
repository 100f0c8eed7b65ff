//! Request handlers.
//!
//! Each handler checks, in order: the requester is a member, the target
//! resolves within the requester's visibility, the requester may act on it,
//! and the session is in a state that allows the request. Only then does it
//! mutate. A rejection leaves the session untouched and is answered on the
//! requester's connection alone.

use tracing::{debug, info, warn};

use super::member::{Member, Permission, Role, User};
use super::{Origin, Session, SessionState, now_ms};
use crate::effects::EffectSource;
use crate::error::{ExecutionError, RequestError};
use crate::execution::{ExecutionCheats, ExecutionOptions};
use crate::mission::view::NodeView;
use crate::mission::{EffectTrigger, Mission};
use crate::observability::metrics;
use crate::transport::connection::ClientConnection;
use crate::transport::protocol::{ClientMessage, RequestContext, ServerMessage};

use super::SessionConfigUpdate;

impl Session {
    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Handles one request from a joined user and answers rejections.
    pub async fn handle_request(
        &mut self,
        user_id: &str,
        request_id: Option<String>,
        message: ClientMessage,
    ) {
        let method = message.method();
        self.origin = Some(Origin {
            user_id: user_id.to_string(),
            request_id: request_id.clone(),
        });
        let result = self.dispatch(user_id, message).await;
        self.origin = None;

        if let Err(err) = result {
            debug!(session_id = %self.id, user_id, method, error = %err, "request rejected");
            metrics::record_rejection(err.code());
            let context = request_id
                .as_deref()
                .map(|r| RequestContext::rejected(r, user_id));
            let connection = self
                .members
                .get(user_id)
                .map(|m| m.connection.clone())
                .or_else(|| self.deps.logins.connection(user_id));
            if let Some(connection) = connection {
                connection.send_error(err.code(), err.to_string(), context);
            }
        }
    }

    async fn dispatch(&mut self, user_id: &str, message: ClientMessage) -> Result<(), RequestError> {
        match message {
            ClientMessage::RequestJoinSession { .. } => {
                Err(RequestError::AlreadyJoined(self.id.clone()))
            }
            ClientMessage::RequestQuitSession => self.quit(user_id),
            ClientMessage::RequestStartSession => self.start(user_id).await,
            ClientMessage::RequestEndSession => self.end(user_id).await,
            ClientMessage::RequestResetSession => self.reset(user_id).await,
            ClientMessage::RequestOpenNode { node_id } => self.open_node(user_id, &node_id),
            ClientMessage::RequestExecuteAction {
                node_id,
                action_id,
                cheats,
            } => self.execute(user_id, &node_id, &action_id, cheats).await,
            ClientMessage::RequestSendOutput {
                force_id,
                prefix,
                message,
            } => self.send_output(user_id, &force_id, prefix.as_deref(), &message),
            ClientMessage::RequestBlockNode { node_id, blocked } => {
                self.block_node(user_id, &node_id, blocked)
            }
            ClientMessage::RequestKick { member_id } => self.remove_by_manager(user_id, &member_id, false),
            ClientMessage::RequestBan { member_id } => self.remove_by_manager(user_id, &member_id, true),
            ClientMessage::RequestAssignForce { member_id, force_id } => {
                self.assign_force(user_id, &member_id, force_id)
            }
            ClientMessage::RequestAssignRole { member_id, role } => {
                self.assign_role(user_id, &member_id, role)
            }
            ClientMessage::RequestUpdateSessionConfig(update) => self.update_config(user_id, update),
            ClientMessage::RequestCurrentSession => self.current_session(user_id),
        }
    }

    fn requester(&self, user_id: &str) -> Result<&Member, RequestError> {
        self.members.get(user_id).ok_or(RequestError::NotJoined)
    }

    /// Finds the force holding `node_id`, as far as `member` can see.
    fn locate_node(&self, member: &Member, node_id: &str) -> Result<String, RequestError> {
        let scope = member.visibility_scope();
        self.mission
            .force_of_node(node_id)
            .filter(|f| scope.can_see_node(&self.mission, &f.id, node_id))
            .map(|f| f.id.clone())
            .ok_or_else(|| RequestError::NodeNotFound(node_id.to_string()))
    }

    fn member_by_id(&self, member_id: &str) -> Result<&Member, RequestError> {
        self.members
            .values()
            .find(|m| m.id == member_id)
            .ok_or_else(|| RequestError::MemberNotFound(member_id.to_string()))
    }

    // ========================================================================
    // Roster
    // ========================================================================

    /// Joins `user` as `role`, answering the joiner with the session view.
    ///
    /// # Errors
    ///
    /// Rejects a closing session, banned users, existing members, roles the
    /// user's access level does not permit, a full session, and users
    /// already in another session.
    pub fn join(&mut self, user: User, role: Role, connection: ClientConnection) -> Result<(), RequestError> {
        if !self.state.is_open() {
            return Err(RequestError::ConflictingState(self.state));
        }
        if self.banned.contains(&user.id) {
            return Err(RequestError::Banned);
        }
        if self.members.contains_key(&user.id) {
            return Err(RequestError::AlreadyJoined(self.id.clone()));
        }
        if !user.access.permits(role) {
            return Err(RequestError::RoleNotPermitted(role.to_string()));
        }
        if !self.config.has_room(self.members.len()) {
            return Err(RequestError::SessionFull);
        }
        self.deps.logins.bind_session(&user.id, &self.id)?;

        let user_id = user.id.clone();
        let member = Member::new(user, role, connection);
        info!(session_id = %self.id, user_id = %user_id, role = %role, "member joined");
        self.members.insert(user_id.clone(), member);

        if let Some(member) = self.members.get(&user_id) {
            self.send_to(
                member,
                &ServerMessage::SessionJoined {
                    member_id: member.id.clone(),
                    session: Box::new(self.view_for(member)),
                },
            );
        }
        self.broadcast_members();
        Ok(())
    }

    /// [`join`](Self::join) with request correlation for the joiner.
    ///
    /// # Errors
    ///
    /// See [`join`](Self::join).
    pub fn handle_join(
        &mut self,
        user: User,
        role: Role,
        connection: ClientConnection,
        request_id: Option<String>,
    ) -> Result<(), RequestError> {
        self.origin = Some(Origin {
            user_id: user.id.clone(),
            request_id,
        });
        let result = self.join(user, role, connection);
        self.origin = None;
        result
    }

    fn quit(&mut self, user_id: &str) -> Result<(), RequestError> {
        let member = self.remove_member(user_id).ok_or(RequestError::NotJoined)?;
        info!(session_id = %self.id, user_id, "member quit");
        self.send_to(&member, &ServerMessage::SessionQuit);
        self.broadcast_members();
        Ok(())
    }

    fn remove_by_manager(&mut self, user_id: &str, member_id: &str, ban: bool) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::ManageSessionMembers)?;
        let target = self.member_by_id(member_id)?;
        if target.has(Permission::ManageSessionMembers) {
            return Err(RequestError::MemberNotKickable(member_id.to_string()));
        }
        let target_user = target.user.id.clone();
        let Some(removed) = self.remove_member(&target_user) else {
            return Err(RequestError::MemberNotFound(member_id.to_string()));
        };
        if ban {
            self.banned.insert(target_user.clone());
            removed.connection.send_message(&ServerMessage::Banned);
        } else {
            removed.connection.send_message(&ServerMessage::Kicked);
        }
        info!(session_id = %self.id, by = user_id, user_id = %target_user, ban, "member removed");
        self.broadcast_members();
        Ok(())
    }

    fn assign_force(
        &mut self,
        user_id: &str,
        member_id: &str,
        force_id: Option<String>,
    ) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::ManageSessionMembers)?;
        let target = self.member_by_id(member_id)?;
        if let Some(force_id) = &force_id {
            if self.mission.force(force_id).is_none() {
                return Err(RequestError::ForceNotFound(force_id.clone()));
            }
            if !target.role.has(Permission::ForceAssignable) {
                return Err(RequestError::RoleNotPermitted(target.role.to_string()));
            }
        }
        let target_user = target.user.id.clone();
        if let Some(target) = self.members.get_mut(&target_user) {
            target.force_id = force_id;
        }
        self.refresh_member(&target_user);
        Ok(())
    }

    fn assign_role(&mut self, user_id: &str, member_id: &str, role: Role) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::ManageSessionMembers)?;
        let target = self.member_by_id(member_id)?;
        if !target.user.access.permits(role) {
            return Err(RequestError::RoleNotPermitted(role.to_string()));
        }
        let target_user = target.user.id.clone();
        if let Some(target) = self.members.get_mut(&target_user) {
            target.role = role;
            if !role.has(Permission::ForceAssignable) {
                target.force_id = None;
            }
        }
        self.refresh_member(&target_user);
        Ok(())
    }

    /// Resends a member its view after its role or force changed.
    fn refresh_member(&self, user_id: &str) {
        if let Some(member) = self.members.get(user_id) {
            self.send_to(
                member,
                &ServerMessage::CurrentSession {
                    session: Some(Box::new(self.view_for(member))),
                },
            );
        }
        self.broadcast_members();
    }

    fn update_config(&mut self, user_id: &str, update: SessionConfigUpdate) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::ConfigureSessions)?;
        if !self.state.is_open() {
            return Err(RequestError::ConflictingState(self.state));
        }
        self.config.apply(update);
        self.broadcast(&ServerMessage::SessionConfigUpdated {
            config: self.config.clone(),
        });
        Ok(())
    }

    fn current_session(&self, user_id: &str) -> Result<(), RequestError> {
        let member = self.requester(user_id)?;
        self.send_to(
            member,
            &ServerMessage::CurrentSession {
                session: Some(Box::new(self.view_for(member))),
            },
        );
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn start(&mut self, user_id: &str) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::StartEndSessions)?;
        self.require_state(&[SessionState::Unstarted])?;

        let dismissed: Vec<String> = self
            .members
            .values()
            .filter(|m| m.visibility_scope() == crate::mission::VisibilityScope::None)
            .map(|m| m.user.id.clone())
            .collect();
        for id in &dismissed {
            if let Some(member) = self.remove_member(id) {
                debug!(session_id = %self.id, user_id = %id, "dismissing member without a force");
                member.connection.send_message(&ServerMessage::Dismissed);
            }
        }
        if !dismissed.is_empty() {
            self.broadcast_members();
        }

        self.set_state(SessionState::Starting);
        self.broadcast(&ServerMessage::SessionStarting);
        for err in self.deps.effects.environments().setup_all().await {
            warn!(session_id = %self.id, error = %err, "environment setup failed");
        }
        self.set_state(SessionState::Started);
        self.broadcast_mission(|mission| ServerMessage::SessionStarted { mission });
        self.run_session_effects(EffectTrigger::SessionStart).await;
        Ok(())
    }

    async fn end(&mut self, user_id: &str) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::StartEndSessions)?;
        self.require_state(&[SessionState::Started])?;

        self.set_state(SessionState::Ending);
        self.broadcast(&ServerMessage::SessionEnding);
        self.abort_all();
        self.run_session_effects(EffectTrigger::SessionEnd).await;
        for err in self.deps.effects.environments().teardown_all().await {
            warn!(session_id = %self.id, error = %err, "environment teardown failed");
        }
        self.stores.clear();
        self.set_state(SessionState::Ended);
        self.broadcast(&ServerMessage::SessionEnded);
        self.destroy();
        Ok(())
    }

    async fn reset(&mut self, user_id: &str) -> Result<(), RequestError> {
        self.requester(user_id)?
            .require(Permission::StartEndSessions)?;
        self.require_state(&[SessionState::Started])?;

        self.set_state(SessionState::Resetting);
        self.broadcast(&ServerMessage::SessionResetting);
        self.abort_all();
        for err in self.deps.effects.environments().teardown_all().await {
            warn!(session_id = %self.id, error = %err, "environment teardown failed");
        }
        self.stores.clear();
        match Mission::from_document(self.document.clone()) {
            Ok(mission) => self.mission = mission,
            Err(e) => warn!(session_id = %self.id, error = %e, "mission rebuild failed, keeping live state"),
        }
        for err in self.deps.effects.environments().setup_all().await {
            warn!(session_id = %self.id, error = %err, "environment setup failed");
        }
        self.set_state(SessionState::Started);
        self.broadcast_mission(|mission| ServerMessage::SessionReset { mission });
        self.run_session_effects(EffectTrigger::SessionStart).await;
        Ok(())
    }

    // ========================================================================
    // Mission play
    // ========================================================================

    fn open_node(&mut self, user_id: &str, node_id: &str) -> Result<(), RequestError> {
        let member = self.requester(user_id)?;
        let force_id = self.locate_node(member, node_id)?;
        member.require_act_on(&force_id)?;
        self.require_state(&[SessionState::Started])?;

        let force = self
            .mission
            .force_mut(&force_id)
            .ok_or_else(|| RequestError::ForceNotFound(force_id.clone()))?;
        if !force.is_revealed(node_id) {
            return Err(ExecutionError::NotRevealed(node_id.to_string()).into());
        }
        let node = force
            .node_mut(node_id)
            .ok_or_else(|| RequestError::NodeNotFound(node_id.to_string()))?;
        if node.is_blocked() {
            return Err(ExecutionError::Blocked(node_id.to_string()).into());
        }
        if !node.is_openable() {
            return Err(RequestError::NodeNotOpenable(node_id.to_string()));
        }
        node.set_opened(true);
        info!(session_id = %self.id, user_id, node_id, "node opened");

        let Some(force) = self.mission.force(&force_id) else {
            return Ok(());
        };
        let Some(node) = force.node(node_id) else {
            return Ok(());
        };
        let children = node.child_ids().to_vec();
        self.broadcast_scoped(|scope| {
            scope
                .can_see_node(&self.mission, &force_id, node_id)
                .then(|| ServerMessage::NodeOpened {
                    node: NodeView::build(force, node),
                    revealed_nodes: self.visible_nodes(scope, &force_id, &children),
                })
        });
        Ok(())
    }

    async fn execute(
        &mut self,
        user_id: &str,
        node_id: &str,
        action_id: &str,
        cheats: ExecutionCheats,
    ) -> Result<(), RequestError> {
        let member = self.requester(user_id)?;
        let force_id = self.locate_node(member, node_id)?;
        member.require_act_on(&force_id)?;
        if cheats.any() {
            member.require(Permission::Cheats)?;
        }
        self.require_state(&[SessionState::Started])?;

        let now = now_ms();
        let options = ExecutionOptions {
            now_ms: now,
            infinite_resources: self.config.infinite_resources,
            instantaneous: self.config.instantaneous_actions,
            cheats,
        };
        let execution = self
            .mission
            .force_mut(&force_id)
            .ok_or_else(|| RequestError::ForceNotFound(force_id.clone()))?
            .execute(node_id, action_id, &options)?;
        info!(
            session_id = %self.id,
            user_id,
            node_id,
            action_id,
            duration_ms = execution.duration_ms(),
            "execution initiated"
        );
        self.schedule_completion(&execution, now);

        let message = ServerMessage::ActionExecutionInitiated {
            execution: execution.clone(),
        };
        self.broadcast_scoped(|scope| {
            scope
                .can_see_node(&self.mission, &force_id, node_id)
                .then(|| message.clone())
        });

        let effects = self.action_effects(&force_id, node_id, action_id);
        let source = EffectSource::execution(&force_id, node_id, action_id);
        self.run_effects(&effects, EffectTrigger::ExecutionInitiation, &source)
            .await;
        Ok(())
    }

    fn send_output(
        &mut self,
        user_id: &str,
        force_id: &str,
        prefix: Option<&str>,
        message: &str,
    ) -> Result<(), RequestError> {
        let member = self.requester(user_id)?;
        member.require(Permission::ManipulateNodes)?;
        let prefix = prefix.map_or_else(|| format!("{}:", member.user.username), str::to_string);
        self.require_state(&[SessionState::Started])?;

        let output = self
            .mission
            .force_mut(force_id)
            .ok_or_else(|| RequestError::ForceNotFound(force_id.to_string()))?
            .push_output(&prefix, message, now_ms());
        let message = ServerMessage::SendOutput { output };
        self.broadcast_scoped(|scope| scope.can_see_force(force_id).then(|| message.clone()));
        Ok(())
    }

    fn block_node(&mut self, user_id: &str, node_id: &str, blocked: bool) -> Result<(), RequestError> {
        let member = self.requester(user_id)?;
        member.require(Permission::ManipulateNodes)?;
        let force_id = self.locate_node(member, node_id)?;
        self.require_state(&[SessionState::Started])?;

        let update = self
            .mission
            .force_mut(&force_id)
            .ok_or_else(|| RequestError::ForceNotFound(force_id.clone()))?
            .update_block_status(node_id, blocked, now_ms());
        if update.changed.is_empty() {
            debug!(session_id = %self.id, node_id, blocked, "block status unchanged");
            return Ok(());
        }
        info!(session_id = %self.id, user_id, node_id, blocked, changed = update.changed.len(), "block status updated");
        self.announce_enacted(vec![crate::effects::Enacted::Block {
            force_id,
            node_id: node_id.to_string(),
            blocked,
            changed: update.changed,
            aborted: update.aborted,
        }]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::tests::{drain, join, methods, session};
    use crate::session::AccessLevel;
    use tokio::time::Instant;

    fn request(message: serde_json::Value) -> ClientMessage {
        serde_json::from_value(message).unwrap()
    }

    async fn send(session: &mut Session, user_id: &str, message: serde_json::Value) {
        session
            .handle_request(user_id, Some("req".into()), request(message))
            .await;
    }

    fn last_error(frames: &[serde_json::Value]) -> Option<String> {
        frames
            .iter()
            .rev()
            .find(|f| f["method"] == "error")
            .map(|f| f["data"]["name"].as_str().unwrap_or_default().to_string())
    }

    async fn started() -> (Session, tokio::sync::mpsc::UnboundedReceiver<crate::transport::connection::Outbound>) {
        let mut s = session();
        let mut rx = join(&mut s, "m1", Role::Manager, None);
        send(&mut s, "m1", serde_json::json!({"method": "request-start-session"})).await;
        drain(&mut rx);
        (s, rx)
    }

    #[tokio::test]
    async fn join_rejects_role_above_access_level() {
        let mut s = session();
        let user = User::new("stu", "stu", AccessLevel::Student);
        s.deps.logins.login(user.clone(), true).unwrap();
        let (conn, _rx) = ClientConnection::new("stu");
        assert_eq!(
            s.join(user, Role::Manager, conn),
            Err(RequestError::RoleNotPermitted("manager".into()))
        );
        assert!(s.member("stu").is_none());
    }

    #[tokio::test]
    async fn join_respects_member_cap() {
        let mut s = session();
        s.config.max_members = Some(1);
        let _rx = join(&mut s, "a", Role::Manager, None);
        let user = User::new("b", "b", AccessLevel::Admin);
        s.deps.logins.login(user.clone(), true).unwrap();
        let (conn, _rx2) = ClientConnection::new("b");
        assert_eq!(s.join(user, Role::Observer, conn), Err(RequestError::SessionFull));
    }

    #[tokio::test]
    async fn join_answers_with_session_view() {
        let mut s = session();
        let mut rx = join(&mut s, "m1", Role::Manager, None);
        let frames = drain(&mut rx);
        assert_eq!(methods(&frames), ["session-joined", "session-members-updated"]);
        assert_eq!(frames[0]["data"]["session"]["state"], "unstarted");
    }

    #[tokio::test]
    async fn execute_before_start_is_conflicting_state() {
        let mut s = session();
        let mut rx = join(&mut s, "m1", Role::Manager, None);
        drain(&mut rx);
        send(
            &mut s,
            "m1",
            serde_json::json!({"method": "request-execute-action", "data": {"nodeId": "red-side", "actionId": "red-side-a"}}),
        )
        .await;
        let frames = drain(&mut rx);
        assert_eq!(last_error(&frames).as_deref(), Some("session-conflicting-state"));
        assert_eq!(frames[0]["request"]["fulfilled"], false);
        assert_eq!(frames[0]["request"]["requestId"], "req");
    }

    #[tokio::test]
    async fn start_dismisses_members_without_force() {
        let mut s = session();
        let mut manager = join(&mut s, "m1", Role::Manager, None);
        let mut idle = join(&mut s, "p1", Role::Participant, None);
        let _red = join(&mut s, "p2", Role::Participant, Some("red"));
        drain(&mut manager);
        drain(&mut idle);

        send(&mut s, "m1", serde_json::json!({"method": "request-start-session"})).await;
        assert_eq!(s.state(), SessionState::Started);
        assert!(s.member("p1").is_none());
        assert_eq!(methods(&drain(&mut idle)), ["dismissed"]);
        let frames = drain(&mut manager);
        let names = methods(&frames);
        assert!(names.contains(&"session-starting".to_string()));
        assert!(names.contains(&"session-started".to_string()));
        // The mission's briefing effect runs on start.
        assert!(names.contains(&"send-output".to_string()));
    }

    #[tokio::test]
    async fn participant_cannot_start() {
        let mut s = session();
        let mut rx = join(&mut s, "p1", Role::Participant, Some("red"));
        drain(&mut rx);
        send(&mut s, "p1", serde_json::json!({"method": "request-start-session"})).await;
        assert_eq!(last_error(&drain(&mut rx)).as_deref(), Some("session-unauthorized"));
        assert_eq!(s.state(), SessionState::Unstarted);
    }

    #[tokio::test]
    async fn open_node_reveals_children_to_force() {
        let (mut s, mut manager) = started().await;
        let mut red = join(&mut s, "p1", Role::Participant, Some("red"));
        let mut blue = join(&mut s, "p2", Role::Participant, Some("blue"));
        drain(&mut manager);
        drain(&mut red);
        drain(&mut blue);

        send(&mut s, "p1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        let frames = drain(&mut red);
        assert_eq!(methods(&frames), ["node-opened"]);
        assert_eq!(frames[0]["request"]["fulfilled"], true);
        assert_eq!(frames[0]["data"]["revealedNodes"].as_array().unwrap().len(), 2);
        assert!(drain(&mut blue).is_empty());
        assert_eq!(methods(&drain(&mut manager)), ["node-opened"]);
    }

    #[tokio::test]
    async fn hidden_node_is_not_found_for_other_force() {
        let (mut s, _manager) = started().await;
        let mut blue = join(&mut s, "p2", Role::Participant, Some("blue"));
        drain(&mut blue);
        send(&mut s, "p2", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        assert_eq!(last_error(&drain(&mut blue)).as_deref(), Some("node-not-found"));
    }

    #[tokio::test]
    async fn opening_executable_node_is_not_openable() {
        let (mut s, mut manager) = started().await;
        send(&mut s, "m1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        drain(&mut manager);
        send(&mut s, "m1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-side"}})).await;
        assert_eq!(last_error(&drain(&mut manager)).as_deref(), Some("node-not-openable"));
    }

    #[tokio::test(start_paused = true)]
    async fn execution_completes_when_timer_fires() {
        let (mut s, mut manager) = started().await;
        send(&mut s, "m1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        send(
            &mut s,
            "m1",
            serde_json::json!({"method": "request-execute-action", "data": {"nodeId": "red-side", "actionId": "red-side-a"}}),
        )
        .await;
        assert_eq!(s.pending_completions(), 1);
        let frames = drain(&mut manager);
        assert_eq!(methods(&frames), ["node-opened", "action-execution-initiated"]);

        s.fire_due(Instant::now() + Duration::from_millis(500)).await;
        assert!(drain(&mut manager).is_empty());

        tokio::time::advance(Duration::from_millis(1_000)).await;
        s.fire_due(Instant::now()).await;
        let frames = drain(&mut manager);
        assert_eq!(methods(&frames), ["action-execution-completed"]);
        assert_eq!(frames[0]["data"]["outcome"]["nodeId"], "red-side");
        assert_eq!(frames[0]["data"]["resourcesRemaining"], 9);
        assert_eq!(s.pending_completions(), 0);
    }

    #[tokio::test]
    async fn cheats_require_permission() {
        let (mut s, _manager) = started().await;
        send(&mut s, "m1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        let mut red = join(&mut s, "p1", Role::Participant, Some("red"));
        drain(&mut red);
        send(
            &mut s,
            "p1",
            serde_json::json!({"method": "request-execute-action", "data": {"nodeId": "red-side", "actionId": "red-side-a", "cheats": {"zeroCost": true}}}),
        )
        .await;
        assert_eq!(last_error(&drain(&mut red)).as_deref(), Some("session-unauthorized"));
    }

    #[tokio::test]
    async fn block_aborts_running_execution() {
        let (mut s, mut manager) = started().await;
        send(&mut s, "m1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        send(
            &mut s,
            "m1",
            serde_json::json!({"method": "request-execute-action", "data": {"nodeId": "red-side", "actionId": "red-side-a"}}),
        )
        .await;
        drain(&mut manager);

        send(&mut s, "m1", serde_json::json!({"method": "request-block-node", "data": {"nodeId": "red-side", "blocked": true}})).await;
        assert_eq!(s.pending_completions(), 0);
        let frames = drain(&mut manager);
        assert_eq!(methods(&frames), ["action-execution-completed", "modifier-enacted"]);
        assert_eq!(frames[0]["data"]["outcome"]["aborted"], true);
        assert_eq!(frames[1]["data"]["type"], "block-status");
    }

    #[tokio::test]
    async fn kick_and_ban() {
        let mut s = session();
        let mut manager = join(&mut s, "m1", Role::Manager, None);
        let mut other = join(&mut s, "m2", Role::Manager, None);
        let mut target = join(&mut s, "p1", Role::Participant, Some("red"));
        drain(&mut manager);
        drain(&mut other);
        drain(&mut target);

        let manager_id = s.member("m2").unwrap().id.clone();
        send(&mut s, "m1", serde_json::json!({"method": "request-kick", "data": {"memberId": manager_id}})).await;
        assert_eq!(last_error(&drain(&mut manager)).as_deref(), Some("member-not-kickable"));

        let target_id = s.member("p1").unwrap().id.clone();
        send(&mut s, "m1", serde_json::json!({"method": "request-ban", "data": {"memberId": target_id}})).await;
        assert_eq!(methods(&drain(&mut target)), ["banned"]);
        assert!(s.is_banned("p1"));
        assert_eq!(s.deps.logins.session_of("p1"), None);

        let (conn, _rx) = ClientConnection::new("p1");
        let user = User::new("p1", "p1", AccessLevel::Admin);
        assert_eq!(s.join(user, Role::Participant, conn), Err(RequestError::Banned));
    }

    #[tokio::test]
    async fn assign_force_requires_assignable_role() {
        let mut s = session();
        let mut manager = join(&mut s, "m1", Role::Manager, None);
        let _p = join(&mut s, "p1", Role::Participant, None);
        let _o = join(&mut s, "o1", Role::Observer, None);
        drain(&mut manager);

        let observer = s.member("o1").unwrap().id.clone();
        send(&mut s, "m1", serde_json::json!({"method": "request-assign-force", "data": {"memberId": observer, "forceId": "red"}})).await;
        assert_eq!(last_error(&drain(&mut manager)).as_deref(), Some("role-not-permitted"));

        let participant = s.member("p1").unwrap().id.clone();
        send(&mut s, "m1", serde_json::json!({"method": "request-assign-force", "data": {"memberId": participant, "forceId": "green"}})).await;
        assert_eq!(last_error(&drain(&mut manager)).as_deref(), Some("force-not-found"));

        send(&mut s, "m1", serde_json::json!({"method": "request-assign-force", "data": {"memberId": participant, "forceId": "red"}})).await;
        assert_eq!(s.member("p1").unwrap().force_id.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn assign_role_clears_force() {
        let mut s = session();
        let _m = join(&mut s, "m1", Role::Manager, None);
        let _p = join(&mut s, "p1", Role::Participant, Some("red"));
        let member_id = s.member("p1").unwrap().id.clone();
        send(&mut s, "m1", serde_json::json!({"method": "request-assign-role", "data": {"memberId": member_id, "role": "observer"}})).await;
        let member = s.member("p1").unwrap();
        assert_eq!(member.role, Role::Observer);
        assert_eq!(member.force_id, None);
    }

    #[tokio::test]
    async fn end_destroys_session() {
        let (mut s, mut manager) = started().await;
        send(&mut s, "m1", serde_json::json!({"method": "request-end-session"})).await;
        assert!(s.is_destroyed());
        assert_eq!(s.state(), SessionState::Ended);
        assert_eq!(
            methods(&drain(&mut manager)),
            ["session-ending", "session-ended", "session-destroyed"]
        );
    }

    #[tokio::test]
    async fn reset_restores_mission_and_keeps_members() {
        let (mut s, mut manager) = started().await;
        send(&mut s, "m1", serde_json::json!({"method": "request-open-node", "data": {"nodeId": "red-root"}})).await;
        drain(&mut manager);
        send(&mut s, "m1", serde_json::json!({"method": "request-reset-session"})).await;
        assert_eq!(s.state(), SessionState::Started);
        assert!(!s.mission().force("red").unwrap().node("red-root").unwrap().is_opened());
        assert!(s.member("m1").is_some());
        let names = methods(&drain(&mut manager));
        assert_eq!(&names[..2], ["session-resetting", "session-reset"]);
    }

    #[tokio::test]
    async fn reset_discards_effect_modifiers() {
        use crate::effects::{Mutation, apply_mutation};

        let (mut s, mut manager) = started().await;
        for mutation in [
            Mutation::ProcessTime {
                force_id: "red".into(),
                node_id: "red-side".into(),
                action_id: None,
                delta: 60_000,
            },
            Mutation::ResourceCost {
                force_id: "red".into(),
                node_id: "red-side".into(),
                action_id: None,
                delta: 4,
            },
            Mutation::SuccessChance {
                force_id: "red".into(),
                node_id: "red-side".into(),
                action_id: None,
                delta: 0.5,
            },
        ] {
            assert!(apply_mutation(&mut s.mission, mutation, 0).is_some());
        }
        let (_, _, action) = s.mission().find_action("red-side-a").unwrap();
        assert_eq!(action.process_time, 61_000);

        send(&mut s, "m1", serde_json::json!({"method": "request-reset-session"})).await;
        drain(&mut manager);
        let (_, _, action) = s.mission().find_action("red-side-a").unwrap();
        assert_eq!(action.process_time, 1_000);
        assert_eq!(action.resource_cost, 1);
        assert!((action.success_chance - 0.5).abs() < f64::EPSILON);
        assert_eq!(action.remaining_outcomes(), 10);
    }

    #[tokio::test]
    async fn config_update_broadcasts() {
        let mut s = session();
        let mut rx = join(&mut s, "m1", Role::Manager, None);
        drain(&mut rx);
        send(&mut s, "m1", serde_json::json!({"method": "request-update-session-config", "data": {"name": "Drill"}})).await;
        let frames = drain(&mut rx);
        assert_eq!(methods(&frames), ["session-config-updated"]);
        assert_eq!(s.name(), "Drill");
    }

    #[tokio::test]
    async fn quit_releases_login() {
        let mut s = session();
        let mut rx = join(&mut s, "p1", Role::Participant, None);
        drain(&mut rx);
        send(&mut s, "p1", serde_json::json!({"method": "request-quit-session"})).await;
        assert_eq!(methods(&drain(&mut rx)), ["session-quit"]);
        assert!(s.member("p1").is_none());
        assert_eq!(s.deps.logins.session_of("p1"), None);
    }
}
