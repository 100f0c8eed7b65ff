//! Effect engine.
//!
//! Effects fire on session lifecycle events and on execution initiation,
//! success or failure. For each matching effect the engine resolves the
//! target environment and target, checks the arguments against the
//! target's schema, runs the script against an [`EffectContext`], and then
//! applies the mutations the script queued.
//!
//! Effects are independent: a defective or failing effect is logged with
//! its full address and skipped, and the rest of the batch still runs.
//!
//! # Architecture
//!
//! - [`target`]: environment and script traits, argument schema, registry
//! - [`context`]: script-facing context, resolvers and mutators
//! - [`store`]: session- and environment-scoped key/value stores
//! - [`builtin`]: the `internal` environment
//! - [`webhook`]: HTTP-backed environments

pub mod builtin;
pub mod context;
pub mod store;
pub mod target;
pub mod webhook;

pub use context::{EffectContext, EffectSource, Mutation};
pub use store::{ScopedStores, Store};
pub use target::{EnvironmentRegistry, TargetEnvironment, TargetScript};

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::EffectError;
use crate::execution::Execution;
use crate::mission::force::BlockUpdate;
use crate::mission::outcome::RealizedOutcome;
use crate::mission::{Effect, EffectTrigger, Mission, Output};
use crate::observability::metrics;

/// A mutation after it was applied to the live mission.
#[derive(Debug)]
pub enum Enacted {
    /// Output appended to a force's log.
    Output(Output),
    /// Block flags changed.
    Block {
        force_id: String,
        node_id: String,
        blocked: bool,
        changed: Vec<String>,
        aborted: Vec<(Execution, RealizedOutcome)>,
    },
    /// Open flag changed.
    Open {
        force_id: String,
        node_id: String,
        opened: bool,
    },
    /// A modifier was applied.
    Modifier(Modifier),
    /// File access changed.
    FileAccess {
        file_id: String,
        force_id: String,
        granted: bool,
    },
}

/// Payload of a `modifier-enacted` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    /// Modifier kind, as the mutation's kebab-case name.
    pub kind: &'static str,
    pub force_id: String,
    pub node_id: Option<String>,
    pub action_id: Option<String>,
    /// Requested change.
    pub delta: f64,
}

/// Outcome of one effect batch.
#[derive(Debug, Default)]
pub struct EffectReport {
    /// Effects whose script ran to completion.
    pub applied: usize,
    /// Effects skipped as defective or failed.
    pub failed: usize,
    /// Mutations applied, in order.
    pub enacted: Vec<Enacted>,
}

/// Everything an effect batch needs besides the mission.
#[derive(Debug, Clone, Copy)]
pub struct EffectBatch<'a> {
    /// Session running the batch, for logs.
    pub session_id: &'a str,
    /// Candidate effects; only those matching `trigger` run.
    pub effects: &'a [Effect],
    pub trigger: EffectTrigger,
    pub source: &'a EffectSource,
    /// Session-scoped stores.
    pub session_stores: &'a ScopedStores,
    /// Session's `effectsEnabled` flag.
    pub enabled: bool,
    pub now_ms: i64,
}

/// Runs effects against registered target environments.
#[derive(Debug, Clone)]
pub struct EffectEngine {
    environments: Arc<EnvironmentRegistry>,
}

impl EffectEngine {
    /// Creates an engine over `environments`.
    #[must_use]
    pub const fn new(environments: Arc<EnvironmentRegistry>) -> Self {
        Self { environments }
    }

    /// The environment registry.
    #[must_use]
    pub const fn environments(&self) -> &Arc<EnvironmentRegistry> {
        &self.environments
    }

    /// Runs every effect in `batch` matching its trigger, applying each
    /// effect's mutations before the next effect runs.
    pub async fn apply(&self, mission: &mut Mission, batch: EffectBatch<'_>) -> EffectReport {
        let mut report = EffectReport::default();
        if !batch.enabled {
            return report;
        }
        for effect in batch.effects.iter().filter(|e| e.trigger == batch.trigger) {
            match self.run_effect(mission, effect, &batch).await {
                Ok(mutations) => {
                    report.applied += 1;
                    metrics::record_effect(true);
                    for mutation in mutations {
                        if let Some(enacted) = apply_mutation(mission, mutation, batch.now_ms) {
                            report.enacted.push(enacted);
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_effect(false);
                    log_failure(mission, effect, &batch, &e);
                }
            }
        }
        report
    }

    async fn run_effect(
        &self,
        mission: &Mission,
        effect: &Effect,
        batch: &EffectBatch<'_>,
    ) -> Result<Vec<Mutation>, EffectError> {
        let env = self
            .environments
            .get(&effect.target_environment_id)
            .ok_or_else(|| EffectError::EnvironmentNotFound(effect.target_environment_id.clone()))?;
        if let Some(wanted) = effect.target_environment_version.as_deref()
            && wanted != env.version()
        {
            warn!(
                effect = %effect.name,
                environment = %env.id(),
                wanted,
                actual = %env.version(),
                "effect authored against a different environment version"
            );
        }
        let target = env
            .target(&effect.target_id)
            .ok_or_else(|| EffectError::TargetNotFound {
                environment: effect.target_environment_id.clone(),
                target: effect.target_id.clone(),
            })?;
        target::validate_args(&target.args, &effect.args)?;

        let mut ctx = EffectContext::new(
            mission,
            effect,
            batch.source,
            batch.session_stores.for_environment(env.id()),
            self.environments.environment_store(env.id()),
            batch.now_ms,
        );
        target.script.run(&mut ctx).await?;
        debug!(
            session_id = %batch.session_id,
            effect = %effect.name,
            target = %effect.target_id,
            mutations = ctx.mutations().len(),
            "effect script completed"
        );
        Ok(ctx.into_mutations())
    }
}

fn log_failure(mission: &Mission, effect: &Effect, batch: &EffectBatch<'_>, err: &EffectError) {
    let source = batch.source;
    let force = source.force_id.as_deref().and_then(|id| mission.force(id));
    let node = force.zip(source.node_id.as_deref()).and_then(|(f, id)| f.node(id));
    let action = node.zip(source.action_id.as_deref()).and_then(|(n, id)| n.actions.get(id));
    error!(
        session_id = %batch.session_id,
        mission = %mission.name,
        force = force.map_or("-", |f| f.name.as_str()),
        node = node.map_or("-", |n| n.name.as_str()),
        action = action.map_or("-", |a| a.name.as_str()),
        effect = %effect.name,
        trigger = %effect.trigger,
        error = %err,
        "effect failed"
    );
}

/// Applies one mutation to the live mission.
///
/// Ids are checked against the current mission first; a mutation naming a
/// force, node, action or file that no longer resolves is dropped. No-op
/// transitions yield `None`.
pub fn apply_mutation(mission: &mut Mission, mutation: Mutation, now_ms: i64) -> Option<Enacted> {
    match mutation {
        Mutation::SendOutput {
            force_id,
            prefix,
            message,
        } => {
            let force = live_force(mission, &force_id)?;
            Some(Enacted::Output(force.push_output(&prefix, &message, now_ms)))
        }
        Mutation::BlockStatus {
            force_id,
            node_id,
            blocked,
        } => {
            let force = live_force(mission, &force_id)?;
            if force.node(&node_id).is_none() {
                return stale("node", &node_id);
            }
            let BlockUpdate { changed, aborted } =
                force.update_block_status(&node_id, blocked, now_ms);
            (!changed.is_empty()).then_some(Enacted::Block {
                force_id,
                node_id,
                blocked,
                changed,
                aborted,
            })
        }
        Mutation::OpenStatus {
            force_id,
            node_id,
            opened,
        } => {
            let force = live_force(mission, &force_id)?;
            let Some(node) = force.node_mut(&node_id) else {
                return stale("node", &node_id);
            };
            node.set_opened(opened).then_some(Enacted::Open {
                force_id,
                node_id,
                opened,
            })
        }
        Mutation::SuccessChance {
            force_id,
            node_id,
            action_id,
            delta,
        } => modify_actions(
            mission,
            "success-chance",
            force_id,
            node_id,
            action_id,
            delta,
            |a| a.modify_success_chance(delta),
        ),
        Mutation::ProcessTime {
            force_id,
            node_id,
            action_id,
            delta,
        } => modify_actions(
            mission,
            "process-time",
            force_id,
            node_id,
            action_id,
            as_f64(delta),
            |a| a.modify_process_time(delta),
        ),
        Mutation::ResourceCost {
            force_id,
            node_id,
            action_id,
            delta,
        } => modify_actions(
            mission,
            "resource-cost",
            force_id,
            node_id,
            action_id,
            as_f64(delta),
            |a| a.modify_resource_cost(delta),
        ),
        Mutation::ResourcePool { force_id, delta } => {
            let force = live_force(mission, &force_id)?;
            force.modify_resource_pool(delta);
            Some(Enacted::Modifier(Modifier {
                kind: "resource-pool",
                force_id,
                node_id: None,
                action_id: None,
                delta: as_f64(delta),
            }))
        }
        Mutation::FileAccess {
            file_id,
            force_id,
            granted,
        } => {
            live_force(mission, &force_id)?;
            let Some(file) = mission.file_mut(&file_id) else {
                return stale("file", &file_id);
            };
            let changed = if granted {
                file.grant(&force_id)
            } else {
                file.revoke(&force_id)
            };
            changed.then_some(Enacted::FileAccess {
                file_id,
                force_id,
                granted,
            })
        }
    }
}

fn live_force<'m>(
    mission: &'m mut Mission,
    force_id: &str,
) -> Option<&'m mut crate::mission::Force> {
    let force = mission.force_mut(force_id);
    if force.is_none() {
        warn!(force_id, "dropping mutation for a force no longer in the mission");
    }
    force
}

fn stale<T>(kind: &str, id: &str) -> Option<T> {
    warn!(kind, id, "dropping mutation for an entity no longer in the mission");
    None
}

#[allow(clippy::cast_precision_loss)]
const fn as_f64(delta: i64) -> f64 {
    delta as f64
}

fn modify_actions(
    mission: &mut Mission,
    kind: &'static str,
    force_id: String,
    node_id: String,
    action_id: Option<String>,
    delta: f64,
    apply: impl Fn(&mut crate::mission::Action),
) -> Option<Enacted> {
    let node = live_force(mission, &force_id)?.node_mut(&node_id);
    let Some(node) = node else {
        return stale("node", &node_id);
    };
    match action_id.as_deref() {
        Some(id) => {
            let Some(action) = node.actions.get_mut(id) else {
                return stale("action", id);
            };
            apply(action);
        }
        None => node.actions.values_mut().for_each(&apply),
    }
    Some(Enacted::Modifier(Modifier {
        kind,
        force_id,
        node_id: Some(node_id),
        action_id,
        delta,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::target::{ArgKind, ArgSpec, SyncScript, Target};
    use crate::execution::ExecutionOptions;
    use crate::mission::tests::mission;
    use async_trait::async_trait;
    use serde_json::json;

    /// Environment with a script that always fails and one that counts
    /// invocations in both stores.
    struct TestEnvironment {
        targets: Vec<Target>,
    }

    fn fail(_: &mut EffectContext<'_>) -> Result<(), EffectError> {
        Err(EffectError::Script("boom".into()))
    }

    fn count(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        for store in [ctx.session_store(), ctx.environment_store()] {
            let n = store.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
            store.set("count", json!(n + 1));
        }
        Ok(())
    }

    #[async_trait]
    impl TargetEnvironment for TestEnvironment {
        fn id(&self) -> &str {
            "test"
        }
        fn name(&self) -> &str {
            "Test"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn targets(&self) -> &[Target] {
            &self.targets
        }
    }

    fn engine() -> EffectEngine {
        let registry = EnvironmentRegistry::with_builtin();
        registry.register(Arc::new(TestEnvironment {
            targets: vec![
                Target {
                    id: "fail".into(),
                    name: "Fail".into(),
                    args: vec![],
                    script: Arc::new(SyncScript(fail)),
                },
                Target {
                    id: "count".into(),
                    name: "Count".into(),
                    args: vec![ArgSpec::optional("label", ArgKind::String)],
                    script: Arc::new(SyncScript(count)),
                },
            ],
        }));
        EffectEngine::new(Arc::new(registry))
    }

    fn effect(id: &str, env: &str, target: &str, args: serde_json::Value) -> Effect {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("Effect {id}"),
            "trigger": "execution-success",
            "targetEnvironmentId": env,
            "targetId": target,
            "args": args
        }))
        .unwrap()
    }

    fn batch<'a>(
        effects: &'a [Effect],
        source: &'a EffectSource,
        stores: &'a ScopedStores,
        enabled: bool,
    ) -> EffectBatch<'a> {
        EffectBatch {
            session_id: "s1",
            effects,
            trigger: EffectTrigger::ExecutionSuccess,
            source,
            session_stores: stores,
            enabled,
            now_ms: 0,
        }
    }

    fn source() -> EffectSource {
        EffectSource::execution("red", "red-leaf", "red-leaf-a")
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_effects() {
        let engine = engine();
        let mut mission = mission();
        let effects = vec![
            effect("e1", "test", "fail", json!({})),
            effect("e2", "missing-env", "x", json!({})),
            effect("e3", "internal", "block-status", json!({})),
            effect(
                "e4",
                "internal",
                "output-message",
                json!({"message": "still here"}),
            ),
        ];
        let stores = ScopedStores::new();
        let src = source();
        let report = engine.apply(&mut mission, batch(&effects, &src, &stores, true)).await;

        assert_eq!(report.failed, 3);
        assert_eq!(report.applied, 1);
        assert!(matches!(report.enacted.as_slice(), [Enacted::Output(o)] if o.message == "still here"));
        assert_eq!(mission.force("red").unwrap().outputs.len(), 1);
    }

    #[tokio::test]
    async fn disabled_effects_short_circuit() {
        let engine = engine();
        let mut mission = mission();
        let effects = vec![effect("e1", "test", "count", json!({}))];
        let stores = ScopedStores::new();
        let src = source();
        let report = engine.apply(&mut mission, batch(&effects, &src, &stores, false)).await;
        assert_eq!((report.applied, report.failed), (0, 0));
        assert!(stores.for_environment("test").is_empty());
    }

    #[tokio::test]
    async fn only_matching_trigger_runs() {
        let engine = engine();
        let mut mission = mission();
        let mut other = effect("e1", "test", "count", json!({}));
        other.trigger = EffectTrigger::ExecutionFailure;
        let effects = vec![other];
        let stores = ScopedStores::new();
        let src = source();
        let report = engine.apply(&mut mission, batch(&effects, &src, &stores, true)).await;
        assert_eq!(report.applied, 0);
    }

    #[tokio::test]
    async fn stores_are_scoped() {
        let engine = engine();
        let mut mission = mission();
        let effects = vec![effect("e1", "test", "count", json!({}))];
        let session_a = ScopedStores::new();
        let session_b = ScopedStores::new();
        let src = source();
        engine.apply(&mut mission, batch(&effects, &src, &session_a, true)).await;
        engine.apply(&mut mission, batch(&effects, &src, &session_a, true)).await;
        engine.apply(&mut mission, batch(&effects, &src, &session_b, true)).await;

        assert_eq!(session_a.for_environment("test").get("count"), Some(json!(2)));
        assert_eq!(session_b.for_environment("test").get("count"), Some(json!(1)));
        assert_eq!(
            engine.environments().environment_store("test").get("count"),
            Some(json!(3))
        );
    }

    #[tokio::test]
    async fn later_effects_see_earlier_mutations() {
        let engine = engine();
        let mut mission = mission();
        let effects = vec![
            effect(
                "e1",
                "internal",
                "open-status",
                json!({"nodeKey": "red-root", "opened": true}),
            ),
            effect(
                "e2",
                "internal",
                "open-status",
                json!({"nodeKey": "red-root", "opened": true}),
            ),
        ];
        let stores = ScopedStores::new();
        let src = source();
        let report = engine.apply(&mut mission, batch(&effects, &src, &stores, true)).await;
        assert_eq!(report.applied, 2);
        // second open is a no-op transition
        assert_eq!(report.enacted.len(), 1);
        assert!(mission.force("red").unwrap().node("red-root").unwrap().is_opened());
    }

    #[test]
    fn stale_mutations_are_dropped() {
        let mut mission = mission();
        let dropped = apply_mutation(
            &mut mission,
            Mutation::BlockStatus {
                force_id: "red".into(),
                node_id: "gone".into(),
                blocked: true,
            },
            0,
        );
        assert!(dropped.is_none());
        let dropped = apply_mutation(
            &mut mission,
            Mutation::ResourcePool {
                force_id: "green".into(),
                delta: 5,
            },
            0,
        );
        assert!(dropped.is_none());
    }

    #[test]
    fn chance_modifier_decides_later_executions() {
        let mut mission = mission();
        let enacted = apply_mutation(
            &mut mission,
            Mutation::SuccessChance {
                force_id: "red".into(),
                node_id: "red-side".into(),
                action_id: Some("red-side-a".into()),
                delta: -1.0,
            },
            0,
        );
        assert!(enacted.is_some());

        let force = mission.force_mut("red").unwrap();
        force.node_mut("red-root").unwrap().set_opened(true);
        let opts = ExecutionOptions {
            infinite_resources: true,
            ..ExecutionOptions::default()
        };
        let mut successes = 0;
        let mut runs = 0;
        while let Ok(exec) = force.execute("red-side", "red-side-a", &opts) {
            let outcome = force.complete_execution("red-side", &exec.id, 1).unwrap();
            runs += 1;
            successes += usize::from(outcome.successful);
        }
        assert_eq!(runs, 10);
        assert_eq!(successes, 0);
    }

    #[test]
    fn node_scoped_modifier_touches_every_action() {
        let mut mission = mission();
        let enacted = apply_mutation(
            &mut mission,
            Mutation::ProcessTime {
                force_id: "red".into(),
                node_id: "red-leaf".into(),
                action_id: None,
                delta: 500,
            },
            0,
        );
        assert!(matches!(enacted, Some(Enacted::Modifier(Modifier { kind: "process-time", .. }))));
        let node = mission.force("red").unwrap().node("red-leaf").unwrap();
        assert!(node.actions.values().all(|a| a.process_time == 1_500));
    }
}
