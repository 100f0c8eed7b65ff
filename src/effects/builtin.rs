//! The built-in `internal` environment.
//!
//! Its targets are thin wrappers over the context mutators, so missions can
//! script the runtime itself without an external service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EffectError;

use super::context::EffectContext;
use super::target::{ArgKind, ArgSpec, SyncScript, Target, TargetEnvironment};

/// Id effects use to reach this environment.
pub const INTERNAL_ENVIRONMENT_ID: &str = "internal";

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment whose targets mutate the running mission.
#[derive(Debug)]
pub struct InternalEnvironment {
    targets: Vec<Target>,
}

impl Default for InternalEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl InternalEnvironment {
    /// Creates the environment with every built-in target.
    #[must_use]
    pub fn new() -> Self {
        let node_scope = || {
            vec![
                ArgSpec::optional("forceKey", ArgKind::String),
                ArgSpec::optional("nodeKey", ArgKind::String),
            ]
        };
        let action_scope = |delta: ArgKind| {
            let mut args = node_scope();
            args.push(ArgSpec::optional("actionKey", ArgKind::String));
            args.push(ArgSpec::required("delta", delta));
            args
        };

        let targets = vec![
            target(
                "output-message",
                "Output Message",
                vec![
                    ArgSpec::optional("forceKey", ArgKind::String),
                    ArgSpec::optional("prefix", ArgKind::String),
                    ArgSpec::required("message", ArgKind::String),
                ],
                output_message,
            ),
            target(
                "block-status",
                "Block Status",
                with(node_scope(), ArgSpec::required("blocked", ArgKind::Boolean)),
                block_status,
            ),
            target(
                "open-status",
                "Open Status",
                with(node_scope(), ArgSpec::required("opened", ArgKind::Boolean)),
                open_status,
            ),
            target(
                "success-chance",
                "Success Chance",
                action_scope(ArgKind::Number),
                success_chance,
            ),
            target(
                "process-time",
                "Process Time",
                action_scope(ArgKind::Integer),
                process_time,
            ),
            target(
                "resource-cost",
                "Resource Cost",
                action_scope(ArgKind::Integer),
                resource_cost,
            ),
            target(
                "resource-pool",
                "Resource Pool",
                vec![
                    ArgSpec::optional("forceKey", ArgKind::String),
                    ArgSpec::required("delta", ArgKind::Integer),
                ],
                resource_pool,
            ),
            target(
                "file-access",
                "File Access",
                vec![
                    ArgSpec::required("fileId", ArgKind::String),
                    ArgSpec::optional("forceKey", ArgKind::String),
                    ArgSpec::required("granted", ArgKind::Boolean),
                ],
                file_access,
            ),
        ];
        Self { targets }
    }
}

#[async_trait]
impl TargetEnvironment for InternalEnvironment {
    fn id(&self) -> &str {
        INTERNAL_ENVIRONMENT_ID
    }

    fn name(&self) -> &str {
        "Internal"
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn targets(&self) -> &[Target] {
        &self.targets
    }
}

fn target(
    id: &str,
    name: &str,
    args: Vec<ArgSpec>,
    script: fn(&mut EffectContext<'_>) -> Result<(), EffectError>,
) -> Target {
    Target {
        id: id.to_string(),
        name: name.to_string(),
        args,
        script: Arc::new(SyncScript(script)),
    }
}

fn with(mut args: Vec<ArgSpec>, extra: ArgSpec) -> Vec<ArgSpec> {
    args.push(extra);
    args
}

// ============================================================================
// Scripts
// ============================================================================

fn output_message(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let force_key = ctx.opt_str("forceKey")?;
    let prefix = ctx.opt_str("prefix")?.unwrap_or("Effect");
    let message = ctx.require_str("message")?;
    ctx.send_output(force_key, prefix, message)
}

fn block_status(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let blocked = ctx.require_bool("blocked")?;
    let (force_key, node_key) = (ctx.opt_str("forceKey")?, ctx.opt_str("nodeKey")?);
    ctx.set_block_status(force_key, node_key, blocked)
}

fn open_status(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let opened = ctx.require_bool("opened")?;
    let (force_key, node_key) = (ctx.opt_str("forceKey")?, ctx.opt_str("nodeKey")?);
    ctx.set_open_status(force_key, node_key, opened)
}

fn success_chance(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let delta = ctx.require_f64("delta")?;
    ctx.modify_success_chance(delta)
}

fn process_time(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let delta = ctx.require_i64("delta")?;
    ctx.modify_process_time(delta)
}

fn resource_cost(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let delta = ctx.require_i64("delta")?;
    ctx.modify_resource_cost(delta)
}

fn resource_pool(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let delta = ctx.require_i64("delta")?;
    let force_key = ctx.opt_str("forceKey")?;
    ctx.modify_resource_pool(force_key, delta)
}

fn file_access(ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
    let granted = ctx.require_bool("granted")?;
    let file_id = ctx.require_str("fileId")?;
    let force_key = ctx.opt_str("forceKey")?;
    ctx.set_file_access(file_id, force_key, granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::context::{EffectSource, Mutation};
    use crate::effects::store::Store;
    use crate::mission::Effect;
    use crate::mission::tests::mission;
    use serde_json::{Value, json};

    async fn run(target_id: &str, args: Value, source: &EffectSource) -> Result<Vec<Mutation>, EffectError> {
        let env = InternalEnvironment::new();
        let mission = mission();
        let effect: Effect = serde_json::from_value(json!({
            "id": "e1",
            "name": "Builtin",
            "trigger": "execution-success",
            "targetEnvironmentId": "internal",
            "targetId": target_id,
            "args": args
        }))
        .unwrap();
        let target = env.target(target_id).unwrap();
        let mut ctx = EffectContext::new(&mission, &effect, source, Store::new(), Store::new(), 0);
        target.script.run(&mut ctx).await?;
        Ok(ctx.into_mutations())
    }

    fn leaf() -> EffectSource {
        EffectSource::execution("red", "red-leaf", "red-leaf-a")
    }

    #[test]
    fn every_builtin_target_is_registered() {
        let env = InternalEnvironment::new();
        for id in [
            "output-message",
            "block-status",
            "open-status",
            "success-chance",
            "process-time",
            "resource-cost",
            "resource-pool",
            "file-access",
        ] {
            assert!(env.target(id).is_some(), "missing target {id}");
        }
        assert_eq!(env.id(), INTERNAL_ENVIRONMENT_ID);
    }

    #[tokio::test]
    async fn output_message_defaults_prefix() {
        let mutations = run("output-message", json!({"message": "Breach detected"}), &leaf())
            .await
            .unwrap();
        assert_eq!(
            mutations,
            vec![Mutation::SendOutput {
                force_id: "red".into(),
                prefix: "Effect".into(),
                message: "Breach detected".into(),
            }]
        );
    }

    #[tokio::test]
    async fn block_status_targets_named_node() {
        let mutations = run(
            "block-status",
            json!({"forceKey": "blue", "nodeKey": "blue-root", "blocked": true}),
            &leaf(),
        )
        .await
        .unwrap();
        assert_eq!(
            mutations,
            vec![Mutation::BlockStatus {
                force_id: "blue".into(),
                node_id: "blue-root".into(),
                blocked: true,
            }]
        );
    }

    #[tokio::test]
    async fn resource_pool_needs_a_force() {
        let err = run("resource-pool", json!({"delta": 5}), &EffectSource::session())
            .await
            .unwrap_err();
        assert!(matches!(err, EffectError::Unresolved { kind: "force", .. }));
    }

    #[tokio::test]
    async fn file_access_grants() {
        let mutations = run(
            "file-access",
            json!({"fileId": "file-1", "forceKey": "blue", "granted": true}),
            &leaf(),
        )
        .await
        .unwrap();
        assert_eq!(mutations.len(), 1);
    }
}
