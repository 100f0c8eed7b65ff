//! HTTP webhook environments.
//!
//! Each configured webhook becomes a target environment whose scripts POST
//! the effect invocation to an external endpoint. The endpoint may answer
//! with output messages for the source force and values for the session
//! store; an empty body is a plain acknowledgement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::EffectError;

use super::context::EffectContext;
use super::target::{ArgSpec, Target, TargetEnvironment, TargetScript};

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Maximum accepted response body in bytes.
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// One webhook environment, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Environment id referenced by effects.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Version reported to effects.
    #[serde(default = "default_version")]
    pub version: String,
    /// Endpoint receiving invocations.
    pub url: String,
    /// Request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Targets the endpoint accepts.
    #[serde(default)]
    pub targets: Vec<WebhookTargetConfig>,
}

/// One target of a webhook environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTargetConfig {
    /// Target id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Accepted arguments.
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Reply an endpoint may send back.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookReply {
    #[serde(default)]
    outputs: Vec<WebhookOutput>,
    #[serde(default)]
    store: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookOutput {
    #[serde(default)]
    force_key: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    message: String,
}

/// Target environment backed by an HTTP endpoint.
pub struct WebhookEnvironment {
    config: WebhookConfig,
    targets: Vec<Target>,
}

impl std::fmt::Debug for WebhookEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookEnvironment")
            .field("id", &self.config.id)
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

impl WebhookEnvironment {
    /// Builds the environment and its HTTP client.
    ///
    /// Redirects are not followed.
    ///
    /// # Errors
    ///
    /// Returns [`EffectError::Environment`] if the URL is invalid or the
    /// client cannot be built.
    pub fn new(config: WebhookConfig) -> Result<Self, EffectError> {
        let env_error = |message: String| EffectError::Environment {
            environment: config.id.clone(),
            message,
        };
        reqwest::Url::parse(&config.url).map_err(|e| env_error(format!("invalid url: {e}")))?;
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| env_error(e.to_string()))?;

        let request = Arc::new(WebhookRequest {
            client,
            environment_id: config.id.clone(),
            url: config.url.clone(),
            timeout: Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            headers: config.headers.clone(),
        });
        let targets = config
            .targets
            .iter()
            .map(|t| Target {
                id: t.id.clone(),
                name: t.name.clone().unwrap_or_else(|| t.id.clone()),
                args: t.args.clone(),
                script: Arc::new(WebhookScript {
                    request: Arc::clone(&request),
                    target_id: t.id.clone(),
                }),
            })
            .collect();
        Ok(Self { config, targets })
    }
}

#[async_trait]
impl TargetEnvironment for WebhookEnvironment {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.config.id)
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn targets(&self) -> &[Target] {
        &self.targets
    }
}

struct WebhookRequest {
    client: reqwest::Client,
    environment_id: String,
    url: String,
    timeout: Duration,
    headers: HashMap<String, String>,
}

impl WebhookRequest {
    fn failure(&self, message: impl Into<String>) -> EffectError {
        EffectError::Environment {
            environment: self.environment_id.clone(),
            message: message.into(),
        }
    }

    async fn send(&self, body: &Value) -> Result<WebhookReply, EffectError> {
        debug!(url = %self.url, environment = %self.environment_id, "posting effect to webhook");

        let mut req = self.client.post(&self.url).json(body);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| self.failure("request timed out"))?
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failure(format!("endpoint returned HTTP {}", status.as_u16())));
        }

        let bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| self.failure("response timed out"))?
            .map_err(|e| self.failure(e.to_string()))?;
        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(self.failure(format!(
                "response body exceeds {MAX_RESPONSE_SIZE} byte limit"
            )));
        }
        parse_reply(&bytes).map_err(|e| self.failure(e))
    }
}

fn parse_reply(bytes: &[u8]) -> Result<WebhookReply, String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(WebhookReply::default());
    }
    serde_json::from_slice(bytes).map_err(|e| format!("invalid reply: {e}"))
}

struct WebhookScript {
    request: Arc<WebhookRequest>,
    target_id: String,
}

fn invocation_body(ctx: &EffectContext<'_>, environment_id: &str, target_id: &str) -> Value {
    let effect = ctx.effect();
    let source = ctx.source();
    let mission = ctx.mission();
    json!({
        "environmentId": environment_id,
        "targetId": target_id,
        "effect": {
            "id": effect.id,
            "name": effect.name,
            "trigger": effect.trigger,
            "args": effect.args,
        },
        "mission": { "id": mission.id, "name": mission.name },
        "source": {
            "forceId": source.force_id,
            "nodeId": source.node_id,
            "actionId": source.action_id,
        },
        "timestamp": ctx.now_ms(),
    })
}

#[async_trait]
impl TargetScript for WebhookScript {
    async fn run(&self, ctx: &mut EffectContext<'_>) -> Result<(), EffectError> {
        let body = invocation_body(ctx, &self.request.environment_id, &self.target_id);
        let reply = self.request.send(&body).await?;
        for (key, value) in reply.store {
            ctx.session_store().set(key, value);
        }
        for output in reply.outputs {
            let prefix = output.prefix.as_deref().unwrap_or("Webhook");
            ctx.send_output(output.force_key.as_deref(), prefix, &output.message)?;
        }
        Ok(())
    }
}
