//! Prometheus metrics.
//!
//! Every label value that could come from a client is checked against a
//! fixed list first, so a hostile peer cannot blow up label cardinality.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::SortieError;
use crate::transport::protocol::ErrorCode;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Client message methods accepted as label values.
const KNOWN_METHODS: [&str; 15] = [
    "request-join-session",
    "request-quit-session",
    "request-start-session",
    "request-end-session",
    "request-reset-session",
    "request-open-node",
    "request-execute-action",
    "request-send-output",
    "request-block-node",
    "request-kick",
    "request-ban",
    "request-assign-force",
    "request-assign-role",
    "request-update-session-config",
    "request-current-session",
];

/// Returns `method` if it is a known client method, `"__unknown__"` otherwise.
#[must_use]
pub fn sanitize_method_label(method: &str) -> &str {
    if KNOWN_METHODS.contains(&method) {
        method
    } else {
        "__unknown__"
    }
}

/// Installs the global recorder, with an HTTP listener on
/// `127.0.0.1:<port>` when `port` is set. Later calls are no-ops.
///
/// # Errors
///
/// Returns `SortieError::Io` if the recorder or listener cannot be installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), SortieError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| SortieError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "sortie_messages_total",
        "Client messages received, by method"
    );
    describe_counter!(
        "sortie_requests_rejected_total",
        "Requests rejected, by error code"
    );
    describe_counter!(
        "sortie_rate_limited_total",
        "Messages rejected by the per-user rate limiter"
    );
    describe_counter!(
        "sortie_executions_total",
        "Executions realized, by result"
    );
    describe_counter!("sortie_effects_total", "Effects run, by status");
    describe_gauge!("sortie_sessions_active", "Sessions in the registry");
    describe_gauge!("sortie_connections_active", "Open client connections");
}

/// Records an inbound client message.
pub fn record_message(method: &str) {
    let label = sanitize_method_label(method);
    counter!("sortie_messages_total", "method" => label.to_owned()).increment(1);
}

/// Records a rejected request.
pub fn record_rejection(code: ErrorCode) {
    counter!("sortie_requests_rejected_total", "code" => code.name()).increment(1);
}

/// Records a message dropped by the rate limiter.
pub fn record_rate_limited() {
    counter!("sortie_rate_limited_total").increment(1);
}

/// Records a realized execution outcome.
pub fn record_execution(successful: bool, aborted: bool) {
    let result = match (aborted, successful) {
        (true, _) => "aborted",
        (false, true) => "success",
        (false, false) => "failure",
    };
    counter!("sortie_executions_total", "result" => result).increment(1);
}

/// Records one effect run.
pub fn record_effect(applied: bool) {
    let status = if applied { "applied" } else { "failed" };
    counter!("sortie_effects_total", "status" => status).increment(1);
}

/// Sets the number of live sessions.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions_active(count: usize) {
    gauge!("sortie_sessions_active").set(count as f64);
}

/// Sets the number of open connections.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections_active(count: usize) {
    gauge!("sortie_connections_active").set(count as f64);
}
