//! Built-in test suites
//!
//! Each suite is a self-contained [`TestSuite`] addressing one property
//! of the target: the handshake, tool discovery, tool invocation,
//! streaming, timeout handling, cancellation, and behaviour under chaos.
//!
//! Suites share one session: the first to run performs the MCP handshake
//! through [`ensure_session`] and later suites reuse it.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::checker::{Checker, TestContext, TestSuite};
use crate::error::Result;
use crate::mcp::types::{ClientCapabilities, Implementation, InitializeResult};

pub mod cancellation;
pub mod chaos;
pub mod handshake;
pub mod streaming;
pub mod timeout;
pub mod tool_discovery;
pub mod tool_invocation;

pub use cancellation::CancellationSuite;
pub use chaos::{ChaosNetworkSuite, ChaosProtocolSuite};
pub use handshake::HandshakeSuite;
pub use streaming::StreamingSuite;
pub use timeout::TimeoutSuite;
pub use tool_discovery::ToolDiscoverySuite;
pub use tool_invocation::ToolInvocationSuite;

/// Every built-in suite, in canonical registration order.
pub fn builtin_suites() -> Vec<Arc<dyn TestSuite>> {
    vec![
        Arc::new(HandshakeSuite),
        Arc::new(ToolDiscoverySuite),
        Arc::new(ToolInvocationSuite),
        Arc::new(StreamingSuite),
        Arc::new(TimeoutSuite),
        Arc::new(CancellationSuite),
        Arc::new(ChaosNetworkSuite),
        Arc::new(ChaosProtocolSuite),
    ]
}

/// Register every built-in suite on a checker.
pub fn register_builtin(checker: &Checker) {
    for suite in builtin_suites() {
        checker.register_suite(suite);
    }
}

/// The identity this harness presents during the handshake.
pub(crate) fn harness_info() -> Implementation {
    Implementation {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Reuse the shared session, performing the handshake if no suite has yet.
///
/// Suites call this from `setup`, so a target that cannot complete the
/// handshake fails every dependent suite at the setup phase rather than
/// mid-probe.
pub(crate) async fn ensure_session(context: &TestContext) -> Result<InitializeResult> {
    if let Some(result) = context.client.handshake_result() {
        return Ok(result);
    }
    let handshake = tokio::time::timeout(
        context.connect_timeout(),
        context
            .client
            .initialize(harness_info(), ClientCapabilities::default()),
    )
    .await
    .map_err(|_| crate::error::CheckError::ConnectTimeout {
        timeout_ms: context.config.timeouts.connect_ms,
        target: context.config.target.describe(),
    })??;
    Ok(handshake)
}

/// Build minimal arguments satisfying a JSON-schema-like `inputSchema`.
///
/// Only required properties receive values; each gets a type-appropriate
/// placeholder. Schemas without required properties produce an empty
/// object so no-arg tools are exercised uniformly.
pub(crate) fn arguments_from_schema(schema: &Value) -> Value {
    let mut arguments = Map::new();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let properties = schema.get("properties").and_then(Value::as_object);

    for name in required {
        let placeholder = properties
            .and_then(|props| props.get(name))
            .map_or(Value::Null, placeholder_for);
        arguments.insert(name.to_string(), placeholder);
    }
    Value::Object(arguments)
}

fn placeholder_for(property: &Value) -> Value {
    match property.get("type").and_then(Value::as_str) {
        Some("string") => json!("probe"),
        Some("number") => json!(1),
        Some("integer") => json!(1),
        Some("boolean") => json!(false),
        Some("array") => json!([]),
        Some("object") => json!({}),
        _ => Value::Null,
    }
}
