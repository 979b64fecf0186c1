//! Handshake suite: initialize, identity, version, capabilities

use std::time::Instant;

use serde_json::json;

use crate::checker::{
    run_case, CaseOutcome, TestContext, TestSuite, TestSuiteResult,
};
use crate::error::{CheckError, Result};
use crate::suites::{ensure_session, harness_info};
use crate::mcp::types::ClientCapabilities;

/// Verifies the MCP handshake: the `initialize` round-trip completes
/// within the connect deadline, the server identifies itself, the
/// negotiated protocol version satisfies the configured minimum, and
/// every expected capability is advertised.
pub struct HandshakeSuite;

#[async_trait::async_trait]
impl TestSuite for HandshakeSuite {
    fn name(&self) -> &'static str {
        "handshake"
    }

    fn description(&self) -> &'static str {
        "initialize round-trip, server identity, version, capabilities"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["core", "handshake"]
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        let started = Instant::now();
        let mut cases = Vec::new();

        // The handshake itself, bounded by timeouts.connect_ms. When an
        // earlier suite already initialized the shared session, the stored
        // result is asserted instead of re-initializing.
        let handshake = if let Some(result) = context.client.handshake_result() {
            cases.push(
                run_case("initialize", async {
                    Ok(CaseOutcome::Passed(Some(json!({
                        "reused": true,
                        "protocolVersion": result.protocol_version,
                    }))))
                })
                .await,
            );
            Some(result)
        } else {
            let connect_timeout = context.connect_timeout();
            let client = &context.client;
            let outcome = tokio::time::timeout(
                connect_timeout,
                client.initialize(harness_info(), ClientCapabilities::default()),
            )
            .await;
            match outcome {
                Err(_) => {
                    cases.push(
                        run_case("initialize", async {
                            Err(CheckError::ConnectTimeout {
                                timeout_ms: context.config.timeouts.connect_ms,
                                target: context.config.target.describe(),
                            }
                            .into())
                        })
                        .await,
                    );
                    None
                }
                Ok(Err(err)) => {
                    cases.push(run_case("initialize", async { Err(err) }).await);
                    None
                }
                Ok(Ok(result)) => {
                    let version = result.protocol_version.clone();
                    cases.push(
                        run_case("initialize", async move {
                            Ok(CaseOutcome::Passed(Some(json!({
                                "protocolVersion": version,
                            }))))
                        })
                        .await,
                    );
                    Some(result)
                }
            }
        };

        if let Some(handshake) = handshake {
            let server_info = handshake.server_info.clone();
            cases.push(
                run_case("server-info", async {
                    match &server_info {
                        Some(info) if !info.name.is_empty() => Ok(CaseOutcome::Passed(Some(
                            json!({"name": info.name, "version": info.version}),
                        ))),
                        Some(_) => Err(CheckError::Validation(
                            "serverInfo.name is empty".into(),
                        )
                        .into()),
                        None => Err(CheckError::Validation(
                            "initialize response carries no serverInfo".into(),
                        )
                        .into()),
                    }
                })
                .await,
            );

            let min_version = context.config.expectations.min_protocol_version.clone();
            let negotiated = handshake.protocol_version.clone();
            cases.push(
                run_case("protocol-version", async {
                    match min_version {
                        // Date-form protocol revisions order lexicographically.
                        Some(min) if negotiated.as_str() < min.as_str() => {
                            Err(CheckError::Validation(format!(
                                "negotiated protocol version {negotiated} is older than required {min}"
                            ))
                            .into())
                        }
                        _ => Ok(CaseOutcome::Passed(Some(json!({"version": negotiated})))),
                    }
                })
                .await,
            );

            let expected = context.config.expectations.capabilities.clone();
            let capabilities = handshake.capabilities.clone();
            let suite_name = self.name();
            let ctx = context.clone();
            cases.push(
                run_case("capabilities", async move {
                    let missing: Vec<&String> = expected
                        .iter()
                        .filter(|name| !capabilities.advertises(name))
                        .collect();
                    if missing.is_empty() {
                        Ok(CaseOutcome::Passed(Some(json!({"expected": expected}))))
                    } else {
                        ctx.record_fixture(
                            suite_name,
                            "missing-capabilities",
                            json!({"method": "initialize"}),
                            json!({"capabilities": expected}),
                            serde_json::to_value(&capabilities)?,
                        );
                        Err(CheckError::Validation(format!(
                            "capabilities not advertised: {missing:?}"
                        ))
                        .into())
                    }
                })
                .await,
            );
        }

        Ok(TestSuiteResult::from_cases(
            self.name(),
            started.elapsed().as_millis() as u64,
            cases,
        ))
    }
}
