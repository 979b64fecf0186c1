//! Chaos suites: baseline properties hold under injected faults
//!
//! Each suite isolates one chaos plugin (with the run's fixed seed, so
//! two identical runs inject identical faults), hammers the target with
//! keepalive probes, and asserts the session survives: the transport
//! stays connected and at least a share of the probes still round-trip.

use std::time::Instant;

use serde_json::json;

use crate::checker::{
    run_case, CaseOutcome, SuiteValidation, TestContext, TestSuite, TestSuiteResult,
};
use crate::config::CheckConfig;
use crate::error::{CheckError, Result};
use crate::suites::ensure_session;
use crate::transport::TransportState;

/// Keepalive probes issued per chaos suite.
const PROBE_ATTEMPTS: usize = 8;

/// Issue keepalive probes and count survivors. Errors are expected here;
/// only a dead transport or a total blackout fails the case.
async fn probe_under_chaos(context: &TestContext) -> (usize, Vec<String>) {
    let mut successes = 0usize;
    let mut observations = Vec::new();
    for attempt in 0..PROBE_ATTEMPTS {
        match context
            .client
            .ping_with_timeout(context.invoke_timeout())
            .await
        {
            Ok(()) => successes += 1,
            Err(err) => observations.push(format!("probe {attempt}: {err}")),
        }
    }
    (successes, observations)
}

fn validate_chaos_config(config: &CheckConfig, plugin: &str, configured: bool) -> SuiteValidation {
    let mut errors = Vec::new();
    if !config.chaos.enable {
        errors.push("chaos.enable must be true for chaos suites".to_string());
    }
    if config.chaos.seed.is_none() {
        errors.push("chaos.seed is required so injected faults are reproducible".to_string());
    }
    if !configured {
        errors.push(format!("chaos.{plugin} configuration is missing"));
    }
    if errors.is_empty() {
        SuiteValidation::ok()
    } else {
        SuiteValidation::invalid(errors)
    }
}

/// Shared execute body for the plugin-isolating suites.
async fn execute_with_plugin(
    suite_name: &'static str,
    plugin: &'static str,
    min_survivors: usize,
    context: &TestContext,
) -> Result<TestSuiteResult> {
    let started = Instant::now();
    let mut cases = Vec::new();

    let Some(chaos) = context.chaos.clone() else {
        cases.push(
            run_case("chaos-controller", async {
                Ok(CaseOutcome::Skipped(
                    "no chaos controller attached to this run".into(),
                ))
            })
            .await,
        );
        return Ok(TestSuiteResult::from_cases(
            suite_name,
            started.elapsed().as_millis() as u64,
            cases,
        ));
    };

    if !chaos.enable_only(plugin) {
        cases.push(
            run_case("chaos-controller", async {
                Err(CheckError::ChaosPlugin {
                    plugin: plugin.to_string(),
                    message: "plugin is not registered on the controller".to_string(),
                }
                .into())
            })
            .await,
        );
        return Ok(TestSuiteResult::from_cases(
            suite_name,
            started.elapsed().as_millis() as u64,
            cases,
        ));
    }
    chaos.enable();

    let case_name = format!("survives-{plugin}-chaos");
    let ctx = context.clone();
    let seed = chaos.seed();
    cases.push(
        run_case(&case_name, async move {
            let (successes, observations) = probe_under_chaos(&ctx).await;
            let connected = ctx.transport.state() == TransportState::Connected;
            if !connected {
                ctx.record_fixture(
                    suite_name,
                    format!("transport-died-under-{plugin}-chaos"),
                    json!({"probes": PROBE_ATTEMPTS, "seed": seed}),
                    json!({"transportState": "connected"}),
                    json!({"transportState": format!("{:?}", ctx.transport.state())}),
                );
                return Err(CheckError::Validation(format!(
                    "transport left the connected state under {plugin} chaos"
                ))
                .into());
            }
            if successes < min_survivors {
                ctx.record_fixture(
                    suite_name,
                    format!("blackout-under-{plugin}-chaos"),
                    json!({"probes": PROBE_ATTEMPTS, "seed": seed}),
                    json!({"minimumSuccesses": min_survivors}),
                    json!({"successes": successes, "observations": observations}),
                );
                return Err(CheckError::Validation(format!(
                    "only {successes}/{PROBE_ATTEMPTS} probes survived {plugin} chaos (minimum {min_survivors})"
                ))
                .into());
            }
            Ok(CaseOutcome::Passed(Some(json!({
                "seed": seed,
                "probes": PROBE_ATTEMPTS,
                "successes": successes,
                "faultsObserved": observations,
            }))))
        })
        .await,
    );

    Ok(TestSuiteResult::from_cases(
        suite_name,
        started.elapsed().as_millis() as u64,
        cases,
    ))
}

/// Restore the full plugin pipeline after an isolating suite.
async fn reset_plugins(context: &TestContext) -> Result<()> {
    if let Some(chaos) = &context.chaos {
        chaos.enable_all_plugins();
    }
    Ok(())
}

/// Baseline conformance under network faults (delays, drops, duplicates,
/// reordering, corruption).
pub struct ChaosNetworkSuite;

#[async_trait::async_trait]
impl TestSuite for ChaosNetworkSuite {
    fn name(&self) -> &'static str {
        "chaos-network"
    }

    fn description(&self) -> &'static str {
        "keepalive probes survive injected network faults"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["chaos", "network"]
    }

    fn validate(&self, config: &CheckConfig) -> SuiteValidation {
        validate_chaos_config(config, "network", config.chaos.network.is_some())
    }

    async fn setup(&self, context: &TestContext) -> Result<()> {
        ensure_session(context).await.map(|_| ())
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        execute_with_plugin(self.name(), "network", 1, context).await
    }

    async fn teardown(&self, context: &TestContext) -> Result<()> {
        reset_plugins(context).await
    }
}

/// Baseline conformance under protocol faults (aborts, malformed JSON,
/// unexpected or schema-invalid envelopes).
pub struct ChaosProtocolSuite;

#[async_trait::async_trait]
impl TestSuite for ChaosProtocolSuite {
    fn name(&self) -> &'static str {
        "chaos-protocol"
    }

    fn description(&self) -> &'static str {
        "keepalive probes survive injected protocol violations"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["chaos", "protocol"]
    }

    fn validate(&self, config: &CheckConfig) -> SuiteValidation {
        validate_chaos_config(config, "protocol", config.chaos.protocol.is_some())
    }

    async fn setup(&self, context: &TestContext) -> Result<()> {
        ensure_session(context).await.map(|_| ())
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        execute_with_plugin(self.name(), "protocol", 1, context).await
    }

    async fn teardown(&self, context: &TestContext) -> Result<()> {
        reset_plugins(context).await
    }
}
