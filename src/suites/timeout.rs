//! Timeout suite: the client honours the invoke deadline

use std::time::Instant;

use serde_json::{json, Value};

use crate::checker::{run_case, CaseOutcome, TestContext, TestSuite, TestSuiteResult};
use crate::error::{CheckError, Result};
use crate::suites::{arguments_from_schema, ensure_session};

/// Verifies deadline handling: repeated quick calls record their latency
/// variance, progressively delayed calls still complete inside the invoke
/// deadline, and a delay beyond the deadline makes the client give up
/// with an invocation timeout.
///
/// Delay probes need a tool with a configured `delay_arg` (a numeric
/// argument interpreted as milliseconds); without one, only the variance
/// probe runs. Skips entirely when the target advertises no tools.
pub struct TimeoutSuite;

const VARIANCE_SAMPLES: usize = 3;

#[async_trait::async_trait]
impl TestSuite for TimeoutSuite {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn description(&self) -> &'static str {
        "latency variance and enforcement of the invoke deadline"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["core", "timeouts"]
    }

    async fn setup(&self, context: &TestContext) -> Result<()> {
        ensure_session(context).await.map(|_| ())
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        let started = Instant::now();
        let mut cases = Vec::new();

        let tools = context.client.list_tools().await?;
        if tools.is_empty() {
            cases.push(
                run_case("timeouts", async {
                    Ok(CaseOutcome::Skipped("target advertises no tools".into()))
                })
                .await,
            );
            return Ok(TestSuiteResult::from_cases(
                self.name(),
                started.elapsed().as_millis() as u64,
                cases,
            ));
        }

        // Latency variance across repeated identical calls.
        let probe = &tools[0];
        let probe_args = arguments_from_schema(&probe.input_schema);
        let client = &context.client;
        let invoke_timeout = context.invoke_timeout();
        let probe_name = probe.name.clone();
        cases.push(
            run_case("latency-variance", async {
                let mut durations_ms = Vec::with_capacity(VARIANCE_SAMPLES);
                for _ in 0..VARIANCE_SAMPLES {
                    let call_started = Instant::now();
                    let outcome = client
                        .call_tool_with_timeout(
                            &probe_name,
                            Some(probe_args.clone()),
                            invoke_timeout,
                        )
                        .await;
                    match outcome {
                        Ok(_) => {}
                        Err(err) => match err.downcast_ref::<CheckError>() {
                            // A tool-level error still bounds the latency.
                            Some(CheckError::Rpc { .. }) => {}
                            _ => return Err(err),
                        },
                    }
                    durations_ms.push(call_started.elapsed().as_millis() as u64);
                }
                let mean = durations_ms.iter().sum::<u64>() as f64 / durations_ms.len() as f64;
                let variance = durations_ms
                    .iter()
                    .map(|d| {
                        let delta = *d as f64 - mean;
                        delta * delta
                    })
                    .sum::<f64>()
                    / durations_ms.len() as f64;
                Ok(CaseOutcome::Passed(Some(json!({
                    "samples": durations_ms,
                    "meanMs": mean,
                    "varianceMs2": variance,
                }))))
            })
            .await,
        );

        // Delay probes need a tool that sleeps on request.
        let delay_tool = context
            .config
            .expectations
            .tools
            .iter()
            .filter_map(|expectation| {
                let arg = expectation.delay_arg.as_deref()?;
                let tool = tools.iter().find(|t| t.name == expectation.name)?;
                Some((tool, arg.to_string()))
            })
            .next();

        let Some((delay_tool, delay_arg)) = delay_tool else {
            cases.push(
                run_case("progressive-delays", async {
                    Ok(CaseOutcome::Skipped(
                        "no expected tool declares a delayArg".into(),
                    ))
                })
                .await,
            );
            return Ok(TestSuiteResult::from_cases(
                self.name(),
                started.elapsed().as_millis() as u64,
                cases,
            ));
        };

        let invoke_ms = context.config.timeouts.invoke_ms;
        let delay_name = delay_tool.name.clone();
        let delay_schema = delay_tool.input_schema.clone();

        let make_args = |delay_ms: u64| -> Value {
            let mut arguments = arguments_from_schema(&delay_schema);
            if let Value::Object(map) = &mut arguments {
                map.insert(delay_arg.clone(), json!(delay_ms));
            }
            arguments
        };

        // Delays below the deadline must all complete.
        let progressive = [0, invoke_ms / 8, invoke_ms / 4];
        let name = delay_name.clone();
        cases.push(
            run_case("progressive-delays", async {
                let mut observed = Vec::new();
                for delay_ms in progressive {
                    let call_started = Instant::now();
                    client
                        .call_tool_with_timeout(&name, Some(make_args(delay_ms)), invoke_timeout)
                        .await?;
                    observed.push(json!({
                        "requestedDelayMs": delay_ms,
                        "elapsedMs": call_started.elapsed().as_millis() as u64,
                    }));
                }
                Ok(CaseOutcome::Passed(Some(json!({"calls": observed}))))
            })
            .await,
        );

        // A delay beyond the deadline must fail with an invocation
        // timeout, at roughly the deadline rather than the full delay.
        let name = delay_name.clone();
        let ctx = context.clone();
        let suite_name = self.name();
        cases.push(
            run_case("honours-invoke-ms", async {
                let excessive = invoke_ms * 2;
                let call_started = Instant::now();
                let outcome = client
                    .call_tool_with_timeout(&name, Some(make_args(excessive)), invoke_timeout)
                    .await;
                let elapsed_ms = call_started.elapsed().as_millis() as u64;
                match outcome {
                    Err(err)
                        if matches!(
                            err.downcast_ref::<CheckError>(),
                            Some(CheckError::InvocationTimeout { .. })
                        ) =>
                    {
                        Ok(CaseOutcome::Passed(Some(json!({
                            "requestedDelayMs": excessive,
                            "gaveUpAfterMs": elapsed_ms,
                        }))))
                    }
                    Err(err) => Err(err),
                    Ok(_) => {
                        ctx.record_fixture(
                            suite_name,
                            "deadline-not-enforced",
                            json!({"tool": name, "requestedDelayMs": excessive}),
                            json!({"invocationTimeoutAfterMs": invoke_ms}),
                            json!({"completedAfterMs": elapsed_ms}),
                        );
                        Err(CheckError::Validation(format!(
                            "call with a {excessive} ms delay completed in {elapsed_ms} ms instead of timing out at {invoke_ms} ms"
                        ))
                        .into())
                    }
                }
            })
            .await,
        );

        Ok(TestSuiteResult::from_cases(
            self.name(),
            started.elapsed().as_millis() as u64,
            cases,
        ))
    }
}
