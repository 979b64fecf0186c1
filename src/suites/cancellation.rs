//! Cancellation suite: in-flight calls stop when asked

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::checker::{run_case, CaseOutcome, TestContext, TestSuite, TestSuiteResult};
use crate::error::Result;
use crate::mcp::types::{NOTIF_CANCELLED, NOTIF_PROGRESS};
use crate::suites::{arguments_from_schema, ensure_session};

/// Starts a streaming invocation, sends `notifications/cancelled` after
/// the first progress delta, and verifies the target stops: the result
/// arrives promptly and is marked partial, and no further deltas trail in
/// after it.
///
/// Needs a tool marked `streaming` in the expectations; skips otherwise.
pub struct CancellationSuite;

/// Progress token attached to the probe call; the cancellation
/// notification carries the same token so targets can correlate it.
const PROGRESS_TOKEN: &str = "mcprobe-cancel-probe";

/// How long after the result the suite keeps listening for late deltas.
const LATE_DELTA_GRACE: Duration = Duration::from_millis(300);

#[async_trait::async_trait]
impl TestSuite for CancellationSuite {
    fn name(&self) -> &'static str {
        "cancellation"
    }

    fn description(&self) -> &'static str {
        "cancel notifications stop streaming invocations"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["core", "streaming", "cancellation"]
    }

    async fn setup(&self, context: &TestContext) -> Result<()> {
        ensure_session(context).await.map(|_| ())
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        let started = Instant::now();
        let mut cases = Vec::new();

        let tools = context.client.list_tools().await?;
        let streaming_tool = context
            .config
            .expectations
            .tools
            .iter()
            .filter(|expectation| expectation.streaming)
            .filter_map(|expectation| tools.iter().find(|t| t.name == expectation.name))
            .next();

        let Some(tool) = streaming_tool else {
            cases.push(
                run_case("cancel", async {
                    Ok(CaseOutcome::Skipped(
                        "no advertised tool is marked streaming in the expectations".into(),
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

        let tool_name = tool.name.clone();
        let schema = tool.input_schema.clone();
        let client = &context.client;
        let stream_timeout = context.stream_timeout();

        cases.push(
            run_case("cancel", async {
                let mut arguments = arguments_from_schema(&schema);
                if let Value::Object(map) = &mut arguments {
                    map.insert("progressToken".to_string(), json!(PROGRESS_TOKEN));
                }

                let mut notifications = client.subscribe_notifications();
                let call =
                    client.call_tool_with_timeout(&tool_name, Some(arguments), stream_timeout);
                tokio::pin!(call);

                // Wait for the first delta, then cancel.
                let mut deltas_before_cancel = 0usize;
                let mut cancelled = false;
                let result = loop {
                    tokio::select! {
                        outcome = &mut call => break outcome?,
                        notification = notifications.recv() => {
                            if let Some(n) = notification {
                                if n.method == NOTIF_PROGRESS {
                                    deltas_before_cancel += 1;
                                    if !cancelled {
                                        cancelled = true;
                                        client
                                            .notify(
                                                NOTIF_CANCELLED,
                                                json!({"progressToken": PROGRESS_TOKEN}),
                                            )
                                            .await?;
                                    }
                                }
                            }
                        }
                    }
                };

                // No further deltas may trail in after the partial result.
                let mut late_deltas = 0usize;
                let grace_deadline = tokio::time::Instant::now() + LATE_DELTA_GRACE;
                loop {
                    let remaining =
                        grace_deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match tokio::time::timeout(remaining, notifications.recv()).await {
                        Ok(Some(n)) if n.method == NOTIF_PROGRESS => late_deltas += 1,
                        Ok(Some(_)) => {}
                        _ => break,
                    }
                }

                let marked_partial = result.text().contains("cancelled");
                let mut warnings = Vec::new();
                if !cancelled {
                    warnings.push(
                        "tool answered before any progress delta; cancellation not exercised"
                            .to_string(),
                    );
                }
                if late_deltas > 0 {
                    return Err(crate::error::CheckError::Validation(format!(
                        "{late_deltas} progress delta(s) arrived after the cancelled result"
                    ))
                    .into());
                }
                if cancelled && !marked_partial {
                    warnings
                        .push("result is not marked as partial after cancellation".to_string());
                }

                if warnings.is_empty() {
                    Ok(CaseOutcome::Passed(Some(json!({
                        "deltasBeforeCancel": deltas_before_cancel,
                        "markedPartial": marked_partial,
                    }))))
                } else {
                    Ok(CaseOutcome::Warning(warnings))
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
