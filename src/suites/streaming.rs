//! Streaming suite: progress notifications during long-running calls

use std::time::Instant;

use serde_json::{json, Value};

use crate::checker::{run_case, CaseOutcome, TestContext, TestSuite, TestSuiteResult};
use crate::error::Result;
use crate::suites::{arguments_from_schema, ensure_session};
use crate::mcp::types::NOTIF_PROGRESS;

/// Drives the tools marked `streaming` in the expectations and verifies
/// `notifications/progress` deltas arrive while the call runs.
///
/// Skips gracefully when no expected tool is marked streaming or none of
/// the marked tools are advertised by the target.
pub struct StreamingSuite;

/// Progress token the suite attaches to its invocations so deltas can be
/// correlated by targets that honour it.
const PROGRESS_TOKEN: &str = "mcprobe-stream-probe";

impl StreamingSuite {
    /// Invoke one tool and count the progress deltas observed while the
    /// call is in flight.
    pub(crate) async fn drive_streaming_call(
        context: &TestContext,
        tool_name: &str,
        schema: &Value,
    ) -> Result<(crate::mcp::types::CallToolResult, usize)> {
        let mut arguments = arguments_from_schema(schema);
        if let Value::Object(map) = &mut arguments {
            map.insert("progressToken".to_string(), json!(PROGRESS_TOKEN));
        }

        let mut notifications = context.client.subscribe_notifications();
        let call = context.client.call_tool_with_timeout(
            tool_name,
            Some(arguments),
            context.stream_timeout(),
        );
        tokio::pin!(call);

        let mut deltas = 0usize;
        let result = loop {
            tokio::select! {
                outcome = &mut call => break outcome?,
                notification = notifications.recv() => {
                    if let Some(n) = notification {
                        if n.method == NOTIF_PROGRESS {
                            deltas += 1;
                        }
                    }
                }
            }
        };

        // Deltas already queued when the result arrived still count.
        while let Ok(n) = notifications.try_recv() {
            if n.method == NOTIF_PROGRESS {
                deltas += 1;
            }
        }

        Ok((result, deltas))
    }
}

#[async_trait::async_trait]
impl TestSuite for StreamingSuite {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn description(&self) -> &'static str {
        "progress notifications during long-running tool calls"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["core", "streaming"]
    }

    async fn setup(&self, context: &TestContext) -> Result<()> {
        ensure_session(context).await.map(|_| ())
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        let started = Instant::now();
        let mut cases = Vec::new();

        let tools = context.client.list_tools().await?;
        let streaming_tools: Vec<_> = context
            .config
            .expectations
            .tools
            .iter()
            .filter(|expectation| expectation.streaming)
            .filter_map(|expectation| tools.iter().find(|t| t.name == expectation.name))
            .collect();

        if streaming_tools.is_empty() {
            cases.push(
                run_case("streaming-tools", async {
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
        }

        for tool in streaming_tools {
            let case_name = format!("stream:{}", tool.name);
            let tool_name = tool.name.clone();
            let schema = tool.input_schema.clone();
            cases.push(
                run_case(&case_name, async {
                    let (result, deltas) =
                        Self::drive_streaming_call(context, &tool_name, &schema).await?;
                    if deltas == 0 {
                        Ok(CaseOutcome::Warning(vec![format!(
                            "tool `{tool_name}` completed without emitting progress notifications"
                        )]))
                    } else {
                        Ok(CaseOutcome::Passed(Some(json!({
                            "progressDeltas": deltas,
                            "isError": result.is_error,
                        }))))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CaseStatus, FixtureStore};
    use crate::config::{CheckConfig, Target, ToolExpectation};
    use crate::mcp::McpClient;
    use crate::transport::fake::FakeTransport;
    use crate::transport::Transport;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Target whose `slow_count` tool emits three progress notifications
    /// before answering.
    fn streaming_target() -> Arc<FakeTransport> {
        let fake = FakeTransport::connected();
        fake.respond_with(move |msg| {
            let id = match msg.get("id") {
                Some(id) if !id.is_null() => id.clone(),
                _ => return vec![],
            };
            match msg["method"].as_str() {
                Some("initialize") => vec![json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2025-11-25",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "t", "version": "1"}
                    }
                })],
                Some("tools/list") => vec![json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"tools": [
                        {"name": "slow_count", "description": "counts with progress",
                         "inputSchema": {"type": "object", "properties": {"count": {"type": "integer"}}}},
                        {"name": "echo", "description": "echoes",
                         "inputSchema": {"type": "object"}}
                    ]}
                })],
                Some("tools/call") if msg["params"]["name"] == "slow_count" => {
                    let mut out = Vec::new();
                    for i in 1..=3 {
                        out.push(json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/progress",
                            "params": {"progressToken": PROGRESS_TOKEN, "progress": i, "total": 3}
                        }));
                    }
                    out.push(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {"content": [{"type": "text", "text": "3"}], "isError": false}
                    }));
                    out
                }
                Some("tools/call") => vec![json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [{"type": "text", "text": "ok"}], "isError": false}
                })],
                _ => vec![],
            }
        });
        fake
    }

    async fn context_for(
        transport: Arc<FakeTransport>,
        expectations: Vec<ToolExpectation>,
    ) -> TestContext {
        let mut config = CheckConfig::for_target(Target::Stdio {
            command: "server".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            shell: false,
        });
        config.expectations.tools = expectations;
        config.timeouts.stream_ms = 1_000;
        let client = McpClient::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Duration::from_secs(1),
        );
        let context = TestContext {
            config: Arc::new(config),
            transport,
            client,
            chaos: None,
            fixtures: FixtureStore::new(),
        };
        ensure_session(&context).await.unwrap();
        context
    }

    fn streaming_expectation(name: &str) -> ToolExpectation {
        ToolExpectation {
            name: name.to_string(),
            required: false,
            streaming: true,
            delay_arg: None,
        }
    }

    #[tokio::test]
    async fn test_progress_deltas_counted() {
        let context =
            context_for(streaming_target(), vec![streaming_expectation("slow_count")]).await;

        let result = StreamingSuite.execute(&context).await.unwrap();
        assert_eq!(result.status, CaseStatus::Passed, "cases: {:?}", result.cases);
        let case = &result.cases[0];
        assert_eq!(case.name, "stream:slow_count");
        assert_eq!(case.details.as_ref().unwrap()["progressDeltas"], 3);
    }

    #[tokio::test]
    async fn test_no_streaming_expectations_skips() {
        let context = context_for(streaming_target(), vec![]).await;
        let result = StreamingSuite.execute(&context).await.unwrap();
        assert_eq!(result.cases.len(), 1);
        assert_eq!(result.cases[0].status, CaseStatus::Skipped);
    }

    #[tokio::test]
    async fn test_non_streaming_tool_warns() {
        // `echo` answers without any progress notifications.
        let context = context_for(streaming_target(), vec![streaming_expectation("echo")]).await;
        let result = StreamingSuite.execute(&context).await.unwrap();
        assert_eq!(result.status, CaseStatus::Warning);
        assert_eq!(result.cases[0].status, CaseStatus::Warning);
    }
}
