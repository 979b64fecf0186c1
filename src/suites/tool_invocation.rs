//! Tool-invocation suite: every discovered tool answers

use std::time::Instant;

use serde_json::json;

use crate::checker::{run_case, CaseOutcome, TestContext, TestSuite, TestSuiteResult};
use crate::error::{CheckError, Result};
use crate::suites::{arguments_from_schema, ensure_session};

/// Invokes every discovered tool with schema-derived minimal arguments.
///
/// The property under test is responsiveness, not tool semantics: a
/// legitimate JSON-RPC error is a pass (the tool answered), while a
/// transport-level timeout is a failure.
pub struct ToolInvocationSuite;

#[async_trait::async_trait]
impl TestSuite for ToolInvocationSuite {
    fn name(&self) -> &'static str {
        "tool-invocation"
    }

    fn description(&self) -> &'static str {
        "schema-derived invocation of every discovered tool"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["core", "tools"]
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
                run_case("invoke", async {
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

        for tool in &tools {
            let case_name = format!("invoke:{}", tool.name);
            let arguments = arguments_from_schema(&tool.input_schema);
            let client = &context.client;
            let invoke_timeout = context.invoke_timeout();
            let ctx = context.clone();
            let suite_name = self.name();
            let tool_name = tool.name.clone();

            cases.push(
                run_case(&case_name, async move {
                    let outcome = client
                        .call_tool_with_timeout(
                            &tool_name,
                            Some(arguments.clone()),
                            invoke_timeout,
                        )
                        .await;
                    match outcome {
                        Ok(result) => Ok(CaseOutcome::Passed(Some(json!({
                            "isError": result.is_error,
                            "contentItems": result.content.len(),
                        })))),
                        Err(err) => match err.downcast_ref::<CheckError>() {
                            // The tool answered; that is the property under test.
                            Some(CheckError::Rpc { code, message, .. }) => {
                                Ok(CaseOutcome::Passed(Some(json!({
                                    "respondedWithError": {"code": code, "message": message},
                                }))))
                            }
                            Some(CheckError::InvocationTimeout { .. }) => {
                                ctx.record_fixture(
                                    suite_name,
                                    format!("invocation-timeout-{tool_name}"),
                                    json!({
                                        "method": "tools/call",
                                        "name": tool_name,
                                        "arguments": arguments,
                                    }),
                                    json!("a response within the invoke deadline"),
                                    json!("no response"),
                                );
                                Err(err)
                            }
                            _ => Err(err),
                        },
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
