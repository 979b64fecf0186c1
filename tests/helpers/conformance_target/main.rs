//! Conformance target binary for integration tests
//!
//! A minimal MCP server speaking newline-delimited JSON over
//! stdin/stdout, used exclusively by the integration tests to exercise
//! the harness without an external server.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol version `2025-11-25`, `tools` capability,
//!   identifies itself as `conformance-target`.
//! - `notifications/initialized` -- acknowledged silently.
//! - `tools/list` -- four tools: `echo` (string message), `add` (two
//!   numbers), `sleep` (delays its reply by `delayMs`), `slow_count`
//!   (emits `notifications/progress` deltas and honours cancellation).
//! - `tools/call` -- dispatches to the tool implementations.
//! - `notifications/cancelled` -- marks the carried `progressToken` so a
//!   running `slow_count` stops and returns a partial result.
//! - `ping` -- empty result.
//! - everything else -- JSON-RPC `-32601 Method not found`.
//!
//! Long-running tools execute on worker threads so cancellation
//! notifications are read while they run; all writes funnel through one
//! mutex-guarded stdout handle so frames never interleave.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Interval between `slow_count` progress deltas.
const COUNT_TICK: Duration = Duration::from_millis(50);

type SharedWriter = Arc<Mutex<io::Stdout>>;
type CancelSet = Arc<Mutex<HashSet<String>>>;

fn main() {
    let stdin = io::stdin();
    let writer: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let cancelled: CancelSet = Arc::new(Mutex::new(HashSet::new()));

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                write_message(
                    &writer,
                    &serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": {"code": -32700, "message": "Parse error"}
                    }),
                );
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        match method {
            "notifications/initialized" => {}
            "notifications/cancelled" => {
                if let Some(token) = request
                    .get("params")
                    .and_then(|p| p.get("progressToken"))
                    .and_then(|t| t.as_str())
                {
                    cancelled.lock().unwrap().insert(token.to_string());
                }
            }
            "initialize" => write_message(&writer, &handle_initialize(&id)),
            "tools/list" => write_message(&writer, &handle_tools_list(&id)),
            "tools/call" => handle_tools_call(&id, &request, &writer, &cancelled),
            "ping" => write_message(
                &writer,
                &serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            ),
            _ => write_message(
                &writer,
                &make_error(&id, -32601, &format!("Method not found: {}", method)),
            ),
        }
    }
}

/// Serialize one message and write it as a single line.
fn write_message(writer: &SharedWriter, message: &serde_json::Value) {
    let serialized = match serde_json::to_string(message) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("conformance_target: failed to serialize response: {}", e);
            return;
        }
    };
    let mut out = writer.lock().unwrap();
    let _ = writeln!(out, "{}", serialized);
    let _ = out.flush();
}

/// Handle the `initialize` request.
fn handle_initialize(id: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2025-11-25",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "conformance-target",
                "version": "0.1.0"
            }
        }
    })
}

/// Handle the `tools/list` request.
fn handle_tools_list(id: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": [
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "message": {"type": "string"}
                        }
                    }
                },
                {
                    "name": "add",
                    "description": "Adds two numbers",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "a": {"type": "number"},
                            "b": {"type": "number"}
                        },
                        "required": ["a", "b"]
                    }
                },
                {
                    "name": "sleep",
                    "description": "Replies after delayMs milliseconds",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "delayMs": {"type": "integer"}
                        }
                    }
                },
                {
                    "name": "slow_count",
                    "description": "Counts to `count`, emitting progress notifications",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "count": {"type": "integer"},
                            "progressToken": {"type": "string"}
                        }
                    }
                }
            ]
        }
    })
}

/// Dispatch a `tools/call` request, spawning workers for slow tools.
fn handle_tools_call(
    id: &serde_json::Value,
    request: &serde_json::Value,
    writer: &SharedWriter,
    cancelled: &CancelSet,
) {
    let params = request.get("params").cloned().unwrap_or(serde_json::Value::Null);
    let tool = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::json!({}));

    match tool {
        "echo" => {
            let message = args.get("message").and_then(|m| m.as_str()).unwrap_or("");
            write_message(writer, &text_result(id, message));
        }
        "add" => {
            let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
            write_message(writer, &text_result(id, &format!("{}", a + b)));
        }
        "sleep" => {
            let delay_ms = args.get("delayMs").and_then(|v| v.as_u64()).unwrap_or(0);
            let id = id.clone();
            let writer = Arc::clone(writer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                write_message(&writer, &text_result(&id, &format!("slept {}", delay_ms)));
            });
        }
        "slow_count" => {
            let count = args.get("count").and_then(|v| v.as_u64()).unwrap_or(10);
            let token = args
                .get("progressToken")
                .and_then(|t| t.as_str())
                .unwrap_or("")
                .to_string();
            let id = id.clone();
            let writer = Arc::clone(writer);
            let cancelled = Arc::clone(cancelled);
            thread::spawn(move || run_slow_count(&id, count, &token, &writer, &cancelled));
        }
        other => {
            write_message(
                writer,
                &make_error(id, -32602, &format!("Unknown tool: {}", other)),
            );
        }
    }
}

/// Emit progress deltas until done or cancelled; cancellation yields a
/// partial result marked `(cancelled)`.
fn run_slow_count(
    id: &serde_json::Value,
    count: u64,
    token: &str,
    writer: &SharedWriter,
    cancelled: &CancelSet,
) {
    for i in 1..=count {
        if !token.is_empty() && cancelled.lock().unwrap().contains(token) {
            write_message(
                writer,
                &text_result(id, &format!("counted {}/{} (cancelled)", i - 1, count)),
            );
            return;
        }
        thread::sleep(COUNT_TICK);
        write_message(
            writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {
                    "progressToken": token,
                    "progress": i,
                    "total": count
                }
            }),
        );
    }
    write_message(writer, &text_result(id, &format!("counted {}/{}", count, count)));
}

/// Build a single-text-item tool result.
fn text_result(id: &serde_json::Value, text: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [
                {
                    "type": "text",
                    "text": text
                }
            ],
            "isError": false
        }
    })
}

/// Build a JSON-RPC error response.
fn make_error(id: &serde_json::Value, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
