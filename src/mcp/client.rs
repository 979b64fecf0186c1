//! JSON-RPC 2.0 client façade bound to a transport
//!
//! [`McpClient`] issues MCP requests over a shared
//! [`crate::transport::Transport`]. A background read task consumes the
//! transport's event stream and demultiplexes inbound traffic:
//!
//! - Responses resolve the matching in-flight request through a `pending`
//!   map keyed by the monotonically increasing request ID.
//! - Notifications fan out to every subscriber registered through
//!   [`McpClient::subscribe_notifications`].
//! - Server-initiated requests are answered with JSON-RPC
//!   `-32601 Method not found`; a conformance harness never services them.
//! - Responses with unknown IDs are logged and dropped.
//!
//! Every MCP operation except [`McpClient::initialize`] fails with
//! [`CheckError::NotInitialized`] until the handshake completes. The
//! client deliberately does not police the server's protocol version --
//! asserting on it is the handshake suite's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{CheckError, Result};
use crate::mcp::types::{
    CallToolParams, CallToolResult, ClientCapabilities, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedParams,
    Prompt, ReadResourceParams, ReadResourceResult, Resource, ResourceContents, Tool,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING,
    METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::transport::{Transport, TransportEvent};

type PendingMap = HashMap<u64, oneshot::Sender<std::result::Result<Value, JsonRpcError>>>;

/// JSON-RPC 2.0 client for driving an MCP target.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use mcprobe::mcp::McpClient;
/// use mcprobe::mcp::types::{ClientCapabilities, Implementation};
///
/// # async fn example(transport: Arc<dyn mcprobe::transport::Transport>) -> anyhow::Result<()> {
/// let client = McpClient::new(transport, Duration::from_secs(15));
/// client.initialize(
///     Implementation { name: "mcprobe".into(), version: "0.3.0".into() },
///     ClientCapabilities::default(),
/// ).await?;
/// let tools = client.list_tools().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpClient {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    notification_txs: Arc<StdMutex<Vec<mpsc::UnboundedSender<JsonRpcNotification>>>>,
    handshake: StdMutex<Option<InitializeResult>>,
    invoke_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a client over a connected transport and start its read task.
    ///
    /// `invoke_timeout` is the default per-request deadline
    /// (`timeouts.invoke_ms` from the run configuration).
    pub fn new(transport: Arc<dyn Transport>, invoke_timeout: Duration) -> Arc<Self> {
        let client = Arc::new(Self {
            transport: Arc::clone(&transport),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            notification_txs: Arc::new(StdMutex::new(Vec::new())),
            handshake: StdMutex::new(None),
            invoke_timeout,
            cancel: CancellationToken::new(),
        });
        client.spawn_read_task();
        client
    }

    fn spawn_read_task(self: &Arc<Self>) {
        let mut events = self.transport.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => {
                        this.pending.lock().await.clear();
                        break;
                    }
                    event = events.recv() => match event {
                        Some(TransportEvent::Message(value)) => {
                            this.dispatch(value).await;
                        }
                        Some(TransportEvent::Error { fatal: true, .. }) | Some(TransportEvent::Closed { .. }) | None => {
                            // Drop pending senders so in-flight requests
                            // fail instead of blocking until their timeout.
                            this.pending.lock().await.clear();
                            break;
                        }
                        Some(TransportEvent::Error { .. }) => {}
                    }
                }
            }
        });
    }

    /// Classify one inbound message and route it.
    async fn dispatch(&self, value: Value) {
        let has_id = value.get("id").is_some_and(|id| !id.is_null());
        let has_method = value.get("method").is_some();
        let has_result = value.get("result").is_some();
        let has_error = value.get("error").is_some();

        if has_id && (has_result || has_error) && !has_method {
            self.resolve_response(value).await;
        } else if has_method && !has_id {
            self.fan_out_notification(value);
        } else if has_method && has_id {
            self.reject_server_request(value).await;
        } else {
            tracing::debug!(
                target: "mcprobe::mcp",
                "ignoring unclassifiable message: {value}"
            );
        }
    }

    async fn resolve_response(&self, value: Value) {
        let id_val = &value["id"];
        let id = if let Some(n) = id_val.as_u64() {
            n
        } else if let Some(parsed) = id_val.as_str().and_then(|s| s.parse::<u64>().ok()) {
            parsed
        } else {
            tracing::warn!(target: "mcprobe::mcp", "response with non-integer id: {id_val}");
            return;
        };

        let tx = self.pending.lock().await.remove(&id);
        let Some(tx) = tx else {
            tracing::debug!(target: "mcprobe::mcp", "response for unknown id {id}; dropping");
            return;
        };

        let outcome = if let Some(error_val) = value.get("error") {
            match serde_json::from_value::<JsonRpcError>(error_val.clone()) {
                Ok(e) => Err(e),
                Err(_) => Err(JsonRpcError {
                    code: -32603,
                    message: format!("malformed error object: {error_val}"),
                    data: None,
                }),
            }
        } else {
            Ok(value.get("result").cloned().unwrap_or(Value::Null))
        };

        // Ignore send errors: the caller may have already timed out.
        let _ = tx.send(outcome);
    }

    fn fan_out_notification(&self, value: Value) {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: value
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            params: value.get("params").cloned(),
        };
        self.notification_txs
            .lock()
            .expect("notification list poisoned")
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    async fn reject_server_request(&self, value: Value) {
        let method = value.get("method").and_then(Value::as_str).unwrap_or("");
        tracing::debug!(
            target: "mcprobe::mcp",
            "rejecting server-initiated request `{method}`"
        );
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": value.get("id").cloned().unwrap_or(Value::Null),
            "error": {"code": -32601, "message": format!("Method not found: {method}")}
        });
        if let Err(err) = self.transport.send(response).await {
            tracing::debug!(target: "mcprobe::mcp", "failed to reject server request: {err}");
        }
    }

    /// Issue a raw JSON-RPC request and await the decoded result.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::InvocationTimeout`] when no response arrives
    /// within `timeout` (default: the configured invoke deadline),
    /// [`CheckError::Rpc`] when the server answers with an error object,
    /// and transport errors from the underlying send.
    pub async fn request<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register the pending slot before sending so the response can
        // never win the race.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_value(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params).map_err(CheckError::Serialization)?),
        })
        .map_err(CheckError::Serialization)?;

        if let Err(err) = self.transport.send(message).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        let deadline = timeout.unwrap_or(self.invoke_timeout);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(CheckError::InvocationTimeout {
                    method: method.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                }
                .into());
            }
            Ok(received) => received.map_err(|_| {
                CheckError::NotConnected("transport closed before the response arrived".into())
            })?,
        };

        let value = outcome.map_err(|e| CheckError::Rpc {
            code: e.code,
            message: e.message,
            data: e.data,
        })?;

        serde_json::from_value(value).map_err(|e| CheckError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no `id`, no reply).
    pub async fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params).map_err(CheckError::Serialization)?,
        });
        self.transport.send(message).await
    }

    /// Observe server notifications from this point on.
    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<JsonRpcNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notification_txs
            .lock()
            .expect("notification list poisoned")
            .push(tx);
        rx
    }

    /// Whether the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.handshake
            .lock()
            .expect("handshake slot poisoned")
            .is_some()
    }

    /// The server's `initialize` response, when the handshake completed.
    pub fn handshake_result(&self) -> Option<InitializeResult> {
        self.handshake
            .lock()
            .expect("handshake slot poisoned")
            .clone()
    }

    fn ensure_initialized(&self, op: &str) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CheckError::NotInitialized(format!("{op} requires a completed handshake")).into())
        }
    }

    /// Perform the MCP `initialize` / `notifications/initialized` handshake.
    ///
    /// # Errors
    ///
    /// Propagates request failures; a malformed or missing response leaves
    /// the client uninitialized.
    pub async fn initialize(
        &self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult> {
        let response: InitializeResult = self
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                None,
            )
            .await?;

        self.notify(METHOD_INITIALIZED, serde_json::json!({})).await?;

        *self.handshake.lock().expect("handshake slot poisoned") = Some(response.clone());
        Ok(response)
    }

    /// List all tools, following pagination until the cursor runs out.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized("tools/list")?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListToolsResult = self
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, None)
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }

    /// Invoke a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.ensure_initialized("tools/call")?;
        self.request(
            METHOD_TOOLS_CALL,
            CallToolParams {
                name: name.to_string(),
                arguments,
            },
            None,
        )
        .await
    }

    /// Invoke a tool with an explicit deadline.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<CallToolResult> {
        self.ensure_initialized("tools/call")?;
        self.request(
            METHOD_TOOLS_CALL,
            CallToolParams {
                name: name.to_string(),
                arguments,
            },
            Some(timeout),
        )
        .await
    }

    /// List all resources, following pagination.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.ensure_initialized("resources/list")?;
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListResourcesResult = self
                .request(METHOD_RESOURCES_LIST, PaginatedParams { cursor }, None)
                .await?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(resources),
            }
        }
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        self.ensure_initialized("resources/read")?;
        let result: ReadResourceResult = self
            .request(
                METHOD_RESOURCES_READ,
                ReadResourceParams {
                    uri: uri.to_string(),
                },
                None,
            )
            .await?;
        Ok(result.contents)
    }

    /// List all prompts, following pagination.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.ensure_initialized("prompts/list")?;
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListPromptsResult = self
                .request(METHOD_PROMPTS_LIST, PaginatedParams { cursor }, None)
                .await?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(prompts),
            }
        }
    }

    /// Retrieve a rendered prompt.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> Result<GetPromptResult> {
        self.ensure_initialized("prompts/get")?;
        self.request(
            METHOD_PROMPTS_GET,
            GetPromptParams {
                name: name.to_string(),
                arguments,
            },
            None,
        )
        .await
    }

    /// Keepalive round-trip.
    pub async fn ping(&self) -> Result<()> {
        self.ensure_initialized("ping")?;
        let _: Value = self.request(METHOD_PING, serde_json::json!({}), None).await?;
        Ok(())
    }

    /// Ping with an explicit deadline.
    pub async fn ping_with_timeout(&self, timeout: Duration) -> Result<()> {
        self.ensure_initialized("ping")?;
        let _: Value = self
            .request(METHOD_PING, serde_json::json!({}), Some(timeout))
            .await?;
        Ok(())
    }

    /// Stop the read task and close the underlying transport.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.transport.close().await
    }
}
