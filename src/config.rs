//! Configuration surface for mcprobe
//!
//! This module defines the configuration consumed from the outer CLI: the
//! target description, expectations, suite selection, timeouts, chaos
//! settings, and reporting options. Loading and JSON-schema validation of
//! configuration files happen outside the core; [`CheckConfig::validate`]
//! only enforces the invariants the runtime depends on.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// Description of the system under test.
///
/// The `type` field on the wire selects the variant: `stdio` launches a
/// child process, `tcp` dials a framed socket, `websocket` performs an HTTP
/// upgrade. Each variant carries only the fields its carrier understands.
///
/// # Examples
///
/// ```
/// use mcprobe::config::Target;
///
/// let target: Target = serde_json::from_str(
///     r#"{"type":"stdio","command":"node","args":["echo-server.js"]}"#,
/// ).unwrap();
/// assert!(matches!(target, Target::Stdio { .. }));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// Child process driven over stdin/stdout
    #[serde(rename_all = "camelCase")]
    Stdio {
        /// Executable to launch
        command: String,
        /// Command-line arguments
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables for the child; inherits the parent
        /// environment when empty
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory for the child process
        #[serde(default)]
        cwd: Option<PathBuf>,
        /// Launch through the platform shell instead of directly
        #[serde(default)]
        shell: bool,
    },
    /// Framed TCP socket
    #[serde(rename_all = "camelCase")]
    Tcp {
        /// Host name or address
        host: String,
        /// Port in 1..65535
        port: u16,
        /// Wrap the connection in TLS
        #[serde(default)]
        tls: bool,
        /// Connect deadline in milliseconds; defaults to
        /// [`DEFAULT_CONNECT_TIMEOUT_MS`] when absent
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// WebSocket endpoint
    #[serde(rename_all = "camelCase")]
    Websocket {
        /// `ws://` or `wss://` URL
        url: url::Url,
        /// Extra headers for the upgrade request
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Subprotocols offered during the handshake
        #[serde(default)]
        protocols: Vec<String>,
    },
}

/// Connect deadline applied when the target does not specify one.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Which transport implementation a target requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Child-process stdio
    Stdio,
    /// Framed TCP
    Tcp,
    /// WebSocket
    Websocket,
}

impl Target {
    /// The transport kind this target requires.
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Stdio { .. } => TargetKind::Stdio,
            Self::Tcp { .. } => TargetKind::Tcp,
            Self::Websocket { .. } => TargetKind::Websocket,
        }
    }

    /// Short human-readable description used in errors and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Stdio { command, .. } => format!("stdio:{command}"),
            Self::Tcp { host, port, .. } => format!("tcp://{host}:{port}"),
            Self::Websocket { url, .. } => url.to_string(),
        }
    }

    /// The effective connect deadline for this target in milliseconds.
    pub fn connect_timeout_ms(&self) -> u64 {
        match self {
            Self::Tcp { timeout_ms, .. } => timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            _ => DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Tcp => write!(f, "tcp"),
            Self::Websocket => write!(f, "websocket"),
        }
    }
}

/// Main configuration structure for a conformance run
///
/// Holds everything the [`crate::checker::Checker`] needs: the target, the
/// expectations to assert, which suites to run, timeouts, chaos injection
/// settings, and reporting options consumed by the outer CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    /// The system under test
    pub target: Target,

    /// Properties the target is expected to satisfy
    #[serde(default)]
    pub expectations: Expectations,

    /// Suites to run: `"all"` or an explicit list of names
    #[serde(default)]
    pub suites: SuiteSelection,

    /// Operation deadlines
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Fault-injection settings
    #[serde(default)]
    pub chaos: ChaosConfig,

    /// Report emission settings (consumed by the outer CLI)
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Concurrency limits
    #[serde(default)]
    pub parallelism: ParallelismConfig,
}

impl CheckConfig {
    /// Build a configuration with defaults for everything but the target.
    pub fn for_target(target: Target) -> Self {
        Self {
            target,
            expectations: Expectations::default(),
            suites: SuiteSelection::default(),
            timeouts: Timeouts::default(),
            chaos: ChaosConfig::default(),
            reporting: ReportingConfig::default(),
            parallelism: ParallelismConfig::default(),
        }
    }

    /// Enforce the invariants the runtime depends on.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::Config`] when the TCP port is zero, chaos is
    /// enabled without a seed, `intensity` or any probability leaves
    /// `[0, 1]`, or an explicit suite list is empty.
    pub fn validate(&self) -> Result<()> {
        if let Target::Tcp { port: 0, .. } = self.target {
            return Err(CheckError::Config("tcp target port must be 1..65535".into()).into());
        }

        if let SuiteSelection::Named(names) = &self.suites {
            if names.is_empty() {
                return Err(CheckError::Config(
                    "suites must be \"all\" or a non-empty array of names".into(),
                )
                .into());
            }
        }

        self.chaos.validate()?;
        Ok(())
    }
}

/// Suite selection: the `"all"` keyword or an explicit list of names.
///
/// `"all"` expands to every registered suite at run time; the canonical
/// default set is handshake, tool-discovery, tool-invocation, streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuiteSelection {
    /// The `"all"` keyword
    Keyword(String),
    /// Explicit suite names, run in registration order
    Named(Vec<String>),
}

impl SuiteSelection {
    /// Whether this selection means "every registered suite".
    pub fn is_all(&self) -> bool {
        matches!(self, Self::Keyword(k) if k == "all")
    }
}

impl Default for SuiteSelection {
    fn default() -> Self {
        Self::Keyword("all".to_string())
    }
}

/// Properties the target is expected to satisfy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectations {
    /// Minimum acceptable protocol version (date-form versions compare
    /// lexicographically)
    #[serde(default)]
    pub min_protocol_version: Option<String>,

    /// Capabilities the server must advertise during the handshake
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Tools the server is expected to expose
    #[serde(default)]
    pub tools: Vec<ToolExpectation>,

    /// Resources the server is expected to expose
    #[serde(default)]
    pub resources: Vec<ResourceExpectation>,

    /// Free-form expectations for experimental capabilities
    #[serde(default)]
    pub custom_capabilities: Option<serde_json::Value>,
}

/// A single expected tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExpectation {
    /// Tool name as advertised by `tools/list`
    pub name: String,
    /// Fail discovery when the tool is absent
    #[serde(default)]
    pub required: bool,
    /// The tool emits `notifications/progress` while running; the streaming
    /// and cancellation suites pick their probe tool from these
    #[serde(default)]
    pub streaming: bool,
    /// Name of a numeric argument that delays the tool's reply by that many
    /// milliseconds; the timeout suite uses it for progressive delays
    #[serde(default)]
    pub delay_arg: Option<String>,
}

/// A single expected resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceExpectation {
    /// Resource URI as advertised by `resources/list`
    pub uri: String,
    /// Fail discovery when the resource is absent
    #[serde(default)]
    pub required: bool,
}

/// Operation deadlines, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Handshake deadline
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,

    /// Per-request deadline for JSON-RPC round-trips
    #[serde(default = "default_invoke_ms")]
    pub invoke_ms: u64,

    /// Grace period between SIGTERM and SIGKILL for stdio children
    #[serde(default = "default_shutdown_ms")]
    pub shutdown_ms: u64,

    /// Deadline for a complete streaming invocation
    #[serde(default = "default_stream_ms")]
    pub stream_ms: u64,
}

fn default_connect_ms() -> u64 {
    5_000
}

fn default_invoke_ms() -> u64 {
    15_000
}

fn default_shutdown_ms() -> u64 {
    3_000
}

fn default_stream_ms() -> u64 {
    30_000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            invoke_ms: default_invoke_ms(),
            shutdown_ms: default_shutdown_ms(),
            stream_ms: default_stream_ms(),
        }
    }
}

/// Fault-injection settings.
///
/// When `enable` is true a `seed` is required so that every chaos decision
/// is reproducible; `intensity` multiplies every plugin probability and acts
/// as a global gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosConfig {
    /// Master switch for the chaos pipeline
    #[serde(default)]
    pub enable: bool,

    /// Seed for all chaos randomness; required when `enable` is true,
    /// derived from the wall clock (and logged) otherwise
    #[serde(default)]
    pub seed: Option<u64>,

    /// Global probability multiplier in `[0, 1]`
    #[serde(default = "default_intensity")]
    pub intensity: f64,

    /// Delay/drop/duplicate/reorder/corrupt faults
    #[serde(default)]
    pub network: Option<NetworkChaosConfig>,

    /// Stream-level reordering and chunk tagging
    #[serde(default)]
    pub stream: Option<StreamChaosConfig>,

    /// Protocol-level malformed/unexpected message injection
    #[serde(default)]
    pub protocol: Option<ProtocolChaosConfig>,

    /// Clock skew and processing delays
    #[serde(default)]
    pub timing: Option<TimingChaosConfig>,
}

fn default_intensity() -> f64 {
    1.0
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enable: false,
            seed: None,
            intensity: default_intensity(),
            network: None,
            stream: None,
            protocol: None,
            timing: None,
        }
    }
}

impl ChaosConfig {
    fn validate(&self) -> Result<()> {
        if self.enable && self.seed.is_none() {
            return Err(CheckError::Config(
                "chaos.seed is required when chaos.enable is true".into(),
            )
            .into());
        }
        if !(0.0..=1.0).contains(&self.intensity) {
            return Err(
                CheckError::Config("chaos.intensity must be within [0, 1]".into()).into(),
            );
        }

        let mut probabilities = Vec::new();
        if let Some(n) = &self.network {
            probabilities.extend([
                n.drop_probability,
                n.duplicate_probability,
                n.reorder_probability,
                n.corrupt_probability,
            ]);
        }
        if let Some(s) = &self.stream {
            probabilities.extend([
                s.reorder_probability,
                s.split_chunk_probability,
                s.duplicate_chunk_probability,
            ]);
        }
        if let Some(p) = &self.protocol {
            probabilities.extend([
                p.inject_abort_probability,
                p.malformed_json_probability,
                p.unexpected_message_probability,
                p.invalid_schema_probability,
            ]);
        }
        if probabilities.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(
                CheckError::Config("chaos probabilities must be within [0, 1]".into()).into(),
            );
        }
        Ok(())
    }
}

/// An inclusive `[min, max]` millisecond range drawn from uniformly.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRangeMs {
    /// Lower bound
    pub min: u64,
    /// Upper bound
    pub max: u64,
}

/// Settings for [`crate::chaos::NetworkChaos`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkChaosConfig {
    /// Random latency applied in both directions
    #[serde(default)]
    pub delay_ms: Option<DelayRangeMs>,
    /// Probability a message is silently dropped
    #[serde(default)]
    pub drop_probability: f64,
    /// Probability a message is sent twice (copy delayed 10..100 ms)
    #[serde(default)]
    pub duplicate_probability: f64,
    /// Probability a message is held back and re-emitted out of order
    #[serde(default)]
    pub reorder_probability: f64,
    /// Probability one byte of the encoded frame is flipped before write
    #[serde(default)]
    pub corrupt_probability: f64,
}

/// Settings for [`crate::chaos::StreamChaos`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChaosConfig {
    /// Extra jitter applied before each send
    #[serde(default)]
    pub chunk_jitter_ms: Option<DelayRangeMs>,
    /// Probability the reorder buffer intercepts a message
    #[serde(default)]
    pub reorder_probability: f64,
    /// Probability a message is tagged as a split chunk
    #[serde(default)]
    pub split_chunk_probability: f64,
    /// Probability a chunk is duplicated
    #[serde(default)]
    pub duplicate_chunk_probability: f64,
}

/// Settings for [`crate::chaos::ProtocolChaos`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolChaosConfig {
    /// Probability a send raises a simulated connection abort
    #[serde(default)]
    pub inject_abort_probability: f64,
    /// Probability the payload is replaced with deliberately invalid JSON
    #[serde(default)]
    pub malformed_json_probability: f64,
    /// Probability the message is substituted with an unexpected JSON-RPC one
    #[serde(default)]
    pub unexpected_message_probability: f64,
    /// Probability a required JSON-RPC field is mutated
    #[serde(default)]
    pub invalid_schema_probability: f64,
}

/// Settings for [`crate::chaos::TimingChaos`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingChaosConfig {
    /// Range the one-shot clock skew is drawn from at initialization
    #[serde(default)]
    pub clock_skew_ms: Option<DelayRangeMs>,
    /// Pre-send processing delay range
    #[serde(default)]
    pub processing_delay_ms: Option<DelayRangeMs>,
    /// Additional delay injected while connecting
    #[serde(default)]
    pub connection_delay_ms: u64,
}

/// Report emission settings consumed by the outer CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingConfig {
    /// Output formats (`json`, `junit`, `html`, ...); interpreted outside
    /// the core
    #[serde(default)]
    pub formats: Vec<String>,

    /// Directory reports are written into
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Attach captured fixtures to the results
    #[serde(default = "default_true")]
    pub include_fixtures: bool,

    /// Field-level filtering applied to data leaving the process
    #[serde(default)]
    pub redaction: RedactionConfig,

    /// Optional telemetry uploader settings, opaque to the core
    #[serde(default)]
    pub telemetry: Option<serde_json::Value>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_true() -> bool {
    true
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            formats: Vec::new(),
            output_dir: default_output_dir(),
            include_fixtures: default_true(),
            redaction: RedactionConfig::default(),
            telemetry: None,
        }
    }
}

/// Allow-list driven redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionConfig {
    /// Redaction is applied unless explicitly disabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fields passed through unredacted
    #[serde(default)]
    pub allowed_fields: Vec<String>,
    /// Regex patterns whose matches are masked
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_fields: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

/// Concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelismConfig {
    /// Concurrent test cases within a suite
    #[serde(default = "default_one")]
    pub max_concurrent_tests: usize,
    /// Concurrent target connections
    #[serde(default = "default_one")]
    pub max_concurrent_connections: usize,
}

fn default_one() -> usize {
    1
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tests: default_one(),
            max_concurrent_connections: default_one(),
        }
    }
}

/// Programmatic options for a single [`crate::checker::Checker::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the run to these suites (intersected with the config
    /// selection)
    pub suites: Option<Vec<String>>,
    /// Only run suites carrying at least one of these tags
    pub tags: Vec<String>,
    /// Skip suites carrying any of these tags
    pub exclude_tags: Vec<String>,
    /// Stop after the first suite that fails
    pub fail_fast: bool,
    /// Treat warnings as failures when aggregating
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_target() -> Target {
        Target::Stdio {
            command: "node".to_string(),
            args: vec!["echo-server.js".to_string()],
            env: HashMap::new(),
            cwd: None,
            shell: false,
        }
    }

    #[test]
    fn test_target_deserializes_tagged_variants() {
        let tcp: Target =
            serde_json::from_str(r#"{"type":"tcp","host":"localhost","port":4444}"#).unwrap();
        assert_eq!(tcp.kind(), TargetKind::Tcp);
        assert_eq!(tcp.connect_timeout_ms(), DEFAULT_CONNECT_TIMEOUT_MS);

        let ws: Target =
            serde_json::from_str(r#"{"type":"websocket","url":"ws://localhost:8080/mcp"}"#)
                .unwrap();
        assert_eq!(ws.kind(), TargetKind::Websocket);
    }

    #[test]
    fn test_tcp_timeout_override() {
        let tcp: Target = serde_json::from_str(
            r#"{"type":"tcp","host":"localhost","port":4444,"timeoutMs":1500}"#,
        )
        .unwrap();
        assert_eq!(tcp.connect_timeout_ms(), 1500);
    }

    #[test]
    fn test_timeouts_defaults() {
        let t = Timeouts::default();
        assert_eq!(t.connect_ms, 5_000);
        assert_eq!(t.invoke_ms, 15_000);
        assert_eq!(t.shutdown_ms, 3_000);
        assert_eq!(t.stream_ms, 30_000);
    }

    #[test]
    fn test_suite_selection_all_keyword() {
        let config: CheckConfig = serde_json::from_value(serde_json::json!({
            "target": {"type": "stdio", "command": "server"},
            "suites": "all"
        }))
        .unwrap();
        assert!(config.suites.is_all());
    }

    #[test]
    fn test_suite_selection_named() {
        let config: CheckConfig = serde_json::from_value(serde_json::json!({
            "target": {"type": "stdio", "command": "server"},
            "suites": ["handshake", "tool-discovery"]
        }))
        .unwrap();
        assert!(!config.suites.is_all());
        match &config.suites {
            SuiteSelection::Named(names) => assert_eq!(names.len(), 2),
            SuiteSelection::Keyword(_) => panic!("expected named selection"),
        }
    }

    #[test]
    fn test_validate_rejects_chaos_without_seed() {
        let mut config = CheckConfig::for_target(stdio_target());
        config.chaos.enable = true;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("chaos.seed"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_accepts_seeded_chaos() {
        let mut config = CheckConfig::for_target(stdio_target());
        config.chaos.enable = true;
        config.chaos.seed = Some(12345);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_intensity() {
        let mut config = CheckConfig::for_target(stdio_target());
        config.chaos.intensity = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_probability() {
        let mut config = CheckConfig::for_target(stdio_target());
        config.chaos.network = Some(NetworkChaosConfig {
            drop_probability: 2.0,
            ..NetworkChaosConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_named_suites() {
        let mut config = CheckConfig::for_target(stdio_target());
        config.suites = SuiteSelection::Named(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let config = CheckConfig::for_target(Target::Tcp {
            host: "localhost".to_string(),
            port: 0,
            tls: false,
            timeout_ms: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reporting_defaults() {
        let r = ReportingConfig::default();
        assert_eq!(r.output_dir, PathBuf::from("./reports"));
        assert!(r.include_fixtures);
        assert!(r.redaction.enabled);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = CheckConfig::for_target(stdio_target());
        let json = serde_json::to_string(&config).unwrap();
        let back: CheckConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeouts.invoke_ms, config.timeouts.invoke_ms);
        assert!(back.suites.is_all());
    }
}
