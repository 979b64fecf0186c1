//! Error types for mcprobe
//!
//! This module defines all error types used throughout the harness,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcprobe operations
///
/// This enum encompasses all possible errors that can occur while driving a
/// target through a conformance run: transport lifecycle failures, chaos
/// pipeline faults, JSON-RPC errors, suite validation problems, and
/// orchestration-level misconfiguration.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Configuration-related errors (bad values, missing required fields)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The target variant does not match the transport it was handed to
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Connection establishment did not complete within the deadline
    #[error("Connect timeout after {timeout_ms} ms: {target}")]
    ConnectTimeout {
        /// Deadline that elapsed
        timeout_ms: u64,
        /// Human-readable target description
        target: String,
    },

    /// Carrier-level failure while establishing the connection
    #[error("Connect error: {0}")]
    Connect(String),

    /// An operation that requires a live connection was invoked without one
    #[error("Transport not connected: {0}")]
    NotConnected(String),

    /// Carrier-level write failure (including simulated aborts)
    #[error("Send error: {0}")]
    Send(String),

    /// An inbound frame could not be decoded as JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// No matching message arrived within the wait deadline
    #[error("Wait timeout after {0} ms")]
    WaitTimeout(u64),

    /// A JSON-RPC round-trip did not complete within the deadline
    #[error("Invocation timeout: method={method}, after {timeout_ms} ms")]
    InvocationTimeout {
        /// Method that timed out
        method: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// A client operation was invoked before the initialize handshake
    #[error("Client not initialized: {0}")]
    NotInitialized(String),

    /// `Checker::run` was called without a transport factory
    #[error("Transport factory not set")]
    TransportFactoryNotSet,

    /// Suite selection produced an empty set
    #[error("No valid suites selected: {0}")]
    NoValidSuites(String),

    /// A suite rejected the configuration during `validate`
    #[error("Validation error: {0}")]
    Validation(String),

    /// A chaos plugin failed while processing a message
    #[error("Chaos plugin error: plugin={plugin}, {message}")]
    ChaosPlugin {
        /// Plugin that raised the failure
        plugin: String,
        /// What went wrong
        message: String,
    },

    /// A chaos plugin deliberately simulated a connection abort
    #[error("Simulated connection abort injected by {0}")]
    ChaosAbort(String),

    /// The server answered a request with a JSON-RPC error object
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        /// Numeric JSON-RPC error code
        code: i64,
        /// Human-readable error description
        message: String,
        /// Optional additional error context
        data: Option<serde_json::Value>,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal runtime error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for mcprobe operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

impl CheckError {
    /// The logical taxonomy name used in structured report entries.
    pub fn taxonomy(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::InvalidTarget(_) => "InvalidTarget",
            Self::ConnectTimeout { .. } => "ConnectTimeout",
            Self::Connect(_) => "ConnectError",
            Self::NotConnected(_) => "NotConnected",
            Self::Send(_) => "SendError",
            Self::Parse(_) => "ParseError",
            Self::WaitTimeout(_) => "WaitTimeout",
            Self::InvocationTimeout { .. } => "InvocationTimeout",
            Self::NotInitialized(_) => "NotInitialized",
            Self::TransportFactoryNotSet => "TransportFactoryNotSet",
            Self::NoValidSuites(_) => "NoValidSuites",
            Self::Validation(_) => "ValidationError",
            Self::ChaosPlugin { .. } => "ChaosPluginError",
            Self::ChaosAbort(_) => "SendError",
            Self::Rpc { .. } => "RpcError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Map an error raised anywhere in the harness to the process exit code
    /// consumed by the outer CLI.
    ///
    /// `2` for configuration/argument problems, `3` when the target is
    /// unreachable, `4` for everything else. Exit codes `0` and `1` are
    /// decided from [`crate::checker::TestResults`], not from errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::Validation(_)
            | Self::NoValidSuites(_)
            | Self::TransportFactoryNotSet => 2,
            Self::InvalidTarget(_) | Self::ConnectTimeout { .. } | Self::Connect(_) => 3,
            _ => 4,
        }
    }
}
