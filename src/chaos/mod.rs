//! Chaos pipeline: deterministic fault injection for the message path
//!
//! This module defines the [`ChaosPlugin`] contract and the concrete
//! plugins that perturb messages in flight:
//!
//! - [`NetworkChaos`] -- latency, drops, duplicates, reordering, byte
//!   corruption.
//! - [`StreamChaos`] -- chunk jitter, reorder buffering, semantic chunk
//!   tagging.
//! - [`ProtocolChaos`] -- simulated aborts, malformed JSON, unexpected or
//!   schema-invalid JSON-RPC messages.
//! - [`TimingChaos`] -- one-shot clock skew and processing delays.
//!
//! Plugins are orchestrated by the [`ChaosController`], which owns the
//! master seed and pipelines every outbound message through `before_send`
//! and every inbound message through `after_receive`. All randomness flows
//! through [`DeterministicRng`], so a run with a fixed seed is exactly
//! reproducible.
//!
//! Plugins never mutate the message they are handed; they return a cloned,
//! possibly transformed copy. Hooks may suspend (for injected delays) but
//! never hold locks across suspension points.

use std::time::Duration;

use serde_json::Value;

use crate::error::Result;

pub mod controller;
pub mod network;
pub mod protocol;
pub mod rng;
pub mod stream;
pub mod timing;

pub use controller::ChaosController;
pub use network::NetworkChaos;
pub use protocol::ProtocolChaos;
pub use rng::DeterministicRng;
pub use stream::StreamChaos;
pub use timing::TimingChaos;

/// Per-plugin initialization context.
///
/// Carries the master seed (plugins fork their own stream from it, tagged
/// with the plugin name) and the global intensity multiplier applied to
/// every configured probability.
#[derive(Debug, Clone, Copy)]
pub struct PluginContext {
    /// Master chaos seed
    pub seed: u64,
    /// Global probability multiplier in `[0, 1]`
    pub intensity: f64,
}

/// What a send hook produced for the wire.
///
/// `Raw` carries pre-encoded text that is written verbatim (plus framing);
/// it is how malformed-JSON and byte-corruption faults reach the carrier.
#[derive(Debug, Clone)]
pub enum ChaosPayload {
    /// A JSON value to serialize normally
    Json(Value),
    /// Pre-encoded frame text written as-is
    Raw(String),
}

/// A duplicate write scheduled by a send hook.
///
/// The transport sleeps `delay` and then sends `message` through its own
/// write path, bypassing chaos so duplicates cannot amplify.
#[derive(Debug, Clone)]
pub struct DuplicateSend {
    /// The message to send again
    pub message: Value,
    /// How long to wait before the duplicate write
    pub delay: Duration,
}

/// Outcome of piping a message through a send hook.
#[derive(Debug, Clone)]
pub struct SendVerdict {
    /// The (possibly transformed) payload; `None` drops the message
    pub payload: Option<ChaosPayload>,
    /// Extra writes to schedule after the main payload
    pub duplicates: Vec<DuplicateSend>,
}

impl SendVerdict {
    /// Pass a value through unchanged.
    pub fn pass(message: Value) -> Self {
        Self {
            payload: Some(ChaosPayload::Json(message)),
            duplicates: Vec::new(),
        }
    }

    /// Replace the payload with pre-encoded frame text.
    pub fn raw(text: String) -> Self {
        Self {
            payload: Some(ChaosPayload::Raw(text)),
            duplicates: Vec::new(),
        }
    }

    /// Drop the message entirely.
    pub fn drop_message() -> Self {
        Self {
            payload: None,
            duplicates: Vec::new(),
        }
    }
}

/// Contract every chaos plugin implements.
///
/// All hooks have default pass-through implementations so a plugin only
/// overrides the directions it perturbs. Hooks receive the message by
/// reference and must leave it untouched.
///
/// # Errors
///
/// `before_send` may fail with [`crate::error::CheckError::ChaosAbort`] to
/// simulate a connection abort; the controller propagates that to the
/// sender as a send failure. Any other error is treated as a plugin bug:
/// logged, and the message continues unchanged (fail-soft).
#[async_trait::async_trait]
pub trait ChaosPlugin: Send + Sync + std::fmt::Debug {
    /// Stable plugin name; also the tag its PRNG stream is forked with.
    fn name(&self) -> &'static str;

    /// One-line description for logs and diagnostics.
    fn description(&self) -> &'static str;

    /// Whether the controller should invoke this plugin's hooks.
    fn is_enabled(&self) -> bool;

    /// Flip this plugin's participation without touching its state.
    fn set_enabled(&self, enabled: bool);

    /// Prepare the plugin for a run: fork its PRNG stream and capture the
    /// intensity multiplier. Called once by the controller before any hook.
    fn initialize(&self, context: &PluginContext);

    /// Transform an outbound message.
    async fn before_send(&self, message: &Value) -> Result<SendVerdict> {
        Ok(SendVerdict::pass(message.clone()))
    }

    /// Transform an inbound message.
    async fn after_receive(&self, message: &Value) -> Result<Value> {
        Ok(message.clone())
    }

    /// Optional extra delay while the transport is connecting.
    async fn during_connection(&self) {}

    /// Release any held state (buffers, timers). Called by
    /// [`ChaosController::restore`]; must leave the plugin inert.
    async fn restore(&self) -> Result<()> {
        Ok(())
    }
}
