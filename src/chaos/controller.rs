//! Chaos controller: owns the plugin pipeline and the master seed

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::chaos::{
    ChaosPayload, ChaosPlugin, NetworkChaos, PluginContext, ProtocolChaos, SendVerdict,
    StreamChaos, TimingChaos,
};
use crate::config::ChaosConfig;
use crate::error::{CheckError, Result};

/// Runs every outbound message through the plugin send pipeline and every
/// inbound message through the receive pipeline.
///
/// Plugins execute in registration order. A plugin returning no payload
/// short-circuits the send pipeline (the message is dropped); duplicates
/// collected up to that point are still scheduled. Once a plugin emits a
/// pre-encoded `Raw` payload, later plugins are skipped -- they operate on
/// JSON values, which no longer exist for that frame.
///
/// The pipeline is fail-soft: a plugin that returns an error is logged and
/// the message continues unchanged, except for
/// [`CheckError::ChaosAbort`], which is a deliberate fault and propagates
/// to the sender.
///
/// When the gate is disabled both pipelines are identity functions.
#[derive(Debug)]
pub struct ChaosController {
    plugins: Mutex<Vec<Arc<dyn ChaosPlugin>>>,
    enabled: AtomicBool,
    seed: u64,
    intensity: f64,
}

impl ChaosController {
    /// Create an empty controller with an explicit seed and intensity.
    pub fn new(seed: u64, intensity: f64) -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(false),
            seed,
            intensity,
        }
    }

    /// Build a controller (and its plugins) from configuration.
    ///
    /// The seed is taken from the config when present. When chaos is
    /// disabled and no seed is given, one is derived from the wall clock
    /// and logged so the run stays reproducible after the fact.
    /// [`crate::config::CheckConfig::validate`] guarantees a seed exists
    /// whenever chaos is enabled.
    pub fn from_config(config: &ChaosConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| {
            let derived = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64);
            tracing::info!(
                target: "mcprobe::chaos",
                seed = derived,
                "no chaos seed configured; derived one from the wall clock"
            );
            derived
        });

        let controller = Self {
            plugins: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(config.enable),
            seed,
            intensity: config.intensity,
        };

        if let Some(network) = &config.network {
            controller.register(Arc::new(NetworkChaos::new(network.clone())));
        }
        if let Some(stream) = &config.stream {
            controller.register(Arc::new(StreamChaos::new(stream.clone())));
        }
        if let Some(protocol) = &config.protocol {
            controller.register(Arc::new(ProtocolChaos::new(protocol.clone())));
        }
        if let Some(timing) = &config.timing {
            controller.register(Arc::new(TimingChaos::new(timing.clone())));
        }

        controller
    }

    /// Append a plugin to the pipeline.
    pub fn register(&self, plugin: Arc<dyn ChaosPlugin>) {
        self.plugins
            .lock()
            .expect("chaos plugin list poisoned")
            .push(plugin);
    }

    /// Initialize every registered plugin with the master seed and
    /// intensity. Called once per run, before any message flows.
    pub fn initialize_plugins(&self) {
        let context = PluginContext {
            seed: self.seed,
            intensity: self.intensity,
        };
        for plugin in self.snapshot() {
            plugin.initialize(&context);
        }
    }

    /// The master seed all plugin streams derive from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The global probability multiplier.
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    /// Open the chaos gate.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Close the chaos gate; both pipelines become identity.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Whether the gate is open.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Look up a registered plugin by name.
    pub fn plugin(&self, name: &str) -> Option<Arc<dyn ChaosPlugin>> {
        self.snapshot().into_iter().find(|p| p.name() == name)
    }

    /// Enable exactly one plugin and disable the rest.
    ///
    /// Used by the chaos suites to isolate a single fault family. Returns
    /// false when no plugin carries the given name.
    pub fn enable_only(&self, name: &str) -> bool {
        let plugins = self.snapshot();
        let mut found = false;
        for plugin in &plugins {
            let selected = plugin.name() == name;
            plugin.set_enabled(selected);
            found |= selected;
        }
        found
    }

    /// Re-enable every registered plugin.
    pub fn enable_all_plugins(&self) {
        for plugin in self.snapshot() {
            plugin.set_enabled(true);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ChaosPlugin>> {
        self.plugins
            .lock()
            .expect("chaos plugin list poisoned")
            .clone()
    }

    /// Pipe an outbound message through the send hooks.
    ///
    /// # Errors
    ///
    /// Propagates [`CheckError::ChaosAbort`] when a plugin simulates a
    /// connection abort. All other plugin failures are logged and absorbed.
    pub async fn apply_send_chaos(&self, message: &Value) -> Result<SendVerdict> {
        if !self.is_enabled() {
            return Ok(SendVerdict::pass(message.clone()));
        }

        let mut payload = ChaosPayload::Json(message.clone());
        let mut duplicates = Vec::new();

        for plugin in self.snapshot() {
            if !plugin.is_enabled() {
                continue;
            }
            let current = match &payload {
                ChaosPayload::Json(value) => value.clone(),
                ChaosPayload::Raw(_) => break,
            };
            match plugin.before_send(&current).await {
                Ok(verdict) => {
                    duplicates.extend(verdict.duplicates);
                    match verdict.payload {
                        Some(next) => payload = next,
                        None => {
                            return Ok(SendVerdict {
                                payload: None,
                                duplicates,
                            });
                        }
                    }
                }
                Err(err) => {
                    if let Some(CheckError::ChaosAbort(_)) = err.downcast_ref::<CheckError>() {
                        return Err(err);
                    }
                    tracing::warn!(
                        target: "mcprobe::chaos",
                        plugin = plugin.name(),
                        error = %err,
                        "send chaos plugin failed; message continues unchanged"
                    );
                }
            }
        }

        Ok(SendVerdict {
            payload: Some(payload),
            duplicates,
        })
    }

    /// Pipe an inbound message through the receive hooks.
    ///
    /// Receive hooks cannot drop or duplicate; a failing plugin is logged
    /// and the message continues unchanged.
    pub async fn apply_receive_chaos(&self, message: Value) -> Value {
        if !self.is_enabled() {
            return message;
        }

        let mut current = message;
        for plugin in self.snapshot() {
            if !plugin.is_enabled() {
                continue;
            }
            match plugin.after_receive(&current).await {
                Ok(next) => current = next,
                Err(err) => {
                    tracing::warn!(
                        target: "mcprobe::chaos",
                        plugin = plugin.name(),
                        error = %err,
                        "receive chaos plugin failed; message continues unchanged"
                    );
                }
            }
        }
        current
    }

    /// Apply every enabled plugin's connection-time delay.
    pub async fn during_connection(&self) {
        if !self.is_enabled() {
            return;
        }
        for plugin in self.snapshot() {
            if plugin.is_enabled() {
                plugin.during_connection().await;
            }
        }
    }

    /// Restore every plugin concurrently, log any failures, and close the
    /// gate. Buffered messages held by plugins are released or discarded.
    pub async fn restore(&self) {
        let plugins = self.snapshot();
        let outcomes =
            futures::future::join_all(plugins.iter().map(|plugin| plugin.restore())).await;
        for (plugin, outcome) in plugins.iter().zip(outcomes) {
            if let Err(err) = outcome {
                tracing::warn!(
                    target: "mcprobe::chaos",
                    plugin = plugin.name(),
                    error = %err,
                    "chaos plugin restore failed"
                );
            }
        }
        self.disable();
    }
}
