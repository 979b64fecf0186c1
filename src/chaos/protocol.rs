//! Protocol-level chaos: aborts, malformed JSON, broken JSON-RPC envelopes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::chaos::{ChaosPayload, ChaosPlugin, DeterministicRng, PluginContext, SendVerdict};
use crate::config::ProtocolChaosConfig;
use crate::error::{CheckError, Result};

/// Violates the JSON-RPC contract on purpose.
///
/// Four independent faults, checked in this order:
///
/// 1. **Abort** -- `before_send` fails with
///    [`CheckError::ChaosAbort`]; the transport surfaces it as a send
///    error, simulating a connection torn down mid-write.
/// 2. **Malformed JSON** -- the encoded payload is replaced with text that
///    no JSON parser accepts (truncation, missing brace, doubled comma,
///    removed colon, trailing comma, or `NaN`/`Infinity` literals).
/// 3. **Unexpected message** -- the payload is substituted with a
///    well-formed but wrong JSON-RPC message (bad `jsonrpc` version,
///    spurious method, orphan result, orphan error).
/// 4. **Invalid schema** -- a required envelope field is mutated in place
///    (deleted `jsonrpc`, wrong-type `id` or `method`).
#[derive(Debug)]
pub struct ProtocolChaos {
    config: ProtocolChaosConfig,
    enabled: AtomicBool,
    state: Mutex<Option<ProtocolState>>,
}

#[derive(Debug)]
struct ProtocolState {
    rng: DeterministicRng,
    intensity: f64,
}

impl ProtocolChaos {
    /// Create a plugin from its configuration; enabled by default.
    pub fn new(config: ProtocolChaosConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(true),
            state: Mutex::new(None),
        }
    }

    fn malform(encoded: &str, choice: u64) -> String {
        match choice {
            0 => {
                let mut cut = encoded.len() / 2;
                while cut > 0 && !encoded.is_char_boundary(cut) {
                    cut -= 1;
                }
                encoded[..cut].to_string()
            }
            1 => encoded
                .strip_suffix('}')
                .unwrap_or(encoded)
                .to_string(),
            2 => encoded.replacen(',', ",,", 1),
            3 => encoded.replacen(':', "", 1),
            4 => match encoded.strip_suffix('}') {
                Some(prefix) => format!("{prefix},}}"),
                None => format!("{encoded},"),
            },
            _ => match encoded.strip_suffix('}') {
                Some(prefix) => format!("{prefix},\"_chaos\":NaN}}"),
                None => format!("{encoded}Infinity"),
            },
        }
    }

    fn substitute(choice: u64) -> Value {
        match choice {
            0 => json!({"jsonrpc": "1.0", "id": 0, "method": "ping"}),
            1 => json!({"jsonrpc": "2.0", "method": "chaos/unexpected", "params": {}}),
            2 => json!({"jsonrpc": "2.0", "id": 999_983, "result": {}}),
            _ => json!({
                "jsonrpc": "2.0",
                "id": 999_983,
                "error": {"code": -32099, "message": "injected error"}
            }),
        }
    }

    fn mutate_schema(message: &Value, choice: u64) -> Value {
        let mut mutated = message.clone();
        if let Value::Object(map) = &mut mutated {
            match choice {
                0 => {
                    map.remove("jsonrpc");
                }
                1 => {
                    map.insert("id".to_string(), Value::Bool(true));
                }
                2 => {
                    map.insert("method".to_string(), Value::from(42));
                }
                _ => {
                    map.insert("jsonrpc".to_string(), Value::from(2));
                }
            }
        }
        mutated
    }
}

#[async_trait::async_trait]
impl ChaosPlugin for ProtocolChaos {
    fn name(&self) -> &'static str {
        "protocol"
    }

    fn description(&self) -> &'static str {
        "injects aborts, malformed JSON, and invalid JSON-RPC envelopes"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn initialize(&self, context: &PluginContext) {
        let rng = DeterministicRng::new(context.seed).fork(self.name());
        *self.state.lock().expect("protocol chaos state poisoned") = Some(ProtocolState {
            rng,
            intensity: context.intensity,
        });
    }

    async fn before_send(&self, message: &Value) -> Result<SendVerdict> {
        let mut guard = self.state.lock().expect("protocol chaos state poisoned");
        let Some(state) = guard.as_mut() else {
            return Ok(SendVerdict::pass(message.clone()));
        };
        let intensity = state.intensity;

        if state
            .rng
            .next_bool(self.config.inject_abort_probability * intensity)
        {
            return Err(CheckError::ChaosAbort(self.name().to_string()).into());
        }

        if state
            .rng
            .next_bool(self.config.malformed_json_probability * intensity)
        {
            let choice = state.rng.next_range(0, 6);
            let encoded = message.to_string();
            return Ok(SendVerdict::raw(Self::malform(&encoded, choice)));
        }

        if state
            .rng
            .next_bool(self.config.unexpected_message_probability * intensity)
        {
            let choice = state.rng.next_range(0, 4);
            return Ok(SendVerdict::pass(Self::substitute(choice)));
        }

        if state
            .rng
            .next_bool(self.config.invalid_schema_probability * intensity)
        {
            let choice = state.rng.next_range(0, 4);
            return Ok(SendVerdict::pass(Self::mutate_schema(message, choice)));
        }

        Ok(SendVerdict::pass(message.clone()))
    }
}
