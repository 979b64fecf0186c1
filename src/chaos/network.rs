//! Network-level chaos: latency, drops, duplicates, reordering, corruption

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::chaos::{ChaosPlugin, DeterministicRng, DuplicateSend, PluginContext, SendVerdict};
use crate::config::NetworkChaosConfig;
use crate::error::Result;

/// Simulates an unreliable network between the harness and the target.
///
/// Behaviours, each gated by its configured probability times the global
/// intensity:
///
/// - random latency in both directions (`delay_ms` range),
/// - silent drops,
/// - duplicates (one extra copy scheduled 10..100 ms later),
/// - reordering (the message is held and re-emitted behind a later one),
/// - corruption (one random byte of the encoded frame is bit-flipped).
///
/// Held messages are released as delayed duplicates by the next message
/// that passes through, and discarded by [`ChaosPlugin::restore`].
#[derive(Debug)]
pub struct NetworkChaos {
    config: NetworkChaosConfig,
    enabled: AtomicBool,
    state: Mutex<Option<NetworkState>>,
}

#[derive(Debug)]
struct NetworkState {
    rng: DeterministicRng,
    intensity: f64,
    held: Vec<Value>,
}

/// Decisions drawn under the state lock, acted on after it is released.
struct SendPlan {
    delay: Option<Duration>,
    verdict: SendVerdict,
}

impl NetworkChaos {
    /// Create a plugin from its configuration; enabled by default.
    pub fn new(config: NetworkChaosConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(true),
            state: Mutex::new(None),
        }
    }

    fn plan_send(&self, message: &Value) -> SendPlan {
        let mut guard = self.state.lock().expect("network chaos state poisoned");
        let Some(state) = guard.as_mut() else {
            return SendPlan {
                delay: None,
                verdict: SendVerdict::pass(message.clone()),
            };
        };

        let intensity = state.intensity;
        let mut duplicates = Vec::new();

        // Release anything held by a previous reorder decision: it goes out
        // shortly after the current message, out of original order.
        for held in state.held.drain(..) {
            let delay = Duration::from_millis(state.rng.next_range(1, 20));
            duplicates.push(DuplicateSend {
                message: held,
                delay,
            });
        }

        let delay = self.config.delay_ms.map(|range| {
            Duration::from_millis(state.rng.next_range(range.min, range.max + 1))
        });

        if state.rng.next_bool(self.config.drop_probability * intensity) {
            return SendPlan {
                delay,
                verdict: SendVerdict {
                    payload: None,
                    duplicates,
                },
            };
        }

        if state
            .rng
            .next_bool(self.config.duplicate_probability * intensity)
        {
            let dup_delay = Duration::from_millis(state.rng.next_range(10, 101));
            duplicates.push(DuplicateSend {
                message: message.clone(),
                delay: dup_delay,
            });
        }

        if state
            .rng
            .next_bool(self.config.reorder_probability * intensity)
        {
            state.held.push(message.clone());
            return SendPlan {
                delay,
                verdict: SendVerdict {
                    payload: None,
                    duplicates,
                },
            };
        }

        let payload = if state
            .rng
            .next_bool(self.config.corrupt_probability * intensity)
        {
            let mut bytes = message.to_string().into_bytes();
            if !bytes.is_empty() {
                let idx = state.rng.next_range(0, bytes.len() as u64) as usize;
                let bit = state.rng.next_range(0, 8) as u8;
                bytes[idx] ^= 1 << bit;
            }
            SendVerdict::raw(String::from_utf8_lossy(&bytes).into_owned()).payload
        } else {
            SendVerdict::pass(message.clone()).payload
        };

        SendPlan {
            delay,
            verdict: SendVerdict {
                payload,
                duplicates,
            },
        }
    }

    fn plan_receive_delay(&self) -> Option<Duration> {
        let mut guard = self.state.lock().expect("network chaos state poisoned");
        let state = guard.as_mut()?;
        self.config
            .delay_ms
            .map(|range| Duration::from_millis(state.rng.next_range(range.min, range.max + 1)))
    }
}

#[async_trait::async_trait]
impl ChaosPlugin for NetworkChaos {
    fn name(&self) -> &'static str {
        "network"
    }

    fn description(&self) -> &'static str {
        "delays, drops, duplicates, reorders, and corrupts messages"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn initialize(&self, context: &PluginContext) {
        let rng = DeterministicRng::new(context.seed).fork(self.name());
        *self.state.lock().expect("network chaos state poisoned") = Some(NetworkState {
            rng,
            intensity: context.intensity,
            held: Vec::new(),
        });
    }

    async fn before_send(&self, message: &Value) -> Result<SendVerdict> {
        let plan = self.plan_send(message);
        if let Some(delay) = plan.delay {
            tokio::time::sleep(delay).await;
        }
        if plan.verdict.payload.is_none() {
            tracing::debug!(target: "mcprobe::chaos", "network chaos holding or dropping outbound message");
        }
        Ok(plan.verdict)
    }

    async fn after_receive(&self, message: &Value) -> Result<Value> {
        if let Some(delay) = self.plan_receive_delay() {
            tokio::time::sleep(delay).await;
        }
        Ok(message.clone())
    }

    async fn restore(&self) -> Result<()> {
        if let Some(state) = self
            .state
            .lock()
            .expect("network chaos state poisoned")
            .as_mut()
        {
            let discarded = state.held.len();
            state.held.clear();
            if discarded > 0 {
                tracing::debug!(
                    target: "mcprobe::chaos",
                    "network chaos discarded {discarded} held message(s) on restore"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plugin(config: NetworkChaosConfig, seed: u64) -> NetworkChaos {
        let p = NetworkChaos::new(config);
        p.initialize(&PluginContext {
            seed,
            intensity: 1.0,
        });
        p
    }

    #[tokio::test]
    async fn test_uninitialized_plugin_is_identity() {
        let p = NetworkChaos::new(NetworkChaosConfig {
            drop_probability: 1.0,
            ..NetworkChaosConfig::default()
        });
        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        let verdict = p.before_send(&msg).await.unwrap();
        assert!(verdict.payload.is_some(), "uninitialized plugin must pass through");
    }

    #[tokio::test]
    async fn test_drop_probability_one_drops_everything() {
        let p = plugin(
            NetworkChaosConfig {
                drop_probability: 1.0,
                ..NetworkChaosConfig::default()
            },
            7,
        );
        let verdict = p.before_send(&json!({"id": 1})).await.unwrap();
        assert!(verdict.payload.is_none());
    }

    #[tokio::test]
    async fn test_zero_intensity_disables_faults() {
        let p = NetworkChaos::new(NetworkChaosConfig {
            drop_probability: 1.0,
            corrupt_probability: 1.0,
            ..NetworkChaosConfig::default()
        });
        p.initialize(&PluginContext {
            seed: 7,
            intensity: 0.0,
        });
        let msg = json!({"id": 2});
        let verdict = p.before_send(&msg).await.unwrap();
        match verdict.payload {
            Some(crate::chaos::ChaosPayload::Json(v)) => assert_eq!(v, msg),
            other => panic!("expected untouched payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_schedules_one_copy() {
        let p = plugin(
            NetworkChaosConfig {
                duplicate_probability: 1.0,
                ..NetworkChaosConfig::default()
            },
            11,
        );
        let msg = json!({"id": 3});
        let verdict = p.before_send(&msg).await.unwrap();
        assert_eq!(verdict.duplicates.len(), 1);
        assert_eq!(verdict.duplicates[0].message, msg);
        let delay = verdict.duplicates[0].delay.as_millis();
        assert!((10..=100).contains(&delay), "delay out of range: {delay}");
    }

    #[tokio::test]
    async fn test_reorder_holds_then_releases() {
        let p = plugin(
            NetworkChaosConfig {
                reorder_probability: 1.0,
                ..NetworkChaosConfig::default()
            },
            13,
        );
        let first = json!({"id": 1});
        let verdict = p.before_send(&first).await.unwrap();
        assert!(verdict.payload.is_none(), "first message should be held");
        assert!(verdict.duplicates.is_empty());

        let second = json!({"id": 2});
        let verdict = p.before_send(&second).await.unwrap();
        // The held message is released behind the second one.
        assert_eq!(verdict.duplicates.len(), 1);
        assert_eq!(verdict.duplicates[0].message, first);
    }

    #[tokio::test]
    async fn test_corrupt_changes_encoded_bytes() {
        let p = plugin(
            NetworkChaosConfig {
                corrupt_probability: 1.0,
                ..NetworkChaosConfig::default()
            },
            17,
        );
        let msg = json!({"jsonrpc": "2.0", "id": 9, "method": "ping"});
        let verdict = p.before_send(&msg).await.unwrap();
        match verdict.payload {
            Some(crate::chaos::ChaosPayload::Raw(text)) => {
                assert_ne!(text, msg.to_string(), "corruption must alter the frame");
            }
            other => panic!("expected raw corrupted payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_restore_discards_held_messages() {
        let p = plugin(
            NetworkChaosConfig {
                reorder_probability: 1.0,
                ..NetworkChaosConfig::default()
            },
            19,
        );
        let _ = p.before_send(&json!({"id": 1})).await.unwrap();
        p.restore().await.unwrap();

        // Nothing held any more: the next send releases no duplicates.
        let p2 = NetworkChaos::new(NetworkChaosConfig::default());
        p2.initialize(&PluginContext {
            seed: 19,
            intensity: 1.0,
        });
        let verdict = p2.before_send(&json!({"id": 2})).await.unwrap();
        assert!(verdict.duplicates.is_empty());
    }

    #[tokio::test]
    async fn test_same_seed_same_decisions() {
        let run = |seed: u64| async move {
            let p = plugin(
                NetworkChaosConfig {
                    drop_probability: 0.5,
                    duplicate_probability: 0.5,
                    ..NetworkChaosConfig::default()
                },
                seed,
            );
            let mut trace = Vec::new();
            for i in 0..32 {
                let verdict = p.before_send(&json!({"id": i})).await.unwrap();
                trace.push((verdict.payload.is_some(), verdict.duplicates.len()));
            }
            trace
        };
        assert_eq!(run(12345).await, run(12345).await);
    }

    #[tokio::test]
    async fn test_original_message_not_mutated() {
        let p = plugin(
            NetworkChaosConfig {
                corrupt_probability: 1.0,
                ..NetworkChaosConfig::default()
            },
            23,
        );
        let msg = json!({"id": 4, "params": {"key": "value"}});
        let snapshot = msg.clone();
        let _ = p.before_send(&msg).await.unwrap();
        assert_eq!(msg, snapshot);
    }
}
