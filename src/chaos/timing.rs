//! Timing chaos: clock skew and processing delays

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::chaos::{ChaosPlugin, DeterministicRng, PluginContext, SendVerdict};
use crate::config::TimingChaosConfig;
use crate::error::Result;

/// Field names treated as timestamps when walking message trees.
const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "createdAt",
    "updatedAt",
    "startedAt",
    "completedAt",
    "startTime",
    "endTime",
    "time",
];

/// Skews every timestamp the target and harness exchange.
///
/// A single `clock_skew_ms` offset is drawn once at [`ChaosPlugin::initialize`]
/// and then applied to every timestamp-like field in both directions, so the
/// run behaves like one peer with a consistently wrong clock rather than a
/// jittery one. Numeric fields are treated as millisecond epochs; string
/// fields are reinterpreted through RFC 3339. `processing_delay_ms` injects
/// latency before each send, and `connection_delay_ms` stretches the
/// connect phase.
#[derive(Debug)]
pub struct TimingChaos {
    config: TimingChaosConfig,
    enabled: AtomicBool,
    state: Mutex<Option<TimingState>>,
}

#[derive(Debug)]
struct TimingState {
    rng: DeterministicRng,
    intensity: f64,
    clock_skew_ms: i64,
}

impl TimingChaos {
    /// Create a plugin from its configuration; enabled by default.
    pub fn new(config: TimingChaosConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(true),
            state: Mutex::new(None),
        }
    }

    /// The skew drawn at initialization, in milliseconds.
    pub fn clock_skew_ms(&self) -> i64 {
        self.state
            .lock()
            .expect("timing chaos state poisoned")
            .as_ref()
            .map_or(0, |s| s.clock_skew_ms)
    }

    fn skew_tree(value: &mut Value, skew_ms: i64) {
        match value {
            Value::Object(map) => {
                for (key, field) in map.iter_mut() {
                    if TIMESTAMP_KEYS.contains(&key.as_str()) {
                        Self::skew_leaf(field, skew_ms);
                    } else {
                        Self::skew_tree(field, skew_ms);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::skew_tree(item, skew_ms);
                }
            }
            _ => {}
        }
    }

    fn skew_leaf(field: &mut Value, skew_ms: i64) {
        match field {
            Value::Number(n) => {
                if let Some(epoch) = n.as_i64() {
                    *field = Value::from(epoch + skew_ms);
                } else if let Some(epoch) = n.as_f64() {
                    *field = Value::from(epoch + skew_ms as f64);
                }
            }
            Value::String(s) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                    let skewed = parsed.with_timezone(&Utc)
                        + chrono::Duration::milliseconds(skew_ms);
                    *field = Value::from(skewed.to_rfc3339());
                }
            }
            _ => {}
        }
    }

    fn skewed_copy(&self, message: &Value) -> (Option<Duration>, Value) {
        let mut guard = self.state.lock().expect("timing chaos state poisoned");
        let Some(state) = guard.as_mut() else {
            return (None, message.clone());
        };
        let delay = self.config.processing_delay_ms.map(|range| {
            Duration::from_millis(state.rng.next_range(range.min, range.max + 1))
        });
        let mut copy = message.clone();
        if state.clock_skew_ms != 0 && state.intensity > 0.0 {
            Self::skew_tree(&mut copy, state.clock_skew_ms);
        }
        (delay, copy)
    }
}

#[async_trait::async_trait]
impl ChaosPlugin for TimingChaos {
    fn name(&self) -> &'static str {
        "timing"
    }

    fn description(&self) -> &'static str {
        "skews timestamps and injects processing delays"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn initialize(&self, context: &PluginContext) {
        let mut rng = DeterministicRng::new(context.seed).fork(self.name());
        let clock_skew_ms = self
            .config
            .clock_skew_ms
            .map_or(0, |range| rng.next_range(range.min, range.max + 1) as i64);
        *self.state.lock().expect("timing chaos state poisoned") = Some(TimingState {
            rng,
            intensity: context.intensity,
            clock_skew_ms,
        });
    }

    async fn before_send(&self, message: &Value) -> Result<SendVerdict> {
        let (delay, skewed) = self.skewed_copy(message);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SendVerdict::pass(skewed))
    }

    async fn after_receive(&self, message: &Value) -> Result<Value> {
        let (_, skewed) = self.skewed_copy(message);
        Ok(skewed)
    }

    async fn during_connection(&self) {
        if self.config.connection_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.connection_delay_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DelayRangeMs;
    use serde_json::json;

    fn plugin(config: TimingChaosConfig, seed: u64) -> TimingChaos {
        let p = TimingChaos::new(config);
        p.initialize(&PluginContext {
            seed,
            intensity: 1.0,
        });
        p
    }

    fn skew_config(min: u64, max: u64) -> TimingChaosConfig {
        TimingChaosConfig {
            clock_skew_ms: Some(DelayRangeMs { min, max }),
            ..TimingChaosConfig::default()
        }
    }

    #[tokio::test]
    async fn test_skew_drawn_once_at_initialize() {
        let p = plugin(skew_config(100, 5000), 21);
        let first = p.clock_skew_ms();
        assert!((100..=5000).contains(&first));

        // The skew must stay constant across messages.
        let _ = p.before_send(&json!({"timestamp": 0})).await.unwrap();
        let _ = p.before_send(&json!({"timestamp": 0})).await.unwrap();
        assert_eq!(p.clock_skew_ms(), first);
    }

    #[tokio::test]
    async fn test_numeric_epoch_offset() {
        let p = plugin(skew_config(500, 501), 23);
        let skew = p.clock_skew_ms();
        let verdict = p
            .before_send(&json!({"params": {"timestamp": 1_000_000}}))
            .await
            .unwrap();
        match verdict.payload {
            Some(crate::chaos::ChaosPayload::Json(v)) => {
                assert_eq!(v["params"]["timestamp"], json!(1_000_000 + skew));
            }
            other => panic!("expected json payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_iso8601_string_offset() {
        let p = plugin(skew_config(1000, 1001), 29);
        let verdict = p
            .before_send(&json!({"createdAt": "2026-01-01T00:00:00+00:00"}))
            .await
            .unwrap();
        match verdict.payload {
            Some(crate::chaos::ChaosPayload::Json(v)) => {
                let skewed = v["createdAt"].as_str().unwrap();
                let parsed = DateTime::parse_from_rfc3339(skewed).unwrap();
                let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00+00:00").unwrap();
                let delta_ms = (parsed.timestamp_millis() - base.timestamp_millis()) as u64;
                assert!((1000..=1001).contains(&delta_ms), "delta {delta_ms}");
            }
            other => panic!("expected json payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_timestamp_fields_untouched() {
        let p = plugin(skew_config(100, 200), 31);
        let msg = json!({"id": 7, "method": "tools/call", "params": {"count": 3}});
        let verdict = p.before_send(&msg).await.unwrap();
        match verdict.payload {
            Some(crate::chaos::ChaosPayload::Json(v)) => assert_eq!(v, msg),
            other => panic!("expected json payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nested_and_array_timestamps_skewed() {
        let p = plugin(skew_config(250, 251), 37);
        let skew = p.clock_skew_ms();
        let received = p
            .after_receive(&json!({
                "result": {"items": [{"startTime": 10}, {"endTime": 20}]}
            }))
            .await
            .unwrap();
        assert_eq!(received["result"]["items"][0]["startTime"], json!(10 + skew));
        assert_eq!(received["result"]["items"][1]["endTime"], json!(20 + skew));
    }

    #[tokio::test]
    async fn test_same_seed_same_skew() {
        let a = plugin(skew_config(0, 10_000), 12345);
        let b = plugin(skew_config(0, 10_000), 12345);
        assert_eq!(a.clock_skew_ms(), b.clock_skew_ms());
    }
}
