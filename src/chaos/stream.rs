//! Stream-level chaos: jitter, reorder buffering, chunk tagging

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::chaos::{ChaosPlugin, DeterministicRng, DuplicateSend, PluginContext, SendVerdict};
use crate::config::StreamChaosConfig;
use crate::error::Result;

/// Weakens the FIFO ordering of the send path.
///
/// Reordering works through an internal buffer: when the fault fires the
/// incoming message joins the buffer, and while at least two messages are
/// buffered a coin flip decides whether a random buffered message is
/// released in its place. A released message re-enters the send path as a
/// fresh write and acquires a fresh deadline.
///
/// `split_chunk` faults are semantic marking only: the payload is tagged
/// with `_chaos_split`, `_chaos_chunk_id`, and `_chaos_total_chunks` so
/// downstream assertions can recognise it, but the frame is not split on
/// the wire.
#[derive(Debug)]
pub struct StreamChaos {
    config: StreamChaosConfig,
    enabled: AtomicBool,
    state: Mutex<Option<StreamState>>,
}

#[derive(Debug)]
struct StreamState {
    rng: DeterministicRng,
    intensity: f64,
    buffer: Vec<Value>,
}

impl StreamChaos {
    /// Create a plugin from its configuration; enabled by default.
    pub fn new(config: StreamChaosConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(true),
            state: Mutex::new(None),
        }
    }

    /// Number of messages currently held by the reorder buffer.
    pub fn buffered(&self) -> usize {
        self.state
            .lock()
            .expect("stream chaos state poisoned")
            .as_ref()
            .map_or(0, |s| s.buffer.len())
    }

    fn plan_send(&self, message: &Value) -> (Option<Duration>, SendVerdict) {
        let mut guard = self.state.lock().expect("stream chaos state poisoned");
        let Some(state) = guard.as_mut() else {
            return (None, SendVerdict::pass(message.clone()));
        };

        let intensity = state.intensity;
        let jitter = self.config.chunk_jitter_ms.map(|range| {
            Duration::from_millis(state.rng.next_range(range.min, range.max + 1))
        });

        let mut outgoing = message.clone();
        let mut duplicates = Vec::new();

        if state
            .rng
            .next_bool(self.config.reorder_probability * intensity)
        {
            state.buffer.push(outgoing);
            if state.buffer.len() >= 2 && state.rng.next_bool(0.5) {
                let idx = state.rng.next_range(0, state.buffer.len() as u64) as usize;
                outgoing = state.buffer.swap_remove(idx);
            } else {
                // The incoming message stays buffered; nothing goes out now.
                return (
                    jitter,
                    SendVerdict {
                        payload: None,
                        duplicates,
                    },
                );
            }
        }

        if state
            .rng
            .next_bool(self.config.split_chunk_probability * intensity)
        {
            if let Value::Object(map) = &mut outgoing {
                let chunk_id = state.rng.next_range(0, u64::from(u32::MAX));
                map.insert("_chaos_split".to_string(), Value::Bool(true));
                map.insert("_chaos_chunk_id".to_string(), Value::from(chunk_id));
                map.insert("_chaos_total_chunks".to_string(), Value::from(2));
            }
        }

        if state
            .rng
            .next_bool(self.config.duplicate_chunk_probability * intensity)
        {
            let delay = Duration::from_millis(state.rng.next_range(1, 50));
            duplicates.push(DuplicateSend {
                message: outgoing.clone(),
                delay,
            });
        }

        (
            jitter,
            SendVerdict {
                payload: Some(crate::chaos::ChaosPayload::Json(outgoing)),
                duplicates,
            },
        )
    }
}

#[async_trait::async_trait]
impl ChaosPlugin for StreamChaos {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn description(&self) -> &'static str {
        "jitters, reorders, and tags message chunks"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn initialize(&self, context: &PluginContext) {
        let rng = DeterministicRng::new(context.seed).fork(self.name());
        *self.state.lock().expect("stream chaos state poisoned") = Some(StreamState {
            rng,
            intensity: context.intensity,
            buffer: Vec::new(),
        });
    }

    async fn before_send(&self, message: &Value) -> Result<SendVerdict> {
        let (jitter, verdict) = self.plan_send(message);
        if let Some(delay) = jitter {
            tokio::time::sleep(delay).await;
        }
        Ok(verdict)
    }

    async fn restore(&self) -> Result<()> {
        if let Some(state) = self
            .state
            .lock()
            .expect("stream chaos state poisoned")
            .as_mut()
        {
            let discarded = state.buffer.len();
            state.buffer.clear();
            if discarded > 0 {
                tracing::debug!(
                    target: "mcprobe::chaos",
                    "stream chaos discarded {discarded} buffered message(s) on restore"
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

    fn plugin(config: StreamChaosConfig, seed: u64) -> StreamChaos {
        let p = StreamChaos::new(config);
        p.initialize(&PluginContext {
            seed,
            intensity: 1.0,
        });
        p
    }

    #[tokio::test]
    async fn test_first_reordered_message_is_held() {
        let p = plugin(
            StreamChaosConfig {
                reorder_probability: 1.0,
                ..StreamChaosConfig::default()
            },
            3,
        );
        let verdict = p.before_send(&json!({"id": 1})).await.unwrap();
        // With one message the buffer can never release, so it is held.
        assert!(verdict.payload.is_none());
        assert_eq!(p.buffered(), 1);
    }

    #[tokio::test]
    async fn test_reorder_eventually_releases_buffered_messages() {
        let p = plugin(
            StreamChaosConfig {
                reorder_probability: 1.0,
                ..StreamChaosConfig::default()
            },
            5,
        );
        let mut released = 0;
        for i in 0..64 {
            let verdict = p.before_send(&json!({"id": i})).await.unwrap();
            if verdict.payload.is_some() {
                released += 1;
            }
        }
        assert!(released > 0, "the 50% release coin must fire eventually");
        assert!(released < 64, "with p=1.0 some messages must be held");
    }

    #[tokio::test]
    async fn test_split_tagging_marks_objects() {
        let p = plugin(
            StreamChaosConfig {
                split_chunk_probability: 1.0,
                ..StreamChaosConfig::default()
            },
            7,
        );
        let verdict = p.before_send(&json!({"id": 1})).await.unwrap();
        match verdict.payload {
            Some(crate::chaos::ChaosPayload::Json(v)) => {
                assert_eq!(v["_chaos_split"], json!(true));
                assert!(v["_chaos_chunk_id"].is_u64());
                assert_eq!(v["_chaos_total_chunks"], json!(2));
            }
            other => panic!("expected tagged payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_chunk_schedules_copy() {
        let p = plugin(
            StreamChaosConfig {
                duplicate_chunk_probability: 1.0,
                ..StreamChaosConfig::default()
            },
            9,
        );
        let verdict = p.before_send(&json!({"id": 1})).await.unwrap();
        assert_eq!(verdict.duplicates.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_empties_reorder_buffer() {
        let p = plugin(
            StreamChaosConfig {
                reorder_probability: 1.0,
                ..StreamChaosConfig::default()
            },
            11,
        );
        for i in 0..8 {
            let _ = p.before_send(&json!({"id": i})).await.unwrap();
        }
        p.restore().await.unwrap();
        assert_eq!(p.buffered(), 0);
    }

    #[tokio::test]
    async fn test_same_seed_same_hold_release_pattern() {
        let run = |seed: u64| async move {
            let p = plugin(
                StreamChaosConfig {
                    reorder_probability: 0.7,
                    ..StreamChaosConfig::default()
                },
                seed,
            );
            let mut trace = Vec::new();
            for i in 0..40 {
                let verdict = p.before_send(&json!({"id": i})).await.unwrap();
                trace.push(verdict.payload.map(|p| match p {
                    crate::chaos::ChaosPayload::Json(v) => v["id"].as_u64(),
                    crate::chaos::ChaosPayload::Raw(_) => None,
                }));
            }
            trace
        };
        assert_eq!(run(4242).await, run(4242).await);
    }
}
