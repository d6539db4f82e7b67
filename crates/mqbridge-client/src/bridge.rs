//! Blocking publish/subscribe/unsubscribe operations over a command engine.
//!
//! Each call runs the same cycle: allocate a correlation id, wait for the
//! connectivity gate, submit the command, park on the completion signal with a
//! bounded deadline, then either return or run the whole cycle again. By
//! default the cycle repeats until the engine acknowledges success, matching
//! the "eventually succeeds, blocks until then" contract; callers that need
//! bounded behavior opt in through [`BridgeConfig::with_max_attempts`].
//!
//! Registry consistency: the subscribe and unsubscribe completions mutate the
//! subscription registry *before* setting the completion bit, so by the time a
//! call returns, inbound routing already reflects the engine's acknowledged
//! state.
//!
//! Cancellation: dropping a call future abandons the call between cycles. An
//! in-flight completion lands on that cycle's own context, never on the
//! caller's stack. Callers that need an overall deadline on top of unbounded
//! retries can wrap any call in `tokio::time::timeout`.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use mqbridge_core::signal::{self, CompletionSignal, WaitOutcome};
use mqbridge_core::{
    Command, CommandCompletion, CommandEngine, CommandPayload, CommandStatus, ConnectivityGate,
    CorrelationAllocator, OperationKind, QosLevel, SubmitError,
};

use crate::registry::{InboundHandler, SubscriptionEntry, SubscriptionRegistry};

/// Why one submit-and-wait cycle did not succeed. Consumed by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// The engine refused the command at the queue.
    #[error("engine rejected the submission: {0}")]
    SubmissionRejected(#[from] SubmitError),
    /// No completion arrived within the per-attempt deadline.
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),
    /// The completion arrived but did not report success.
    #[error("engine reported {0}")]
    EngineFailure(CommandStatus),
}

/// Errors surfaced to bridge callers.
///
/// With the default unbounded retry policy the publish/subscribe/unsubscribe
/// paths never surface a transient failure; only a bounded configuration, a
/// reply deadline, or an engine shutdown can fail a call.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configured attempt budget ran out.
    #[error("{operation} gave up after {attempts} attempts: {last}")]
    AttemptsExhausted {
        operation: OperationKind,
        attempts: u32,
        #[source]
        last: AttemptError,
    },
    /// A request/response exchange saw no reply within its deadline.
    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),
    /// The engine has shut down; retrying can never succeed.
    #[error("engine is shut down")]
    EngineClosed,
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

fn default_ack_timeout_ms() -> u64 {
    10_000
}
fn default_retry_delay_ms() -> u64 {
    500
}

/// Configuration for the operation bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Deadline for one submit-and-wait cycle before the command is retried.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Pause between failed cycles.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound on cycles per call; `None` retries until acknowledged.
    #[serde(default)]
    pub max_attempts: Option<NonZeroU32>,
}

impl BridgeConfig {
    /// Create a configuration with default timings and unbounded retries.
    pub fn new() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_attempts: None,
        }
    }

    /// Set the per-attempt acknowledgment deadline.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the pause between failed cycles.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Bound the number of cycles per call.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = NonZeroU32::new(attempts);
        self
    }

    /// Per-attempt deadline as a [`Duration`].
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Inter-cycle pause as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state for one submit-and-wait cycle.
///
/// The completion callback holds a clone, so a late callback from an
/// abandoned cycle lands here instead of on the caller's stack.
#[derive(Debug, Default)]
struct CommandContext {
    status: Mutex<Option<CommandStatus>>,
    signal: CompletionSignal,
}

impl CommandContext {
    /// Record the engine's verdict, then wake the waiter.
    fn record(&self, status: CommandStatus, done_bit: u8) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = Some(status);
        self.signal.set(done_bit);
    }

    fn status(&self) -> Option<CommandStatus> {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry mutation a successful completion applies before signaling.
#[derive(Clone)]
enum RegistryMutation {
    Insert(SubscriptionEntry),
    Remove(String),
}

/// Blocking operation bridge over a single-consumer command engine.
///
/// Safe to share behind an [`Arc`] and call from any number of concurrent
/// tasks; each call owns its own correlation id, context, and completion
/// signal, so one task's completion can never wake another.
pub struct MessageBridge {
    engine: Arc<dyn CommandEngine>,
    gate: Arc<ConnectivityGate>,
    registry: Arc<SubscriptionRegistry>,
    correlations: Arc<CorrelationAllocator>,
    config: BridgeConfig,
}

impl MessageBridge {
    /// Create a bridge over `engine` with explicitly owned shared state.
    pub fn new(
        engine: Arc<dyn CommandEngine>,
        gate: Arc<ConnectivityGate>,
        registry: Arc<SubscriptionRegistry>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            engine,
            gate,
            registry,
            correlations: Arc::new(CorrelationAllocator::new()),
            config,
        }
    }

    /// Share a correlation allocator with another bridge instance.
    pub fn with_correlations(mut self, correlations: Arc<CorrelationAllocator>) -> Self {
        self.correlations = correlations;
        self
    }

    /// The connectivity gate this bridge submits through.
    pub fn gate(&self) -> &Arc<ConnectivityGate> {
        &self.gate
    }

    /// The subscription registry this bridge keeps consistent.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Publish `payload` to `topic`, returning once the engine acknowledges.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QosLevel,
    ) -> BridgeResult<()> {
        let payload = CommandPayload::Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        };
        self.run_cycles(payload, signal::PUBLISH_DONE, None).await
    }

    /// Subscribe `handler` to `topic_filter`, returning once the engine
    /// acknowledges. Inbound routing for the filter is live before this
    /// returns.
    pub async fn subscribe(
        &self,
        topic_filter: impl Into<String>,
        qos: QosLevel,
        handler: Arc<dyn InboundHandler>,
    ) -> BridgeResult<()> {
        let topic_filter = topic_filter.into();
        let entry = SubscriptionEntry::new(topic_filter.clone(), qos, handler);
        let payload = CommandPayload::Subscribe { topic_filter, qos };
        self.run_cycles(
            payload,
            signal::SUBSCRIBE_DONE,
            Some(RegistryMutation::Insert(entry)),
        )
        .await
    }

    /// Drop the subscription for `topic_filter`, returning once the engine
    /// acknowledges. Routing for the filter stops before this returns.
    pub async fn unsubscribe(
        &self,
        topic_filter: impl Into<String>,
        qos: QosLevel,
    ) -> BridgeResult<()> {
        let topic_filter = topic_filter.into();
        let payload = CommandPayload::Unsubscribe {
            topic_filter: topic_filter.clone(),
            qos,
        };
        self.run_cycles(
            payload,
            signal::UNSUBSCRIBE_DONE,
            Some(RegistryMutation::Remove(topic_filter)),
        )
        .await
    }

    /// Request/response exchange over pub/sub: subscribe to `reply_filter`,
    /// publish `payload` to `request_topic`, await one reply, unsubscribe.
    ///
    /// Returns the reply payload, or [`BridgeError::ReplyTimeout`] if nothing
    /// arrives within `reply_timeout`. The reply subscription is removed on
    /// both paths.
    pub async fn request(
        &self,
        request_topic: impl Into<String>,
        reply_filter: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QosLevel,
        reply_timeout: Duration,
    ) -> BridgeResult<Vec<u8>> {
        let reply_filter = reply_filter.into();
        let reply_signal = Arc::new(CompletionSignal::new());
        let slot = Arc::new(Mutex::new(None::<Vec<u8>>));

        let handler: Arc<dyn InboundHandler> = {
            let reply_signal = reply_signal.clone();
            let slot = slot.clone();
            Arc::new(move |_: &str, payload: &[u8]| {
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(payload.to_vec());
                reply_signal.set(signal::INBOUND_RECEIVED);
            })
        };

        self.subscribe(reply_filter.clone(), qos, handler).await?;
        self.publish(request_topic, payload, qos).await?;

        let outcome = reply_signal
            .wait_timeout(signal::INBOUND_RECEIVED, reply_timeout)
            .await;

        self.unsubscribe(reply_filter, qos).await?;

        match outcome {
            WaitOutcome::Observed => {
                let reply = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
                // The handler fills the slot before setting the bit.
                reply.ok_or(BridgeError::ReplyTimeout(reply_timeout))
            }
            WaitOutcome::TimedOut => Err(BridgeError::ReplyTimeout(reply_timeout)),
        }
    }

    /// Run submit-and-wait cycles until success or attempt exhaustion.
    async fn run_cycles(
        &self,
        payload: CommandPayload,
        done_bit: u8,
        mutation: Option<RegistryMutation>,
    ) -> BridgeResult<()> {
        let operation = payload.kind();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let correlation_id = self.correlations.next();
            let context = Arc::new(CommandContext::default());

            self.gate.ready().await;

            let completion = {
                let context = context.clone();
                let registry = self.registry.clone();
                let mutation = mutation.clone();
                CommandCompletion::new(move |status| {
                    if status.is_success() {
                        match mutation {
                            Some(RegistryMutation::Insert(entry)) => {
                                registry.add(entry);
                            }
                            Some(RegistryMutation::Remove(filter)) => {
                                registry.remove(&filter);
                            }
                            None => {}
                        }
                    }
                    context.record(status, done_bit);
                })
            };

            let command = Command {
                correlation_id,
                payload: payload.clone(),
                completion,
            };

            let attempt_error = match self.engine.submit(command) {
                Err(SubmitError::Closed) => {
                    warn!(
                        %operation,
                        topic = payload.topic(),
                        "engine is shut down, abandoning command"
                    );
                    return Err(BridgeError::EngineClosed);
                }
                Err(err) => {
                    warn!(
                        %correlation_id,
                        %operation,
                        topic = payload.topic(),
                        error = %err,
                        "failed to enqueue command"
                    );
                    AttemptError::SubmissionRejected(err)
                }
                Ok(()) => {
                    match context
                        .signal
                        .wait_timeout(done_bit, self.config.ack_timeout())
                        .await
                    {
                        WaitOutcome::TimedOut => AttemptError::AckTimeout(self.config.ack_timeout()),
                        WaitOutcome::Observed => match context.status() {
                            Some(CommandStatus::Success) => {
                                debug!(
                                    %correlation_id,
                                    %operation,
                                    topic = payload.topic(),
                                    "command acknowledged"
                                );
                                return Ok(());
                            }
                            Some(status) => AttemptError::EngineFailure(status),
                            None => AttemptError::EngineFailure(CommandStatus::Failed),
                        },
                    }
                }
            };

            if let Some(max) = self.config.max_attempts {
                if attempts >= max.get() {
                    warn!(
                        %operation,
                        topic = payload.topic(),
                        attempts,
                        error = %attempt_error,
                        "giving up after configured attempts"
                    );
                    return Err(BridgeError::AttemptsExhausted {
                        operation,
                        attempts,
                        last: attempt_error,
                    });
                }
            }

            warn!(
                %correlation_id,
                %operation,
                topic = payload.topic(),
                attempt = attempts,
                error = %attempt_error,
                "error or timeout waiting for acknowledgment, re-attempting"
            );

            let delay = self.config.retry_delay();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }
}

impl std::fmt::Debug for MessageBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBridge")
            .field("config", &self.config)
            .field("subscriptions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.ack_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert!(config.max_attempts.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = BridgeConfig::new()
            .with_ack_timeout(Duration::from_millis(250))
            .with_retry_delay(Duration::ZERO)
            .with_max_attempts(3);
        assert_eq!(config.ack_timeout_ms, 250);
        assert!(config.retry_delay().is_zero());
        assert_eq!(config.max_attempts.map(|n| n.get()), Some(3));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").expect("empty config");
        assert_eq!(config.ack_timeout_ms, 10_000);

        let config: BridgeConfig =
            serde_json::from_str(r#"{"ack_timeout_ms": 100, "max_attempts": 5}"#)
                .expect("partial config");
        assert_eq!(config.ack_timeout_ms, 100);
        assert_eq!(config.max_attempts.map(|n| n.get()), Some(5));
        assert_eq!(config.retry_delay_ms, 500);
    }

    #[test]
    fn test_zero_max_attempts_means_unbounded() {
        let config = BridgeConfig::new().with_max_attempts(0);
        assert!(config.max_attempts.is_none());
    }
}
