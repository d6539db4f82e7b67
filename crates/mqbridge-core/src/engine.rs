//! Contract between the bridge and the command engine.
//!
//! The engine is the external, single-consumer pub/sub client: it accepts one
//! command at a time through a non-blocking [`CommandEngine::submit`],
//! executes it against the network on its own context, and reports the outcome
//! by consuming the command's [`CommandCompletion`] exactly once. The bridge
//! never learns anything from the submit return value except whether the
//! command was accepted into the queue.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correlation::CorrelationId;

/// Quality of service for publish and subscribe operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery.
    #[default]
    AtLeastOnce,
    /// Assured single delivery, where the broker supports it.
    ExactlyOnce,
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtMostOnce => write!(f, "at_most_once"),
            Self::AtLeastOnce => write!(f, "at_least_once"),
            Self::ExactlyOnce => write!(f, "exactly_once"),
        }
    }
}

/// Outcome the engine reports for one completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// The operation was acknowledged.
    Success,
    /// The engine gave up on the command (protocol error, send failure,
    /// broker rejection).
    Failed,
    /// The transport went away while the command was in flight.
    Disconnected,
}

impl CommandStatus {
    /// True for [`CommandStatus::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// The operation a command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Subscribe => write!(f, "subscribe"),
            Self::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

/// Payload of one submitted command.
///
/// The bridge hands the engine an owned copy, so the data stays valid for as
/// long as the engine needs it regardless of what the caller does.
#[derive(Debug, Clone)]
pub enum CommandPayload {
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QosLevel,
    },
    Subscribe {
        topic_filter: String,
        qos: QosLevel,
    },
    Unsubscribe {
        topic_filter: String,
        qos: QosLevel,
    },
}

impl CommandPayload {
    /// The operation this payload performs.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Publish { .. } => OperationKind::Publish,
            Self::Subscribe { .. } => OperationKind::Subscribe,
            Self::Unsubscribe { .. } => OperationKind::Unsubscribe,
        }
    }

    /// The topic name or filter the command targets.
    pub fn topic(&self) -> &str {
        match self {
            Self::Publish { topic, .. } => topic,
            Self::Subscribe { topic_filter, .. } | Self::Unsubscribe { topic_filter, .. } => {
                topic_filter
            }
        }
    }
}

/// Exactly-once completion callback handed to the engine with each command.
///
/// Consuming `self` in [`CommandCompletion::complete`] makes double completion
/// unrepresentable. An engine that drops the completion without calling it
/// leaves the issuing call to time out and retry.
pub struct CommandCompletion {
    notify: Box<dyn FnOnce(CommandStatus) + Send>,
}

impl CommandCompletion {
    /// Wrap the callback the engine will invoke from its own context.
    pub fn new(notify: impl FnOnce(CommandStatus) + Send + 'static) -> Self {
        Self {
            notify: Box::new(notify),
        }
    }

    /// Report the command outcome.
    pub fn complete(self, status: CommandStatus) {
        (self.notify)(status);
    }
}

impl fmt::Debug for CommandCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandCompletion")
    }
}

/// One unit of work for the engine.
#[derive(Debug)]
pub struct Command {
    /// Unique token for this submission; a retry carries a fresh one.
    pub correlation_id: CorrelationId,
    /// What to do.
    pub payload: CommandPayload,
    /// Invoked exactly once, asynchronously, with the outcome.
    pub completion: CommandCompletion,
}

/// Rejection returned by a non-blocking submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The engine's command queue is full; try again later.
    #[error("engine command queue is full")]
    QueueFull,
    /// The engine has shut down and will accept nothing further.
    #[error("engine is shut down")]
    Closed,
}

/// Single-consumer asynchronous command engine.
///
/// Implementations execute accepted commands one at a time on their own
/// context and must invoke each command's completion exactly once. Inbound
/// messages do not flow through this trait; the engine is constructed with an
/// inbound dispatcher and feeds it directly.
pub trait CommandEngine: Send + Sync {
    /// Hand one command to the engine without blocking.
    fn submit(&self, command: Command) -> Result<(), SubmitError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_completion_runs_exactly_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let completion = {
            let calls = calls.clone();
            CommandCompletion::new(move |status| {
                assert!(status.is_success());
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        completion.complete(CommandStatus::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_kind_and_topic() {
        let payload = CommandPayload::Subscribe {
            topic_filter: "device/+/status".to_string(),
            qos: QosLevel::AtLeastOnce,
        };
        assert_eq!(payload.kind(), OperationKind::Subscribe);
        assert_eq!(payload.topic(), "device/+/status");
    }

    #[test]
    fn test_qos_serde_round_trip() {
        let json = serde_json::to_string(&QosLevel::ExactlyOnce).expect("serialize");
        assert_eq!(json, "\"exactly_once\"");
        let qos: QosLevel = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(qos, QosLevel::ExactlyOnce);
    }
}
