//! Blocking pub/sub operations for concurrent tasks.
//!
//! This crate is the caller-facing half of mqbridge: it turns the
//! single-consumer, callback-completing command engine defined in
//! `mqbridge-core` into the awaitable operations `publish`, `subscribe`, and
//! `unsubscribe`, plus a request/response helper, all safe to call from any
//! number of concurrent tasks.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | rumqttc-backed [`MqttEngine`] |
//!
//! ## Architecture
//!
//! - **MessageBridge**: the blocking entry points and their retry loop
//! - **SubscriptionRegistry**: live topic-filter → handler table, mutated only
//!   on acknowledged subscribe/unsubscribe completions
//! - **InboundDispatcher**: routes engine-delivered messages to handlers
//! - **MqttEngine**: bundled engine adapter over a real MQTT connection
//!
//! A bridge call never returns on another call's completion: every cycle
//! carries its own correlation id and completion signal. By default a call
//! retries until the engine acknowledges success; see
//! [`BridgeConfig::with_max_attempts`] for bounded behavior.

pub mod bridge;
pub mod dispatcher;
pub mod registry;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use bridge::{AttemptError, BridgeConfig, BridgeError, BridgeResult, MessageBridge};
pub use dispatcher::InboundDispatcher;
pub use registry::{
    topic_matches, AddOutcome, InboundHandler, RemoveOutcome, SubscriptionEntry,
    SubscriptionRegistry,
};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttEngine, MqttEngineConfig};

// Re-export the engine contract so callers depend on one crate.
pub use mqbridge_core::{
    Command, CommandCompletion, CommandEngine, CommandPayload, CommandStatus, ConnectivityEvent,
    ConnectivityGate, ConnectivityState, CorrelationAllocator, CorrelationId, OperationKind,
    QosLevel, SubmitError,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
