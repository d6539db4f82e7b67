//! Core contract and primitives for the mqbridge operation bridge.
//!
//! The bridge sits between many concurrent caller tasks and a single-consumer,
//! asynchronous pub/sub command engine that reports completion through
//! callbacks instead of return values. This crate holds everything both sides
//! agree on:
//!
//! - **CommandEngine**: the engine seam: non-blocking `submit`, exactly-once
//!   completion per accepted command ([`engine`])
//! - **CorrelationAllocator**: strictly increasing identifiers tying a
//!   submitted command to its completion ([`correlation`])
//! - **CompletionSignal**: the per-call wait primitive a caller parks on until
//!   its own operation finishes ([`signal`])
//! - **ConnectivityGate**: process-wide gating of command submission on
//!   transport and maintenance state ([`gate`])
//!
//! The caller-facing operations themselves (publish/subscribe/unsubscribe and
//! the subscription registry) live in `mqbridge-client`.

pub mod correlation;
pub mod engine;
pub mod gate;
pub mod signal;

pub use correlation::{CorrelationAllocator, CorrelationId};
pub use engine::{
    Command, CommandCompletion, CommandEngine, CommandPayload, CommandStatus, OperationKind,
    QosLevel, SubmitError,
};
pub use gate::{ConnectivityEvent, ConnectivityGate, ConnectivityState};
pub use signal::{CompletionSignal, WaitOutcome};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
