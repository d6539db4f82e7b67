//! Per-call completion signaling.
//!
//! A [`CompletionSignal`] is created by the call site that waits on it and set
//! from the engine's completion or inbound callbacks. It carries a small set
//! of named bits; waiting observes all requested bits and clears them in the
//! same step, so a leftover bit from an earlier cycle can never satisfy a
//! fresh wait.
//!
//! One logical waiter per instance. This is not a broadcast mechanism;
//! fan-out belongs to the subscription registry, not here.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

/// Set when a publish command completes.
pub const PUBLISH_DONE: u8 = 1 << 0;
/// Set when a subscribe command completes.
pub const SUBSCRIBE_DONE: u8 = 1 << 1;
/// Set when an unsubscribe command completes.
pub const UNSUBSCRIBE_DONE: u8 = 1 << 2;
/// Set by an inbound handler when the message a caller waits for arrives.
pub const INBOUND_RECEIVED: u8 = 1 << 3;

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// All awaited bits were observed and cleared.
    Observed,
    /// The deadline elapsed first; no bits were cleared.
    TimedOut,
}

impl WaitOutcome {
    /// True when the awaited bits were observed.
    pub fn observed(self) -> bool {
        matches!(self, Self::Observed)
    }
}

/// Wait primitive pairing a bit word with a wake-up.
///
/// `set` is synchronous and callable from any context, including the engine's
/// completion callbacks; only `wait`/`wait_timeout` suspend.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    bits: Mutex<u8>,
    notify: Notify,
}

impl CompletionSignal {
    /// Create a signal with no bits set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bits and wake the waiter if one is parked.
    pub fn set(&self, bits: u8) {
        {
            let mut current = self.bits.lock().unwrap_or_else(|e| e.into_inner());
            *current |= bits;
        }
        self.notify.notify_one();
    }

    /// Bits currently set, without clearing them.
    pub fn peek(&self) -> u8 {
        *self.bits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Await all of `bits`, clearing them on observation.
    pub async fn wait(&self, bits: u8) -> u8 {
        loop {
            // Register for a wake-up before inspecting the bits, otherwise a
            // set() between the check and the park is lost.
            let notified = self.notify.notified();
            {
                let mut current = self.bits.lock().unwrap_or_else(|e| e.into_inner());
                if *current & bits == bits {
                    *current &= !bits;
                    return bits;
                }
            }
            notified.await;
        }
    }

    /// Await all of `bits` for at most `timeout`.
    pub async fn wait_timeout(&self, bits: u8, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.wait(bits)).await {
            Ok(_) => WaitOutcome::Observed,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_observes_already_set_bits() {
        let signal = CompletionSignal::new();
        signal.set(PUBLISH_DONE);
        let observed = signal.wait(PUBLISH_DONE).await;
        assert_eq!(observed, PUBLISH_DONE);
    }

    #[tokio::test]
    async fn test_wait_clears_observed_bits() {
        let signal = CompletionSignal::new();
        signal.set(SUBSCRIBE_DONE | INBOUND_RECEIVED);
        signal.wait(SUBSCRIBE_DONE).await;
        assert_eq!(signal.peek(), INBOUND_RECEIVED);

        let outcome = signal
            .wait_timeout(SUBSCRIBE_DONE, Duration::from_millis(20))
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_set_wakes_parked_waiter() {
        let signal = Arc::new(CompletionSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(UNSUBSCRIBE_DONE).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set(UNSUBSCRIBE_DONE);

        let observed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not wake")
            .expect("waiter panicked");
        assert_eq!(observed, UNSUBSCRIBE_DONE);
    }

    #[tokio::test]
    async fn test_all_bits_required() {
        let signal = Arc::new(CompletionSignal::new());
        signal.set(PUBLISH_DONE);

        let outcome = signal
            .wait_timeout(PUBLISH_DONE | INBOUND_RECEIVED, Duration::from_millis(20))
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        // The partial bit is still there for a later complete wait.
        assert_eq!(signal.peek(), PUBLISH_DONE);

        signal.set(INBOUND_RECEIVED);
        let outcome = signal
            .wait_timeout(PUBLISH_DONE | INBOUND_RECEIVED, Duration::from_millis(100))
            .await;
        assert_eq!(outcome, WaitOutcome::Observed);
        assert_eq!(signal.peek(), 0);
    }

    #[tokio::test]
    async fn test_timeout_elapses_without_set() {
        let signal = CompletionSignal::new();
        let outcome = signal
            .wait_timeout(PUBLISH_DONE, Duration::from_millis(20))
            .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
