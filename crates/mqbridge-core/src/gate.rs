//! Connectivity gating for command submission.
//!
//! The gate tracks two independent conditions: the transport is connected and
//! no maintenance operation (firmware update, broker migration) is in
//! progress. Every bridge call waits for both before submitting a command, so
//! the engine's queue is never filled while nothing can be sent.
//!
//! The wait is level-triggered: a waiter arriving after the state is already
//! satisfied proceeds immediately.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Snapshot of the two gating conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// The transport underneath the engine is connected.
    pub transport_up: bool,
    /// No maintenance operation is in progress.
    pub maintenance_idle: bool,
}

impl ConnectivityState {
    /// Both conditions hold; command submission may proceed.
    pub fn ready(self) -> bool {
        self.transport_up && self.maintenance_idle
    }
}

/// Lifecycle notification from the transport or maintenance controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    TransportConnected,
    TransportDisconnected,
    MaintenanceStarted,
    MaintenanceStopped,
}

/// Process-wide condition gating new command submission.
///
/// Producers flip the flags from any context; any number of tasks can wait in
/// [`ConnectivityGate::ready`] concurrently and all of them resume once both
/// flags hold.
#[derive(Debug)]
pub struct ConnectivityGate {
    state: watch::Sender<ConnectivityState>,
}

impl ConnectivityGate {
    /// Create a gate with the transport down and maintenance idle.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectivityState {
            transport_up: false,
            maintenance_idle: true,
        });
        Self { state }
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Mark the transport connected or disconnected.
    pub fn set_transport_up(&self, up: bool) {
        self.state.send_modify(|s| s.transport_up = up);
    }

    /// Mark a maintenance operation finished or in progress.
    pub fn set_maintenance_idle(&self, idle: bool) {
        self.state.send_modify(|s| s.maintenance_idle = idle);
    }

    /// Apply a lifecycle event, logging the transition.
    pub fn apply(&self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::TransportConnected => {
                info!("transport connected");
                self.set_transport_up(true);
            }
            ConnectivityEvent::TransportDisconnected => {
                info!("transport disconnected, deferring new command submissions");
                self.set_transport_up(false);
            }
            ConnectivityEvent::MaintenanceStarted => {
                info!("maintenance started, deferring new command submissions");
                self.set_maintenance_idle(false);
            }
            ConnectivityEvent::MaintenanceStopped => {
                info!("maintenance finished, no longer deferring command submissions");
                self.set_maintenance_idle(true);
            }
        }
    }

    /// Wait until the transport is up and maintenance is idle.
    pub async fn ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in self, so the channel cannot close mid-wait.
        let _ = rx.wait_for(|s| s.ready()).await;
    }

    /// Bounded variant of [`ConnectivityGate::ready`].
    ///
    /// Returns `true` if the gate opened within `timeout`.
    pub async fn ready_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.ready()).await.is_ok()
    }
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_initial_state_blocks() {
        let gate = ConnectivityGate::new();
        assert!(!gate.state().ready());
        assert!(!gate.ready_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_ready_is_level_triggered() {
        let gate = ConnectivityGate::new();
        gate.set_transport_up(true);
        // Waiter arrives after the state is already satisfied.
        assert!(gate.ready_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_maintenance_blocks_even_when_transport_up() {
        let gate = ConnectivityGate::new();
        gate.set_transport_up(true);
        gate.apply(ConnectivityEvent::MaintenanceStarted);
        assert!(!gate.ready_timeout(Duration::from_millis(20)).await);

        gate.apply(ConnectivityEvent::MaintenanceStopped);
        assert!(gate.ready_timeout(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_all_concurrent_waiters_unblock() {
        let gate = Arc::new(ConnectivityGate::new());

        let mut waiters = Vec::new();
        for _ in 0..10 {
            let gate = gate.clone();
            waiters.push(tokio::spawn(async move { gate.ready().await }));
        }

        // Let every waiter park on the closed gate first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        gate.set_transport_up(true);
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter did not unblock")
                .expect("waiter panicked");
        }
    }

    #[tokio::test]
    async fn test_event_transitions() {
        let gate = ConnectivityGate::new();
        gate.apply(ConnectivityEvent::TransportConnected);
        assert!(gate.state().ready());
        gate.apply(ConnectivityEvent::TransportDisconnected);
        assert!(!gate.state().transport_up);
    }
}
