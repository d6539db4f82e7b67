//! Inbound message dispatch.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::registry::SubscriptionRegistry;

/// Routes engine-delivered inbound messages to registered handlers.
///
/// The engine invokes [`InboundDispatcher::dispatch`] on its own context for
/// every inbound message; each matching handler runs synchronously, in
/// registry order. A message that matches no live subscription is dropped
/// with a log line, never an error.
#[derive(Debug, Clone)]
pub struct InboundDispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl InboundDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher routes through.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Route one inbound message.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        let matches = self.registry.matches(topic);
        if matches.is_empty() {
            warn!(topic, "no subscription for inbound message, dropping");
            return;
        }
        for entry in matches {
            trace!(topic, filter = %entry.topic_filter, "routing inbound message");
            entry.handler.on_message(topic, payload);
        }
    }
}
