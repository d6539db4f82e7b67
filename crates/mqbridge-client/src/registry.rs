//! Subscription registry.
//!
//! Live mapping from topic filter to inbound-message handler, kept consistent
//! with the engine's acknowledged subscription state: entries are inserted
//! only from a successful subscribe completion and removed only from a
//! successful unsubscribe completion.
//!
//! ## Duplicate policy
//!
//! At most one entry exists per distinct filter string. Adding a filter that
//! is already present **replaces** the previous handler, so an acknowledged
//! retry of the same logical subscribe stays idempotent instead of failing.
//!
//! ## Matching
//!
//! Lookup uses MQTT filter semantics, implemented locally: `+` matches one
//! topic level, a trailing `#` matches the remainder. An exact filter match
//! short-circuits before any wildcard scan.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use mqbridge_core::QosLevel;
use tracing::{debug, warn};

/// Handler invoked for every inbound message routed to a subscription.
///
/// Runs synchronously on the engine's context. Handlers copy whatever payload
/// data they keep and must not wait on anything the engine itself completes.
/// Per-call state (a completion signal, a reply slot) lives in whatever the
/// handler value captures.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

impl<F> InboundHandler for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

/// One live subscription.
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub topic_filter: String,
    pub qos: QosLevel,
    pub handler: Arc<dyn InboundHandler>,
}

impl SubscriptionEntry {
    /// Create an entry for `topic_filter`.
    pub fn new(
        topic_filter: impl Into<String>,
        qos: QosLevel,
        handler: Arc<dyn InboundHandler>,
    ) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
            handler,
        }
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("topic_filter", &self.topic_filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Result of [`SubscriptionRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Replaced,
}

/// Result of [`SubscriptionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Topic filter to handler mapping shared by the bridge and the dispatcher.
///
/// A single lock guards the map, so a reader never observes a half-updated
/// entry and concurrent adds for distinct filters cannot lose each other.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any previous handler for the same filter.
    ///
    /// Called only from the subscribe completion path, only on success.
    pub fn add(&self, entry: SubscriptionEntry) -> AddOutcome {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.insert(entry.topic_filter.clone(), entry) {
            Some(previous) => {
                debug!(
                    filter = %previous.topic_filter,
                    "replaced existing subscription handler"
                );
                AddOutcome::Replaced
            }
            None => AddOutcome::Added,
        }
    }

    /// Remove the entry for `topic_filter`.
    ///
    /// Called only from the unsubscribe completion path, only on success.
    /// A missing entry is logged and otherwise harmless.
    pub fn remove(&self, topic_filter: &str) -> RemoveOutcome {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.remove(topic_filter) {
            Some(_) => RemoveOutcome::Removed,
            None => {
                warn!(filter = %topic_filter, "no subscription to remove");
                RemoveOutcome::NotFound
            }
        }
    }

    /// First entry whose filter matches `topic`, exact match preferred.
    pub fn lookup(&self, topic: &str) -> Option<SubscriptionEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(topic) {
            return Some(entry.clone());
        }
        entries
            .values()
            .find(|entry| topic_matches(&entry.topic_filter, topic))
            .cloned()
    }

    /// Every entry whose filter matches `topic`.
    pub fn matches(&self, topic: &str) -> Vec<SubscriptionEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|entry| topic_matches(&entry.topic_filter, topic))
            .cloned()
            .collect()
    }

    /// Registered filter strings, for diagnostics.
    pub fn filters(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True when no subscription is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("filters", &self.filters())
            .finish()
    }
}

/// MQTT-style topic filter matching.
///
/// `+` matches exactly one level, `#` matches the remaining levels and is
/// only valid as the final segment. A filter with `#` anywhere else matches
/// nothing.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return filter_parts.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (Arc<dyn InboundHandler>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn InboundHandler> = {
            let count = count.clone();
            Arc::new(move |_: &str, _: &[u8]| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (handler, count)
    }

    #[test]
    fn test_add_lookup_remove() {
        let registry = SubscriptionRegistry::new();
        let (handler, _) = counting_handler();

        let outcome = registry.add(SubscriptionEntry::new(
            "device/x",
            QosLevel::AtLeastOnce,
            handler,
        ));
        assert_eq!(outcome, AddOutcome::Added);
        assert!(registry.lookup("device/x").is_some());

        assert_eq!(registry.remove("device/x"), RemoveOutcome::Removed);
        assert!(registry.lookup("device/x").is_none());
        assert_eq!(registry.remove("device/x"), RemoveOutcome::NotFound);
    }

    #[test]
    fn test_duplicate_add_replaces() {
        let registry = SubscriptionRegistry::new();
        let (first, first_count) = counting_handler();
        let (second, second_count) = counting_handler();

        registry.add(SubscriptionEntry::new("a/b", QosLevel::AtMostOnce, first));
        let outcome = registry.add(SubscriptionEntry::new("a/b", QosLevel::AtMostOnce, second));
        assert_eq!(outcome, AddOutcome::Replaced);
        assert_eq!(registry.len(), 1);

        let entry = registry.lookup("a/b").expect("entry present");
        entry.handler.on_message("a/b", b"payload");
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exact_match_wins_over_wildcard() {
        let registry = SubscriptionRegistry::new();
        let (wild, _) = counting_handler();
        let (exact, exact_count) = counting_handler();

        registry.add(SubscriptionEntry::new("s/+", QosLevel::AtLeastOnce, wild));
        registry.add(SubscriptionEntry::new("s/1", QosLevel::AtLeastOnce, exact));

        let entry = registry.lookup("s/1").expect("entry present");
        assert_eq!(entry.topic_filter, "s/1");
        entry.handler.on_message("s/1", b"x");
        assert_eq!(exact_count.load(Ordering::SeqCst), 1);

        // Both filters match the topic.
        assert_eq!(registry.matches("s/1").len(), 2);
    }

    #[test]
    fn test_topic_matches_table() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("#", "a/b/c"));
        assert!(topic_matches("+/+/+", "a/b/c"));

        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(!topic_matches("a/#/c", "a/b/c"));
        assert!(!topic_matches("b/#", "a/b"));
    }

    #[test]
    fn test_concurrent_adds_all_land() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let (handler, _) = counting_handler();
                registry.add(SubscriptionEntry::new(
                    format!("topic/{i}"),
                    QosLevel::AtLeastOnce,
                    handler,
                ));
            }));
        }
        for handle in handles {
            handle.join().expect("add thread panicked");
        }
        assert_eq!(registry.len(), 16);
    }
}
