//! Typed, topic-keyed event bus connecting the retriever to its observers.
//!
//! Three fixed topics fan KV and catalog changes out to the registry and
//! discoverer. Every subscriber owns a bounded channel; emitters await the
//! send into each matching channel, so a saturated observer slows the
//! emitting retriever pass instead of growing memory without bound.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::entry::{Entry, Member, SignedEntry};
use crate::metrics;

/// In-flight events buffered per subscriber before emitters block.
const EVENT_BUFFER: usize = 1024;

/// Whether an event sets or deletes its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Subject created or replaced.
    Set,
    /// Subject removed.
    Delete,
}

impl EventKind {
    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Set => "set",
            EventKind::Delete => "delete",
        }
    }
}

/// A change notification carrying its subject.
#[derive(Debug)]
pub struct Event<T> {
    /// Set or delete.
    pub kind: EventKind,
    /// The changed value; shared, not copied, across subscribers.
    pub subject: Arc<T>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            subject: Arc::clone(&self.subject),
        }
    }
}

struct Subscriber<T> {
    kinds: Vec<EventKind>,
    tx: mpsc::Sender<Event<T>>,
}

/// One topic of the bus: a list of typed subscribers.
pub struct Topic<T> {
    name: &'static str,
    subscribers: RwLock<Vec<Subscriber<T>>>,
}

impl<T> Topic<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for the given event kinds. Dropping the
    /// returned receiver unsubscribes; closed channels are pruned on the
    /// next emit.
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::Receiver<Event<T>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.subscribers.write().push(Subscriber {
            kinds: kinds.to_vec(),
            tx,
        });
        rx
    }

    /// Deliver an event to every subscriber registered for its kind.
    /// Completion means the event sits in every subscriber queue.
    pub async fn emit(&self, kind: EventKind, subject: Arc<T>) {
        let event = Event { kind, subject };
        let targets: Vec<mpsc::Sender<Event<T>>> = {
            let mut subs = self.subscribers.write();
            subs.retain(|s| !s.tx.is_closed());
            subs.iter()
                .filter(|s| s.kinds.contains(&kind))
                .map(|s| s.tx.clone())
                .collect()
        };
        metrics::record_event(self.name, kind);
        for tx in targets {
            // send only fails when the receiver dropped mid-emit
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Number of live subscribers, for tests and introspection.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// A member change scoped to its entry, published on the `members` topic
/// for health-endpoint subsystems.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberEvent {
    /// Entry the member belongs to.
    pub fqdn: String,
    /// The member as declared.
    pub member: Member,
}

/// The process-wide bus with its three fixed topics.
pub struct EventBus {
    /// Declarative entries observed in the KV store.
    pub kv_entries: Topic<SignedEntry>,
    /// Entries recomputed from catalog liveness.
    pub catalog_entries: Topic<Entry>,
    /// Per-member changes seen by the discoverer.
    pub members: Topic<MemberEvent>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            kv_entries: Topic::new("kv_entries"),
            catalog_entries: Topic::new("catalog_entries"),
            members: Topic::new("members"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn entry(fqdn: &str, ttl: u32) -> Arc<Entry> {
        Arc::new(Entry {
            fqdn: fqdn.to_string(),
            ttl,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_subscriber_receives_matching_kinds_only() {
        let bus = EventBus::new();
        let mut rx = bus.catalog_entries.subscribe(&[EventKind::Set]);

        bus.catalog_entries
            .emit(EventKind::Delete, entry("a.test.", 0))
            .await;
        bus.catalog_entries
            .emit(EventKind::Set, entry("b.test.", 0))
            .await;

        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::Set);
        assert_eq!(got.subject.fqdn, "b.test.");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emission_order_preserved_per_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus
            .catalog_entries
            .subscribe(&[EventKind::Set, EventKind::Delete]);

        for ttl in 1..=5 {
            bus.catalog_entries
                .emit(EventKind::Set, entry("a.test.", ttl))
                .await;
        }
        bus.catalog_entries
            .emit(EventKind::Delete, entry("a.test.", 5))
            .await;

        for ttl in 1..=5 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.kind, EventKind::Set);
            assert_eq!(got.subject.ttl, ttl);
        }
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Delete);
    }

    #[tokio::test]
    async fn test_all_matching_subscribers_receive() {
        let bus = EventBus::new();
        let mut rx1 = bus.catalog_entries.subscribe(&[EventKind::Set]);
        let mut rx2 = bus.catalog_entries.subscribe(&[EventKind::Set]);

        bus.catalog_entries
            .emit(EventKind::Set, entry("a.test.", 0))
            .await;

        assert_eq!(rx1.recv().await.unwrap().subject.fqdn, "a.test.");
        assert_eq!(rx2.recv().await.unwrap().subject.fqdn, "a.test.");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.catalog_entries.subscribe(&[EventKind::Set]);
        assert_eq!(bus.catalog_entries.subscriber_count(), 1);

        drop(rx);
        bus.catalog_entries
            .emit(EventKind::Set, entry("a.test.", 0))
            .await;
        assert_eq!(bus.catalog_entries.subscriber_count(), 0);
    }
}
