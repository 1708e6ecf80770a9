//! In-memory per-FQDN state the DNS resolver reads.
//!
//! The registry is fed exclusively by `catalog_entries` events: a SET
//! rebuilds the entry's three LB instances atomically (restarting their
//! selection state), a DELETE drops the entry. Readers grab one snapshot
//! per query, so an entry swap mid-query cannot mix member lists.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::entry::Entry;
use crate::events::{Event, EventKind};
use crate::geoloc::GeoLoc;
use crate::lb::{make_lb, LoadBalancer};
use crate::metrics;

/// One served entry with its chain of LB instances.
pub struct EntrySnapshot {
    /// The entry as last published from the catalog.
    pub entry: Entry,
    /// First-stage policy.
    pub lb_preferred: Box<dyn LoadBalancer>,
    /// Second-stage policy.
    pub lb_alternate: Box<dyn LoadBalancer>,
    /// Last-resort policy.
    pub lb_fallback: Box<dyn LoadBalancer>,
}

/// Concurrent map fqdn → snapshot, updated from catalog events.
pub struct Registry {
    entries: DashMap<String, Arc<EntrySnapshot>>,
    geoloc: Arc<GeoLoc>,
}

impl Registry {
    /// Create an empty registry; `geoloc` feeds the topology policies.
    pub fn new(geoloc: Arc<GeoLoc>) -> Self {
        Self {
            entries: DashMap::new(),
            geoloc,
        }
    }

    /// Install or replace the snapshot for an entry.
    pub fn set_entry(&self, entry: &Entry) {
        let snapshot = self.build_snapshot(entry.clone());
        debug!(fqdn = %entry.fqdn, "installing entry snapshot");
        self.entries.insert(entry.fqdn.clone(), Arc::new(snapshot));
        metrics::record_entries_count(self.entries.len());
    }

    /// Drop an entry.
    pub fn remove_entry(&self, fqdn: &str) {
        if self.entries.remove(fqdn).is_some() {
            debug!(fqdn, "removed entry snapshot");
        }
        metrics::record_entries_count(self.entries.len());
    }

    /// Snapshot for a canonical fqdn, if served.
    pub fn get(&self, fqdn: &str) -> Option<Arc<EntrySnapshot>> {
        self.entries.get(fqdn).map(|e| Arc::clone(e.value()))
    }

    /// Every served fqdn, for the catalog-dump TXT answer.
    pub fn fqdns(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of served entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is served yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn build_snapshot(&self, entry: Entry) -> EntrySnapshot {
        EntrySnapshot {
            lb_preferred: make_lb(&entry, entry.lb_algo_preferred, Arc::clone(&self.geoloc)),
            lb_alternate: make_lb(&entry, entry.lb_algo_alternate, Arc::clone(&self.geoloc)),
            lb_fallback: make_lb(&entry, entry.lb_algo_fallback, Arc::clone(&self.geoloc)),
            entry,
        }
    }

    /// Apply catalog events until the channel closes or `cancel` fires.
    /// Events for one fqdn arrive in emission order.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<Event<Entry>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("registry event loop shutting down");
                    return;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.apply(&event),
                        None => {
                            info!("registry event channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn apply(&self, event: &Event<Entry>) {
        match event.kind {
            EventKind::Set => self.set_entry(&event.subject),
            EventKind::Delete => self.remove_entry(&event.subject.fqdn),
        }
    }
}
