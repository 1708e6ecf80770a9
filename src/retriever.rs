//! Polling synchronization of KV declarations and catalog liveness.
//!
//! Two independent loops list the KV store and the catalog on a fixed
//! interval, diff what they see against per-fqdn signature caches, and
//! publish only the changes on the event bus. Polling hides transient
//! backend errors at the cost of a bounded convergence latency.

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConsulConfig;
use crate::consul::{
    entries_filter, AgentService, ConsulClient, KvPair, KV_ENTRIES_PREFIX, TAG_DC_PREFIX,
    TAG_DISABLED, TAG_RATIO_PREFIX,
};
use crate::entry::{canonical_fqdn, digest, Entry, Member, SignedEntry};
use crate::error::GslbError;
use crate::events::{EventBus, EventKind};
use crate::metrics::{self, PollSource};

/// Polls the KV store and the catalog, emitting change events.
pub struct Retriever {
    consul: ConsulClient,
    bus: Arc<EventBus>,
    dc_name: String,
    workers: usize,
    interval: Duration,
    poll_catalog_enabled: bool,
    kv_cache: DashMap<String, Arc<SignedEntry>>,
    catalog_sigs: DashMap<String, String>,
}

impl Retriever {
    /// Build a retriever for the local datacenter.
    pub fn new(consul: ConsulClient, bus: Arc<EventBus>, cnf: &ConsulConfig, dc_name: &str) -> Self {
        Self {
            consul,
            bus,
            dc_name: dc_name.to_string(),
            workers: cnf.workers.max(1),
            interval: cnf.scrap_interval,
            poll_catalog_enabled: !cnf.disable_catalog_poll,
            kv_cache: DashMap::new(),
            catalog_sigs: DashMap::new(),
        }
    }

    /// Run one immediate pass of each loop, then poll until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.interval, "starting retriever");
        self.tick_kv().await;
        if self.poll_catalog_enabled {
            self.tick_catalog().await;
        } else {
            info!("catalog polling disabled by configuration");
        }

        let kv_task = tokio::spawn(Arc::clone(&self).run_kv(cancel.clone()));
        let catalog_task = self
            .poll_catalog_enabled
            .then(|| tokio::spawn(Arc::clone(&self).run_catalog(cancel.clone())));

        let _ = kv_task.await;
        if let Some(task) = catalog_task {
            let _ = task.await;
        }
        info!("retriever stopped");
    }

    async fn run_kv(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.tick_kv().await,
            }
        }
    }

    async fn run_catalog(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.tick_catalog().await,
            }
        }
    }

    async fn tick_kv(&self) {
        match self.poll_kv().await {
            Ok(()) => metrics::record_poll(PollSource::Kv, true),
            Err(e) => {
                error!(error = %e, "error while polling kv");
                metrics::record_poll(PollSource::Kv, false);
            }
        }
    }

    async fn tick_catalog(&self) {
        match self.poll_catalog().await {
            Ok(()) => metrics::record_poll(PollSource::Catalog, true),
            Err(e) => {
                error!(error = %e, "error while polling catalog");
                metrics::record_poll(PollSource::Catalog, false);
            }
        }
    }

    async fn poll_kv(&self) -> Result<(), GslbError> {
        debug!("polling kv");
        let pairs = self.consul.kv_list(KV_ENTRIES_PREFIX).await?;
        debug!(count = pairs.len(), "kv entries listed");
        self.sync_kv(pairs).await;
        debug!("polling kv done");
        Ok(())
    }

    /// Diff a full KV listing against the cache, emitting SETs for new or
    /// changed entries and DELETEs for vanished ones.
    async fn sync_kv(&self, pairs: Vec<KvPair>) {
        let mut to_remove: HashSet<String> =
            self.kv_cache.iter().map(|e| e.key().clone()).collect();

        let mut work = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let Some(raw_name) = pair.key.strip_prefix(KV_ENTRIES_PREFIX) else {
                continue;
            };
            if raw_name.is_empty() {
                continue;
            }
            let fqdn = canonical_fqdn(raw_name);
            // still listed, so not deleted — even if it fails to parse below
            to_remove.remove(&fqdn);
            work.push((fqdn, pair));
        }

        // one worker owns each fqdn for the pass, so per-key emission
        // order is the observation order
        stream::iter(work)
            .for_each_concurrent(self.workers, |(fqdn, pair)| async move {
                self.sync_kv_pair(fqdn, pair).await;
            })
            .await;

        for fqdn in to_remove {
            if let Some((_, signed)) = self.kv_cache.remove(&fqdn) {
                debug!(fqdn, "kv entry deleted");
                self.bus
                    .kv_entries
                    .emit(EventKind::Delete, Arc::clone(&signed))
                    .await;
                if self.catalog_sigs.remove(&fqdn).is_some() {
                    self.bus
                        .catalog_entries
                        .emit(EventKind::Delete, Arc::new(signed.entry.clone()))
                        .await;
                }
            }
        }
    }

    async fn sync_kv_pair(&self, fqdn: String, pair: KvPair) {
        let bytes = match pair.decoded_value() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(fqdn, error = %e, "undecodable kv value");
                return;
            }
        };
        let signed: SignedEntry = match serde_json::from_slice(&bytes) {
            Ok(signed) => signed,
            Err(e) => {
                error!(fqdn, error = %e, "unparseable signed entry");
                return;
            }
        };
        if let Err(e) = signed.verify() {
            error!(fqdn, error = %e, "signed entry failed verification");
            return;
        }

        let changed = match self.kv_cache.get(&fqdn) {
            None => true,
            Some(current) => current.signature != signed.signature,
        };
        if !changed {
            return;
        }
        let signed = Arc::new(signed);
        self.kv_cache.insert(fqdn.clone(), Arc::clone(&signed));
        debug!(fqdn, "kv entry changed");
        self.bus.kv_entries.emit(EventKind::Set, signed).await;
    }

    async fn poll_catalog(&self) -> Result<(), GslbError> {
        debug!("polling catalog");
        let names = self
            .consul
            .catalog_services(&entries_filter(&self.dc_name))
            .await?;
        debug!(count = names.len(), "catalog services listed");
        stream::iter(names)
            .for_each_concurrent(self.workers, |fqdn| async move {
                self.sync_catalog_service(fqdn).await;
            })
            .await;
        debug!("polling catalog done");
        Ok(())
    }

    async fn sync_catalog_service(&self, fqdn: String) {
        // the KV declaration is authoritative; unknown services are not ours
        let Some(cached) = self.kv_cache.get(&fqdn).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let instances = match self.consul.health_service(&fqdn, true).await {
            Ok(instances) => instances,
            Err(e) => {
                error!(fqdn, error = %e, "error while listing healthy instances");
                return;
            }
        };
        let services: Vec<AgentService> = instances.into_iter().map(|e| e.service).collect();
        self.apply_catalog_instances(&fqdn, &cached.entry, &services)
            .await;
    }

    /// Rebuild the live entry from healthy instances and publish it when
    /// its digest moved.
    async fn apply_catalog_instances(
        &self,
        fqdn: &str,
        declared: &Entry,
        instances: &[AgentService],
    ) {
        let entry = build_catalog_entry(declared, instances, &self.dc_name);
        let signature = match digest(&entry) {
            Ok(signature) => signature,
            Err(e) => {
                error!(fqdn, error = %e, "error while signing catalog entry");
                return;
            }
        };
        let changed = match self.catalog_sigs.get(fqdn) {
            None => true,
            Some(current) => *current != signature,
        };
        if !changed {
            return;
        }
        self.catalog_sigs.insert(fqdn.to_string(), signature);
        debug!(fqdn, "catalog entry changed");
        self.bus
            .catalog_entries
            .emit(EventKind::Set, Arc::new(entry))
            .await;
    }
}

/// The declarative entry with its members replaced by the currently
/// healthy catalog instances.
fn build_catalog_entry(declared: &Entry, instances: &[AgentService], local_dc: &str) -> Entry {
    let mut members_ipv4 = Vec::new();
    let mut members_ipv6 = Vec::new();
    for instance in instances {
        let member = instance_to_member(instance, local_dc);
        if member.is_ipv6() {
            members_ipv6.push(member);
        } else {
            members_ipv4.push(member);
        }
    }
    Entry {
        fqdn: declared.fqdn.clone(),
        members_ipv4,
        members_ipv6,
        lb_algo_preferred: declared.lb_algo_preferred,
        lb_algo_alternate: declared.lb_algo_alternate,
        lb_algo_fallback: declared.lb_algo_fallback,
        max_answer_returned: declared.max_answer_returned,
        ttl: declared.ttl,
        tags: declared.tags.clone(),
    }
}

/// Translate a registered instance back into a member via its tags.
fn instance_to_member(service: &AgentService, local_dc: &str) -> Member {
    let mut ratio = 0u32;
    let mut dc = local_dc.to_string();
    let mut disabled = false;
    for tag in &service.tags {
        if let Some(raw) = tag.strip_prefix(TAG_RATIO_PREFIX) {
            ratio = raw.parse().unwrap_or_else(|_| {
                warn!(id = %service.id, tag, "unparseable ratio tag");
                0
            });
            continue;
        }
        if let Some(raw) = tag.strip_prefix(TAG_DC_PREFIX) {
            dc = raw.to_string();
            continue;
        }
        if tag == TAG_DISABLED {
            disabled = true;
        }
    }
    Member {
        ip: service.address.clone(),
        dc,
        ratio,
        disabled,
    }
}
