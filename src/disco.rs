//! Projects KV declarations into the catalog as service instances.
//!
//! Each node registers only the members of its own datacenter; every DC
//! runs its own discoverer. The registered health check makes the agent
//! POST the entry's check definition to the local health endpoint, whose
//! verdict drives member liveness in the catalog.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consul::{
    agent_duration, AgentServiceCheck, AgentServiceRegistration, ConsulClient, META_DC_KEY,
    META_ENTRY_KEY, TAG_DC_PREFIX, TAG_DISABLED, TAG_RATIO_PREFIX, TAG_TAG_PREFIX,
};
use crate::entry::{Member, SignedEntry};
use crate::events::{Event, EventBus, EventKind, MemberEvent};

/// Registers and deregisters member instances on KV entry events.
pub struct Discoverer {
    consul: ConsulClient,
    bus: Arc<EventBus>,
    dc_name: String,
    hc_addr: String,
}

impl Discoverer {
    /// Build a discoverer for the local datacenter; `hc_addr` is the base
    /// URL of the health endpoint the checks call.
    pub fn new(consul: ConsulClient, bus: Arc<EventBus>, dc_name: &str, hc_addr: &str) -> Self {
        Self {
            consul,
            bus,
            dc_name: dc_name.to_string(),
            hc_addr: hc_addr.trim_end_matches('/').to_string(),
        }
    }

    /// Apply KV events until the channel closes or `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<Event<SignedEntry>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("discoverer event loop shutting down");
                    return;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.apply(&event).await,
                        None => {
                            info!("discoverer event channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn apply(&self, event: &Event<SignedEntry>) {
        match event.kind {
            EventKind::Set => self.set_kv_entry(&event.subject).await,
            EventKind::Delete => self.remove_kv_entry(&event.subject).await,
        }
    }

    /// Register every local-DC member of the entry with its health check.
    pub async fn set_kv_entry(&self, signed: &SignedEntry) {
        let hc_body = match serde_json::to_string(&signed.healthcheck) {
            Ok(body) => body,
            Err(e) => {
                warn!(fqdn = %signed.entry.fqdn, error = %e, "unable to serialize healthcheck");
                return;
            }
        };
        for member in self.local_members(signed) {
            self.bus
                .members
                .emit(
                    EventKind::Set,
                    Arc::new(MemberEvent {
                        fqdn: signed.entry.fqdn.clone(),
                        member: member.clone(),
                    }),
                )
                .await;
            let registration = self.build_registration(signed, &member, &hc_body);
            debug!(id = %registration.id, "registering member instance");
            if let Err(e) = self.consul.register_service(&registration).await {
                warn!(id = %registration.id, error = %e, "failed to register service");
            }
        }
    }

    /// Deregister the entry's local-DC members by instance id.
    pub async fn remove_kv_entry(&self, signed: &SignedEntry) {
        for member in self.local_members(signed) {
            let id = instance_id(&signed.entry.fqdn, &member);
            debug!(id = %id, "deregistering member instance");
            if let Err(e) = self.consul.deregister_service(&id).await {
                warn!(id = %id, error = %e, "failed to deregister service");
            }
        }
    }

    fn local_members(&self, signed: &SignedEntry) -> Vec<Member> {
        signed
            .entry
            .all_members()
            .into_iter()
            .filter(|m| m.dc == self.dc_name)
            .collect()
    }

    fn build_registration(
        &self,
        signed: &SignedEntry,
        member: &Member,
        hc_body: &str,
    ) -> AgentServiceRegistration {
        let fqdn = &signed.entry.fqdn;
        let mut tags: Vec<String> = signed
            .entry
            .tags
            .iter()
            .map(|tag| format!("{TAG_TAG_PREFIX}{tag}"))
            .collect();
        tags.push(format!("{TAG_RATIO_PREFIX}{}", member.ratio));
        tags.push(format!("{TAG_DC_PREFIX}{}", member.dc));
        if member.disabled {
            tags.push(TAG_DISABLED.to_string());
        }
        AgentServiceRegistration {
            id: instance_id(fqdn, member),
            name: fqdn.clone(),
            tags,
            meta: HashMap::from([
                (META_DC_KEY.to_string(), member.dc.clone()),
                (META_ENTRY_KEY.to_string(), "true".to_string()),
            ]),
            address: member.ip.clone(),
            check: AgentServiceCheck {
                http: format!("{}/hc/{fqdn}/member/{}", self.hc_addr, member.ip),
                method: "POST".to_string(),
                body: hc_body.to_string(),
                interval: agent_duration(signed.healthcheck.interval),
                timeout: agent_duration(signed.healthcheck.timeout),
                tls_skip_verify: true,
            },
        }
    }
}

/// Catalog instance id of a member: `<fqdn><ip>`.
fn instance_id(fqdn: &str, member: &Member) -> String {
    format!("{fqdn}{}", member.ip)
}
