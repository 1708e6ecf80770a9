//! GSLB data model: entries, members, health checks and signatures.
//!
//! Entries are the declarative unit written to the KV store; the signature
//! over `{entry, healthcheck}` is the only change predicate the retriever
//! uses, so it must be deterministic for a given payload.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::GslbError;

/// Load-balancing algorithm selectable per chain stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbAlgo {
    /// Sequential rotation over the member list.
    #[default]
    RoundRobin,
    /// Weighted round-robin driven by member ratios.
    Ratio,
    /// Geographic selection of the closest datacenter.
    Topology,
    /// Uniform random pick.
    Random,
    /// Alias of [`LbAlgo::Random`]; the name historically meant leaving
    /// resolution to a downstream resolver.
    ReturnToDns,
}

/// One IP endpoint of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// IPv4 or IPv6 literal.
    pub ip: String,
    /// Datacenter the endpoint lives in.
    pub dc: String,
    /// Weight for the RATIO algorithm; 0 weighs as 1.
    #[serde(default)]
    pub ratio: u32,
    /// Administratively disabled marker.
    #[serde(default)]
    pub disabled: bool,
}

impl Member {
    /// Whether the member address is an IPv6 literal.
    pub fn is_ipv6(&self) -> bool {
        self.ip.contains(':')
    }
}

/// Declarative record naming an FQDN, its members and LB policies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entry {
    /// Canonical (lowercase, dot-terminated) name the entry answers for.
    pub fqdn: String,
    /// IPv4 members, declaration order preserved.
    #[serde(default)]
    pub members_ipv4: Vec<Member>,
    /// IPv6 members, declaration order preserved.
    #[serde(default)]
    pub members_ipv6: Vec<Member>,
    /// First algorithm tried for each answer slot.
    #[serde(default)]
    pub lb_algo_preferred: LbAlgo,
    /// Second algorithm tried when the preferred stage fails.
    #[serde(default)]
    pub lb_algo_alternate: LbAlgo,
    /// Last-resort algorithm.
    #[serde(default)]
    pub lb_algo_fallback: LbAlgo,
    /// Maximum distinct members returned per answer; ≤1 means one.
    #[serde(default)]
    pub max_answer_returned: u32,
    /// TTL set on answer records; 0 falls back to 60.
    #[serde(default)]
    pub ttl: u32,
    /// Free-form labels used by admin queries only.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entry {
    /// All members, IPv4 first then IPv6.
    pub fn all_members(&self) -> Vec<Member> {
        let mut members = self.members_ipv4.clone();
        members.extend(self.members_ipv6.iter().cloned());
        members
    }
}

/// Range of HTTP statuses counted as healthy, `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    /// Inclusive lower bound.
    pub start: u16,
    /// Exclusive upper bound.
    pub end: u16,
}

impl Default for StatusRange {
    fn default() -> Self {
        Self {
            start: 200,
            end: 201,
        }
    }
}

/// Probe definition variants executed by the external health endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckDefinition {
    /// HTTP(S) request against the member.
    Http {
        /// Request path.
        path: String,
        /// Request method, GET when empty.
        #[serde(default)]
        method: String,
        /// Host header override.
        #[serde(default)]
        host: String,
        /// Statuses counted as healthy.
        #[serde(default)]
        expected_statuses: StatusRange,
    },
    /// TCP connect with optional payload exchange.
    Tcp {
        /// Bytes sent after connect.
        #[serde(default)]
        send: String,
        /// Substring expected in the reply.
        #[serde(default)]
        receive: String,
    },
    /// gRPC health protocol probe.
    Grpc {
        /// Service name passed to the health service.
        #[serde(default)]
        service_name: String,
    },
    /// No probing; the member is always considered healthy.
    #[default]
    None,
}

/// Health check attached to an entry, shipped verbatim to the health
/// endpoint as the check request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Delay between two probes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Per-probe timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Port probed on the member address.
    #[serde(default)]
    pub port: u16,
    /// Whether the probe wraps its transport in TLS.
    #[serde(default)]
    pub tls_enabled: bool,
    /// The probe to run.
    #[serde(default)]
    pub checker: CheckDefinition,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            port: 0,
            tls_enabled: false,
            checker: CheckDefinition::None,
        }
    }
}

/// Entry plus health check plus the deterministic digest of both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEntry {
    /// The declarative entry.
    pub entry: Entry,
    /// Health check registered for every member.
    #[serde(default)]
    pub healthcheck: HealthCheck,
    /// Hex SHA-256 over the serialized `{entry, healthcheck}` payload.
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize)]
struct SignaturePayload<'a> {
    entry: &'a Entry,
    healthcheck: &'a HealthCheck,
}

impl SignedEntry {
    /// Build a signed entry, computing the signature immediately.
    pub fn new(entry: Entry, healthcheck: HealthCheck) -> Result<Self, GslbError> {
        let mut signed = Self {
            entry,
            healthcheck,
            signature: String::new(),
        };
        signed.sign()?;
        Ok(signed)
    }

    /// Digest of the current payload, independent of the stored signature.
    pub fn compute_signature(&self) -> Result<String, GslbError> {
        digest(&SignaturePayload {
            entry: &self.entry,
            healthcheck: &self.healthcheck,
        })
    }

    /// Recompute and store the signature. Must be called after every
    /// payload mutation.
    pub fn sign(&mut self) -> Result<(), GslbError> {
        self.signature = self.compute_signature()?;
        Ok(())
    }

    /// Check the embedded signature against the payload.
    pub fn verify(&self) -> Result<(), GslbError> {
        let computed = self.compute_signature()?;
        if computed != self.signature {
            return Err(GslbError::SignatureMismatch {
                fqdn: self.entry.fqdn.clone(),
                stored: self.signature.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// Hex SHA-256 of the canonical JSON serialization of `value`.
///
/// Struct fields serialize in declaration order and member lists keep their
/// declared order, so equal digests imply byte-identical payloads.
pub fn digest<T: Serialize>(value: &T) -> Result<String, GslbError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Canonical DNS name form: lowercase, dot-terminated.
pub fn canonical_fqdn(name: &str) -> String {
    let mut fqdn = name.to_ascii_lowercase();
    if !fqdn.ends_with('.') {
        fqdn.push('.');
    }
    fqdn
}
