//! Error types for gslb-dns.

use thiserror::Error;

/// Errors that can occur across the GSLB pipeline.
#[derive(Debug, Error)]
pub enum GslbError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Consul HTTP API transport error
    #[error("Consul client error: {0}")]
    Consul(#[from] reqwest::Error),

    /// Consul returned a non-success status
    #[error("Consul API error: {status}: {body}")]
    ConsulApi {
        /// HTTP status returned by the agent.
        status: u16,
        /// Response body, for the logs.
        body: String,
    },

    /// JSON encode/decode failure (KV values, healthcheck bodies)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decode failure (Consul KV values arrive encoded)
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A stored signed entry whose signature does not match its payload
    #[error("signature mismatch for {fqdn}: stored {stored}, computed {computed}")]
    SignatureMismatch {
        /// Entry the mismatch was detected on.
        fqdn: String,
        /// Signature embedded in the stored value.
        stored: String,
        /// Signature recomputed from the payload.
        computed: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// No datacenter could be determined for a client address
    #[error("no dc found for {0}")]
    NoDc(std::net::IpAddr),

    /// The resolve context carries no usable client address
    #[error("no remote address found")]
    NoRemoteAddr,

    /// No member available in the selected datacenter
    #[error("no member found for dc {0}")]
    NoMember(String),

    /// Every stage of an LB chain failed
    #[error("lb chain exhausted: {0}")]
    ChainExhausted(String),

    /// Geo database lookup failure
    #[error("geo lookup failed for {0}")]
    GeoLookup(std::net::IpAddr),

    /// Entry or member not found
    #[error("not found: {0}")]
    NotFound(String),
}
