//! Configuration types for gslb-dns.
//!
//! The whole daemon is driven by one YAML document (plus `GSLB_DNS__*`
//! environment overrides applied by the binary).

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::GslbError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    #[serde(default)]
    pub dns_server: DnsServerConfig,

    /// Name of the datacenter this node runs in.
    pub dc_name: String,

    /// Consul agent the retriever and discoverer talk to.
    #[serde(default)]
    pub consul_config: ConsulConfig,

    /// Health endpoint the catalog probes members through.
    pub healthcheck_config: HealthCheckConfig,

    /// Datacenter positions and geo database for the topology algorithm.
    pub geo_loc: GeoLocConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Reject configurations the daemon cannot start from.
    pub fn validate(&self) -> Result<(), GslbError> {
        if self.dc_name.is_empty() {
            return Err(GslbError::Config("dc_name is required".to_string()));
        }
        if self.geo_loc.dc_positions.is_empty() {
            return Err(GslbError::Config(
                "geo_loc.dc_positions is required".to_string(),
            ));
        }
        if self.healthcheck_config.healthcheck_address.is_empty() {
            return Err(GslbError::Config(
                "healthcheck_config.healthcheck_address is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsServerConfig {
    /// Address for the DNS server to listen on (UDP and TCP).
    #[serde(default = "default_dns_listen")]
    pub listen: SocketAddr,

    /// Trust the EDNS0 client-subnet option as the client address.
    #[serde(default)]
    pub trust_edns: bool,

    /// Networks allowed to use the TXT and `_all.` inspection surface.
    /// Loopback is always allowed.
    #[serde(default)]
    pub allowed_inspect: Vec<IpNet>,
}

impl Default for DnsServerConfig {
    fn default() -> Self {
        Self {
            listen: default_dns_listen(),
            trust_edns: false,
            allowed_inspect: Vec::new(),
        }
    }
}

fn default_dns_listen() -> SocketAddr {
    "0.0.0.0:53".parse().expect("static addr")
}

/// Consul agent access and polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Agent address, `host:port`.
    #[serde(default = "default_consul_addr")]
    pub addr: String,

    /// `http` or `https`.
    #[serde(default = "default_consul_scheme")]
    pub scheme: String,

    /// ACL token sent as `X-Consul-Token`.
    #[serde(default)]
    pub token: Option<String>,

    /// Basic-auth user, paired with `password`.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Interval between retriever polling passes.
    #[serde(with = "humantime_serde", default = "default_scrap_interval")]
    pub scrap_interval: Duration,

    /// Concurrent per-fqdn workers per polling pass.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Skip the catalog poll on this node (split data-plane deployments
    /// where another node publishes catalog state).
    #[serde(default)]
    pub disable_catalog_poll: bool,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            addr: default_consul_addr(),
            scheme: default_consul_scheme(),
            token: None,
            username: None,
            password: None,
            scrap_interval: default_scrap_interval(),
            workers: default_workers(),
            disable_catalog_poll: false,
        }
    }
}

fn default_consul_addr() -> String {
    "127.0.0.1:5800".to_string()
}

fn default_consul_scheme() -> String {
    "http".to_string()
}

fn default_scrap_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_workers() -> usize {
    10
}

/// Health endpoint the catalog runs member probes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Base URL of the health endpoint, e.g. `https://127.0.0.1:8443`.
    pub healthcheck_address: String,

    /// Basic-auth user for the endpoint.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic-auth password for the endpoint.
    #[serde(default)]
    pub password: Option<String>,

    /// Checker plugins exposed by the endpoint, forwarded as-is.
    #[serde(default)]
    pub plugins: Vec<PluginHealthCheckConfig>,
}

/// Descriptor of an external checker plugin served by the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHealthCheckConfig {
    /// Plugin name referenced by health check definitions.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Executable path on the health endpoint host.
    pub path: String,
    /// Extra arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Geolocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocConfig {
    /// Known datacenters, in priority/declaration order.
    pub dc_positions: Vec<DcPosition>,

    /// MaxMind City database used when no CIDR matches.
    #[serde(default)]
    pub geo_db: Option<GeoDbConfig>,
}

/// Geo database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoDbConfig {
    /// Path of the `.mmdb` file.
    pub path: PathBuf,
}

/// Geographic coordinates, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Degrees east.
    pub longitude: f64,
    /// Degrees north.
    pub latitude: f64,
}

/// A datacenter with its position and the networks it definitively owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcPosition {
    /// Datacenter name, matching `Member::dc` values.
    pub dc_name: String,
    /// Location used for distance ranking.
    #[serde(default)]
    pub position: Position,
    /// Networks resolved to this datacenter without a geo lookup.
    #[serde(default)]
    pub cidrs: Vec<IpNet>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "gslb_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
