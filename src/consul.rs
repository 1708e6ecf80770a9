//! Thin HTTP client for the Consul agent API surface the GSLB uses:
//! KV listing, catalog/health queries and agent service (de)registration.

use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::ConsulConfig;
use crate::error::GslbError;

/// KV prefix under which signed entries are stored, fqdn appended.
pub const KV_ENTRIES_PREFIX: &str = "gsloc/entries/";
/// Instance tag carrying the member weight.
pub const TAG_RATIO_PREFIX: &str = "gsloc_ratio=";
/// Instance tag carrying a free-form entry tag.
pub const TAG_TAG_PREFIX: &str = "gsloc_tag-";
/// Instance tag carrying the member datacenter.
pub const TAG_DC_PREFIX: &str = "gsloc_dc=";
/// Instance tag marking an administratively disabled member.
pub const TAG_DISABLED: &str = "gsloc_disabled";
/// Instance metadata key marking GSLB-owned services.
pub const META_ENTRY_KEY: &str = "gsloc_entry";
/// Instance metadata key carrying the member datacenter.
pub const META_DC_KEY: &str = "gsloc_dc";

/// One KV pair as listed by the agent; `value` is base64 on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvPair {
    /// Full key, prefix included.
    pub key: String,
    /// Base64-encoded value; absent for directory placeholders.
    #[serde(default)]
    pub value: Option<String>,
}

impl KvPair {
    /// The stored bytes, base64-decoded.
    pub fn decoded_value(&self) -> Result<Vec<u8>, GslbError> {
        let raw = self.value.as_deref().unwrap_or_default();
        Ok(base64::engine::general_purpose::STANDARD.decode(raw)?)
    }
}

/// Service description inside catalog and health responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentService {
    /// Instance id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Service name (the entry fqdn).
    pub service: String,
    /// Instance tags.
    pub tags: Vec<String>,
    /// Instance address.
    pub address: String,
    /// Instance metadata.
    pub meta: HashMap<String, String>,
}

/// One entry of a health-endpoint service listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    /// The instance itself.
    pub service: AgentService,
}

/// Check attached to a registered service instance.
#[derive(Debug, Clone, Serialize)]
pub struct AgentServiceCheck {
    /// Probe URL invoked by the agent.
    #[serde(rename = "HTTP")]
    pub http: String,
    /// HTTP method for the probe.
    #[serde(rename = "Method")]
    pub method: String,
    /// Request body shipped with every probe.
    #[serde(rename = "Body")]
    pub body: String,
    /// Delay between probes, agent duration syntax.
    #[serde(rename = "Interval")]
    pub interval: String,
    /// Probe timeout, agent duration syntax.
    #[serde(rename = "Timeout")]
    pub timeout: String,
    /// Skip TLS verification toward the health endpoint.
    #[serde(rename = "TLSSkipVerify")]
    pub tls_skip_verify: bool,
}

/// Registration payload for one member instance.
#[derive(Debug, Clone, Serialize)]
pub struct AgentServiceRegistration {
    /// Instance id, `<fqdn><ip>`.
    #[serde(rename = "ID")]
    pub id: String,
    /// Service name (the entry fqdn).
    #[serde(rename = "Name")]
    pub name: String,
    /// Instance tags.
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    /// Instance metadata.
    #[serde(rename = "Meta")]
    pub meta: HashMap<String, String>,
    /// Member address.
    #[serde(rename = "Address")]
    pub address: String,
    /// The health check driving member liveness.
    #[serde(rename = "Check")]
    pub check: AgentServiceCheck,
}

/// Agent duration syntax for a [`Duration`], seconds precision.
pub fn agent_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// Consul agent client. Cheap to clone; all methods are bounded by the
/// retriever poll interval.
#[derive(Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    basic_auth: Option<(String, String)>,
}

impl ConsulClient {
    /// Build a client for the configured agent.
    pub fn new(cnf: &ConsulConfig) -> Result<Self, GslbError> {
        let http = reqwest::Client::builder()
            .timeout(cnf.scrap_interval)
            .build()?;
        let basic_auth = match (&cnf.username, &cnf.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };
        Ok(Self {
            http,
            base_url: format!("{}://{}", cnf.scheme, cnf.addr),
            token: cnf.token.clone(),
            basic_auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            builder = builder.header("X-Consul-Token", token);
        }
        if let Some((user, pass)) = &self.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        builder
    }

    /// List every KV pair under `prefix`; an unknown prefix is an empty
    /// listing, not an error.
    pub async fn kv_list(&self, prefix: &str) -> Result<Vec<KvPair>, GslbError> {
        let resp = self
            .request(Method::GET, &format!("/v1/kv/{prefix}"))
            .query(&[("recurse", "true")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    /// Names of catalog services matching the agent filter expression.
    pub async fn catalog_services(&self, filter: &str) -> Result<Vec<String>, GslbError> {
        let resp = self
            .request(Method::GET, "/v1/catalog/services")
            .query(&[("filter", filter)])
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let services: HashMap<String, Vec<String>> = resp.json().await?;
        Ok(services.into_keys().collect())
    }

    /// Instances of a service, optionally restricted to passing checks.
    pub async fn health_service(
        &self,
        service: &str,
        only_passing: bool,
    ) -> Result<Vec<ServiceEntry>, GslbError> {
        let mut builder = self.request(Method::GET, &format!("/v1/health/service/{service}"));
        if only_passing {
            builder = builder.query(&[("passing", "true")]);
        }
        let resp = Self::check(builder.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// Register a service instance (idempotent on id).
    pub async fn register_service(
        &self,
        registration: &AgentServiceRegistration,
    ) -> Result<(), GslbError> {
        let resp = self
            .request(Method::PUT, "/v1/agent/service/register")
            .json(registration)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Deregister a service instance by id.
    pub async fn deregister_service(&self, id: &str) -> Result<(), GslbError> {
        let resp = self
            .request(Method::PUT, &format!("/v1/agent/service/deregister/{id}"))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GslbError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GslbError::ConsulApi {
            status: status.as_u16(),
            body,
        })
    }
}

/// Filter expression selecting GSLB-owned services of one datacenter.
pub fn entries_filter(dc_name: &str) -> String {
    format!("ServiceMeta.{META_ENTRY_KEY} == \"true\" and ServiceMeta.{META_DC_KEY} == \"{dc_name}\"")
}
