//! gslb-dns - An authoritative DNS global server load balancer.
//!
//! This crate answers A/AAAA queries for registered FQDNs with addresses
//! chosen by per-entry load-balancing policies. Entry declarations live in
//! a Consul KV store; member liveness comes back through Consul health
//! checks; both are polled and diffed into in-memory state that the DNS
//! handler reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                             gslb-dns                               │
//! │                                                                    │
//! │   ┌───────────┐  kv_entries   ┌────────────┐                       │
//! │   │ Retriever │──────────────▶│ Discoverer │──▶ catalog services   │
//! │   │ (polling) │               └────────────┘    + health checks    │
//! │   │           │  catalog_entries  ┌──────────┐                     │
//! │   │           │──────────────────▶│ Registry │                     │
//! │   └───────────┘                   └────┬─────┘                     │
//! │        ▲                              │                            │
//! │        │ KV + catalog + health        ▼                            │
//! │     Consul                     ┌──────────────┐                    │
//! │                                │ GslbHandler  │◀── UDP/TCP :53     │
//! │                                │ (LB chains,  │                    │
//! │                                │  geoloc)     │                    │
//! │                                └──────────────┘                    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolution
//!
//! ```text
//! svc.example.net. A?
//!   → registry snapshot {entry, preferred, alternate, fallback}
//!   → preferred.next() → alternate.next() → fallback.next()
//!   → A records of up to max_answer_returned distinct members
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use gslb_dns::{App, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_from_yaml();
//!     let cancel = CancellationToken::new();
//!
//!     let app = App::new(config).unwrap();
//!     app.run(cancel).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod consul;
pub mod disco;
pub mod entry;
pub mod error;
pub mod events;
pub mod geoloc;
pub mod lb;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod retriever;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use app::App;
pub use config::Config;
pub use entry::{Entry, HealthCheck, LbAlgo, Member, SignedEntry};
pub use error::GslbError;
pub use registry::Registry;
pub use resolver::GslbHandler;
pub use server::DnsServer;
