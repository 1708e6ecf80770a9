//! Metrics instrumentation for gslb-dns.
//!
//! All metrics are prefixed with `gslb_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::events::EventKind;

/// Record a DNS query.
pub fn record_query(query_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NoEntry => "no_entry",
        QueryResult::Denied => "denied",
        QueryResult::Failed => "failed",
    };

    counter!("gslb_dns.query.count", "type" => query_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("gslb_dns.query.duration.seconds", "type" => query_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Answer records were produced.
    Success,
    /// The name is not registered; empty answer.
    NoEntry,
    /// Inspection query refused by the ACL.
    Denied,
    /// The LB chain failed to produce an answer.
    Failed,
}

/// Stage of the LB chain that produced an answer.
#[derive(Debug, Clone, Copy)]
pub enum LbStage {
    /// First stage.
    Preferred,
    /// Second stage, after one failure.
    Alternate,
    /// Last stage, after two failures.
    Fallback,
}

/// Record which chain stage served an answer slot.
pub fn record_lb_selection(stage: LbStage, fqdn: &str, lb_name: &str) {
    let stage_str = match stage {
        LbStage::Preferred => "preferred",
        LbStage::Alternate => "alternate",
        LbStage::Fallback => "fallback",
    };
    counter!(
        "gslb_dns.lb.selection",
        "stage" => stage_str,
        "fqdn" => fqdn.to_string(),
        "lb" => lb_name.to_string()
    )
    .increment(1);
}

/// Record an answer the whole LB chain failed to produce.
pub fn record_query_failed(fqdn: &str, query_type: &str) {
    counter!(
        "gslb_dns.query.failed",
        "fqdn" => fqdn.to_string(),
        "type" => query_type.to_string()
    )
    .increment(1);
}

/// Record the outcome of one retriever polling pass.
pub fn record_poll(source: PollSource, ok: bool) {
    let source_str = match source {
        PollSource::Kv => "kv",
        PollSource::Catalog => "catalog",
    };
    let result_str = if ok { "ok" } else { "error" };
    counter!(
        "gslb_dns.retriever.pass.count",
        "source" => source_str,
        "result" => result_str
    )
    .increment(1);
}

/// Which backend a retriever pass polled.
#[derive(Debug, Clone, Copy)]
pub enum PollSource {
    /// The declarative KV store.
    Kv,
    /// The service catalog.
    Catalog,
}

/// Record an event published on the bus.
pub fn record_event(topic: &str, kind: EventKind) {
    counter!(
        "gslb_dns.event.count",
        "topic" => topic.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record the number of entries currently served.
pub fn record_entries_count(count: usize) {
    gauge!("gslb_dns.state.entries.count").set(count as f64);
}

/// Record the size of the geolocation cache.
pub fn record_geo_cache_size(size: usize) {
    gauge!("gslb_dns.geo.cache.size").set(size as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
