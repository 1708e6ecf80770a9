//! Per-entry load-balancing policies.
//!
//! Each entry carries three policy instances (preferred, alternate,
//! fallback) built by [`make_lb`] whenever the registry ingests a catalog
//! event, so policy state restarts with every entry change.

use std::net::IpAddr;
use std::sync::Arc;

use crate::entry::{Entry, LbAlgo, Member};
use crate::error::GslbError;
use crate::geoloc::GeoLoc;

mod random;
mod rr;
mod topology;
mod wrr;

pub use random::Random;
pub use rr::RoundRobin;
pub use topology::Topology;
pub use wrr::WeightedRoundRobin;

/// Which member list a selection draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    /// IPv4 then IPv6 members.
    All,
    /// IPv4 members only.
    Ipv4,
    /// IPv6 members only.
    Ipv6,
}

/// Per-query context the policies may consult.
#[derive(Debug, Clone, Default)]
pub struct ResolveCtx {
    /// Client address: the EDNS client-subnet address when trusted,
    /// otherwise the DNS peer. `None` when neither is available.
    pub client_ip: Option<IpAddr>,
}

/// A member-selection strategy.
///
/// `Ok(None)` means "no candidate" (typically an empty member list); the
/// resolver treats it the same as an error when walking its chain.
pub trait LoadBalancer: Send + Sync {
    /// Pick the next member for this query.
    fn next(&self, ctx: &ResolveCtx, member_type: MemberType)
        -> Result<Option<Member>, GslbError>;

    /// Restart the selection state.
    fn reset(&self);

    /// Stable policy name for metrics and logs.
    fn name(&self) -> &'static str;
}

/// Build the policy instance for one chain stage of an entry.
pub fn make_lb(entry: &Entry, algo: LbAlgo, geoloc: Arc<GeoLoc>) -> Box<dyn LoadBalancer> {
    match algo {
        LbAlgo::RoundRobin => Box::new(RoundRobin::new(entry)),
        LbAlgo::Ratio => Box::new(WeightedRoundRobin::new(entry)),
        LbAlgo::Topology => Box::new(Topology::new(entry, geoloc)),
        LbAlgo::Random => Box::new(Random::new(entry)),
        LbAlgo::ReturnToDns => Box::new(Random::return_to_dns(entry)),
    }
}
