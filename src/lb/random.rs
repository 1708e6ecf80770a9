//! Uniform random selection.

use rand::Rng;

use crate::entry::{Entry, Member};
use crate::error::GslbError;

use super::{LoadBalancer, MemberType, ResolveCtx};

/// Picks a member uniformly at random.
///
/// Also serves as `return_to_dns`: the two names select the same strategy,
/// the latter kept because it historically meant handing resolution back to
/// a downstream resolver.
pub struct Random {
    name: &'static str,
    members_all: Vec<Member>,
    members_ipv4: Vec<Member>,
    members_ipv6: Vec<Member>,
}

impl Random {
    /// Uniform random policy under its own name.
    pub fn new(entry: &Entry) -> Self {
        Self::with_name(entry, "random")
    }

    /// The same policy under its historical `return_to_dns` name.
    pub fn return_to_dns(entry: &Entry) -> Self {
        Self::with_name(entry, "return_to_dns")
    }

    fn with_name(entry: &Entry, name: &'static str) -> Self {
        Self {
            name,
            members_all: entry.all_members(),
            members_ipv4: entry.members_ipv4.clone(),
            members_ipv6: entry.members_ipv6.clone(),
        }
    }
}

impl LoadBalancer for Random {
    fn next(
        &self,
        _ctx: &ResolveCtx,
        member_type: MemberType,
    ) -> Result<Option<Member>, GslbError> {
        let members = match member_type {
            MemberType::All => &self.members_all,
            MemberType::Ipv6 => &self.members_ipv6,
            MemberType::Ipv4 => &self.members_ipv4,
        };
        if members.is_empty() {
            return Ok(None);
        }
        if members.len() == 1 {
            return Ok(Some(members[0].clone()));
        }
        let index = rand::rng().random_range(0..members.len());
        Ok(Some(members[index].clone()))
    }

    fn reset(&self) {}

    fn name(&self) -> &'static str {
        self.name
    }
}
