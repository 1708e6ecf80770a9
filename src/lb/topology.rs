//! Geographic selection: answer from the datacenter closest to the client.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::entry::{Entry, Member};
use crate::error::GslbError;
use crate::geoloc::GeoLoc;

use super::{LoadBalancer, MemberType, ResolveCtx};

/// Selects the member datacenter through the geolocation engine, then a
/// random member inside it. Stateless across queries; `reset` is a no-op.
pub struct Topology {
    geoloc: Arc<GeoLoc>,
    members_dc_all: HashMap<String, Vec<Member>>,
    members_dc_ipv4: HashMap<String, Vec<Member>>,
    members_dc_ipv6: HashMap<String, Vec<Member>>,
    possible_dcs_all: Vec<String>,
    possible_dcs_ipv4: Vec<String>,
    possible_dcs_ipv6: Vec<String>,
}

impl Topology {
    /// Index the entry's members by datacenter, per member type.
    pub fn new(entry: &Entry, geoloc: Arc<GeoLoc>) -> Self {
        let all = entry.all_members();
        Self {
            geoloc,
            possible_dcs_all: extract_dcs(&all),
            possible_dcs_ipv4: extract_dcs(&entry.members_ipv4),
            possible_dcs_ipv6: extract_dcs(&entry.members_ipv6),
            members_dc_all: members_by_dc(&all),
            members_dc_ipv4: members_by_dc(&entry.members_ipv4),
            members_dc_ipv6: members_by_dc(&entry.members_ipv6),
        }
    }
}

impl LoadBalancer for Topology {
    fn next(
        &self,
        ctx: &ResolveCtx,
        member_type: MemberType,
    ) -> Result<Option<Member>, GslbError> {
        let (possible_dcs, members_dc) = match member_type {
            MemberType::All => (&self.possible_dcs_all, &self.members_dc_all),
            MemberType::Ipv6 => (&self.possible_dcs_ipv6, &self.members_dc_ipv6),
            MemberType::Ipv4 => (&self.possible_dcs_ipv4, &self.members_dc_ipv4),
        };
        if possible_dcs.is_empty() {
            return Ok(None);
        }
        let ip = ctx.client_ip.ok_or(GslbError::NoRemoteAddr)?;
        let dc = self.geoloc.find_dc(ip, possible_dcs)?;
        let members = members_dc
            .get(&dc)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| GslbError::NoMember(dc.clone()))?;
        if members.len() == 1 {
            return Ok(Some(members[0].clone()));
        }
        let index = rand::rng().random_range(0..members.len());
        Ok(Some(members[index].clone()))
    }

    fn reset(&self) {}

    fn name(&self) -> &'static str {
        "topology"
    }
}

fn members_by_dc(members: &[Member]) -> HashMap<String, Vec<Member>> {
    let mut map: HashMap<String, Vec<Member>> = HashMap::new();
    for member in members {
        map.entry(member.dc.clone()).or_default().push(member.clone());
    }
    map
}

/// Datacenter names in first-seen order, deduplicated.
fn extract_dcs(members: &[Member]) -> Vec<String> {
    let mut dcs = Vec::new();
    for member in members {
        if !dcs.contains(&member.dc) {
            dcs.push(member.dc.clone());
        }
    }
    dcs
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{ctx_with, entry};
    use super::*;
    use crate::config::{DcPosition, Position};

    fn geoloc_with_cidrs() -> Arc<GeoLoc> {
        let positions = vec![
            DcPosition {
                dc_name: "dc1".to_string(),
                position: Position {
                    longitude: 2.35,
                    latitude: 48.85,
                },
                cidrs: vec!["10.0.0.0/8".parse().unwrap()],
            },
            DcPosition {
                dc_name: "dc2".to_string(),
                position: Position {
                    longitude: 10.0,
                    latitude: 53.55,
                },
                cidrs: vec!["192.168.0.0/16".parse().unwrap()],
            },
        ];
        Arc::new(GeoLoc::new(positions, None))
    }

    #[test]
    fn test_picks_member_of_matching_dc() {
        let ent = entry(
            &[("10.0.0.1", "dc1", 1), ("10.0.0.2", "dc2", 1)],
            &[],
        );
        let topo = Topology::new(&ent, geoloc_with_cidrs());

        let got = topo
            .next(&ctx_with("10.1.2.3"), MemberType::Ipv4)
            .unwrap()
            .unwrap();
        assert_eq!(got.dc, "dc1");
        assert_eq!(got.ip, "10.0.0.1");

        let got = topo
            .next(&ctx_with("192.168.9.9"), MemberType::Ipv4)
            .unwrap()
            .unwrap();
        assert_eq!(got.dc, "dc2");
    }

    #[test]
    fn test_fails_without_client_address() {
        let ent = entry(&[("10.0.0.1", "dc1", 1)], &[]);
        let topo = Topology::new(&ent, geoloc_with_cidrs());

        let err = topo
            .next(&ResolveCtx::default(), MemberType::Ipv4)
            .unwrap_err();
        assert!(matches!(err, GslbError::NoRemoteAddr));
    }

    #[test]
    fn test_candidates_restricted_to_member_type() {
        // only dc2 has an IPv6 member, so an IPv6 query from a dc1 network
        // must not land in dc1
        let ent = entry(&[("10.0.0.1", "dc1", 1)], &[("fd00::2", "dc2", 1)]);
        let topo = Topology::new(&ent, geoloc_with_cidrs());

        let got = topo
            .next(&ctx_with("10.1.2.3"), MemberType::Ipv6)
            .unwrap()
            .unwrap();
        assert_eq!(got.dc, "dc2");
        assert_eq!(got.ip, "fd00::2");
    }

    #[test]
    fn test_empty_member_list_is_no_candidate() {
        let ent = entry(&[("10.0.0.1", "dc1", 1)], &[]);
        let topo = Topology::new(&ent, geoloc_with_cidrs());

        assert!(topo
            .next(&ctx_with("10.1.2.3"), MemberType::Ipv6)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_random_pick_stays_in_dc() {
        let ent = entry(
            &[
                ("10.0.0.1", "dc1", 1),
                ("10.0.0.2", "dc1", 1),
                ("192.168.0.1", "dc2", 1),
            ],
            &[],
        );
        let topo = Topology::new(&ent, geoloc_with_cidrs());

        for _ in 0..20 {
            let got = topo
                .next(&ctx_with("10.1.2.3"), MemberType::Ipv4)
                .unwrap()
                .unwrap();
            assert_eq!(got.dc, "dc1");
        }
    }
}
