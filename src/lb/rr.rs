//! Sequential round-robin selection.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::entry::{Entry, Member};
use crate::error::GslbError;

use super::{LoadBalancer, MemberType, ResolveCtx};

/// Rotates through the member list with one independent counter per member
/// type, so A and AAAA queries do not disturb each other's position.
pub struct RoundRobin {
    number_all: AtomicI64,
    number_ipv4: AtomicI64,
    number_ipv6: AtomicI64,
    members_all: Vec<Member>,
    members_ipv4: Vec<Member>,
    members_ipv6: Vec<Member>,
}

impl RoundRobin {
    /// Snapshot the entry's member lists; counters start before the first
    /// member.
    pub fn new(entry: &Entry) -> Self {
        Self {
            number_all: AtomicI64::new(-1),
            number_ipv4: AtomicI64::new(-1),
            number_ipv6: AtomicI64::new(-1),
            members_all: entry.all_members(),
            members_ipv4: entry.members_ipv4.clone(),
            members_ipv6: entry.members_ipv6.clone(),
        }
    }

    fn next_member(members: &[Member], number: &AtomicI64) -> Option<Member> {
        if members.is_empty() {
            return None;
        }
        let n = number.fetch_add(1, Ordering::SeqCst) + 1;
        let index = n.rem_euclid(members.len() as i64) as usize;
        Some(members[index].clone())
    }
}

impl LoadBalancer for RoundRobin {
    fn next(
        &self,
        _ctx: &ResolveCtx,
        member_type: MemberType,
    ) -> Result<Option<Member>, GslbError> {
        let (members, number) = match member_type {
            MemberType::All => (&self.members_all, &self.number_all),
            MemberType::Ipv6 => (&self.members_ipv6, &self.number_ipv6),
            MemberType::Ipv4 => (&self.members_ipv4, &self.number_ipv4),
        };
        Ok(Self::next_member(members, number))
    }

    fn reset(&self) {
        self.number_all.store(0, Ordering::SeqCst);
        self.number_ipv4.store(0, Ordering::SeqCst);
        self.number_ipv6.store(0, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::entry;
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_rotates_in_declaration_order() {
        let rr = RoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 1), ("10.0.0.2", "dc2", 1)],
            &[],
        ));
        let ctx = ResolveCtx::default();

        let ips: Vec<String> = (0..4)
            .map(|_| rr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip)
            .collect();
        assert_eq!(ips, ["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_fairness_over_many_calls() {
        let rr = RoundRobin::new(&entry(
            &[
                ("10.0.0.1", "dc1", 1),
                ("10.0.0.2", "dc1", 1),
                ("10.0.0.3", "dc1", 1),
            ],
            &[],
        ));
        let ctx = ResolveCtx::default();

        let mut counts: HashMap<String, usize> = HashMap::new();
        let n = 1000;
        for _ in 0..n {
            let m = rr.next(&ctx, MemberType::Ipv4).unwrap().unwrap();
            *counts.entry(m.ip).or_default() += 1;
        }
        for count in counts.values() {
            assert!(*count == n / 3 || *count == n / 3 + 1, "count {count}");
        }
    }

    #[test]
    fn test_counters_are_independent_per_type() {
        let rr = RoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 1), ("10.0.0.2", "dc1", 1)],
            &[("fd00::1", "dc1", 1), ("fd00::2", "dc1", 1)],
        ));
        let ctx = ResolveCtx::default();

        assert_eq!(rr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip, "10.0.0.1");
        assert_eq!(rr.next(&ctx, MemberType::Ipv6).unwrap().unwrap().ip, "fd00::1");
        assert_eq!(rr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip, "10.0.0.2");
        // the ALL rotation starts at the first IPv4 member
        assert_eq!(rr.next(&ctx, MemberType::All).unwrap().unwrap().ip, "10.0.0.1");
    }

    #[test]
    fn test_empty_list_yields_no_candidate() {
        let rr = RoundRobin::new(&entry(&[("10.0.0.1", "dc1", 1)], &[]));
        assert!(rr
            .next(&ResolveCtx::default(), MemberType::Ipv6)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let rr = RoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 1), ("10.0.0.2", "dc1", 1)],
            &[],
        ));
        let ctx = ResolveCtx::default();

        rr.next(&ctx, MemberType::Ipv4).unwrap();
        rr.reset();
        // counter sits at 0, so the next pick is the second member
        assert_eq!(rr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip, "10.0.0.2");
    }
}
