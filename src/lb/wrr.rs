//! Weighted round-robin selection driven by member ratios.

use parking_lot::Mutex;

use crate::entry::{Entry, Member};
use crate::error::GslbError;

use super::{LoadBalancer, MemberType, ResolveCtx};

/// Rotating cursor and threshold weight; both move together, so they live
/// under one lock.
struct WeightedState {
    index: i64,
    current_weight: i64,
}

struct WeightedRef {
    gcd: i64,
    max_weight: i64,
    members: Vec<Member>,
    state: Mutex<WeightedState>,
}

/// Returns the ratio used for weighting; a declared ratio of 0 weighs as 1.
fn weight_of(member: &Member) -> i64 {
    if member.ratio == 0 {
        1
    } else {
        i64::from(member.ratio)
    }
}

impl WeightedRef {
    fn new(members: Vec<Member>) -> Self {
        let mut ref_gcd = 0i64;
        let mut max_weight = 0i64;
        for member in &members {
            let weight = weight_of(member);
            if ref_gcd == 0 {
                ref_gcd = weight;
                max_weight = weight;
            } else {
                ref_gcd = gcd(ref_gcd, weight);
                max_weight = max_weight.max(weight);
            }
        }
        Self {
            gcd: ref_gcd,
            max_weight,
            members,
            state: Mutex::new(WeightedState {
                index: -1,
                current_weight: 0,
            }),
        }
    }

    fn next_member(&self) -> Option<Member> {
        if self.members.is_empty() {
            return None;
        }
        if self.members.len() == 1 {
            return Some(self.members[0].clone());
        }
        let len = self.members.len() as i64;
        let mut state = self.state.lock();
        loop {
            state.index = (state.index + 1) % len;
            if state.index == 0 {
                state.current_weight -= self.gcd;
                if state.current_weight <= 0 {
                    state.current_weight = self.max_weight;
                    if state.current_weight == 0 {
                        return None;
                    }
                }
            }
            let member = &self.members[state.index as usize];
            if weight_of(member) >= state.current_weight {
                return Some(member.clone());
            }
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.index = -1;
        state.current_weight = 0;
    }
}

/// Classic weighted round-robin: a selection cycle returns each member
/// proportionally to its ratio, heavier members first.
pub struct WeightedRoundRobin {
    wr_all: WeightedRef,
    wr_ipv4: WeightedRef,
    wr_ipv6: WeightedRef,
}

impl WeightedRoundRobin {
    /// Precompute weights per member type from the entry's lists.
    pub fn new(entry: &Entry) -> Self {
        Self {
            wr_all: WeightedRef::new(entry.all_members()),
            wr_ipv4: WeightedRef::new(entry.members_ipv4.clone()),
            wr_ipv6: WeightedRef::new(entry.members_ipv6.clone()),
        }
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next(
        &self,
        _ctx: &ResolveCtx,
        member_type: MemberType,
    ) -> Result<Option<Member>, GslbError> {
        let wr = match member_type {
            MemberType::All => &self.wr_all,
            MemberType::Ipv6 => &self.wr_ipv6,
            MemberType::Ipv4 => &self.wr_ipv4,
        };
        Ok(wr.next_member())
    }

    fn reset(&self) {
        self.wr_all.reset();
        self.wr_ipv4.reset();
        self.wr_ipv6.reset();
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

fn gcd(mut x: i64, mut y: i64) -> i64 {
    while y != 0 {
        let t = x % y;
        x = y;
        y = t;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::super::testutil::entry;
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(3, 1), 1);
        assert_eq!(gcd(7, 7), 7);
    }

    #[test]
    fn test_heavier_member_selected_first() {
        let wrr = WeightedRoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 3), ("10.0.0.2", "dc1", 1)],
            &[],
        ));
        let ctx = ResolveCtx::default();

        let ips: Vec<String> = (0..8)
            .map(|_| wrr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip)
            .collect();
        // one cycle is X X X Y for ratios 3:1
        assert_eq!(
            ips,
            [
                "10.0.0.1", "10.0.0.1", "10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.1",
                "10.0.0.1", "10.0.0.2",
            ]
        );
    }

    #[test]
    fn test_long_run_proportions_match_ratios() {
        let wrr = WeightedRoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 3), ("10.0.0.2", "dc1", 1)],
            &[],
        ));
        let ctx = ResolveCtx::default();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..400 {
            let m = wrr.next(&ctx, MemberType::Ipv4).unwrap().unwrap();
            *counts.entry(m.ip).or_default() += 1;
        }
        assert_eq!(counts["10.0.0.1"], 300);
        assert_eq!(counts["10.0.0.2"], 100);
    }

    #[test]
    fn test_zero_ratio_weighs_as_one() {
        let wrr = WeightedRoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 0), ("10.0.0.2", "dc1", 0)],
            &[],
        ));
        let ctx = ResolveCtx::default();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let m = wrr.next(&ctx, MemberType::Ipv4).unwrap().unwrap();
            *counts.entry(m.ip).or_default() += 1;
        }
        assert_eq!(counts["10.0.0.1"], 5);
        assert_eq!(counts["10.0.0.2"], 5);
    }

    #[test]
    fn test_single_member_short_circuit() {
        let wrr = WeightedRoundRobin::new(&entry(&[("10.0.0.1", "dc1", 7)], &[]));
        let ctx = ResolveCtx::default();

        for _ in 0..3 {
            let m = wrr.next(&ctx, MemberType::Ipv4).unwrap().unwrap();
            assert_eq!(m.ip, "10.0.0.1");
        }
    }

    #[test]
    fn test_empty_list_yields_no_candidate() {
        let wrr = WeightedRoundRobin::new(&entry(&[], &[("fd00::1", "dc1", 1)]));
        assert!(wrr
            .next(&ResolveCtx::default(), MemberType::Ipv4)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reset_restarts_cycle() {
        let wrr = WeightedRoundRobin::new(&entry(
            &[("10.0.0.1", "dc1", 3), ("10.0.0.2", "dc1", 1)],
            &[],
        ));
        let ctx = ResolveCtx::default();

        let first = wrr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip;
        wrr.next(&ctx, MemberType::Ipv4).unwrap();
        wrr.reset();
        assert_eq!(wrr.next(&ctx, MemberType::Ipv4).unwrap().unwrap().ip, first);
    }
}
