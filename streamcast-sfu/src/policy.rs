//! Track distribution policies
//!
//! A policy is a pure function from the current track and subscriber
//! orderings to a per-subscriber target set. The broadcaster supplies
//! stable orderings for a single rebalance; policies never look at any
//! other state.

use crate::types::{SubscriberId, TrackKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Which tracks each subscriber should receive.
pub type Assignment = HashMap<SubscriberId, HashSet<TrackKey>>;

/// Distribution policy selecting tracks for subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    /// Every subscriber receives every track.
    All,
    /// Tracks are dealt out one per subscriber, cycling.
    RoundRobin,
}

impl Default for DistributionPolicy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl DistributionPolicy {
    /// Compute the target assignment.
    ///
    /// Total: every subscriber in the input appears in the output, with an
    /// empty set if nothing was assigned to it. Deterministic for a given
    /// input ordering.
    #[must_use]
    pub fn assign(&self, tracks: &[TrackKey], subscribers: &[SubscriberId]) -> Assignment {
        match self {
            Self::All => subscribers
                .iter()
                .map(|id| (*id, tracks.iter().cloned().collect()))
                .collect(),
            Self::RoundRobin => {
                if subscribers.is_empty() {
                    return Assignment::new();
                }
                let mut out: Assignment = subscribers
                    .iter()
                    .map(|id| (*id, HashSet::new()))
                    .collect();
                for (i, track) in tracks.iter().enumerate() {
                    let target = subscribers[i % subscribers.len()];
                    if let Some(set) = out.get_mut(&target) {
                        set.insert(track.clone());
                    }
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(names: &[&str]) -> Vec<TrackKey> {
        names.iter().map(|n| TrackKey::of("s", n)).collect()
    }

    fn subscribers(n: usize) -> Vec<SubscriberId> {
        (0..n).map(|_| SubscriberId::new()).collect()
    }

    #[test]
    fn test_all_gives_everyone_everything() {
        let t = tracks(&["a", "b"]);
        let s = subscribers(2);
        let assignment = DistributionPolicy::All.assign(&t, &s);

        assert_eq!(assignment.len(), 2);
        for id in &s {
            let set = &assignment[id];
            assert_eq!(set.len(), 2);
            assert!(set.contains(&t[0]));
            assert!(set.contains(&t[1]));
        }
    }

    #[test]
    fn test_round_robin_deals_by_index() {
        let t = tracks(&["a", "b"]);
        let s = subscribers(2);
        let assignment = DistributionPolicy::RoundRobin.assign(&t, &s);

        assert_eq!(assignment[&s[0]], HashSet::from([t[0].clone()]));
        assert_eq!(assignment[&s[1]], HashSet::from([t[1].clone()]));
    }

    #[test]
    fn test_round_robin_wraps() {
        let t = tracks(&["a", "b", "c"]);
        let s = subscribers(2);
        let assignment = DistributionPolicy::RoundRobin.assign(&t, &s);

        assert_eq!(assignment[&s[0]].len(), 2);
        assert_eq!(assignment[&s[1]].len(), 1);
        assert!(assignment[&s[0]].contains(&t[0]));
        assert!(assignment[&s[0]].contains(&t[2]));
        assert!(assignment[&s[1]].contains(&t[1]));
    }

    #[test]
    fn test_round_robin_is_total() {
        // More subscribers than tracks: the extras still get an entry.
        let t = tracks(&["a"]);
        let s = subscribers(3);
        let assignment = DistributionPolicy::RoundRobin.assign(&t, &s);

        assert_eq!(assignment.len(), 3);
        assert_eq!(assignment[&s[0]].len(), 1);
        assert!(assignment[&s[1]].is_empty());
        assert!(assignment[&s[2]].is_empty());
    }

    #[test]
    fn test_round_robin_no_subscribers() {
        let t = tracks(&["a", "b"]);
        let assignment = DistributionPolicy::RoundRobin.assign(&t, &[]);
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_round_robin_fair_split() {
        // Per-subscriber counts differ by at most one.
        let t = tracks(&["a", "b", "c", "d", "e", "f", "g"]);
        let s = subscribers(3);
        let assignment = DistributionPolicy::RoundRobin.assign(&t, &s);

        let counts: Vec<usize> = s.iter().map(|id| assignment[id].len()).collect();
        let min = counts.iter().min().unwrap();
        let max = counts.iter().max().unwrap();
        assert!(max - min <= 1);
        assert_eq!(counts.iter().sum::<usize>(), t.len());
    }

    #[test]
    fn test_deterministic_for_fixed_ordering() {
        let t = tracks(&["a", "b", "c"]);
        let s = subscribers(2);
        for policy in [DistributionPolicy::All, DistributionPolicy::RoundRobin] {
            assert_eq!(policy.assign(&t, &s), policy.assign(&t, &s));
        }
    }

    #[test]
    fn test_policy_config_form() {
        let policy: DistributionPolicy = serde_json::from_str("\"round_robin\"").unwrap();
        assert_eq!(policy, DistributionPolicy::RoundRobin);
        let policy: DistributionPolicy = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(policy, DistributionPolicy::All);
    }
}
