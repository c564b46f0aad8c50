//! Routing (C7, spec.md §4.4): selecting which registered `Client` a
//! forwarded message goes to, keyed by destination daemon type.
//!
//! `original_source`'s `GDTRoutingAlgorithm` exposes both a deficit-round
//! -robin weighted strategy and a trivial first-match one; spec.md's
//! prose only describes WRR in depth (SPEC_FULL.md §2 keeps both,
//! SPEC_FULL.md §3(a) resolves the open question of what a zero-weight
//! bucket member means: rejected at registration time rather than
//! silently starved).

use std::collections::HashMap;

use crate::client::ClientId;
use crate::error::{Error, Result};

/// Hop bound applied when a forwarded message carries no `hop_info` of
/// its own (spec.md §4.2 "Hop control" assumes every router-bound packet
/// has one; this is the fallback for a first hop that didn't set one).
pub const DEFAULT_ROUTING_MAX_HOPS: u32 = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoutingAlgo {
    /// First acceptable route wins; no weighting.
    Auto = 0,
    /// Deficit-counter weighted round robin (the default, spec.md §4.4).
    Wrr = 1,
}

impl Default for RoutingAlgo {
    fn default() -> Self {
        RoutingAlgo::Wrr
    }
}

struct Bucket {
    members: Vec<(ClientId, u32)>,
    deficits: Vec<u32>,
    cursor: usize,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            members: Vec::new(),
            deficits: Vec::new(),
            cursor: 0,
        }
    }

    fn push(&mut self, client: ClientId, weight: u32) -> Result<()> {
        if weight == 0 {
            return Err(Error::ZeroWeightBucket(format!("{:?}", client)));
        }
        self.members.push((client, weight));
        self.deficits.push(0);
        Ok(())
    }

    fn remove(&mut self, client: ClientId) {
        if let Some(idx) = self.members.iter().position(|(c, _)| *c == client) {
            self.members.remove(idx);
            self.deficits.remove(idx);
            if self.cursor >= self.members.len() {
                self.cursor = 0;
            }
        }
    }

    /// Deficit-counter WRR selection: the cursor *stays* on a member until
    /// its deficit — refilled from its weight whenever it hits zero — is
    /// exhausted, only then moving on to the next member (spec.md §4.4).
    /// Ties break by insertion order since `members`/`deficits` are
    /// parallel `Vec`s.
    fn select(&mut self, exclude: ClientId) -> Option<ClientId> {
        let n = self.members.len();
        if n == 0 {
            return None;
        }
        for _ in 0..n {
            let idx = self.cursor;
            let (client, weight) = self.members[idx];
            if client == exclude {
                self.cursor = (self.cursor + 1) % n;
                continue;
            }
            if self.deficits[idx] == 0 {
                self.deficits[idx] = weight;
            }
            self.deficits[idx] -= 1;
            if self.deficits[idx] == 0 {
                self.cursor = (self.cursor + 1) % n;
            }
            return Some(client);
        }
        None
    }

    fn first_acceptable(&self, exclude: ClientId) -> Option<ClientId> {
        self.members
            .iter()
            .map(|(c, _)| *c)
            .find(|c| *c != exclude)
    }
}

/// Per-destination-type routing table (spec.md §4.4 "Route request").
pub struct RoutingTable {
    algo: RoutingAlgo,
    buckets: HashMap<String, Bucket>,
}

impl RoutingTable {
    pub fn new(algo: RoutingAlgo) -> Self {
        RoutingTable {
            algo,
            buckets: HashMap::new(),
        }
    }

    /// Registers `client` as a router-capable candidate for
    /// `destination_type`, with the given WRR weight (ignored under
    /// `RoutingAlgo::Auto`). Rejects weight `0` (SPEC_FULL.md §3(a)).
    pub fn register(&mut self, destination_type: &str, client: ClientId, weight: u32) -> Result<()> {
        self.buckets
            .entry(destination_type.to_string())
            .or_insert_with(Bucket::new)
            .push(client, weight)
    }

    pub fn unregister(&mut self, destination_type: &str, client: ClientId) {
        if let Some(bucket) = self.buckets.get_mut(destination_type) {
            bucket.remove(client);
        }
    }

    /// Picks a route for `destination_type`, excluding `caller` (loop
    /// prevention: "not the caller", spec.md §4.4).
    pub fn route(&mut self, destination_type: &str, caller: ClientId) -> Result<ClientId> {
        let bucket = self
            .buckets
            .get_mut(destination_type)
            .ok_or_else(|| Error::NoRoute(destination_type.to_string()))?;
        let selected = match self.algo {
            RoutingAlgo::Wrr => bucket.select(caller),
            RoutingAlgo::Auto => bucket.first_acceptable(caller),
        };
        selected.ok_or_else(|| Error::NoRoute(destination_type.to_string()))
    }
}

#[cfg(test)]
mod routing_test {
    use super::*;

    #[test]
    fn zero_weight_member_is_rejected() {
        let mut table = RoutingTable::new(RoutingAlgo::Wrr);
        let err = table.register("agent", ClientId(1), 0).unwrap_err();
        assert!(matches!(err, Error::ZeroWeightBucket(_)));
    }

    #[test]
    fn wrr_distributes_by_weight() {
        let mut table = RoutingTable::new(RoutingAlgo::Wrr);
        table.register("agent", ClientId(1), 2).unwrap();
        table.register("agent", ClientId(2), 1).unwrap();

        let mut counts = HashMap::new();
        for _ in 0..9 {
            let picked = table.route("agent", ClientId(99)).unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }
        assert_eq!(counts[&ClientId(1)], 6);
        assert_eq!(counts[&ClientId(2)], 3);
    }

    #[test]
    fn route_excludes_the_caller() {
        let mut table = RoutingTable::new(RoutingAlgo::Auto);
        table.register("agent", ClientId(1), 1).unwrap();
        table.register("agent", ClientId(2), 1).unwrap();
        let picked = table.route("agent", ClientId(1)).unwrap();
        assert_eq!(picked, ClientId(2));
    }

    #[test]
    fn no_route_for_unknown_destination_type() {
        let mut table = RoutingTable::new(RoutingAlgo::Auto);
        let err = table.route("unknown", ClientId(1)).unwrap_err();
        assert!(matches!(err, Error::NoRoute(_)));
    }
}
