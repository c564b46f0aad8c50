//! Stats collection (C9). Mirrors the numeric stat ids
//! `original_source/src/include/gdt_stats.h`-equivalent code uses so that
//! a `Body::Stats` response carries the same `stats_id`s a legacy
//! collector already knows how to chart, while the counters themselves
//! are plain atomics rather than the original's mutex-guarded map.

use std::sync::atomic::{AtomicU64, Ordering};

use gdt_proto::param::{Parameter, ParameterId, Parameters};

/// Numeric stat identifiers, reusing the original's constants
/// (`SST_RX_SMSG_POOL_EMPTY`, `SST_RX_SPARAM_POOL_EMPTY`) so they stay
/// wire-compatible with whatever collects `Body::Stats` responses today.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatId {
    RxSmsgPoolEmpty = 1,
    RxSparamPoolEmpty = 2,
    StreamTimeouts = 3,
    HeartbeatsMissed = 4,
    RoutingNoMatch = 5,
    MessagesSent = 6,
    MessagesReceived = 7,
    BytesSent = 8,
    BytesReceived = 9,
}

const ALL_STATS: &[StatId] = &[
    StatId::RxSmsgPoolEmpty,
    StatId::RxSparamPoolEmpty,
    StatId::StreamTimeouts,
    StatId::HeartbeatsMissed,
    StatId::RoutingNoMatch,
    StatId::MessagesSent,
    StatId::MessagesReceived,
    StatId::BytesSent,
    StatId::BytesReceived,
];

/// Lock-free counter bank. One `Stats` instance is shared (via `Arc`)
/// across every `Client`/`Stream`/`Pool` belonging to a `Session`.
#[derive(Debug, Default)]
pub struct Stats {
    rx_smsg_pool_empty: AtomicU64,
    rx_sparam_pool_empty: AtomicU64,
    stream_timeouts: AtomicU64,
    heartbeats_missed: AtomicU64,
    routing_no_match: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    fn counter(&self, id: StatId) -> &AtomicU64 {
        match id {
            StatId::RxSmsgPoolEmpty => &self.rx_smsg_pool_empty,
            StatId::RxSparamPoolEmpty => &self.rx_sparam_pool_empty,
            StatId::StreamTimeouts => &self.stream_timeouts,
            StatId::HeartbeatsMissed => &self.heartbeats_missed,
            StatId::RoutingNoMatch => &self.routing_no_match,
            StatId::MessagesSent => &self.messages_sent,
            StatId::MessagesReceived => &self.messages_received,
            StatId::BytesSent => &self.bytes_sent,
            StatId::BytesReceived => &self.bytes_received,
        }
    }

    pub fn incr(&self, id: StatId) {
        self.add(id, 1);
    }

    pub fn add(&self, id: StatId, amount: u64) {
        self.counter(id).fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self, id: StatId) -> u64 {
        self.counter(id).load(Ordering::Relaxed)
    }

    /// Renders the counter bank as `Parameters` suitable for a
    /// `Body::Stats` response (spec.md §6: `STATS_ID`/`STATS_VALUE` pairs).
    pub fn to_parameters(&self) -> Parameters {
        let mut params = Vec::with_capacity(ALL_STATS.len() * 2);
        for &id in ALL_STATS {
            params.push(Parameter::simple(
                ParameterId::STATS_ID,
                (id as u32).to_be_bytes().to_vec(),
            ));
            params.push(Parameter::simple(
                ParameterId::STATS_VALUE,
                self.get(id).to_be_bytes().to_vec(),
            ));
        }
        Parameters(params)
    }
}

#[cfg(test)]
mod stats_test {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment_independently() {
        let stats = Stats::new();
        assert_eq!(stats.get(StatId::RxSmsgPoolEmpty), 0);
        stats.incr(StatId::RxSmsgPoolEmpty);
        stats.incr(StatId::RxSmsgPoolEmpty);
        stats.incr(StatId::RxSparamPoolEmpty);
        assert_eq!(stats.get(StatId::RxSmsgPoolEmpty), 2);
        assert_eq!(stats.get(StatId::RxSparamPoolEmpty), 1);
        assert_eq!(stats.get(StatId::StreamTimeouts), 0);
    }

    #[test]
    fn to_parameters_emits_id_value_pairs_for_every_stat() {
        let stats = Stats::new();
        stats.add(StatId::BytesSent, 4096);
        let params = stats.to_parameters();
        assert_eq!(params.0.len(), ALL_STATS.len() * 2);
        assert!(params
            .0
            .iter()
            .all(|p| p.id == ParameterId::STATS_ID || p.id == ParameterId::STATS_VALUE));
    }
}
