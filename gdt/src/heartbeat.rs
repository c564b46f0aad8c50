//! Heartbeat (C10, spec.md §4.6): a per-registered-Client background
//! task that sends `SF_HEARTBEAT` every `interval` and tracks consecutive
//! misses.

use std::time::{Duration, Instant};

/// Per-Client heartbeat bookkeeping, exposed to event handlers via
/// `EventArgs::Heartbeat` (SPEC_FULL.md §2) so a `HEARTBEAT_MISSED`
/// handler can see the run of misses without reaching into `Client`
/// internals.
#[derive(Debug, Clone)]
pub struct HeartbeatInfo {
    pub interval: Duration,
    pub miss_threshold: u32,
    pub consecutive_misses: u32,
    pub last_sent: Option<Instant>,
    pub last_received: Option<Instant>,
    awaiting_reply: bool,
}

impl HeartbeatInfo {
    pub fn new(interval: Duration, miss_threshold: u32) -> Self {
        HeartbeatInfo {
            interval,
            miss_threshold,
            consecutive_misses: 0,
            last_sent: None,
            last_received: None,
            awaiting_reply: false,
        }
    }

    /// Called right after a heartbeat goes out on the wire.
    pub fn mark_sent(&mut self) {
        self.last_sent = Some(Instant::now());
        self.awaiting_reply = true;
    }

    /// Called when a heartbeat reply arrives; clears the miss counter.
    pub fn mark_received(&mut self) {
        self.last_received = Some(Instant::now());
        self.consecutive_misses = 0;
        self.awaiting_reply = false;
    }

    /// Called once per tick of the heartbeat task, right before sending
    /// the next heartbeat: if the previous one never got a reply, counts
    /// a miss. Returns `true` once `miss_threshold` consecutive misses
    /// have accumulated (caller should fire `HEARTBEAT_MISSED`).
    pub fn check_miss(&mut self) -> bool {
        if !self.awaiting_reply {
            return false;
        }
        self.consecutive_misses += 1;
        self.consecutive_misses >= self.miss_threshold
    }
}

#[cfg(test)]
mod heartbeat_test {
    use super::*;

    #[test]
    fn reaches_threshold_after_k_consecutive_misses() {
        let mut hb = HeartbeatInfo::new(Duration::from_secs(1), 3);
        hb.mark_sent();
        assert!(!hb.check_miss());
        hb.mark_sent();
        assert!(!hb.check_miss());
        hb.mark_sent();
        assert!(hb.check_miss());
    }

    #[test]
    fn received_reply_resets_miss_counter_and_stops_future_misses() {
        let mut hb = HeartbeatInfo::new(Duration::from_secs(1), 3);
        hb.mark_sent();
        hb.check_miss();
        hb.mark_received();
        assert_eq!(hb.consecutive_misses, 0);
        assert!(!hb.check_miss());
    }

    #[test]
    fn no_miss_before_first_heartbeat_is_sent() {
        let mut hb = HeartbeatInfo::new(Duration::from_secs(1), 3);
        assert!(!hb.check_miss());
    }
}
