//! Stream engine (C5, spec.md §4.2): the sequence-flag driven state
//! machine every inbound/outbound GDT message is routed through, plus the
//! per-association table that holds the live streams.

use std::time::Instant;

use gdt_proto::{DaemonAddress, SequenceFlag};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    Starting,
    Active,
    Waiting,
    Ending,
    Closed,
    TimedOut,
}

/// Which side initiated a stream — needed to tell an echoed reply apart
/// from a genuinely new request sharing the same UUID (spec.md §4.2
/// "Correlation").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Initiator {
    Local,
    Remote,
}

/// A live (or recently-closed) GDT stream: one UUID's worth of exchange
/// state. Router processes additionally use `linked_hop` to remember
/// which side last touched the stream, breaking the two-hop echo spec.md
/// §4.2 describes (SPEC_FULL.md §3(b): only a *second* hop on the
/// opposite side counts as the reply; anything past that is a hop-limit
/// violation, not a new echo).
#[derive(Debug)]
pub struct Stream {
    pub uuid: Uuid,
    pub state: StreamState,
    pub initiator: Initiator,
    pub peer: DaemonAddress,
    pub sequence_num: u32,
    pub last_activity: Instant,
    pub linked_hop: Option<DaemonAddress>,
    pub hop_count: u32,
}

impl Stream {
    pub fn new(uuid: Uuid, peer: DaemonAddress, initiator: Initiator) -> Self {
        Stream {
            uuid,
            state: StreamState::Starting,
            initiator,
            peer,
            sequence_num: 0,
            last_activity: Instant::now(),
            linked_hop: None,
            hop_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self, timeout: std::time::Duration) -> bool {
        matches!(
            self.state,
            StreamState::Active | StreamState::Waiting | StreamState::Starting
        ) && self.last_activity.elapsed() >= timeout
    }

    /// Applies one inbound sequence flag, per the receiver-side
    /// transition table in spec.md §4.2. Returns the event the caller
    /// should emit for this transition, or `None` for flags handled
    /// outside the stream table (heartbeats).
    pub fn apply(&mut self, flag: SequenceFlag) -> Result<crate::events::EventKind> {
        use crate::events::EventKind;

        self.touch();
        match (self.state, flag) {
            (StreamState::Starting, SequenceFlag::Start)
            | (StreamState::Starting, SequenceFlag::Stateless) => {
                self.state = StreamState::Active;
                Ok(EventKind::StreamNew)
            }
            (StreamState::Active, SequenceFlag::Continue) => Ok(EventKind::StreamNext),
            (StreamState::Active, SequenceFlag::ContinueWait)
            | (StreamState::Waiting, SequenceFlag::ContinueWait) => {
                self.state = StreamState::Waiting;
                Ok(EventKind::StreamNext)
            }
            (StreamState::Waiting, SequenceFlag::Continue) => {
                self.state = StreamState::Active;
                Ok(EventKind::StreamNext)
            }
            (StreamState::Active, SequenceFlag::End)
            | (StreamState::Waiting, SequenceFlag::End)
            | (StreamState::Starting, SequenceFlag::End) => {
                self.state = StreamState::Ending;
                Ok(EventKind::StreamEnd)
            }
            (state, flag) => Err(Error::Other(format!(
                "stream {} cannot apply {:?} while in state {:?}",
                self.uuid, flag, state
            ))),
        }
    }

    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    pub fn time_out(&mut self) {
        self.state = StreamState::TimedOut;
    }

    /// Increments the forwarding hop count a router applies to a
    /// passed-through packet, erroring once `max_hops` is reached
    /// (spec.md §4.2 "Hop control"). SPEC_FULL.md §3(b) resolves the open
    /// question of how many hops count as an echo: exactly two (there and
    /// back); anything beyond that is treated as this hop-limit error
    /// rather than a new echo.
    pub fn bump_hop(&mut self, max_hops: u32) -> Result<()> {
        self.hop_count += 1;
        if self.hop_count >= max_hops {
            return Err(Error::HopLimit {
                current: self.hop_count,
                max: max_hops,
            });
        }
        Ok(())
    }
}

/// Per-association stream table (C5). Keyed by UUID; the sweeper removes
/// entries once they reach `Closed`/`TimedOut`.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: std::collections::HashMap<Uuid, Stream>,
}

impl StreamTable {
    pub fn new() -> Self {
        StreamTable::default()
    }

    pub fn get_mut(&mut self, uuid: &Uuid) -> Option<&mut Stream> {
        self.streams.get_mut(uuid)
    }

    pub fn insert(&mut self, stream: Stream) {
        self.streams.insert(stream.uuid, stream);
    }

    pub fn remove(&mut self, uuid: &Uuid) -> Option<Stream> {
        self.streams.remove(uuid)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Runs the ~1 Hz sweeper pass (spec.md §4.2 "Timeouts"): every
    /// stream whose `last_activity` exceeds `timeout` is moved to
    /// `TimedOut` and removed, returning the removed streams so the
    /// caller can emit `STREAM_TIMEOUT` for each.
    pub fn sweep_expired(&mut self, timeout: std::time::Duration) -> Vec<Stream> {
        let expired: Vec<Uuid> = self
            .streams
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(uuid, _)| *uuid)
            .collect();
        expired
            .into_iter()
            .filter_map(|uuid| {
                let mut stream = self.streams.remove(&uuid)?;
                stream.time_out();
                Some(stream)
            })
            .collect()
    }

    /// Forces every live stream to `TimedOut` and drains the table,
    /// matching "the sweeper may force-timeout all streams during Client
    /// shutdown" (spec.md §4.2).
    pub fn force_timeout_all(&mut self) -> Vec<Stream> {
        let mut drained: Vec<Stream> = self.streams.drain().map(|(_, s)| s).collect();
        for stream in &mut drained {
            stream.time_out();
        }
        drained
    }
}

#[cfg(test)]
mod stream_test {
    use super::*;

    fn daemon() -> DaemonAddress {
        DaemonAddress::new("agent", "a1").unwrap()
    }

    #[test]
    fn start_then_continue_then_end_transitions_correctly() {
        let mut stream = Stream::new(Uuid::new_v4(), daemon(), Initiator::Remote);
        assert_eq!(
            stream.apply(SequenceFlag::Start).unwrap(),
            crate::events::EventKind::StreamNew
        );
        assert_eq!(stream.state, StreamState::Active);
        assert_eq!(
            stream.apply(SequenceFlag::Continue).unwrap(),
            crate::events::EventKind::StreamNext
        );
        assert_eq!(stream.state, StreamState::Active);
        assert_eq!(
            stream.apply(SequenceFlag::End).unwrap(),
            crate::events::EventKind::StreamEnd
        );
        assert_eq!(stream.state, StreamState::Ending);
    }

    #[test]
    fn continue_wait_transitions_to_waiting_and_back() {
        let mut stream = Stream::new(Uuid::new_v4(), daemon(), Initiator::Remote);
        stream.apply(SequenceFlag::Start).unwrap();
        stream.apply(SequenceFlag::ContinueWait).unwrap();
        assert_eq!(stream.state, StreamState::Waiting);
        stream.apply(SequenceFlag::Continue).unwrap();
        assert_eq!(stream.state, StreamState::Active);
    }

    #[test]
    fn end_from_starting_stateless_is_rejected_by_wrong_flag() {
        let mut stream = Stream::new(Uuid::new_v4(), daemon(), Initiator::Remote);
        // A Continue before any Start/Stateless is invalid.
        assert!(stream.apply(SequenceFlag::Continue).is_err());
    }

    #[test]
    fn bump_hop_errors_past_max_hops() {
        let mut stream = Stream::new(Uuid::new_v4(), daemon(), Initiator::Local);
        stream.bump_hop(2).unwrap();
        let err = stream.bump_hop(2).unwrap_err();
        assert!(matches!(err, Error::HopLimit { .. }));
    }

    #[test]
    fn sweep_expired_removes_only_stale_streams() {
        let mut table = StreamTable::new();
        let mut fresh = Stream::new(Uuid::new_v4(), daemon(), Initiator::Remote);
        fresh.apply(SequenceFlag::Start).unwrap();
        let fresh_uuid = fresh.uuid;
        table.insert(fresh);

        let mut stale = Stream::new(Uuid::new_v4(), daemon(), Initiator::Remote);
        stale.apply(SequenceFlag::Start).unwrap();
        stale.last_activity = Instant::now() - std::time::Duration::from_secs(60);
        table.insert(stale);

        let removed = table.sweep_expired(std::time::Duration::from_secs(5));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].state, StreamState::TimedOut);
        assert_eq!(table.len(), 1);
        assert!(table.get_mut(&fresh_uuid).is_some());
    }
}
