//! Payload buffers and the stream-type taxonomy a `Payload` is stamped
//! with (C4/C5). spec.md §3 names stateful vs. stateless streams; the
//! original additionally distinguishes "stateless, no reply expected"
//! (fire-and-forget datagrams) from plain stateless request/response,
//! which matters for whether a `Stream` waits on a correlation entry.

use bytes::Bytes;

use gdt_proto::SequenceFlag;

/// `GDTStreamType` (SPEC_FULL.md §2).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Multi-packet exchange: `Start` ... `Continue`* ... `End`.
    Stateful,
    /// Single-packet request that still expects a correlated reply.
    Stateless,
    /// Single-packet, fire-and-forget; no correlation entry is created.
    StatelessNoReply,
}

impl StreamType {
    /// The `SequenceFlag` a new outbound message of this stream type
    /// opens with.
    pub fn initial_sequence_flag(self) -> SequenceFlag {
        match self {
            StreamType::Stateful => SequenceFlag::Start,
            StreamType::Stateless | StreamType::StatelessNoReply => SequenceFlag::Stateless,
        }
    }

    pub fn expects_reply(self) -> bool {
        !matches!(self, StreamType::StatelessNoReply)
    }
}

/// One payload handed to or received from a `Stream`: the raw bytes plus
/// the SCTP-level framing metadata the stream engine needs to decide
/// whether it is looking at a fresh message or a continuation.
#[derive(Debug, Clone)]
pub struct Payload {
    pub data: Bytes,
    pub stream_type: StreamType,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>, stream_type: StreamType) -> Self {
        Payload {
            data: data.into(),
            stream_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod payload_test {
    use super::*;

    #[test]
    fn stateless_no_reply_does_not_expect_reply() {
        assert!(!StreamType::StatelessNoReply.expects_reply());
        assert!(StreamType::Stateless.expects_reply());
        assert!(StreamType::Stateful.expects_reply());
    }

    #[test]
    fn initial_sequence_flag_matches_stream_type() {
        assert_eq!(
            StreamType::Stateful.initial_sequence_flag(),
            SequenceFlag::Start
        );
        assert_eq!(
            StreamType::Stateless.initial_sequence_flag(),
            SequenceFlag::Stateless
        );
    }
}
