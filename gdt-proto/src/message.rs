//! `Message` (spec.md §3, §6): `Header` immediately followed by `Body`,
//! two sibling top-level TLVs — there is no further outer wrapper tag.

use bytes::{Bytes, BytesMut};

use crate::body::Body;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::tlv::read_tlv;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: Body,
}

impl Message {
    pub fn new(header: Header, body: Body) -> Self {
        Message { header, body }
    }

    /// Encode contract (spec.md §4.1): a *prepare* pass (lengths computed
    /// bottom-up inside each `encode`) followed by a top-down emission in
    /// schema order (header, then body).
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.header.encode(&mut out);
        self.body.encode(&mut out);
        out.freeze()
    }

    /// Decode contract (spec.md §4.1): `input` becomes the backing buffer
    /// for every `Bytes` slice reachable from the returned `Message` —
    /// nothing is copied out of it except fixed-size scalars.
    pub fn decode(input: Bytes) -> Result<Self> {
        let mut remaining = input;
        let header_node = read_tlv(&mut remaining)?;
        if header_node.tag != crate::header::HEADER_TAG {
            return Err(Error::UnexpectedTag {
                tag: header_node.tag.number,
                wanted: crate::header::HEADER_TAG.number,
                context: "Message",
            });
        }
        let header = Header::decode(header_node.value)?;

        let body_node = read_tlv(&mut remaining)?;
        if body_node.tag != crate::header::BODY_TAG {
            return Err(Error::UnexpectedTag {
                tag: body_node.tag.number,
                wanted: crate::header::BODY_TAG.number,
                context: "Message",
            });
        }
        let body = Body::decode(body_node.value)?;

        Ok(Message { header, body })
    }
}

#[cfg(test)]
mod message_test {
    use super::*;
    use crate::address::DaemonAddress;
    use crate::body::{Service, State};
    use crate::param::{Parameter, ParameterId, Parameters};
    use crate::seqflag::SequenceFlag;

    fn sample(seq_flag: SequenceFlag) -> Message {
        let header = Header::new(
            DaemonAddress::new("agent", "a1").unwrap(),
            DaemonAddress::new("router", "r1").unwrap(),
            [9u8; 16],
            5,
            seq_flag,
        );
        let body = Body::Service(Service {
            service_id: 47,
            service_action: 0,
            params: Parameters(vec![Parameter::simple(
                ParameterId::COMMAND_ID,
                Bytes::from_static(b"ping"),
            )]),
        });
        Message::new(header, body)
    }

    #[test]
    fn round_trip_preserves_everything() {
        let msg = sample(SequenceFlag::Stateless);
        let encoded = msg.encode();
        let decoded = Message::decode(encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_swapped_header_body() {
        // Body first violates schema ordering (spec.md §4.1 "Mandatory
        // ordering").
        let msg = sample(SequenceFlag::Start);
        let mut out = BytesMut::new();
        msg.body.encode(&mut out);
        msg.header.encode(&mut out);
        let err = Message::decode(out.freeze()).unwrap_err();
        assert!(matches!(err, Error::UnexpectedTag { .. }));
    }

    #[test]
    fn decode_truncated_input_errors() {
        let msg = sample(SequenceFlag::End);
        let mut encoded = msg.encode();
        encoded.truncate(encoded.len() - 5);
        assert!(Message::decode(encoded).is_err());
    }

    #[test]
    fn state_variant_round_trips() {
        let header = Header::new(
            DaemonAddress::new("daemon", "d1").unwrap(),
            DaemonAddress::new("daemon", "d2").unwrap(),
            [3u8; 16],
            1,
            SequenceFlag::Start,
        );
        let body = Body::State(State {
            stmch_id: 1,
            state_action: 2,
            params: Parameters::default(),
        });
        let msg = Message::new(header, body);
        let decoded = Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}
