//! `Header` (spec.md §6): the fixed envelope on every GDT message.

use bytes::{Buf, Bytes, BytesMut};

use crate::address::DaemonAddress;
use crate::error::{Error, Result};
use crate::errorcode::ErrorCode;
use crate::seqflag::SequenceFlag;
use crate::tlv::{read_tlv, write_tlv, Children, Tag};

pub const HEADER_TAG: Tag = Tag::context(0, true);
pub const BODY_TAG: Tag = Tag::context(1, true);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct HopInfo {
    pub current_hop: u32,
    pub max_hops: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub source: DaemonAddress,
    pub destination: DaemonAddress,
    pub uuid: [u8; 16],
    pub sequence_num: u32,
    pub sequence_flag: SequenceFlag,
    pub enc_info: Option<Bytes>,
    pub hop_info: Option<HopInfo>,
    pub status: Option<ErrorCode>,
}

impl Header {
    pub fn new(
        source: DaemonAddress,
        destination: DaemonAddress,
        uuid: [u8; 16],
        sequence_num: u32,
        sequence_flag: SequenceFlag,
    ) -> Self {
        Header {
            version: crate::GDT_VERSION,
            source,
            destination,
            uuid,
            sequence_num,
            sequence_flag,
            enc_info: None,
            hop_info: None,
            status: None,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        let mut inner = BytesMut::new();
        write_tlv(
            Tag::context(0, false),
            &u32_be_trimmed(self.version),
            &mut inner,
        );
        // source/destination encode themselves wholesale (including their tag).
        self.source
            .encode(Tag::context(1, true), &mut inner)
            .expect("validated DaemonAddress");
        self.destination
            .encode(Tag::context(2, true), &mut inner)
            .expect("validated DaemonAddress");
        write_tlv(Tag::context(3, false), &self.uuid, &mut inner);
        write_tlv(
            Tag::context(4, false),
            &u32_be_trimmed(self.sequence_num),
            &mut inner,
        );
        write_tlv(
            Tag::context(5, false),
            &[self.sequence_flag.as_u8()],
            &mut inner,
        );
        if let Some(enc_info) = &self.enc_info {
            write_tlv(Tag::context(6, false), enc_info, &mut inner);
        }
        if let Some(hop) = &self.hop_info {
            let mut hop_buf = BytesMut::new();
            write_tlv(
                Tag::context(0, false),
                &u32_be_trimmed(hop.current_hop),
                &mut hop_buf,
            );
            write_tlv(
                Tag::context(1, false),
                &u32_be_trimmed(hop.max_hops),
                &mut hop_buf,
            );
            write_tlv(Tag::context(7, true), &hop_buf, &mut inner);
        }
        if let Some(status) = self.status {
            write_tlv(
                Tag::context(8, false),
                &u32_be_trimmed(status.as_u32()),
                &mut inner,
            );
        }
        write_tlv(HEADER_TAG, &inner, out);
    }

    pub fn decode(value: Bytes) -> Result<Self> {
        let mut version = None;
        let mut source = None;
        let mut destination = None;
        let mut uuid = None;
        let mut sequence_num = None;
        let mut sequence_flag = None;
        let mut enc_info = None;
        let mut hop_info = None;
        let mut status = None;

        for node in Children::new(value) {
            let node = node?;
            match node.tag.number {
                0 => version = Some(u32_be(node.value)),
                1 => source = Some(DaemonAddress::decode(node.value)?),
                2 => destination = Some(DaemonAddress::decode(node.value)?),
                3 => {
                    if node.value.len() != 16 {
                        return Err(Error::InvalidUuidLength(node.value.len()));
                    }
                    let mut arr = [0u8; 16];
                    arr.copy_from_slice(&node.value);
                    uuid = Some(arr);
                }
                4 => sequence_num = Some(u32_be(node.value)),
                5 => {
                    let b = node.value.first().copied().unwrap_or(0);
                    sequence_flag = Some(SequenceFlag::from_u8(b)?);
                }
                6 => enc_info = Some(node.value),
                7 => {
                    let mut current_hop = 0;
                    let mut max_hops = 0;
                    for child in Children::new(node.value) {
                        let child = child?;
                        match child.tag.number {
                            0 => current_hop = u32_be(child.value),
                            1 => max_hops = u32_be(child.value),
                            _ => {}
                        }
                    }
                    hop_info = Some(HopInfo {
                        current_hop,
                        max_hops,
                    });
                }
                8 => status = Some(ErrorCode::from_u32(u32_be(node.value))),
                _ => {} // unknown-optional: skip
            }
        }

        Ok(Header {
            version: version.ok_or(Error::MissingHeaderField("version"))?,
            source: source.ok_or(Error::MissingHeaderField("source"))?,
            destination: destination.ok_or(Error::MissingHeaderField("destination"))?,
            uuid: uuid.ok_or(Error::MissingHeaderField("uuid"))?,
            sequence_num: sequence_num.ok_or(Error::MissingHeaderField("sequence_num"))?,
            sequence_flag: sequence_flag.ok_or(Error::MissingHeaderField("sequence_flag"))?,
            enc_info,
            hop_info,
            status,
        })
    }
}

fn u32_be_trimmed(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    bytes[first_nonzero..].to_vec()
}

fn u32_be(mut value: Bytes) -> u32 {
    let mut out: u32 = 0;
    while value.has_remaining() {
        out = (out << 8) | value.get_u8() as u32;
    }
    out
}

#[cfg(test)]
mod header_test {
    use super::*;

    #[test]
    fn round_trip_minimal() {
        let header = Header::new(
            DaemonAddress::new("agent", "a1").unwrap(),
            DaemonAddress::new("router", "r1").unwrap(),
            [7u8; 16],
            3,
            SequenceFlag::Start,
        );
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let mut bytes = buf.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        assert_eq!(node.tag, HEADER_TAG);
        let decoded = Header::decode(node.value).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn round_trip_with_hop_and_status() {
        let mut header = Header::new(
            DaemonAddress::new("router", "r1").unwrap(),
            DaemonAddress::new("router", "r2").unwrap(),
            [1u8; 16],
            1,
            SequenceFlag::Stateless,
        );
        header.hop_info = Some(HopInfo {
            current_hop: 2,
            max_hops: 2,
        });
        header.status = Some(ErrorCode::HopLimit);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let mut bytes = buf.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        let decoded = Header::decode(node.value).unwrap();
        assert_eq!(decoded.hop_info, header.hop_info);
        assert_eq!(decoded.status, header.status);
    }
}
