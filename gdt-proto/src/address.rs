//! `DaemonAddress` (spec.md §3): `(type, id)`, both required, each ≤ 15 bytes.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::tlv::{read_tlv, write_tlv, Tag};

pub const MAX_FIELD_LEN: usize = 15;

/// `EndPointDescriptor { type: IA5, id: IA5 }` (spec.md §6, Header fields 1/2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DaemonAddress {
    pub daemon_type: String,
    pub daemon_id: String,
}

impl DaemonAddress {
    pub fn new(daemon_type: impl Into<String>, daemon_id: impl Into<String>) -> Result<Self> {
        let addr = DaemonAddress {
            daemon_type: daemon_type.into(),
            daemon_id: daemon_id.into(),
        };
        addr.validate()?;
        Ok(addr)
    }

    pub fn validate(&self) -> Result<()> {
        if self.daemon_type.len() > MAX_FIELD_LEN || self.daemon_id.len() > MAX_FIELD_LEN {
            return Err(Error::DaemonAddressTooLong);
        }
        Ok(())
    }

    pub(crate) fn encode(&self, tag: Tag, out: &mut BytesMut) -> Result<()> {
        self.validate()?;
        let mut inner = BytesMut::new();
        write_tlv(Tag::context(0, false), self.daemon_type.as_bytes(), &mut inner);
        write_tlv(Tag::context(1, false), self.daemon_id.as_bytes(), &mut inner);
        write_tlv(tag, &inner, out);
        Ok(())
    }

    pub(crate) fn decode(value: Bytes) -> Result<Self> {
        let mut daemon_type = None;
        let mut daemon_id = None;
        let mut remaining = value;
        while !remaining.is_empty() {
            let node = read_tlv(&mut remaining)?;
            match node.tag.number {
                0 => {
                    daemon_type =
                        Some(String::from_utf8(node.value.to_vec()).map_err(|_| Error::InvalidUtf8)?)
                }
                1 => {
                    daemon_id =
                        Some(String::from_utf8(node.value.to_vec()).map_err(|_| Error::InvalidUtf8)?)
                }
                _ => {} // unknown-optional: skip, already consumed by read_tlv
            }
        }
        let addr = DaemonAddress {
            daemon_type: daemon_type.ok_or(Error::MissingHeaderField("source.type"))?,
            daemon_id: daemon_id.ok_or(Error::MissingHeaderField("source.id"))?,
        };
        addr.validate()?;
        Ok(addr)
    }
}

#[cfg(test)]
mod address_test {
    use super::*;

    #[test]
    fn round_trip() {
        let addr = DaemonAddress::new("router", "r1").unwrap();
        let mut buf = BytesMut::new();
        addr.encode(Tag::context(1, true), &mut buf).unwrap();
        let mut bytes = buf.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        let decoded = DaemonAddress::decode(node.value).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn rejects_oversized_field() {
        let err = DaemonAddress::new("this-type-is-too-long", "x").unwrap_err();
        assert_eq!(err, Error::DaemonAddressTooLong);
    }
}
