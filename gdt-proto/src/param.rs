//! `Parameter`/`Parameters` wire format (spec.md §6) and the well-known
//! `ParameterType` id space plus the `ServiceParamType` ("extra type")
//! enumeration used by the ServiceMessage layer (C8).
//!
//! Wire shape:
//! ```text
//! Parameters    ::= SEQUENCE OF Parameter
//! Parameter     ::= SEQUENCE { id [0], value [1] Parameter_value }
//! Parameter_value ::= SEQUENCE {
//!     data        [0] OCTET STRING,
//!     frag_more   [1] OCTET STRING (1 byte, 1 = more fragments follow) OPTIONAL,
//!     param_index [2] OCTET STRING (1 byte) OPTIONAL,
//!     extra_type  [3] OCTET STRING (1 byte) OPTIONAL,
//! }
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::tlv::{read_tlv, write_tlv, Children, Tag};

/// `id` is an open-ended 32-bit space: "new IDs may be added without
/// breaking the schema" (spec.md §6), so this is a newtype rather than a
/// closed enum. Well-known ids are associated constants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterId(pub u32);

impl ParameterId {
    pub const DAEMON_TYPE: ParameterId = ParameterId(1);
    pub const DAEMON_ID: ParameterId = ParameterId(2);
    pub const GUID: ParameterId = ParameterId(3);
    pub const AUTH_ID: ParameterId = ParameterId(4);
    pub const AUTH_PASSWORD: ParameterId = ParameterId(5);
    pub const COMMAND_ID: ParameterId = ParameterId(6);
    pub const SERVICE_ID: ParameterId = ParameterId(7);
    pub const STATS_ID: ParameterId = ParameterId(8);
    pub const STATS_COUNT: ParameterId = ParameterId(9);
    pub const STATS_VALUE: ParameterId = ParameterId(10);

    fn encode(self, out: &mut BytesMut) {
        write_tlv(Tag::context(0, false), &encode_be_trimmed(self.0), out);
    }
}

/// `ServiceParamType` (spec.md §3 lists OCTETS/UINT32/UINT64/BOOL/CSTRING/
/// VARIANT; `original_source/src/include/gdt_utils.h`'s `ServiceParamType`
/// additionally carries FLOAT and DOUBLE, see SPEC_FULL.md §2).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExtraType {
    Unknown = 0,
    Octets = 1,
    Uint32 = 2,
    Uint64 = 3,
    Float = 4,
    Double = 5,
    Cstring = 6,
    Bool = 7,
    Variant = 8,
}

impl ExtraType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => ExtraType::Unknown,
            1 => ExtraType::Octets,
            2 => ExtraType::Uint32,
            3 => ExtraType::Uint64,
            4 => ExtraType::Float,
            5 => ExtraType::Double,
            6 => ExtraType::Cstring,
            7 => ExtraType::Bool,
            8 => ExtraType::Variant,
            other => {
                return Err(Error::InvalidEnumValue {
                    name: "ExtraType",
                    value: other as u32,
                })
            }
        })
    }
}

fn encode_be_trimmed(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    bytes[first_nonzero..].to_vec()
}

fn decode_be(mut value: Bytes) -> u32 {
    let mut out: u32 = 0;
    while value.has_remaining() {
        out = (out << 8) | value.get_u8() as u32;
    }
    out
}

/// One wire parameter entry. A long `ServiceParameter` (spec.md §3) is
/// split into several of these sharing one `id`, each with
/// `fragmentation_more = true` except the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub id: ParameterId,
    pub data: Bytes,
    pub fragmentation_more: bool,
    pub param_index: u8,
    pub extra_type: Option<ExtraType>,
}

impl Parameter {
    pub fn simple(id: ParameterId, data: impl Into<Bytes>) -> Self {
        Parameter {
            id,
            data: data.into(),
            fragmentation_more: false,
            param_index: 0,
            extra_type: None,
        }
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        let mut param = BytesMut::new();
        self.id.encode(&mut param);

        let mut value = BytesMut::new();
        write_tlv(Tag::context(0, false), &self.data, &mut value);
        write_tlv(
            Tag::context(1, false),
            &[self.fragmentation_more as u8],
            &mut value,
        );
        write_tlv(Tag::context(2, false), &[self.param_index], &mut value);
        if let Some(extra) = self.extra_type {
            write_tlv(Tag::context(3, false), &[extra as u8], &mut value);
        }
        write_tlv(Tag::context(1, true), &value, &mut param);

        write_tlv(Tag::context(0, true), &param, out);
    }

    fn decode(value: Bytes) -> Result<Self> {
        let mut id = None;
        let mut data = Bytes::new();
        let mut fragmentation_more = false;
        let mut param_index = 0u8;
        let mut extra_type = None;

        for node in Children::new(value) {
            let node = node?;
            match node.tag.number {
                0 => id = Some(ParameterId(decode_be(node.value))),
                1 => {
                    for child in Children::new(node.value) {
                        let child = child?;
                        match child.tag.number {
                            0 => data = child.value,
                            1 => {
                                fragmentation_more =
                                    child.value.first().copied().unwrap_or(0) == 1
                            }
                            2 => param_index = child.value.first().copied().unwrap_or(0),
                            3 => {
                                if let Some(b) = child.value.first().copied() {
                                    extra_type = Some(ExtraType::from_u8(b)?);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Parameter {
            id: id.ok_or(Error::MissingHeaderField("parameter.id"))?,
            data,
            fragmentation_more,
            param_index,
            extra_type,
        })
    }
}

/// `Parameters ::= SEQUENCE OF Parameter`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(pub Vec<Parameter>);

impl Parameters {
    pub fn encode_into(&self, tag: Tag, out: &mut BytesMut) {
        let mut inner = BytesMut::new();
        for p in &self.0 {
            p.encode(&mut inner);
        }
        write_tlv(tag, &inner, out);
    }

    pub fn decode(value: Bytes) -> Result<Self> {
        let mut params = Vec::new();
        for node in Children::new(value) {
            let node = node?;
            params.push(Parameter::decode(node.value)?);
        }
        Ok(Parameters(params))
    }
}

#[cfg(test)]
mod param_test {
    use super::*;

    #[test]
    fn simple_parameter_round_trip() {
        let params = Parameters(vec![Parameter::simple(
            ParameterId::SERVICE_ID,
            Bytes::from_static(b"ping"),
        )]);
        let mut out = BytesMut::new();
        params.encode_into(Tag::context(0, true), &mut out);
        let mut bytes = out.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        let decoded = Parameters::decode(node.value).unwrap();
        assert_eq!(decoded.0.len(), 1);
        assert_eq!(decoded.0[0].id, ParameterId::SERVICE_ID);
        assert_eq!(&decoded.0[0].data[..], b"ping");
        assert!(!decoded.0[0].fragmentation_more);
    }

    #[test]
    fn fragmented_parameter_round_trip() {
        let mut params = Vec::new();
        for i in 0..12u8 {
            params.push(Parameter {
                id: ParameterId(42),
                data: Bytes::from(vec![i; 256]),
                fragmentation_more: i < 11,
                param_index: 0,
                extra_type: if i == 0 { Some(ExtraType::Octets) } else { None },
            });
        }
        let parameters = Parameters(params);
        let mut out = BytesMut::new();
        parameters.encode_into(Tag::context(0, true), &mut out);
        let mut bytes = out.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        let decoded = Parameters::decode(node.value).unwrap();
        assert_eq!(decoded.0.len(), 12);
        assert!(decoded.0[..11].iter().all(|p| p.fragmentation_more));
        assert!(!decoded.0[11].fragmentation_more);
    }

    #[test]
    fn unknown_parameter_id_round_trips() {
        let params = Parameters(vec![Parameter::simple(ParameterId(99999), Bytes::new())]);
        let mut out = BytesMut::new();
        params.encode_into(Tag::context(0, true), &mut out);
        let mut bytes = out.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        let decoded = Parameters::decode(node.value).unwrap();
        assert_eq!(decoded.0[0].id, ParameterId(99999));
    }
}
