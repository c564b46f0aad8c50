//! `Body` alternatives (spec.md §6). The outer `Body` TLV (tag 1,
//! constructed) wraps exactly one of these variants; the variant selector
//! is the child's own context tag number, taken verbatim from the spec's
//! table.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::param::Parameters;
use crate::tlv::{read_tlv, write_tlv, Children, Tag};

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

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketFwd {
    pub payload_type: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    pub action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataRetention {
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub action: u32,
    pub payload: Bytes,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stats {
    pub action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Auth {
    pub action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registration {
    pub action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notify {
    pub notify_type: u32,
    pub message: String,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Data {
    pub payload: Bytes,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Routing {
    pub action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Service {
    pub service_id: u32,
    pub service_action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub stmch_id: u32,
    pub state_action: u32,
    pub params: Parameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    EncryptedData(Bytes),
    PacketFwd(PacketFwd),
    Filter(Filter),
    DataRetention(DataRetention),
    Config(Config),
    Stats(Stats),
    Auth(Auth),
    Registration(Registration),
    Notify(Notify),
    Data(Data),
    Routing(Routing),
    Service(Service),
    State(State),
}

impl Body {
    fn variant_tag(&self) -> u32 {
        match self {
            Body::EncryptedData(_) => 1,
            Body::PacketFwd(_) => 2,
            Body::Filter(_) => 3,
            Body::DataRetention(_) => 4,
            Body::Config(_) => 6,
            Body::Stats(_) => 7,
            Body::Auth(_) => 8,
            Body::Registration(_) => 9,
            Body::Notify(_) => 10,
            Body::Data(_) => 11,
            Body::Routing(_) => 12,
            Body::Service(_) => 13,
            Body::State(_) => 14,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        let mut inner = BytesMut::new();
        match self {
            Body::EncryptedData(data) => inner.extend_from_slice(data),
            Body::PacketFwd(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.payload_type), &mut inner);
                write_tlv(Tag::context(1, false), &v.payload, &mut inner);
            }
            Body::Filter(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.action), &mut inner);
                v.params.encode_into(Tag::context(1, true), &mut inner);
            }
            Body::DataRetention(v) => {
                write_tlv(Tag::context(0, false), &v.payload, &mut inner);
            }
            Body::Config(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.action), &mut inner);
                write_tlv(Tag::context(1, false), &v.payload, &mut inner);
                v.params.encode_into(Tag::context(2, true), &mut inner);
            }
            Body::Stats(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.action), &mut inner);
                v.params.encode_into(Tag::context(1, true), &mut inner);
            }
            Body::Auth(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.action), &mut inner);
                v.params.encode_into(Tag::context(1, true), &mut inner);
            }
            Body::Registration(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.action), &mut inner);
                v.params.encode_into(Tag::context(1, true), &mut inner);
            }
            Body::Notify(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.notify_type), &mut inner);
                write_tlv(Tag::context(1, false), v.message.as_bytes(), &mut inner);
                v.params.encode_into(Tag::context(2, true), &mut inner);
            }
            Body::Data(v) => {
                write_tlv(Tag::context(0, false), &v.payload, &mut inner);
                v.params.encode_into(Tag::context(1, true), &mut inner);
            }
            Body::Routing(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.action), &mut inner);
                v.params.encode_into(Tag::context(1, true), &mut inner);
            }
            Body::Service(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.service_id), &mut inner);
                write_tlv(
                    Tag::context(1, false),
                    &u32_be_trimmed(v.service_action),
                    &mut inner,
                );
                v.params.encode_into(Tag::context(2, true), &mut inner);
            }
            Body::State(v) => {
                write_tlv(Tag::context(0, false), &u32_be_trimmed(v.stmch_id), &mut inner);
                write_tlv(
                    Tag::context(1, false),
                    &u32_be_trimmed(v.state_action),
                    &mut inner,
                );
                v.params.encode_into(Tag::context(2, true), &mut inner);
            }
        }
        let variant = Tag::context(self.variant_tag(), !matches!(self, Body::EncryptedData(_)));
        let mut wrapped = BytesMut::new();
        write_tlv(variant, &inner, &mut wrapped);
        write_tlv(crate::header::BODY_TAG, &wrapped, out);
    }

    pub fn decode(value: Bytes) -> Result<Self> {
        let mut value = value;
        if value.is_empty() {
            return Err(Error::MissingHeaderField("body"));
        }
        let node = read_tlv(&mut value)?;
        Self::decode_variant(node.tag.number, node.value)
    }

    fn decode_variant(tag: u32, value: Bytes) -> Result<Self> {
        Ok(match tag {
            1 => Body::EncryptedData(value),
            2 => {
                let mut payload_type = 0;
                let mut payload = Bytes::new();
                for node in Children::new(value) {
                    let node = node?;
                    match node.tag.number {
                        0 => payload_type = u32_be(node.value),
                        1 => payload = node.value,
                        _ => {}
                    }
                }
                Body::PacketFwd(PacketFwd {
                    payload_type,
                    payload,
                })
            }
            3 => {
                let (action, params) = decode_action_params(value)?;
                Body::Filter(Filter { action, params })
            }
            4 => {
                let mut payload = Bytes::new();
                for node in Children::new(value) {
                    let node = node?;
                    if node.tag.number == 0 {
                        payload = node.value;
                    }
                }
                Body::DataRetention(DataRetention { payload })
            }
            6 => {
                let mut action = 0;
                let mut payload = Bytes::new();
                let mut params = Parameters::default();
                for node in Children::new(value) {
                    let node = node?;
                    match node.tag.number {
                        0 => action = u32_be(node.value),
                        1 => payload = node.value,
                        2 => params = Parameters::decode(node.value)?,
                        _ => {}
                    }
                }
                Body::Config(Config {
                    action,
                    payload,
                    params,
                })
            }
            7 => {
                let (action, params) = decode_action_params(value)?;
                Body::Stats(Stats { action, params })
            }
            8 => {
                let (action, params) = decode_action_params(value)?;
                Body::Auth(Auth { action, params })
            }
            9 => {
                let (action, params) = decode_action_params(value)?;
                Body::Registration(Registration { action, params })
            }
            10 => {
                let mut notify_type = 0;
                let mut message = String::new();
                let mut params = Parameters::default();
                for node in Children::new(value) {
                    let node = node?;
                    match node.tag.number {
                        0 => notify_type = u32_be(node.value),
                        1 => {
                            message =
                                String::from_utf8(node.value.to_vec()).map_err(|_| Error::InvalidUtf8)?
                        }
                        2 => params = Parameters::decode(node.value)?,
                        _ => {}
                    }
                }
                Body::Notify(Notify {
                    notify_type,
                    message,
                    params,
                })
            }
            11 => {
                let mut payload = Bytes::new();
                let mut params = Parameters::default();
                for node in Children::new(value) {
                    let node = node?;
                    match node.tag.number {
                        0 => payload = node.value,
                        1 => params = Parameters::decode(node.value)?,
                        _ => {}
                    }
                }
                Body::Data(Data { payload, params })
            }
            12 => {
                let (action, params) = decode_action_params(value)?;
                Body::Routing(Routing { action, params })
            }
            13 => {
                let mut service_id = 0;
                let mut service_action = 0;
                let mut params = Parameters::default();
                for node in Children::new(value) {
                    let node = node?;
                    match node.tag.number {
                        0 => service_id = u32_be(node.value),
                        1 => service_action = u32_be(node.value),
                        2 => params = Parameters::decode(node.value)?,
                        _ => {}
                    }
                }
                Body::Service(Service {
                    service_id,
                    service_action,
                    params,
                })
            }
            14 => {
                let mut stmch_id = 0;
                let mut state_action = 0;
                let mut params = Parameters::default();
                for node in Children::new(value) {
                    let node = node?;
                    match node.tag.number {
                        0 => stmch_id = u32_be(node.value),
                        1 => state_action = u32_be(node.value),
                        2 => params = Parameters::decode(node.value)?,
                        _ => {}
                    }
                }
                Body::State(State {
                    stmch_id,
                    state_action,
                    params,
                })
            }
            other => return Err(Error::UnknownBodyVariant(other)),
        })
    }
}

fn decode_action_params(value: Bytes) -> Result<(u32, Parameters)> {
    let mut action = 0;
    let mut params = Parameters::default();
    for node in Children::new(value) {
        let node = node?;
        match node.tag.number {
            0 => action = u32_be(node.value),
            1 => params = Parameters::decode(node.value)?,
            _ => {}
        }
    }
    Ok((action, params))
}

#[cfg(test)]
mod body_test {
    use super::*;
    use crate::param::{Parameter, ParameterId};

    #[test]
    fn service_round_trip() {
        let body = Body::Service(Service {
            service_id: 47,
            service_action: 1,
            params: Parameters(vec![Parameter::simple(
                ParameterId::COMMAND_ID,
                Bytes::from_static(b"ping"),
            )]),
        });
        let mut buf = BytesMut::new();
        body.encode(&mut buf);
        let mut bytes = buf.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        assert_eq!(node.tag, crate::header::BODY_TAG);
        let decoded = Body::decode(node.value).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn routing_round_trip() {
        let body = Body::Routing(Routing {
            action: 2,
            params: Parameters::default(),
        });
        let mut buf = BytesMut::new();
        body.encode(&mut buf);
        let mut bytes = buf.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        let decoded = Body::decode(node.value).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let mut inner = BytesMut::new();
        write_tlv(Tag::context(99, true), b"", &mut inner);
        let mut wrapped = BytesMut::new();
        write_tlv(crate::header::BODY_TAG, &inner, &mut wrapped);
        let mut bytes = wrapped.freeze();
        let node = read_tlv(&mut bytes).unwrap();
        assert!(matches!(
            Body::decode(node.value),
            Err(Error::UnknownBodyVariant(99))
        ));
    }
}
