//! ServiceMessage layer (C8, spec.md §4.3): the RPC envelope carried in
//! `Body::Service`, built on top of the raw `Parameter` fragmentation
//! `gdt-proto` already knows how to encode/decode.
//!
//! A `ServiceMessage` is a `(service_id, service_action)` pair plus an
//! ordered list of `ServiceParameter`s, each identified by `(id, index)`
//! and addressable either sequentially (`parameters`) or randomly
//! (`variant_map`, mirroring `original_source/src/include/gdt_utils.h`'s
//! `GDTServiceMessage_GetVariant`). Parameters over 256 bytes are split
//! into several wire `Parameter` entries sharing one id
//! (`fragmentation_more` on all but the last); outbound packets are
//! windowed so no single wire message carries more than
//! `MAX_PARAMS_SIZE` bytes of parameter payload, matching the original's
//! fixed continuation-buffer size.
//!
//! Receiving is handled here (`ServiceMsgManager::on_message`, driven by
//! `client::process_task`); sending (`build_outbound_messages`) is a pure
//! function so `Client::send_service_message` can call it without giving
//! the writer task a lock on manager state it doesn't need.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use gdt_proto::param::{ExtraType, Parameter as WireParameter, ParameterId};
use gdt_proto::{Body, DaemonAddress, Header, Message, Parameters, SequenceFlag};

use crate::client::Client;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::events::{EventArgs, EventKind};
use crate::pool::{Lease, Pool};
use crate::stats::{StatId, Stats};

/// A single parameter's fragmentation window (spec.md §4.3 "256-byte
/// fragments").
pub const MAX_FRAGMENT_SIZE: usize = 256;
/// Aggregate parameter payload budget per wire packet (spec.md §4.3
/// "768-byte continuation window").
pub const MAX_PARAMS_SIZE: usize = 768;

/// A decoded parameter value, typed per `ExtraType` (SPEC_FULL.md §2).
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceParamValue {
    Octets(Bytes),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    Cstring(String),
    Bool(bool),
    Variant(Bytes),
}

impl ServiceParamValue {
    pub fn extra_type(&self) -> ExtraType {
        match self {
            ServiceParamValue::Octets(_) => ExtraType::Octets,
            ServiceParamValue::Uint32(_) => ExtraType::Uint32,
            ServiceParamValue::Uint64(_) => ExtraType::Uint64,
            ServiceParamValue::Float(_) => ExtraType::Float,
            ServiceParamValue::Double(_) => ExtraType::Double,
            ServiceParamValue::Cstring(_) => ExtraType::Cstring,
            ServiceParamValue::Bool(_) => ExtraType::Bool,
            ServiceParamValue::Variant(_) => ExtraType::Variant,
        }
    }

    fn encode(&self) -> Bytes {
        match self {
            ServiceParamValue::Octets(b) | ServiceParamValue::Variant(b) => b.clone(),
            ServiceParamValue::Uint32(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            ServiceParamValue::Uint64(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            ServiceParamValue::Float(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            ServiceParamValue::Double(v) => Bytes::copy_from_slice(&v.to_be_bytes()),
            ServiceParamValue::Cstring(s) => Bytes::copy_from_slice(s.as_bytes()),
            ServiceParamValue::Bool(b) => Bytes::copy_from_slice(&[*b as u8]),
        }
    }

    fn decode(extra_type: ExtraType, mut data: Bytes) -> Self {
        match extra_type {
            ExtraType::Uint32 if data.remaining() >= 4 => ServiceParamValue::Uint32(data.get_u32()),
            ExtraType::Uint64 if data.remaining() >= 8 => ServiceParamValue::Uint64(data.get_u64()),
            ExtraType::Float if data.remaining() >= 4 => ServiceParamValue::Float(data.get_f32()),
            ExtraType::Double if data.remaining() >= 8 => ServiceParamValue::Double(data.get_f64()),
            ExtraType::Bool => ServiceParamValue::Bool(data.first().copied().unwrap_or(0) != 0),
            ExtraType::Cstring => {
                ServiceParamValue::Cstring(String::from_utf8_lossy(&data).into_owned())
            }
            ExtraType::Variant => ServiceParamValue::Variant(data),
            // Octets, Unknown, or a short buffer for a fixed-width type: keep the raw bytes.
            _ => ServiceParamValue::Octets(data),
        }
    }
}

/// One assembled (post-reassembly) parameter, addressable by `(id, index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceParameter {
    pub id: ParameterId,
    pub index: u32,
    pub value: ServiceParamValue,
}

impl ServiceParameter {
    pub fn new(id: ParameterId, index: u32, value: ServiceParamValue) -> Self {
        ServiceParameter { id, index, value }
    }
}

/// Splits one `ServiceParameter`'s encoded bytes into `MAX_FRAGMENT_SIZE`
/// windows, producing the wire `Parameter` entries that share its id
/// (spec.md §4.3 "Send path" step 3). A value that fits in one window is
/// a single non-fragmented entry.
pub fn fragment_parameter(p: &ServiceParameter) -> Vec<WireParameter> {
    let data = p.value.encode();
    let extra_type = p.value.extra_type();
    if data.len() <= MAX_FRAGMENT_SIZE {
        return vec![WireParameter {
            id: p.id,
            data,
            fragmentation_more: false,
            param_index: p.index as u8,
            extra_type: Some(extra_type),
        }];
    }

    let total = data.len();
    let mut out = Vec::with_capacity((total + MAX_FRAGMENT_SIZE - 1) / MAX_FRAGMENT_SIZE);
    let mut offset = 0;
    let mut first = true;
    while offset < total {
        let end = (offset + MAX_FRAGMENT_SIZE).min(total);
        out.push(WireParameter {
            id: p.id,
            data: data.slice(offset..end),
            fragmentation_more: end < total,
            param_index: p.index as u8,
            extra_type: if first { Some(extra_type) } else { None },
        });
        first = false;
        offset = end;
    }
    out
}

/// Builds the sequence of wire `Message`s that carry `parameters` under
/// `(service_id, service_action)` from `source` to `destination`,
/// windowed so no single packet's aggregate parameter payload exceeds
/// `MAX_PARAMS_SIZE` (spec.md §4.3 "Send path" steps 2-4). Streams that
/// fit in one packet go out as `SF_STATELESS` (no continuation expected
/// on either side); everything else opens with `SF_START`, continues
/// with `SF_CONTINUE`, and closes with `SF_END`.
pub fn build_outbound_messages(
    source: DaemonAddress,
    destination: DaemonAddress,
    uuid: Uuid,
    service_id: u32,
    service_action: u32,
    parameters: &[ServiceParameter],
) -> Vec<Message> {
    let mut wire_params = Vec::new();
    for p in parameters {
        wire_params.extend(fragment_parameter(p));
    }

    let mut packets: Vec<Vec<WireParameter>> = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;
    for wp in wire_params {
        let size = wp.data.len();
        if current_size + size > MAX_PARAMS_SIZE && !current.is_empty() {
            packets.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(wp);
    }
    if !current.is_empty() || packets.is_empty() {
        packets.push(current);
    }

    let n = packets.len();
    let mut messages = Vec::with_capacity(n);
    for (i, params) in packets.into_iter().enumerate() {
        let flag = if n == 1 {
            SequenceFlag::Stateless
        } else if i == 0 {
            SequenceFlag::Start
        } else if i == n - 1 {
            SequenceFlag::End
        } else {
            SequenceFlag::Continue
        };
        let header = Header::new(source.clone(), destination.clone(), *uuid.as_bytes(), i as u32, flag);
        let body = Body::Service(gdt_proto::body::Service {
            service_id,
            service_action,
            params: Parameters(params),
        });
        messages.push(Message::new(header, body));
    }
    messages
}

/// An in-flight or completed ServiceMessage, as seen from the receiving
/// side. Checked out of a `Pool<ServiceMessage>` so a flood of inbound
/// requests degrades via `SERVICE_MESSAGE_ERROR` + a pool-exhaustion stat
/// rather than unbounded allocation (spec.md §4.5 "pool exhaustion").
#[derive(Debug, Clone, Default)]
pub struct ServiceMessage {
    pub service_id: u32,
    pub service_action: u32,
    pub parameters: Vec<ServiceParameter>,
    variant_map: HashMap<(u32, u32), ServiceParamValue>,
    pub complete: bool,
    /// Whether the manager drops this message's pool slot as soon as it
    /// completes, vs. leaving it for the application to `reset()` and
    /// reuse explicitly. Always `true` here: nothing in this crate holds
    /// a `ServiceMessage` past its completing event.
    pub auto_free: bool,
}

impl ServiceMessage {
    fn start(service_id: u32, service_action: u32) -> Self {
        ServiceMessage {
            service_id,
            service_action,
            parameters: Vec::new(),
            variant_map: HashMap::new(),
            complete: false,
            auto_free: true,
        }
    }

    fn insert(&mut self, id: ParameterId, index: u32, value: ServiceParamValue) {
        self.parameters.push(ServiceParameter::new(id, index, value.clone()));
        self.variant_map.insert((id.0, index), value);
    }

    /// Looks a parameter up by `(id, index)` regardless of arrival order
    /// (`GDTServiceMessage_GetVariant` in the original).
    pub fn get(&self, id: ParameterId, index: u32) -> Option<&ServiceParamValue> {
        self.variant_map.get(&(id.0, index))
    }

    /// Clears both views at once so a reused slot never serves stale data
    /// through one view after the other has been reset.
    pub fn reset(&mut self) {
        self.parameters.clear();
        self.variant_map.clear();
        self.complete = false;
    }
}

struct Reassembly {
    id: ParameterId,
    index: u32,
    extra_type: ExtraType,
    buf: BytesMut,
    /// Held for the reassembly's lifetime; bounds how many fragmented
    /// parameters can be in flight at once across all streams on this
    /// `Client` (spec.md §4.5 "pool exhaustion"). Released on drop, whether
    /// reassembly finishes normally or the owning message is torn down.
    _slot: Lease<()>,
}

struct InFlight {
    msg: Lease<ServiceMessage>,
    reassembly: Option<Reassembly>,
}

/// Receive-side assembler: tracks every ServiceMessage currently being
/// built for one `Client`, keyed by stream uuid, and fires the
/// `SERVICE_*` events as each one progresses (spec.md §4.3 "Receive
/// path", SPEC_FULL.md §2 event catalog).
///
/// Invariant: at most one fragmented parameter may be in flight per
/// ServiceMessage at a time (spec.md §4.3) — a second `fragmentation_more
/// = true` start while one is already open is treated as malformed and
/// fails the whole message.
pub struct ServiceMsgManager {
    stats: Arc<Stats>,
    pool: Arc<Pool<ServiceMessage>>,
    /// Bounds concurrently in-flight fragmented parameters, independent of
    /// the `ServiceMessage` pool above (a single message can have at most
    /// one fragmented parameter open per the single-in-flight invariant,
    /// but many messages across many streams can each have one). Slots
    /// hold no payload of their own — `Reassembly::buf` does that — so
    /// `()` is all the pool needs to track.
    sparam_pool: Arc<Pool<()>>,
    in_flight: HashMap<Uuid, InFlight>,
}

impl ServiceMsgManager {
    pub fn new(stats: Arc<Stats>, pool_config: PoolConfig) -> Self {
        let pool = Arc::new(Pool::new(
            "service_message",
            pool_config.smsg_pool,
            StatId::RxSmsgPoolEmpty,
            stats.clone(),
            ServiceMessage::default,
        ));
        let sparam_pool = Arc::new(Pool::new(
            "service_param",
            pool_config.sparam_pool,
            StatId::RxSparamPoolEmpty,
            stats.clone(),
            || (),
        ));
        ServiceMsgManager {
            stats,
            pool,
            sparam_pool,
            in_flight: HashMap::new(),
        }
    }

    /// Feeds one inbound `Body::Service` message through the reassembler.
    /// Called from `client::process_task` right after the stream-layer
    /// event (`STREAM_NEW`/`STREAM_NEXT`/`STREAM_END`) has already fired.
    pub fn on_message(&mut self, client: &Arc<Client>, msg: &Message) {
        let Body::Service(service) = &msg.body else {
            return;
        };
        let uuid = Uuid::from_bytes(msg.header.uuid);
        let flag = msg.header.sequence_flag;

        if flag == SequenceFlag::Start || flag == SequenceFlag::Stateless {
            let lease = match self.pool.checkout() {
                Ok(lease) => lease,
                Err(_) => {
                    client
                        .events
                        .fire(EventKind::ServiceMessageError, &EventArgs::None);
                    return;
                }
            };
            let mut in_flight = InFlight {
                msg: lease,
                reassembly: None,
            };
            in_flight.msg.service_id = service.service_id;
            in_flight.msg.service_action = service.service_action;
            client
                .events
                .fire(EventKind::ServiceMessageNew, &EventArgs::ServiceMessage(&in_flight.msg));
            self.in_flight.insert(uuid, in_flight);
        }

        let Some(in_flight) = self.in_flight.get_mut(&uuid) else {
            return;
        };

        for param in &service.params.0 {
            self.stats.incr(StatId::MessagesReceived); // keep the running total honest under fragmentation too
            process_wire_parameter(in_flight, client, &self.sparam_pool, param);
        }

        if flag == SequenceFlag::Stateless || flag == SequenceFlag::End {
            if let Some(mut in_flight) = self.in_flight.remove(&uuid) {
                in_flight.msg.complete = in_flight.reassembly.is_none();
                let kind = if in_flight.msg.complete {
                    EventKind::ServiceMessageComplete
                } else {
                    EventKind::ServiceMessageError
                };
                client.events.fire(kind, &EventArgs::ServiceMessage(&in_flight.msg));
            }
        }
    }
}

fn process_wire_parameter(
    in_flight: &mut InFlight,
    client: &Arc<Client>,
    sparam_pool: &Arc<Pool<()>>,
    param: &WireParameter,
) {
    match &mut in_flight.reassembly {
        Some(active) if active.id == param.id => {
            active.buf.extend_from_slice(&param.data);
            if param.fragmentation_more {
                client
                    .events
                    .fire(EventKind::ServiceParamStreamNext, &EventArgs::ServiceParameter(param));
            } else {
                let active = in_flight.reassembly.take().unwrap();
                let value = ServiceParamValue::decode(active.extra_type, active.buf.freeze());
                in_flight.msg.insert(active.id, active.index, value);
                client
                    .events
                    .fire(EventKind::ServiceParamStreamEnd, &EventArgs::ServiceParameter(param));
            }
        }
        Some(_) => {
            // A second fragmented id arrived while one was already open:
            // malformed per the single-in-flight invariant. Drop it.
            log::debug!("service message: overlapping fragmented parameters, dropping");
        }
        None => {
            if param.fragmentation_more {
                let slot = match sparam_pool.checkout() {
                    Ok(slot) => slot,
                    Err(_) => {
                        client
                            .events
                            .fire(EventKind::ServiceMessageError, &EventArgs::None);
                        return;
                    }
                };
                in_flight.reassembly = Some(Reassembly {
                    id: param.id,
                    index: param.param_index as u32,
                    extra_type: param.extra_type.unwrap_or(ExtraType::Octets),
                    buf: BytesMut::from(&param.data[..]),
                    _slot: slot,
                });
                client
                    .events
                    .fire(EventKind::ServiceParamStreamNew, &EventArgs::ServiceParameter(param));
            } else {
                let extra_type = param.extra_type.unwrap_or(ExtraType::Octets);
                let value = ServiceParamValue::decode(extra_type, param.data.clone());
                in_flight.msg.insert(param.id, param.param_index as u32, value);
                client
                    .events
                    .fire(EventKind::ServiceShortParamNew, &EventArgs::ServiceParameter(param));
            }
        }
    }
}

impl Client {
    /// Sends one ServiceMessage end-to-end (spec.md §4.3 "Send path"):
    /// fragments oversized parameters, windows them into packets bounded
    /// by `MAX_PARAMS_SIZE`, and hands each packet to the writer task in
    /// order. Returns once every packet has been queued; it does not wait
    /// for a reply — a caller building a request/response exchange should
    /// pair this with its own `STREAM_END` handler keyed on the returned
    /// uuid.
    pub async fn send_service_message(
        self: &Arc<Self>,
        destination: DaemonAddress,
        service_id: u32,
        service_action: u32,
        parameters: Vec<ServiceParameter>,
    ) -> Result<Uuid> {
        if !self.is_registered() {
            return Err(Error::Other("not registered".into()));
        }
        let source = self.local.clone();
        let uuid = Uuid::new_v4();
        let messages = build_outbound_messages(source, destination, uuid, service_id, service_action, &parameters);
        for message in messages {
            self.send(message).await?;
        }
        Ok(uuid)
    }
}

#[cfg(test)]
mod service_message_test {
    use super::*;
    use crate::stats::Stats;

    fn pool_config(smsg: usize) -> PoolConfig {
        PoolConfig {
            smsg_pool: smsg,
            sparam_pool: 16,
        }
    }

    #[test]
    fn short_parameter_fragments_into_a_single_entry() {
        let p = ServiceParameter::new(ParameterId(7), 0, ServiceParamValue::Cstring("ping".into()));
        let wire = fragment_parameter(&p);
        assert_eq!(wire.len(), 1);
        assert!(!wire[0].fragmentation_more);
        assert_eq!(&wire[0].data[..], b"ping");
    }

    #[test]
    fn oversized_parameter_fragments_into_256_byte_windows() {
        let p = ServiceParameter::new(
            ParameterId(7),
            0,
            ServiceParamValue::Octets(Bytes::from(vec![7u8; 600])),
        );
        let wire = fragment_parameter(&p);
        assert_eq!(wire.len(), 3);
        assert!(wire[0].fragmentation_more);
        assert!(wire[1].fragmentation_more);
        assert!(!wire[2].fragmentation_more);
        assert_eq!(wire[0].data.len(), 256);
        assert_eq!(wire[2].data.len(), 600 - 512);
    }

    #[test]
    fn small_message_goes_out_as_a_single_stateless_packet() {
        let source = DaemonAddress::new("t1", "a1").unwrap();
        let destination = DaemonAddress::new("t2", "a2").unwrap();
        let params = vec![ServiceParameter::new(
            ParameterId(7),
            0,
            ServiceParamValue::Cstring("ping".into()),
        )];
        let messages = build_outbound_messages(source, destination, Uuid::new_v4(), 1, 0, &params);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header.sequence_flag, SequenceFlag::Stateless);
    }

    #[test]
    fn large_message_windows_into_start_continue_end() {
        let source = DaemonAddress::new("t1", "a1").unwrap();
        let destination = DaemonAddress::new("t2", "a2").unwrap();
        let params = vec![ServiceParameter::new(
            ParameterId(7),
            0,
            ServiceParamValue::Octets(Bytes::from(vec![9u8; MAX_PARAMS_SIZE * 2 + 10])),
        )];
        let messages = build_outbound_messages(source, destination, Uuid::new_v4(), 1, 0, &params);
        assert!(messages.len() >= 3);
        assert_eq!(messages.first().unwrap().header.sequence_flag, SequenceFlag::Start);
        assert_eq!(messages.last().unwrap().header.sequence_flag, SequenceFlag::End);
        assert!(messages[1..messages.len() - 1]
            .iter()
            .all(|m| m.header.sequence_flag == SequenceFlag::Continue));
    }

    #[test]
    fn pool_exhaustion_is_visible_as_a_stat() {
        let stats = Arc::new(Stats::new());
        let pool = Arc::new(Pool::new(
            "service_message",
            0,
            StatId::RxSmsgPoolEmpty,
            stats.clone(),
            ServiceMessage::default,
        ));
        assert!(pool.checkout().is_err());
        assert_eq!(stats.get(StatId::RxSmsgPoolEmpty), 1);
    }

    #[test]
    fn manager_constructs_with_configured_pool_size() {
        let stats = Arc::new(Stats::new());
        let manager = ServiceMsgManager::new(stats, pool_config(4));
        assert_eq!(manager.pool.capacity(), 4);
        assert_eq!(manager.sparam_pool.capacity(), 16);
    }

    #[test]
    fn sparam_pool_exhaustion_is_visible_as_a_stat() {
        let stats = Arc::new(Stats::new());
        let pool: Arc<Pool<()>> = Arc::new(Pool::new(
            "service_param",
            0,
            StatId::RxSparamPoolEmpty,
            stats.clone(),
            || (),
        ));
        assert!(pool.checkout().is_err());
        assert_eq!(stats.get(StatId::RxSparamPoolEmpty), 1);
    }
}
