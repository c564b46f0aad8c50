//! Client (C6, spec.md §4.6): one registered peer's view of an SCTP
//! association — the reader/writer/sweeper tasks, the registration
//! handshake, and the ref-counted `CLIENT_CREATED`/`CLIENT_DESTROYED`
//! lifecycle.
//!
//! A Client owns `streams_per_association` SCTP streams opened eagerly
//! right after the association completes (spec.md §6 "Streams per
//! association = 16 by default" is a static negotiation here, not a
//! reactive `accept_stream` discovery — both peers know the count from
//! their own `--gdt-streams` flag). `sctp::Association::open_stream`
//! hands back an independent `(SendStream, RecvStream)` pair per logical
//! stream, so the two halves are split here too: the writer task owns
//! every `SendStream` and round-robins Messages across them, while one
//! reader task per `RecvStream` feeds a single ordered channel that the
//! process task drains — the stream table (C5) and the
//! registration/heartbeat state never need a lock shared with the I/O
//! tasks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use gdt_proto::{
    body::{Body, Registration},
    ErrorCode, Header, HopInfo, Message, SequenceFlag,
};
use gdt_proto::{DaemonAddress, ParameterId};
use parking_lot::Mutex as PLMutex;
use sctp::{Association, ErrorCauseCode, RecvStream, SendStream};
use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

use crate::config::{HeartbeatConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::events::{EventArgs, EventDispatcher, EventKind};
use crate::heartbeat::HeartbeatInfo;
use crate::routing::DEFAULT_ROUTING_MAX_HOPS;
use crate::service_message::ServiceMsgManager;
use crate::session::Session;
use crate::stats::{StatId, Stats};
use crate::stream::{Initiator, Stream as GdtStream, StreamState, StreamTable};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

impl ClientId {
    pub fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One peer connection. Cheap to clone (it is always held as
/// `Arc<Client>`); the `Drop` impl fires `CLIENT_DESTROYED` once the last
/// handle goes away, which is the direct Rust analogue of the original's
/// manual `inc_refc`/`dec_refc` pair (spec.md §9 "Ref-counted clients").
pub struct Client {
    pub id: ClientId,
    pub direction: Direction,
    pub peer_addr: SocketAddr,
    /// This Session's own address — `Header::source` on everything this
    /// Client originates. Distinct from `end_point` (the *remote*
    /// DaemonAddress, populated once the peer registers).
    pub local: DaemonAddress,
    association: Association,
    next_stream: AtomicUsize,
    stream_count: usize,
    end_point: PLMutex<Option<DaemonAddress>>,
    registered: AtomicBool,
    router_capable: AtomicBool,
    stats: Arc<Stats>,
    pub(crate) events: Arc<EventDispatcher>,
    heartbeat: PLMutex<HeartbeatInfo>,
    outbound_tx: mpsc::Sender<Message>,
    /// Back-reference to the owning `Session`, used only to resolve a
    /// route (C7) for inbound messages not addressed to this Session's
    /// own `DaemonAddress`. `Weak` so a `Client` never keeps its `Session`
    /// alive — `Session` is the one holding `Arc<Client>`, not the other
    /// way around.
    session: Weak<Session>,
    /// Notifies `process_task` of a UUID this side just originated with
    /// `SF_START`/`SF_STATELESS`, so the reply (echoed back with the same
    /// UUID, per spec.md §4.2 "Correlation") has a stream table entry to
    /// land on instead of being dropped as an unknown continuation.
    local_stream_tx: mpsc::Sender<(Uuid, DaemonAddress)>,
    shutdown: Arc<Notify>,
    shutting_down: AtomicBool,
    /// Broadcasts `false` exactly once, right after the association is
    /// closed (`shutdown`). `Session::reconnect_supervisor` watches this
    /// to notice an `OUTBOUND` Client going down without racing
    /// `Notify`'s "only currently-waiting tasks are woken" semantics.
    alive_tx: watch::Sender<bool>,
}

impl Client {
    /// Spawns the reader/writer/sweeper/heartbeat tasks for a freshly
    /// established association and returns the shared handle. `send_streams`
    /// and `recv_streams` must already carry `streams_per_association` open
    /// streams each (both `Session::connect` and the acceptor loop open or
    /// harvest them before calling this).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        direction: Direction,
        peer_addr: SocketAddr,
        local: DaemonAddress,
        association: Association,
        send_streams: Vec<SendStream>,
        recv_streams: Vec<RecvStream>,
        stats: Arc<Stats>,
        events: Arc<EventDispatcher>,
        heartbeat_config: HeartbeatConfig,
        stream_timeout: Duration,
        pool_config: crate::config::PoolConfig,
        session: Weak<Session>,
    ) -> Arc<Client> {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (local_stream_tx, local_stream_rx) = mpsc::channel(256);
        let (alive_tx, _alive_rx) = watch::channel(true);
        let stream_count = send_streams.len();

        let client = Arc::new(Client {
            id: ClientId::next(),
            direction,
            peer_addr,
            local,
            association,
            next_stream: AtomicUsize::new(0),
            stream_count,
            end_point: PLMutex::new(None),
            registered: AtomicBool::new(false),
            router_capable: AtomicBool::new(false),
            stats,
            events,
            heartbeat: PLMutex::new(HeartbeatInfo::new(
                heartbeat_config.interval,
                heartbeat_config.miss_threshold,
            )),
            outbound_tx,
            session,
            local_stream_tx,
            shutdown: Arc::new(Notify::new()),
            shutting_down: AtomicBool::new(false),
            alive_tx,
        });

        client.events.fire(EventKind::ClientCreated, &EventArgs::Client(&client));

        for recv_stream in recv_streams {
            tokio::spawn(reader_task(recv_stream, inbound_tx.clone(), client.clone()));
        }
        tokio::spawn(writer_task(send_streams, outbound_rx, client.clone()));
        tokio::spawn(process_task(
            inbound_rx,
            local_stream_rx,
            client.clone(),
            stream_timeout,
            pool_config,
        ));
        tokio::spawn(heartbeat_task(client.clone()));

        client
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn is_router_capable(&self) -> bool {
        self.router_capable.load(Ordering::Acquire)
    }

    pub fn set_router_capable(&self, capable: bool) {
        self.router_capable.store(capable, Ordering::Release);
    }

    pub fn end_point(&self) -> Option<DaemonAddress> {
        self.end_point.lock().clone()
    }

    pub fn streams_per_association(&self) -> usize {
        self.stream_count
    }

    /// A channel that flips to `false` exactly once, when this Client has
    /// finished `shutdown()`. `Session::reconnect_supervisor` subscribes
    /// to notice an outbound association going down and re-dial.
    pub fn subscribe_alive(&self) -> watch::Receiver<bool> {
        self.alive_tx.subscribe()
    }

    /// Enqueues `message` for sending, round-robining across the
    /// association's SCTP streams (spec.md §4 "Payload ... sctp_stream_id").
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        // Registration handshakes also open with SF_START but never close
        // with a matching SF_END, so tracking them here would just leave a
        // harmless entry for the sweeper to expire; skip it rather than
        // paying that noise.
        if !matches!(message.body, Body::Registration(_))
            && matches!(message.header.sequence_flag, SequenceFlag::Start | SequenceFlag::Stateless)
        {
            let uuid = Uuid::from_bytes(message.header.uuid);
            let _ = self
                .local_stream_tx
                .send((uuid, message.header.destination.clone()))
                .await;
        }
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| Error::ShuttingDown)
    }

    /// Sends the outbound half of the registration handshake (spec.md
    /// §4.6 "Connect side"): a `Body::Registration` ServiceMessage
    /// carrying this daemon's type/id. `config` is accepted for callers
    /// that only have a `SessionConfig` in hand; it must describe this
    /// same Client's own address (`self.local`).
    pub async fn send_registration(&self, _config: &SessionConfig) -> Result<()> {
        self.reply_registration().await
    }

    /// Sends a `Body::Registration` carrying `self.local`'s type/id,
    /// addressed to whatever `end_point` is currently known (or back to
    /// `peer_addr`'s as-yet-unregistered placeholder if none is). Used
    /// both for the dialer's opening handshake message and the
    /// acceptor's reply to it.
    async fn reply_registration(&self) -> Result<()> {
        let remote = self.end_point.lock().clone().unwrap_or_else(|| self.local.clone());
        let header = Header::new(
            self.local.clone(),
            remote,
            *Uuid::new_v4().as_bytes(),
            0,
            SequenceFlag::Start,
        );
        let body = Body::Registration(Registration {
            action: 0,
            params: gdt_proto::Parameters(vec![
                gdt_proto::Parameter::simple(ParameterId::DAEMON_TYPE, Bytes::from(self.local.daemon_type.clone())),
                gdt_proto::Parameter::simple(ParameterId::DAEMON_ID, Bytes::from(self.local.daemon_id.clone())),
            ]),
        });
        self.send(Message::new(header, body)).await
    }

    /// Tears the Client down per spec.md §4.6 "Shutdown": stop accepting
    /// new streams, give the outbound queue `drain_deadline` to flush,
    /// force-timeout whatever streams remain, close the association and
    /// fire `CLIENT_TERMINATED`. `CLIENT_DESTROYED` follows once every
    /// `Arc<Client>` this returns drops.
    pub async fn shutdown(&self, drain_deadline: Duration) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = tokio::time::timeout(drain_deadline, self.outbound_tx.closed()).await;
        self.shutdown.notify_waiters();
        self.association.close(ErrorCauseCode::from(0u16), b"shutdown");
        self.events.fire(EventKind::ClientTerminated, &EventArgs::Client(self));
        let _ = self.alive_tx.send(false);
    }

    fn mark_registered(&self, end_point: DaemonAddress) {
        *self.end_point.lock() = Some(end_point);
        self.registered.store(true, Ordering::Release);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.events.fire(EventKind::ClientDestroyed, &EventArgs::None);
    }
}

async fn reader_task(mut recv_stream: RecvStream, inbound_tx: mpsc::Sender<Message>, client: Arc<Client>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match recv_stream.read(&mut buf).await {
            Ok(Some(n)) if n > 0 => {
                let bytes = Bytes::copy_from_slice(&buf[..n]);
                match Message::decode(bytes) {
                    Ok(msg) => {
                        if inbound_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("client {:?}: malformed GDT message: {e}", client.id);
                    }
                }
            }
            Ok(_) => break, // stream finished (0 bytes or EOF)
            Err(e) => {
                log::debug!("client {:?}: recv_stream read error: {e}", client.id);
                break;
            }
        }
    }
}

async fn writer_task(
    mut send_streams: Vec<SendStream>,
    mut outbound_rx: mpsc::Receiver<Message>,
    client: Arc<Client>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let idx = client.next_stream.fetch_add(1, Ordering::Relaxed) % send_streams.len().max(1);
        let encoded = message.encode();
        if let Err(e) = send_streams[idx].write_all(&encoded).await {
            log::debug!("client {:?}: send_stream write error: {e}", client.id);
            break;
        }
        client.stats.incr(StatId::MessagesSent);
        client.stats.add(StatId::BytesSent, encoded.len() as u64);
        client
            .events
            .fire(EventKind::PayloadSent, &EventArgs::Payload(&encoded));
    }
}

/// Owns the stream table and registration/heartbeat state; the only
/// task that mutates them, so no lock needs to be shared with the I/O
/// tasks above.
async fn process_task(
    mut inbound_rx: mpsc::Receiver<Message>,
    mut local_stream_rx: mpsc::Receiver<(Uuid, DaemonAddress)>,
    client: Arc<Client>,
    stream_timeout: Duration,
    pool_config: crate::config::PoolConfig,
) {
    let mut streams = StreamTable::new();
    let mut service_msgs = ServiceMsgManager::new(client.stats.clone(), pool_config);
    let mut sweep = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = client.shutdown.notified() => {
                for stream in streams.force_timeout_all() {
                    client.events.fire(EventKind::StreamTimeout, &EventArgs::Stream(&stream));
                }
                break;
            }
            _ = sweep.tick() => {
                for stream in streams.sweep_expired(stream_timeout) {
                    client.stats.incr(StatId::StreamTimeouts);
                    client.events.fire(EventKind::StreamTimeout, &EventArgs::Stream(&stream));
                }
            }
            originated = local_stream_rx.recv() => {
                let Some((uuid, peer)) = originated else { continue };
                // Already active: this side sent the SF_START/SF_STATELESS
                // itself, so there is no inbound flag transition to apply.
                let mut stream = GdtStream::new(uuid, peer, Initiator::Local);
                stream.state = StreamState::Active;
                streams.insert(stream);
            }
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else { break };
                client.stats.incr(StatId::MessagesReceived);

                if msg.header.sequence_flag == SequenceFlag::Heartbeat {
                    client.heartbeat.lock().mark_received();
                    client.events.fire(EventKind::HeartbeatReceived, &EventArgs::None);
                    continue;
                }

                let uuid = Uuid::from_bytes(msg.header.uuid);

                if !client.is_registered() {
                    if let Body::Registration(reg) = &msg.body {
                        let was_inbound = client.direction == Direction::Inbound;
                        handle_registration_reply(&client, reg);
                        // Mirrors the original daemons' mutual handshake
                        // (routing.cpp reads `get_end_point_daemon_*` on
                        // both ends once connected): the acceptor sends
                        // its own Registration back so the dialer's
                        // `end_point` gets populated too.
                        if was_inbound && client.is_registered() {
                            let client2 = client.clone();
                            tokio::spawn(async move {
                                let _ = client2.reply_registration().await;
                            });
                        }
                    }
                    continue;
                }

                // Not addressed to this Session's own DaemonAddress: act as
                // a router (C7, spec.md §4.4/§7.3) rather than treating the
                // packet as local traffic.
                if msg.header.destination != client.local {
                    route_inbound(&client, msg, &mut streams).await;
                    continue;
                }

                // Fire-and-forget datagrams allocate no stream on either
                // side (SPEC_FULL.md §2, gdt_proto::SequenceFlag::StatelessNoReply).
                if msg.header.sequence_flag == SequenceFlag::StatelessNoReply {
                    client.events.fire(EventKind::Datagram, &EventArgs::RawDatagram {
                        from: &msg.header.source,
                        data: &[],
                    });
                    if matches!(msg.body, Body::Service(_)) {
                        service_msgs.on_message(&client, &msg);
                    }
                    continue;
                }

                if streams.get_mut(&uuid).is_none() {
                    let initiator = match msg.header.sequence_flag {
                        SequenceFlag::Start | SequenceFlag::Stateless => Initiator::Remote,
                        _ => continue, // unknown UUID with a continuation flag: drop (malformed/expired)
                    };
                    streams.insert(GdtStream::new(uuid, msg.header.source.clone(), initiator));
                }

                let Some(stream) = streams.get_mut(&uuid) else { continue };
                let flag = msg.header.sequence_flag;
                match stream.apply(flag) {
                    Ok(kind) => {
                        client.events.fire(kind, &EventArgs::Stream(stream));
                        if matches!(msg.body, Body::Service(_)) {
                            service_msgs.on_message(&client, &msg);
                        }
                        // A stateless stream is single-shot: process this one
                        // packet, reply with an automatic SF_END "stream
                        // complete" and never keep it around for a
                        // continuation (spec.md §4.2 "Stateless streams").
                        if flag == SequenceFlag::Stateless {
                            streams.remove(&uuid);
                            let reply = Message::new(
                                Header::new(msg.header.destination.clone(), msg.header.source.clone(), msg.header.uuid, 0, SequenceFlag::End),
                                Body::Data(gdt_proto::body::Data::default()),
                            );
                            let client2 = client.clone();
                            tokio::spawn(async move {
                                let _ = client2.send(reply).await;
                            });
                        } else if kind == EventKind::StreamEnd {
                            streams.remove(&uuid);
                        }
                    }
                    Err(e) => {
                        log::debug!("client {:?}: {e}", client.id);
                    }
                }
            }
        }
    }
}

/// Forwards one inbound message that is not addressed to this Session's
/// own `DaemonAddress` (spec.md §4.4 "Forwarding", §7.3 "Routing"):
/// bumps the per-UUID hop count, refuses and replies with
/// `ErrorCode::HopLimit` once the bound is reached, otherwise asks the
/// owning `Session` to resolve and hand the message to a route. A
/// failed lookup (no registered candidate) is reported back to the
/// original source with `ErrorCode::NoRoute`, and both failure paths
/// increment `StatId::RoutingNoMatch` (spec.md §7 "Routing" error class).
async fn route_inbound(client: &Arc<Client>, mut msg: Message, streams: &mut StreamTable) {
    let Some(session) = client.session.upgrade() else {
        return;
    };
    let uuid = Uuid::from_bytes(msg.header.uuid);
    let max_hops = msg
        .header
        .hop_info
        .map(|h| h.max_hops)
        .filter(|&m| m > 0)
        .unwrap_or(DEFAULT_ROUTING_MAX_HOPS);

    if streams.get_mut(&uuid).is_none() {
        streams.insert(GdtStream::new(uuid, msg.header.source.clone(), Initiator::Remote));
    }

    let hop_result = streams.get_mut(&uuid).map(|s| s.bump_hop(max_hops));
    if matches!(hop_result, Some(Err(_))) {
        streams.remove(&uuid);
        client.stats.incr(StatId::RoutingNoMatch);
        send_routing_error_reply(client, msg.header.source.clone(), msg.header.uuid, ErrorCode::HopLimit).await;
        return;
    }

    if msg.header.hop_info.is_none() {
        msg.header.hop_info = Some(HopInfo { current_hop: 0, max_hops });
    }
    let source = msg.header.source.clone();
    let uuid_bytes = msg.header.uuid;
    if session.forward(msg, client.id).await.is_err() {
        client.stats.incr(StatId::RoutingNoMatch);
        send_routing_error_reply(client, source, uuid_bytes, ErrorCode::NoRoute).await;
    }
}

/// Sends the error-packet reply spec.md §7.3 describes: the original
/// source swapped into `destination`, the same UUID, and a non-zero
/// `status`.
async fn send_routing_error_reply(client: &Arc<Client>, destination: DaemonAddress, uuid: [u8; 16], code: ErrorCode) {
    let mut header = Header::new(client.local.clone(), destination, uuid, 0, SequenceFlag::End);
    header.status = Some(code);
    let reply = Message::new(header, Body::Data(gdt_proto::body::Data::default()));
    let _ = client.send(reply).await;
}

fn handle_registration_reply(client: &Client, reg: &Registration) {
    let mut daemon_type = None;
    let mut daemon_id = None;
    for param in &reg.params.0 {
        match param.id {
            ParameterId::DAEMON_TYPE => {
                daemon_type = String::from_utf8(param.data.to_vec()).ok();
            }
            ParameterId::DAEMON_ID => {
                daemon_id = String::from_utf8(param.data.to_vec()).ok();
            }
            _ => {}
        }
    }
    if let (Some(t), Some(i)) = (daemon_type, daemon_id) {
        if let Ok(addr) = DaemonAddress::new(t, i) {
            client.mark_registered(addr);
            client.events.fire(EventKind::ClientNew, &EventArgs::Client(client));
        }
    }
}

async fn heartbeat_task(client: Arc<Client>) {
    loop {
        let interval = client.heartbeat.lock().interval;
        tokio::select! {
            _ = client.shutdown.notified() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if client.shutting_down.load(Ordering::Acquire) {
            break;
        }

        let missed_enough = client.heartbeat.lock().check_miss();
        if missed_enough {
            client
                .events
                .fire(EventKind::HeartbeatMissed, &EventArgs::None);
            client.stats.incr(StatId::HeartbeatsMissed);
            // Inbound associations are simply torn down (the peer is
            // expected to reconnect to us); outbound ones are torn down
            // too, but `ClientReconnecting` lets `Session` pick the
            // moment to start a fresh `connect()` (spec.md §4.6
            // "Reconnect").
            if client.direction == Direction::Outbound {
                client
                    .events
                    .fire(EventKind::ClientReconnecting, &EventArgs::Client(&client));
            }
            client.shutdown(Duration::from_secs(1)).await;
            break;
        }

        let end_point = match client.end_point() {
            Some(e) => e,
            None => continue,
        };
        let header = Header::new(
            client.local.clone(),
            end_point,
            *Uuid::new_v4().as_bytes(),
            0,
            SequenceFlag::Heartbeat,
        );
        let msg = Message::new(header, Body::Data(gdt_proto::body::Data::default()));
        if client.send(msg).await.is_ok() {
            client.heartbeat.lock().mark_sent();
        }
    }
}
