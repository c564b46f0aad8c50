//! Session (C6, spec.md §4.6, §4.3 "Session"): the process-wide object
//! every GDT daemon constructs exactly one of. Holds the local
//! `DaemonAddress`, the set of `Client`s (inbound and outbound), the
//! routing table, and (if listening) the SCTP acceptor task.
//!
//! `Session` is deliberately thin: almost everything it does is spawn a
//! task and hand off to `Client::spawn` (C6's per-association state
//! machine) or `RoutingTable` (C7). The accept/connect/reconnect dance
//! below mirrors `sctp/examples/{ping,pong}.rs`'s use of
//! `webrtc_sctp::Endpoint`, generalized from "one association, one
//! stream" to "one association, `streams_per_association` eagerly
//! negotiated streams" per spec.md §6.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gdt_proto::{Body, DaemonAddress, Header, Message, SequenceFlag};
use parking_lot::Mutex as PLMutex;
use sctp::{ClientConfig, Endpoint, PayloadProtocolIdentifier, RecvStream, SendStream, ServerConfig};
use tokio::sync::watch;

use crate::client::{Client, ClientId, Direction};
use crate::config::{HeartbeatConfig, PoolConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::events::{EventArgs, EventDispatcher, EventKind};
use crate::routing::{RoutingAlgo, RoutingTable};
use crate::stats::{StatId, Stats};

/// GDT's fixed SCTP payload protocol id (spec.md §6 "payload protocol id
/// is set to a fixed value identifying GDT"). `webrtc_sctp`'s
/// `PayloadProtocolIdentifier` only enumerates the IANA-registered WebRTC
/// data-channel ids; `Binary` is the closest stand-in for "opaque
/// application bytes" (recorded as an open item in DESIGN.md).
pub const GDT_PAYLOAD_PROTOCOL_ID: PayloadProtocolIdentifier = PayloadProtocolIdentifier::Binary;

/// How long an inbound association has to complete the registration
/// handshake before the registration-wait sweeper tears it down
/// (spec.md §4.6 "Accept side").
const DEFAULT_REGISTRATION_WAIT: Duration = Duration::from_secs(5);

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Process-wide GDT context (spec.md §3 "Session"). Always held as
/// `Arc<Session>` so background tasks (acceptor, reconnect supervisors)
/// can outlive the call that spawned them.
pub struct Session {
    config: SessionConfig,
    heartbeat_config: HeartbeatConfig,
    pool_config: PoolConfig,
    stream_timeout: Duration,
    registration_wait: Duration,
    stats: Arc<Stats>,
    events: Arc<EventDispatcher>,
    clients: PLMutex<HashMap<ClientId, Arc<Client>>>,
    routing: PLMutex<RoutingTable>,
    endpoint: PLMutex<Option<Endpoint>>,
    stopping: AtomicBool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        heartbeat_config: HeartbeatConfig,
        pool_config: PoolConfig,
        stream_timeout: Duration,
        events: Arc<EventDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Session {
            config,
            heartbeat_config,
            pool_config,
            stream_timeout,
            registration_wait: DEFAULT_REGISTRATION_WAIT,
            stats: Arc::new(Stats::new()),
            events,
            clients: PLMutex::new(HashMap::new()),
            routing: PLMutex::new(RoutingTable::new(RoutingAlgo::Wrr)),
            endpoint: PLMutex::new(None),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn local_address(&self) -> Result<DaemonAddress> {
        DaemonAddress::new(self.config.daemon_type.clone(), self.config.daemon_id.clone())
            .map_err(Error::Wire)
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn client(&self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.lock().get(&id).cloned()
    }

    pub fn registered_clients(&self) -> Vec<Arc<Client>> {
        self.clients.lock().values().cloned().collect()
    }

    /// Registers `client` as a router-capable candidate for
    /// `destination_type` with the given WRR weight (spec.md §4.4).
    pub fn register_route(&self, destination_type: &str, client: ClientId, weight: u32) -> Result<()> {
        self.routing.lock().register(destination_type, client, weight)
    }

    pub fn unregister_route(&self, destination_type: &str, client: ClientId) {
        self.routing.lock().unregister(destination_type, client);
    }

    /// Forwards `msg` on behalf of `caller` (spec.md §4.4 "Forwarding"):
    /// bumps the hop count, re-resolves the destination Client via the
    /// routing table, and re-encodes onto the winner's outbound queue.
    /// Loop prevention excludes `caller` from candidacy; the hop bound is
    /// enforced by the caller via `Stream::bump_hop` before this is
    /// called.
    pub async fn forward(&self, mut msg: Message, caller: ClientId) -> Result<()> {
        let destination_type = msg.header.destination.daemon_type.clone();
        let target_id = self.routing.lock().route(&destination_type, caller)?;
        let target = self
            .client(target_id)
            .ok_or_else(|| Error::NoRoute(destination_type.clone()))?;
        if let Some(hop) = msg.header.hop_info.as_mut() {
            hop.current_hop += 1;
        }
        target.send(msg).await
    }

    // ---- Accept side (spec.md §4.6 "Accept side") -----------------------

    /// Binds the SCTP listener and spawns the acceptor loop. Returns the
    /// bound local address once the socket is live.
    pub async fn listen(self: &Arc<Self>) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .config
            .local_addr
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, self.config.port);
        let (endpoint, incoming) = Endpoint::server(ServerConfig::new(), addr).map_err(Error::Io)?;
        let local_addr = endpoint.local_addr().map_err(Error::Io)?;
        *self.endpoint.lock() = Some(endpoint);

        let session = self.clone();
        tokio::spawn(async move {
            session.accept_loop(incoming).await;
        });
        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, mut incoming: sctp::Incoming) {
        while let Some(connecting) = incoming.next().await {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            let session = self.clone();
            tokio::spawn(async move {
                if let Err(e) = session.accept_one(connecting).await {
                    log::warn!("session: inbound association failed: {e}");
                }
            });
        }
    }

    async fn accept_one(self: Arc<Self>, connecting: sctp::Connecting) -> Result<()> {
        let new_assoc = connecting.await.map_err(Error::SctpAssociation)?;
        let peer_addr = new_assoc.association.remote_addr();
        let streams = self.config.streams_per_association as usize;
        let (send_streams, recv_streams) =
            negotiate_streams(&new_assoc.association, new_assoc.incoming_streams, streams).await?;

        let client = Client::spawn(
            Direction::Inbound,
            peer_addr,
            self.local_address()?,
            new_assoc.association,
            send_streams,
            recv_streams,
            self.stats.clone(),
            self.events.clone(),
            self.heartbeat_config,
            self.stream_timeout,
            self.pool_config,
            Arc::downgrade(&self),
        );
        self.clients.lock().insert(client.id, client.clone());

        let session = self.clone();
        let watched = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(session.registration_wait).await;
            if !watched.is_registered() {
                log::debug!(
                    "session: client {:?} did not register within {:?}, tearing down",
                    watched.id,
                    session.registration_wait
                );
                watched.shutdown(Duration::from_secs(1)).await;
                session.clients.lock().remove(&watched.id);
            }
        });
        Ok(())
    }

    /// `Session.stop_server()` (spec.md §4.6 "Shutdown"): stops the
    /// acceptor and shuts every live `Client` down, giving each
    /// `drain_deadline` to flush its outbound queue.
    pub async fn stop_server(&self, drain_deadline: Duration) {
        self.stopping.store(true, Ordering::Release);
        if let Some(endpoint) = self.endpoint.lock().take() {
            endpoint.close(0u16.into(), b"stop_server");
        }
        let clients: Vec<Arc<Client>> = self.clients.lock().drain().map(|(_, c)| c).collect();
        for client in clients {
            client.shutdown(drain_deadline).await;
        }
    }

    // ---- Connect side (spec.md §4.6 "Connect side") ---------------------

    /// `Session.connect(ip, port, streams, local?, port?, skip_gdt_reg?)`.
    /// Opens the association (retrying transient connect errors per
    /// spec.md §4.6), builds an `OUTBOUND` `Client`, sends the
    /// registration handshake unless `skip_gdt_reg`, and — once
    /// registered — starts a reconnect supervisor that re-dials on
    /// association loss.
    pub async fn connect(
        self: &Arc<Self>,
        remote: SocketAddr,
        streams: u16,
        skip_gdt_reg: bool,
    ) -> Result<Arc<Client>> {
        let client = self.dial(remote, streams).await?;
        self.clients.lock().insert(client.id, client.clone());
        if !skip_gdt_reg {
            client.send_registration(&self.config).await?;
        }

        let session = self.clone();
        let alive = client.subscribe_alive();
        tokio::spawn(session.reconnect_supervisor(client.id, alive, remote, streams, skip_gdt_reg));

        Ok(client)
    }

    async fn dial(self: &Arc<Self>, remote: SocketAddr, streams: u16) -> Result<Arc<Client>> {
        let local: SocketAddr = self
            .config
            .local_addr
            .map(|ip| SocketAddr::new(IpAddr::V4(ip), 0))
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
        let mut endpoint = Endpoint::client(local).map_err(Error::Io)?;
        endpoint.set_default_client_config(ClientConfig::new());

        let new_assoc = endpoint
            .connect(remote)
            .map_err(Error::SctpConnect)?
            .await
            .map_err(Error::SctpAssociation)?;

        let (send_streams, recv_streams) =
            negotiate_streams(&new_assoc.association, new_assoc.incoming_streams, streams as usize).await?;

        Ok(Client::spawn(
            Direction::Outbound,
            remote,
            self.local_address()?,
            new_assoc.association,
            send_streams,
            recv_streams,
            self.stats.clone(),
            self.events.clone(),
            self.heartbeat_config,
            self.stream_timeout,
            self.pool_config,
            Arc::downgrade(self),
        ))
    }

    /// Watches one outbound `Client`'s `alive` channel; on association
    /// loss, removes the stale entry and redials with exponential backoff
    /// (spec.md §4.6 "Reconnect": "existing streams are timed out; state
    /// is reset; registration handshake reruns" — a fresh `Client` with
    /// an empty stream table accomplishes the same thing as resetting one
    /// in place).
    async fn reconnect_supervisor(
        self: Arc<Self>,
        old_id: ClientId,
        mut alive: watch::Receiver<bool>,
        remote: SocketAddr,
        streams: u16,
        skip_gdt_reg: bool,
    ) {
        if alive.changed().await.is_err() || *alive.borrow() {
            // Channel dropped without ever signalling loss, or somehow
            // signalled `true`: nothing to reconnect.
            return;
        }
        self.clients.lock().remove(&old_id);
        if self.stopping.load(Ordering::Acquire) {
            return;
        }

        let mut backoff = RECONNECT_BACKOFF_INITIAL;
        loop {
            tokio::time::sleep(backoff).await;
            if self.stopping.load(Ordering::Acquire) {
                return;
            }
            match self.dial(remote, streams).await {
                Ok(client) => {
                    self.clients.lock().insert(client.id, client.clone());
                    if !skip_gdt_reg {
                        if let Err(e) = client.send_registration(&self.config).await {
                            log::warn!("session: reconnect registration to {remote} failed: {e}");
                            self.clients.lock().remove(&client.id);
                            backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                            continue;
                        }
                    }
                    self.events
                        .fire(EventKind::ClientReconnected, &EventArgs::Client(&client));
                    let alive = client.subscribe_alive();
                    tokio::spawn(self.clone().reconnect_supervisor(
                        client.id,
                        alive,
                        remote,
                        streams,
                        skip_gdt_reg,
                    ));
                    return;
                }
                Err(e) => {
                    log::debug!("session: reconnect to {remote} failed: {e}, retrying in {backoff:?}");
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                }
            }
        }
    }

    /// Builds and sends a `Body::Stats` response carrying every counter in
    /// `self.stats` (spec.md §4.5, §6 "STATS_ID/STATS_VALUE pairs") —
    /// the responder half of "a remote stats-get request" (C9).
    pub async fn respond_to_stats_request(&self, client: &Arc<Client>, reply_to: &Message) -> Result<()> {
        let header = Header::new(
            reply_to.header.destination.clone(),
            reply_to.header.source.clone(),
            reply_to.header.uuid,
            reply_to.header.sequence_num,
            SequenceFlag::End,
        );
        let body = Body::Stats(gdt_proto::body::Stats {
            action: 1,
            params: self.stats.to_parameters(),
        });
        client.send(Message::new(header, body)).await
    }
}

/// Opens `count` outbound streams and harvests `count` peer-initiated
/// streams, matching the "both peers know the count from their own
/// `--gdt-streams` flag" static negotiation `client.rs` documents.
async fn negotiate_streams(
    association: &sctp::Association,
    mut incoming_streams: sctp::IncomingStreams,
    count: usize,
) -> Result<(Vec<SendStream>, Vec<RecvStream>)> {
    let mut send_streams = Vec::with_capacity(count);
    for i in 0..count {
        let (tx, _unused_rx) = association
            .open_stream(i as u16, GDT_PAYLOAD_PROTOCOL_ID)
            .await
            .map_err(Error::SctpAssociation)?;
        send_streams.push(tx);
    }

    let mut recv_streams = Vec::with_capacity(count);
    for _ in 0..count {
        match incoming_streams.next().await {
            Some(Ok((_tx, rx))) => recv_streams.push(rx),
            Some(Err(e)) => return Err(Error::SctpAssociation(e)),
            None => {
                return Err(Error::Other(
                    "association closed before streams_per_association streams were negotiated".into(),
                ))
            }
        }
    }

    Ok((send_streams, recv_streams))
}

#[cfg(test)]
mod session_test {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            daemon_id: "a1".into(),
            daemon_type: "agent".into(),
            local_addr: None,
            port: 0,
            streams_per_association: 4,
        }
    }

    fn new_session() -> Arc<Session> {
        Session::new(
            config(),
            HeartbeatConfig::default(),
            PoolConfig {
                smsg_pool: 4,
                sparam_pool: 16,
            },
            Duration::from_secs(5),
            Arc::new(EventDispatcher::new()),
        )
    }

    #[test]
    fn local_address_reflects_config() {
        let session = new_session();
        let addr = session.local_address().unwrap();
        assert_eq!(addr.daemon_type, "agent");
        assert_eq!(addr.daemon_id, "a1");
    }

    #[test]
    fn register_route_rejects_zero_weight() {
        let session = new_session();
        let err = session
            .register_route("sysagent", ClientId::next(), 0)
            .unwrap_err();
        assert!(matches!(err, Error::ZeroWeightBucket(_)));
    }

    #[test]
    fn client_lookup_starts_empty() {
        let session = new_session();
        assert!(session.registered_clients().is_empty());
    }
}
