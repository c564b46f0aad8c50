//! Generic Data Transport (GDT) runtime: a peer-to-peer, bidirectional
//! RPC/messaging fabric multiplexed over SCTP associations.
//!
//! This crate builds the stateful half of GDT (`Session`/`Client`, the
//! stream engine, routing, the ServiceMessage layer, pools, stats, and
//! heartbeat) on top of [`gdt_proto`]'s sans-io wire codec, the way
//! `webrtc-sctp` builds its tokio runtime on top of `sctp-proto`'s
//! sans-io association state machine.
//!
//! A daemon embedding GDT typically:
//!
//! 1. Parses its CLI surface with [`config::GdtArgs`] (or assembles
//!    [`config::SessionConfig`] directly).
//! 2. Builds an [`events::EventDispatcher`] and registers handlers for
//!    whichever [`events::EventKind`]s it cares about.
//! 3. Constructs a [`session::Session`], calls [`session::Session::listen`]
//!    to accept inbound peers and/or [`session::Session::connect`] to dial
//!    outbound ones.
//! 4. Sends `Message`s or ServiceMessages through the returned
//!    [`client::Client`] handles and reacts to fired events.

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod payload;
pub mod pool;
pub mod routing;
pub mod service_message;
pub mod session;
pub mod stats;
pub mod stream;

pub use client::{Client, ClientId, Direction};
pub use config::{GdtArgs, HeartbeatConfig, PoolConfig, SessionConfig};
pub use correlation::{CallerRef, CorrelationMap};
pub use error::{Error, Result};
pub use events::{EventArgs, EventDispatcher, EventHandler, EventKind};
pub use heartbeat::HeartbeatInfo;
pub use payload::{Payload, StreamType};
pub use pool::{Lease, Pool};
pub use routing::{RoutingAlgo, RoutingTable};
pub use service_message::{ServiceMessage, ServiceMsgManager, ServiceParameter, ServiceParamValue};
pub use session::Session;
pub use stats::{StatId, Stats};
pub use stream::{Initiator, Stream, StreamState, StreamTable};

pub use gdt_proto::{
    Body, DaemonAddress, ErrorCode, Header, HopInfo, Message, Parameter, ParameterId, Parameters,
    SequenceFlag, GDT_VERSION,
};
