//! Sans-io wire format for the Generic Data Transport (GDT) protocol:
//! the restricted-BER TLV codec (C1) and the GDT message schema (C2).
//!
//! This crate has no knowledge of SCTP, tokio, or any transport; it only
//! turns `Message` trees into bytes and back. The runtime (stream engine,
//! client/session, routing, ServiceMessage layer) lives in the `gdt`
//! crate and builds on top of these types.

pub mod address;
pub mod body;
pub mod error;
pub mod header;
pub mod param;
pub mod seqflag;
pub mod errorcode;
pub mod message;
pub mod tlv;

pub use address::DaemonAddress;
pub use body::Body;
pub use error::{Error, Result};
pub use errorcode::ErrorCode;
pub use header::{Header, HopInfo};
pub use message::Message;
pub use param::{ExtraType, Parameter, ParameterId, Parameters};
pub use seqflag::SequenceFlag;

/// Current GDT protocol version (`_GDT_VERSION_` in the original
/// implementation).
pub const GDT_VERSION: u32 = 1;
