//! Runtime error taxonomy (spec.md §7) plus the `as_status_code` mapping
//! back onto the legacy integer status space the original daemons logged
//! (`GDT_WAIT_RET_OK` / `...RET_NOTCOMP` / timeouts).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("wire codec error: {0}")]
    Wire(#[from] gdt_proto::Error),

    #[error("sctp protocol error: {0}")]
    Sctp(#[from] sctp::Error),

    #[error("sctp connect failed: {0}")]
    SctpConnect(#[from] sctp::ConnectError),

    #[error("sctp association error: {0}")]
    SctpAssociation(#[from] sctp::AssociationError),

    #[error("sctp read error: {0}")]
    SctpRead(#[from] sctp::ReadError),

    #[error("sctp write error: {0}")]
    SctpWrite(#[from] sctp::WriteError),

    #[error("transport error: {0}")]
    Transport(#[from] util::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{pool} pool exhausted ({capacity} entries in use)")]
    PoolExhausted { pool: &'static str, capacity: usize },

    #[error("stream {0} is not in a state that accepts this operation")]
    InvalidStreamState(uuid::Uuid),

    #[error("no routing entry accepts daemon type {0:?}")]
    NoRoute(String),

    #[error("message exceeded hop limit ({current}/{max})")]
    HopLimit { current: u32, max: u32 },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("client registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("association is shutting down")]
    ShuttingDown,

    #[error("weighted round robin bucket {0:?} has zero weight")]
    ZeroWeightBucket(String),

    #[error("service message parameter exceeds the 768-byte continuation window")]
    ServiceParamTooLarge,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Recovers the single-byte status code the original implementation's
    /// `GDT_CALLBACK` argument carried (`0` == ok, everything else a
    /// specific failure bucket). New variants default to `other` (`255`)
    /// rather than extending this legacy space.
    pub fn as_status_code(&self) -> u8 {
        match self {
            Error::PoolExhausted { .. } => 10,
            Error::Timeout(_) => 100,
            Error::NoRoute(_) => 20,
            Error::HopLimit { .. } => 21,
            Error::InvalidStreamState(_) => 30,
            Error::RegistrationRejected(_) => 40,
            Error::ShuttingDown => 50,
            Error::ZeroWeightBucket(_) => 60,
            Error::ServiceParamTooLarge => 70,
            Error::Wire(_) => 80,
            Error::Sctp(_)
            | Error::SctpConnect(_)
            | Error::SctpAssociation(_)
            | Error::SctpRead(_)
            | Error::SctpWrite(_)
            | Error::Transport(_)
            | Error::Io(_) => 90,
            Error::Other(_) => 255,
        }
    }
}
