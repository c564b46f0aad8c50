use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures from the TLV codec (C1) and message schema (C2).
///
/// Mirrors the failure modes spec.md §4.1 names for the decode contract:
/// truncation, unknown-mandatory-tag and malformed child ordering.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("TLV length {length} exceeds remaining buffer of {remaining} bytes")]
    Truncated { length: usize, remaining: usize },

    #[error("unknown mandatory tag {tag} in context {context}")]
    UnknownMandatoryTag { tag: u32, context: &'static str },

    #[error("unexpected tag {tag} (wanted {wanted}) in context {context}")]
    UnexpectedTag {
        tag: u32,
        wanted: u32,
        context: &'static str,
    },

    #[error("length field uses reserved indefinite form")]
    IndefiniteLength,

    #[error("DaemonAddress field exceeds 15 bytes")]
    DaemonAddressTooLong,

    #[error("uuid field must be exactly 16 bytes, got {0}")]
    InvalidUuidLength(usize),

    #[error("invalid UTF-8 in IA5String field")]
    InvalidUtf8,

    #[error("unknown enum value {value} for {name}")]
    InvalidEnumValue { name: &'static str, value: u32 },

    #[error("missing mandatory field {0} in Header")]
    MissingHeaderField(&'static str),

    #[error("unknown Body variant tag {0}")]
    UnknownBodyVariant(u32),

    #[error("message tree too deep (possible malformed nesting)")]
    TooDeeplyNested,
}
