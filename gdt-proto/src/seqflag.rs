//! Sequence flags carried on the wire (spec.md §4.2, §6 Header field 5).

use crate::error::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SequenceFlag {
    Start = 0,
    Continue = 1,
    End = 2,
    Stateless = 4,
    /// Fire-and-forget stateless datagram: no stream is allocated on
    /// either side and no reply is expected (spec.md §3 "StreamType",
    /// §4.2 "Stateless streams"). Distilled spec.md only names this in
    /// prose; the wire table has a gap at 3/5 for it (SPEC_FULL.md §2).
    StatelessNoReply = 5,
    ContinueWait = 6,
    Heartbeat = 7,
}

impl SequenceFlag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SequenceFlag::Start),
            1 => Ok(SequenceFlag::Continue),
            2 => Ok(SequenceFlag::End),
            4 => Ok(SequenceFlag::Stateless),
            5 => Ok(SequenceFlag::StatelessNoReply),
            6 => Ok(SequenceFlag::ContinueWait),
            7 => Ok(SequenceFlag::Heartbeat),
            other => Err(Error::InvalidEnumValue {
                name: "SequenceFlag",
                value: other as u32,
            }),
        }
    }
}
