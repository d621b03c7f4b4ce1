//! Gateway operation codes

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Operation codes understood by the shard state machine.
///
/// The set is closed: frames carrying any other op are logged and dropped
/// before they reach the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server → client event dispatch
    Dispatch = 0,
    /// Heartbeat, sent by the client on its timer or requested by the server
    Heartbeat = 1,
    /// Start a new session
    Identify = 2,
    /// Update the client's presence
    PresenceUpdate = 3,
    /// Join, move or leave a voice channel
    VoiceStateUpdate = 4,
    /// Reattach to an existing session
    Resume = 6,
    /// Server asks the client to reconnect
    Reconnect = 7,
    /// Request offline guild members
    RequestGuildMembers = 8,
    /// Session was invalidated; payload says whether it can be resumed
    InvalidSession = 9,
    /// First frame after the socket opens, carries the heartbeat interval
    Hello = 10,
    /// Acknowledges a heartbeat
    HeartbeatAck = 11,
}

impl OpCode {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Frames the client must get out ahead of queued bulk traffic.
    pub const fn is_priority(self) -> bool {
        matches!(self, Self::Heartbeat | Self::Identify | Self::Resume)
    }

    /// Metrics label
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Heartbeat => "heartbeat",
            Self::Identify => "identify",
            Self::PresenceUpdate => "presence_update",
            Self::VoiceStateUpdate => "voice_state_update",
            Self::Resume => "resume",
            Self::Reconnect => "reconnect",
            Self::RequestGuildMembers => "request_guild_members",
            Self::InvalidSession => "invalid_session",
            Self::Hello => "hello",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown op code: {value}")))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}
