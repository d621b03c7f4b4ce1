//! Connection status shared by shards and the manager

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    /// Never connected
    Idle = 0,
    /// Opening a socket for a fresh session
    Connecting = 1,
    /// Opening a socket to resume a saved session
    Reconnecting = 2,
    /// Socket open, HELLO not handled yet (manager: all shards ready, warm-up running)
    Nearly = 3,
    Identifying = 4,
    Resuming = 5,
    /// READY received, guild availability still trickling in
    WaitingForGuilds = 6,
    Ready = 7,
    /// Socket gone; the shard may be connected again
    Disconnected = 8,
    /// Terminal
    Destroyed = 9,
}

impl Status {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Reconnecting,
            3 => Self::Nearly,
            4 => Self::Identifying,
            5 => Self::Resuming,
            6 => Self::WaitingForGuilds,
            7 => Self::Ready,
            8 => Self::Disconnected,
            9 => Self::Destroyed,
            _ => Self::Idle,
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Mid-handshake: a missing heartbeat ack is tolerated here
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            Self::Identifying | Self::Resuming | Self::WaitingForGuilds
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Nearly => "nearly",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::WaitingForGuilds => "waiting_for_guilds",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_round_trip() {
        for raw in 0..=9u8 {
            assert_eq!(Status::from_u8(raw) as u8, raw);
        }
        assert_eq!(Status::from_u8(200), Status::Idle);
    }

    #[test]
    fn handshake_states() {
        assert!(Status::Identifying.is_handshaking());
        assert!(Status::WaitingForGuilds.is_handshaking());
        assert!(!Status::Ready.is_handshaking());
        assert!(!Status::Nearly.is_handshaking());
    }
}
