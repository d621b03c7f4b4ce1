//! Shard lifecycle
//!
//! Each shard runs as its own task owning one gateway socket. The manager
//! talks to it with [`ShardCommand`]s and hears back through [`ShardEvent`]s;
//! nothing else about a shard is shared except its [`GatewayState`] entry.

mod actor;
mod state;
mod status;

pub use actor::{Shard, ShardContext, ShardHandle, ShardSettings};
pub use state::{GatewayState, ShardSnapshot, ShardStateEntry};
pub use status::Status;

use crate::protocol::{codes, CloseInfo, GatewayFrame};
use crate::ratelimit::Priority;

/// How a shard tears its connection down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Close code sent to the server when a socket is open
    pub close_code: u16,
    /// Discard the session so the next connection identifies fresh
    pub reset: bool,
    /// Report `Destroyed` when there was no open socket to close
    pub emit: bool,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            close_code: codes::NORMAL,
            reset: false,
            emit: true,
        }
    }
}

/// Instructions from the manager
#[derive(Debug)]
pub enum ShardCommand {
    /// Open (or reuse) a connection to the given gateway URL
    Connect { url: String },
    /// Queue an outbound frame behind the send limiter
    Send {
        payload: GatewayFrame,
        priority: Priority,
    },
    Destroy(DestroyOptions),
    /// Tear down and end the task
    Shutdown,
}

/// Notification from a shard task
#[derive(Debug, Clone, PartialEq)]
pub struct ShardEvent {
    pub shard_id: u32,
    pub kind: ShardEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShardEventKind {
    /// READY received; the session is established
    Ready,
    /// Connect requested while already open and ready
    AlreadyReady,
    /// RESUMED received
    Resumed { replayed: i64 },
    /// Guild warm-up finished; `Some` lists guilds that never arrived
    AllReady {
        unavailable_guilds: Option<Vec<String>>,
    },
    /// The socket closed, with the session state as it stands afterwards
    Closed { close: CloseInfo, has_session: bool },
    /// INVALID_SESSION that could not be resumed
    InvalidSession,
    /// Destroyed with no socket to close
    Destroyed,
    Dispatch(GatewayFrame),
    /// Every decoded inbound frame, when the raw tap is on
    Raw(GatewayFrame),
    /// Non-fatal problem: undecodable frame, failed write, failed connect
    Error(String),
}

impl ShardEventKind {
    /// Outcome of a pending connect, if this event settles one
    pub fn connect_outcome(&self) -> Option<bool> {
        match self {
            Self::Ready | Self::AlreadyReady | Self::Resumed { .. } => Some(true),
            Self::Closed { .. } | Self::InvalidSession | Self::Destroyed => Some(false),
            _ => None,
        }
    }
}
