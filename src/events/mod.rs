//! Events surfaced to the external sink
//!
//! [`ClientEvent`] is what a [`Manager`](crate::manager::Manager) reports;
//! [`serialize`] turns dispatches into relay envelopes for the message broker.

pub mod serialize;

pub use serialize::{serialize_dispatch, GatewayEvent};

use crate::protocol::{CloseInfo, GatewayFrame};

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A shard finished its guild warm-up. `Some` lists guilds that never arrived.
    ShardReady {
        shard_id: u32,
        unavailable_guilds: Option<Vec<String>>,
    },
    ShardResumed { shard_id: u32, replayed: i64 },
    /// A shard closed for good and will not be reconnected
    ShardDisconnect { shard_id: u32, close: CloseInfo },
    ShardReconnecting { shard_id: u32 },
    ShardError { shard_id: u32, error: String },
    /// Every shard is ready; emitted once
    Ready,
    /// The token was rejected while reconnecting; the manager has torn down
    Invalidated,
    Dispatch { shard_id: u32, frame: GatewayFrame },
    Raw { shard_id: u32, frame: GatewayFrame },
}

impl ClientEvent {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShardReady { .. } => "shard_ready",
            Self::ShardResumed { .. } => "shard_resumed",
            Self::ShardDisconnect { .. } => "shard_disconnect",
            Self::ShardReconnecting { .. } => "shard_reconnecting",
            Self::ShardError { .. } => "shard_error",
            Self::Ready => "ready",
            Self::Invalidated => "invalidated",
            Self::Dispatch { .. } => "dispatch",
            Self::Raw { .. } => "raw",
        }
    }

    pub fn shard_id(&self) -> Option<u32> {
        match self {
            Self::ShardReady { shard_id, .. }
            | Self::ShardResumed { shard_id, .. }
            | Self::ShardDisconnect { shard_id, .. }
            | Self::ShardReconnecting { shard_id }
            | Self::ShardError { shard_id, .. }
            | Self::Dispatch { shard_id, .. }
            | Self::Raw { shard_id, .. } => Some(*shard_id),
            Self::Ready | Self::Invalidated => None,
        }
    }
}
