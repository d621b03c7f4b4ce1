//! Pre-ready packet queue
//!
//! Dispatches that arrive before the client is ready are held back, except
//! the handful needed to build initial state. Once ready, the backlog drains
//! one frame per scheduler turn, and new frames queue behind it so each
//! shard's dispatches still reach the sink in order.

use crate::protocol::{events, GatewayFrame};
use std::collections::VecDeque;

/// Dispatches forwarded even while the client is not ready
pub const BEFORE_READY_ALLOWED: [&str; 7] = [
    events::READY,
    events::RESUMED,
    events::GUILD_CREATE,
    events::GUILD_DELETE,
    events::GUILD_MEMBERS_CHUNK,
    events::GUILD_MEMBER_ADD,
    events::GUILD_MEMBER_REMOVE,
];

#[derive(Debug, Default)]
pub struct PacketQueue {
    queue: VecDeque<(u32, GatewayFrame)>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a dispatch. Returns it back if it may be forwarded right away.
    pub fn accept(
        &mut self,
        shard_id: u32,
        frame: GatewayFrame,
        client_ready: bool,
    ) -> Option<(u32, GatewayFrame)> {
        let allowed = frame
            .event_name()
            .is_some_and(|name| BEFORE_READY_ALLOWED.iter().any(|allowed| *allowed == name));

        if client_ready {
            if self.queue.is_empty() {
                return Some((shard_id, frame));
            }
        } else if allowed {
            return Some((shard_id, frame));
        }

        self.queue.push_back((shard_id, frame));
        None
    }

    /// Next held frame, once the client is ready
    pub fn pop(&mut self, client_ready: bool) -> Option<(u32, GatewayFrame)> {
        if client_ready {
            self.queue.pop_front()
        } else {
            None
        }
    }

    pub fn has_backlog(&self, client_ready: bool) -> bool {
        client_ready && !self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
