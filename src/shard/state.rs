//! Observable shard state
//!
//! Shards own their protocol state; this registry is the read-only mirror
//! that the manager, the health endpoints and the control handle consult.
//! Each shard writes only its own entry, the manager writes only the
//! client-level fields.

use crate::shard::Status;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// State for a single shard
#[derive(Debug)]
pub struct ShardStateEntry {
    pub status: Status,
    pub sequence: i64,
    pub has_session: bool,
    pub ping: Option<Duration>,
    pub pending_guilds: usize,
    pub events_received: AtomicU64,
}

impl Default for ShardStateEntry {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            sequence: -1,
            has_session: false,
            ping: None,
            pending_guilds: 0,
            events_received: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of one shard's entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSnapshot {
    pub status: Status,
    pub sequence: i64,
    pub has_session: bool,
    pub ping: Option<Duration>,
    pub pending_guilds: usize,
    pub events_received: u64,
}

/// Shared state across all shards of a manager
#[derive(Debug, Clone)]
pub struct GatewayState {
    inner: Arc<GatewayStateInner>,
}

#[derive(Debug)]
struct GatewayStateInner {
    shards: DashMap<u32, ShardStateEntry>,
    total_shards: AtomicU64,
    client_status: AtomicU8,
    ready_at: Mutex<Option<SystemTime>>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GatewayStateInner {
                shards: DashMap::new(),
                total_shards: AtomicU64::new(0),
                client_status: AtomicU8::new(Status::Idle as u8),
                ready_at: Mutex::new(None),
            }),
        }
    }

    /// Register the shard set once the manager has computed it
    pub fn register(&self, shard_ids: impl IntoIterator<Item = u32>, total_shards: u32) {
        for shard_id in shard_ids {
            self.inner.shards.entry(shard_id).or_default();
        }
        self.inner
            .total_shards
            .store(u64::from(total_shards), Ordering::Relaxed);
    }

    /// Shard count sent in IDENTIFY
    pub fn total_shards(&self) -> u64 {
        self.inner.total_shards.load(Ordering::Relaxed)
    }

    pub fn set_status(&self, shard_id: u32, status: Status) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.status = status;
        }
    }

    pub fn set_session(&self, shard_id: u32, sequence: i64, has_session: bool) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.sequence = sequence;
            entry.has_session = has_session;
        }
    }

    pub fn set_pending_guilds(&self, shard_id: u32, pending: usize) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.pending_guilds = pending;
        }
    }

    pub fn record_event(&self, shard_id: u32) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.events_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_heartbeat_ack(&self, shard_id: u32, ping: Duration) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.ping = Some(ping);
        }
    }

    pub fn status(&self, shard_id: u32) -> Option<Status> {
        self.inner.shards.get(&shard_id).map(|e| e.status)
    }

    pub fn snapshot(&self, shard_id: u32) -> Option<ShardSnapshot> {
        self.inner.shards.get(&shard_id).map(|e| ShardSnapshot {
            status: e.status,
            sequence: e.sequence,
            has_session: e.has_session,
            ping: e.ping,
            pending_guilds: e.pending_guilds,
            events_received: e.events_received.load(Ordering::Relaxed),
        })
    }

    pub fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.inner.shards.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Get count of ready shards
    pub fn ready_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.status.is_ready())
            .count()
    }

    /// Get total shard count handled by this manager
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Every registered shard is individually ready
    pub fn all_shards_ready(&self) -> bool {
        self.shard_count() > 0 && self.ready_shards() == self.shard_count()
    }

    /// Mean heartbeat round-trip over shards that have measured one
    pub fn average_ping(&self) -> Option<Duration> {
        let pings: Vec<Duration> = self.inner.shards.iter().filter_map(|e| e.ping).collect();
        if pings.is_empty() {
            return None;
        }
        Some(pings.iter().sum::<Duration>() / pings.len() as u32)
    }

    pub fn total_events_received(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_received.load(Ordering::Relaxed))
            .sum()
    }

    pub fn client_status(&self) -> Status {
        Status::from_u8(self.inner.client_status.load(Ordering::SeqCst))
    }

    pub fn set_client_status(&self, status: Status) {
        self.inner
            .client_status
            .store(status as u8, Ordering::SeqCst);
        if status.is_ready() {
            if let Ok(mut ready_at) = self.inner.ready_at.lock() {
                *ready_at = Some(SystemTime::now());
            }
        }
    }

    pub fn ready_at(&self) -> Option<SystemTime> {
        self.inner.ready_at.lock().ok().and_then(|r| *r)
    }

    /// Check if the client as a whole is ready
    pub fn is_ready(&self) -> bool {
        self.client_status().is_ready()
    }
}
