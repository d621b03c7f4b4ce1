//! Shardline - a resumable, rate-limited multi-shard Discord gateway client
//!
//! - [`shard`]: one gateway connection as a state machine actor
//! - [`manager`]: spawns shards through the session-start governor and
//!   folds their readiness into a client-level status
//! - [`ratelimit`]: the session-start governor and per-shard send limiter
//! - [`nats`] and [`health`]: the relay surface used by the binary

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod nats;
pub mod protocol;
pub mod ratelimit;
pub mod shard;
pub mod timers;
pub mod transport;

pub use bootstrap::{Bootstrap, BootstrapError, GatewayInfo, HttpBootstrap, SessionStartLimit};
pub use error::GatewayError;
pub use events::ClientEvent;
pub use manager::{Manager, ManagerConfig, ManagerHandle, MemberWarmup, ShardSelection};
pub use protocol::{CloseInfo, GatewayFrame, OpCode};
pub use shard::{GatewayState, Status};
pub use transport::{Connector, Transport, WsConnector};
