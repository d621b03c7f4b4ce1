//! Manager and shard configuration

use crate::error::GatewayError;
use crate::protocol::{CloseCodeTable, ConnectionProperties, IdentifyPayload};
use crate::ratelimit::SendBudget;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use twilight_model::gateway::Intents;

/// Which shards this manager runs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShardSelection {
    /// As many as the bootstrap recommends
    #[default]
    Auto,
    /// Shards `0..n`
    Count(u32),
    /// An explicit subset; `total` defaults to the number of ids
    Ids { ids: Vec<u32>, total: Option<u32> },
}

impl ShardSelection {
    /// Resolve to `(ids, total_shards)`
    pub fn resolve(&self, recommended: u32) -> Result<(Vec<u32>, u32), GatewayError> {
        match self {
            Self::Auto => {
                let total = recommended.max(1);
                Ok(((0..total).collect(), total))
            }
            Self::Count(0) => Err(GatewayError::Config(
                "shard count must be at least 1".to_string(),
            )),
            Self::Count(n) => Ok(((0..*n).collect(), *n)),
            Self::Ids { ids, total } => {
                let unique: BTreeSet<u32> = ids.iter().copied().collect();
                if unique.is_empty() {
                    return Err(GatewayError::Config("shard id list is empty".to_string()));
                }
                let total = total.unwrap_or(unique.len() as u32);
                if let Some(&out_of_range) = unique.iter().find(|&&id| id >= total) {
                    return Err(GatewayError::Config(format!(
                        "shard id {out_of_range} is not below the shard count {total}"
                    )));
                }
                Ok((unique.into_iter().collect(), total))
            }
        }
    }
}

/// Everything that goes into IDENTIFY and the connection URL
#[derive(Debug, Clone)]
pub struct IdentifySettings {
    pub version: u8,
    pub encoding: String,
    pub compress: bool,
    pub intents: Intents,
    pub large_threshold: Option<u32>,
    pub presence: Option<Value>,
    pub properties: ConnectionProperties,
}

impl Default for IdentifySettings {
    fn default() -> Self {
        Self {
            version: 10,
            encoding: "json".to_string(),
            compress: false,
            intents: Intents::GUILDS | Intents::GUILD_MEMBERS,
            large_threshold: None,
            presence: None,
            properties: ConnectionProperties::default(),
        }
    }
}

impl IdentifySettings {
    pub fn payload(&self, token: &str, shard_id: u32, total_shards: u32) -> IdentifyPayload {
        IdentifyPayload {
            token: token.to_string(),
            properties: self.properties.clone(),
            shard: [shard_id, total_shards],
            large_threshold: self.large_threshold,
            presence: self.presence.clone(),
            intents: Some(self.intents.bits()),
        }
    }
}

/// Protocol and orchestration timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// HELLO must arrive this soon after a connect
    pub hello_timeout: Duration,
    /// Grace period for guild availability after READY
    pub ready_timeout: Duration,
    /// Pause between consecutive shard spawns
    pub spawn_delay: Duration,
    /// Retry delay after a failed manager-level reconnect
    pub reconnect_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            hello_timeout: Duration::from_secs(20),
            ready_timeout: Duration::from_secs(15),
            spawn_delay: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct ManagerConfig {
    pub token: String,
    pub shards: ShardSelection,
    pub identify: IdentifySettings,
    /// Run the member warm-up before reporting ready
    pub fetch_all_members: bool,
    pub close_codes: CloseCodeTable,
    pub timings: Timings,
    pub send_budget: SendBudget,
    /// Surface every decoded inbound frame as `ClientEvent::Raw`
    pub raw_frames: bool,
}

impl ManagerConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            shards: ShardSelection::default(),
            identify: IdentifySettings::default(),
            fetch_all_members: false,
            close_codes: CloseCodeTable::default(),
            timings: Timings::default(),
            send_budget: SendBudget::default(),
            raw_frames: false,
        }
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("token", &"<redacted>")
            .field("shards", &self.shards)
            .field("identify", &self.identify)
            .field("fetch_all_members", &self.fetch_all_members)
            .field("close_codes", &self.close_codes)
            .field("timings", &self.timings)
            .field("send_budget", &self.send_budget)
            .field("raw_frames", &self.raw_frames)
            .finish()
    }
}
