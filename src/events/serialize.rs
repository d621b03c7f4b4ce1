//! Event serialization for message broker
//!
//! Converts dispatch frames to JSON envelopes for NATS publishing.

use crate::protocol::{events, GatewayFrame, OpCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generic gateway event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: String,
    pub shard_id: u32,
    pub sequence: Option<i64>,
    pub timestamp: u64,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub data: Value,
}

/// Dotted event type for a dispatch name
///
/// Lifecycle-relevant names get the broker's established labels; anything
/// else is lowercased with `_` turned into `.`.
pub fn event_type(name: &str) -> String {
    match name {
        events::GUILD_CREATE => "guild.join".to_string(),
        events::GUILD_DELETE => "guild.leave".to_string(),
        "GUILD_UPDATE" => "guild.update".to_string(),
        events::GUILD_MEMBER_ADD => "member.join".to_string(),
        events::GUILD_MEMBER_REMOVE => "member.leave".to_string(),
        "GUILD_MEMBER_UPDATE" => "member.update".to_string(),
        "INTERACTION_CREATE" => "interaction.create".to_string(),
        other => other.to_ascii_lowercase().replace('_', "."),
    }
}

/// Wrap a dispatch frame in a relay envelope
///
/// Returns None for frames we don't forward (non-dispatch, session handshake)
pub fn serialize_dispatch(frame: &GatewayFrame, shard_id: u32) -> Option<GatewayEvent> {
    if frame.opcode() != Some(OpCode::Dispatch) {
        return None;
    }
    let name = frame.event_name()?;
    if name == events::READY || name == events::RESUMED {
        return None;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();

    let d = &frame.d;
    let guild_id = string_at(d, &["guild_id"]).or_else(|| {
        if name.starts_with("GUILD_") && !name.starts_with("GUILD_MEMBER") {
            string_at(d, &["id"])
        } else {
            None
        }
    });
    let channel_id = string_at(d, &["channel_id"]);
    let user_id = string_at(d, &["user", "id"])
        .or_else(|| string_at(d, &["author", "id"]))
        .or_else(|| string_at(d, &["member", "user", "id"]))
        .or_else(|| string_at(d, &["user_id"]));

    Some(GatewayEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type: event_type(name),
        shard_id,
        sequence: frame.s,
        timestamp,
        guild_id,
        channel_id,
        user_id,
        data: d.clone(),
    })
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
