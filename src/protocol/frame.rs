//! Gateway wire frames
//!
//! Every message on the socket is a JSON object `{ op, d, s, t }`. Inbound
//! frames keep the raw op so unknown codes still decode; the state machine
//! only acts on [`OpCode`] values.

use super::OpCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dispatch event names the core needs to recognise
pub mod events {
    pub const READY: &str = "READY";
    pub const RESUMED: &str = "RESUMED";
    pub const GUILD_CREATE: &str = "GUILD_CREATE";
    pub const GUILD_DELETE: &str = "GUILD_DELETE";
    pub const GUILD_MEMBER_ADD: &str = "GUILD_MEMBER_ADD";
    pub const GUILD_MEMBER_REMOVE: &str = "GUILD_MEMBER_REMOVE";
    pub const GUILD_MEMBERS_CHUNK: &str = "GUILD_MEMBERS_CHUNK";
}

/// A single gateway frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op.as_u8(),
            d,
            s: None,
            t: None,
        }
    }

    /// Build a dispatch frame, as the server would send it
    pub fn dispatch(event: impl Into<String>, sequence: i64, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch.as_u8(),
            d,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    /// Heartbeat carrying the last seen sequence, `null` before the first dispatch
    pub fn heartbeat(sequence: i64) -> Self {
        let d = if sequence < 0 {
            Value::Null
        } else {
            Value::from(sequence)
        };
        Self::new(OpCode::Heartbeat, d)
    }

    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(payload)?))
    }

    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(payload)?))
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }

    pub fn is_event(&self, name: &str) -> bool {
        self.t.as_deref() == Some(name)
    }

    /// `id` field of the payload, used by guild availability frames
    pub fn payload_id(&self) -> Option<&str> {
        self.d.get("id").and_then(Value::as_str)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `d` of a HELLO frame
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Client connection properties sent with IDENTIFY
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// `d` of an IDENTIFY frame
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: ConnectionProperties,
    pub shard: [u32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intents: Option<u64>,
}

/// `d` of a RESUME frame
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: i64,
}

/// The parts of a READY dispatch the shard keeps
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_dispatch() {
        let frame = GatewayFrame::decode(
            r#"{"op":0,"d":{"id":"42"},"s":7,"t":"GUILD_CREATE"}"#,
        )
        .unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Dispatch));
        assert_eq!(frame.s, Some(7));
        assert!(frame.is_event(events::GUILD_CREATE));
        assert_eq!(frame.payload_id(), Some("42"));
    }

    #[test]
    fn decodes_null_sequence_and_type() {
        let frame =
            GatewayFrame::decode(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#)
                .unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Hello));
        assert_eq!(frame.s, None);
        let hello: HelloPayload = serde_json::from_value(frame.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn unknown_op_still_decodes() {
        let frame = GatewayFrame::decode(r#"{"op":99,"d":null}"#).unwrap();
        assert_eq!(frame.opcode(), None);
    }

    #[test]
    fn heartbeat_before_first_dispatch_is_null() {
        assert_eq!(GatewayFrame::heartbeat(-1).d, Value::Null);
        assert_eq!(GatewayFrame::heartbeat(12).d, json!(12));
    }

    #[test]
    fn outbound_frames_omit_sequence_and_type() {
        let encoded = GatewayFrame::heartbeat(3).encode().unwrap();
        assert_eq!(encoded, r#"{"op":1,"d":3}"#);
    }

    #[test]
    fn identify_skips_unset_options() {
        let payload = IdentifyPayload {
            token: "t".into(),
            properties: ConnectionProperties::default(),
            shard: [1, 4],
            large_threshold: None,
            presence: None,
            intents: Some(513),
        };
        let frame = GatewayFrame::identify(&payload).unwrap();
        assert_eq!(frame.d["shard"], json!([1, 4]));
        assert_eq!(frame.d["intents"], json!(513));
        assert!(frame.d.get("presence").is_none());
        assert!(frame.d.get("large_threshold").is_none());
    }

    #[test]
    fn resume_carries_session_and_sequence() {
        let payload = ResumePayload {
            token: "t".into(),
            session_id: "abc".into(),
            seq: 42,
        };
        let frame = GatewayFrame::resume(&payload).unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Resume));
        assert_eq!(frame.d, json!({ "token": "t", "session_id": "abc", "seq": 42 }));
    }
}
