//! Domain error types for the gateway client
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, GatewayError> or one of the narrower
//! collaborator errors ([`BootstrapError`], [`TransportError`]).
//!
//! [`BootstrapError`]: crate::bootstrap::BootstrapError
//! [`TransportError`]: crate::transport::TransportError

use crate::bootstrap::BootstrapError;
use crate::protocol::{codes, CloseInfo};
use thiserror::Error;

/// Gateway domain errors
///
/// Every variant carries structured context fields for diagnostics, so
/// callers can match on the failure mode instead of parsing messages.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The bootstrap call or a shard close rejected the token
    #[error("gateway rejected the token")]
    InvalidToken,

    /// A shard closed with a code that must not be retried
    #[error("shard {shard_id} closed with unrecoverable code {close}")]
    Unrecoverable { shard_id: u32, close: CloseInfo },

    /// Gateway bootstrap failed for a reason other than authentication
    #[error("gateway bootstrap failed")]
    Bootstrap(#[source] BootstrapError),

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Prometheus recorder could not be installed
    #[error("metrics recorder: {0}")]
    Metrics(String),

    /// NATS publish failed for a specific subject
    #[error("NATS publish failed for subject '{subject}'")]
    NatsPublishFailed {
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Envelope serialization failed
    #[error("event serialization failed for {event_type} on shard {shard_id}")]
    SerializationFailed {
        event_type: String,
        shard_id: u32,
        #[source]
        source: serde_json::Error,
    },

    /// A control call named a shard this manager does not own
    #[error("shard {shard_id} is not managed by this client")]
    ShardUnknown { shard_id: u32 },

    /// The manager task has finished; control calls can no longer be delivered
    #[error("manager is no longer running")]
    ManagerClosed,
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `gateway_errors_total`.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::Unrecoverable { .. } => "unrecoverable_close",
            Self::Bootstrap(_) => "bootstrap",
            Self::Config(_) => "config",
            Self::Metrics(_) => "metrics",
            Self::NatsPublishFailed { .. } => "nats_publish",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::SerializationFailed { .. } => "serialization",
            Self::ShardUnknown { .. } => "shard_unknown",
            Self::ManagerClosed => "manager_closed",
        }
    }

    /// Error for a shard that closed with an unrecoverable code
    pub fn from_close(shard_id: u32, close: CloseInfo) -> Self {
        if close.code == codes::AUTHENTICATION_FAILED {
            Self::InvalidToken
        } else {
            Self::Unrecoverable { shard_id, close }
        }
    }

    /// Whether the failure is an authentication problem that no retry can fix
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidToken)
    }
}

impl From<BootstrapError> for GatewayError {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::Unauthorized => Self::InvalidToken,
            other => Self::Bootstrap(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_error() -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, "test"))
    }

    #[test]
    fn every_variant_has_distinct_error_type_label() {
        let labels = [
            GatewayError::InvalidToken.error_type_label(),
            GatewayError::Unrecoverable {
                shard_id: 0,
                close: CloseInfo::new(4004, ""),
            }
            .error_type_label(),
            GatewayError::Bootstrap(BootstrapError::Request(test_error())).error_type_label(),
            GatewayError::Config("test".to_string()).error_type_label(),
            GatewayError::Metrics("test".to_string()).error_type_label(),
            GatewayError::NatsPublishFailed {
                subject: "test".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            GatewayError::NatsConnectionFailed(test_error()).error_type_label(),
            GatewayError::SerializationFailed {
                event_type: "test".to_string(),
                shard_id: 0,
                source: serde_json::from_str::<()>("invalid").unwrap_err(),
            }
            .error_type_label(),
            GatewayError::ShardUnknown { shard_id: 9 }.error_type_label(),
            GatewayError::ManagerClosed.error_type_label(),
        ];

        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len(), "Duplicate error_type_label found");
    }

    #[test]
    fn unauthorized_bootstrap_becomes_invalid_token() {
        let err: GatewayError = BootstrapError::Unauthorized.into();
        assert!(err.is_auth());

        let err: GatewayError = BootstrapError::Request(test_error()).into();
        assert!(!err.is_auth());
        assert_eq!(err.error_type_label(), "bootstrap");
    }

    #[test]
    fn rejected_token_close_is_an_auth_failure() {
        assert!(GatewayError::from_close(0, CloseInfo::new(4004, "")).is_auth());

        let err = GatewayError::from_close(2, CloseInfo::new(4014, "disallowed intents"));
        assert!(!err.is_auth());
        assert!(matches!(err, GatewayError::Unrecoverable { shard_id: 2, .. }));
    }

    #[test]
    fn error_messages_contain_context() {
        let err = GatewayError::Unrecoverable {
            shard_id: 3,
            close: CloseInfo::new(4014, ""),
        };
        let msg = err.to_string();
        assert!(msg.contains("shard 3"), "message should contain shard_id");
        assert!(msg.contains("4014"), "message should contain the close code");

        let err = GatewayError::NatsPublishFailed {
            subject: "events.guild_create".to_string(),
            source: test_error(),
        };
        assert!(err.to_string().contains("events.guild_create"));
    }

    #[test]
    fn config_error_preserves_message() {
        let err = GatewayError::Config("DISCORD_TOKEN must be set".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: DISCORD_TOKEN must be set"
        );
    }
}
