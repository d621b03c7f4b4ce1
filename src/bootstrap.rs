//! Gateway bootstrap
//!
//! One REST call tells the client where the gateway lives, how many shards
//! are recommended and how many new sessions it may still start.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use twilight_http::error::ErrorType;

/// Session-start budget reported by the bootstrap call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    pub reset_after: Duration,
    pub max_concurrency: u16,
}

/// Result of the bootstrap call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    pub url: String,
    pub recommended_shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The token was rejected (HTTP 401)
    #[error("bootstrap request was not authorized")]
    Unauthorized,

    /// Anything else: network, 5xx, body decoding
    #[error("bootstrap request failed")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[async_trait]
pub trait Bootstrap: Send + Sync {
    async fn gateway_info(&self) -> Result<GatewayInfo, BootstrapError>;
}

/// Bootstrap backed by the authenticated `GET /gateway/bot` endpoint
pub struct HttpBootstrap {
    client: twilight_http::Client,
}

impl HttpBootstrap {
    pub fn new(token: String) -> Self {
        Self {
            client: twilight_http::Client::new(token),
        }
    }
}

#[async_trait]
impl Bootstrap for HttpBootstrap {
    async fn gateway_info(&self) -> Result<GatewayInfo, BootstrapError> {
        let response = self.client.gateway().authed().await.map_err(|e| {
            let unauthorized = match e.kind() {
                ErrorType::Unauthorized => true,
                ErrorType::Response { status, .. } => status.get() == 401,
                _ => false,
            };
            if unauthorized {
                BootstrapError::Unauthorized
            } else {
                BootstrapError::Request(Box::new(e))
            }
        })?;

        let info = response
            .model()
            .await
            .map_err(|e| BootstrapError::Request(Box::new(e)))?;

        debug!(
            url = %info.url,
            shards = info.shards,
            remaining = info.session_start_limit.remaining,
            "Fetched gateway information"
        );

        Ok(GatewayInfo {
            url: info.url,
            recommended_shards: info.shards,
            session_start_limit: SessionStartLimit {
                total: info.session_start_limit.total,
                remaining: info.session_start_limit.remaining,
                reset_after: Duration::from_millis(info.session_start_limit.reset_after),
                max_concurrency: info.session_start_limit.max_concurrency,
            },
        })
    }
}
