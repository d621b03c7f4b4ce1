//! Socket transport
//!
//! The shard state machine only sees text frames and closes; how they get
//! there (TLS websocket, zlib-stream, an in-memory test double) lives behind
//! [`Connector`] and [`Transport`].

mod inflate;
mod websocket;

pub use inflate::{InflateError, Inflater};
pub use websocket::{WsConnector, WsTransport};

use crate::protocol::CloseInfo;
use async_trait::async_trait;
use thiserror::Error;

/// Something a transport observed on the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete text frame (already inflated when compression is on)
    Text(String),
    /// A frame that could not be turned into text; the socket stays up
    Error(String),
    /// The socket is gone
    Closed(CloseInfo),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open gateway connection")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to write to gateway connection")]
    Send(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("gateway connection is not open")]
    NotOpen,
}

/// Where and how to open a shard connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub compress: bool,
}

impl ConnectRequest {
    /// Build the connection URL with its query parameters
    pub fn new(base: &str, version: u8, encoding: &str, compress: bool) -> Self {
        let base = base.trim_end_matches('/');
        let mut url = format!("{base}/?v={version}&encoding={encoding}");
        if compress {
            url.push_str("&compress=zlib-stream");
        }
        Self { url, compress }
    }
}

/// One open gateway socket
#[async_trait]
pub trait Transport: Send {
    /// Next event from the socket. Must be cancel-safe.
    async fn recv(&mut self) -> TransportEvent;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame. Errors are irrelevant at this point and swallowed.
    async fn close(&mut self, code: u16);

    fn is_open(&self) -> bool;
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>, TransportError>;
}
