//! tokio-tungstenite transport

use super::{ConnectRequest, Connector, Inflater, Transport, TransportError, TransportEvent};
use crate::protocol::{codes, CloseInfo};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens TLS websocket connections to the gateway
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = connect_async(request.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;

        debug!(url = %request.url, status = %response.status(), "Gateway socket open");

        Ok(Box::new(WsTransport {
            stream,
            inflater: request.compress.then(Inflater::new),
            open: true,
        }))
    }
}

pub struct WsTransport {
    stream: Stream,
    inflater: Option<Inflater>,
    open: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> TransportEvent {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.open = false;
                    return TransportEvent::Closed(CloseInfo::new(codes::ABNORMAL, e.to_string()));
                }
                None => {
                    self.open = false;
                    return TransportEvent::Closed(CloseInfo::new(codes::ABNORMAL, "stream ended"));
                }
            };

            match message {
                Message::Text(text) => return TransportEvent::Text(text),
                Message::Binary(bytes) => {
                    let decoded = match self.inflater.as_mut() {
                        Some(inflater) => inflater.push(&bytes).map_err(|e| e.to_string()),
                        None => String::from_utf8(bytes).map(Some).map_err(|e| e.to_string()),
                    };
                    match decoded {
                        Ok(Some(text)) => return TransportEvent::Text(text),
                        Ok(None) => continue,
                        Err(error) => return TransportEvent::Error(error),
                    }
                }
                Message::Close(frame) => {
                    self.open = false;
                    let close = frame
                        .map(|f| CloseInfo::new(u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or_else(|| CloseInfo::new(1005, "no status received"));
                    return TransportEvent::Closed(close);
                }
                other => trace!(kind = ?other, "Ignoring control frame"),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))
    }

    async fn close(&mut self, code: u16) {
        if !self.open {
            return;
        }
        self.open = false;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "Close handshake failed");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
