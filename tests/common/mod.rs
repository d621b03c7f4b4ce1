//! In-memory gateway for scenario tests
//!
//! [`MockConnector`] hands every connection attempt to the test as a
//! [`PendingSocket`]; accepting it yields the server end of the socket.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use shardline::bootstrap::{Bootstrap, BootstrapError, GatewayInfo, SessionStartLimit};
use shardline::events::ClientEvent;
use shardline::manager::{Manager, ManagerConfig, ManagerHandle, ShardSelection};
use shardline::protocol::{CloseInfo, GatewayFrame, OpCode};
use shardline::transport::{ConnectRequest, Connector, Transport, TransportError, TransportEvent};
use shardline::GatewayError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const GATEWAY_URL: &str = "wss://gateway.test";

/// Long enough that no heartbeat fires unless a test wants one
pub const QUIET_HEARTBEAT_MS: u64 = 600_000;

const WAIT: Duration = Duration::from_secs(3600);

/// What the client wrote to a socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(GatewayFrame),
    Close(u16),
}

pub struct MockConnector {
    pending: mpsc::UnboundedSender<PendingSocket>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingSocket>) {
        let (pending, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            pending,
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let (accept, accepted) = oneshot::channel();
        let socket = ServerSocket {
            url: request.url.clone(),
            to_client,
            from_client,
        };
        self.pending
            .send(PendingSocket { socket, accept })
            .map_err(|_| TransportError::Connect("test server is gone".into()))?;
        accepted
            .await
            .map_err(|_| TransportError::Connect("connection was not accepted".into()))?;

        Ok(Box::new(MockTransport {
            incoming,
            outgoing,
            open: true,
        }))
    }
}

/// A connection attempt waiting for the test to accept it
pub struct PendingSocket {
    socket: ServerSocket,
    accept: oneshot::Sender<()>,
}

impl PendingSocket {
    pub fn url(&self) -> &str {
        &self.socket.url
    }

    pub fn accept(self) -> ServerSocket {
        let _ = self.accept.send(());
        self.socket
    }
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<TransportEvent>,
    outgoing: mpsc::UnboundedSender<Outbound>,
    open: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> TransportEvent {
        match self.incoming.recv().await {
            Some(TransportEvent::Closed(close)) => {
                self.open = false;
                TransportEvent::Closed(close)
            }
            Some(event) => event,
            None => {
                self.open = false;
                TransportEvent::Closed(CloseInfo::new(1006, "test server dropped the socket"))
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let frame = GatewayFrame::decode(&text).map_err(|e| TransportError::Send(Box::new(e)))?;
        let _ = self.outgoing.send(Outbound::Frame(frame));
        Ok(())
    }

    async fn close(&mut self, code: u16) {
        self.open = false;
        let _ = self.outgoing.send(Outbound::Close(code));
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Server end of one mock connection
pub struct ServerSocket {
    pub url: String,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<Outbound>,
}

impl ServerSocket {
    pub fn send(&self, frame: GatewayFrame) {
        let text = frame.encode().unwrap();
        let _ = self.to_client.send(TransportEvent::Text(text));
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(TransportEvent::Text(text.to_string()));
    }

    pub fn hello(&self, heartbeat_interval_ms: u64) {
        self.send(GatewayFrame::new(
            OpCode::Hello,
            json!({ "heartbeat_interval": heartbeat_interval_ms }),
        ));
    }

    pub fn ready(&self, session_id: &str, sequence: i64, guilds: &[&str]) {
        let guilds: Vec<Value> = guilds
            .iter()
            .map(|id| json!({ "id": id, "unavailable": true }))
            .collect();
        self.dispatch(
            "READY",
            sequence,
            json!({ "session_id": session_id, "guilds": guilds }),
        );
    }

    pub fn dispatch(&self, name: &str, sequence: i64, d: Value) {
        self.send(GatewayFrame::dispatch(name, sequence, d));
    }

    pub fn ack(&self) {
        self.send(GatewayFrame::new(OpCode::HeartbeatAck, Value::Null));
    }

    /// Drop the connection from the server side
    pub fn close(&self, code: u16) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(CloseInfo::new(code, "")));
    }

    /// Next thing the client wrote; None once the client dropped the socket
    pub async fn next(&mut self) -> Option<Outbound> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client went quiet")
    }

    pub async fn next_frame(&mut self) -> GatewayFrame {
        match self.next().await {
            Some(Outbound::Frame(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    /// Next frame with `op`, skipping heartbeats on the way
    pub async fn expect_op(&mut self, op: OpCode) -> GatewayFrame {
        loop {
            let frame = self.next_frame().await;
            if frame.opcode() == Some(op) {
                return frame;
            }
            assert_eq!(
                frame.opcode(),
                Some(OpCode::Heartbeat),
                "expected {op:?}, got {frame:?}"
            );
        }
    }

    /// HELLO, then wait for the IDENTIFY it triggers
    pub async fn handshake(&mut self, heartbeat_interval_ms: u64) -> GatewayFrame {
        self.hello(heartbeat_interval_ms);
        self.expect_op(OpCode::Identify).await
    }
}

pub async fn accept_next(pending: &mut mpsc::UnboundedReceiver<PendingSocket>) -> ServerSocket {
    next_pending(pending).await.accept()
}

pub async fn next_pending(pending: &mut mpsc::UnboundedReceiver<PendingSocket>) -> PendingSocket {
    tokio::time::timeout(WAIT, pending.recv())
        .await
        .expect("no connection attempt")
        .expect("connector dropped")
}

/// Bootstrap that replays scripted answers, then repeats a fallback
pub struct ScriptedBootstrap {
    script: Mutex<VecDeque<Result<GatewayInfo, BootstrapError>>>,
    fallback: GatewayInfo,
    calls: AtomicUsize,
}

impl ScriptedBootstrap {
    pub fn new(recommended_shards: u32) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: gateway_info(recommended_shards, 1000, 0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: Result<GatewayInfo, BootstrapError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bootstrap for ScriptedBootstrap {
    async fn gateway_info(&self) -> Result<GatewayInfo, BootstrapError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

pub fn gateway_info(recommended_shards: u32, remaining: u32, reset_after_ms: u64) -> GatewayInfo {
    GatewayInfo {
        url: GATEWAY_URL.to_string(),
        recommended_shards,
        session_start_limit: SessionStartLimit {
            total: 1000,
            remaining,
            reset_after: Duration::from_millis(reset_after_ms),
            max_concurrency: 1,
        },
    }
}

pub fn config(shards: u32) -> ManagerConfig {
    let mut config = ManagerConfig::new("test-token");
    config.shards = ShardSelection::Count(shards);
    config
}

/// A running manager and everything a test needs to observe it
pub struct Harness {
    pub handle: ManagerHandle,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub task: JoinHandle<Result<(), GatewayError>>,
    pub bootstrap: Arc<ScriptedBootstrap>,
    pub connector: Arc<MockConnector>,
    pub pending: mpsc::UnboundedReceiver<PendingSocket>,
}

impl Harness {
    pub fn start(config: ManagerConfig, bootstrap: ScriptedBootstrap) -> Self {
        Self::start_with(config, bootstrap, |manager| manager)
    }

    pub fn start_with<F>(config: ManagerConfig, bootstrap: ScriptedBootstrap, build: F) -> Self
    where
        F: FnOnce(Manager) -> Manager,
    {
        let bootstrap = Arc::new(bootstrap);
        let (connector, pending) = MockConnector::new();
        let (manager, handle, events) = Manager::new(
            config,
            Arc::clone(&bootstrap) as Arc<dyn Bootstrap>,
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        let task = tokio::spawn(build(manager).run());
        Self {
            handle,
            events,
            task,
            bootstrap,
            connector,
            pending,
        }
    }

    pub async fn accept(&mut self) -> ServerSocket {
        accept_next(&mut self.pending).await
    }

    pub async fn next_event(&mut self) -> ClientEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("no client event")
            .expect("manager dropped its event channel")
    }

    /// Skip events until one matches
    pub async fn wait_for<F>(&mut self, mut matches: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if matches(&event) {
                return event;
            }
        }
    }

    /// Accept the next socket and take it through HELLO, IDENTIFY and READY
    pub async fn connect_shard(&mut self, session_id: &str) -> (ServerSocket, GatewayFrame) {
        let mut socket = self.accept().await;
        let identify = socket.handshake(QUIET_HEARTBEAT_MS).await;
        socket.ready(session_id, 1, &[]);
        (socket, identify)
    }

    pub async fn finish(self) -> Result<(), GatewayError> {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("manager did not stop")
            .expect("manager task panicked")
    }
}
