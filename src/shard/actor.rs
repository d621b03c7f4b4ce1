//! Shard state machine
//!
//! One task per shard. The task owns the socket, the protocol state, the
//! outbound send limiter and every timer the shard arms; the manager only
//! ever reaches it through the command channel.

use super::{DestroyOptions, GatewayState, ShardCommand, ShardEvent, ShardEventKind, Status};
use crate::manager::config::{IdentifySettings, Timings};
use crate::metrics::GatewayMetrics;
use crate::protocol::{
    codes, events, CloseInfo, GatewayFrame, HelloPayload, OpCode, ReadyPayload, ResumePayload,
};
use crate::ratelimit::{Priority, SendBudget, SendLimiter};
use crate::timers::TimerRegistry;
use crate::transport::{ConnectRequest, Connector, Transport, TransportError, TransportEvent};
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Settings every shard of a manager shares
pub struct ShardSettings {
    pub token: String,
    pub identify: IdentifySettings,
    pub timings: Timings,
    pub send_budget: SendBudget,
    pub raw_frames: bool,
}

impl fmt::Debug for ShardSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSettings")
            .field("token", &"<redacted>")
            .field("identify", &self.identify)
            .field("timings", &self.timings)
            .field("send_budget", &self.send_budget)
            .field("raw_frames", &self.raw_frames)
            .finish()
    }
}

/// Collaborators handed to each shard task
#[derive(Clone)]
pub struct ShardContext {
    pub settings: Arc<ShardSettings>,
    pub connector: Arc<dyn Connector>,
    pub state: GatewayState,
    pub metrics: GatewayMetrics,
    pub events: mpsc::UnboundedSender<ShardEvent>,
}

/// Manager-side end of a shard task
#[derive(Debug)]
pub struct ShardHandle {
    id: u32,
    commands: mpsc::UnboundedSender<ShardCommand>,
    task: JoinHandle<()>,
}

impl ShardHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns false once the task has ended
    pub fn send(&self, command: ShardCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardTimer {
    Hello,
    Heartbeat,
    Ready,
    RateLimitReset,
}

type Opening = BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;

enum Link {
    Idle,
    Opening(Opening),
    Open(Box<dyn Transport>),
}

enum LinkEvent {
    Opened(Result<Box<dyn Transport>, TransportError>),
    Socket(TransportEvent),
}

/// Pending until the link has something to report
async fn next_link_event(link: &mut Link) -> LinkEvent {
    match link {
        Link::Idle => std::future::pending().await,
        Link::Opening(opening) => LinkEvent::Opened(opening.await),
        Link::Open(transport) => LinkEvent::Socket(transport.recv().await),
    }
}

pub struct Shard {
    id: u32,
    total_shards: u32,
    gateway_url: String,

    status: Status,
    sequence: i64,
    close_sequence: i64,
    session_id: Option<String>,
    last_ping_at: Option<Instant>,
    last_heartbeat_acked: bool,
    expected_guilds: Option<HashSet<String>>,

    link: Link,
    limiter: SendLimiter<GatewayFrame>,
    timers: TimerRegistry<ShardTimer>,

    commands: mpsc::UnboundedReceiver<ShardCommand>,
    context: ShardContext,
}

impl Shard {
    /// Start the shard task. The shard stays idle until told to connect.
    pub fn spawn(id: u32, total_shards: u32, context: ShardContext) -> ShardHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let shard = Self {
            id,
            total_shards,
            gateway_url: String::new(),
            status: Status::Idle,
            sequence: -1,
            close_sequence: 0,
            session_id: None,
            last_ping_at: None,
            last_heartbeat_acked: true,
            expected_guilds: None,
            link: Link::Idle,
            limiter: SendLimiter::new(context.settings.send_budget),
            timers: TimerRegistry::new(),
            commands,
            context,
        };
        let task = tokio::spawn(shard.run());

        ShardHandle {
            id,
            commands: commands_tx,
            task,
        }
    }

    async fn run(mut self) {
        debug!(shard_id = self.id, "Shard task started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ShardCommand::Connect { url }) => self.connect(url).await,
                    Some(ShardCommand::Send { payload, priority }) => self.send(payload, priority).await,
                    Some(ShardCommand::Destroy(options)) => self.destroy(options).await,
                    Some(ShardCommand::Shutdown) | None => break,
                },
                event = next_link_event(&mut self.link) => match event {
                    LinkEvent::Opened(result) => self.on_opened(result),
                    LinkEvent::Socket(event) => self.on_socket(event).await,
                },
                timer = self.timers.next() => self.on_timer(timer).await,
            }
        }

        self.destroy(DestroyOptions {
            close_code: codes::NORMAL,
            reset: true,
            emit: false,
        })
        .await;
        self.status = Status::Destroyed;
        self.publish_status();
        debug!(shard_id = self.id, "Shard task finished");
    }

    async fn connect(&mut self, url: String) {
        self.gateway_url = url;

        let open = matches!(&self.link, Link::Open(transport) if transport.is_open());
        if open && self.status == Status::Ready {
            debug!(shard_id = self.id, "Already connected and ready");
            self.emit(ShardEventKind::AlreadyReady);
            return;
        }
        if open {
            debug!(
                shard_id = self.id,
                status = %self.status,
                "Open connection found, identifying on it"
            );
            self.identify().await;
            return;
        }
        if !matches!(self.link, Link::Idle) {
            debug!(shard_id = self.id, "Cleaning up stale connection");
            self.destroy(DestroyOptions {
                emit: false,
                ..DestroyOptions::default()
            })
            .await;
        }

        self.status = if self.session_id.is_some() {
            Status::Reconnecting
        } else {
            Status::Connecting
        };
        self.publish_status();

        let identify = &self.context.settings.identify;
        let request = ConnectRequest::new(
            &self.gateway_url,
            identify.version,
            &identify.encoding,
            identify.compress,
        );
        info!(
            shard_id = self.id,
            url = %request.url,
            status = %self.status,
            "Connecting to gateway"
        );

        self.timers.set_timeout(
            ShardTimer::Hello,
            self.context.settings.timings.hello_timeout,
        );
        let connector = Arc::clone(&self.context.connector);
        self.link = Link::Opening(Box::pin(async move { connector.connect(&request).await }));
    }

    fn on_opened(&mut self, result: Result<Box<dyn Transport>, TransportError>) {
        match result {
            Ok(transport) => {
                debug!(shard_id = self.id, "Connection opened");
                self.link = Link::Open(transport);
                self.status = Status::Nearly;
                self.publish_status();
            }
            Err(err) => {
                self.link = Link::Idle;
                let reason = match std::error::Error::source(&err) {
                    Some(source) => format!("{err}: {source}"),
                    None => err.to_string(),
                };
                warn!(shard_id = self.id, error = %reason, "Failed to connect");
                self.context.metrics.record_error("transport_connect");
                self.emit(ShardEventKind::Error(reason.clone()));
                self.on_close(CloseInfo::new(codes::ABNORMAL, reason));
            }
        }
    }

    async fn on_socket(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => match GatewayFrame::decode(&text) {
                Ok(frame) => self.on_frame(frame).await,
                Err(err) => {
                    warn!(shard_id = self.id, error = %err, "Discarding undecodable frame");
                    self.context.metrics.record_error("decode");
                    self.emit(ShardEventKind::Error(format!("undecodable frame: {err}")));
                }
            },
            TransportEvent::Error(message) => {
                warn!(shard_id = self.id, error = %message, "Transport error");
                self.emit(ShardEventKind::Error(message));
            }
            TransportEvent::Closed(close) => {
                self.link = Link::Idle;
                self.on_close(close);
            }
        }
    }

    async fn on_frame(&mut self, frame: GatewayFrame) {
        let opcode = frame.opcode();
        self.context
            .metrics
            .record_frame(self.id, opcode.map_or("unknown", OpCode::name));
        self.context.state.record_event(self.id);
        if self.context.settings.raw_frames {
            self.emit(ShardEventKind::Raw(frame.clone()));
        }

        if opcode == Some(OpCode::Dispatch) {
            match frame.event_name() {
                Some(events::READY) => self.on_ready(&frame).await,
                Some(events::RESUMED) => self.on_resumed(&frame).await,
                _ => {}
            }
        }

        if let Some(sequence) = frame.s {
            if sequence > self.sequence {
                self.sequence = sequence;
                self.context
                    .state
                    .set_session(self.id, self.sequence, self.session_id.is_some());
            }
        }

        match opcode {
            Some(OpCode::Hello) => self.on_hello(&frame).await,
            Some(OpCode::Reconnect) => {
                info!(shard_id = self.id, "Server requested a reconnect");
                self.destroy(DestroyOptions {
                    close_code: codes::RECONNECT,
                    ..DestroyOptions::default()
                })
                .await;
            }
            Some(OpCode::InvalidSession) => self.on_invalid_session(&frame).await,
            Some(OpCode::HeartbeatAck) => self.ack_heartbeat(),
            Some(OpCode::Heartbeat) => self.send_heartbeat(true).await,
            Some(OpCode::Dispatch) => self.on_dispatch(frame),
            _ => debug!(shard_id = self.id, op = frame.op, "Ignoring frame"),
        }
    }

    async fn on_hello(&mut self, frame: &GatewayFrame) {
        let hello: HelloPayload = match serde_json::from_value(frame.d.clone()) {
            Ok(hello) => hello,
            Err(err) => {
                warn!(shard_id = self.id, error = %err, "Malformed HELLO");
                self.emit(ShardEventKind::Error(format!("malformed HELLO: {err}")));
                return;
            }
        };
        self.timers.clear(ShardTimer::Hello);

        let interval = Duration::from_millis(hello.heartbeat_interval);
        debug!(
            shard_id = self.id,
            heartbeat_interval_ms = hello.heartbeat_interval,
            "Received HELLO"
        );
        self.last_heartbeat_acked = true;
        if interval.is_zero() {
            self.emit(ShardEventKind::Error("HELLO with zero heartbeat interval".to_string()));
        } else {
            self.timers.set_interval(ShardTimer::Heartbeat, interval);
        }

        self.identify().await;
    }

    async fn on_ready(&mut self, frame: &GatewayFrame) {
        let ready: ReadyPayload = match serde_json::from_value(frame.d.clone()) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(shard_id = self.id, error = %err, "Malformed READY");
                self.emit(ShardEventKind::Error(format!("malformed READY: {err}")));
                return;
            }
        };

        let expected: HashSet<String> = ready.guilds.into_iter().map(|g| g.id).collect();
        info!(
            shard_id = self.id,
            session_id = %ready.session_id,
            guilds = expected.len(),
            "Session established"
        );
        self.session_id = Some(ready.session_id);
        self.expected_guilds = Some(expected);
        self.status = Status::WaitingForGuilds;
        self.publish_status();
        self.context.metrics.record_session_started(self.id);
        self.emit(ShardEventKind::Ready);

        self.last_heartbeat_acked = true;
        self.send_heartbeat(false).await;
        if self.status == Status::WaitingForGuilds {
            self.check_ready();
        }
    }

    async fn on_resumed(&mut self, frame: &GatewayFrame) {
        let replayed = frame.s.unwrap_or(self.close_sequence) - self.close_sequence;
        info!(shard_id = self.id, replayed, "Session resumed");
        self.status = Status::Ready;
        self.publish_status();
        self.context.metrics.record_session_resumed(self.id);
        self.emit(ShardEventKind::Resumed { replayed });

        self.last_heartbeat_acked = true;
        self.send_heartbeat(false).await;
    }

    async fn on_invalid_session(&mut self, frame: &GatewayFrame) {
        if frame.d.as_bool().unwrap_or(false) {
            info!(shard_id = self.id, "Session invalidated but resumable");
            self.identify_resume().await;
            return;
        }

        warn!(shard_id = self.id, "Session invalidated");
        self.discard_session();
        self.status = Status::Reconnecting;
        self.publish_status();
        self.emit(ShardEventKind::InvalidSession);
    }

    fn on_dispatch(&mut self, frame: GatewayFrame) {
        let arrived = if self.status == Status::WaitingForGuilds
            && frame.is_event(events::GUILD_CREATE)
        {
            frame.payload_id().map(str::to_owned)
        } else {
            None
        };

        self.emit(ShardEventKind::Dispatch(frame));

        if let Some(guild_id) = arrived {
            if let Some(expected) = self.expected_guilds.as_mut() {
                expected.remove(&guild_id);
            }
            self.check_ready();
        }
    }

    /// Ready once every expected guild arrived, or once the grace timer lapses
    fn check_ready(&mut self) {
        self.timers.clear(ShardTimer::Ready);

        let pending = self.expected_guilds.as_ref().map_or(0, HashSet::len);
        self.context.state.set_pending_guilds(self.id, pending);
        if pending == 0 {
            debug!(shard_id = self.id, "Received all guilds, marking ready");
            self.mark_ready(None);
        } else {
            self.timers
                .set_timeout(ShardTimer::Ready, self.context.settings.timings.ready_timeout);
        }
    }

    fn mark_ready(&mut self, unavailable_guilds: Option<Vec<String>>) {
        self.expected_guilds = None;
        self.status = Status::Ready;
        self.publish_status();
        self.context.state.set_pending_guilds(self.id, 0);
        self.emit(ShardEventKind::AllReady { unavailable_guilds });
    }

    async fn identify(&mut self) {
        if self.session_id.is_some() {
            self.identify_resume().await;
        } else {
            self.identify_new().await;
        }
    }

    async fn identify_new(&mut self) {
        self.status = Status::Identifying;
        self.publish_status();
        info!(
            shard_id = self.id,
            total_shards = self.total_shards,
            "Identifying"
        );

        let settings = &self.context.settings;
        let payload = settings
            .identify
            .payload(&settings.token, self.id, self.total_shards);
        self.send_handshake(GatewayFrame::identify(&payload)).await;
    }

    async fn identify_resume(&mut self) {
        let Some(session_id) = self.session_id.clone() else {
            debug!(shard_id = self.id, "No session to resume, identifying as new");
            self.identify_new().await;
            return;
        };

        self.status = Status::Resuming;
        self.publish_status();
        info!(
            shard_id = self.id,
            session_id = %session_id,
            sequence = self.close_sequence,
            "Resuming session"
        );

        let payload = ResumePayload {
            token: self.context.settings.token.clone(),
            session_id,
            seq: self.close_sequence,
        };
        self.send_handshake(GatewayFrame::resume(&payload)).await;
    }

    async fn send_handshake(&mut self, frame: Result<GatewayFrame, serde_json::Error>) {
        match frame {
            Ok(frame) => self.send(frame, Priority::Critical).await,
            Err(err) => {
                warn!(
                    shard_id = self.id,
                    status = %self.status,
                    error = %err,
                    "Could not build handshake frame"
                );
                self.context.metrics.record_error("encode");
                self.emit(ShardEventKind::Error(format!("unencodable handshake: {err}")));
            }
        }
    }

    async fn send_heartbeat(&mut self, ignore_missing_ack: bool) {
        if !self.last_heartbeat_acked {
            if ignore_missing_ack {
                debug!(
                    shard_id = self.id,
                    status = %self.status,
                    "Heartbeat ack still pending, sending another"
                );
            } else {
                warn!(
                    shard_id = self.id,
                    status = %self.status,
                    sequence = self.sequence,
                    "No heartbeat ack since the last beat, assuming zombie connection"
                );
                self.destroy(DestroyOptions {
                    close_code: codes::SESSION_TIMEOUT,
                    reset: false,
                    emit: true,
                })
                .await;
                return;
            }
        }

        debug!(shard_id = self.id, sequence = self.sequence, "Sending heartbeat");
        self.last_heartbeat_acked = false;
        self.last_ping_at = Some(Instant::now());
        self.send(GatewayFrame::heartbeat(self.sequence), Priority::Critical)
            .await;
    }

    fn ack_heartbeat(&mut self) {
        self.last_heartbeat_acked = true;
        if let Some(sent_at) = self.last_ping_at {
            let latency = sent_at.elapsed();
            self.context.state.record_heartbeat_ack(self.id, latency);
            self.context
                .metrics
                .record_heartbeat_latency(self.id, latency);
            debug!(
                shard_id = self.id,
                latency_ms = latency.as_millis() as u64,
                "Heartbeat acknowledged"
            );
        }
    }

    async fn on_timer(&mut self, timer: ShardTimer) {
        match timer {
            ShardTimer::Hello => {
                warn!(shard_id = self.id, "HELLO not received in time, reconnecting");
                self.destroy(DestroyOptions {
                    close_code: codes::SESSION_TIMEOUT,
                    reset: true,
                    emit: true,
                })
                .await;
            }
            ShardTimer::Heartbeat => {
                let lenient = self.status.is_handshaking();
                self.send_heartbeat(lenient).await;
            }
            ShardTimer::Ready => {
                let mut unavailable: Vec<String> = self
                    .expected_guilds
                    .take()
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                unavailable.sort();
                warn!(
                    shard_id = self.id,
                    unavailable = unavailable.len(),
                    "Guilds still unavailable after the grace period"
                );
                self.mark_ready(Some(unavailable));
            }
            ShardTimer::RateLimitReset => {
                self.limiter.refill();
                self.flush().await;
            }
        }
    }

    async fn send(&mut self, frame: GatewayFrame, priority: Priority) {
        self.limiter.push(frame, priority);
        self.flush().await;
    }

    /// Write whatever the send window allows
    async fn flush(&mut self) {
        let drain = self.limiter.drain();
        if drain.window_opened {
            self.timers
                .set_timeout(ShardTimer::RateLimitReset, self.limiter.window());
        }

        for frame in drain.frames {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(err) => {
                    self.emit(ShardEventKind::Error(format!("unencodable frame: {err}")));
                    continue;
                }
            };

            let result = match &mut self.link {
                Link::Open(transport) if transport.is_open() => transport.send(text).await,
                _ => Err(TransportError::NotOpen),
            };
            match result {
                Ok(()) => {}
                Err(TransportError::NotOpen) => {
                    warn!(shard_id = self.id, "Tried to send a frame with no open connection");
                    self.destroy(DestroyOptions {
                        close_code: codes::RECONNECT,
                        ..DestroyOptions::default()
                    })
                    .await;
                    return;
                }
                Err(err) => {
                    warn!(shard_id = self.id, error = %err, "Failed to send frame");
                    self.context.metrics.record_error("transport_send");
                    self.emit(ShardEventKind::Error(err.to_string()));
                }
            }
        }
    }

    async fn destroy(&mut self, options: DestroyOptions) {
        debug!(
            shard_id = self.id,
            close_code = options.close_code,
            reset = options.reset,
            "Destroying connection"
        );
        self.timers.clear_all();

        let closed = match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Open(mut transport) if transport.is_open() => {
                transport.close(options.close_code).await;
                Some(CloseInfo::new(options.close_code, ""))
            }
            Link::Open(mut transport) => {
                transport.close(options.close_code).await;
                None
            }
            Link::Opening(_) | Link::Idle => None,
        };

        self.status = Status::Disconnected;
        if self.sequence != -1 {
            self.close_sequence = self.sequence;
        }
        if options.reset {
            self.discard_session();
        }
        self.limiter.reset();
        self.expected_guilds = None;

        match closed {
            Some(close) => self.on_close(close),
            None => {
                self.publish_status();
                if options.emit {
                    self.emit(ShardEventKind::Destroyed);
                }
            }
        }
    }

    /// The socket is gone, whoever closed it
    fn on_close(&mut self, close: CloseInfo) {
        self.timers.clear_all();
        self.limiter.reset();
        self.expected_guilds = None;
        if self.sequence != -1 {
            self.close_sequence = self.sequence;
        }
        self.status = Status::Disconnected;
        self.publish_status();
        self.context.metrics.record_close(self.id, close.code);

        info!(
            shard_id = self.id,
            close_code = close.code,
            reason = %close,
            sequence = self.close_sequence,
            "Connection closed"
        );
        let has_session = self.session_id.is_some();
        self.emit(ShardEventKind::Closed { close, has_session });
    }

    fn discard_session(&mut self) {
        self.session_id = None;
        self.sequence = -1;
    }

    fn publish_status(&self) {
        let state = &self.context.state;
        state.set_status(self.id, self.status);
        state.set_session(self.id, self.sequence, self.session_id.is_some());
    }

    fn emit(&self, kind: ShardEventKind) {
        let _ = self.context.events.send(ShardEvent {
            shard_id: self.id,
            kind,
        });
    }
}
