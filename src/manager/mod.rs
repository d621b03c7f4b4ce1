//! Multi-shard orchestration
//!
//! The manager bootstraps the shard set, spawns shards strictly one at a
//! time through the session-start governor, requeues them when they drop,
//! and folds per-shard readiness into one client-level signal.

pub mod config;
mod packets;

pub use config::{IdentifySettings, ManagerConfig, ShardSelection, Timings};
pub use packets::{PacketQueue, BEFORE_READY_ALLOWED};

use crate::bootstrap::{Bootstrap, BootstrapError, GatewayInfo};
use crate::error::GatewayError;
use crate::events::ClientEvent;
use crate::metrics::GatewayMetrics;
use crate::protocol::close::describe;
use crate::protocol::{codes, CloseClass, CloseInfo, GatewayFrame};
use crate::ratelimit::{GovernorStep, Priority, SessionGovernor};
use crate::shard::{
    DestroyOptions, GatewayState, Shard, ShardCommand, ShardContext, ShardEvent, ShardEventKind,
    ShardHandle, ShardSettings, Status,
};
use crate::timers::TimerRegistry;
use crate::transport::Connector;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Member warm-up run once every shard is ready, before the client reports ready
#[async_trait]
pub trait MemberWarmup: Send + Sync {
    async fn warm(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug)]
enum Control {
    Send { shard_id: u32, payload: GatewayFrame },
    Broadcast(GatewayFrame),
    Destroy,
}

/// Control surface for a running [`Manager`]
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    control: mpsc::UnboundedSender<Control>,
    state: GatewayState,
}

impl ManagerHandle {
    /// Queue a frame on one shard
    pub fn send(&self, shard_id: u32, payload: GatewayFrame) -> Result<(), GatewayError> {
        if self.state.shard_count() > 0 && self.state.status(shard_id).is_none() {
            return Err(GatewayError::ShardUnknown { shard_id });
        }
        self.control
            .send(Control::Send { shard_id, payload })
            .map_err(|_| GatewayError::ManagerClosed)
    }

    /// Queue a frame on every shard
    pub fn broadcast(&self, payload: GatewayFrame) -> Result<(), GatewayError> {
        self.control
            .send(Control::Broadcast(payload))
            .map_err(|_| GatewayError::ManagerClosed)
    }

    /// Tear everything down. Calling it again has no effect.
    pub fn destroy(&self) {
        let _ = self.control.send(Control::Destroy);
    }

    pub fn status(&self) -> Status {
        self.state.client_status()
    }

    /// Average heartbeat round-trip across shards
    pub fn ping(&self) -> Option<Duration> {
        self.state.average_ping()
    }

    pub fn ready_at(&self) -> Option<SystemTime> {
        self.state.ready_at()
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerTimer {
    SessionReset,
    SpawnDelay,
    Backoff,
}

/// Where the spawn pipeline stands; only one shard is ever in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipeline {
    Idle,
    Refreshing,
    Throttled,
    Connecting(u32),
    Spacing,
    Backoff,
}

enum Background {
    Bootstrap(Result<GatewayInfo, BootstrapError>),
    Warmup(Result<(), Box<dyn std::error::Error + Send + Sync>>),
}

pub struct Manager {
    config: ManagerConfig,
    bootstrap: Arc<dyn Bootstrap>,
    connector: Arc<dyn Connector>,
    warmup: Option<Arc<dyn MemberWarmup>>,
    metrics: GatewayMetrics,
    state: GatewayState,

    gateway_url: String,
    shards: BTreeMap<u32, ShardHandle>,
    queue: VecDeque<u32>,
    governor: SessionGovernor,
    pipeline: Pipeline,
    initial: bool,
    destroyed: bool,
    fatal: Option<GatewayError>,
    packets: PacketQueue,
    timers: TimerRegistry<ManagerTimer>,
    background: FuturesUnordered<BoxFuture<'static, Background>>,

    control: mpsc::UnboundedReceiver<Control>,
    shard_events: mpsc::UnboundedReceiver<ShardEvent>,
    shard_events_tx: Option<mpsc::UnboundedSender<ShardEvent>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        bootstrap: Arc<dyn Bootstrap>,
        connector: Arc<dyn Connector>,
    ) -> (Self, ManagerHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (control_tx, control) = mpsc::unbounded_channel();
        let (shard_events_tx, shard_events) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = GatewayState::new();

        let manager = Self {
            config,
            bootstrap,
            connector,
            warmup: None,
            metrics: GatewayMetrics::disabled(),
            state: state.clone(),
            gateway_url: String::new(),
            shards: BTreeMap::new(),
            queue: VecDeque::new(),
            governor: SessionGovernor::new(),
            pipeline: Pipeline::Idle,
            initial: true,
            destroyed: false,
            fatal: None,
            packets: PacketQueue::new(),
            timers: TimerRegistry::new(),
            background: FuturesUnordered::new(),
            control,
            shard_events,
            shard_events_tx: Some(shard_events_tx),
            events,
        };
        let handle = ManagerHandle {
            control: control_tx,
            state,
        };

        (manager, handle, events_rx)
    }

    pub fn with_warmup(mut self, warmup: Arc<dyn MemberWarmup>) -> Self {
        self.warmup = Some(warmup);
        self
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Connect every shard and keep them connected until destroyed.
    ///
    /// Fails when the token is rejected up front or a shard closes with an
    /// unrecoverable code while the initial shard set is being spawned.
    /// Returns once destroyed and every shard task has ended.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        if let Err(err) = self.connect().await {
            error!(error = %err, "Failed to connect to the gateway");
            self.metrics.record_error(err.error_type_label());
            self.state.set_client_status(Status::Disconnected);
            return Err(err);
        }

        loop {
            let client_ready = self.state.is_ready();
            tokio::select! {
                event = self.shard_events.recv() => match event {
                    Some(event) => self.on_shard_event(event),
                    None => break,
                },
                Some(control) = self.control.recv() => self.on_control(control),
                timer = self.timers.next() => self.on_timer(timer),
                Some(done) = self.background.next() => self.on_background(done),
                // One held frame per scheduler turn
                _ = tokio::task::yield_now(), if self.packets.has_backlog(client_ready) => {
                    self.drain_packet();
                }
            }
        }

        info!("Manager stopped");
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        let info = self.bootstrap.gateway_info().await?;
        let (ids, total_shards) = self.config.shards.resolve(info.recommended_shards)?;
        info!(
            url = %info.url,
            recommended_shards = info.recommended_shards,
            shards = ids.len(),
            total_shards,
            "Fetched gateway information"
        );

        let events = self
            .shard_events_tx
            .take()
            .ok_or(GatewayError::ManagerClosed)?;
        let context = ShardContext {
            settings: Arc::new(ShardSettings {
                token: self.config.token.clone(),
                identify: self.config.identify.clone(),
                timings: self.config.timings,
                send_budget: self.config.send_budget,
                raw_frames: self.config.raw_frames,
            }),
            connector: Arc::clone(&self.connector),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            events,
        };

        if self.config.fetch_all_members && self.warmup.is_none() {
            warn!("Member fetching is enabled but no warm-up hook is set, skipping it");
        }

        self.gateway_url = info.url;
        self.state.register(ids.iter().copied(), total_shards);
        for shard_id in ids {
            self.shards
                .insert(shard_id, Shard::spawn(shard_id, total_shards, context.clone()));
            self.queue.push_back(shard_id);
        }

        self.state.set_client_status(Status::Connecting);
        self.governor.supply(info.session_start_limit);
        self.begin_spawn(false);
        Ok(())
    }

    /// Check the session budget (unless resuming), then spawn the next queued shard
    fn begin_spawn(&mut self, skip_limit: bool) {
        if self.destroyed {
            return;
        }
        if skip_limit {
            self.spawn_next();
            return;
        }

        match self.governor.check() {
            GovernorStep::Refresh => {
                debug!("Refreshing session start limit");
                self.pipeline = Pipeline::Refreshing;
                let bootstrap = Arc::clone(&self.bootstrap);
                self.background.push(Box::pin(async move {
                    Background::Bootstrap(bootstrap.gateway_info().await)
                }));
            }
            GovernorStep::Wait(delay) => {
                self.pipeline = Pipeline::Throttled;
                self.timers.set_timeout(ManagerTimer::SessionReset, delay);
            }
            GovernorStep::Proceed => self.spawn_next(),
        }
    }

    fn spawn_next(&mut self) {
        while let Some(shard_id) = self.queue.pop_front() {
            let Some(shard) = self.shards.get(&shard_id) else {
                continue;
            };
            let url = self.gateway_url.clone();
            if shard.send(ShardCommand::Connect { url }) {
                debug!(shard_id, queued = self.queue.len(), "Spawning shard");
                self.pipeline = Pipeline::Connecting(shard_id);
                return;
            }
            warn!(shard_id, "Shard task has ended, dropping it from the queue");
        }
        self.pipeline_idle();
    }

    /// A spawn settled; space out the next one if anything is still queued
    fn after_spawn(&mut self) {
        if self.destroyed {
            return;
        }
        if self.queue.is_empty() {
            self.pipeline_idle();
            return;
        }

        let delay = self.config.timings.spawn_delay;
        debug!(
            queued = self.queue.len(),
            delay_ms = delay.as_millis() as u64,
            "Continuing shard spawns after delay"
        );
        self.pipeline = Pipeline::Spacing;
        self.timers.set_timeout(ManagerTimer::SpawnDelay, delay);
    }

    fn pipeline_idle(&mut self) {
        self.pipeline = Pipeline::Idle;
        if self.initial {
            self.initial = false;
            debug!("Initial shard spawn finished");
        }
    }

    /// Manager-level reconnect: only when nothing is in flight
    fn reconnect(&mut self, skip_limit: bool) {
        if self.destroyed || self.pipeline != Pipeline::Idle || self.queue.is_empty() {
            return;
        }
        self.begin_spawn(skip_limit);
    }

    fn reconnect_failed(&mut self, err: GatewayError) {
        self.metrics.record_error(err.error_type_label());

        if self.initial {
            error!(error = %err, "Failed to spawn the initial shard set");
            self.fatal = Some(err);
            self.destroy();
            return;
        }
        if err.is_auth() {
            error!(error = %err, "Token invalidated while reconnecting");
            self.emit(ClientEvent::Invalidated);
            self.destroy();
            return;
        }

        let backoff = self.config.timings.reconnect_backoff;
        warn!(
            error = %err,
            retry_in_ms = backoff.as_millis() as u64,
            "Reconnect failed, retrying"
        );
        self.pipeline = Pipeline::Backoff;
        self.timers.set_timeout(ManagerTimer::Backoff, backoff);
    }

    fn requeue(&mut self, shard_id: u32) {
        if self.destroyed {
            return;
        }
        self.metrics.record_reconnect(shard_id);
        if !self.queue.contains(&shard_id) {
            self.queue.push_back(shard_id);
        }
    }

    fn on_shard_event(&mut self, event: ShardEvent) {
        let ShardEvent { shard_id, kind } = event;
        let outcome = kind.connect_outcome();
        let mut failed_close = None;

        match kind {
            ShardEventKind::Ready | ShardEventKind::AlreadyReady => {}
            ShardEventKind::Resumed { replayed } => {
                self.emit(ClientEvent::ShardResumed { shard_id, replayed });
                self.check_shards_ready();
            }
            ShardEventKind::AllReady { unavailable_guilds } => {
                self.metrics.set_shards_ready(self.state.ready_shards());
                self.emit(ClientEvent::ShardReady {
                    shard_id,
                    unavailable_guilds,
                });
                self.check_shards_ready();
            }
            ShardEventKind::Closed { close, has_session } => {
                self.metrics.set_shards_ready(self.state.ready_shards());
                self.on_shard_close(shard_id, close.clone(), has_session);
                failed_close = Some(close);
            }
            ShardEventKind::InvalidSession | ShardEventKind::Destroyed => {
                if !self.destroyed {
                    info!(shard_id, "Shard needs a new session, requeueing");
                    self.emit(ClientEvent::ShardReconnecting { shard_id });
                    self.requeue(shard_id);
                    self.reconnect(false);
                }
            }
            ShardEventKind::Dispatch(frame) => {
                let client_ready = self.state.is_ready();
                if let Some((shard_id, frame)) = self.packets.accept(shard_id, frame, client_ready) {
                    self.forward(shard_id, frame);
                }
            }
            ShardEventKind::Raw(frame) => self.emit(ClientEvent::Raw { shard_id, frame }),
            ShardEventKind::Error(error) => self.emit(ClientEvent::ShardError { shard_id, error }),
        }

        if let Some(success) = outcome {
            if self.pipeline == Pipeline::Connecting(shard_id) {
                self.connect_settled(shard_id, success, failed_close);
            }
        }
    }

    fn on_shard_close(&mut self, shard_id: u32, close: CloseInfo, has_session: bool) {
        let class = self.config.close_codes.classify(close.code, self.destroyed);
        match class {
            CloseClass::Fatal => {
                if self.destroyed {
                    debug!(shard_id, close_code = close.code, "Shard closed on shutdown");
                } else {
                    error!(
                        shard_id,
                        close_code = close.code,
                        reason = describe(close.code),
                        "Shard closed with an unrecoverable code"
                    );
                }
                self.emit(ClientEvent::ShardDisconnect { shard_id, close });
            }
            CloseClass::NonResumable | CloseClass::Resumable => {
                self.emit(ClientEvent::ShardReconnecting { shard_id });
                self.requeue(shard_id);

                if class == CloseClass::Resumable && has_session {
                    info!(shard_id, "Session present, attempting an immediate reconnect");
                    self.reconnect(true);
                } else {
                    if let Some(shard) = self.shards.get(&shard_id) {
                        shard.send(ShardCommand::Destroy(DestroyOptions {
                            close_code: codes::NORMAL,
                            reset: true,
                            emit: false,
                        }));
                    }
                    self.reconnect(false);
                }
            }
        }
    }

    fn connect_settled(&mut self, shard_id: u32, success: bool, close: Option<CloseInfo>) {
        if self.destroyed {
            self.pipeline = Pipeline::Idle;
            return;
        }

        if !success {
            let unrecoverable =
                close.filter(|close| self.config.close_codes.is_unrecoverable(close.code));
            match unrecoverable {
                Some(close) => {
                    let err = GatewayError::from_close(shard_id, close);
                    if self.initial || err.is_auth() {
                        self.reconnect_failed(err);
                        return;
                    }
                }
                None => {
                    debug!(shard_id, "Failed to connect, requeueing");
                    self.requeue(shard_id);
                }
            }
        }

        self.after_spawn();
    }

    fn check_shards_ready(&mut self) {
        if self.destroyed {
            return;
        }
        if matches!(self.state.client_status(), Status::Ready | Status::Nearly) {
            return;
        }
        if !self.state.all_shards_ready() {
            return;
        }

        self.state.set_client_status(Status::Nearly);
        match (&self.warmup, self.config.fetch_all_members) {
            (Some(warmup), true) => {
                info!("All shards ready, warming members");
                let warmup = Arc::clone(warmup);
                self.background
                    .push(Box::pin(async move { Background::Warmup(warmup.warm().await) }));
            }
            _ => self.trigger_ready(),
        }
    }

    fn trigger_ready(&mut self) {
        self.state.set_client_status(Status::Ready);
        info!(
            shards = self.state.shard_count(),
            queued_packets = self.packets.len(),
            "Client ready"
        );
        self.emit(ClientEvent::Ready);
    }

    fn on_timer(&mut self, timer: ManagerTimer) {
        match timer {
            ManagerTimer::SessionReset => self.spawn_next(),
            ManagerTimer::SpawnDelay | ManagerTimer::Backoff => self.begin_spawn(false),
        }
    }

    fn on_background(&mut self, done: Background) {
        match done {
            Background::Bootstrap(result) => {
                if self.destroyed || self.pipeline != Pipeline::Refreshing {
                    return;
                }
                match result {
                    Ok(info) => {
                        self.gateway_url = info.url;
                        self.governor.supply(info.session_start_limit);
                        self.begin_spawn(false);
                    }
                    Err(err) => self.reconnect_failed(err.into()),
                }
            }
            Background::Warmup(result) => {
                if let Err(err) = result {
                    warn!(error = %err, "Member warm-up failed");
                }
                if !self.destroyed {
                    self.trigger_ready();
                }
            }
        }
    }

    fn on_control(&mut self, control: Control) {
        if self.destroyed {
            return;
        }
        match control {
            Control::Send { shard_id, payload } => match self.shards.get(&shard_id) {
                Some(shard) => {
                    let priority = priority_of(&payload);
                    shard.send(ShardCommand::Send { payload, priority });
                }
                None => warn!(shard_id, "Dropping frame for unknown shard"),
            },
            Control::Broadcast(payload) => {
                let priority = priority_of(&payload);
                for shard in self.shards.values() {
                    shard.send(ShardCommand::Send {
                        payload: payload.clone(),
                        priority,
                    });
                }
            }
            Control::Destroy => self.destroy(),
        }
    }

    /// Stop spawning and close every shard for good
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        info!(shards = self.shards.len(), "Destroying manager");
        self.destroyed = true;
        self.queue.clear();
        self.timers.clear_all();
        self.background = FuturesUnordered::new();
        self.pipeline = Pipeline::Idle;
        self.packets.clear();

        for shard in self.shards.values() {
            shard.send(ShardCommand::Destroy(DestroyOptions {
                close_code: codes::NORMAL,
                reset: true,
                emit: false,
            }));
            shard.send(ShardCommand::Shutdown);
        }
        self.state.set_client_status(Status::Destroyed);
    }

    fn drain_packet(&mut self) {
        if let Some((shard_id, frame)) = self.packets.pop(self.state.is_ready()) {
            self.forward(shard_id, frame);
        }
    }

    fn forward(&self, shard_id: u32, frame: GatewayFrame) {
        self.metrics.record_dispatch_routed(shard_id);
        self.emit(ClientEvent::Dispatch { shard_id, frame });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

fn priority_of(frame: &GatewayFrame) -> Priority {
    match frame.opcode() {
        Some(op) if op.is_priority() => Priority::Critical,
        _ => Priority::Normal,
    }
}
