//! Shardline relay
//!
//! Runs every configured shard, publishes dispatches to NATS JetStream and
//! exposes health/ready/metrics endpoints.

use anyhow::Result;
use shardline::config::GatewayConfig;
use shardline::events::{serialize_dispatch, ClientEvent};
use shardline::health::{self, AppState};
use shardline::metrics::GatewayMetrics;
use shardline::nats::NatsPublisher;
use shardline::{HttpBootstrap, Manager, WsConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long shards get to close their sockets after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("shardline={}", gateway_config.log_level).parse()?)
                .add_directive("tokio_tungstenite=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        shards = ?gateway_config.shards,
        "Starting shardline"
    );

    let metrics = GatewayMetrics::install()?;
    info!("Prometheus metrics initialized");

    let nats = match gateway_config.nats_url {
        Some(ref url) => match NatsPublisher::connect(url).await {
            Ok(publisher) => {
                if let Err(e) = publisher.ensure_streams().await {
                    warn!(error = %e, "Could not configure NATS streams");
                }
                metrics.set_nats_connected(true);
                Some(publisher)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS - running in local mode");
                metrics.set_nats_connected(false);
                None
            }
        },
        None => {
            info!("No NATS_URL configured - running in local mode");
            None
        }
    };

    let manager_config = gateway_config.manager_config()?;
    info!(intents = ?manager_config.identify.intents, "Using Discord intents");

    let bootstrap = Arc::new(HttpBootstrap::new(gateway_config.discord_token.clone()));
    let (manager, handle, events) = Manager::new(manager_config, bootstrap, Arc::new(WsConnector));
    let manager = manager.with_metrics(metrics.clone());

    let app_state = AppState {
        state: handle.state().clone(),
        nats: nats.clone(),
        metrics,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();
    info!(port = gateway_config.http_port, "Starting HTTP server");
    let http_server = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        health::router(app_state),
    );

    let relay = tokio::spawn(relay_events(events, nats.clone()));
    let mut manager_task = tokio::spawn(manager.run());

    let finished = tokio::select! {
        result = &mut manager_task => Some(result),
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
            None
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
    };

    info!("Shutting down gateway...");
    handle.destroy();

    let outcome = match finished {
        Some(result) => Some(result),
        None => match tokio::time::timeout(SHUTDOWN_GRACE, &mut manager_task).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("Shards did not close in time");
                manager_task.abort();
                None
            }
        },
    };

    // The manager dropping its event sender ends the relay loop
    if let Err(e) = relay.await {
        warn!(error = %e, "Event relay task failed");
    }
    if let Some(ref nats) = nats {
        nats.close().await;
    }

    match outcome {
        Some(Ok(Err(e))) => {
            error!(error = %e, "Gateway client failed");
            Err(e.into())
        }
        Some(Err(e)) => {
            error!(error = %e, "Manager task panicked");
            Err(e.into())
        }
        _ => {
            info!("Gateway shutdown complete");
            Ok(())
        }
    }
}

/// Log lifecycle events and publish dispatches until the manager stops
async fn relay_events(
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    nats: Option<Arc<NatsPublisher>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Dispatch { shard_id, frame } => {
                let Some(ref nats) = nats else {
                    continue;
                };
                if let Some(envelope) = serialize_dispatch(&frame, shard_id) {
                    // The publisher already logs and counts failures
                    let _ = nats.publish_event(&envelope).await;
                }
            }
            ClientEvent::ShardReady {
                shard_id,
                unavailable_guilds,
            } => info!(
                shard_id,
                unavailable_guilds = unavailable_guilds.map_or(0, |guilds| guilds.len()),
                "Shard ready"
            ),
            ClientEvent::ShardResumed { shard_id, replayed } => {
                info!(shard_id, replayed, "Shard resumed")
            }
            ClientEvent::ShardDisconnect { shard_id, close } => {
                warn!(shard_id, close_code = close.code, reason = %close.reason, "Shard disconnected")
            }
            ClientEvent::ShardReconnecting { shard_id } => info!(shard_id, "Shard reconnecting"),
            ClientEvent::ShardError { shard_id, error } => warn!(shard_id, error = %error, "Shard error"),
            ClientEvent::Ready => info!("All shards ready"),
            ClientEvent::Invalidated => error!("Session invalidated, token is no longer valid"),
            ClientEvent::Raw { shard_id, frame } => debug!(shard_id, op = frame.op, "Raw frame"),
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
