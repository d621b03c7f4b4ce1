//! NATS event publisher
//!
//! Publishes relay envelopes to JetStream, one subject per event type.

use crate::error::GatewayError;
use crate::events::GatewayEvent;
use async_nats::jetstream::{self, Context as JsContext};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stream names
pub mod streams {
    /// Slash command interactions
    pub const COMMANDS: &str = "COMMANDS";
    /// Every other dispatch
    pub const EVENTS: &str = "EVENTS";
}

/// Subject prefixes for routing
pub mod subjects {
    /// Interactions: commands.interaction
    pub const COMMANDS: &str = "commands";
    /// Dispatches: events.{event_type}
    pub const EVENTS: &str = "events";
}

/// Subject an envelope is published on
///
/// Interactions go to the command stream; everything else lands under
/// `events.` with the dotted event type kept as subject tokens.
pub fn route_event(event: &GatewayEvent) -> String {
    match event.event_type.as_str() {
        "interaction.create" => format!("{}.interaction", subjects::COMMANDS),
        other => format!("{}.{}", subjects::EVENTS, other),
    }
}

/// NATS publisher for gateway events
pub struct NatsPublisher {
    jetstream: JsContext,
    connected: AtomicBool,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl NatsPublisher {
    /// Connect to NATS server
    pub async fn connect(servers: &str) -> Result<Arc<Self>, GatewayError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| GatewayError::NatsConnectionFailed(Box::new(e)))?;

        let jetstream = jetstream::new(client);

        info!("Connected to NATS JetStream");

        Ok(Arc::new(Self {
            jetstream,
            connected: AtomicBool::new(true),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Publish a gateway event to its subject and wait for the stream ack
    pub async fn publish_event(&self, event: &GatewayEvent) -> Result<(), GatewayError> {
        let subject = route_event(event);
        let payload =
            serde_json::to_vec(event).map_err(|source| GatewayError::SerializationFailed {
                event_type: event.event_type.clone(),
                shard_id: event.shard_id,
                source,
            })?;

        debug!(
            event_type = %event.event_type,
            subject,
            event_id = %event.event_id,
            "Publishing event"
        );

        let published = match self.jetstream.publish(subject.clone(), payload.into()).await {
            Ok(ack) => ack.await,
            Err(e) => Err(e),
        };

        match published {
            Ok(ack) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                debug!(subject, stream = %ack.stream, seq = ack.sequence, "Event published");
                Ok(())
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(subject, error = %e, "Failed to publish event");
                Err(GatewayError::NatsPublishFailed {
                    subject,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Ensure streams exist with correct configuration
    pub async fn ensure_streams(&self) -> Result<(), GatewayError> {
        use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};

        let configs = [
            Config {
                name: streams::COMMANDS.to_string(),
                subjects: vec![format!("{}.>", subjects::COMMANDS)],
                retention: RetentionPolicy::Limits,
                max_age: Duration::from_secs(60),
                storage: StorageType::Memory,
                ..Default::default()
            },
            Config {
                name: streams::EVENTS.to_string(),
                subjects: vec![format!("{}.>", subjects::EVENTS)],
                retention: RetentionPolicy::Limits,
                max_age: Duration::from_secs(300),
                storage: StorageType::Memory,
                ..Default::default()
            },
        ];

        for config in configs {
            let name = config.name.clone();
            match self.jetstream.get_or_create_stream(config).await {
                Ok(_) => debug!(stream = %name, "Stream ready"),
                Err(e) => {
                    error!(stream = %name, error = %e, "Failed to create stream");
                    return Err(GatewayError::NatsConnectionFailed(Box::new(e)));
                }
            }
        }

        info!("NATS streams configured");
        Ok(())
    }

    /// Graceful shutdown
    pub async fn close(&self) {
        info!("Closing NATS connection");
        self.connected.store(false, Ordering::SeqCst);
        // async-nats handles cleanup on drop
    }
}
