//! NATS JetStream relay
//!
//! Forwards serialized dispatches to NATS streams.

mod publisher;

pub use publisher::{route_event, streams, subjects, NatsPublisher};
