//! # Broker Layer
//!
//! AMQP connection management and topic-routed publishing. One connection is
//! shared by every worker; reconnection is guarded so concurrent publish
//! attempts never establish duplicate connections, and publish calls fail
//! fast during an outage instead of queueing locally.

pub mod connection;
pub mod publisher;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::EnrichedPayload;

pub use connection::{BrokerConnection, BrokerStatus};
pub use publisher::{BrokerPublisher, PublisherStats};

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("Broker connect failed: {0}")]
    Connect(String),

    /// Reconnect backoff window still open; callers fail fast
    #[error("Broker reconnect pending, next attempt in {retry_in:?}")]
    ReconnectPending { retry_in: Duration },

    #[error("Broker topology declaration failed: {0}")]
    Topology(String),

    #[error("Publish to '{routing_key}' failed: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Broker serialization error: {0}")]
    Serialization(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Publishing seam between workers and the broker. Test doubles record
/// payloads; [`BrokerPublisher`] routes them onto the task exchange.
#[async_trait]
pub trait PayloadPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &EnrichedPayload) -> BrokerResult<()>;
}
