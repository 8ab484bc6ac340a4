//! # Broker Publisher
//!
//! Publishes enriched payloads onto the topic exchange, routing key = topic.
//! No local buffering: when the connection is down the publish fails fast
//! and the owning worker decides what to do with the still-locked task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use serde::Serialize;
use tracing::debug;

use crate::messages::EnrichedPayload;
use super::connection::BrokerConnection;
use super::{BrokerError, BrokerResult, PayloadPublisher};

#[derive(Debug, Clone, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

pub struct BrokerPublisher {
    connection: Arc<BrokerConnection>,
    published: AtomicU64,
    failed: AtomicU64,
}

impl BrokerPublisher {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self {
            connection,
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn publish_bytes(
        &self,
        exchange: &str,
        routing_key: &str,
        bytes: &[u8],
    ) -> BrokerResult<()> {
        let channel = self.connection.channel().await?;
        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                bytes,
                BasicProperties::default()
                    .with_delivery_mode(2) // persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BrokerError::Publish {
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;

        confirm.await.map_err(|e| BrokerError::Publish {
            routing_key: routing_key.to_string(),
            reason: format!("confirmation failed: {e}"),
        })?;
        Ok(())
    }

    /// Publish directly to a named queue via the default exchange. Used for
    /// routing malformed inbound messages to the error destination.
    pub async fn publish_to_queue(&self, queue: &str, bytes: &[u8]) -> BrokerResult<()> {
        self.publish_bytes("", queue, bytes).await
    }
}

#[async_trait]
impl PayloadPublisher for BrokerPublisher {
    async fn publish(&self, topic: &str, payload: &EnrichedPayload) -> BrokerResult<()> {
        let bytes =
            serde_json::to_vec(payload).map_err(|e| BrokerError::Serialization(e.to_string()))?;

        match self
            .publish_bytes(self.connection.task_exchange(), topic, &bytes)
            .await
        {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    task_id = %payload.id,
                    topic = %topic,
                    bytes = bytes.len(),
                    "Published enriched payload"
                );
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}
