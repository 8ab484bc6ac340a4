//! Error types for the relay.
//!
//! Subsystem errors (`EngineError`, `BrokerError`, `MetadataError`) live next
//! to the code that raises them; this module defines the crate-level error
//! that the binary and the component wiring work with.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::engine::EngineError;
use crate::metadata::MetadataError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Consumer error: {0}")]
    Consumer(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::Consumer(format!("JSON serialization error: {error}"))
    }
}

pub type RelayResult<T> = anyhow::Result<T, RelayError>;
