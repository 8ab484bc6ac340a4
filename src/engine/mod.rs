//! # Engine Access Layer
//!
//! REST client for the process engine's external-task surface, the trait
//! seams the rest of the relay works against, and the client-side tenant
//! filter.

pub mod client;
pub mod tenant;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::EngineClient;
pub use tenant::TenantFilter;
pub use types::{
    BpmnErrorRequest, CompleteRequest, ExternalTask, FailureRequest, FetchAndLockRequest,
    FetchTopic, ProcessDefinitionXml, VariableValue,
};

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Network-level failure: connect, timeout, TLS
    #[error("Engine transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status from the engine
    #[error("Engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The task no longer exists or is no longer held by this worker.
    /// Completion calls treat this as an idempotent no-op.
    #[error("Task {task_id} already completed or no longer locked")]
    TaskGone { task_id: String },

    /// Response body could not be decoded
    #[error("Engine response decode error: {0}")]
    Decode(String),

    #[error("Engine client configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Transport(_) => true,
            EngineError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Source of claimable external tasks. Implemented by [`EngineClient`] and by
/// [`TenantFilter`] wrapping any other source.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch_and_lock(&self, request: &FetchAndLockRequest)
        -> EngineResult<Vec<ExternalTask>>;
}

/// Read access to process-definition structural documents.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Fetch the BPMN 2.0 XML for one process definition.
    async fn fetch_definition_xml(&self, process_definition_id: &str) -> EngineResult<String>;
}

/// Completion surface used by the response consumer.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> EngineResult<()>;
    async fn handle_bpmn_error(&self, task_id: &str, request: &BpmnErrorRequest)
        -> EngineResult<()>;
    async fn handle_failure(&self, task_id: &str, request: &FailureRequest) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_5xx_are_transient() {
        assert!(EngineError::Transport("connection refused".into()).is_transient());
        assert!(EngineError::Status {
            status: 503,
            body: "unavailable".into()
        }
        .is_transient());
    }

    #[test]
    fn client_errors_and_task_gone_are_not_transient() {
        assert!(!EngineError::Status {
            status: 400,
            body: "bad request".into()
        }
        .is_transient());
        assert!(!EngineError::TaskGone {
            task_id: "t1".into()
        }
        .is_transient());
    }
}
