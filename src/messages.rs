//! # Broker Wire Messages
//!
//! The outbound enriched payload handed to the task exchange and the
//! inbound completion report drained from the response queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{ExternalTask, VariableValue};
use crate::metadata::ActivityMetadata;

/// Everything a downstream consumer needs to act on one claimed task:
/// the task itself plus the statically-extracted metadata of its activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPayload {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub variables: HashMap<String, VariableValue>,
    /// Empty object when extraction failed for this activity
    pub metadata: ActivityMetadata,
}

impl EnrichedPayload {
    pub fn from_task(task: ExternalTask, metadata: ActivityMetadata) -> Self {
        Self {
            id: task.id,
            topic: task.topic_name,
            process_instance_id: task.process_instance_id,
            process_definition_id: task.process_definition_id,
            activity_id: task.activity_id,
            business_key: task.business_key,
            tenant_id: task.tenant_id,
            retries: task.retries,
            lock_expiration_time: task.lock_expiration_time,
            variables: task.variables,
            metadata,
        }
    }
}

/// How the downstream consumer reports one task back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseOutcome {
    Success,
    BusinessError,
    TechnicalError,
}

/// A completion report consumed from the response queue.
///
/// Delivery may be duplicated by the broker; consumers of this type must
/// treat a report for an already-finished task as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub outcome: ResponseOutcome,
    /// Output variables written to the process on success
    #[serde(default)]
    pub variables: HashMap<String, VariableValue>,
    /// Error code caught by a BPMN error boundary (business errors)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// Retries remaining after a technical error; `None` lets the relay
    /// decrement the task's current counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timeout_ms: Option<u64>,
}
