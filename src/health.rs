//! # Status Reporting
//!
//! One serializable snapshot of relay health: worker states, cache and
//! publisher counters, broker connectivity, and consumer throughput. The
//! binary logs it periodically; anything beyond logs is an operator concern
//! outside this crate.

use serde::Serialize;

use crate::broker::{BrokerStatus, PublisherStats};
use crate::consumer::ConsumerStats;
use crate::metadata::CacheStatsSnapshot;
use crate::worker::WorkerStatus;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub workers: Vec<WorkerStatus>,
    pub cache: CacheStatsSnapshot,
    pub broker: BrokerStatus,
    pub publisher: PublisherStats,
    pub consumer: ConsumerStats,
    /// Foreign-tenant tasks discarded by the tenant filter since startup
    pub tenant_tasks_discarded: u64,
}

impl StatusReport {
    /// Compact single-line JSON for the periodic status log.
    pub fn to_log_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
