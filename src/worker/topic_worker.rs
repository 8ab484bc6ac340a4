//! # Topic Worker
//!
//! Fetch-lock-dispatch loop for one topic. The loop is stateless across
//! rounds: once a task is enriched and published it is never revisited
//! here; completion is entirely the response consumer's responsibility.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::PayloadPublisher;
use crate::config::TopicConfig;
use crate::engine::{ExternalTask, FetchAndLockRequest, FetchTopic, TaskSource};
use crate::messages::EnrichedPayload;
use crate::metadata::{ActivityMetadata, MetadataCache};

/// Loop state: Idle → Fetching → Dispatching → Idle, with Stopping
/// reachable from any point via the shutdown signal and Stopped terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle = 0,
    Fetching = 1,
    Dispatching = 2,
    Stopping = 3,
    Stopped = 4,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Fetching,
            2 => WorkerState::Dispatching,
            3 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Per-worker counters for the status report.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub topic: String,
    pub state: WorkerState,
    pub fetched: u64,
    pub dispatched: u64,
    pub publish_failures: u64,
    pub fetch_errors: u64,
}

pub struct TopicWorker {
    topic: TopicConfig,
    request: FetchAndLockRequest,
    source: Arc<dyn TaskSource>,
    cache: Arc<MetadataCache>,
    publisher: Arc<dyn PayloadPublisher>,
    fetch_backoff: Duration,
    state: AtomicU8,
    fetched: AtomicU64,
    dispatched: AtomicU64,
    publish_failures: AtomicU64,
    fetch_errors: AtomicU64,
}

impl TopicWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: TopicConfig,
        worker_id: String,
        max_tasks: u32,
        poll_timeout_ms: u64,
        lock_duration_ms: u64,
        fetch_backoff: Duration,
        source: Arc<dyn TaskSource>,
        cache: Arc<MetadataCache>,
        publisher: Arc<dyn PayloadPublisher>,
    ) -> Self {
        let request = FetchAndLockRequest {
            worker_id,
            max_tasks,
            async_response_timeout: Some(poll_timeout_ms),
            topics: vec![FetchTopic {
                topic_name: topic.name.clone(),
                lock_duration: lock_duration_ms,
                variables: topic.variables.clone(),
            }],
        };
        Self {
            topic,
            request,
            source,
            cache,
            publisher,
            fetch_backoff,
            state: AtomicU8::new(WorkerState::Idle as u8),
            fetched: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
        }
    }

    pub fn topic_name(&self) -> &str {
        &self.topic.name
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            topic: self.topic.name.clone(),
            state: self.state(),
            fetched: self.fetched.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }

    /// Run the fetch loop until the shutdown flag flips. The fetch call is a
    /// server-side long poll and is allowed to complete naturally; the flag
    /// is re-checked once it returns.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic.name, "🔄 Topic worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(WorkerState::Fetching);
            let tasks = match self.source.fetch_and_lock(&self.request).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    if e.is_transient() {
                        warn!(
                            topic = %self.topic.name,
                            backoff_ms = self.fetch_backoff.as_millis() as u64,
                            error = %e,
                            "Fetch-and-lock failed, backing off"
                        );
                    } else {
                        error!(
                            topic = %self.topic.name,
                            error = %e,
                            "Fetch-and-lock rejected; check worker configuration"
                        );
                    }
                    self.set_state(WorkerState::Idle);
                    // Backoff, woken early by shutdown
                    tokio::select! {
                        _ = tokio::time::sleep(self.fetch_backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            if *shutdown.borrow() {
                // Tasks fetched during shutdown stay locked; their leases
                // are the engine's to reclaim.
                break;
            }

            if !tasks.is_empty() {
                self.set_state(WorkerState::Dispatching);
                self.dispatch(tasks).await;
            }
            self.set_state(WorkerState::Idle);
        }

        self.set_state(WorkerState::Stopping);
        info!(topic = %self.topic.name, status = ?self.status(), "Topic worker stopped");
        self.set_state(WorkerState::Stopped);
    }

    /// Enrich and publish one fetched batch, in fetch-return order. A
    /// publish failure leaves that task locked and moves on to the next.
    async fn dispatch(&self, tasks: Vec<ExternalTask>) {
        self.fetched.fetch_add(tasks.len() as u64, Ordering::Relaxed);
        debug!(
            topic = %self.topic.name,
            batch = tasks.len(),
            "Dispatching fetched batch"
        );

        for task in tasks {
            let metadata = match (&task.process_definition_id, &task.activity_id) {
                (Some(definition_id), Some(activity_id)) => {
                    self.cache.get(definition_id, activity_id).await
                }
                _ => ActivityMetadata::default(),
            };

            let task_id = task.id.clone();
            let payload = EnrichedPayload::from_task(task, metadata);
            match self.publisher.publish(&self.topic.name, &payload).await {
                Ok(()) => {
                    self.dispatched.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.publish_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        task_id = %task_id,
                        topic = %self.topic.name,
                        process_definition_id = payload.process_definition_id.as_deref().unwrap_or(""),
                        error = %e,
                        "Publish failed; task stays locked for operator attention"
                    );
                }
            }
        }
    }
}
