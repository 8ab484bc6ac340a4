//! # Worker Pool
//!
//! Owns every topic worker's lifecycle: starts them together against the
//! shared cache and publisher, and stops them cooperatively with a bounded
//! timeout. A worker that does not stop in time is logged and aborted; the
//! process still exits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::PayloadPublisher;
use crate::config::RelayConfig;
use crate::engine::TaskSource;
use crate::metadata::MetadataCache;
use super::topic_worker::{TopicWorker, WorkerStatus};

pub struct WorkerPool {
    workers: Vec<Arc<TopicWorker>>,
    handles: Vec<(String, JoinHandle<()>)>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Build one worker per configured topic. All workers share the task
    /// source (tenant-filtered engine client), the metadata cache, and the
    /// publisher.
    pub fn new(
        config: &RelayConfig,
        source: Arc<dyn TaskSource>,
        cache: Arc<MetadataCache>,
        publisher: Arc<dyn PayloadPublisher>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let workers = config
            .topics
            .iter()
            .map(|topic| {
                Arc::new(TopicWorker::new(
                    topic.clone(),
                    config.engine.worker_id.clone(),
                    config.fetch.max_tasks,
                    config.fetch.poll_timeout_ms,
                    config.lock_duration_ms(topic),
                    config.fetch_backoff(),
                    source.clone(),
                    cache.clone(),
                    publisher.clone(),
                ))
            })
            .collect();

        Self {
            workers,
            handles: Vec::new(),
            shutdown_tx,
        }
    }

    /// Spawn every worker's fetch loop.
    pub fn start(&mut self) {
        for worker in &self.workers {
            let handle = tokio::spawn(worker.clone().run(self.shutdown_tx.subscribe()));
            self.handles.push((worker.topic_name().to_string(), handle));
        }
        info!(workers = self.handles.len(), "✅ Worker pool started");
    }

    /// A shutdown receiver for components outside the pool (the response
    /// consumer, the status loop) that stop on the same signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(|w| w.status()).collect()
    }

    /// Worker handles for status reporting that outlives the pool value
    /// (the pool is consumed by [`WorkerPool::shutdown`]).
    pub fn workers(&self) -> Vec<Arc<TopicWorker>> {
        self.workers.clone()
    }

    /// Signal every worker to stop and wait up to `timeout` for all of them.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("🛑 Worker pool shutting down");
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + timeout;
        for (topic, mut handle) in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(topic = %topic, error = %e, "Worker task panicked"),
                Err(_) => {
                    warn!(topic = %topic, "Worker did not stop in time, forcing");
                    handle.abort();
                }
            }
        }
        info!("✅ Worker pool shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerResult;
    use crate::config::RelayConfig;
    use crate::engine::{
        DefinitionSource, EngineError, EngineResult, ExternalTask, FetchAndLockRequest,
    };
    use crate::messages::EnrichedPayload;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const POOL_YAML: &str = r#"
engine:
  base_url: "http://engine:8080/engine-rest"
  worker_id: "relay-test"
fetch:
  backoff_ms: 5
  poll_timeout_ms: 10
topics:
  - name: create_task
  - name: notify
broker:
  url: "amqp://broker:5672/%2F"
"#;

    struct NullDefinitions;

    #[async_trait]
    impl DefinitionSource for NullDefinitions {
        async fn fetch_definition_xml(&self, _id: &str) -> EngineResult<String> {
            Err(EngineError::Transport("no engine in tests".into()))
        }
    }

    /// One task for `create_task` on first call, then idles; `notify`
    /// always fails with a transport error.
    struct SplitSource {
        served: Mutex<bool>,
    }

    #[async_trait]
    impl crate::engine::TaskSource for SplitSource {
        async fn fetch_and_lock(
            &self,
            request: &FetchAndLockRequest,
        ) -> EngineResult<Vec<ExternalTask>> {
            let topic = request.topics[0].topic_name.as_str();
            if topic == "notify" {
                return Err(EngineError::Transport("simulated outage".into()));
            }
            let already_served = {
                let mut served = self.served.lock();
                if *served {
                    true
                } else {
                    *served = true;
                    false
                }
            };
            if already_served {
                tokio::time::sleep(Duration::from_millis(5)).await;
                return Ok(vec![]);
            }
            Ok(vec![ExternalTask {
                id: "t-1".to_string(),
                topic_name: "create_task".to_string(),
                process_instance_id: None,
                process_definition_id: None,
                activity_id: None,
                business_key: None,
                tenant_id: None,
                variables: Default::default(),
                lock_expiration_time: None,
                retries: None,
                worker_id: None,
            }])
        }
    }

    struct CollectingPublisher(Mutex<Vec<String>>);

    #[async_trait]
    impl PayloadPublisher for CollectingPublisher {
        async fn publish(&self, _topic: &str, payload: &EnrichedPayload) -> BrokerResult<()> {
            self.0.lock().push(payload.id.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn faulty_topic_does_not_block_healthy_topic() {
        let config: RelayConfig = serde_yaml::from_str(POOL_YAML).unwrap();
        let cache = Arc::new(MetadataCache::new(
            Arc::new(NullDefinitions),
            &config.cache,
        ));
        let publisher = Arc::new(CollectingPublisher(Mutex::new(vec![])));
        let source = Arc::new(SplitSource {
            served: Mutex::new(false),
        });

        let mut pool = WorkerPool::new(&config, source, cache, publisher.clone());
        pool.start();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let statuses = pool.status();
        let notify = statuses.iter().find(|s| s.topic == "notify").unwrap();
        assert!(notify.fetch_errors > 0, "faulty topic should be erroring");

        pool.shutdown(Duration::from_secs(1)).await;

        // The healthy topic dispatched despite the other topic's outage
        assert_eq!(publisher.0.lock().as_slice(), ["t-1"]);
    }
}
