//! # Response Consumer
//!
//! Independently-scheduled loop draining the completion queue and turning
//! each report into a complete/bpmn-error/failure call against the engine.
//! Fully decoupled from the fetch loops: a stalled topic worker never delays
//! a completion, and vice versa.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerConnection, BrokerPublisher};
use crate::config::ConsumerConfig;
use crate::engine::{
    BpmnErrorRequest, CompleteRequest, CompletionApi, EngineError, FailureRequest,
};
use crate::messages::{ResponseMessage, ResponseOutcome};

/// What to do with a delivery once its report has been applied (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Applied, or idempotent no-op: acknowledge and move on
    Ack,
    /// Transient engine trouble outlasted the retry budget: redeliver later
    Requeue,
    /// Unusable or permanently rejected: route to the error destination
    DeadLetter,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStats {
    pub consumed: u64,
    pub completed: u64,
    pub bpmn_errors: u64,
    pub failures: u64,
    pub idempotent_skips: u64,
    pub malformed: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    consumed: AtomicU64,
    completed: AtomicU64,
    bpmn_errors: AtomicU64,
    failures: AtomicU64,
    idempotent_skips: AtomicU64,
    malformed: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Applies one completion report to the engine with a bounded retry budget.
/// Split from the queue plumbing so the outcome routing and idempotency
/// rules are testable without a broker.
struct ReportApplier {
    engine: Arc<dyn CompletionApi>,
    config: ConsumerConfig,
    worker_id: String,
    counters: Counters,
}

impl ReportApplier {
    /// Already-gone tasks are an idempotent no-op, never a fault.
    async fn dispose(&self, message: &ResponseMessage) -> Disposition {
        let mut attempt = 0;
        loop {
            match self.apply(message).await {
                Ok(()) => return Disposition::Ack,
                Err(EngineError::TaskGone { task_id }) => {
                    self.counters.idempotent_skips.fetch_add(1, Ordering::Relaxed);
                    info!(
                        task_id = %task_id,
                        outcome = ?message.outcome,
                        "Task already completed or unlocked; skipping duplicate report"
                    );
                    return Disposition::Ack;
                }
                Err(e) if e.is_transient() => {
                    if attempt >= self.config.completion_max_retries {
                        warn!(
                            task_id = %message.task_id,
                            attempts = attempt + 1,
                            error = %e,
                            "Completion retries exhausted, requeueing report"
                        );
                        return Disposition::Requeue;
                    }
                    let delay = Duration::from_millis(500 << attempt.min(6));
                    warn!(
                        task_id = %message.task_id,
                        retry = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient engine error applying report, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        task_id = %message.task_id,
                        outcome = ?message.outcome,
                        error = %e,
                        "Engine permanently rejected completion report"
                    );
                    return Disposition::DeadLetter;
                }
            }
        }
    }

    async fn apply(&self, message: &ResponseMessage) -> Result<(), EngineError> {
        let worker_id = message
            .worker_id
            .clone()
            .unwrap_or_else(|| self.worker_id.clone());

        match message.outcome {
            ResponseOutcome::Success => {
                self.engine
                    .complete(
                        &message.task_id,
                        &CompleteRequest {
                            worker_id,
                            variables: message.variables.clone(),
                        },
                    )
                    .await?;
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %message.task_id, "Task completed");
            }
            ResponseOutcome::BusinessError => {
                let error_code = message
                    .error_code
                    .clone()
                    .unwrap_or_else(|| "BUSINESS_ERROR".to_string());
                self.engine
                    .handle_bpmn_error(
                        &message.task_id,
                        &BpmnErrorRequest {
                            worker_id,
                            error_code,
                            error_message: message.error_message.clone(),
                            variables: message.variables.clone(),
                        },
                    )
                    .await?;
                self.counters.bpmn_errors.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %message.task_id, "Business error propagated");
            }
            ResponseOutcome::TechnicalError => {
                self.engine
                    .handle_failure(
                        &message.task_id,
                        &FailureRequest {
                            worker_id,
                            error_message: message
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "technical error".to_string()),
                            error_details: message.error_details.clone(),
                            retries: message
                                .retries
                                .unwrap_or(self.config.default_failure_retries)
                                .max(0),
                            retry_timeout: message
                                .retry_timeout_ms
                                .unwrap_or(self.config.default_failure_retry_timeout_ms),
                        },
                    )
                    .await?;
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %message.task_id, "Technical failure reported");
            }
        }
        Ok(())
    }
}

pub struct ResponseConsumer {
    connection: Arc<BrokerConnection>,
    publisher: Arc<BrokerPublisher>,
    applier: ReportApplier,
}

impl ResponseConsumer {
    pub fn new(
        connection: Arc<BrokerConnection>,
        publisher: Arc<BrokerPublisher>,
        engine: Arc<dyn CompletionApi>,
        config: ConsumerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            connection,
            publisher,
            applier: ReportApplier {
                engine,
                config,
                worker_id,
                counters: Counters::default(),
            },
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        let c = &self.applier.counters;
        ConsumerStats {
            consumed: c.consumed.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            bpmn_errors: c.bpmn_errors.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            idempotent_skips: c.idempotent_skips.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            requeued: c.requeued.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Consume the response queue until shutdown. Connection loss re-enters
    /// the outer loop, which picks up the shared reconnect backoff.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.connection.response_queue(),
            "🔄 Response consumer started"
        );

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }

            let channel = match self.connection.channel().await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(error = %e, "Response consumer waiting for broker");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            let mut consumer = match channel
                .basic_consume(
                    self.connection.response_queue(),
                    "exttask-relay-responses",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => consumer,
                Err(e) => {
                    warn!(error = %e, "Failed to open response consumer, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    delivery = consumer.next() => match delivery {
                        Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                        Some(Err(e)) => {
                            warn!(error = %e, "Response stream error, reconnecting");
                            continue 'outer;
                        }
                        None => {
                            warn!("Response stream closed, reconnecting");
                            continue 'outer;
                        }
                    },
                    _ = shutdown.changed() => break 'outer,
                }
            }
        }

        info!(stats = ?self.stats(), "Response consumer stopped");
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        self.applier.counters.consumed.fetch_add(1, Ordering::Relaxed);

        let disposition = match serde_json::from_slice::<ResponseMessage>(&delivery.data) {
            Ok(message) => self.applier.dispose(&message).await,
            Err(e) => {
                self.applier.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Malformed response message, routing to error queue");
                Disposition::DeadLetter
            }
        };
        self.finish(delivery, disposition).await;
    }

    async fn finish(&self, delivery: Delivery, disposition: Disposition) {
        match disposition {
            Disposition::Ack => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(error = %e, "Failed to ack response message");
                }
            }
            Disposition::Requeue => {
                self.applier.counters.requeued.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                {
                    warn!(error = %e, "Failed to nack response message");
                }
            }
            Disposition::DeadLetter => {
                match self
                    .publisher
                    .publish_to_queue(self.connection.error_queue(), &delivery.data)
                    .await
                {
                    Ok(()) => {
                        self.applier
                            .counters
                            .dead_lettered
                            .fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(error = %e, "Failed to ack dead-lettered message");
                        }
                    }
                    Err(e) => {
                        // Could not park it; give it back to the queue
                        error!(error = %e, "Failed to route message to error queue");
                        if let Err(e) = delivery
                            .nack(BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            })
                            .await
                        {
                            warn!(error = %e, "Failed to nack response message");
                        }
                    }
                }
            }
        }
    }
}
