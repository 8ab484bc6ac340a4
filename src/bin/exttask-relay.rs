//! # exttask-relay service binary
//!
//! Wires the engine client, broker, metadata cache, worker pool, and
//! response consumer together and runs until SIGINT/SIGTERM. Fatal
//! configuration or startup-connectivity problems exit non-zero; everything
//! after startup degrades and retries instead of terminating.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use exttask_relay::broker::{BrokerConnection, BrokerPublisher, PayloadPublisher};
use exttask_relay::config::RelayConfig;
use exttask_relay::consumer::ResponseConsumer;
use exttask_relay::engine::{CompletionApi, DefinitionSource, EngineClient, TaskSource, TenantFilter};
use exttask_relay::error::RelayResult;
use exttask_relay::health::StatusReport;
use exttask_relay::logging;
use exttask_relay::metadata::MetadataCache;
use exttask_relay::worker::WorkerPool;

#[derive(Parser)]
#[command(name = "exttask-relay")]
#[command(about = "External-task relay between a BPMN engine and an AMQP broker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the relay configuration file
    #[arg(short, long, default_value = "config/relay.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    validate_only: bool,
}

#[tokio::main]
async fn main() {
    logging::init_structured_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "💥 Fatal error, exiting");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> RelayResult<()> {
    let config = RelayConfig::load(&cli.config)?;
    info!(
        environment = %logging::detect_environment(),
        config = %serde_json::to_string(&config.sanitized()).unwrap_or_default(),
        "Configuration loaded"
    );

    if cli.validate_only {
        info!("Configuration OK");
        return Ok(());
    }

    // Engine must be reachable before anything starts
    let engine = Arc::new(EngineClient::new(&config.engine)?);
    let engine_version = engine.probe().await?;
    info!(engine_version = %engine_version, "✅ Engine reachable");

    // Broker connection is shared by all publishers and the consumer
    let broker = Arc::new(BrokerConnection::connect(config.broker.clone(), &config.topics).await?);
    let publisher = Arc::new(BrokerPublisher::new(broker.clone()));

    let definition_source: Arc<dyn DefinitionSource> = engine.clone();
    let cache = Arc::new(MetadataCache::new(definition_source, &config.cache));
    let tenant_filter = Arc::new(TenantFilter::new(
        (*engine).clone(),
        config.tenant_id.clone(),
    ));
    if let Some(tenant) = &config.tenant_id {
        info!(tenant_id = %tenant, "Client-side tenant filtering enabled");
    }

    let task_source: Arc<dyn TaskSource> = tenant_filter.clone();
    let payload_publisher: Arc<dyn PayloadPublisher> = publisher.clone();
    let mut pool = WorkerPool::new(&config, task_source, cache.clone(), payload_publisher);

    let completion_api: Arc<dyn CompletionApi> = engine.clone();
    let consumer = Arc::new(ResponseConsumer::new(
        broker.clone(),
        publisher.clone(),
        completion_api,
        config.consumer.clone(),
        config.engine.worker_id.clone(),
    ));

    pool.start();
    let consumer_handle = tokio::spawn(consumer.clone().run(pool.shutdown_signal()));
    let status_handle = tokio::spawn(status_loop(
        config.status_interval(),
        pool.workers(),
        cache.clone(),
        broker.clone(),
        publisher.clone(),
        consumer.clone(),
        tenant_filter.clone(),
        pool.shutdown_signal(),
    ));

    wait_for_termination().await;
    info!("🛑 Termination signal received, shutting down");

    // The pool's stop flag is shared with the consumer and status loop
    pool.shutdown(config.shutdown_timeout()).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), consumer_handle).await;
    status_handle.abort();
    broker.close().await;

    info!("✅ Shutdown complete");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn status_loop(
    interval: Duration,
    workers: Vec<Arc<exttask_relay::worker::TopicWorker>>,
    cache: Arc<MetadataCache>,
    broker: Arc<BrokerConnection>,
    publisher: Arc<BrokerPublisher>,
    consumer: Arc<ResponseConsumer>,
    tenant_filter: Arc<TenantFilter<EngineClient>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so startup logs stay clean
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = StatusReport {
                    workers: workers.iter().map(|w| w.status()).collect(),
                    cache: cache.stats(),
                    broker: broker.status().await,
                    publisher: publisher.stats(),
                    consumer: consumer.stats(),
                    tenant_tasks_discarded: tenant_filter.discarded_count(),
                };
                info!(report = %report.to_log_line(), "📊 Status report");
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
