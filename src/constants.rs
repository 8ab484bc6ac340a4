//! # System Constants
//!
//! Default operational boundaries of the relay. Every value here is a
//! fallback for a configuration option; nothing reads these directly except
//! the config defaults.

use std::time::Duration;

/// Default lock duration requested per fetched task.
///
/// The relay is stateless once a task is dispatched: completion arrives out
/// of band through the response queue, so the lease is sized to effectively
/// never expire under normal operation (30 days). Operators can lower this
/// per topic when they want abandoned tasks to become reclaimable sooner.
pub const DEFAULT_LOCK_DURATION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Default maximum tasks claimed per fetch-and-lock round.
pub const DEFAULT_FETCH_BATCH_SIZE: u32 = 10;

/// Default server-side long-poll timeout for fetch-and-lock.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;

/// Default sleep between fetch rounds after a transient engine failure.
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_secs(5);

/// Default engine HTTP request timeout. Must stay above the long-poll
/// timeout or every idle fetch round reports a spurious transport error.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 45_000;

/// Metadata cache defaults: resident definitions and entry time-to-live.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Broker reconnect backoff bounds.
pub const DEFAULT_RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Attempts before broker connection failure at startup becomes fatal.
pub const DEFAULT_CONNECT_MAX_RETRIES: u32 = 5;

/// Default AMQP heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_SECONDS: u16 = 30;

/// Default consumer prefetch for the response queue.
pub const DEFAULT_PREFETCH_COUNT: u16 = 16;

/// Default broker topology names.
pub const DEFAULT_TASK_EXCHANGE: &str = "exttask.tasks";
pub const DEFAULT_ALTERNATE_EXCHANGE: &str = "exttask.unrouted";
pub const DEFAULT_CATCHALL_QUEUE: &str = "exttask.catchall";
pub const DEFAULT_RESPONSE_QUEUE: &str = "exttask.responses";
pub const DEFAULT_ERROR_QUEUE: &str = "exttask.errors";

/// Bound on waiting for workers to reach their terminal state at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Retries for engine completion calls before a response message is
/// returned to the queue.
pub const DEFAULT_COMPLETION_MAX_RETRIES: u32 = 3;

/// Interval between periodic status reports.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(60);
