//! # exttask-relay
//!
//! Task-fetching worker for a BPMN engine's external-task surface. The relay
//! continuously claims work items per configured topic, enriches them with
//! statically-extracted process metadata, and publishes them onto a
//! topic-routed AMQP exchange. On an entirely independent loop it drains a
//! response queue to report completions, business errors, and technical
//! failures back to the engine.
//!
//! ## Architecture
//!
//! - [`engine`]: REST client for fetch-and-lock, completion calls, and
//!   structural document reads, plus the client-side tenant filter
//! - [`metadata`]: BPMN document parsing and the bounded, TTL-limited
//!   per-definition metadata cache shared by all workers
//! - [`broker`]: shared AMQP connection with guarded reconnect, topology
//!   declaration, and the fail-fast topic publisher
//! - [`worker`]: one fetch-lock-dispatch loop per topic and the pool that
//!   owns their lifecycles
//! - [`consumer`]: the response-queue consumer turning completion reports
//!   into engine calls, idempotent under duplicate delivery

pub mod broker;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod messages;
pub mod metadata;
pub mod worker;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
