//! # Topic Workers
//!
//! One independently-scheduled worker per configured topic, plus the pool
//! that owns their lifecycles. Workers never share fetch cursors or locks;
//! the only structure they all touch is the metadata cache.

pub mod pool;
pub mod topic_worker;

pub use pool::WorkerPool;
pub use topic_worker::{TopicWorker, WorkerState, WorkerStatus};
