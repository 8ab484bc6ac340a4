//! # Process Metadata Layer
//!
//! Extracts per-activity metadata from process-definition structural
//! documents and serves it from a bounded, time-limited cache shared by all
//! topic workers.

pub mod cache;
pub mod parser;

use thiserror::Error;

pub use cache::{CacheStatsSnapshot, MetadataCache};
pub use parser::{parse_definition, ActivityInfo, ActivityMetadata};

#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("Structural document parse error: {0}")]
    Parse(String),
}

pub type MetadataResult<T> = Result<T, MetadataError>;
