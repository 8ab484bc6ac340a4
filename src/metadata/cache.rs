//! # Metadata Cache
//!
//! Bounded, time-limited cache of per-definition activity metadata. One
//! entry covers every activity of a definition, so a single structural
//! document fetch amortizes across all external tasks of that process.
//!
//! Concurrency: the entry table sits behind one mutex that is never held
//! across a network round trip; a per-definition guard serializes the
//! fetch-and-parse for one key so simultaneous misses cannot start a storm
//! of identical document fetches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::engine::DefinitionSource;
use super::parser::{parse_definition, ActivityMetadata};

struct CacheEntry {
    activities: Arc<HashMap<String, ActivityMetadata>>,
    inserted_at: Instant,
    last_access: Instant,
    size_bytes: usize,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
}

/// Point-in-time cache statistics for the status report.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub resident_entries: usize,
    pub resident_bytes: usize,
    pub hit_rate: f64,
}

pub struct MetadataCache {
    source: Arc<dyn DefinitionSource>,
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    counters: CacheCounters,
}

impl MetadataCache {
    pub fn new(source: Arc<dyn DefinitionSource>, settings: &CacheSettings) -> Self {
        Self {
            source,
            max_entries: settings.max_entries,
            ttl: settings.ttl(),
            entries: Mutex::new(HashMap::new()),
            inflight: DashMap::new(),
            counters: CacheCounters::default(),
        }
    }

    /// Metadata for one activity of one process definition.
    ///
    /// Never fails: a fetch or parse problem degrades to empty metadata so
    /// dispatch keeps flowing. A parse failure is cached (the document will
    /// not get better by refetching); a fetch failure is not, so the next
    /// access retries.
    pub async fn get(&self, process_definition_id: &str, activity_id: &str) -> ActivityMetadata {
        if let Some(activities) = self.lookup(process_definition_id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return activities.get(activity_id).cloned().unwrap_or_default();
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        // Per-key guard: at most one authoritative fetch per definition.
        // Waiters re-check the table once the winner has populated it.
        let guard = self
            .inflight
            .entry(process_definition_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _held = guard.lock().await;

        if let Some(activities) = self.lookup(process_definition_id) {
            return activities.get(activity_id).cloned().unwrap_or_default();
        }

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let activities = match self.source.fetch_definition_xml(process_definition_id).await {
            Ok(xml) => match parse_definition(&xml) {
                Ok(activities) => activities,
                Err(e) => {
                    warn!(
                        process_definition_id,
                        error = %e,
                        "Structural document unparseable; caching empty entry"
                    );
                    HashMap::new()
                }
            },
            Err(e) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    process_definition_id,
                    error = %e,
                    "Structural document fetch failed; serving empty metadata"
                );
                self.inflight.remove(process_definition_id);
                return ActivityMetadata::default();
            }
        };

        let result = activities.get(activity_id).cloned().unwrap_or_default();
        self.insert(process_definition_id, activities);
        self.inflight.remove(process_definition_id);
        result
    }

    /// Fresh-entry lookup; a stale entry is dropped and reported as a miss.
    fn lookup(&self, process_definition_id: &str) -> Option<Arc<HashMap<String, ActivityMetadata>>> {
        let mut entries = self.entries.lock();
        let expired = match entries.get_mut(process_definition_id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                entry.last_access = Instant::now();
                return Some(entry.activities.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(process_definition_id);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(process_definition_id, "Cache entry expired");
        }
        None
    }

    fn insert(&self, process_definition_id: &str, activities: HashMap<String, ActivityMetadata>) {
        let size_bytes = serde_json::to_vec(&activities).map(|b| b.len()).unwrap_or(0);
        let now = Instant::now();
        let entry = CacheEntry {
            activities: Arc::new(activities),
            inserted_at: now,
            last_access: now,
            size_bytes,
        };

        let mut entries = self.entries.lock();
        entries.insert(process_definition_id.to_string(), entry);

        while entries.len() > self.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    entries.remove(&key);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(process_definition_id = %key, "Evicted least-recently-used entry");
                }
                None => break,
            }
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let (resident_entries, resident_bytes) = {
            let entries = self.entries.lock();
            (entries.len(), entries.values().map(|e| e.size_bytes).sum())
        };
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            resident_entries,
            resident_bytes,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
