//! Cache correctness: single fetch per definition, per-key single-flight,
//! LRU eviction order, TTL expiry, and failure handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use exttask_relay::config::CacheSettings;
use exttask_relay::metadata::MetadataCache;

use common::{bpmn_with_property, definitions_with, ScriptedDefinitions};

fn settings(max_entries: usize, ttl_seconds: u64) -> CacheSettings {
    CacheSettings {
        max_entries,
        ttl_seconds,
    }
}

#[tokio::test]
async fn first_get_fetches_once_then_serves_from_cache() {
    let definitions = definitions_with("P1", bpmn_with_property("Act_1", "region", "east"));
    let cache = MetadataCache::new(definitions.clone(), &settings(10, 3600));

    let metadata = cache.get("P1", "Act_1").await;
    assert_eq!(metadata.extension_properties["region"], "east");
    assert_eq!(definitions.fetch_count("P1"), 1);

    // Any activity of the same definition, zero further fetches
    for _ in 0..5 {
        let again = cache.get("P1", "Act_1").await;
        assert_eq!(again.extension_properties["region"], "east");
        let other = cache.get("P1", "Act_unknown").await;
        assert!(other.is_empty());
    }
    assert_eq!(definitions.fetch_count("P1"), 1);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 10);
    assert!(stats.hit_rate > 0.9);
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let definitions = Arc::new({
        let d = ScriptedDefinitions::new().with_delay(Duration::from_millis(50));
        d.insert("P2", bpmn_with_property("Act_1", "region", "east"));
        d
    });
    let cache = Arc::new(MetadataCache::new(
        definitions.clone(),
        &settings(10, 3600),
    ));

    // Many tasks of one previously-unseen process arriving simultaneously
    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(
            async move { cache.get("P2", "Act_1").await },
        ));
    }
    for handle in handles {
        let metadata = handle.await.unwrap();
        assert_eq!(metadata.extension_properties["region"], "east");
    }

    assert_eq!(
        definitions.fetch_count("P2"),
        1,
        "concurrent misses must not start a fetch storm"
    );
}

#[tokio::test]
async fn lru_eviction_picks_oldest_access() {
    let definitions = ScriptedDefinitions::new();
    for def in ["P1", "P2", "P3"] {
        definitions.insert(def, bpmn_with_property("Act_1", "def", def));
    }
    let definitions = Arc::new(definitions);
    let cache = MetadataCache::new(definitions.clone(), &settings(2, 3600));

    cache.get("P1", "Act_1").await;
    cache.get("P2", "Act_1").await;
    // Touch P1 so P2 is the least recently used when P3 arrives
    cache.get("P1", "Act_1").await;
    cache.get("P3", "Act_1").await;

    assert_eq!(cache.stats().resident_entries, 2);
    assert_eq!(cache.stats().evictions, 1);

    // P1 survived, P2 was evicted
    cache.get("P1", "Act_1").await;
    assert_eq!(definitions.fetch_count("P1"), 1);
    cache.get("P2", "Act_1").await;
    assert_eq!(definitions.fetch_count("P2"), 2);
}

#[tokio::test]
async fn ttl_expiry_triggers_fresh_fetch() {
    let definitions = definitions_with("P1", bpmn_with_property("Act_1", "region", "east"));
    let cache = MetadataCache::new(definitions.clone(), &settings(10, 1));

    cache.get("P1", "Act_1").await;
    assert_eq!(definitions.fetch_count("P1"), 1);

    // Within the TTL window: still a hit
    cache.get("P1", "Act_1").await;
    assert_eq!(definitions.fetch_count("P1"), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let metadata = cache.get("P1", "Act_1").await;
    assert_eq!(metadata.extension_properties["region"], "east");
    assert_eq!(
        definitions.fetch_count("P1"),
        2,
        "stale entry must be replaced, not served"
    );
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test]
async fn fetch_failure_serves_empty_and_is_not_cached() {
    let definitions = Arc::new(ScriptedDefinitions::failing());
    let cache = MetadataCache::new(definitions.clone(), &settings(10, 3600));

    assert!(cache.get("P1", "Act_1").await.is_empty());
    assert!(cache.get("P1", "Act_1").await.is_empty());

    // Each access retried the fetch; nothing resident
    assert_eq!(definitions.fetch_count("P1"), 2);
    assert_eq!(cache.stats().resident_entries, 0);
    assert_eq!(cache.stats().fetch_failures, 2);
}

#[tokio::test]
async fn unparseable_document_caches_empty_entry() {
    let definitions = definitions_with("P1", "<definitions><serviceTask id=".to_string());
    let cache = MetadataCache::new(definitions.clone(), &settings(10, 3600));

    assert!(cache.get("P1", "Act_1").await.is_empty());
    assert!(cache.get("P1", "Act_1").await.is_empty());

    // The broken document is not refetched on every access
    assert_eq!(definitions.fetch_count("P1"), 1);
    assert_eq!(cache.stats().resident_entries, 1);
}

#[tokio::test]
async fn resident_count_never_exceeds_bound() {
    let definitions = ScriptedDefinitions::new();
    for i in 0..20 {
        definitions.insert(&format!("P{i}"), bpmn_with_property("Act_1", "n", &i.to_string()));
    }
    let definitions = Arc::new(definitions);
    let cache = MetadataCache::new(definitions.clone(), &settings(5, 3600));

    for i in 0..20 {
        cache.get(&format!("P{i}"), "Act_1").await;
        assert!(cache.stats().resident_entries <= 5);
    }
    assert_eq!(cache.stats().evictions, 15);
}

mod eviction_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// The resident bound holds for arbitrary access orders, and every
        /// access sequence ends with the most recently used keys resident.
        #[test]
        fn bound_holds_for_arbitrary_access_sequences(
            sequence in proptest::collection::vec(0usize..12, 1..60)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let definitions = ScriptedDefinitions::new();
                for i in 0..12 {
                    definitions.insert(
                        &format!("P{i}"),
                        bpmn_with_property("Act_1", "n", &i.to_string()),
                    );
                }
                let definitions = Arc::new(definitions);
                let cache = MetadataCache::new(definitions, &settings(4, 3600));

                for index in &sequence {
                    cache.get(&format!("P{index}"), "Act_1").await;
                    prop_assert!(cache.stats().resident_entries <= 4);
                }

                // The most recent distinct key is always still resident
                let last = sequence[sequence.len() - 1];
                let fetches_before = cache.stats().fetches;
                cache.get(&format!("P{last}"), "Act_1").await;
                prop_assert_eq!(cache.stats().fetches, fetches_before);
                Ok(())
            })?;
        }
    }
}
