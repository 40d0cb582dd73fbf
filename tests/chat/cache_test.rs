//! Response cache tests. Time is paused so TTL expiry is deterministic.

use std::time::Duration;

use concierge::chat::cache::ResponseCache;

#[tokio::test(start_paused = true)]
async fn hits_match_normalised_questions() {
    let cache = ResponseCache::new(Duration::from_secs(60), 10);
    cache.insert("Do you ship to Bali?", "Yes, we ship across Indonesia.");

    assert_eq!(
        cache.get("  do you SHIP to bali  ").as_deref(),
        Some("Yes, we ship across Indonesia.")
    );
    assert_eq!(cache.get("Do you ship to Java?"), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_ttl() {
    let cache = ResponseCache::new(Duration::from_secs(60), 10);
    cache.insert("return policy", "30 days.");

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.get("return policy").is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.get("return policy"), None);
    // The lookup evicted the stale entry.
    assert_eq!(cache.stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn purge_removes_only_expired_entries() {
    let cache = ResponseCache::new(Duration::from_secs(60), 10);
    cache.insert("old question", "old answer");
    tokio::time::advance(Duration::from_secs(45)).await;
    cache.insert("new question", "new answer");
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.stats().entries, 1);
    assert!(cache.get("new question").is_some());
}

#[tokio::test(start_paused = true)]
async fn full_cache_evicts_oldest_entry() {
    let cache = ResponseCache::new(Duration::from_secs(600), 2);
    cache.insert("first", "1");
    tokio::time::advance(Duration::from_secs(1)).await;
    cache.insert("second", "2");
    tokio::time::advance(Duration::from_secs(1)).await;
    cache.insert("third", "3");

    assert_eq!(cache.stats().entries, 2);
    assert_eq!(cache.get("first"), None);
    assert!(cache.get("second").is_some());
    assert!(cache.get("third").is_some());

    // Re-inserting an existing key does not evict anything.
    cache.insert("third", "3b");
    assert_eq!(cache.get("third").as_deref(), Some("3b"));
    assert!(cache.get("second").is_some());
}

#[tokio::test]
async fn clear_keeps_counters() {
    let cache = ResponseCache::new(Duration::from_secs(60), 10);
    cache.insert("q", "a");
    assert!(cache.get("q").is_some());
    cache.clear();
    assert_eq!(cache.get("q"), None);
    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn unkeyable_questions_are_ignored() {
    let cache = ResponseCache::new(Duration::from_secs(60), 10);
    cache.insert("???", "nothing");
    cache.insert(&"long ".repeat(100), "too specific");
    assert_eq!(cache.stats().entries, 0);
}
