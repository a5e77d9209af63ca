//! Integration tests for `RedisCacheStore` using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. Run with `cargo test -p neighborly-redis -- --ignored`.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use neighborly_core::cache::CacheStore;
use neighborly_core::model::ReserveOutcome;
use neighborly_redis::RedisCacheStore;
use std::sync::Arc;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;

/// Starts a Redis container and connects a store to it.
///
/// Returns the container as well so it stays alive for the test.
async fn setup_redis_store() -> (ContainerAsync<Redis>, RedisCacheStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let url = format!("redis://127.0.0.1:{port}");

    let mut retries = 0;
    loop {
        if let Ok(store) = RedisCacheStore::new(&url).await {
            return (container, store);
        }
        assert!(retries < 30, "Failed to connect after {retries} retries");
        retries += 1;
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }
}

async fn seed_item(store: &RedisCacheStore, key: &str, remain: i64) {
    store
        .hash_set(
            key,
            &[
                ("id".to_string(), "1".to_string()),
                ("remain".to_string(), remain.to_string()),
            ],
        )
        .await
        .expect("Failed to seed item");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reserve_outcomes() {
    let (_container, store) = setup_redis_store().await;
    seed_item(&store, "item:1:info", 1).await;

    let first = store
        .reserve("item:1:users", "item:1:info", "10")
        .await
        .expect("reserve");
    let again = store
        .reserve("item:1:users", "item:1:info", "10")
        .await
        .expect("reserve");
    let other = store
        .reserve("item:1:users", "item:1:info", "11")
        .await
        .expect("reserve");
    let unknown = store
        .reserve("item:2:users", "item:2:info", "10")
        .await
        .expect("reserve");

    assert_eq!(first, ReserveOutcome::Reserved);
    assert_eq!(again, ReserveOutcome::AlreadyReserved);
    assert_eq!(other, ReserveOutcome::OutOfStock);
    assert_eq!(unknown, ReserveOutcome::OutOfStock);

    let remain = store.hash_get("item:1:info", "remain").await.expect("hget");
    assert_eq!(remain.as_deref(), Some("0"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_reservations_never_oversell() {
    let (_container, store) = setup_redis_store().await;
    let store = Arc::new(store);
    seed_item(&store, "item:9:info", 5).await;

    let mut handles = Vec::new();
    for actor in 0..40 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .reserve("item:9:users", "item:9:info", &actor.to_string())
                .await
                .expect("reserve")
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        if handle.await.expect("join") == ReserveOutcome::Reserved {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 5);
    let remain = store.hash_get("item:9:info", "remain").await.expect("hget");
    assert_eq!(remain.as_deref(), Some("0"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_incr_existing_skips_missing_hash() {
    let (_container, store) = setup_redis_store().await;

    let missing = store
        .hash_incr_existing("article:1", "like", 1)
        .await
        .expect("incr");
    assert_eq!(missing, None);
    assert!(store.hash_get_all("article:1").await.expect("hgetall").is_empty());

    store
        .hash_set("article:1", &[("like".to_string(), "2".to_string())])
        .await
        .expect("hset");
    let present = store
        .hash_incr_existing("article:1", "like", 1)
        .await
        .expect("incr");
    assert_eq!(present, Some(3));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_weighted_intersection_with_plain_set() {
    let (_container, store) = setup_redis_store().await;

    store.sorted_set_add("likes", "1", 5.0).await.expect("zadd");
    store.sorted_set_add("likes", "2", 9.0).await.expect("zadd");
    store.sorted_set_add("likes", "3", 1.0).await.expect("zadd");
    store.set_add("follows:7", "2").await.expect("sadd");
    store.set_add("follows:7", "3").await.expect("sadd");

    let count = store
        .sorted_set_intersect_store(
            "rank:7",
            &[("likes".to_string(), 1.0), ("follows:7".to_string(), 0.0)],
        )
        .await
        .expect("zinterstore");
    assert_eq!(count, 2);

    let ranked = store.sorted_set_range_desc("rank:7").await.expect("zrevrange");
    assert_eq!(ranked, vec![("2".to_string(), 9.0), ("3".to_string(), 1.0)]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_scan_keys_matches_pattern() {
    let (_container, store) = setup_redis_store().await;

    for id in 0..25 {
        store
            .hash_set(
                &format!("article:basic:{id}"),
                &[("like".to_string(), "0".to_string())],
            )
            .await
            .expect("hset");
    }
    store
        .hash_set("article:full:1", &[("like".to_string(), "0".to_string())])
        .await
        .expect("hset");

    let keys = store.scan_keys("article:basic:*").await.expect("scan");

    assert_eq!(keys.len(), 25);
    assert!(keys.iter().all(|k| k.starts_with("article:basic:")));
}
