//! Integration tests for the counter cache engine and reconciliation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::{TimeZone, Utc};
use neighborly_core::cache::CacheStore;
use neighborly_core::model::{Article, ArticleId, BasicArticle, LIKE_FIELD, UserId};
use neighborly_engine::{CounterEngine, EngineError, KeySpace, RankEngine};
use neighborly_testing::{FaultyCacheStore, InMemoryCacheStore, InMemoryDurableStore};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const TTL: Duration = Duration::from_secs(7200);

fn article(id: i64, like: i64) -> Article {
    Article {
        id: ArticleId(id),
        title: format!("Article {id}"),
        content: "Swap day at the community hall".to_string(),
        kind: "event".to_string(),
        manager_id: UserId(100),
        like,
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
    }
}

fn engine<C: CacheStore>(cache: C) -> CounterEngine<C> {
    CounterEngine::new(Arc::new(cache), KeySpace::new("test"), TTL)
}

async fn seed<C: CacheStore>(counters: &CounterEngine<C>, article: &Article) {
    counters
        .cache_basic(&BasicArticle::from_article(article, 5), true)
        .await
        .unwrap();
    counters.cache_article(article).await.unwrap();
}

async fn counts<C: CacheStore>(counters: &CounterEngine<C>, id: i64) -> (Option<i64>, Option<i64>) {
    let basic = counters.like_count(ArticleId(id)).await.unwrap();
    let full = counters
        .get_by_subject(ArticleId(id))
        .await
        .unwrap()
        .map(|a| a.like);
    (basic, full)
}

// ============================================================================
// Likes
// ============================================================================

#[tokio::test]
async fn like_then_unlike_restores_both_projections() {
    let counters = engine(InMemoryCacheStore::new());
    seed(&counters, &article(1, 4)).await;

    assert_eq!(counters.add_like(ArticleId(1), UserId(7)).await.unwrap(), 5);
    assert_eq!(counts(&counters, 1).await, (Some(5), Some(5)));
    assert!(counters.is_liked(ArticleId(1), UserId(7)).await.unwrap());

    assert_eq!(counters.remove_like(ArticleId(1), UserId(7)).await.unwrap(), 4);
    assert_eq!(counts(&counters, 1).await, (Some(4), Some(4)));
    assert!(!counters.is_liked(ArticleId(1), UserId(7)).await.unwrap());
}

#[tokio::test]
async fn second_like_is_rejected_and_counted_once() {
    let counters = engine(InMemoryCacheStore::new());
    seed(&counters, &article(1, 0)).await;

    counters.add_like(ArticleId(1), UserId(7)).await.unwrap();
    let err = counters.add_like(ArticleId(1), UserId(7)).await.unwrap_err();

    assert_eq!(
        err,
        EngineError::AlreadyLiked {
            subject: ArticleId(1),
            actor: UserId(7)
        }
    );
    assert!(err.is_client_error());
    assert_eq!(counts(&counters, 1).await, (Some(1), Some(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_likes_by_one_user_count_once() {
    let counters = engine(InMemoryCacheStore::new());
    seed(&counters, &article(1, 0)).await;

    let likes = (0..16).map(|_| {
        let counters = counters.clone();
        tokio::spawn(async move { counters.add_like(ArticleId(1), UserId(7)).await })
    });
    let outcomes: Vec<_> = futures::future::join_all(likes)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes.iter().all(|o| match o {
        Ok(count) => *count == 1,
        Err(e) => matches!(e, EngineError::AlreadyLiked { .. }),
    }));
    assert_eq!(counts(&counters, 1).await, (Some(1), Some(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_likes_by_distinct_users_all_count() {
    let counters = engine(InMemoryCacheStore::new());
    seed(&counters, &article(1, 0)).await;

    let likes = (0..16).map(|user| {
        let counters = counters.clone();
        tokio::spawn(async move { counters.add_like(ArticleId(1), UserId(user)).await })
    });
    let mut returned: Vec<i64> = futures::future::join_all(likes)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    returned.sort_unstable();

    // Every caller saw a distinct count
    assert_eq!(returned, (1..=16).collect::<Vec<_>>());
    assert_eq!(counts(&counters, 1).await, (Some(16), Some(16)));

    let unlikes = (0..16).map(|user| {
        let counters = counters.clone();
        tokio::spawn(async move { counters.remove_like(ArticleId(1), UserId(user)).await })
    });
    for joined in futures::future::join_all(unlikes).await {
        joined.unwrap().unwrap();
    }
    assert_eq!(counts(&counters, 1).await, (Some(0), Some(0)));
}

#[tokio::test]
async fn unlike_without_like_is_rejected() {
    let counters = engine(InMemoryCacheStore::new());
    seed(&counters, &article(1, 2)).await;

    let err = counters.remove_like(ArticleId(1), UserId(7)).await.unwrap_err();

    assert!(matches!(err, EngineError::NotLiked { .. }));
    assert_eq!(counts(&counters, 1).await, (Some(2), Some(2)));
}

#[tokio::test]
async fn like_on_uncached_article_leaves_no_membership() {
    let cache = InMemoryCacheStore::new();
    let counters = engine(cache.clone());

    let err = counters.add_like(ArticleId(9), UserId(7)).await.unwrap_err();

    assert_eq!(err, EngineError::ArticleNotCached(ArticleId(9)));
    assert!(!counters.is_liked(ArticleId(9), UserId(7)).await.unwrap());
    assert_eq!(cache.key_count(), 0);
}

#[tokio::test]
async fn expired_full_projection_is_not_resurrected() {
    let cache = InMemoryCacheStore::new();
    let counters = engine(cache.clone());
    seed(&counters, &article(1, 0)).await;
    cache
        .delete(&[counters.keys().article_full(ArticleId(1))])
        .await
        .unwrap();

    assert_eq!(counters.add_like(ArticleId(1), UserId(7)).await.unwrap(), 1);

    assert_eq!(counts(&counters, 1).await, (Some(1), None));
    assert!(!cache.contains_key(&counters.keys().article_full(ArticleId(1))));
}

#[tokio::test]
async fn full_projection_failure_reverts_basic_counter() {
    let cache = FaultyCacheStore::new(InMemoryCacheStore::new());
    let counters = engine(cache.clone());
    seed(&counters, &article(1, 3)).await;

    cache.fail_after("article:full", 0);
    let err = counters.add_like(ArticleId(1), UserId(7)).await.unwrap_err();

    assert!(matches!(err, EngineError::CacheUnavailable(_)), "got {err:?}");
    cache.heal();
    assert_eq!(counts(&counters, 1).await, (Some(3), Some(3)));
    assert!(!counters.is_liked(ArticleId(1), UserId(7)).await.unwrap());
}

#[tokio::test]
async fn unlike_failure_restores_membership() {
    let cache = FaultyCacheStore::new(InMemoryCacheStore::new());
    let counters = engine(cache.clone());
    seed(&counters, &article(1, 0)).await;
    counters.add_like(ArticleId(1), UserId(7)).await.unwrap();

    cache.fail_after("article:full", 0);
    let err = counters.remove_like(ArticleId(1), UserId(7)).await.unwrap_err();

    assert!(matches!(err, EngineError::CacheUnavailable(_)));
    cache.heal();
    assert_eq!(counts(&counters, 1).await, (Some(1), Some(1)));
    assert!(counters.is_liked(ArticleId(1), UserId(7)).await.unwrap());
}

#[tokio::test]
async fn failed_compensation_reports_both_errors() {
    let cache = FaultyCacheStore::new(InMemoryCacheStore::new());
    let counters = engine(cache.clone());
    seed(&counters, &article(1, 3)).await;

    // The like's own increment passes, the revert does not
    cache.fail_after("article:basic", 1);
    cache.fail_after("article:full", 0);
    let err = counters.add_like(ArticleId(1), UserId(7)).await.unwrap_err();

    let EngineError::CompensationFailed {
        original,
        compensation,
    } = err
    else {
        panic!("expected compensation failure, got {err:?}");
    };
    assert!(matches!(*original, EngineError::CacheUnavailable(_)));
    assert!(matches!(*compensation, EngineError::CacheUnavailable(_)));

    cache.heal();
    // The operator sees the divergence; membership was still undone
    assert_eq!(counts(&counters, 1).await, (Some(4), Some(3)));
    assert!(!counters.is_liked(ArticleId(1), UserId(7)).await.unwrap());
}

#[tokio::test]
async fn invalidation_removes_both_projections_but_keeps_likers() {
    let cache = InMemoryCacheStore::new();
    let counters = engine(cache.clone());
    seed(&counters, &article(1, 0)).await;
    counters.add_like(ArticleId(1), UserId(7)).await.unwrap();

    counters.invalidate_for_update(ArticleId(1)).await.unwrap();

    assert_eq!(counts(&counters, 1).await, (None, None));
    assert!(counters.is_liked(ArticleId(1), UserId(7)).await.unwrap());
}

#[tokio::test]
async fn listing_skips_articles_without_projection() {
    let counters = engine(InMemoryCacheStore::new());
    seed(&counters, &article(1, 0)).await;
    seed(&counters, &article(2, 0)).await;
    counters.invalidate_for_update(ArticleId(1)).await.unwrap();

    let listed = counters.list_basic_by_kind("event").await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, ArticleId(2));
    assert_eq!(listed[0].preview, "Swap ");
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn reconcile_flushes_counters_and_user_scores_in_batches() {
    let cache = Arc::new(InMemoryCacheStore::new());
    let counters = CounterEngine::new(Arc::clone(&cache), KeySpace::new("test"), TTL);
    let rank = RankEngine::new(Arc::clone(&cache), KeySpace::new("test"));
    let durable = InMemoryDurableStore::new();

    for (id, like) in [(1, 3), (2, 0), (3, 8)] {
        durable.insert_article(article(id, 0));
        seed(&counters, &article(id, like)).await;
    }
    rank.add_score(UserId(5), 4).await.unwrap();
    rank.add_score(UserId(6), 1).await.unwrap();

    let report = counters.reconcile_once(&durable, 2).await.unwrap();

    assert_eq!(report.articles, 3);
    assert_eq!(report.users, 2);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(
        durable.counter_batches(),
        vec![
            vec![(ArticleId(1), 3), (ArticleId(2), 0)],
            vec![(ArticleId(3), 8)],
        ]
    );
    assert_eq!(durable.article(ArticleId(3)).unwrap().like, 8);
    assert_eq!(durable.user_likes(UserId(5)), Some(4));
    assert_eq!(durable.user_likes(UserId(6)), Some(1));
}

#[tokio::test]
async fn negative_article_counter_is_written_as_zero() {
    let cache = InMemoryCacheStore::new();
    let counters = engine(cache.clone());
    let durable = InMemoryDurableStore::new();
    seed(&counters, &article(1, 2)).await;
    seed(&counters, &article(2, 0)).await;
    cache
        .hash_set(
            &counters.keys().article_basic(ArticleId(2)),
            &[(LIKE_FIELD.to_string(), "-1".to_string())],
        )
        .await
        .unwrap();

    let report = counters.reconcile_once(&durable, 10).await.unwrap();

    assert_eq!(report.articles, 2);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(
        durable.counter_batches(),
        vec![vec![(ArticleId(1), 2), (ArticleId(2), 0)]]
    );
}

#[tokio::test]
async fn negative_user_score_does_not_block_its_batch() {
    let cache = Arc::new(InMemoryCacheStore::new());
    let counters = CounterEngine::new(Arc::clone(&cache), KeySpace::new("test"), TTL);
    let rank = RankEngine::new(Arc::clone(&cache), KeySpace::new("test"));
    let durable = InMemoryDurableStore::new();
    rank.add_score(UserId(1), 10).await.unwrap();
    cache
        .sorted_set_add(&counters.keys().user_likes(), "2", -1.0)
        .await
        .unwrap();

    let report = counters.reconcile_once(&durable, 10).await.unwrap();

    assert_eq!(report.users, 2);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(durable.user_likes(UserId(1)), Some(10));
    assert_eq!(durable.user_likes(UserId(2)), Some(0));
}

#[tokio::test]
async fn rejected_batches_are_counted_and_retried_next_tick() {
    let counters = engine(InMemoryCacheStore::new());
    let durable = InMemoryDurableStore::new();
    seed(&counters, &article(1, 2)).await;
    seed(&counters, &article(2, 5)).await;
    durable.set_fail_writes(true);

    let report = counters.reconcile_once(&durable, 1).await.unwrap();

    assert_eq!(report.articles, 0);
    assert_eq!(report.failed_batches, 2);
    assert!(durable.counter_batches().is_empty());

    durable.set_fail_writes(false);
    let report = counters.reconcile_once(&durable, 1).await.unwrap();

    assert_eq!(report.articles, 2);
    assert_eq!(report.failed_batches, 0);
}

#[tokio::test]
async fn empty_cache_reconciles_nothing() {
    let counters = engine(InMemoryCacheStore::new());
    let durable = InMemoryDurableStore::new();

    let report = counters.reconcile_once(&durable, 10).await.unwrap();

    assert_eq!(report, neighborly_engine::ReconcileReport::default());
    assert!(durable.counter_batches().is_empty());
}

#[tokio::test]
async fn reconciler_ticks_on_its_period() {
    let counters = engine(InMemoryCacheStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());
    seed(&counters, &article(1, 6)).await;

    let handle = counters.spawn_reconciler(Arc::clone(&durable), Duration::from_millis(30), 10);

    assert!(durable.counter_batches().is_empty(), "first tick waits one period");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(durable.counter_batches().contains(&vec![(ArticleId(1), 6)]));
    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test]
async fn reconciler_survives_an_unreachable_cache() {
    let cache = FaultyCacheStore::new(InMemoryCacheStore::new());
    let counters = engine(cache.clone());
    let durable = Arc::new(InMemoryDurableStore::new());
    seed(&counters, &article(1, 2)).await;

    cache.set_offline(true);
    let handle = counters.spawn_reconciler(Arc::clone(&durable), Duration::from_millis(20), 10);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    assert!(durable.counter_batches().is_empty());

    cache.set_offline(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(durable.counter_batches().contains(&vec![(ArticleId(1), 2)]));
    handle.abort();
}
