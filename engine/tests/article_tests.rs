//! Integration tests for the article cache-aside flows.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use neighborly_core::cache::CacheStore;
use neighborly_core::environment::Clock;
use neighborly_core::model::{Article, ArticleId, BasicArticle, NewArticle, UserId};
use neighborly_engine::{ArticleEdit, ArticleService, CounterEngine, EngineError, KeySpace};
use neighborly_testing::{FaultyCacheStore, InMemoryCacheStore, InMemoryDurableStore, test_clock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type Service<C> = ArticleService<C, InMemoryDurableStore>;

fn service<C: CacheStore + 'static>(cache: C, durable: &Arc<InMemoryDurableStore>) -> Service<C> {
    let counters = CounterEngine::new(Arc::new(cache), KeySpace::new("test"), Duration::from_secs(60));
    ArticleService::new(
        counters,
        Arc::clone(durable),
        Arc::new(test_clock()),
        vec!["event".to_string(), "notice".to_string()],
        5,
    )
}

fn new_article(kind: &str) -> NewArticle {
    NewArticle {
        title: "Street party".to_string(),
        content: "Bring a dish to share".to_string(),
        kind: kind.to_string(),
        manager_id: UserId(2),
    }
}

fn stored_article(id: i64, title: &str, like: i64) -> Article {
    Article {
        id: ArticleId(id),
        title: title.to_string(),
        content: "Lost cat near the park".to_string(),
        kind: "notice".to_string(),
        manager_id: UserId(2),
        like,
        created_at: test_clock().now(),
    }
}

/// Polls `check` until it holds, for background cache writes.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn created_article_is_listed_and_fully_cached() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);

    let created = articles.create_article(&new_article("event")).await.unwrap();

    assert_eq!(created.like, 0);
    assert_eq!(created.created_at, test_clock().now());
    let listed = articles.list_by_kind("event").await.unwrap();
    assert_eq!(listed, vec![BasicArticle::from_article(&created, 5)]);
    assert_eq!(listed[0].preview, "Bring");

    let counters = articles.counters();
    let expected = &created;
    eventually(|| async move {
        counters.get_by_subject(expected.id).await.unwrap().as_ref() == Some(expected)
    })
    .await;
}

#[tokio::test]
async fn newest_article_is_listed_first() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);

    let first = articles.create_article(&new_article("event")).await.unwrap();
    let second = articles.create_article(&new_article("event")).await.unwrap();

    let ids: Vec<ArticleId> = articles
        .list_by_kind("event")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert!(articles.list_by_kind("notice").await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_kind_is_rejected_before_persisting() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);

    let err = articles.create_article(&new_article("rumour")).await.unwrap_err();

    assert_eq!(err, EngineError::InvalidKind("rumour".to_string()));
    assert_eq!(durable.article(ArticleId(1)), None);
    assert!(articles.list_by_kind("rumour").await.is_err());
}

#[tokio::test]
async fn failed_cache_write_removes_the_new_row() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let cache = FaultyCacheStore::new(InMemoryCacheStore::new());
    let articles = service(cache.clone(), &durable);
    cache.set_offline(true);

    let err = articles.create_article(&new_article("event")).await.unwrap_err();

    // Undoing the cache half fails too while the cache is offline
    assert!(matches!(err, EngineError::CompensationFailed { .. }), "got {err:?}");
    assert_eq!(durable.article(ArticleId(1)), None);
}

#[tokio::test]
async fn read_miss_uses_live_count_and_repopulates() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);
    durable.insert_article(stored_article(1, "Lost cat", 0));
    let mut live = stored_article(1, "Lost cat", 0);
    live.like = 4;
    articles
        .counters()
        .cache_basic(&BasicArticle::from_article(&live, 5), true)
        .await
        .unwrap();

    let read = articles.get_article(ArticleId(1)).await.unwrap();

    assert_eq!(read.like, 4);
    assert_eq!(durable.article_reads(), 1);
    let counters = articles.counters();
    eventually(|| async move { counters.get_by_subject(ArticleId(1)).await.unwrap().is_some() })
        .await;

    let again = articles.get_article(ArticleId(1)).await.unwrap();
    assert_eq!(again, read);
    assert_eq!(durable.article_reads(), 1, "second read is served from cache");
}

#[tokio::test]
async fn missing_article_is_not_found() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);

    let err = articles.get_article(ArticleId(5)).await.unwrap_err();

    assert_eq!(err, EngineError::ArticleNotFound(ArticleId(5)));
}

#[tokio::test]
async fn read_after_invalidation_matches_the_store() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);
    durable.insert_article(stored_article(1, "Found cat", 2));
    // A stale projection left by an earlier reader
    articles
        .counters()
        .cache_article(&stored_article(1, "Lost cat", 2))
        .await
        .unwrap();

    articles.counters().invalidate_for_update(ArticleId(1)).await.unwrap();
    let read = articles.get_article(ArticleId(1)).await.unwrap();

    assert_eq!(read, stored_article(1, "Found cat", 2));
    let counters = articles.counters();
    eventually(|| async move {
        counters.get_by_subject(ArticleId(1)).await.unwrap()
            == Some(stored_article(1, "Found cat", 2))
    })
    .await;
}

#[tokio::test]
async fn update_carries_live_likes_and_refreshes_projections() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);
    let created = articles.create_article(&new_article("event")).await.unwrap();
    let counters = articles.counters();
    let id = created.id;
    eventually(|| async move { counters.get_by_subject(id).await.unwrap().is_some() }).await;
    counters.add_like(id, UserId(8)).await.unwrap();
    counters.add_like(id, UserId(9)).await.unwrap();

    let updated = articles
        .update_article(
            created.id,
            ArticleEdit {
                title: "Street party moved".to_string(),
                content: "Now on Sunday".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title, "Street party moved");
    assert_eq!(updated.like, 2);
    assert_eq!(durable.article(created.id).unwrap().like, 2);

    eventually(|| async move {
        counters.get_basic(id).await.unwrap().is_some_and(|basic| {
            basic.title == "Street party moved" && basic.preview == "Now o" && basic.like == 2
        })
    })
    .await;
    let read = articles.get_article(created.id).await.unwrap();
    assert_eq!(read, updated);

    // The kind list was not pushed a second time
    assert_eq!(articles.list_by_kind("event").await.unwrap().len(), 1);
}

#[tokio::test]
async fn updating_a_missing_article_is_not_found() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);

    let err = articles
        .update_article(
            ArticleId(3),
            ArticleEdit {
                title: "x".to_string(),
                content: "y".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::ArticleNotFound(ArticleId(3)));
}

#[tokio::test]
async fn failed_update_keeps_live_likes_cached() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let articles = service(InMemoryCacheStore::new(), &durable);
    let created = articles.create_article(&new_article("event")).await.unwrap();
    let counters = articles.counters();
    let id = created.id;
    eventually(|| async move { counters.get_by_subject(id).await.unwrap().is_some() }).await;
    for user in 7..10 {
        counters.add_like(id, UserId(user)).await.unwrap();
    }
    durable.set_fail_writes(true);

    let err = articles
        .update_article(
            id,
            ArticleEdit {
                title: "Street party moved".to_string(),
                content: "Now on Sunday".to_string(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::StoreUnavailable(_)), "got {err:?}");
    let basic = counters.get_basic(id).await.unwrap().unwrap();
    assert_eq!(basic.like, 3);
    assert_eq!(basic.title, "Street party");
    assert_eq!(durable.article(id).unwrap().like, 0);
    assert_eq!(articles.list_by_kind("event").await.unwrap(), vec![basic]);

    durable.set_fail_writes(false);
    assert_eq!(counters.add_like(id, UserId(10)).await.unwrap(), 4);
    assert!(matches!(
        counters.add_like(id, UserId(7)).await,
        Err(EngineError::AlreadyLiked { .. })
    ));
}
