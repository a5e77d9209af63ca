//! Integration tests for user scores, the follow graph and rankings.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use neighborly_core::model::{RankEntry, UserId};
use neighborly_engine::{KeySpace, RankEngine};
use neighborly_testing::InMemoryCacheStore;
use std::sync::Arc;

fn engine() -> RankEngine<InMemoryCacheStore> {
    RankEngine::new(Arc::new(InMemoryCacheStore::new()), KeySpace::new("test"))
}

fn entry(user: i64, likes: i64, rank: usize) -> RankEntry {
    RankEntry {
        user: UserId(user),
        likes,
        rank,
    }
}

#[tokio::test]
async fn rank_includes_self_without_follows_or_score() {
    let rank = engine();

    let ranking = rank.get_rank(UserId(1)).await.unwrap();

    assert_eq!(ranking, vec![entry(1, 0, 1)]);
}

#[tokio::test]
async fn rank_orders_by_score_then_user_id() {
    let rank = engine();
    for (user, score) in [(1, 3), (2, 5), (3, 5), (4, 1), (5, 100)] {
        rank.add_score(UserId(user), score).await.unwrap();
    }
    for followed in [3, 2, 4] {
        rank.follow(UserId(1), UserId(followed)).await.unwrap();
    }

    let ranking = rank.get_rank(UserId(1)).await.unwrap();

    // User 5 is not followed and stays out
    assert_eq!(
        ranking,
        vec![entry(2, 5, 1), entry(3, 5, 2), entry(1, 3, 3), entry(4, 1, 4)]
    );
}

#[tokio::test]
async fn followed_user_without_score_is_left_out() {
    let rank = engine();
    rank.add_score(UserId(2), 1).await.unwrap();
    rank.follow(UserId(1), UserId(2)).await.unwrap();
    rank.follow(UserId(1), UserId(3)).await.unwrap();

    let ranking = rank.get_rank(UserId(1)).await.unwrap();

    assert_eq!(ranking, vec![entry(2, 1, 1), entry(1, 0, 2)]);
}

#[tokio::test]
async fn self_follow_is_not_counted_twice() {
    let rank = engine();
    rank.add_score(UserId(1), 2).await.unwrap();
    rank.follow(UserId(1), UserId(1)).await.unwrap();

    let ranking = rank.get_rank(UserId(1)).await.unwrap();

    assert_eq!(ranking, vec![entry(1, 2, 1)]);
}

#[tokio::test]
async fn ranking_is_recomputed_on_every_call() {
    let rank = engine();
    rank.add_score(UserId(2), 1).await.unwrap();
    rank.follow(UserId(1), UserId(2)).await.unwrap();
    assert_eq!(rank.get_rank(UserId(1)).await.unwrap()[0].user, UserId(2));

    rank.add_score(UserId(1), 5).await.unwrap();
    rank.unfollow(UserId(1), UserId(2)).await.unwrap();

    assert_eq!(rank.get_rank(UserId(1)).await.unwrap(), vec![entry(1, 5, 1)]);
}

#[tokio::test]
async fn scores_accumulate_and_stop_at_zero() {
    let rank = engine();

    assert_eq!(rank.score(UserId(9)).await.unwrap(), 0);
    assert_eq!(rank.add_score(UserId(9), 3).await.unwrap(), 3);
    assert_eq!(rank.add_score(UserId(9), -1).await.unwrap(), 2);
    assert_eq!(rank.add_score(UserId(9), -5).await.unwrap(), 0);
    assert_eq!(rank.score(UserId(9)).await.unwrap(), 0);

    // A user with no score cannot start below zero
    assert_eq!(rank.add_score(UserId(10), -1).await.unwrap(), 0);
    assert_eq!(rank.score(UserId(10)).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_leave_a_negative_score() {
    let rank = engine();
    rank.add_score(UserId(4), 3).await.unwrap();

    let drops = (0..10).map(|_| {
        let rank = rank.clone();
        tokio::spawn(async move { rank.add_score(UserId(4), -1).await })
    });
    for outcome in futures::future::join_all(drops).await {
        assert!(outcome.unwrap().unwrap() >= 0);
    }

    assert_eq!(rank.score(UserId(4)).await.unwrap(), 0);
}

#[tokio::test]
async fn follow_graph_tracks_both_directions() {
    let rank = engine();

    assert!(rank.follow(UserId(1), UserId(3)).await.unwrap());
    assert!(!rank.follow(UserId(1), UserId(3)).await.unwrap());
    rank.follow(UserId(1), UserId(4)).await.unwrap();
    rank.follow(UserId(2), UserId(3)).await.unwrap();

    assert_eq!(rank.follows(UserId(1)).await.unwrap(), vec![UserId(3), UserId(4)]);
    assert_eq!(rank.fans(UserId(3)).await.unwrap(), vec![UserId(1), UserId(2)]);

    assert!(rank.unfollow(UserId(1), UserId(3)).await.unwrap());
    assert!(!rank.unfollow(UserId(1), UserId(3)).await.unwrap());
    assert_eq!(rank.fans(UserId(3)).await.unwrap(), vec![UserId(2)]);
}

#[tokio::test]
async fn common_follows_are_followed_users_who_follow_the_other() {
    let rank = engine();
    rank.follow(UserId(1), UserId(3)).await.unwrap();
    rank.follow(UserId(1), UserId(4)).await.unwrap();
    rank.follow(UserId(3), UserId(2)).await.unwrap();
    // Follows 2, but 1 does not follow 5
    rank.follow(UserId(5), UserId(2)).await.unwrap();
    // Followed by both, which is not enough
    rank.follow(UserId(2), UserId(4)).await.unwrap();

    assert_eq!(
        rank.common_follows(UserId(1), UserId(2)).await.unwrap(),
        vec![UserId(3)]
    );
    assert!(rank.common_follows(UserId(2), UserId(1)).await.unwrap().is_empty());
}
