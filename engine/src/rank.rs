//! Rank Engine: user like scores and "likes among my follows".
//!
//! Scores live in one global sorted set. A ranking intersects it with the
//! user's follow set (weight 0, so only the score survives), adds the user's
//! own score, and orders the result. Nothing is maintained incrementally;
//! every call recomputes from scratch into a per-user scratch key.

use crate::error::Result;
use crate::keys::KeySpace;
use neighborly_core::cache::CacheStore;
use neighborly_core::model::{RankEntry, UserId};
use std::sync::Arc;

/// Converts a sorted-set score to a count.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn score_to_count(score: f64) -> i64 {
    score.round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn count_to_score(count: i64) -> f64 {
    count as f64
}

/// User like scores and follow graph.
pub struct RankEngine<C> {
    cache: Arc<C>,
    keys: KeySpace,
}

impl<C> Clone for RankEngine<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            keys: self.keys.clone(),
        }
    }
}

impl<C: CacheStore> RankEngine<C> {
    /// Creates an engine over `cache`.
    #[must_use]
    pub const fn new(cache: Arc<C>, keys: KeySpace) -> Self {
        Self { cache, keys }
    }

    /// Adds `delta` to a user's like score and returns the new score.
    ///
    /// Scores never go below zero. A decrement that overshoots is taken back
    /// by the overshoot, bounded by its own size, so concurrent decrements
    /// each undo only their own share.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn add_score(&self, user: UserId, delta: i64) -> Result<i64> {
        let key = self.keys.user_likes();
        let member = user.to_string();
        let mut score = score_to_count(
            self.cache
                .sorted_set_incr(&key, &member, count_to_score(delta))
                .await?,
        );

        if score < 0 && delta < 0 {
            let overshoot = score.saturating_neg().min(delta.saturating_neg());
            score = score_to_count(
                self.cache
                    .sorted_set_incr(&key, &member, count_to_score(overshoot))
                    .await?,
            );
            tracing::warn!(user = %user, delta, overshoot, "User score floored at zero");
        }

        tracing::debug!(user = %user, delta, score, "User score updated");
        Ok(score.max(0))
    }

    /// A user's like score; zero when the user has none.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn score(&self, user: UserId) -> Result<i64> {
        let score = self
            .cache
            .sorted_set_score(&self.keys.user_likes(), &user.to_string())
            .await?;
        Ok(score.map_or(0, score_to_count))
    }

    /// Makes `actor` follow `target`. Returns `false` if it already did.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn follow(&self, actor: UserId, target: UserId) -> Result<bool> {
        let added = self
            .cache
            .set_add(&self.keys.user_follows(actor), &target.to_string())
            .await?;
        self.cache
            .set_add(&self.keys.user_fans(target), &actor.to_string())
            .await?;
        Ok(added)
    }

    /// Makes `actor` stop following `target`. Returns `false` if it did not.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn unfollow(&self, actor: UserId, target: UserId) -> Result<bool> {
        let removed = self
            .cache
            .set_remove(&self.keys.user_follows(actor), &target.to_string())
            .await?;
        self.cache
            .set_remove(&self.keys.user_fans(target), &actor.to_string())
            .await?;
        Ok(removed)
    }

    /// Users `actor` follows, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn follows(&self, actor: UserId) -> Result<Vec<UserId>> {
        let members = self.cache.set_members(&self.keys.user_follows(actor)).await?;
        Ok(parse_users(members))
    }

    /// Users following `actor`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn fans(&self, actor: UserId) -> Result<Vec<UserId>> {
        let members = self.cache.set_members(&self.keys.user_fans(actor)).await?;
        Ok(parse_users(members))
    }

    /// Users `actor` follows who themselves follow `other`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn common_follows(&self, actor: UserId, other: UserId) -> Result<Vec<UserId>> {
        let keys = [self.keys.user_follows(actor), self.keys.user_fans(other)];
        let members = self.cache.set_intersect(&keys).await?;
        Ok(parse_users(members))
    }

    /// Ranks `actor` among the users they follow by like score.
    ///
    /// Followed users without a score are left out; `actor` is always
    /// included. Entries are ordered by score descending, then by user id
    /// ascending, and numbered from 1 with no shared ranks.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn get_rank(&self, actor: UserId) -> Result<Vec<RankEntry>> {
        let scratch = self.keys.user_rank(actor);
        let sources = [
            (self.keys.user_likes(), 1.0),
            (self.keys.user_follows(actor), 0.0),
        ];
        self.cache.sorted_set_intersect_store(&scratch, &sources).await?;

        let own = self.score(actor).await?;
        self.cache
            .sorted_set_add(&scratch, &actor.to_string(), count_to_score(own))
            .await?;

        let mut scored: Vec<(UserId, i64)> = self
            .cache
            .sorted_set_range_desc(&scratch)
            .await?
            .into_iter()
            .filter_map(|(member, score)| Some((member.parse().ok()?, score_to_count(score))))
            .collect();
        scored.sort_by(|(a_user, a_likes), (b_user, b_likes)| {
            b_likes.cmp(a_likes).then(a_user.cmp(b_user))
        });

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(position, (user, likes))| RankEntry {
                user,
                likes,
                rank: position + 1,
            })
            .collect())
    }
}

fn parse_users(members: Vec<String>) -> Vec<UserId> {
    let mut users: Vec<UserId> = members.iter().filter_map(|m| m.parse().ok()).collect();
    users.sort_unstable();
    users
}
