//! Counter Cache Engine.
//!
//! Article like counts live in two cache projections: the basic projection
//! (kept indefinitely, authoritative between reconciliation ticks) and the
//! full projection (cached with a TTL). A per-article likers set enforces at
//! most one like per user.
//!
//! A like touches three keys in order: the likers set, the basic counter and
//! the full counter. When a later step fails the earlier ones are undone so
//! the projections never diverge; when undoing fails too, both errors are
//! returned in [`EngineError::CompensationFailed`].
//!
//! Counters reach the durable store only through [`CounterEngine::reconcile_once`],
//! which [`CounterEngine::spawn_reconciler`] runs on a fixed period for the
//! lifetime of the process.

use crate::error::{EngineError, Result};
use crate::keys::KeySpace;
use crate::rank::score_to_count;
use neighborly_core::cache::CacheStore;
use neighborly_core::durable::DurableStore;
use neighborly_core::error::CacheError;
use neighborly_core::model::{Article, ArticleId, BasicArticle, LIKE_FIELD, UserId};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Shortest accepted reconciliation period.
const MIN_RECONCILE_PERIOD: Duration = Duration::from_millis(10);

/// Counts from one reconciliation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Article counters written
    pub articles: usize,
    /// User totals written
    pub users: usize,
    /// Batches the durable store rejected
    pub failed_batches: usize,
}

/// Cached like counters for articles.
pub struct CounterEngine<C> {
    cache: Arc<C>,
    keys: KeySpace,
    full_ttl: Duration,
}

impl<C> Clone for CounterEngine<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            keys: self.keys.clone(),
            full_ttl: self.full_ttl,
        }
    }
}

impl<C: CacheStore> CounterEngine<C> {
    /// Creates an engine over `cache`. Full projections expire after
    /// `full_ttl`.
    #[must_use]
    pub const fn new(cache: Arc<C>, keys: KeySpace, full_ttl: Duration) -> Self {
        Self {
            cache,
            keys,
            full_ttl,
        }
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// The key layout.
    #[must_use]
    pub const fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Records that `actor` likes `subject` and returns the new count.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyLiked`] if `actor` already likes `subject`
    /// - [`EngineError::ArticleNotCached`] if the basic projection is absent
    /// - [`EngineError::CacheUnavailable`] if a step failed and was undone
    /// - [`EngineError::CompensationFailed`] if undoing a failed step failed
    pub async fn add_like(&self, subject: ArticleId, actor: UserId) -> Result<i64> {
        let likers = self.keys.article_likers(subject);
        if !self.cache.set_add(&likers, &actor.to_string()).await? {
            return Err(EngineError::AlreadyLiked { subject, actor });
        }

        let count = self.apply_like(subject, actor, 1).await?;

        metrics::counter!("likes.added").increment(1);
        tracing::debug!(article = %subject, user = %actor, count, "Like added");
        Ok(count)
    }

    /// Withdraws a like of `actor` on `subject` and returns the new count.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotLiked`] if `actor` does not like `subject`
    /// - otherwise as [`CounterEngine::add_like`]
    pub async fn remove_like(&self, subject: ArticleId, actor: UserId) -> Result<i64> {
        let likers = self.keys.article_likers(subject);
        if !self.cache.set_remove(&likers, &actor.to_string()).await? {
            return Err(EngineError::NotLiked { subject, actor });
        }

        let count = self.apply_like(subject, actor, -1).await?;

        metrics::counter!("likes.removed").increment(1);
        tracing::debug!(article = %subject, user = %actor, count, "Like removed");
        Ok(count)
    }

    /// Whether `actor` currently likes `subject`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn is_liked(&self, subject: ArticleId, actor: UserId) -> Result<bool> {
        let likers = self.keys.article_likers(subject);
        Ok(self.cache.set_is_member(&likers, &actor.to_string()).await?)
    }

    /// Steps two and three of a like, after the likers set was updated by
    /// `delta`.
    async fn apply_like(&self, subject: ArticleId, actor: UserId, delta: i64) -> Result<i64> {
        let basic_key = self.keys.article_basic(subject);
        let full_key = self.keys.article_full(subject);

        let count = match self.cache.hash_incr_existing(&basic_key, LIKE_FIELD, delta).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                let original = EngineError::ArticleNotCached(subject);
                return Err(self.undo_membership(subject, actor, delta, original).await);
            }
            Err(e) => {
                return Err(self.undo_membership(subject, actor, delta, e.into()).await);
            }
        };

        // An expired full projection is fine: the next read rebuilds it from
        // the basic counter.
        if let Err(e) = self.cache.hash_incr_existing(&full_key, LIKE_FIELD, delta).await {
            metrics::counter!("likes.compensations").increment(1);
            tracing::warn!(
                article = %subject,
                user = %actor,
                error = %e,
                "Full projection update failed, reverting basic counter"
            );

            let reverted = self
                .cache
                .hash_incr_existing(&basic_key, LIKE_FIELD, -delta)
                .await;
            let original = match reverted {
                Ok(_) => EngineError::from(e),
                Err(compensation) => {
                    tracing::error!(
                        article = %subject,
                        user = %actor,
                        error = %compensation,
                        "Failed to revert basic counter; projections diverge"
                    );
                    EngineError::compensation_failed(e.into(), compensation.into())
                }
            };
            return Err(self.undo_membership(subject, actor, delta, original).await);
        }

        Ok(count)
    }

    /// Reverts the likers set change and returns the error to surface.
    async fn undo_membership(
        &self,
        subject: ArticleId,
        actor: UserId,
        delta: i64,
        original: EngineError,
    ) -> EngineError {
        let likers = self.keys.article_likers(subject);
        let member = actor.to_string();
        let undone = if delta > 0 {
            self.cache.set_remove(&likers, &member).await
        } else {
            self.cache.set_add(&likers, &member).await
        };

        match undone {
            Ok(_) => original,
            Err(compensation) => {
                tracing::error!(
                    article = %subject,
                    user = %actor,
                    error = %compensation,
                    "Failed to revert likers set"
                );
                EngineError::compensation_failed(original, compensation.into())
            }
        }
    }

    /// Reads the full projection. `Ok(None)` means the caller should fall
    /// back to the durable store.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or the projection is corrupt.
    pub async fn get_by_subject(&self, subject: ArticleId) -> Result<Option<Article>> {
        let key = self.keys.article_full(subject);
        let fields = self.cache.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Article::from_fields(&key, &fields)?))
    }

    /// Reads the basic projection.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or the projection is corrupt.
    pub async fn get_basic(&self, subject: ArticleId) -> Result<Option<BasicArticle>> {
        let key = self.keys.article_basic(subject);
        let fields = self.cache.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(BasicArticle::from_fields(&key, &fields)?))
    }

    /// Reads the authoritative like count from the basic projection.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or the count is not an
    /// integer.
    pub async fn like_count(&self, subject: ArticleId) -> Result<Option<i64>> {
        let key = self.keys.article_basic(subject);
        let Some(raw) = self.cache.hash_get(&key, LIKE_FIELD).await? else {
            return Ok(None);
        };
        let count = raw.parse().map_err(|_| CacheError::Corrupt {
            key,
            reason: format!("like count '{raw}' is not an integer"),
        })?;
        Ok(Some(count))
    }

    /// Writes the full projection and sets its TTL.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn cache_article(&self, article: &Article) -> Result<()> {
        let key = self.keys.article_full(article.id);
        self.cache.hash_set(&key, &article.to_fields()).await?;
        self.cache.expire(&key, self.full_ttl).await?;
        Ok(())
    }

    /// Writes the basic projection, and lists the article under its kind
    /// when `list` is set.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn cache_basic(&self, basic: &BasicArticle, list: bool) -> Result<()> {
        let key = self.keys.article_basic(basic.id);
        self.cache.hash_set(&key, &basic.to_fields()).await?;
        if list {
            let list_key = self.keys.article_list(&basic.kind);
            self.cache.list_push(&list_key, &basic.id.to_string()).await?;
        }
        Ok(())
    }

    /// Basic projections of one kind, newest first. Listed ids without a
    /// projection are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable or a projection is corrupt.
    pub async fn list_basic_by_kind(&self, kind: &str) -> Result<Vec<BasicArticle>> {
        let ids = self.cache.list_range(&self.keys.article_list(kind), 0, -1).await?;

        let mut articles = Vec::with_capacity(ids.len());
        for raw in ids {
            let Ok(id) = raw.parse::<ArticleId>() else {
                tracing::warn!(kind, entry = %raw, "Skipping unparsable article list entry");
                continue;
            };
            match self.get_basic(id).await? {
                Some(article) => articles.push(article),
                None => tracing::debug!(kind, article = %id, "Listed article has no basic projection"),
            }
        }
        Ok(articles)
    }

    /// Deletes both projections of `subject`. Updates call this before and
    /// after the durable write.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn invalidate_for_update(&self, subject: ArticleId) -> Result<()> {
        let keys = [self.keys.article_basic(subject), self.keys.article_full(subject)];
        self.cache.delete(&keys).await?;
        tracing::debug!(article = %subject, "Invalidated article projections");
        Ok(())
    }

    /// Current value of every basic-projection counter, ordered by article.
    ///
    /// # Errors
    ///
    /// Returns error if the key scan fails.
    pub async fn snapshot_counters(&self) -> Result<Vec<(ArticleId, i64)>> {
        let keys = self.cache.scan_keys(&self.keys.article_basic_pattern()).await?;

        let mut counters = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(id) = self.keys.article_id_from_basic(&key) else {
                continue;
            };
            // Keys can vanish between the scan and the read
            match self.like_count(id).await {
                Ok(Some(count)) => counters.push((id, count)),
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable counter"),
            }
        }
        counters.sort_unstable_by_key(|(id, _)| *id);
        Ok(counters)
    }

    /// Runs one reconciliation tick: flushes every article counter and every
    /// user like total to `durable`, `batch_size` rows per transaction.
    ///
    /// A rejected batch is logged and counted; the remaining batches are
    /// still written.
    ///
    /// # Errors
    ///
    /// Returns error if the cache cannot be scanned.
    pub async fn reconcile_once<D: DurableStore>(
        &self,
        durable: &D,
        batch_size: usize,
    ) -> Result<ReconcileReport> {
        let batch_size = batch_size.max(1);
        let mut report = ReconcileReport::default();

        let counters = clamp_negative(self.snapshot_counters().await?, "article");
        if counters.is_empty() {
            tracing::debug!("No article counters to reconcile");
        }
        for batch in counters.chunks(batch_size) {
            match durable.write_counter_batch(batch).await {
                Ok(()) => report.articles += batch.len(),
                Err(e) => {
                    report.failed_batches += 1;
                    metrics::counter!("reconcile.failures").increment(1);
                    tracing::warn!(rows = batch.len(), error = %e, "Article counter batch rejected");
                }
            }
        }

        let totals: Vec<(UserId, i64)> = self
            .cache
            .sorted_set_range_desc(&self.keys.user_likes())
            .await?
            .into_iter()
            .filter_map(|(member, score)| Some((member.parse().ok()?, score_to_count(score))))
            .collect();
        let totals = clamp_negative(totals, "user");
        for batch in totals.chunks(batch_size) {
            match durable.write_user_likes_batch(batch).await {
                Ok(()) => report.users += batch.len(),
                Err(e) => {
                    report.failed_batches += 1;
                    metrics::counter!("reconcile.failures").increment(1);
                    tracing::warn!(rows = batch.len(), error = %e, "User likes batch rejected");
                }
            }
        }

        Ok(report)
    }

    /// Runs [`CounterEngine::reconcile_once`] every `period`, forever. The
    /// first tick fires one period after the call. Errors are logged and the
    /// next tick retries.
    pub async fn reconcile_forever<D: DurableStore>(
        &self,
        durable: &D,
        period: Duration,
        batch_size: usize,
    ) {
        let period = period.max(MIN_RECONCILE_PERIOD);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            metrics::counter!("reconcile.ticks").increment(1);
            let started = Instant::now();

            match self.reconcile_once(durable, batch_size).await {
                Ok(report) => tracing::info!(
                    articles = report.articles,
                    users = report.users,
                    failed_batches = report.failed_batches,
                    "Reconciliation tick complete"
                ),
                Err(e) => {
                    metrics::counter!("reconcile.failures").increment(1);
                    tracing::error!(error = %e, "Reconciliation tick failed");
                }
            }

            metrics::histogram!("reconcile.duration_seconds").record(started.elapsed().as_secs_f64());
        }
    }

    /// Spawns [`CounterEngine::reconcile_forever`] as a background task.
    pub fn spawn_reconciler<D>(
        &self,
        durable: Arc<D>,
        period: Duration,
        batch_size: usize,
    ) -> JoinHandle<()>
    where
        C: 'static,
        D: DurableStore + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .reconcile_forever(durable.as_ref(), period, batch_size)
                .await;
        })
    }
}

/// Replaces negative counters with zero; the durable tables reject them.
fn clamp_negative<Id: fmt::Display>(rows: Vec<(Id, i64)>, subject: &str) -> Vec<(Id, i64)> {
    rows.into_iter()
        .map(|(id, value)| {
            if value < 0 {
                metrics::counter!("reconcile.clamped", "subject" => subject.to_string()).increment(1);
                tracing::warn!(subject, id = %id, value, "Negative counter written as zero");
                (id, 0)
            } else {
                (id, value)
            }
        })
        .collect()
}
