//! Article cache-aside flows.
//!
//! Reads go to the full projection first and fall back to the durable row,
//! repopulating the projection in the background. Updates invalidate both
//! projections before and after the durable write, so a reader that raced
//! the write cannot leave a stale projection behind.
//!
//! Background repopulation tasks are unsupervised; their failures show up
//! in the logs only.

use crate::counter::CounterEngine;
use crate::error::{EngineError, Result};
use neighborly_core::cache::CacheStore;
use neighborly_core::durable::DurableStore;
use neighborly_core::environment::Clock;
use neighborly_core::error::StoreError;
use neighborly_core::model::{Article, ArticleId, ArticleUpdate, BasicArticle, NewArticle};
use std::sync::Arc;

/// New title and body for an article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleEdit {
    /// New title
    pub title: String,
    /// New body
    pub content: String,
}

/// Article creation, listing, reading and updating.
pub struct ArticleService<C, D> {
    counters: CounterEngine<C>,
    durable: Arc<D>,
    clock: Arc<dyn Clock>,
    kinds: Vec<String>,
    preview_chars: usize,
}

impl<C, D> ArticleService<C, D>
where
    C: CacheStore + 'static,
    D: DurableStore + 'static,
{
    /// Creates a service accepting articles of the listed `kinds`.
    #[must_use]
    pub const fn new(
        counters: CounterEngine<C>,
        durable: Arc<D>,
        clock: Arc<dyn Clock>,
        kinds: Vec<String>,
        preview_chars: usize,
    ) -> Self {
        Self {
            counters,
            durable,
            clock,
            kinds,
            preview_chars,
        }
    }

    /// The counter engine holding the article projections.
    #[must_use]
    pub const fn counters(&self) -> &CounterEngine<C> {
        &self.counters
    }

    fn check_kind(&self, kind: &str) -> Result<()> {
        if self.kinds.iter().any(|k| k == kind) {
            Ok(())
        } else {
            Err(EngineError::InvalidKind(kind.to_string()))
        }
    }

    /// Persists an article and caches its basic projection.
    ///
    /// The full projection is written in the background.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidKind`] if the kind is not configured
    /// - [`EngineError::StoreUnavailable`] if the insert fails
    /// - [`EngineError::CacheUnavailable`] if the basic projection could not
    ///   be written; the durable row is deleted again
    /// - [`EngineError::CompensationFailed`] if that delete fails too
    pub async fn create_article(&self, new: &NewArticle) -> Result<Article> {
        self.check_kind(&new.kind)?;

        let article = self.durable.create_article(new, self.clock.now()).await?;
        let basic = BasicArticle::from_article(&article, self.preview_chars);

        if let Err(e) = self.counters.cache_basic(&basic, true).await {
            tracing::warn!(article = %article.id, error = %e, "Basic projection write failed, removing article");
            return Err(self.undo_create(article.id, e).await);
        }

        let counters = self.counters.clone();
        let full = article.clone();
        tokio::spawn(async move {
            if let Err(e) = counters.cache_article(&full).await {
                tracing::warn!(article = %full.id, error = %e, "Failed to cache full projection");
            }
        });

        tracing::info!(article = %article.id, kind = %article.kind, "Article created");
        Ok(article)
    }

    async fn undo_create(&self, id: ArticleId, original: EngineError) -> EngineError {
        if let Err(e) = self.durable.delete_article(id).await {
            tracing::error!(article = %id, error = %e, "Failed to delete article after cache failure");
            return EngineError::compensation_failed(original, e.into());
        }
        // The basic hash may exist without its list entry
        if let Err(e) = self.counters.invalidate_for_update(id).await {
            return EngineError::compensation_failed(original, e);
        }
        original
    }

    async fn restore_basic(
        &self,
        basic: Option<&BasicArticle>,
        original: EngineError,
    ) -> EngineError {
        let Some(basic) = basic else {
            return original;
        };
        if let Err(e) = self.counters.cache_basic(basic, false).await {
            tracing::error!(article = %basic.id, error = %e, "Failed to restore basic projection after store failure");
            return EngineError::compensation_failed(original, e);
        }
        tracing::warn!(article = %basic.id, like = basic.like, error = %original, "Article update failed, basic projection restored");
        original
    }

    /// Basic projections of one kind, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidKind`] for an unknown kind, or a cache
    /// error.
    pub async fn list_by_kind(&self, kind: &str) -> Result<Vec<BasicArticle>> {
        self.check_kind(kind)?;
        self.counters.list_basic_by_kind(kind).await
    }

    /// Reads an article, cache first.
    ///
    /// On a miss the durable row is returned with the live like count from
    /// the basic projection, and the full projection is rebuilt in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ArticleNotFound`] if no row exists, or an
    /// infrastructure error.
    pub async fn get_article(&self, id: ArticleId) -> Result<Article> {
        if let Some(article) = self.counters.get_by_subject(id).await? {
            return Ok(article);
        }

        let mut article = self
            .durable
            .read_article(id)
            .await?
            .ok_or(EngineError::ArticleNotFound(id))?;
        if let Some(like) = self.counters.like_count(id).await? {
            article.like = like;
        }

        let counters = self.counters.clone();
        let full = article.clone();
        tokio::spawn(async move {
            if let Err(e) = counters.cache_article(&full).await {
                tracing::warn!(article = %full.id, error = %e, "Failed to repopulate full projection");
            }
        });

        Ok(article)
    }

    /// Rewrites title and body, carrying the live like count into the
    /// durable row.
    ///
    /// Both projections are deleted before and after the durable write. The
    /// basic projection is rebuilt in the background without touching the
    /// kind list. If the durable write fails, the basic projection read
    /// before the first delete is put back, since it holds the live count.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ArticleNotFound`] if no row exists, or an
    /// infrastructure error.
    pub async fn update_article(&self, id: ArticleId, edit: ArticleEdit) -> Result<Article> {
        let cached = self.counters.get_basic(id).await?;
        let like = match &cached {
            Some(basic) => basic.like,
            None => {
                self.durable
                    .read_article(id)
                    .await?
                    .ok_or(EngineError::ArticleNotFound(id))?
                    .like
            }
        };

        self.counters.invalidate_for_update(id).await?;

        let update = ArticleUpdate {
            title: edit.title,
            content: edit.content,
            like,
        };
        let updated = match self.durable.update_article(id, &update).await {
            Ok(updated) => updated,
            Err(e) => {
                let original = match e {
                    StoreError::NotFound(_) => EngineError::ArticleNotFound(id),
                    other => other.into(),
                };
                return Err(self.restore_basic(cached.as_ref(), original).await);
            }
        };

        self.counters.invalidate_for_update(id).await?;

        let counters = self.counters.clone();
        let basic = BasicArticle::from_article(&updated, self.preview_chars);
        tokio::spawn(async move {
            if let Err(e) = counters.cache_basic(&basic, false).await {
                tracing::warn!(article = %basic.id, error = %e, "Failed to rebuild basic projection");
            }
        });

        tracing::info!(article = %id, like, "Article updated");
        Ok(updated)
    }
}
