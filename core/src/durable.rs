//! Durable store contract.
//!
//! A narrow interface over the relational store. The hot request path never
//! read-modify-writes counters here; counters arrive through reconciliation
//! batches and reservations through [`DurableStore::choose_item`].

use crate::error::StoreResult;
use crate::model::{
    Article, ArticleId, ArticleUpdate, ChooseOutcome, InventoryItem, ItemId, NewArticle, NewItem,
    UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Durable persistence for articles, items, reservations and counters.
pub trait DurableStore: Send + Sync {
    /// Inserts an article with a zero like count.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    fn create_article(
        &self,
        article: &NewArticle,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Article>> + Send;

    /// Reads an article row.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. A missing row is `Ok(None)`.
    fn read_article(
        &self,
        id: ArticleId,
    ) -> impl Future<Output = StoreResult<Option<Article>>> + Send;

    /// Overwrites title, content and like count, returning the updated row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if the
    /// article does not exist.
    fn update_article(
        &self,
        id: ArticleId,
        update: &ArticleUpdate,
    ) -> impl Future<Output = StoreResult<Article>> + Send;

    /// Deletes an article row. Used only to undo a create whose cache write
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    fn delete_article(&self, id: ArticleId) -> impl Future<Output = StoreResult<()>> + Send;

    /// Writes article like counts in one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails; no row of the batch is
    /// written in that case.
    fn write_counter_batch(
        &self,
        batch: &[(ArticleId, i64)],
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Writes user like totals in one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    fn write_user_likes_batch(
        &self,
        batch: &[(UserId, i64)],
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Inserts an item with `remain = capacity`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    fn create_item(&self, item: &NewItem) -> impl Future<Output = StoreResult<InventoryItem>> + Send;

    /// Reads an item row.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. A missing row is `Ok(None)`.
    fn read_item(
        &self,
        id: ItemId,
    ) -> impl Future<Output = StoreResult<Option<InventoryItem>>> + Send;

    /// Records a reservation: inserts the `(actor, item)` row and decrements
    /// the item's `remain`, in one transaction.
    ///
    /// Idempotent per `(actor, item)`: a redelivered reservation returns
    /// [`ChooseOutcome::Duplicate`] and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails or the item does not exist.
    fn choose_item(
        &self,
        actor: UserId,
        item: ItemId,
    ) -> impl Future<Output = StoreResult<ChooseOutcome>> + Send;
}
