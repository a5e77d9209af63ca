//! Inventory Reservation Engine.
//!
//! Stock of each item lives in its item-info hash; the users holding a unit
//! live in a members set. [`InventoryEngine::try_reserve`] checks and updates
//! both in one server-side atomic step, then enqueues a
//! [`ReservationMessage`] so the reservation consumer can persist it.
//!
//! A reservation that succeeded in the cache is never rolled back. If the
//! enqueue fails the caller still sees success; the failure is logged and
//! counted under `reservations.enqueue_failed`.

use crate::error::{EngineError, Result};
use crate::keys::KeySpace;
use neighborly_core::broker::MessageBroker;
use neighborly_core::cache::CacheStore;
use neighborly_core::durable::DurableStore;
use neighborly_core::model::{
    InventoryItem, ItemId, NewItem, ReservationMessage, ReserveOutcome, UserId,
};
use std::sync::Arc;

/// Item administration and reservations.
pub struct InventoryEngine<C, D> {
    cache: Arc<C>,
    durable: Arc<D>,
    broker: Arc<dyn MessageBroker>,
    keys: KeySpace,
    queue: String,
}

impl<C, D> Clone for InventoryEngine<C, D> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            durable: Arc::clone(&self.durable),
            broker: Arc::clone(&self.broker),
            keys: self.keys.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<C: CacheStore, D: DurableStore> InventoryEngine<C, D> {
    /// Creates an engine that publishes confirmations to `queue`.
    #[must_use]
    pub fn new(
        cache: Arc<C>,
        durable: Arc<D>,
        broker: Arc<dyn MessageBroker>,
        keys: KeySpace,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            durable,
            broker,
            keys,
            queue: queue.into(),
        }
    }

    /// Queue receiving reservation confirmations.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Creates an item with `remain = capacity`, persists it and publishes
    /// its info hash to the cache.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidItem`] if the name is blank or a number is
    ///   negative
    /// - [`EngineError::StoreUnavailable`] or
    ///   [`EngineError::CacheUnavailable`] on infrastructure failure
    pub async fn create_item(&self, item: &NewItem) -> Result<InventoryItem> {
        validate(item)?;

        let created = self.durable.create_item(item).await?;
        let stored = self
            .durable
            .read_item(created.id)
            .await?
            .ok_or(EngineError::ItemNotFound(created.id))?;

        self.cache
            .hash_set(&self.keys.item_info(stored.id), &stored.to_fields())
            .await?;

        tracing::info!(
            item = %stored.id,
            capacity = stored.capacity,
            open_time = %stored.open_time,
            "Item created"
        );
        Ok(stored)
    }

    /// Reads an item from the cache.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ItemNotFound`] if the item has no info hash.
    pub async fn get_item(&self, id: ItemId) -> Result<InventoryItem> {
        let key = self.keys.item_info(id);
        let fields = self.cache.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Err(EngineError::ItemNotFound(id));
        }
        Ok(InventoryItem::from_fields(&key, &fields)?)
    }

    /// Every cached item, ordered by id. Corrupt entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn list_items(&self) -> Result<Vec<InventoryItem>> {
        let keys = self.cache.scan_keys(&self.keys.item_info_pattern()).await?;

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let fields = self.cache.hash_get_all(&key).await?;
            if fields.is_empty() {
                continue;
            }
            match InventoryItem::from_fields(&key, &fields) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping corrupt item"),
            }
        }
        items.sort_unstable_by_key(|item| item.id);
        Ok(items)
    }

    /// Whether `actor` holds a unit of `item`.
    ///
    /// # Errors
    ///
    /// Returns error if the cache is unreachable.
    pub async fn is_reserved(&self, item: ItemId, actor: UserId) -> Result<bool> {
        Ok(self
            .cache
            .set_is_member(&self.keys.item_users(item), &actor.to_string())
            .await?)
    }

    /// Reserves one unit of `item` for `actor`.
    ///
    /// On success a confirmation is enqueued before returning. A failed
    /// enqueue does not fail the call.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyReserved`] if `actor` holds a unit already
    /// - [`EngineError::OutOfStock`] if the item is unknown or sold out
    /// - [`EngineError::CacheUnavailable`] if the script could not run
    pub async fn try_reserve(&self, item: ItemId, actor: UserId) -> Result<()> {
        let outcome = self
            .cache
            .reserve(
                &self.keys.item_users(item),
                &self.keys.item_info(item),
                &actor.to_string(),
            )
            .await?;

        let label = match outcome {
            ReserveOutcome::Reserved => "reserved",
            ReserveOutcome::AlreadyReserved => "already_reserved",
            ReserveOutcome::OutOfStock => "out_of_stock",
        };
        metrics::counter!("reservations.attempts", "outcome" => label).increment(1);

        match outcome {
            ReserveOutcome::Reserved => {
                tracing::info!(item = %item, user = %actor, "Item reserved");
                self.enqueue(ReservationMessage::new(actor, item)).await;
                Ok(())
            }
            ReserveOutcome::AlreadyReserved => Err(EngineError::AlreadyReserved { item, actor }),
            ReserveOutcome::OutOfStock => Err(EngineError::OutOfStock { item }),
        }
    }

    async fn enqueue(&self, message: ReservationMessage) {
        if let Err(e) = self.broker.publish(&self.queue, &message.encode()).await {
            metrics::counter!("reservations.enqueue_failed").increment(1);
            tracing::error!(
                item = %message.item,
                user = %message.actor,
                queue = %self.queue,
                error = %e,
                "Reservation confirmed in cache but not enqueued"
            );
        }
    }
}

fn validate(item: &NewItem) -> Result<()> {
    if item.name.trim().is_empty() {
        return Err(EngineError::InvalidItem("name is empty".to_string()));
    }
    if item.capacity < 0 {
        return Err(EngineError::InvalidItem(format!(
            "capacity {} is negative",
            item.capacity
        )));
    }
    if item.price < 0 {
        return Err(EngineError::InvalidItem(format!("price {} is negative", item.price)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(name: &str, price: i64, capacity: i64) -> NewItem {
        NewItem {
            name: name.to_string(),
            price,
            capacity,
            open_time: Utc::now(),
        }
    }

    #[test]
    fn validation_rejects_bad_items() {
        assert!(validate(&item("lamp", 100, 3)).is_ok());
        assert!(validate(&item("free", 0, 0)).is_ok());
        assert!(matches!(validate(&item("  ", 1, 1)), Err(EngineError::InvalidItem(_))));
        assert!(matches!(validate(&item("lamp", 1, -1)), Err(EngineError::InvalidItem(_))));
        assert!(matches!(validate(&item("lamp", -1, 1)), Err(EngineError::InvalidItem(_))));
    }
}
