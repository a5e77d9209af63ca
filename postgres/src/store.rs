//! `PostgresDurableStore` and its SQL.

use chrono::{DateTime, Utc};
use neighborly_core::durable::DurableStore;
use neighborly_core::error::{StoreError, StoreResult};
use neighborly_core::model::{
    Article, ArticleId, ArticleUpdate, ChooseOutcome, InventoryItem, ItemId, NewArticle, NewItem,
    UserId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

const ARTICLE_COLUMNS: &str = "id, title, content, kind, manager_id, likes, created_at";
const ITEM_COLUMNS: &str = "id, name, price, capacity, remain, open_time";

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// Time allowed to acquire a connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// `PostgreSQL`-backed durable store.
#[derive(Clone)]
pub struct PostgresDurableStore {
    pool: PgPool,
}

impl PostgresDurableStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = settings.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts the `(actor, item)` reservation row. Returns `false` if it
    /// already existed.
    async fn create_reservation_row(
        tx: &mut Transaction<'_, Postgres>,
        actor: UserId,
        item: ItemId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO item_reservations (user_id, item_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, item_id) DO NOTHING
            ",
        )
        .bind(actor.0)
        .bind(item.0)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error("insert reservation", &e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Takes one unit of durable stock. Returns `false` if none is left.
    async fn decrement_remain(
        tx: &mut Transaction<'_, Postgres>,
        item: ItemId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE community_items
            SET remain = remain - 1
            WHERE id = $1 AND remain > 0
            ",
        )
        .bind(item.0)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error("decrement remain", &e))?;

        Ok(result.rows_affected() == 1)
    }
}

fn store_error(action: &str, e: &sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) if db.constraint().is_some() => {
            StoreError::Constraint(format!("Failed to {action}: {e}"))
        }
        _ => StoreError::Unavailable(format!("Failed to {action}: {e}")),
    }
}

fn article_from_row(row: &PgRow) -> Result<Article, sqlx::Error> {
    Ok(Article {
        id: ArticleId(row.try_get("id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        kind: row.try_get("kind")?,
        manager_id: UserId(row.try_get("manager_id")?),
        like: row.try_get("likes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<InventoryItem, sqlx::Error> {
    Ok(InventoryItem {
        id: ItemId(row.try_get("id")?),
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        capacity: row.try_get("capacity")?,
        remain: row.try_get("remain")?,
        open_time: row.try_get("open_time")?,
    })
}

impl DurableStore for PostgresDurableStore {
    async fn create_article(
        &self,
        article: &NewArticle,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Article> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO articles (title, content, kind, manager_id, likes, created_at)
            VALUES ($1, $2, $3, $4, 0, $5)
            RETURNING {ARTICLE_COLUMNS}
            "
        ))
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.kind)
        .bind(article.manager_id.0)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("insert article", &e))?;

        let created = article_from_row(&row).map_err(|e| store_error("decode article", &e))?;

        tracing::info!(article_id = %created.id, kind = %created.kind, "Article row created");

        Ok(created)
    }

    async fn read_article(&self, id: ArticleId) -> StoreResult<Option<Article>> {
        let row = sqlx::query(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("read article", &e))?;

        row.as_ref()
            .map(article_from_row)
            .transpose()
            .map_err(|e| store_error("decode article", &e))
    }

    async fn update_article(&self, id: ArticleId, update: &ArticleUpdate) -> StoreResult<Article> {
        let row = sqlx::query(&format!(
            r"
            UPDATE articles
            SET title = $2, content = $3, likes = $4, updated_at = now()
            WHERE id = $1
            RETURNING {ARTICLE_COLUMNS}
            "
        ))
        .bind(id.0)
        .bind(&update.title)
        .bind(&update.content)
        .bind(update.like)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("update article", &e))?
        .ok_or_else(|| StoreError::NotFound(format!("article {id}")))?;

        article_from_row(&row).map_err(|e| store_error("decode article", &e))
    }

    async fn delete_article(&self, id: ArticleId) -> StoreResult<()> {
        sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("delete article", &e))?;

        tracing::warn!(article_id = %id, "Article row deleted");

        Ok(())
    }

    async fn write_counter_batch(&self, batch: &[(ArticleId, i64)]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("start transaction", &e))?;

        let mut missing = 0_u64;
        for (id, likes) in batch {
            let result = sqlx::query(
                "UPDATE articles SET likes = $2, updated_at = now() WHERE id = $1",
            )
            .bind(id.0)
            .bind(likes)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("write article likes", &e))?;

            if result.rows_affected() == 0 {
                missing += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| store_error("commit counter batch", &e))?;

        if missing > 0 {
            tracing::debug!(missing, "Counter batch referenced articles with no row");
        }
        metrics::counter!("reconcile.rows_written", "table" => "articles")
            .increment(batch.len() as u64);

        Ok(())
    }

    async fn write_user_likes_batch(&self, batch: &[(UserId, i64)]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("start transaction", &e))?;

        for (user, likes) in batch {
            sqlx::query(
                r"
                INSERT INTO user_likes (user_id, likes)
                VALUES ($1, $2)
                ON CONFLICT (user_id)
                DO UPDATE SET likes = EXCLUDED.likes, updated_at = now()
                ",
            )
            .bind(user.0)
            .bind(likes)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("write user likes", &e))?;
        }

        tx.commit()
            .await
            .map_err(|e| store_error("commit user likes batch", &e))?;

        metrics::counter!("reconcile.rows_written", "table" => "user_likes")
            .increment(batch.len() as u64);

        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> StoreResult<InventoryItem> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO community_items (name, price, capacity, remain, open_time)
            VALUES ($1, $2, $3, $3, $4)
            RETURNING {ITEM_COLUMNS}
            "
        ))
        .bind(&item.name)
        .bind(item.price)
        .bind(item.capacity)
        .bind(item.open_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("insert item", &e))?;

        let created = item_from_row(&row).map_err(|e| store_error("decode item", &e))?;

        tracing::info!(item_id = %created.id, capacity = created.capacity, "Item row created");

        Ok(created)
    }

    async fn read_item(&self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM community_items WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("read item", &e))?;

        row.as_ref()
            .map(item_from_row)
            .transpose()
            .map_err(|e| store_error("decode item", &e))
    }

    async fn choose_item(&self, actor: UserId, item: ItemId) -> StoreResult<ChooseOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("start transaction", &e))?;

        // Lock the item row so concurrent consumers serialize per item
        let locked = sqlx::query("SELECT remain FROM community_items WHERE id = $1 FOR UPDATE")
            .bind(item.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error("lock item", &e))?;

        if locked.is_none() {
            let _ = tx.rollback().await;
            return Err(StoreError::NotFound(format!("item {item}")));
        }

        if !Self::create_reservation_row(&mut tx, actor, item).await? {
            let _ = tx.rollback().await;
            tracing::debug!(user_id = %actor, item_id = %item, "Reservation already recorded");
            return Ok(ChooseOutcome::Duplicate);
        }

        if !Self::decrement_remain(&mut tx, item).await? {
            let _ = tx.rollback().await;
            tracing::warn!(user_id = %actor, item_id = %item, "No durable stock left for reservation");
            return Ok(ChooseOutcome::Exhausted);
        }

        tx.commit()
            .await
            .map_err(|e| store_error("commit reservation", &e))?;

        tracing::info!(user_id = %actor, item_id = %item, "Reservation recorded");

        Ok(ChooseOutcome::Recorded)
    }
}
