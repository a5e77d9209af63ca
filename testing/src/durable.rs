//! In-memory durable store.

use chrono::{DateTime, Utc};
use neighborly_core::durable::DurableStore;
use neighborly_core::error::{StoreError, StoreResult};
use neighborly_core::model::{
    Article, ArticleId, ArticleUpdate, ChooseOutcome, InventoryItem, ItemId, NewArticle, NewItem,
    UserId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    articles: BTreeMap<ArticleId, Article>,
    next_article: i64,
    items: BTreeMap<ItemId, InventoryItem>,
    next_item: i64,
    reservations: BTreeSet<(UserId, ItemId)>,
    user_likes: HashMap<UserId, i64>,
    counter_batches: Vec<Vec<(ArticleId, i64)>>,
    article_reads: usize,
    fail_writes: bool,
}

/// In-memory durable store with transactional batch semantics.
///
/// A batch containing a negative count is rejected as a whole, mirroring the
/// `CHECK (likes >= 0)` constraint of the relational schema. Writes can be
/// switched off with [`InMemoryDurableStore::set_fail_writes`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryDurableStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryDurableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))
    }

    fn writable(&self) -> StoreResult<MutexGuard<'_, State>> {
        let state = self.lock()?;
        if state.fail_writes {
            return Err(StoreError::Unavailable("injected: writes disabled".to_string()));
        }
        Ok(state)
    }

    /// Makes every write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_writes = fail;
        }
    }

    /// Inserts an article row as-is, for seeding tests.
    pub fn insert_article(&self, article: Article) {
        if let Ok(mut state) = self.state.lock() {
            state.next_article = state.next_article.max(article.id.0);
            state.articles.insert(article.id, article);
        }
    }

    /// Current article row.
    #[must_use]
    pub fn article(&self, id: ArticleId) -> Option<Article> {
        self.lock().ok()?.articles.get(&id).cloned()
    }

    /// Current item row.
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<InventoryItem> {
        self.lock().ok()?.items.get(&id).cloned()
    }

    /// Recorded reservations, ordered by user then item.
    #[must_use]
    pub fn reservations(&self) -> Vec<(UserId, ItemId)> {
        self.lock()
            .map(|state| state.reservations.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Reconciled like total of a user.
    #[must_use]
    pub fn user_likes(&self, user: UserId) -> Option<i64> {
        self.lock().ok()?.user_likes.get(&user).copied()
    }

    /// Every committed article counter batch, in commit order.
    #[must_use]
    pub fn counter_batches(&self) -> Vec<Vec<(ArticleId, i64)>> {
        self.lock()
            .map(|state| state.counter_batches.clone())
            .unwrap_or_default()
    }

    /// Number of `read_article` calls served.
    #[must_use]
    pub fn article_reads(&self) -> usize {
        self.lock().map(|state| state.article_reads).unwrap_or(0)
    }
}

impl DurableStore for InMemoryDurableStore {
    async fn create_article(
        &self,
        article: &NewArticle,
        created_at: DateTime<Utc>,
    ) -> StoreResult<Article> {
        let mut state = self.writable()?;
        state.next_article += 1;
        let created = Article {
            id: ArticleId(state.next_article),
            title: article.title.clone(),
            content: article.content.clone(),
            kind: article.kind.clone(),
            manager_id: article.manager_id,
            like: 0,
            created_at,
        };
        state.articles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn read_article(&self, id: ArticleId) -> StoreResult<Option<Article>> {
        let mut state = self.lock()?;
        state.article_reads += 1;
        Ok(state.articles.get(&id).cloned())
    }

    async fn update_article(&self, id: ArticleId, update: &ArticleUpdate) -> StoreResult<Article> {
        let mut state = self.writable()?;
        let article = state
            .articles
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("article {id}")))?;
        article.title.clone_from(&update.title);
        article.content.clone_from(&update.content);
        article.like = update.like;
        Ok(article.clone())
    }

    async fn delete_article(&self, id: ArticleId) -> StoreResult<()> {
        self.writable()?.articles.remove(&id);
        Ok(())
    }

    async fn write_counter_batch(&self, batch: &[(ArticleId, i64)]) -> StoreResult<()> {
        let mut state = self.writable()?;
        if let Some((id, value)) = batch.iter().find(|(_, value)| *value < 0) {
            return Err(StoreError::Constraint(format!(
                "article {id} like count {value} is negative"
            )));
        }
        for (id, value) in batch {
            if let Some(article) = state.articles.get_mut(id) {
                article.like = *value;
            }
        }
        state.counter_batches.push(batch.to_vec());
        Ok(())
    }

    async fn write_user_likes_batch(&self, batch: &[(UserId, i64)]) -> StoreResult<()> {
        let mut state = self.writable()?;
        if let Some((id, value)) = batch.iter().find(|(_, value)| *value < 0) {
            return Err(StoreError::Constraint(format!(
                "user {id} like total {value} is negative"
            )));
        }
        state.user_likes.extend(batch.iter().copied());
        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> StoreResult<InventoryItem> {
        let mut state = self.writable()?;
        state.next_item += 1;
        let created = InventoryItem {
            id: ItemId(state.next_item),
            name: item.name.clone(),
            price: item.price,
            capacity: item.capacity,
            remain: item.capacity,
            open_time: item.open_time,
        };
        state.items.insert(created.id, created.clone());
        Ok(created)
    }

    async fn read_item(&self, id: ItemId) -> StoreResult<Option<InventoryItem>> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn choose_item(&self, actor: UserId, item: ItemId) -> StoreResult<ChooseOutcome> {
        let mut state = self.writable()?;
        let remain = state
            .items
            .get(&item)
            .map(|row| row.remain)
            .ok_or_else(|| StoreError::NotFound(format!("item {item}")))?;

        if state.reservations.contains(&(actor, item)) {
            return Ok(ChooseOutcome::Duplicate);
        }
        if remain <= 0 {
            return Ok(ChooseOutcome::Exhausted);
        }

        state.reservations.insert((actor, item));
        if let Some(row) = state.items.get_mut(&item) {
            row.remain -= 1;
        }
        Ok(ChooseOutcome::Recorded)
    }
}
