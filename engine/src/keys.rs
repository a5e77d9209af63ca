//! Cache key layout.
//!
//! Every key the engine touches is built here so the layout can be read in
//! one place. Keys share a configurable prefix, which lets several
//! deployments (or test runs) share one cache without colliding.

use neighborly_core::model::{ArticleId, ItemId, UserId};

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "nb";

/// Builder for namespaced cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeySpace {
    /// Creates a key space under `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Basic projection hash of an article. Kept indefinitely; its `like`
    /// field is the authoritative counter between reconciliation ticks.
    #[must_use]
    pub fn article_basic(&self, id: ArticleId) -> String {
        format!("{}:article:basic:{id}", self.prefix)
    }

    /// Glob matching every basic projection.
    #[must_use]
    pub fn article_basic_pattern(&self) -> String {
        format!("{}:article:basic:*", self.prefix)
    }

    /// Extracts the article id from a basic projection key.
    #[must_use]
    pub fn article_id_from_basic(&self, key: &str) -> Option<ArticleId> {
        key.strip_prefix(&self.prefix)?
            .strip_prefix(":article:basic:")?
            .parse()
            .ok()
    }

    /// Full projection hash of an article, cached with a TTL.
    #[must_use]
    pub fn article_full(&self, id: ArticleId) -> String {
        format!("{}:article:full:{id}", self.prefix)
    }

    /// List of article ids of one kind, newest first.
    #[must_use]
    pub fn article_list(&self, kind: &str) -> String {
        format!("{}:article:list:{kind}", self.prefix)
    }

    /// Set of users who currently like an article.
    #[must_use]
    pub fn article_likers(&self, id: ArticleId) -> String {
        format!("{}:article:like:{id}", self.prefix)
    }

    /// Global sorted set of user like scores.
    #[must_use]
    pub fn user_likes(&self) -> String {
        format!("{}:user:likes", self.prefix)
    }

    /// Set of users `id` follows.
    #[must_use]
    pub fn user_follows(&self, id: UserId) -> String {
        format!("{}:user:follows:{id}", self.prefix)
    }

    /// Set of users following `id`.
    #[must_use]
    pub fn user_fans(&self, id: UserId) -> String {
        format!("{}:user:fans:{id}", self.prefix)
    }

    /// Scratch sorted set holding the last computed ranking of `id`.
    #[must_use]
    pub fn user_rank(&self, id: UserId) -> String {
        format!("{}:user:rank:{id}", self.prefix)
    }

    /// Item-info hash read by the reservation script.
    #[must_use]
    pub fn item_info(&self, id: ItemId) -> String {
        format!("{}:item:{id}:info", self.prefix)
    }

    /// Glob matching every item-info hash.
    #[must_use]
    pub fn item_info_pattern(&self) -> String {
        format!("{}:item:*:info", self.prefix)
    }

    /// Set of users holding a unit of an item.
    #[must_use]
    pub fn item_users(&self, id: ItemId) -> String {
        format!("{}:item:{id}:users", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_key_round_trips_to_id() {
        let keys = KeySpace::new("test");
        let key = keys.article_basic(ArticleId(42));

        assert_eq!(key, "test:article:basic:42");
        assert_eq!(keys.article_id_from_basic(&key), Some(ArticleId(42)));
    }

    #[test]
    fn foreign_keys_are_not_parsed() {
        let keys = KeySpace::new("test");

        assert_eq!(keys.article_id_from_basic("other:article:basic:42"), None);
        assert_eq!(keys.article_id_from_basic("test:article:full:42"), None);
        assert_eq!(keys.article_id_from_basic("test:article:basic:x"), None);
    }

    #[test]
    fn item_keys_share_the_item_segment() {
        let keys = KeySpace::default();

        assert_eq!(keys.item_info(ItemId(3)), "nb:item:3:info");
        assert_eq!(keys.item_users(ItemId(3)), "nb:item:3:users");
        assert_eq!(keys.item_info_pattern(), "nb:item:*:info");
    }
}
