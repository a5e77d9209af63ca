//! Engine error taxonomy.
//!
//! Expected, user-facing failures (a second like, a sold-out item) are kept
//! apart from infrastructure failures so callers can map them to client and
//! server errors with [`EngineError::is_client_error`].

use chrono::{DateTime, Utc};
use neighborly_core::error::{BrokerError, CacheError, StoreError};
use neighborly_core::model::{ArticleId, ItemId, ParseMessageError, UserId};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The user already likes the article.
    #[error("User {actor} already likes article {subject}")]
    AlreadyLiked {
        /// Liked article
        subject: ArticleId,
        /// Liking user
        actor: UserId,
    },

    /// The user does not like the article.
    #[error("User {actor} does not like article {subject}")]
    NotLiked {
        /// Article
        subject: ArticleId,
        /// User
        actor: UserId,
    },

    /// The user already holds a unit of the item.
    #[error("User {actor} already reserved item {item}")]
    AlreadyReserved {
        /// Item
        item: ItemId,
        /// User
        actor: UserId,
    },

    /// The item is unknown to the cache or has no units left.
    #[error("Item {item} is out of stock")]
    OutOfStock {
        /// Item
        item: ItemId,
    },

    /// No such article.
    #[error("Article {0} not found")]
    ArticleNotFound(ArticleId),

    /// The article has no basic projection, so it cannot be liked.
    #[error("Article {0} is not cached")]
    ArticleNotCached(ArticleId),

    /// No such item.
    #[error("Item {0} not found")]
    ItemNotFound(ItemId),

    /// The article kind is not one of the configured kinds.
    #[error("Unknown article kind '{0}'")]
    InvalidKind(String),

    /// The item definition is rejected.
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// The consumer window cannot be scheduled.
    #[error("Invalid reservation window {begin} - {end}: {reason}")]
    InvalidWindow {
        /// Requested start
        begin: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
        /// Why it was rejected
        reason: String,
    },

    /// A broker payload is not a reservation message.
    #[error(transparent)]
    MalformedMessage(#[from] ParseMessageError),

    /// The fast cache failed.
    #[error(transparent)]
    CacheUnavailable(#[from] CacheError),

    /// The durable store failed.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// The message broker failed.
    #[error(transparent)]
    BrokerUnavailable(#[from] BrokerError),

    /// A two-step update failed and undoing its first step failed too. The
    /// cache may be inconsistent and needs manual reconciliation.
    #[error("{original}; compensation also failed: {compensation}")]
    CompensationFailed {
        /// The failure that triggered compensation
        original: Box<EngineError>,
        /// The failure of the compensation itself
        compensation: Box<EngineError>,
    },
}

impl EngineError {
    /// Whether the error is an expected outcome caused by the request
    /// rather than by the infrastructure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyLiked { .. }
                | Self::NotLiked { .. }
                | Self::AlreadyReserved { .. }
                | Self::OutOfStock { .. }
                | Self::ArticleNotFound(_)
                | Self::ArticleNotCached(_)
                | Self::ItemNotFound(_)
                | Self::InvalidKind(_)
                | Self::InvalidItem(_)
                | Self::InvalidWindow { .. }
        )
    }

    /// Pairs a failure with the failure of the step meant to undo it.
    #[must_use]
    pub fn compensation_failed(original: Self, compensation: Self) -> Self {
        Self::CompensationFailed {
            original: Box::new(original),
            compensation: Box::new(compensation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_outcomes_are_client_errors() {
        let err = EngineError::OutOfStock { item: ItemId(1) };
        assert!(err.is_client_error());

        let err = EngineError::from(CacheError::Unavailable("down".to_string()));
        assert!(!err.is_client_error());
    }

    #[test]
    fn compensation_failure_reports_both_causes() {
        let err = EngineError::compensation_failed(
            CacheError::Unavailable("full projection".to_string()).into(),
            CacheError::Unavailable("basic projection".to_string()).into(),
        );

        let message = err.to_string();
        assert!(message.contains("full projection"));
        assert!(message.contains("basic projection"));
        assert!(!err.is_client_error());
    }
}
