//! Domain model shared by the engine and its collaborators.
//!
//! Projections that live in cache hashes know how to turn themselves into
//! hash fields and back. Field names are part of the cache layout and must
//! not change without a migration of the cached data.

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            /// Creates an identifier from its raw value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Article identifier.
    ArticleId
);
numeric_id!(
    /// User identifier. Users are the actors that like, follow and reserve.
    UserId
);
numeric_id!(
    /// Inventory item identifier.
    ItemId
);

/// Hash field holding the live like count in both article projections.
pub const LIKE_FIELD: &str = "like";

/// Hash field holding the remaining stock of an inventory item.
pub const REMAIN_FIELD: &str = "remain";

/// Full article projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Article id
    pub id: ArticleId,
    /// Title
    pub title: String,
    /// Full body
    pub content: String,
    /// Category the article is listed under
    pub kind: String,
    /// Author
    pub manager_id: UserId,
    /// Live like count
    pub like: i64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// Hash fields for the full projection.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.to_string()),
            ("title".to_string(), self.title.clone()),
            ("content".to_string(), self.content.clone()),
            ("kind".to_string(), self.kind.clone()),
            ("manager_id".to_string(), self.manager_id.to_string()),
            (LIKE_FIELD.to_string(), self.like.to_string()),
            ("created_at".to_string(), self.created_at.to_rfc3339()),
        ]
    }

    /// Decodes the full projection from hash fields.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupt`] if a field is missing or unparsable.
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, CacheError> {
        let created_at = text(key, fields, "created_at")?;
        let created_at = DateTime::parse_from_rfc3339(created_at)
            .map_err(|e| corrupt(key, format!("created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            id: parsed(key, fields, "id")?,
            title: text(key, fields, "title")?.to_string(),
            content: text(key, fields, "content")?.to_string(),
            kind: text(key, fields, "kind")?.to_string(),
            manager_id: parsed(key, fields, "manager_id")?,
            like: parsed(key, fields, LIKE_FIELD)?,
            created_at,
        })
    }
}

/// Basic, list-oriented article projection: truncated body, no timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicArticle {
    /// Article id
    pub id: ArticleId,
    /// Title
    pub title: String,
    /// First characters of the body
    pub preview: String,
    /// Category
    pub kind: String,
    /// Live like count
    pub like: i64,
    /// Author
    pub manager_id: UserId,
}

impl BasicArticle {
    /// Builds the basic projection of `article`, keeping the first
    /// `preview_chars` characters of the body.
    #[must_use]
    pub fn from_article(article: &Article, preview_chars: usize) -> Self {
        Self {
            id: article.id,
            title: article.title.clone(),
            preview: article.content.chars().take(preview_chars).collect(),
            kind: article.kind.clone(),
            like: article.like,
            manager_id: article.manager_id,
        }
    }

    /// Hash fields for the basic projection.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.to_string()),
            ("title".to_string(), self.title.clone()),
            ("preview".to_string(), self.preview.clone()),
            ("kind".to_string(), self.kind.clone()),
            (LIKE_FIELD.to_string(), self.like.to_string()),
            ("manager_id".to_string(), self.manager_id.to_string()),
        ]
    }

    /// Decodes the basic projection from hash fields.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupt`] if a field is missing or unparsable.
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, CacheError> {
        Ok(Self {
            id: parsed(key, fields, "id")?,
            title: text(key, fields, "title")?.to_string(),
            preview: text(key, fields, "preview")?.to_string(),
            kind: text(key, fields, "kind")?.to_string(),
            like: parsed(key, fields, LIKE_FIELD)?,
            manager_id: parsed(key, fields, "manager_id")?,
        })
    }
}

/// Input for creating an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArticle {
    /// Title
    pub title: String,
    /// Full body
    pub content: String,
    /// Category, validated against the configured kinds
    pub kind: String,
    /// Author
    pub manager_id: UserId,
}

/// Fields written by an article update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleUpdate {
    /// New title
    pub title: String,
    /// New body
    pub content: String,
    /// Like count carried over from the cache at update time
    pub like: i64,
}

/// A limited-capacity item that users reserve one unit of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Item id
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Price in the smallest currency unit
    pub price: i64,
    /// Total units; never changes after creation
    pub capacity: i64,
    /// Units left; `0 <= remain <= capacity`
    pub remain: i64,
    /// When reservations open
    pub open_time: DateTime<Utc>,
}

impl InventoryItem {
    /// Hash fields for the item-info hash read by the reservation script.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("price".to_string(), self.price.to_string()),
            ("capacity".to_string(), self.capacity.to_string()),
            (REMAIN_FIELD.to_string(), self.remain.to_string()),
            ("open_time".to_string(), self.open_time.to_rfc3339()),
        ]
    }

    /// Decodes an item-info hash.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corrupt`] if a field is missing or unparsable.
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, CacheError> {
        let open_time = DateTime::parse_from_rfc3339(text(key, fields, "open_time")?)
            .map_err(|e| corrupt(key, format!("open_time: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            id: parsed(key, fields, "id")?,
            name: text(key, fields, "name")?.to_string(),
            price: parsed(key, fields, "price")?,
            capacity: parsed(key, fields, "capacity")?,
            remain: parsed(key, fields, REMAIN_FIELD)?,
            open_time,
        })
    }
}

/// Input for creating an inventory item. `remain` starts at `capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    /// Display name
    pub name: String,
    /// Price in the smallest currency unit
    pub price: i64,
    /// Total units
    pub capacity: i64,
    /// When reservations open
    pub open_time: DateTime<Utc>,
}

/// Confirmation of a cache-side reservation, sent through the broker.
///
/// The wire form is the UTF-8 text `"{actor},{item}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationMessage {
    /// Who reserved
    pub actor: UserId,
    /// What was reserved
    pub item: ItemId,
}

/// A broker payload that is not a valid reservation message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed reservation message '{payload}': {reason}")]
pub struct ParseMessageError {
    /// The payload as received
    pub payload: String,
    /// Why it was rejected
    pub reason: String,
}

impl ReservationMessage {
    /// Creates a message.
    #[must_use]
    pub const fn new(actor: UserId, item: ItemId) -> Self {
        Self { actor, item }
    }

    /// Encodes the message as its wire payload.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{},{}", self.actor, self.item)
    }

    /// Parses a wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseMessageError`] unless the payload is exactly two
    /// comma-separated integers.
    pub fn parse(payload: &str) -> Result<Self, ParseMessageError> {
        let malformed = |reason: &str| ParseMessageError {
            payload: payload.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = payload.split(',');
        let (Some(actor), Some(item), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed("expected two comma-separated fields"));
        };

        let actor = actor.parse().map_err(|_| malformed("actor is not an integer"))?;
        let item = item.parse().map_err(|_| malformed("item is not an integer"))?;

        Ok(Self { actor, item })
    }
}

/// One row of a "likes among my follows" ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    /// Ranked user
    pub user: UserId,
    /// Their like score
    pub likes: i64,
    /// 1-based position, distinct per entry
    pub rank: usize,
}

/// Result of the atomic cache-side reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A unit was taken and the actor recorded.
    Reserved,
    /// The actor already holds a unit of this item.
    AlreadyReserved,
    /// The item is unknown or has no units left.
    OutOfStock,
}

/// Result of applying a reservation to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChooseOutcome {
    /// Reservation row inserted and stock decremented.
    Recorded,
    /// The reservation row already existed; nothing changed.
    Duplicate,
    /// No durable stock left; nothing changed.
    Exhausted,
}

fn corrupt(key: &str, reason: String) -> CacheError {
    CacheError::Corrupt {
        key: key.to_string(),
        reason,
    }
}

fn text<'a>(
    key: &str,
    fields: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, CacheError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| corrupt(key, format!("missing field '{name}'")))
}

fn parsed<T: FromStr>(
    key: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<T, CacheError> {
    text(key, fields, name)?
        .parse()
        .map_err(|_| corrupt(key, format!("field '{name}' is not a number")))
}
