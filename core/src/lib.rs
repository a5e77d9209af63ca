//! # Neighborly Core
//!
//! Domain model and collaborator contracts for the Neighborly counter and
//! reservation engine.
//!
//! The engine keeps hot, frequently mutated numbers (like counts, remaining
//! item stock) in a fast cache and reconciles them into a slower durable
//! store. This crate defines the vocabulary shared by every other crate in
//! the workspace:
//!
//! - [`model`]: identifiers, article projections, inventory items, reservation
//!   messages and rank entries
//! - [`cache`]: the [`CacheStore`](cache::CacheStore) contract (hashes, sets,
//!   lists, sorted sets, and the atomic reservation script)
//! - [`durable`]: the [`DurableStore`](durable::DurableStore) contract
//! - [`broker`]: the [`MessageBroker`](broker::MessageBroker) contract
//! - [`environment`]: injected [`Clock`](environment::Clock)
//! - [`error`]: errors raised by the collaborators
//!
//! ## Architecture
//!
//! ```text
//! write path   ──► cache (atomic) ──► broker ──► scheduled consumer ──► durable store
//! read path    ──► cache ──(miss)──► durable store ──► background repopulation
//! periodic     ──► cache scan ──► durable store (one transaction per batch)
//! ```
//!
//! Implementations live in sibling crates: `neighborly-redis`,
//! `neighborly-postgres`, `neighborly-redpanda`, and the in-memory
//! `neighborly-testing`.

pub mod broker;
pub mod cache;
pub mod durable;
pub mod environment;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{BrokerError, CacheError, StoreError};
pub use model::{ArticleId, ItemId, UserId};
