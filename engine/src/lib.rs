//! # Neighborly Engine
//!
//! Cache-backed counter and inventory-reservation engine.
//!
//! Hot numeric state (article like counts, user like scores, remaining item
//! stock) lives in the fast cache and reaches the durable store
//! asynchronously:
//!
//! - [`CounterEngine`]: at-most-one-like-per-user counters over two article
//!   projections, with periodic reconciliation into the durable store
//! - [`RankEngine`]: user like scores and a "likes among my follows" ranking
//! - [`InventoryEngine`]: atomic check-and-decrement reservations, confirmed
//!   through the message broker
//! - [`ReservationScheduler`]: time-bounded consumers that persist confirmed
//!   reservations
//! - [`ArticleService`]: cache-aside article reads and double-delete updates
//!
//! Every component receives its collaborators at construction; nothing is
//! global.
//!
//! ## Example
//!
//! ```ignore
//! let cache = Arc::new(RedisCacheStore::new(&config.redis.url).await?);
//! let counters = CounterEngine::new(cache, KeySpace::default(), Duration::from_secs(7200));
//!
//! counters.add_like(ArticleId(7), UserId(3)).await?;
//! ```

pub mod article;
pub mod config;
pub mod counter;
pub mod error;
pub mod inventory;
pub mod keys;
pub mod metrics;
pub mod rank;
pub mod scheduler;

pub use article::{ArticleEdit, ArticleService};
pub use config::Config;
pub use counter::{CounterEngine, ReconcileReport};
pub use error::{EngineError, Result};
pub use inventory::InventoryEngine;
pub use keys::KeySpace;
pub use rank::RankEngine;
pub use scheduler::{ConsumerWindow, ReservationScheduler, WindowReport};
